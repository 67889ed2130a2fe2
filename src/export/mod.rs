//! Result export, dispatched on the output file's extension.
//!
//! Columns are the union of every field seen across the rows, in first-seen
//! order; a row missing a column gets an empty cell (csv) or no key (json).

use crate::error::ScrapeError;
use crate::models::ResultTable;
use anyhow::Context;
use serde_json::{Map, Value};
use std::fs::File;
use std::io::Write;
use std::path::Path;

pub fn export(table: &ResultTable, path: &Path) -> anyhow::Result<()> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_lowercase();

    match ext.as_str() {
        "csv" => {
            let file = File::create(path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            write_csv(table, file)
        }
        "json" => {
            let file = File::create(path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            write_json(table, file)
        }
        _ => Err(ScrapeError::UnsupportedExport(ext).into()),
    }
}

fn write_csv(table: &ResultTable, out: impl Write) -> anyhow::Result<()> {
    let columns = table.columns();
    let mut writer = csv::Writer::from_writer(out);
    writer.write_record(&columns)?;
    for row in table.rows() {
        let cells: Vec<String> = columns
            .iter()
            .map(|c| row.get(c).map(|v| v.to_string()).unwrap_or_default())
            .collect();
        writer.write_record(&cells)?;
    }
    writer.flush()?;
    Ok(())
}

fn write_json(table: &ResultTable, out: impl Write) -> anyhow::Result<()> {
    let rows: Vec<Value> = table
        .rows()
        .iter()
        .map(|row| {
            let mut object = Map::new();
            for (name, value) in row.fields() {
                object.insert(name.to_string(), serde_json::to_value(value).unwrap_or(Value::Null));
            }
            Value::Object(object)
        })
        .collect();
    serde_json::to_writer_pretty(out, &rows).context("failed to serialise rows")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Record;

    fn sample() -> ResultTable {
        let mut a = Record::new();
        a.set("first_name", "mario");
        a.set("height", 185i64);
        let mut b = Record::new();
        b.set("first_name", "carlo");
        b.set("club", "juventus");

        let mut table = ResultTable::new();
        table.push(a);
        table.push(b);
        table
    }

    #[test]
    fn test_csv_pads_missing_columns() {
        let mut out = Vec::new();
        write_csv(&sample(), &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines[0], "first_name,height,club");
        assert_eq!(lines[1], "mario,185,");
        assert_eq!(lines[2], "carlo,,juventus");
    }

    #[test]
    fn test_json_rows_carry_only_present_fields() {
        let mut out = Vec::new();
        write_json(&sample(), &mut out).unwrap();
        let rows: Vec<serde_json::Value> = serde_json::from_slice(&out).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["height"], 185);
        assert!(rows[0].get("club").is_none());
        assert_eq!(rows[1]["club"], "juventus");
    }

    #[test]
    fn test_unknown_extension_is_rejected() {
        let err = export(&sample(), Path::new("out.parquet")).unwrap_err();
        assert!(err.to_string().contains("parquet"));
    }

    #[test]
    fn test_export_csv_to_disk() {
        let path = std::env::temp_dir().join(format!("fmscout-export-{}.csv", std::process::id()));
        export(&sample(), &path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("first_name,height,club"));
        std::fs::remove_file(&path).ok();
    }
}
