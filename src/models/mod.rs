use serde::Serialize;
use std::fmt;

// ── Field values ──────────────────────────────────────────────────────────────

/// A single extracted value. Dates are carried as canonical `dd/mm/yyyy` text.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    Int(i64),
}

impl FieldValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            FieldValue::Int(_) => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            FieldValue::Int(n) => Some(*n),
            FieldValue::Text(_) => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Text(s) => f.write_str(s),
            FieldValue::Int(n) => write!(f, "{n}"),
        }
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Text(s)
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl From<i64> for FieldValue {
    fn from(n: i64) -> Self {
        FieldValue::Int(n)
    }
}

impl From<u8> for FieldValue {
    fn from(n: u8) -> Self {
        FieldValue::Int(n as i64)
    }
}

// ── Person kind ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersonKind {
    Player,
    Staff,
}

impl PersonKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PersonKind::Player => "player",
            PersonKind::Staff => "staff",
        }
    }
}

// ── Record ────────────────────────────────────────────────────────────────────

/// Flat, insertion-ordered field map for one person. There is no fixed schema;
/// extractors and fillers add fields as they discover them. A field is present
/// or absent, never null.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: Vec<(String, FieldValue)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn of_kind(kind: PersonKind) -> Self {
        let mut record = Self::new();
        record.set("type", kind.as_str());
        record
    }

    /// Insert or replace. Fillers may add fields, never remove them.
    pub fn set(&mut self, name: &str, value: impl Into<FieldValue>) {
        let value = value.into();
        if let Some(slot) = self.fields.iter_mut().find(|(n, _)| n == name) {
            slot.1 = value;
        } else {
            self.fields.push((name.to_string(), value));
        }
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn get_text(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(FieldValue::as_text)
    }

    pub fn get_int(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(FieldValue::as_int)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.iter().any(|(n, _)| n == name)
    }

    /// Move a value under a new name. Used for loan bookkeeping
    /// (joined → loan_start etc.).
    pub fn rename(&mut self, from: &str, to: &str) {
        if let Some(pos) = self.fields.iter().position(|(n, _)| n == from) {
            let (_, value) = self.fields.remove(pos);
            self.set(to, value);
        }
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn kind(&self) -> Option<PersonKind> {
        match self.get_text("type") {
            Some("player") => Some(PersonKind::Player),
            Some("staff") => Some(PersonKind::Staff),
            _ => None,
        }
    }

    pub fn full_name(&self) -> String {
        format!(
            "{} {}",
            self.get_text("first_name").unwrap_or_default(),
            self.get_text("last_name").unwrap_or_default()
        )
        .trim()
        .to_string()
    }
}

// ── Result table ──────────────────────────────────────────────────────────────

/// Ordered rows from one scraping run. Concatenation is append-only: the same
/// person scraped twice yields two rows.
#[derive(Debug, Clone, Default)]
pub struct ResultTable {
    rows: Vec<Record>,
}

impl ResultTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(record: Record) -> Self {
        Self { rows: vec![record] }
    }

    pub fn push(&mut self, record: Record) {
        self.rows.push(record);
    }

    pub fn concat(&mut self, other: ResultTable) {
        self.rows.extend(other.rows);
    }

    pub fn rows(&self) -> &[Record] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Column set = union of all fields seen, in first-seen order.
    pub fn columns(&self) -> Vec<String> {
        let mut columns: Vec<String> = Vec::new();
        for row in &self.rows {
            for (name, _) in row.fields() {
                if !columns.iter().any(|c| c == name) {
                    columns.push(name.to_string());
                }
            }
        }
        columns
    }
}

impl FromIterator<ResultTable> for ResultTable {
    fn from_iter<I: IntoIterator<Item = ResultTable>>(iter: I) -> Self {
        let mut table = ResultTable::new();
        for part in iter {
            table.concat(part);
        }
        table
    }
}
