//! fmtransferupdate.com filler (staff, and players reached by URL typology).
//!
//! Both the filtered listing and the detail pages are JS-rendered, so every
//! fetch here is session-emulated. The birth-date check is intentionally a
//! raw string comparison, not a calendar comparison: `"01/02/2000"` and
//! `"1/2/2000"` do not match. Documented contract, covered by tests.

use super::{Filler, sel};
use crate::models::{PersonKind, Record};
use crate::transport::{FetchTarget, RetryPolicy, Transport, fetch_with_retry};
use crate::utils::{clean_text, normalize_date, safe_equals, similarity};
use async_trait::async_trait;
use scraper::Html;
use std::sync::Arc;
use tracing::debug;

const BASE_URL: &str = "https://fmtransferupdate.com/";
const LIST_THRESHOLD: f64 = 0.85;
const DETAIL_THRESHOLD: f64 = 0.92;

pub struct FmTransferUpdateFiller {
    transport: Arc<dyn Transport>,
    retry: RetryPolicy,
}

impl FmTransferUpdateFiller {
    pub fn new(transport: Arc<dyn Transport>, retry: RetryPolicy) -> Self {
        Self { transport, retry }
    }

    async fn fetch(&self, url: String) -> String {
        fetch_with_retry(&*self.transport, &FetchTarget::session_get(url), &self.retry).await
    }

    fn listing_url(record: &Record) -> String {
        let typology = match record.kind() {
            Some(PersonKind::Player) => "players",
            _ => "staff",
        };
        let query = clean_text(&record.full_name()).replace(' ', "+");
        format!("{BASE_URL}{typology}?filter_name={query}")
    }
}

#[async_trait]
impl Filler for FmTransferUpdateFiller {
    async fn check_and_fill(&self, mut record: Record) -> Record {
        let full_name = clean_text(&record.full_name());
        if full_name.is_empty() {
            return record;
        }

        let listing = self.fetch(Self::listing_url(&record)).await;

        for url in parse_candidates(&listing, &full_name) {
            let body = self.fetch(url.clone()).await;
            let Some(detail) = parse_detail(&body) else {
                continue;
            };
            if merge_if_match(&mut record, &full_name, &url, &detail) {
                debug!("fmtransferupdate match for {} at {}", full_name, url);
                break;
            }
        }
        record
    }
}

/// Candidate detail URLs: anchors in the content pane whose text is close
/// enough to the person's display name and that point at a person page.
fn parse_candidates(html: &str, full_name: &str) -> Vec<String> {
    let doc = Html::parse_document(html);
    let anchor = sel("#fmtu-content-pane a");

    doc.select(&anchor)
        .filter_map(|a| {
            let href = a.value().attr("href")?;
            if !href.contains("players") && !href.contains("staff") {
                return None;
            }
            let text: String = a.text().collect();
            (similarity(&text, full_name) > LIST_THRESHOLD).then(|| href.to_string())
        })
        .collect()
}

struct PersonDetail {
    name: Option<String>,
    birth_date_raw: Option<String>,
    citizenship: String,
    job: Option<String>,
}

fn parse_detail(html: &str) -> Option<PersonDetail> {
    let doc = Html::parse_document(html);
    let root = doc.select(&sel("div[itemscope]")).next()?;

    let text_of = |css: &'static str| -> Option<String> {
        root.select(&sel(css))
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string())
    };

    let citizenship = root
        .select(&sel("a[href*='nation'] img"))
        .next()
        .and_then(|img| img.value().attr("alt"))
        .map(|alt| alt.to_lowercase())
        .unwrap_or_default();

    Some(PersonDetail {
        name: text_of("[itemprop='name']"),
        birth_date_raw: text_of("[itemprop='birthDate']"),
        citizenship,
        job: text_of("span[itemprop='knowsAbout']").map(|j| j.to_lowercase()),
    })
}

/// External id is the leading numeric chunk of the URL's last path segment,
/// e.g. `/staff/48151-jane-doe` → `48151`.
fn unique_id_from_url(url: &str) -> String {
    url.rsplit('/')
        .next()
        .unwrap_or_default()
        .split('-')
        .next()
        .unwrap_or_default()
        .to_string()
}

/// All-of match and merge. Returns true when the candidate was accepted.
fn merge_if_match(record: &mut Record, full_name: &str, url: &str, detail: &PersonDetail) -> bool {
    let Some(name) = &detail.name else {
        return false;
    };
    if !safe_equals(name, full_name, DETAIL_THRESHOLD) {
        return false;
    }

    match (&detail.birth_date_raw, record.get_text("date_of_birth")) {
        // Lexical comparison on purpose; see module docs.
        (Some(raw), Some(existing)) => {
            if raw != existing {
                return false;
            }
        }
        // The record lacked a birth date: adopt the candidate's.
        (Some(raw), None) => {
            if let Some(normalised) = normalize_date(raw) {
                record.set("date_of_birth", normalised);
            }
        }
        // Candidate page shows no birth date: nothing to disagree with.
        (None, _) => {}
    }

    record.set("db_unique_id", unique_id_from_url(url));
    record.set("citizenship", detail.citizenship.clone());
    if record.kind() == Some(PersonKind::Staff) {
        if let Some(job) = &detail.job {
            let job = if job == "assistant manager" {
                format!("{job} first team")
            } else {
                job.clone()
            };
            record.set("job", job);
        }
    }
    true
}
