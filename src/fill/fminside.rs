//! fminside.net filler (players).
//!
//! The search page is a rendered form, so the candidate query goes through the
//! browser-driven filter fetch. Candidate detail pages are plain HTML.

use super::{Filler, sel};
use crate::models::Record;
use crate::transport::{FetchTarget, RetryPolicy, Transport, fetch_with_retry};
use crate::utils::{clean_text, safe_equals, years_from_today};
use async_trait::async_trait;
use scraper::Html;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;
use url::Url;

const BASE_URL: &str = "https://fminside.net/players";
const NAME_FIELD_SELECTOR: &str = "[placeholder=Name]";
/// Loose cut on the search listing, strict on the detail page.
const LIST_THRESHOLD: f64 = 0.80;
const DETAIL_THRESHOLD: f64 = 0.90;

pub struct FmInsideFiller {
    transport: Arc<dyn Transport>,
    retry: RetryPolicy,
}

impl FmInsideFiller {
    pub fn new(transport: Arc<dyn Transport>, retry: RetryPolicy) -> Self {
        Self { transport, retry }
    }

    async fn fetch(&self, target: FetchTarget) -> String {
        fetch_with_retry(&*self.transport, &target, &self.retry).await
    }
}

#[async_trait]
impl Filler for FmInsideFiller {
    async fn check_and_fill(&self, mut record: Record) -> Record {
        let full_name = clean_text(&record.full_name());
        if full_name.is_empty() {
            return record;
        }

        let fields = BTreeMap::from([(NAME_FIELD_SELECTOR.to_string(), full_name.clone())]);
        let listing = self.fetch(FetchTarget::filter(BASE_URL, fields)).await;

        for href in parse_candidates(&listing, &full_name) {
            let Some(detail_url) = absolute(&href) else {
                continue;
            };
            let body = self.fetch(FetchTarget::get(detail_url)).await;
            let Some(detail) = parse_detail(&body) else {
                continue;
            };
            if accept(&record, &full_name, &detail) {
                debug!("fminside match for {}: {}", full_name, detail.unique_id);
                record.set("db_unique_id", detail.unique_id);
                break;
            }
        }
        record
    }
}

fn absolute(href: &str) -> Option<String> {
    Url::parse(BASE_URL)
        .ok()?
        .join(href)
        .map(String::from)
        .ok()
}

/// Candidate detail URLs from the filtered search listing.
fn parse_candidates(html: &str, full_name: &str) -> Vec<String> {
    let doc = Html::parse_document(html);
    let bold = sel("div#player_table b");
    let anchor = sel("a");

    doc.select(&bold)
        .filter(|b| {
            let text: String = b.text().collect();
            safe_equals(&text, full_name, LIST_THRESHOLD)
        })
        .filter_map(|b| {
            b.select(&anchor)
                .next()
                .and_then(|a| a.value().attr("href"))
                .map(str::to_string)
        })
        .collect()
}

struct PlayerDetail {
    name: String,
    age: Option<i64>,
    unique_id: String,
}

/// Pull the labelled name/age/unique-id triple out of the player info column.
fn parse_detail(html: &str) -> Option<PlayerDetail> {
    let doc = Html::parse_document(html);
    let item = sel("div#player div.column li");
    let span = sel("span");
    let value = sel("span[value]");

    let mut name = None;
    let mut age = None;
    let mut unique_id = None;

    for li in doc.select(&item) {
        let label: String = li
            .select(&span)
            .next()
            .map(|s| clean_text(&s.text().collect::<String>()))
            .unwrap_or_default();
        let Some(field) = li.select(&value).next() else {
            continue;
        };
        let field = clean_text(&field.text().collect::<String>());
        match label.as_str() {
            "name" => name = Some(field),
            "age" => age = field.parse().ok(),
            "unique id" => unique_id = Some(field),
            _ => {}
        }
    }

    Some(PlayerDetail {
        name: name?,
        age,
        unique_id: unique_id?,
    })
}

/// All-of match: name similarity above the strict threshold AND the page's age
/// equals the record's age in whole years. A record without a birth date can
/// never be confirmed here.
fn accept(record: &Record, full_name: &str, detail: &PlayerDetail) -> bool {
    if !safe_equals(&detail.name, full_name, DETAIL_THRESHOLD) {
        return false;
    }
    let (Some(page_age), Some(dob)) = (detail.age, record.get_text("date_of_birth")) else {
        return false;
    };
    years_from_today(dob) == Some(page_age)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PersonKind;
    use crate::transport::PageResponse;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct MapTransport {
        pages: HashMap<String, String>,
        seen: Mutex<Vec<String>>,
    }

    impl MapTransport {
        fn new(pages: &[(&str, &str)]) -> Self {
            Self {
                pages: pages
                    .iter()
                    .map(|(u, b)| (u.to_string(), b.to_string()))
                    .collect(),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Transport for MapTransport {
        async fn dispatch(&self, target: &FetchTarget) -> PageResponse {
            self.seen.lock().unwrap().push(target.url.clone());
            PageResponse::ok(self.pages.get(&target.url).cloned().unwrap_or_default())
        }
    }

    fn retry() -> RetryPolicy {
        RetryPolicy {
            max_retries: 1,
            max_wait_secs: 0,
        }
    }

    fn listing(name: &str) -> String {
        format!(
            r#"<div id="player_table"><b><a href="/player/1234/x">{name}</a></b></div>"#
        )
    }

    fn detail(name: &str, age: i64) -> String {
        format!(
            r#"<div id="player"><div class="column"><ul>
            <li><span>Name</span><span value="1">{name}</span></li>
            <li><span>Age</span><span value="1">{age}</span></li>
            <li><span>Unique ID</span><span value="1">998877</span></li>
            </ul></div></div>"#
        )
    }

    fn player_record(dob: Option<&str>) -> Record {
        let mut record = Record::of_kind(PersonKind::Player);
        record.set("first_name", "mario");
        record.set("last_name", "rossi");
        if let Some(dob) = dob {
            record.set("date_of_birth", dob);
        }
        record
    }

    #[tokio::test]
    async fn test_matching_candidate_yields_unique_id() {
        let age = years_from_today("01/02/2000").unwrap();
        let transport = Arc::new(MapTransport::new(&[
            (BASE_URL, &listing("Mario Rossi")),
            ("https://fminside.net/player/1234/x", &detail("Mario Rossi", age)),
        ]));
        let filler = FmInsideFiller::new(transport, retry());

        let record = filler.check_and_fill(player_record(Some("01/02/2000"))).await;
        assert_eq!(record.get_text("db_unique_id"), Some("998877"));
    }

    #[tokio::test]
    async fn test_age_mismatch_leaves_record_unchanged() {
        let wrong_age = years_from_today("01/02/2000").unwrap() + 3;
        let transport = Arc::new(MapTransport::new(&[
            (BASE_URL, &listing("Mario Rossi")),
            (
                "https://fminside.net/player/1234/x",
                &detail("Mario Rossi", wrong_age),
            ),
        ]));
        let filler = FmInsideFiller::new(transport, retry());

        let record = filler.check_and_fill(player_record(Some("01/02/2000"))).await;
        assert!(!record.contains("db_unique_id"));
    }

    #[tokio::test]
    async fn test_record_without_birth_date_never_matches() {
        let transport = Arc::new(MapTransport::new(&[
            (BASE_URL, &listing("Mario Rossi")),
            ("https://fminside.net/player/1234/x", &detail("Mario Rossi", 24)),
        ]));
        let filler = FmInsideFiller::new(transport, retry());

        let record = filler.check_and_fill(player_record(None)).await;
        assert!(!record.contains("db_unique_id"));
    }

    #[tokio::test]
    async fn test_dissimilar_listing_names_are_not_fetched() {
        let transport = Arc::new(MapTransport::new(&[(
            BASE_URL,
            &listing("Zlatan Ibrahimovic"),
        )]));
        let filler = FmInsideFiller::new(Arc::clone(&transport) as Arc<dyn Transport>, retry());

        let record = filler.check_and_fill(player_record(Some("01/02/2000"))).await;
        assert!(!record.contains("db_unique_id"));
        // Only the listing query went out; no detail page was fetched.
        assert_eq!(transport.seen.lock().unwrap().len(), 1);
    }
}
