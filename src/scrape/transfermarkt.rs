//! transfermarkt.com site adapter (English edition).
//!
//! Division pages list teams in a grid view; team pages carry the squad table
//! and link to a separate staff listing; person pages come in two layouts
//! (player vs staff) told apart by the "Player data" heading. All fetches are
//! plain GETs. Player records are reconciled against fminside, staff records
//! against fmtransferupdate.

use super::{SiteScraper, resolve_guarded, sel};
use crate::config::AppConfig;
use crate::fill::{Filler, FmInsideFiller, FmTransferUpdateFiller};
use crate::models::{PersonKind, Record, ResultTable};
use crate::progress::ProgressSink;
use crate::transport::{FetchTarget, RetryPolicy, Transport, fetch_with_retry};
use crate::utils::{clean_text, normalize_date};
use async_trait::async_trait;
use futures::StreamExt;
use rand::Rng;
use scraper::{Element, ElementRef, Html};
use std::sync::Arc;
use url::Url;

const BASE_URL: &str = "https://www.transfermarkt.com";
const HOST: &str = "www.transfermarkt.com";

/// Source-language position labels → canonical codes.
fn position_code(label: &str) -> Option<&'static str> {
    Some(match label {
        "goalkeeper" => "goalkeeper",
        "centre-back" => "defender_central",
        "right-back" => "defender_right",
        "left-back" => "defender_left",
        "defensive midfield" => "defensive_midfielder",
        "central midfield" => "midfielder_central",
        "left midfield" => "midfielder_left",
        "right midfield" => "midfielder_right",
        "attacking midfield" => "attacking_midfielder_central",
        "left winger" => "attacking_midfielder_left",
        "right winger" => "attacking_midfielder_right",
        "centre-forward" => "striker",
        "second-striker" => "striker",
        _ => return None,
    })
}

/// Canonical staff vocabulary; free-form job text maps to its closest entry.
const STAFF_JOBS: &[&str] = &[
    "chairperson", "owner", "managing director", "director", "manager",
    "head of youth development", "assistant manager", "coach", "gk coach",
    "fitness coach", "set piece coach", "head performance analyst",
    "performance analyst", "director of football", "technical director",
    "chief scout", "scout", "recruitment analyst", "loan manager", "head physio",
    "physio", "head of sports science", "sports scientist", "chief doctor",
    "doctor", "manager reserve team", "manager third team", "manager u23 team",
    "assistant manager reserve team", "coach reserve team",
    "gk coach reserve team", "fitness coach reserve team",
    "performance analyst reserve team", "physio reserve team",
    "sports scientist reserve team", "doctor reserve team",
    "assistant manager u23 team", "coach u23 team", "gk coach u23 team",
    "fitness coach u23 team", "performance analyst u23 team", "physio u23 team",
    "sports scientist u23 team", "doctor u23 team", "manager u22 team",
    "assistant manager u22 team", "coach u22 team", "gk coach u22 team",
    "fitness coach u22 team", "performance analyst u22 team", "physio u22 team",
    "sports scientist u22 team", "doctor u22 team", "manager u21 team",
    "assistant manager u21 team", "coach u21 team", "gk coach u21 team",
    "fitness coach u21 team", "performance analyst u21 team", "physio u21 team",
    "sports scientist u21 team", "doctor u21 team", "manager u20 team",
    "assistant manager u20 team", "coach u20 team", "gk coach u20 team",
    "fitness coach u20 team", "performance analyst u20 team", "physio u20 team",
    "sports scientist u20 team", "doctor u20 team", "manager u19 team",
    "assistant manager u19 team", "coach u19 team", "gk coach u19 team",
    "fitness coach u19 team", "performance analyst u19 team", "physio u19 team",
    "sports scientist u19 team", "doctor u19 team", "manager u18 team",
    "assistant manager u18 team", "coach u18 team", "gk coach u18 team",
    "fitness coach u18 team", "performance analyst u18 team", "physio u18 team",
    "sports scientist u18 team", "doctor u18 team", "coach youth teams",
];

pub struct TransfermarktScraper {
    transport: Arc<dyn Transport>,
    retry: RetryPolicy,
    team_workers: usize,
    person_workers: usize,
    player_filler: FmInsideFiller,
    staff_filler: FmTransferUpdateFiller,
}

impl TransfermarktScraper {
    pub fn new(transport: Arc<dyn Transport>, config: &AppConfig) -> Self {
        let retry = RetryPolicy::from_config(&config.transport);
        Self {
            player_filler: FmInsideFiller::new(Arc::clone(&transport), retry.clone()),
            staff_filler: FmTransferUpdateFiller::new(Arc::clone(&transport), retry.clone()),
            team_workers: config.pool.team_workers(),
            person_workers: config.pool.person_workers,
            transport,
            retry,
        }
    }

    fn resolve(&self, url: &str) -> crate::error::Result<String> {
        resolve_guarded(url, BASE_URL, HOST)
    }

    async fn get(&self, url: String) -> String {
        fetch_with_retry(&*self.transport, &FetchTarget::get(url), &self.retry).await
    }

    /// Fan out person scrapes; a failing person contributes zero rows and the
    /// batch continues with its siblings.
    async fn extract_people(&self, urls: Vec<String>, progress: &ProgressSink) -> ResultTable {
        futures::stream::iter(urls)
            .map(|url| {
                let progress = progress.clone();
                async move {
                    match self.extract_person(&url, &progress).await {
                        Ok(table) => table,
                        Err(e) => {
                            progress.failure(&url, &e);
                            ResultTable::new()
                        }
                    }
                }
            })
            .buffer_unordered(self.person_workers.max(1))
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .collect()
    }
}

#[async_trait]
impl SiteScraper for TransfermarktScraper {
    async fn extract_division(
        &self,
        url: &str,
        progress: &ProgressSink,
    ) -> anyhow::Result<ResultTable> {
        let division_url = self.resolve(url)?;
        let body = self.get(division_url.clone()).await;
        let team_urls = parse_team_urls(&body);

        let table: ResultTable = futures::stream::iter(team_urls)
            .map(|team_url| {
                let progress = progress.clone();
                async move {
                    match self.extract_team(&team_url, &progress).await {
                        Ok(table) => table,
                        Err(e) => {
                            progress.failure(&team_url, &e);
                            ResultTable::new()
                        }
                    }
                }
            })
            .buffer_unordered(self.team_workers.max(1))
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .collect();

        progress.send(format!("\n{division_url} completed!"));
        Ok(table)
    }

    async fn extract_team(
        &self,
        url: &str,
        progress: &ProgressSink,
    ) -> anyhow::Result<ResultTable> {
        let team_url = self.resolve(url)?;
        let body = self.get(team_url.clone()).await;
        let club_name = parse_club_name(&body).unwrap_or_else(|| team_url.clone());
        let squad_urls = parse_squad_urls(&body);

        let mut table = self.extract_people(squad_urls, progress).await;

        if let Some((slug, club_id)) = team_identifiers(&team_url) {
            let staff_listing = self.resolve(&format!("{slug}/mitarbeiter/verein/{club_id}"))?;
            let staff_body = self.get(staff_listing).await;
            let staff_urls = parse_staff_urls(&staff_body);
            table.concat(self.extract_people(staff_urls, progress).await);
        }

        progress.send(format!("\n\n{club_name} completed!\n"));
        Ok(table)
    }

    async fn extract_person(
        &self,
        url: &str,
        progress: &ProgressSink,
    ) -> anyhow::Result<ResultTable> {
        let person_url = self.resolve(url)?;
        let body = self.get(person_url.clone()).await;

        let record = {
            let doc = Html::parse_document(&body);
            if is_player_page(&doc) {
                let mut rng = rand::rng();
                extract_player(&doc, &mut rng)
            } else {
                extract_staff(&doc)
            }
        };

        // A page that yielded no name is a soft failure: empty frame, keep going.
        if record.full_name().is_empty() {
            progress.send(format!("\nError on scraping this person {person_url}"));
            return Ok(ResultTable::new());
        }

        let record = match record.kind() {
            Some(PersonKind::Player) => self.player_filler.check_and_fill(record).await,
            _ => self.staff_filler.check_and_fill(record).await,
        };

        progress.send(format!(
            "\n{} ({}) completed!",
            record.full_name(),
            record.get_text("type").unwrap_or("person"),
        ));
        Ok(ResultTable::single(record))
    }
}

// ── Structural probes ─────────────────────────────────────────────────────────

fn text(el: ElementRef<'_>) -> String {
    clean_text(&el.text().collect::<String>())
}

fn parse_team_urls(html: &str) -> Vec<String> {
    let doc = Html::parse_document(html);
    let cell = sel("div.grid-view td.hauptlink.no-border-links");
    let anchor = sel("a");
    doc.select(&cell)
        .filter_map(|td| {
            td.select(&anchor)
                .next()
                .and_then(|a| a.value().attr("href"))
                .map(str::to_string)
        })
        .collect()
}

fn parse_club_name(html: &str) -> Option<String> {
    let doc = Html::parse_document(html);
    doc.select(&sel("h1.data-header__headline-wrapper"))
        .next()
        .map(|h1| h1.text().collect::<String>().trim().to_string())
        .filter(|name| !name.is_empty())
}

/// Squad rows: first anchor without a `title` attribute of each roster row.
fn parse_squad_urls(html: &str) -> Vec<String> {
    let doc = Html::parse_document(html);
    let row = sel("table.items > tbody > tr");
    let anchor = sel("a");
    doc.select(&row)
        .filter_map(|tr| {
            tr.select(&anchor)
                .find(|a| a.value().attr("title").is_none())
                .and_then(|a| a.value().attr("href"))
                .map(str::to_string)
        })
        .collect()
}

fn parse_staff_urls(html: &str) -> Vec<String> {
    let doc = Html::parse_document(html);
    let cell = sel("div.large-8.columns tbody td.hauptlink");
    let anchor = sel("a");
    doc.select(&cell)
        .filter_map(|td| {
            td.select(&anchor)
                .next()
                .and_then(|a| a.value().attr("href"))
                .map(str::to_string)
        })
        .collect()
}

fn is_player_page(doc: &Html) -> bool {
    doc.select(&sel("h2"))
        .any(|h2| text(h2).contains("player data"))
}

/// Club slug and numeric club id from a team URL,
/// e.g. `/juventus/startseite/verein/506` → (`juventus`, `506`).
fn team_identifiers(team_url: &str) -> Option<(String, String)> {
    let parsed = Url::parse(team_url).ok()?;
    let mut segments = parsed.path_segments()?.filter(|s| !s.is_empty());
    let slug = segments.next()?.to_string();
    let id: String = parsed
        .path()
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    if id.is_empty() {
        return None;
    }
    Some((slug, id))
}

/// `"1,87 m"` → 187
fn parse_height(raw: &str) -> Option<i64> {
    let meters: f64 = raw
        .split_whitespace()
        .next()?
        .replace(',', ".")
        .parse()
        .ok()?;
    Some((meters * 100.0).round() as i64)
}

fn best_staff_job(raw: &str) -> &'static str {
    STAFF_JOBS
        .iter()
        .copied()
        .max_by(|a, b| {
            strsim::normalized_levenshtein(raw, a)
                .total_cmp(&strsim::normalized_levenshtein(raw, b))
        })
        .unwrap_or("director")
}

// ── Player pages ──────────────────────────────────────────────────────────────

pub(crate) fn extract_player(doc: &Html, rng: &mut impl Rng) -> Record {
    let mut record = Record::of_kind(PersonKind::Player);
    record.set("entity", "Person");

    if let Some(h1) = doc.select(&sel("h1.data-header__headline-wrapper")).next() {
        let shirt = h1
            .select(&sel("span.data-header__shirt-number"))
            .next()
            .map(text)
            .unwrap_or_default();
        if !shirt.is_empty() {
            record.set("squad_number", shirt.trim_start_matches('#').to_string());
        }
        let name = text(h1).replace(&shirt, "").trim().to_string();
        if let Some(strong) = h1.select(&sel("strong")).next() {
            let last = text(strong);
            let first = name.split(last.as_str()).next().unwrap_or("").trim().to_string();
            if !first.is_empty() {
                record.set("first_name", first);
            }
            record.set("last_name", last);
        }
    }

    if let Some(birth) = doc.select(&sel("span[itemprop='birthDate']")).next() {
        let raw = text(birth);
        if let Some(dob) = normalize_date(raw.split('(').next().unwrap_or("")) {
            record.set("date_of_birth", dob);
        }
    }

    if let Some(height) = doc.select(&sel("span[itemprop='height']")).next() {
        if let Some(cm) = parse_height(&text(height)) {
            record.set("height", cm);
        }
    }

    extract_player_info(doc, &mut record);
    extract_positions(doc, &mut record, rng);
    record
}

/// The label/value span pairs of the player info table.
fn extract_player_info(doc: &Html, record: &mut Record) {
    let label_sel = sel("div.info-table span.info-table__content--regular");

    for label_el in doc.select(&label_sel) {
        let key = text(label_el);
        let key = key.trim_end_matches(':').trim();
        let Some(value_el) = label_el.next_sibling_element() else {
            continue;
        };
        let value = text(value_el);

        match key {
            "citizenship" => record.set("citizenship", value),
            "foot" => {
                if value == "left" || value == "both" {
                    record.set("left_foot", 20u8);
                }
                if value == "right" || value == "both" {
                    record.set("right_foot", 20u8);
                }
            }
            "current club" => {
                record.set("job", "player");
                extract_club(doc, record, value_el, value);
            }
            "joined" if value.len() > 1 => {
                if let Some(date) = normalize_date(&value) {
                    record.set("date_joined", date);
                }
            }
            "contract expires" if value.len() > 1 => {
                if let Some(date) = normalize_date(&value) {
                    record.set("contract_expires", date);
                }
            }
            _ => {}
        }
    }
}

/// Current club, with the on-loan special case: the lender becomes `club`,
/// the listed club becomes `loan_to`, and the joined/expiry dates move to the
/// loan_start/loan_end slots.
fn extract_club(doc: &Html, record: &mut Record, value_el: ElementRef<'_>, value: String) {
    let span = sel("div.info-table span");
    let loan_marker = doc.select(&span).find(|s| text(*s) == "on loan from");

    let Some(loan_marker) = loan_marker else {
        let club = value_el
            .select(&sel("a"))
            .last()
            .and_then(|a| a.value().attr("title"))
            .map(|t| clean_text(t))
            .filter(|t| !t.is_empty())
            .unwrap_or(value);
        record.set("club", club);
        return;
    };

    if let Some(lender) = loan_marker.next_sibling_element() {
        record.set("club", text(lender));
    }
    record.set("loan_to", value);
    record.rename("date_joined", "loan_start");
    record.rename("contract_expires", "loan_end");

    if let Some(expiry) = doc
        .select(&span)
        .find(|s| text(*s) == "contract there expires")
        .and_then(|s| s.next_sibling_element())
    {
        if let Some(date) = normalize_date(&text(expiry)) {
            record.set("contract_expires", date);
        }
    }
}

/// Main position scores a fixed 20; other positions get a randomised 10–20
/// placeholder for unknown secondary-skill strength.
fn extract_positions(doc: &Html, record: &mut Record, rng: &mut impl Rng) {
    let group = sel("div.detail-position dl");
    let dt = sel("dt");
    let dd = sel("dd");

    for dl in doc.select(&group) {
        let Some(label) = dl.select(&dt).next().map(text) else {
            continue;
        };
        let is_main = label.starts_with("main position");
        if !is_main && !label.starts_with("other position") {
            continue;
        }
        for entry in dl.select(&dd) {
            if let Some(code) = position_code(&text(entry)) {
                let score: u8 = if is_main { 20 } else { rng.random_range(10..=20) };
                record.set(code, score);
            }
        }
    }
}

// ── Staff pages ───────────────────────────────────────────────────────────────

pub(crate) fn extract_staff(doc: &Html) -> Record {
    let mut record = Record::of_kind(PersonKind::Staff);

    if let Some(header) = doc.select(&sel("div.data-header__headline-container")).next() {
        let full = text(header);
        if let Some(strong) = header.select(&sel("strong")).next() {
            let last = text(strong);
            let first = full.split(last.as_str()).next().unwrap_or("").trim().to_string();
            if !first.is_empty() {
                record.set("first_name", first);
            }
            record.set("last_name", last);
        }
    }

    if let Some(club_span) = doc.select(&sel("span[itemprop='affiliation']")).next() {
        let club = club_span
            .select(&sel("a"))
            .last()
            .and_then(|a| a.value().attr("title"))
            .map(clean_text)
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| text(club_span));
        record.set("club", club);

        let mut job_raw = club_span.next_sibling_element().map(text).unwrap_or_default();
        if job_raw.contains("last position") {
            job_raw = doc
                .select(&sel("span.dataValue"))
                .next()
                .map(text)
                .unwrap_or_default();
        }
        if !job_raw.is_empty() {
            record.set("job", best_staff_job(&job_raw));
        }
    }

    for row in doc.select(&sel("table.auflistung tr")) {
        let key = row.select(&sel("th")).next().map(text).unwrap_or_default();
        let value = row.select(&sel("td")).next().map(text).unwrap_or_default();
        if key == "citizenship" {
            record.set("citizenship", value);
        } else if key.contains("date of birth") {
            if let Some(dob) = normalize_date(value.split('(').next().unwrap_or("")) {
                record.set("date_of_birth", dob);
            }
        }
    }

    record
}
