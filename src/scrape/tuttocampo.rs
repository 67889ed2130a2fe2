//! tuttocampo.it site adapter (Italian amateur leagues).
//!
//! The site renders its data tables behind a consent/anti-bot layer, so every
//! fetch goes through a throwaway browser session, and person pages are
//! re-fetched until the data table actually shows up. Team pages are reached
//! through URL section swaps (Scheda → Rosa/Staff). Labels are Italian and go
//! through fixed vocabulary tables.

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
use rand::seq::IndexedRandom;
use scraper::{ElementRef, Html};
use std::sync::Arc;

const BASE_URL: &str = "https://www.tuttocampo.it";
const HOST: &str = "www.tuttocampo.it";

/// Person pages sometimes come back without the data table (the anti-bot
/// layer serves a shell first); re-fetch up to this many times.
const TABLE_RETRIES: u32 = 10;

fn position_codes(label: &str) -> &'static [&'static str] {
    match label {
        "portiere" => &["goalkeeper"],
        "difensore" => &["defender_left", "defender_central", "defender_right"],
        "centrocampista" => &[
            "defensive_midfielder",
            "wing_back_left",
            "wing_back_right",
            "midfielder_left",
            "midfielder_central",
            "midfielder_right",
        ],
        "attaccante" => &[
            "attacking_midfielder_left",
            "attacking_midfielder_central",
            "attacking_midfielder_right",
            "striker",
        ],
        _ => &[],
    }
}

fn staff_job(label: &str) -> &'static str {
    match label {
        "presidente" => "chairperson",
        "proprietario" => "owner",
        "vice presidente" => "director",
        "allenatore" => "manager first team",
        "direttore sportivo" => "director of football",
        "preparatore portieri" => "gk coach first team",
        "preparatore atletico" => "fitness coach first team",
        "dirigente" => "director",
        "fisioterapista" => "physio first team",
        _ => "director",
    }
}

pub struct TuttocampoScraper {
    transport: Arc<dyn Transport>,
    retry: RetryPolicy,
    team_workers: usize,
    person_workers: usize,
    player_filler: FmInsideFiller,
    staff_filler: FmTransferUpdateFiller,
}

impl TuttocampoScraper {
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
        fetch_with_retry(&*self.transport, &FetchTarget::session_get(url), &self.retry).await
    }

    /// Re-fetch until the page carries its data table, bounded by
    /// [`TABLE_RETRIES`]. Returns the last body either way.
    async fn get_person_page(&self, url: &str) -> String {
        let mut body = String::new();
        for _ in 0..TABLE_RETRIES {
            body = self.get(url.to_string()).await;
            let has_table = {
                let doc = Html::parse_document(&body);
                doc.select(&sel("table.tc-table-slim")).next().is_some()
            };
            if has_table {
                break;
            }
        }
        body
    }

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
impl SiteScraper for TuttocampoScraper {
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

        let roster_url = section_url(&team_url, "Rosa");
        let roster_body = self.get(roster_url).await;
        let club_name = parse_club_name(&roster_body).unwrap_or_else(|| team_url.clone());
        let squad_urls = parse_squad_urls(&roster_body);

        let staff_body = self.get(section_url(&team_url, "Staff")).await;
        let staff_urls = parse_staff_urls(&staff_body);

        let mut table = self.extract_people(staff_urls, progress).await;
        table.concat(self.extract_people(squad_urls, progress).await);

        progress.send(format!("\n\n{club_name} completed!\n"));
        Ok(table)
    }

    async fn extract_person(
        &self,
        url: &str,
        progress: &ProgressSink,
    ) -> anyhow::Result<ResultTable> {
        let person_url = self.resolve(url)?;
        let body = self.get_person_page(&person_url).await;

        let record = {
            let doc = Html::parse_document(&body);
            if person_url.to_lowercase().contains("giocatore") {
                let mut rng = rand::rng();
                extract_player(&doc, &mut rng)
            } else {
                extract_staff(&doc)
            }
        };

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

// ── URL plumbing ──────────────────────────────────────────────────────────────

/// Swap or append the section segment of a team URL:
/// `/X/Scheda` → `/X/Rosa`, `/X` → `/X/Rosa`, `/X/Rosa` stays put.
fn section_url(team_url: &str, section: &str) -> String {
    if team_url.contains("Scheda") {
        team_url.replace("Scheda", section)
    } else if team_url.contains(section) {
        team_url.to_string()
    } else if team_url.ends_with('/') {
        format!("{team_url}{section}")
    } else {
        format!("{team_url}/{section}")
    }
}

// ── Structural probes ─────────────────────────────────────────────────────────

fn text(el: ElementRef<'_>) -> String {
    clean_text(&el.text().collect::<String>())
}

fn parse_team_urls(html: &str) -> Vec<String> {
    let doc = Html::parse_document(html);
    let cell = sel("div#last_match_ranking td.team");
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
    doc.select(&sel("h1.team[itemprop='name']"))
        .next()
        .map(|h1| h1.text().collect::<String>().trim().to_string())
        .filter(|name| !name.is_empty())
}

fn parse_squad_urls(html: &str) -> Vec<String> {
    let doc = Html::parse_document(html);
    let cell = sel("table.tc-table tbody tr td.player");
    let anchor = sel("a");
    doc.select(&cell)
        .filter_map(|td| {
            td.select(&anchor)
                .find(|a| !text(*a).is_empty())
                .and_then(|a| a.value().attr("href"))
                .map(str::to_string)
        })
        .collect()
}

/// Staff rows keep the person link in their last cell.
fn parse_staff_urls(html: &str) -> Vec<String> {
    let doc = Html::parse_document(html);
    let row = sel("div#team_staff tbody tr");
    let cell = sel("td");
    let anchor = sel("a");
    doc.select(&row)
        .filter_map(|tr| {
            tr.select(&cell)
                .last()?
                .select(&anchor)
                .find(|a| !text(*a).is_empty())
                .and_then(|a| a.value().attr("href"))
                .map(str::to_string)
        })
        .collect()
}

fn extract_club(doc: &Html) -> Option<String> {
    doc.select(&sel("a[itemprop='affiliation']"))
        .next()
        .map(text)
        .filter(|club| !club.is_empty())
}

/// Label/value pairs of the slim data table, label cleaned for matching.
fn data_rows(doc: &Html) -> Vec<(String, String)> {
    let row = sel("table.tc-table-slim tr");
    let cell = sel("td");
    doc.select(&row)
        .filter_map(|tr| {
            let mut cells = tr.select(&cell);
            let label = text(cells.next()?);
            let value = text(cells.next()?);
            Some((label, value))
        })
        .collect()
}

fn parse_measure(value: &str, unit: &str) -> Option<i64> {
    if !value.contains(unit) {
        return None;
    }
    value.split_whitespace().next()?.parse().ok()
}

// ── Player pages ──────────────────────────────────────────────────────────────

pub(crate) fn extract_player(doc: &Html, rng: &mut impl Rng) -> Record {
    let mut record = Record::of_kind(PersonKind::Player);
    record.set("entity", "Person");
    record.set("job", "player");
    if let Some(club) = extract_club(doc) {
        record.set("club", club);
    }

    for (label, value) in data_rows(doc) {
        match label.as_str() {
            "cognome" => record.set("last_name", value),
            "nome" => record.set("first_name", value),
            "numero di maglia" => record.set("squad_number", value),
            "peso" => {
                if let Some(kg) = parse_measure(&value, "kg") {
                    record.set("weight", kg);
                }
            }
            "altezza" => {
                if let Some(cm) = parse_measure(&value, "cm") {
                    record.set("height", cm);
                }
            }
            "data di nascita" => {
                if let Some(dob) = normalize_date(&value) {
                    record.set("date_of_birth", dob);
                }
            }
            "piede" => {
                if value == "sinistro" || value == "ambidestro" {
                    record.set("left_foot", 20u8);
                }
                if value == "destro" || value == "ambidestro" {
                    record.set("right_foot", 20u8);
                }
            }
            "ruolo" => assign_positions(&mut record, &value, rng),
            _ => {}
        }
    }

    record
}

/// The source gives a single coarse role; pick a random subset of the
/// matching canonical codes, the first as the primary position (fixed 20),
/// the rest randomised 10–20.
fn assign_positions(record: &mut Record, label: &str, rng: &mut impl Rng) {
    let codes = position_codes(label);
    if codes.is_empty() {
        return;
    }
    if let [only] = codes {
        record.set(only, 20u8);
        return;
    }
    let picks = rng.random_range(1..=codes.len());
    for (i, code) in codes.choose_multiple(rng, picks).enumerate() {
        let score: u8 = if i == 0 { 20 } else { rng.random_range(10..=20) };
        record.set(code, score);
    }
}

// ── Staff pages ───────────────────────────────────────────────────────────────

pub(crate) fn extract_staff(doc: &Html) -> Record {
    let mut record = Record::of_kind(PersonKind::Staff);
    record.set("entity", "Person");
    if let Some(club) = extract_club(doc) {
        record.set("club", club);
    }

    for (label, value) in data_rows(doc) {
        match label.as_str() {
            "cognome" => record.set("last_name", value),
            "nome" => record.set("first_name", value),
            "numero di maglia" => record.set("squad_number", value),
            "data di nascita" => {
                if let Some(dob) = normalize_date(&value) {
                    record.set("date_of_birth", dob);
                }
            }
            _ => {}
        }
    }

    // Role span first; anyone but the head coach gets refined by the last
    // heading of the roles block.
    let mut job = "dirigente".to_string();
    if let Some(role) = doc.select(&sel("span[itemprop='role']")).next() {
        job = text(role);
        if job != "allenatore" {
            if let Some(refined) = doc.select(&sel("div.data.roles h3")).last() {
                job = text(refined);
            }
        }
    }
    record.set("job", staff_job(&job));

    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::PageResponse;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::collections::HashMap;
    use std::sync::Mutex;

    const PLAYER_PAGE: &str = r#"
    <a itemprop="affiliation" href="/squadra">AC Stub</a>
    <table class="tc-table-slim">
      <tr><td>Cognome</td><td>Rossi</td></tr>
      <tr><td>Nome</td><td>Mario</td></tr>
      <tr><td>Numero di maglia</td><td>10</td></tr>
      <tr><td>Data di nascita</td><td>01-02-2000</td></tr>
      <tr><td>Altezza</td><td>185 cm</td></tr>
      <tr><td>Peso</td><td>80 kg</td></tr>
      <tr><td>Piede</td><td>Destro</td></tr>
      <tr><td>Ruolo</td><td>Portiere</td></tr>
    </table>
    "#;

    const STAFF_PAGE: &str = r#"
    <a itemprop="affiliation" href="/squadra">AC Stub</a>
    <span itemprop="role">Allenatore</span>
    <table class="tc-table-slim">
      <tr><td>Cognome</td><td>Bianchi</td></tr>
      <tr><td>Nome</td><td>Carlo</td></tr>
    </table>
    "#;

    #[test]
    fn test_section_url_transforms() {
        assert_eq!(section_url("https://x/Club/Scheda", "Rosa"), "https://x/Club/Rosa");
        assert_eq!(section_url("https://x/Club", "Staff"), "https://x/Club/Staff");
        assert_eq!(section_url("https://x/Club/", "Staff"), "https://x/Club/Staff");
        assert_eq!(section_url("https://x/Club/Rosa", "Rosa"), "https://x/Club/Rosa");
    }

    #[test]
    fn test_extract_player_fields() {
        let doc = Html::parse_document(PLAYER_PAGE);
        let mut rng = StdRng::seed_from_u64(3);
        let record = extract_player(&doc, &mut rng);

        assert_eq!(record.get_text("type"), Some("player"));
        assert_eq!(record.get_text("club"), Some("ac stub"));
        assert_eq!(record.get_text("first_name"), Some("mario"));
        assert_eq!(record.get_text("last_name"), Some("rossi"));
        assert_eq!(record.get_text("squad_number"), Some("10"));
        assert_eq!(record.get_text("date_of_birth"), Some("01/02/2000"));
        assert_eq!(record.get_int("height"), Some(185));
        assert_eq!(record.get_int("weight"), Some(80));
        assert_eq!(record.get_int("right_foot"), Some(20));
        assert!(!record.contains("left_foot"));
        assert_eq!(record.get_int("goalkeeper"), Some(20));
    }

    #[test]
    fn test_coarse_role_maps_to_sampled_canonical_positions() {
        let attacker = PLAYER_PAGE.replace("Portiere", "Attaccante");
        let doc = Html::parse_document(&attacker);
        let mut rng = StdRng::seed_from_u64(11);
        let record = extract_player(&doc, &mut rng);

        let codes = position_codes("attaccante");
        let set: Vec<_> = codes
            .iter()
            .filter_map(|c| record.get_int(c).map(|s| (*c, s)))
            .collect();
        assert!(!set.is_empty());
        assert!(set.iter().any(|(_, s)| *s == 20));
        assert!(set.iter().all(|(_, s)| (10..=20).contains(s)));
        assert!(!record.contains("goalkeeper"));
    }

    #[test]
    fn test_extract_staff_head_coach() {
        let doc = Html::parse_document(STAFF_PAGE);
        let record = extract_staff(&doc);

        assert_eq!(record.get_text("type"), Some("staff"));
        assert_eq!(record.get_text("first_name"), Some("carlo"));
        assert_eq!(record.get_text("last_name"), Some("bianchi"));
        assert_eq!(record.get_text("job"), Some("manager first team"));
    }

    #[test]
    fn test_staff_role_refined_by_roles_block() {
        let page = STAFF_PAGE.replace(
            r#"<span itemprop="role">Allenatore</span>"#,
            r#"<span itemprop="role">Staff</span>
               <div class="data roles"><h3>Vice</h3><h3>Preparatore Portieri</h3></div>"#,
        );
        let doc = Html::parse_document(&page);
        assert_eq!(extract_staff(&doc).get_text("job"), Some("gk coach first team"));
    }

    #[test]
    fn test_unknown_staff_role_defaults_to_director() {
        let page = STAFF_PAGE.replace("Allenatore", "Magazziniere");
        let doc = Html::parse_document(&page);
        assert_eq!(extract_staff(&doc).get_text("job"), Some("director"));
    }

    // ── Orchestration ────────────────────────────────────────────────────────

    struct MapTransport {
        pages: HashMap<String, String>,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Transport for MapTransport {
        async fn dispatch(&self, target: &FetchTarget) -> PageResponse {
            self.seen.lock().unwrap().push(target.url.clone());
            PageResponse::ok(self.pages.get(&target.url).cloned().unwrap_or_default())
        }
    }

    fn scraper(pages: &[(&str, String)]) -> (TuttocampoScraper, Arc<MapTransport>) {
        let transport = Arc::new(MapTransport {
            pages: pages
                .iter()
                .map(|(u, b)| (u.to_string(), b.clone()))
                .collect(),
            seen: Mutex::new(Vec::new()),
        });
        (
            TuttocampoScraper::new(transport.clone(), &AppConfig::default()),
            transport,
        )
    }

    #[tokio::test]
    async fn test_person_page_refetched_until_table_appears() {
        // Page never carries the table: exactly TABLE_RETRIES fetches, no row.
        let (scraper, transport) = scraper(&[(
            "https://www.tuttocampo.it/Giocatore/123/mario-rossi",
            "<html><body>loading...</body></html>".to_string(),
        )]);

        let table = scraper
            .extract_person(
                "https://www.tuttocampo.it/Giocatore/123/mario-rossi",
                &ProgressSink::disabled(),
            )
            .await
            .unwrap();

        assert!(table.is_empty());
        assert_eq!(transport.seen.lock().unwrap().len(), TABLE_RETRIES as usize);
    }

    #[tokio::test]
    async fn test_team_end_to_end() {
        let roster = r#"<h1 class="team" itemprop="name">AC Stub</h1>
            <table class="tc-table"><tbody>
            <tr><td class="player"><a href="/Giocatore/1/mario-rossi">Mario Rossi</a></td></tr>
            </tbody></table>"#
            .to_string();
        let staff = r#"<div id="team_staff"><table><tbody>
            <tr><td>Allenatore</td><td><a href="/Persona/2/carlo-bianchi">Carlo Bianchi</a></td></tr>
            </tbody></table></div>"#
            .to_string();

        let (scraper, _transport) = scraper(&[
            ("https://www.tuttocampo.it/Club/Rosa", roster),
            ("https://www.tuttocampo.it/Club/Staff", staff),
            (
                "https://www.tuttocampo.it/Giocatore/1/mario-rossi",
                PLAYER_PAGE.to_string(),
            ),
            (
                "https://www.tuttocampo.it/Persona/2/carlo-bianchi",
                STAFF_PAGE.to_string(),
            ),
        ]);

        let table = scraper
            .extract_team(
                "https://www.tuttocampo.it/Club/Scheda",
                &ProgressSink::disabled(),
            )
            .await
            .unwrap();

        assert_eq!(table.len(), 2);
        let kinds: Vec<_> = table
            .rows()
            .iter()
            .filter_map(|r| r.get_text("type"))
            .collect();
        assert!(kinds.contains(&"player"));
        assert!(kinds.contains(&"staff"));
    }

    #[tokio::test]
    async fn test_domain_guard_rejects_foreign_urls() {
        let (scraper, transport) = scraper(&[]);
        let err = scraper
            .extract_person("https://www.transfermarkt.com/x", &ProgressSink::disabled())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("wrong site"));
        assert!(transport.seen.lock().unwrap().is_empty());
    }
}
