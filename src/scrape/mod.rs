//! Site orchestrators: walk division → team → person, fan the fetches out and
//! aggregate per-person records into one table.

pub mod transfermarkt;
pub mod tuttocampo;

pub use transfermarkt::TransfermarktScraper;
pub use tuttocampo::TuttocampoScraper;

use crate::error::ScrapeError;
use crate::models::ResultTable;
use crate::progress::ProgressSink;
use async_trait::async_trait;
use url::Url;

/// Swappable site abstraction. Every entry point resolves and domain-checks
/// its URL before any network call and reports per-unit progress on the sink.
#[async_trait]
pub trait SiteScraper: Send + Sync {
    /// Squads and staff of every team of the division.
    async fn extract_division(
        &self,
        url: &str,
        progress: &ProgressSink,
    ) -> anyhow::Result<ResultTable>;

    /// Players and staff of one team.
    async fn extract_team(&self, url: &str, progress: &ProgressSink)
    -> anyhow::Result<ResultTable>;

    /// One person; single-row table.
    async fn extract_person(
        &self,
        url: &str,
        progress: &ProgressSink,
    ) -> anyhow::Result<ResultTable>;
}

/// Resolve a possibly relative URL against the source's base and fail fast
/// when the host is not the expected one. The guard runs before any fetch.
pub(crate) fn resolve_guarded(
    raw: &str,
    base: &str,
    expected_host: &str,
) -> Result<String, ScrapeError> {
    let parsed = if raw.starts_with("http") {
        Url::parse(raw)
    } else {
        Url::parse(base).and_then(|b| b.join(raw))
    }
    .map_err(|source| ScrapeError::InvalidUrl {
        url: raw.to_string(),
        source,
    })?;

    let host = parsed.host_str().unwrap_or_default();
    if host != expected_host {
        return Err(ScrapeError::DomainMismatch {
            expected: expected_host.to_string(),
            got: host.to_string(),
        });
    }
    Ok(parsed.into())
}

/// Static selector literals are part of the source's structural contract.
pub(crate) fn sel(css: &'static str) -> scraper::Selector {
    scraper::Selector::parse(css).expect("static selector")
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://www.transfermarkt.com";
    const HOST: &str = "www.transfermarkt.com";

    #[test]
    fn test_relative_urls_join_the_base() {
        let url = resolve_guarded("/fc-chelsea/startseite/verein/631", BASE, HOST).unwrap();
        assert_eq!(url, "https://www.transfermarkt.com/fc-chelsea/startseite/verein/631");
    }

    #[test]
    fn test_absolute_same_host_passes() {
        let url = resolve_guarded("https://www.transfermarkt.com/x", BASE, HOST).unwrap();
        assert_eq!(url, "https://www.transfermarkt.com/x");
    }

    #[test]
    fn test_wrong_host_fails_fast() {
        let err = resolve_guarded("https://otherdomain.com/x", BASE, HOST).unwrap_err();
        assert!(matches!(err, ScrapeError::DomainMismatch { .. }));
    }
}
