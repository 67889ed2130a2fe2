//! Identity reconciliation against auxiliary databases.
//!
//! A filler takes a partially-built record, queries its source with the
//! person's name, fuzzy-matches candidates and — when a candidate survives
//! every check — merges in enrichment fields (a stable external id,
//! citizenship, job title). No match leaves the record untouched: silent
//! soft-failure, never an error.

pub mod fminside;
pub mod fmtransferupdate;

pub use fminside::FmInsideFiller;
pub use fmtransferupdate::FmTransferUpdateFiller;

use crate::models::Record;
use async_trait::async_trait;

#[async_trait]
pub trait Filler: Send + Sync {
    /// Same identity in, possibly more fields out.
    async fn check_and_fill(&self, record: Record) -> Record;
}

/// Static selector literals are part of the source's structural contract;
/// a parse failure is a programming error, not a runtime condition.
pub(crate) fn sel(css: &'static str) -> scraper::Selector {
    scraper::Selector::parse(css).expect("static selector")
}
