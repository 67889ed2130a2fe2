use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScrapeError {
    #[error("wrong site for this scraper: expected host {expected}, got {got}")]
    DomainMismatch { expected: String, got: String },

    #[error("invalid URL {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("browser error: {0}")]
    Browser(String),

    #[error("unsupported export format: {0:?}")]
    UnsupportedExport(String),
}

pub type Result<T> = std::result::Result<T, ScrapeError>;
