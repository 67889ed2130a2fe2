//! Append-only progress channel shared by scrape workers.
//!
//! Producers never block (the channel is unbounded) and may write from any
//! number of concurrent tasks; a single consumer drains lines until it sees
//! [`DONE_MARKER`], after which it may treat the channel as closed.

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, warn};

/// Terminal line marking the end of a scraping run.
pub const DONE_MARKER: &str = "== scraping completed ==";

#[derive(Debug, Clone, Default)]
pub struct ProgressSink {
    tx: Option<UnboundedSender<String>>,
    debug_errors: bool,
}

impl ProgressSink {
    /// A connected sink plus the receiving half for the caller to drain.
    pub fn channel(debug_errors: bool) -> (Self, UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx: Some(tx),
                debug_errors,
            },
            rx,
        )
    }

    /// A sink that drops every line. Handy for library callers and tests.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn send(&self, line: impl Into<String>) {
        let line = line.into();
        debug!("{}", line.trim());
        if let Some(tx) = &self.tx {
            // The receiver hanging up is not the workers' problem.
            tx.send(line).ok();
        }
    }

    /// Report a failed unit of work. The real error reaches the sink only in
    /// debug mode; it always reaches the trace log.
    pub fn failure(&self, unit: &str, err: &anyhow::Error) {
        warn!("{}: {:#}", unit, err);
        if self.debug_errors {
            self.send(format!("\nError on {unit}: {err:#}"));
        } else {
            self.send(format!("\nError on scraping this person {unit}"));
        }
    }

    pub fn complete(&self) {
        self.send(DONE_MARKER);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lines_arrive_in_send_order_with_marker_last() {
        let (sink, mut rx) = ProgressSink::channel(false);
        sink.send("one");
        sink.send("two");
        sink.complete();

        assert_eq!(rx.recv().await.as_deref(), Some("one"));
        assert_eq!(rx.recv().await.as_deref(), Some("two"));
        assert_eq!(rx.recv().await.as_deref(), Some(DONE_MARKER));
    }

    #[tokio::test]
    async fn test_disabled_sink_never_panics() {
        let sink = ProgressSink::disabled();
        sink.send("ignored");
        sink.complete();
    }

    #[tokio::test]
    async fn test_send_survives_dropped_receiver() {
        let (sink, rx) = ProgressSink::channel(false);
        drop(rx);
        sink.send("nobody listening");
        sink.complete();
    }
}
