//! Per-chain scheduler loop around [`BatchScraper::advance`].
//!
//! A chain that made progress is advanced again immediately; an up-to-date
//! chain waits `poll_interval`; a failed cycle waits `error_backoff` and is
//! retried. Shutdown is only observed between cycles.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};

use feeindex_core::scraper::{Advance, BatchScraper};
use feeindex_core::source::ChainEventSource;
use feeindex_core::ScraperError;

/// Sleep durations between cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    pub poll_interval: Duration,
    pub error_backoff: Duration,
}

impl Timing {
    pub fn from_millis(poll_interval_ms: u64, error_backoff_ms: u64) -> Self {
        Self {
            poll_interval: Duration::from_millis(poll_interval_ms),
            error_backoff: Duration::from_millis(error_backoff_ms),
        }
    }

    /// How long to wait after a cycle, `None` to continue immediately.
    pub fn delay_after(&self, result: &Result<Advance, ScraperError>) -> Option<Duration> {
        match result {
            Ok(advance) if advance.made_progress() => None,
            Ok(_) => Some(self.poll_interval),
            Err(_) => Some(self.error_backoff),
        }
    }
}

/// Drive one chain until `shutdown` flips to `true` (or its sender is dropped).
pub async fn run_chain<S: ChainEventSource>(
    scraper: BatchScraper<S>,
    timing: Timing,
    mut shutdown: watch::Receiver<bool>,
) {
    let chain_id = scraper.chain_id();
    info!(chain_id, "scraper started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        let result = scraper.advance().await;
        match &result {
            Ok(Advance::Advanced { range, fetched, inserted, duplicates }) => {
                info!(chain_id, %range, fetched, inserted, duplicates, "cycle complete");
            }
            Ok(Advance::UpToDate { .. }) => {}
            Err(e) if e.is_unrecorded_progress() => {
                warn!(chain_id, error = %e, "events stored but checkpoint not advanced; range will be retried");
            }
            Err(e) => error!(chain_id, error = %e, "scrape cycle failed"),
        }

        let Some(delay) = timing.delay_after(&result) else {
            continue;
        };
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    info!(chain_id, "scraper stopped");
}
