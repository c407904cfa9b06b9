//! Periodic driver for the `watch` command.

use std::time::Duration;
use tracing::{debug, warn};

/// Wait applied after a round that could not determine its own period.
pub const RETRY_PERIOD: Duration = Duration::from_secs(60 * 60);

pub trait Ticker {
    fn wait(&mut self, period: Duration);
}

/// Blocks the current thread for each period.
pub struct SleepTicker;

impl Ticker for SleepTicker {
    fn wait(&mut self, period: Duration) {
        std::thread::sleep(period);
    }
}

/// Run `round` repeatedly, waiting on `ticker` in between.
///
/// `round` returns how long to wait before the next round, so a changed
/// interval preference takes effect right away. A failed round is logged
/// and retried after [`RETRY_PERIOD`]. Stops after `max_rounds` rounds if
/// given and returns the number of rounds run.
pub fn run_watch(
    ticker: &mut dyn Ticker,
    max_rounds: Option<usize>,
    mut round: impl FnMut() -> anyhow::Result<Duration>,
) -> usize {
    let mut rounds = 0;
    loop {
        let period = match round() {
            Ok(period) => period,
            Err(e) => {
                warn!("Watch round failed: {e:#}");
                RETRY_PERIOD
            }
        };
        rounds += 1;

        if max_rounds.is_some_and(|max| rounds >= max) {
            return rounds;
        }

        debug!("Next check in {:?}", period);
        ticker.wait(period);
    }
}
