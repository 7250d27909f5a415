//! C3/C4: the outbound and inbound pumps that move frames between the
//! local ZeroMQ bus and the active WebSocket connection.

mod inbound;
mod outbound;

pub use inbound::InboundPump;
pub use outbound::OutboundPump;

use std::time::{Duration, Instant};

/// Rate-limited "N messages dropped in the last second" warning, matching
/// `PumpServiceBase._log_dropped`'s one-second `_REPORT_INTERVAL` window.
pub(crate) struct DropReporter {
    window: Duration,
    count: u64,
    window_start: Instant,
}

impl DropReporter {
    pub(crate) fn new(window: Duration) -> Self {
        Self {
            window,
            count: 0,
            window_start: Instant::now(),
        }
    }

    /// Record one drop. Returns `Some(count)` exactly when the window has
    /// elapsed and a warning should be emitted for the accumulated count,
    /// after which the count resets to zero.
    pub(crate) fn record(&mut self) -> Option<u64> {
        self.count += 1;
        if self.window_start.elapsed() >= self.window {
            let count = self.count;
            self.count = 0;
            self.window_start = Instant::now();
            Some(count)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_does_not_fire_before_the_window_elapses() {
        let mut reporter = DropReporter::new(Duration::from_secs(60));
        assert_eq!(reporter.record(), None);
        assert_eq!(reporter.record(), None);
    }

    #[test]
    fn record_fires_and_resets_once_the_window_elapses() {
        let mut reporter = DropReporter::new(Duration::from_millis(0));
        reporter.record();
        let fired = reporter.record();
        assert_eq!(fired, Some(2));
        // The window restarts immediately, so the very next record is
        // itself already past a zero-length window.
        assert_eq!(reporter.record(), Some(1));
    }
}
