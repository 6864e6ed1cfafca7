//! Heartbeat monitor.
//!
//! Emits a liveness probe every interval while the connection is up. It never
//! waits for replies; a dead link is reported by the transport's own close
//! signal.

use std::task::{Context, Poll};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

use crate::frame::Frame;

/// Default interval between probes.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Owns the heartbeat ticker.
///
/// The ticker only exists between [`start`](Self::start) and
/// [`stop`](Self::stop), so a stopped monitor can never report a due probe.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    period: Duration,
    ticker: Option<Interval>,
    sent: u64,
}

impl HeartbeatMonitor {
    /// Create a stopped monitor.
    #[must_use]
    pub fn new(period: Duration) -> Self {
        Self {
            period: period.max(Duration::from_millis(1)),
            ticker: None,
            sent: 0,
        }
    }

    /// Interval between probes.
    #[must_use]
    pub const fn period(&self) -> Duration {
        self.period
    }

    /// Start ticking. The first probe is due one full period from now.
    ///
    /// Returns `true` if a running ticker had to be replaced.
    pub fn start(&mut self) -> bool {
        let replaced = self.stop();
        let mut ticker = interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.ticker = Some(ticker);
        replaced
    }

    /// Stop ticking. Returns `true` if a ticker was running.
    pub fn stop(&mut self) -> bool {
        self.ticker.take().is_some()
    }

    /// Whether the ticker is armed.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.ticker.is_some()
    }

    /// Probes produced since creation.
    #[must_use]
    pub const fn sent(&self) -> u64 {
        self.sent
    }

    /// Ready when a probe is due. Pending forever while stopped.
    pub fn poll_due(&mut self, cx: &mut Context<'_>) -> Poll<()> {
        match self.ticker.as_mut() {
            Some(ticker) => ticker.poll_tick(cx).map(|_| ()),
            None => Poll::Pending,
        }
    }

    /// Build the next probe frame.
    pub fn probe(&mut self, at: DateTime<Utc>) -> Frame {
        self.sent += 1;
        Frame::heartbeat(at)
    }
}

impl Default for HeartbeatMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_HEARTBEAT_INTERVAL)
    }
}
