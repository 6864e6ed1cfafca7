//! One-shot timers owned by the connection driver.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::time::{sleep, Sleep};

/// Which one-shot timer expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TimerKind {
    ConnectTimeout,
    Reconnect,
}

/// Point-in-time view of the manager's timers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimerSnapshot {
    /// A connection timeout is armed.
    pub connect_timeout: bool,
    /// A reconnect delay is armed.
    pub reconnect: bool,
    /// The heartbeat ticker is running.
    pub heartbeat: bool,
    /// Reconnect timers armed over the manager's lifetime.
    pub reconnects_armed: u64,
    /// Timers cancelled before they fired, over the manager's lifetime.
    pub cancellations: u64,
}

impl TimerSnapshot {
    /// Number of timers currently armed.
    #[must_use]
    pub fn pending(&self) -> usize {
        [self.connect_timeout, self.reconnect, self.heartbeat]
            .into_iter()
            .filter(|armed| *armed)
            .count()
    }
}

/// At most one timer per kind. Arming a kind cancels its previous timer.
#[derive(Debug, Default)]
pub(crate) struct Timers {
    connect_timeout: Option<Pin<Box<Sleep>>>,
    reconnect: Option<Pin<Box<Sleep>>>,
    reconnects_armed: u64,
    cancellations: u64,
}

impl Timers {
    pub(crate) fn arm(&mut self, kind: TimerKind, after: Duration) {
        self.cancel(kind);
        let timer = Some(Box::pin(sleep(after)));
        match kind {
            TimerKind::ConnectTimeout => self.connect_timeout = timer,
            TimerKind::Reconnect => {
                self.reconnects_armed += 1;
                self.reconnect = timer;
            }
        }
    }

    /// Returns `true` if a timer was armed.
    pub(crate) fn cancel(&mut self, kind: TimerKind) -> bool {
        let cancelled = self.slot(kind).take().is_some();
        if cancelled {
            self.cancellations += 1;
        }
        cancelled
    }

    /// Cancel everything; returns how many timers were armed.
    pub(crate) fn cancel_all(&mut self) -> usize {
        [TimerKind::ConnectTimeout, TimerKind::Reconnect]
            .into_iter()
            .filter(|kind| self.cancel(*kind))
            .count()
    }

    pub(crate) fn is_armed(&self, kind: TimerKind) -> bool {
        match kind {
            TimerKind::ConnectTimeout => self.connect_timeout.is_some(),
            TimerKind::Reconnect => self.reconnect.is_some(),
        }
    }

    /// Ready with the first expired timer, which is disarmed before returning.
    pub(crate) fn poll_expired(&mut self, cx: &mut Context<'_>) -> Poll<TimerKind> {
        for kind in [TimerKind::ConnectTimeout, TimerKind::Reconnect] {
            let slot = self.slot(kind);
            if let Some(timer) = slot.as_mut() {
                if timer.as_mut().poll(cx).is_ready() {
                    *slot = None;
                    return Poll::Ready(kind);
                }
            }
        }
        Poll::Pending
    }

    pub(crate) fn snapshot(&self, heartbeat: bool) -> TimerSnapshot {
        TimerSnapshot {
            connect_timeout: self.connect_timeout.is_some(),
            reconnect: self.reconnect.is_some(),
            heartbeat,
            reconnects_armed: self.reconnects_armed,
            cancellations: self.cancellations,
        }
    }

    fn slot(&mut self, kind: TimerKind) -> &mut Option<Pin<Box<Sleep>>> {
        match kind {
            TimerKind::ConnectTimeout => &mut self.connect_timeout,
            TimerKind::Reconnect => &mut self.reconnect,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::poll_fn;

    #[tokio::test(start_paused = true)]
    async fn test_arming_twice_replaces_and_counts_cancellation() {
        let mut timers = Timers::default();
        timers.arm(TimerKind::Reconnect, Duration::from_secs(1));
        timers.arm(TimerKind::Reconnect, Duration::from_secs(2));

        let snapshot = timers.snapshot(false);
        assert!(snapshot.reconnect);
        assert_eq!(snapshot.reconnects_armed, 2);
        assert_eq!(snapshot.cancellations, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all_is_idempotent() {
        let mut timers = Timers::default();
        timers.arm(TimerKind::ConnectTimeout, Duration::from_secs(5));
        timers.arm(TimerKind::Reconnect, Duration::from_secs(1));

        assert_eq!(timers.cancel_all(), 2);
        assert_eq!(timers.cancel_all(), 0);
        assert_eq!(timers.snapshot(false).cancellations, 2);
        assert_eq!(timers.snapshot(false).pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_timer_is_disarmed() {
        let mut timers = Timers::default();
        timers.arm(TimerKind::ConnectTimeout, Duration::from_secs(5));
        timers.arm(TimerKind::Reconnect, Duration::from_secs(1));

        let first = poll_fn(|cx| timers.poll_expired(cx)).await;
        assert_eq!(first, TimerKind::Reconnect);
        assert!(!timers.is_armed(TimerKind::Reconnect));
        assert!(timers.is_armed(TimerKind::ConnectTimeout));

        let second = poll_fn(|cx| timers.poll_expired(cx)).await;
        assert_eq!(second, TimerKind::ConnectTimeout);
        assert_eq!(timers.snapshot(false).cancellations, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_timer_never_fires() {
        let mut timers = Timers::default();
        timers.arm(TimerKind::Reconnect, Duration::from_millis(10));
        assert!(timers.cancel(TimerKind::Reconnect));

        let fired =
            tokio::time::timeout(Duration::from_secs(3600), poll_fn(|cx| timers.poll_expired(cx)))
                .await;
        assert!(fired.is_err());
    }
}
