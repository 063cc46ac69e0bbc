//! Per-connection ping watchdog.

use std::pin::Pin;
use std::time::Duration;

use tokio::time::{Instant, Sleep};

/// Deadline timer that fires when the relay stops pinging.
///
/// Owned by the live link it guards, so exactly one monitor exists per
/// connection and dropping the link cancels it. The connection manager
/// awaits [`HeartbeatMonitor::expired`] in its event loop and aborts the
/// socket when it resolves.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    timeout: Duration,
    deadline: Pin<Box<Sleep>>,
}

impl HeartbeatMonitor {
    /// Arms a monitor that expires `timeout` from now.
    #[must_use]
    pub fn start(timeout: Duration) -> Self {
        Self {
            timeout,
            deadline: Box::pin(tokio::time::sleep(timeout)),
        }
    }

    /// Pushes the deadline out to `timeout` from now.
    pub fn reset(&mut self) {
        self.deadline.as_mut().reset(Instant::now() + self.timeout);
    }

    #[cfg(test)]
    fn deadline(&self) -> Instant {
        self.deadline.deadline()
    }

    /// Resolves once the deadline passes without a [`reset`](Self::reset).
    pub async fn expired(&mut self) {
        self.deadline.as_mut().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(31);

    #[tokio::test(start_paused = true)]
    async fn fires_after_timeout() {
        let start = Instant::now();
        let mut monitor = HeartbeatMonitor::start(TIMEOUT);
        monitor.expired().await;
        assert!(Instant::now() - start >= TIMEOUT);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_postpones_expiry() {
        let mut monitor = HeartbeatMonitor::start(TIMEOUT);

        tokio::time::advance(Duration::from_secs(20)).await;
        monitor.reset();
        let expected = Instant::now() + TIMEOUT;

        tokio::time::advance(Duration::from_secs(20)).await;
        let still_waiting =
            tokio::time::timeout(Duration::from_millis(1), monitor.expired()).await;
        assert!(still_waiting.is_err());

        monitor.expired().await;
        assert!(Instant::now() >= expected);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_tracks_reset() {
        let mut monitor = HeartbeatMonitor::start(TIMEOUT);
        let first = monitor.deadline();
        tokio::time::advance(Duration::from_secs(5)).await;
        monitor.reset();
        assert_eq!(monitor.deadline() - first, Duration::from_secs(5));
    }
}
