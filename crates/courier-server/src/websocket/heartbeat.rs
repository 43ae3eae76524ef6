//! Optional idle-connection reaping.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::time;
use tokio_util::sync::CancellationToken;

/// Liveness flag shared between a connection's read loop and its monitor.
#[derive(Debug)]
pub struct Liveness {
    alive: AtomicBool,
}

impl Liveness {
    /// A fresh connection counts as alive.
    pub fn new() -> Self {
        Self {
            alive: AtomicBool::new(true),
        }
    }

    /// Record inbound activity.
    pub fn mark_alive(&self) {
        self.alive.store(true, Ordering::Relaxed);
    }

    /// Check and reset the flag. `true` if there was activity since the last check.
    pub fn check_alive(&self) -> bool {
        self.alive.swap(false, Ordering::Relaxed)
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of the heartbeat loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// The client stayed silent for the whole timeout window.
    TimedOut,
    /// The heartbeat was cancelled externally.
    Cancelled,
}

/// Watch a connection for inbound activity.
///
/// At each `interval` tick the liveness flag is checked and reset. Once
/// `timeout / interval` consecutive ticks (at least 1) see no activity the
/// connection is considered dead.
pub async fn run_heartbeat(
    liveness: &Liveness,
    interval: Duration,
    timeout: Duration,
    cancel: CancellationToken,
) -> HeartbeatResult {
    let mut check_interval = time::interval_at(time::Instant::now() + interval, interval);
    let mut missed: u32 = 0;
    let max_missed = (timeout.as_millis() / interval.as_millis().max(1)).max(1) as u32;

    loop {
        tokio::select! {
            _ = check_interval.tick() => {
                if liveness.check_alive() {
                    missed = 0;
                } else {
                    missed += 1;
                    if missed >= max_missed {
                        return HeartbeatResult::TimedOut;
                    }
                }
            }
            () = cancel.cancelled() => {
                return HeartbeatResult::Cancelled;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn check_alive_resets_flag() {
        let live = Liveness::new();
        assert!(live.check_alive());
        assert!(!live.check_alive());
        live.mark_alive();
        assert!(live.check_alive());
    }

    #[tokio::test]
    async fn heartbeat_cancelled() {
        let live = Liveness::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = run_heartbeat(&live, Duration::from_secs(100), Duration::from_secs(300), cancel).await;
        assert_eq!(result, HeartbeatResult::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_connection_times_out() {
        let live = Liveness::new();
        let start = time::Instant::now();
        let result = run_heartbeat(
            &live,
            Duration::from_millis(100),
            Duration::from_millis(300),
            CancellationToken::new(),
        )
        .await;
        assert_eq!(result, HeartbeatResult::TimedOut);
        // First tick consumes the initial alive flag, then three silent ticks
        assert_eq!(start.elapsed(), Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn active_connection_stays_alive() {
        let live = Arc::new(Liveness::new());
        let cancel = CancellationToken::new();

        let monitor = {
            let live = Arc::clone(&live);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                run_heartbeat(&live, Duration::from_millis(100), Duration::from_millis(200), cancel).await
            })
        };

        for _ in 0..10 {
            time::sleep(Duration::from_millis(50)).await;
            live.mark_alive();
        }

        cancel.cancel();
        assert_eq!(monitor.await.unwrap(), HeartbeatResult::Cancelled);
    }
}
