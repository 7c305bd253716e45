//! Ping/pong liveness (SPEC_FULL §4.3.3).
//!
//! Grounded on `RTCEngineImpl::onPingRequested`/`onPongTimeout`: a timer
//! driven from the signaling-worker sends a `Ping` carrying the current
//! unix timestamp, and declares the session dead if no `Pong` arrives
//! before the next ping would otherwise fire, tolerating
//! `max_missed_pings` consecutive misses before giving up.

use std::time::Duration;

use tokio::time::{interval, Interval};

/// Drives the ping timer and tracks consecutive misses.
pub struct PingLiveness {
    ticker: Interval,
    missed: u32,
    max_missed: u32,
}

/// What the caller should do after the next tick of [`PingLiveness`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingOutcome {
    /// Send another ping; a prior one is still outstanding but within
    /// budget.
    SendPing,
    /// The missed-ping budget is exhausted; the session should be torn
    /// down with `ServerPingTimedOut`.
    TimedOut,
}

impl PingLiveness {
    #[must_use]
    pub fn new(interval_duration: Duration, max_missed: u32) -> Self {
        Self {
            ticker: interval(interval_duration),
            missed: 0,
            max_missed,
        }
    }

    /// Awaits the next tick and reports whether a `Pong` was received
    /// since the previous tick (`pong_received` is sampled by the
    /// caller, typically via an atomic flag flipped by
    /// [`Self::on_pong`]-equivalent bookkeeping upstream).
    pub async fn tick(&mut self, pong_received_since_last_tick: bool) -> PingOutcome {
        self.ticker.tick().await;
        if pong_received_since_last_tick {
            self.missed = 0;
        } else {
            self.missed += 1;
        }
        if self.missed > self.max_missed {
            PingOutcome::TimedOut
        } else {
            PingOutcome::SendPing
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn times_out_after_max_missed_pings() {
        let mut liveness = PingLiveness::new(Duration::from_millis(10), 2);
        assert_eq!(liveness.tick(false).await, PingOutcome::SendPing);
        assert_eq!(liveness.tick(false).await, PingOutcome::SendPing);
        assert_eq!(liveness.tick(false).await, PingOutcome::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn pong_resets_miss_counter() {
        let mut liveness = PingLiveness::new(Duration::from_millis(10), 1);
        assert_eq!(liveness.tick(false).await, PingOutcome::SendPing);
        assert_eq!(liveness.tick(true).await, PingOutcome::SendPing);
        assert_eq!(liveness.tick(false).await, PingOutcome::SendPing);
    }
}
