//! Negotiation throttling (SPEC_FULL §4.2).
//!
//! The publisher transport coalesces bursts of track add/remove calls
//! into a single renegotiation, delayed by a short timer. Grounded on
//! `createTransportManager`'s `negotiationDelay` (capped to 100ms) in
//! `original_source/src/rtc/src/RTCEngineImpl.cpp`.

use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::sleep;

/// Coalesces repeated negotiation requests into one, firing at most once
/// per `delay` window.
pub struct NegotiationThrottle {
    delay: Duration,
    requested: Notify,
}

impl NegotiationThrottle {
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self {
            delay: delay.min(Duration::from_millis(100)),
            requested: Notify::new(),
        }
    }

    /// Marks that a renegotiation is wanted. Safe to call repeatedly;
    /// only the first call in a given throttle window produces a
    /// renegotiation.
    pub fn request(&self) {
        self.requested.notify_one();
    }

    /// Waits for the next coalesced negotiation request, sleeping
    /// `delay` after the first signal to absorb further bursts.
    pub async fn wait_next(&self) {
        self.requested.notified().await;
        sleep(self.delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caps_delay_to_100ms() {
        let throttle = NegotiationThrottle::new(Duration::from_secs(5));
        assert_eq!(throttle.delay, Duration::from_millis(100));
    }
}
