//! Pull-based statistics facade.
//!
//! Statistics collection proper is out of scope (SPEC_FULL §1): the
//! teacher's `PeerConnection::scrape_and_send_peer_stats` pushes stats
//! reports to a server sink on a timer, which this crate generalizes
//! into a pull-only hook so an embedder can sample the two transports'
//! stats on its own schedule without the engine owning a stats timer.

use crate::signal::SignalTarget;

/// Opaque per-transport statistics snapshot. The concrete shape is an
/// external collaborator's concern; the engine only routes a pull
/// request to the right transport.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatsReport {
    pub raw: String,
}

/// Implemented by a [`crate::transport::Transport`] that can produce a
/// stats snapshot on demand.
#[async_trait::async_trait]
pub trait StatsSource: Send + Sync {
    async fn stats(&self) -> StatsReport;
}

/// Requests a stats snapshot from one side of the [`crate::transport::TransportManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatsRequest {
    pub target: SignalTarget,
}
