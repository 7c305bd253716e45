//! Transport manager (SPEC_FULL §4.2): owns the publisher and subscriber
//! peer transports, routes trickle ICE and SDP exchange between them and
//! the signal channel, and throttles renegotiation.
//!
//! Grounded on `original_source/src/rtc/src/RTCEngineImpl.cpp`'s
//! `createTransportManager`/`makeConfiguration` and on the teacher's
//! `PeerConnection` candidate-buffering discipline in `src/peer/mod.rs`.

pub mod candidates;
pub mod factory;
pub mod negotiate;
pub mod peer;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::error::SessionError;
use crate::model::{ClientConfigSetting, ClientConfiguration, IceServer};
use crate::options::IceTransportPolicy;
use crate::signal::SignalTarget;
use crate::stats::{StatsReport, StatsRequest};

pub use factory::TransportFactory;
pub use peer::{PeerConnectionState, Transport};

/// Resolved configuration handed to each [`Transport::configure`] call.
/// Mirrors `RTCEngineImpl::makeConfiguration`'s precedence rules: a
/// locally-configured ICE server list always overrides the
/// server-advertised one, and `force_relay` is set only when the server
/// explicitly enables it.
#[derive(Debug, Clone)]
pub struct TransportConfiguration {
    pub ice_servers: Vec<IceServer>,
    pub force_relay: bool,
}

/// Computes the effective [`TransportConfiguration`] from server-reported
/// ICE servers/client configuration, the embedder's own override list, and
/// the embedder's [`IceTransportPolicy`]. Relay is forced when either the
/// server's client configuration enables it, or the embedder explicitly
/// requested `Relay`-only gathering (SPEC_FULL §6 `Options::iceTransportPolicy`).
#[must_use]
pub fn make_configuration(
    server_ice_servers: &[IceServer],
    client_configuration: &ClientConfiguration,
    local_ice_servers: &[IceServer],
    ice_transport_policy: IceTransportPolicy,
) -> TransportConfiguration {
    let ice_servers = if local_ice_servers.is_empty() {
        server_ice_servers.to_vec()
    } else {
        local_ice_servers.to_vec()
    };
    let force_relay =
        client_configuration.force_relay == ClientConfigSetting::Enabled || ice_transport_policy == IceTransportPolicy::Relay;
    TransportConfiguration { ice_servers, force_relay }
}

/// Owns the two peer transports and coordinates SDP/ICE flow between
/// them, the candidate buffer, and the negotiation throttle.
///
/// Whether the subscriber or publisher is "primary" (initiates the first
/// offer) is decided by the server at join time, per `JoinResponse`'s
/// `subscriber_primary` flag (SPEC_FULL §3/§4.2).
pub struct TransportManager {
    publisher: Arc<dyn Transport>,
    subscriber: Arc<dyn Transport>,
    subscriber_primary: bool,
    candidates: Mutex<candidates::CandidateBuffer>,
    publisher_negotiation: negotiate::NegotiationThrottle,
    fast_publish: bool,
}

impl TransportManager {
    pub fn new(
        publisher: Arc<dyn Transport>,
        subscriber: Arc<dyn Transport>,
        subscriber_primary: bool,
        fast_publish: bool,
        negotiation_delay: Duration,
    ) -> Self {
        Self {
            publisher,
            subscriber,
            subscriber_primary,
            candidates: Mutex::new(candidates::CandidateBuffer::new()),
            publisher_negotiation: negotiate::NegotiationThrottle::new(negotiation_delay),
            fast_publish,
        }
    }

    #[must_use]
    pub fn subscriber_primary(&self) -> bool {
        self.subscriber_primary
    }

    #[must_use]
    pub fn fast_publish(&self) -> bool {
        self.fast_publish
    }

    fn transport_for(&self, target: SignalTarget) -> &Arc<dyn Transport> {
        match target {
            SignalTarget::Publisher => &self.publisher,
            SignalTarget::Subscriber => &self.subscriber,
        }
    }

    /// Applies the given configuration to both transports concurrently
    /// (they share no state, so there is no reason to serialize the two
    /// `configure` calls).
    pub async fn configure(&self, configuration: &TransportConfiguration) -> Result<(), SessionError> {
        let (publisher, subscriber) = futures::join!(
            self.publisher.configure(&configuration.ice_servers, configuration.force_relay),
            self.subscriber.configure(&configuration.ice_servers, configuration.force_relay),
        );
        publisher?;
        subscriber?;
        Ok(())
    }

    /// Applies a remote SDP description to `target`, then flushes any
    /// ICE candidates that were buffered for it (teacher's
    /// `set_remote_description` flush-in-arrival-order discipline).
    pub async fn set_remote_description(&self, target: SignalTarget, sdp: &str) -> Result<(), SessionError> {
        let transport = self.transport_for(target);
        transport.set_remote_description(sdp).await?;
        let flushed = self.candidates.lock().await.mark_remote_description_set(target);
        for candidate in flushed {
            transport.add_ice_candidate(&candidate).await?;
        }
        Ok(())
    }

    /// Applies, or buffers, one trickled remote ICE candidate.
    pub async fn add_ice_candidate(&self, target: SignalTarget, candidate: String) -> Result<(), SessionError> {
        let ready = self.candidates.lock().await.add(target, candidate);
        if let Some(candidate) = ready {
            self.transport_for(target).add_ice_candidate(&candidate).await?;
        }
        Ok(())
    }

    /// Creates a local offer or answer on `target`.
    pub async fn create_local_description(
        &self,
        target: SignalTarget,
        remote_sdp: Option<&str>,
    ) -> Result<String, SessionError> {
        self.transport_for(target).create_local_description(remote_sdp).await
    }

    /// Signals that the publisher side wants to renegotiate (e.g. a
    /// track was added or removed). Coalesced by
    /// [`negotiate::NegotiationThrottle`].
    pub fn request_publisher_negotiation(&self) {
        self.publisher_negotiation.request();
    }

    /// Waits for the next coalesced publisher renegotiation request.
    pub async fn wait_publisher_negotiation(&self) {
        self.publisher_negotiation.wait_next().await;
    }

    /// Creates a publisher-side sender for a local track and requests a
    /// renegotiation.
    pub async fn add_track(&self, cid: &str, kind: crate::model::TrackType) -> Result<(), SessionError> {
        self.publisher.add_track(cid, kind).await?;
        self.publisher_negotiation.request();
        Ok(())
    }

    /// Removes the publisher-side sender for a local track and requests a
    /// renegotiation.
    pub async fn remove_track(&self, cid: &str) -> Result<(), SessionError> {
        self.publisher.remove_track(cid).await?;
        self.publisher_negotiation.request();
        Ok(())
    }

    /// Opens the publisher's two well-known local data channels
    /// (SPEC_FULL §4.2). In this design the publisher transport is always
    /// created up front by the [`TransportFactory`], so "on fastPublish,
    /// before any track" and "when the publisher is created" collapse to
    /// the same call site: right after a [`TransportManager`] is built.
    pub async fn open_local_data_channels(&self) -> Result<(), SessionError> {
        self.publisher
            .create_data_channel(crate::data::RELIABLE_DATA_CHANNEL_LABEL, true)
            .await?;
        self.publisher
            .create_data_channel(crate::data::LOSSY_DATA_CHANNEL_LABEL, false)
            .await?;
        Ok(())
    }

    /// Restarts ICE on both transports, used on transport-level
    /// reconnect (not a full `TransportManager` re-create).
    pub async fn restart_ice(&self) {
        self.publisher.restart_ice().await;
        self.subscriber.restart_ice().await;
    }

    #[must_use]
    pub fn publisher_state(&self) -> PeerConnectionState {
        self.publisher.state()
    }

    #[must_use]
    pub fn subscriber_state(&self) -> PeerConnectionState {
        self.subscriber.state()
    }

    /// Fuses the publisher and subscriber states into the single
    /// [`PeerConnectionState`] the engine maps onto [`crate::model::SessionState`]
    /// (SPEC_FULL §4.2): `Failed` if either is `Failed`, else `Closed` if
    /// either is `Closed`, else `Connecting` if either is `Connecting`,
    /// else `Connected` only when the primary side (subscriber if
    /// `subscriber_primary`, publisher otherwise) is `Connected`.
    #[must_use]
    pub fn fused_state(&self) -> PeerConnectionState {
        let publisher = self.publisher.state();
        let subscriber = self.subscriber.state();
        if publisher == PeerConnectionState::Failed || subscriber == PeerConnectionState::Failed {
            return PeerConnectionState::Failed;
        }
        if publisher == PeerConnectionState::Closed || subscriber == PeerConnectionState::Closed {
            return PeerConnectionState::Closed;
        }
        if publisher == PeerConnectionState::Connecting || subscriber == PeerConnectionState::Connecting {
            return PeerConnectionState::Connecting;
        }
        let primary = if self.subscriber_primary { subscriber } else { publisher };
        if primary == PeerConnectionState::Connected {
            PeerConnectionState::Connected
        } else {
            PeerConnectionState::Disconnected
        }
    }

    /// Pulls a stats snapshot from one side of this manager.
    pub async fn query_stats(&self, request: StatsRequest) -> StatsReport {
        self.transport_for(request.target).stats().await
    }

    /// Closes both transports. Idempotent.
    pub async fn close(&self) {
        self.publisher.close().await;
        self.subscriber.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::peer::mock::ScriptedTransport;

    fn manager() -> TransportManager {
        TransportManager::new(
            Arc::new(ScriptedTransport::new()),
            Arc::new(ScriptedTransport::new()),
            true,
            false,
            Duration::from_millis(50),
        )
    }

    #[test]
    fn make_configuration_prefers_local_ice_servers() {
        let server = vec![IceServer { urls: vec!["turn:server".into()], username: None, credential: None }];
        let local = vec![IceServer { urls: vec!["turn:local".into()], username: None, credential: None }];
        let cc = ClientConfiguration::default();
        let resolved = make_configuration(&server, &cc, &local, IceTransportPolicy::All);
        assert_eq!(resolved.ice_servers, local);
    }

    #[test]
    fn make_configuration_falls_back_to_server_ice_servers() {
        let server = vec![IceServer { urls: vec!["turn:server".into()], username: None, credential: None }];
        let cc = ClientConfiguration::default();
        let resolved = make_configuration(&server, &cc, &[], IceTransportPolicy::All);
        assert_eq!(resolved.ice_servers, server);
    }

    #[test]
    fn make_configuration_forces_relay_on_relay_policy() {
        let server = vec![IceServer { urls: vec!["turn:server".into()], username: None, credential: None }];
        let cc = ClientConfiguration::default();
        let resolved = make_configuration(&server, &cc, &[], IceTransportPolicy::Relay);
        assert!(resolved.force_relay);
    }

    #[tokio::test]
    async fn buffered_candidate_applies_after_remote_description() {
        let manager = manager();
        manager
            .add_ice_candidate(SignalTarget::Publisher, "cand-1".into())
            .await
            .expect("buffer candidate");
        manager
            .set_remote_description(SignalTarget::Publisher, "v=0 offer")
            .await
            .expect("set remote description");
        assert_eq!(manager.publisher_state(), PeerConnectionState::Connected);
    }

    #[tokio::test]
    async fn open_local_data_channels_opens_both_on_publisher() {
        let manager = manager();
        manager.open_local_data_channels().await.expect("opens reliable and lossy channels");
    }

    #[tokio::test]
    async fn add_track_requests_publisher_renegotiation() {
        let manager = manager();
        manager.add_track("cid-1", crate::model::TrackType::Audio).await.expect("add sender");
        manager.wait_publisher_negotiation().await;
    }

    #[tokio::test]
    async fn remove_track_requests_publisher_renegotiation() {
        let manager = manager();
        manager.remove_track("cid-1").await.expect("remove sender");
        manager.wait_publisher_negotiation().await;
    }

    #[tokio::test]
    async fn query_stats_routes_to_the_requested_side() {
        let manager = manager();
        let report = manager.query_stats(crate::stats::StatsRequest { target: SignalTarget::Publisher }).await;
        assert_eq!(report, crate::stats::StatsReport::default());
    }

    #[tokio::test]
    async fn fused_state_follows_primary_once_non_connecting() {
        let manager = manager(); // subscriber_primary = true
        assert_eq!(manager.fused_state(), PeerConnectionState::Disconnected);
        manager
            .set_remote_description(SignalTarget::Subscriber, "v=0 offer")
            .await
            .expect("set remote description");
        assert_eq!(manager.fused_state(), PeerConnectionState::Connected);
    }
}
