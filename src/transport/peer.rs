//! Abstract peer transport (SPEC_FULL §1, §4.2).
//!
//! The concrete `RTCPeerConnection` implementation is out of scope; this
//! module defines the capability surface the [`super::TransportManager`]
//! drives, generalized from the teacher's concrete `PeerConnection` in
//! `src/peer/mod.rs` (candidate buffering, SDP exchange, ICE/connection
//! state callbacks) into a trait so any WebRTC binding can plug in.

use async_trait::async_trait;

use crate::error::SessionError;
use crate::model::{IceServer, TrackType};
use crate::stats::StatsSource;

/// Aggregate connectivity state of one peer transport, mirroring the
/// teacher's `IceConnectionState`/`PeerConnectionState` duo collapsed to
/// what the engine actually branches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// One side (publisher or subscriber) of the two-transport model.
///
/// A production implementation wraps a real `RTCPeerConnection`; this
/// crate provides only the trait plus a scripted in-memory double for
/// behavioral tests (see [`mock::ScriptedTransport`]), and, behind the
/// `mockable` feature, a `mockall`-generated `MockTransport`.
#[cfg_attr(feature = "mockable", mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync + StatsSource {
    /// Applies configuration and reference ICE servers, as computed by
    /// `TransportManager::make_configuration`.
    async fn configure(&self, ice_servers: &[IceServer], force_relay: bool) -> Result<(), SessionError>;

    /// Creates a local SDP offer (publisher) or answer (subscriber, in
    /// response to a remote offer).
    async fn create_local_description(&self, remote_sdp: Option<&str>) -> Result<String, SessionError>;

    /// Applies a remote SDP description.
    async fn set_remote_description(&self, sdp: &str) -> Result<(), SessionError>;

    /// Applies one trickled remote ICE candidate.
    async fn add_ice_candidate(&self, candidate: &str) -> Result<(), SessionError>;

    /// Requests an ICE restart on the next renegotiation.
    async fn restart_ice(&self);

    /// Creates a sender for a not-yet-published local track, keyed by its
    /// client-generated `cid`. A no-op on the subscriber transport.
    async fn add_track(&self, cid: &str, kind: TrackType) -> Result<(), SessionError>;

    /// Removes the sender for a local track.
    async fn remove_track(&self, cid: &str) -> Result<(), SessionError>;

    /// Opens one of the two well-known local data channels on the
    /// publisher side (SPEC_FULL §4.2's "Data-channel allocation").
    /// A no-op on the subscriber transport, which only ever receives
    /// remote-announced channels.
    async fn create_data_channel(&self, label: &str, reliable: bool) -> Result<(), SessionError>;

    /// Closes the underlying connection. Idempotent.
    async fn close(&self);

    /// Current aggregate connection state.
    fn state(&self) -> PeerConnectionState;
}

#[cfg(any(test, feature = "mockable"))]
pub mod mock {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::{PeerConnectionState, Transport};
    use crate::error::SessionError;
    use crate::model::{IceServer, TrackType};
    use crate::stats::{StatsReport, StatsSource};

    /// A [`Transport`] double that tracks whether a remote description has
    /// been set, for exercising candidate-buffering behavior end to end.
    pub struct ScriptedTransport {
        state: Mutex<PeerConnectionState>,
        remote_description_set: Mutex<bool>,
        applied_candidates: Mutex<Vec<String>>,
    }

    impl ScriptedTransport {
        #[must_use]
        pub fn new() -> Self {
            Self {
                state: Mutex::new(PeerConnectionState::New),
                remote_description_set: Mutex::new(false),
                applied_candidates: Mutex::new(Vec::new()),
            }
        }

        #[must_use]
        pub fn applied_candidates(&self) -> Vec<String> {
            self.applied_candidates.lock().expect("mock mutex poisoned").clone()
        }
    }

    impl Default for ScriptedTransport {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn configure(&self, _ice_servers: &[IceServer], _force_relay: bool) -> Result<(), SessionError> {
            Ok(())
        }

        async fn create_local_description(&self, _remote_sdp: Option<&str>) -> Result<String, SessionError> {
            Ok("v=0 mock-sdp".to_owned())
        }

        async fn set_remote_description(&self, _sdp: &str) -> Result<(), SessionError> {
            *self.remote_description_set.lock().expect("mock mutex poisoned") = true;
            *self.state.lock().expect("mock mutex poisoned") = PeerConnectionState::Connected;
            Ok(())
        }

        async fn add_ice_candidate(&self, candidate: &str) -> Result<(), SessionError> {
            self.applied_candidates
                .lock()
                .expect("mock mutex poisoned")
                .push(candidate.to_owned());
            Ok(())
        }

        async fn restart_ice(&self) {}

        async fn add_track(&self, _cid: &str, _kind: TrackType) -> Result<(), SessionError> {
            Ok(())
        }

        async fn remove_track(&self, _cid: &str) -> Result<(), SessionError> {
            Ok(())
        }

        async fn create_data_channel(&self, _label: &str, _reliable: bool) -> Result<(), SessionError> {
            Ok(())
        }

        async fn close(&self) {
            *self.state.lock().expect("mock mutex poisoned") = PeerConnectionState::Closed;
        }

        fn state(&self) -> PeerConnectionState {
            *self.state.lock().expect("mock mutex poisoned")
        }
    }

    #[async_trait]
    impl StatsSource for ScriptedTransport {
        async fn stats(&self) -> StatsReport {
            StatsReport::default()
        }
    }
}
