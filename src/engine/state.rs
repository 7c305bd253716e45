//! Session state transitions (SPEC_FULL §4.3, §9).
//!
//! Grounded on `RTCEngineImpl::changeState`'s three overloads, collapsed
//! here onto the single [`crate::model::SessionState`] the engine
//! publishes through a `tokio::sync::watch` channel (SPEC_FULL §9's
//! "observable state over a virtual listener" design note).

use crate::model::SessionState;
use crate::signal::SignalState;
use crate::transport::PeerConnectionState;

/// Derives the published [`SessionState`] from a just-observed signal
/// channel transition. Maps onto the first four of the spec's eight
/// values (`Transport*`).
#[must_use]
pub fn from_signal_state(state: SignalState) -> Option<SessionState> {
    match state {
        SignalState::Connecting => Some(SessionState::TransportConnecting),
        SignalState::Connected => Some(SessionState::TransportConnected),
        SignalState::Closing => Some(SessionState::TransportDisconnecting),
        SignalState::Disconnected => Some(SessionState::TransportDisconnected),
    }
}

/// Derives the published [`SessionState`] from a peer transport
/// connection-state transition, once signaling has already completed
/// (mirrors `changeState(PeerConnectionState)` only firing meaningful
/// transitions once a `TransportManager` exists). Maps onto the last
/// four of the spec's eight values (`Rtc*`).
#[must_use]
pub fn from_peer_state(state: PeerConnectionState) -> Option<SessionState> {
    match state {
        PeerConnectionState::Connecting => Some(SessionState::RtcConnecting),
        PeerConnectionState::Connected => Some(SessionState::RtcConnected),
        PeerConnectionState::Disconnected => Some(SessionState::RtcDisconnected),
        PeerConnectionState::Failed | PeerConnectionState::Closed => Some(SessionState::RtcClosed),
        PeerConnectionState::New => None,
    }
}

/// A transition helper that only reports a change when the state
/// actually differs, matching `changeState`'s `exchangeVal` guard
/// (SPEC_FULL §5 ordering guarantee #2: no collapsed transitions, but
/// also no duplicate notifications for an unchanged state).
pub fn apply(current: &mut SessionState, next: SessionState) -> bool {
    if *current == next {
        return false;
    }
    *current = next;
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_reports_only_real_transitions() {
        let mut state = SessionState::TransportDisconnected;
        assert!(apply(&mut state, SessionState::TransportConnecting));
        assert!(!apply(&mut state, SessionState::TransportConnecting));
        assert!(apply(&mut state, SessionState::TransportConnected));
    }

    #[test]
    fn signal_and_peer_states_map_to_disjoint_halves() {
        assert_eq!(from_signal_state(SignalState::Connecting), Some(SessionState::TransportConnecting));
        assert_eq!(from_peer_state(PeerConnectionState::Connected), Some(SessionState::RtcConnected));
        assert_eq!(from_peer_state(PeerConnectionState::New), None);
    }
}
