//! Error taxonomy surfaced to the embedder.
//!
//! Mirrors `LiveKitError` from the original C++ session engine, but
//! expressed as a `thiserror` enum instead of a flat C-style enum plus a
//! `toString` free function.

use crate::model::DisconnectReason;

/// Errors the [`crate::engine::SessionEngine`] can report through
/// [`crate::engine::SessionEvent::Error`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum SessionError {
    /// A peer transport (publisher or subscriber) entered a terminal
    /// failure state.
    #[error("RTC transport failure: {0}")]
    Rtc(String),

    /// The signal channel failed or closed unexpectedly.
    #[error("signal transport failure: {0}")]
    Transport(String),

    /// No `Pong` arrived within the configured ping timeout.
    #[error("server ping timed out")]
    ServerPingTimedOut,

    /// Another participant with the same identity joined the room.
    #[error("duplicate participant identity")]
    ServerDuplicateIdentity,

    /// The server instance is shutting down.
    #[error("server is shutting down")]
    ServerShutdown,

    /// `RoomService.RemoveParticipant` was called for this participant.
    #[error("participant was removed from the room")]
    ServerParticipantRemoved,

    /// `RoomService.DeleteRoom` was called.
    #[error("room was deleted")]
    ServerRoomDeleted,

    /// The client attempted to resume a session the server has no record
    /// of.
    #[error("server state mismatch on resume")]
    ServerStateMismatch,

    /// The client was unable to connect fully.
    #[error("join failed: {0}")]
    ServerJoinFailure(String),

    /// Cloud-only: the server requested migration elsewhere.
    #[error("server requested migration")]
    ServerMigration,

    /// The signal websocket was closed unexpectedly.
    #[error("signal channel closed")]
    ServerSignalClose,

    /// The room was closed because all standard/ingress participants left.
    #[error("room was closed")]
    ServerRoomClosed,

    /// The target user was unavailable (SIP/dispatch scenarios).
    #[error("user unavailable")]
    ServerUserUnavailable,

    /// The target user rejected the call.
    #[error("user rejected")]
    ServerUserRejected,

    /// A SIP trunk failure occurred.
    #[error("SIP trunk failure")]
    ServerSipTrunkFailure,

    /// A sender- or receiver-side `FrameCryptor` could not be constructed
    /// for an encrypted track (`onTrackCryptoError(CryptorCreationFailure)`).
    #[error("cryptor creation failed: {0}")]
    CryptorCreationFailure(String),
}

impl SessionError {
    /// Translates a server [`DisconnectReason`] into a [`SessionError`],
    /// per §7's 1:1 mapping. Returns `None` for `UnknownReason`, which is
    /// not an error.
    #[must_use]
    pub fn from_disconnect_reason(reason: DisconnectReason) -> Option<Self> {
        Some(match reason {
            DisconnectReason::UnknownReason => return None,
            DisconnectReason::ClientInitiated => return None,
            DisconnectReason::DuplicateIdentity => Self::ServerDuplicateIdentity,
            DisconnectReason::ServerShutdown => Self::ServerShutdown,
            DisconnectReason::ParticipantRemoved => Self::ServerParticipantRemoved,
            DisconnectReason::RoomDeleted => Self::ServerRoomDeleted,
            DisconnectReason::StateMismatch => Self::ServerStateMismatch,
            DisconnectReason::JoinFailure => {
                Self::ServerJoinFailure(String::new())
            }
            DisconnectReason::Migration => Self::ServerMigration,
            DisconnectReason::SignalClose => Self::ServerSignalClose,
            DisconnectReason::RoomClosed => Self::ServerRoomClosed,
            DisconnectReason::UserUnavailable => Self::ServerUserUnavailable,
            DisconnectReason::UserRejected => Self::ServerUserRejected,
            DisconnectReason::SipTrunkFailure => Self::ServerSipTrunkFailure,
        })
    }
}

/// Errors from decoding a single inbound signal frame. Recovered locally:
/// callers emit [`crate::engine::SessionEvent::ResponseParseError`] and
/// keep the channel open.
#[derive(Debug, Clone, thiserror::Error)]
#[error("failed to parse inbound signal message: {0}")]
pub struct ParseError(pub String);

/// Errors from a [`crate::signal::SignalChannel`] send/connect operation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// The underlying channel refused to open.
    #[error("failed to open signal channel: {0}")]
    ConnectFailed(String),

    /// A send was attempted while the channel was not in the `Connected`
    /// state.
    #[error("signal channel is not open")]
    NotConnected,

    /// The underlying channel reported a send failure.
    #[error("failed to send on signal channel: {0}")]
    SendFailed(String),
}

pub type Result<T, E = SessionError> = std::result::Result<T, E>;
