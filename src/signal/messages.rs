//! Typed signaling request/response payloads (SPEC_FULL §6).
//!
//! The byte-level codec is out of scope (see [`super::SignalCodec`]); this
//! module only defines the values a codec encodes and decodes.

use serde::{Deserialize, Serialize};

use crate::model::{
    ClientConfiguration, DisconnectReason, JoinResponse, LeaveRequestAction, ParticipantInfo,
    ReconnectResponse, RoomInfo, RoomMovedResponse, SimulateScenario, TrackInfo, VideoLayer,
};
use crate::options::ClientInfo;

/// An ICE candidate gathered locally, destined for the named peer target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrickleRequest {
    pub candidate: String,
    pub target: SignalTarget,
}

/// Which of the two peer connections a trickle candidate or SDP belongs
/// to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalTarget {
    Publisher,
    Subscriber,
}

/// Messages the client sends to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ClientMessage {
    Join {
        token: String,
        client_info: ClientInfo,
        auto_subscribe: bool,
    },
    Offer {
        sdp: String,
    },
    Answer {
        sdp: String,
    },
    Trickle(TrickleRequest),
    AddTrack {
        cid: String,
        info: TrackInfo,
    },
    MuteTrack {
        sid: String,
        muted: bool,
    },
    UpdateSubscription {
        track_sids: Vec<String>,
        subscribe: bool,
    },
    Leave {
        reason: DisconnectReason,
        action: LeaveRequestAction,
    },
    Ping {
        timestamp_unix: i64,
    },
    UpdateLocalMetadata {
        metadata: String,
        name: String,
    },
    SendData {
        destination_sids: Vec<String>,
        destination_identities: Vec<String>,
        topic: Option<String>,
        kind: DataPacketKind,
        payload: Vec<u8>,
    },
    /// Outbound chat message (SPEC_FULL §4.6 `sendChatMessage`), distinct
    /// from a raw user packet since the server tracks edit/retraction
    /// semantics (`deleted`/`generated`) for it.
    SendChatMessage {
        message: String,
        deleted: bool,
        generated: bool,
        destination_identities: Vec<String>,
    },
    /// Re-synchronizes server-side subscription/publish state after a
    /// resume, carrying the client's own view of what it's currently
    /// subscribed to and publishing (SPEC_FULL §4.1 `sendSyncState`).
    SyncState {
        subscribed_track_sids: Vec<String>,
        published_track_sids: Vec<String>,
        auto_subscribe: bool,
    },
    /// Requests a client-validation network/server condition
    /// (SPEC_FULL §4.1 `sendSimulate`, §9's `SimulateScenario` ADT).
    Simulate(SimulateScenario),
    /// Per-track subscriber-side settings: pause delivery or switch the
    /// preferred simulcast/SVC quality (SPEC_FULL §6 `UpdateTrackSettings`).
    UpdateTrackSettings {
        track_sid: String,
        disabled: bool,
        quality: Option<crate::model::VideoQuality>,
    },
    /// Publishes a fresh set of simulcast/SVC layers for one of the
    /// local video tracks (SPEC_FULL §6 `UpdateVideoLayers`).
    UpdateVideoLayers {
        track_sid: String,
        layers: Vec<VideoLayer>,
    },
    /// Grants or revokes which remote participants may subscribe to the
    /// local participant's tracks (SPEC_FULL §6 `SubscriptionPermission`).
    SubscriptionPermission {
        all_participants: bool,
        participant_identities: Vec<String>,
    },
    /// Re-sends audio processing toggles for an already-published audio
    /// track (SPEC_FULL §4.3.1 `UpdateLocalAudioTrack`, §6).
    UpdateLocalAudioTrack {
        sid: String,
        features: Vec<String>,
    },
}

/// Delivery semantics for an outbound data packet (SPEC_FULL §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataPacketKind {
    Reliable,
    Lossy,
}

/// Messages the server sends to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ServerMessage {
    Join(JoinResponse),
    Reconnect(ReconnectResponse),
    RoomMoved(RoomMovedResponse),
    Answer {
        sdp: String,
    },
    Offer {
        sdp: String,
    },
    Trickle(TrickleRequest),
    ParticipantUpdate {
        participants: Vec<ParticipantInfo>,
    },
    TrackPublished {
        cid: String,
        track: TrackInfo,
    },
    TrackUnpublished {
        track_sid: String,
    },
    MuteTrack {
        sid: String,
        muted: bool,
    },
    SpeakersChanged {
        speaker_sids: Vec<String>,
    },
    ConnectionQuality {
        sid: String,
        quality: ConnectionQuality,
    },
    RoomUpdate(RoomInfo),
    ClientConfigurationUpdate(ClientConfiguration),
    Leave {
        reason: DisconnectReason,
        action: LeaveRequestAction,
    },
    Pong {
        timestamp_unix: i64,
    },
    RefreshToken {
        token: String,
    },
    UserPacket {
        sender_sid: String,
        payload: Vec<u8>,
        destination_identities: Vec<String>,
    },
    ChatMessage {
        sender_sid: String,
        message: String,
        destination_identities: Vec<String>,
    },
    /// Per-track stream health (`active`/`paused`), informational
    /// (SPEC_FULL §4.3.1 `onStreamStateUpdate`).
    StreamStateUpdate {
        track_sid: String,
        active: bool,
    },
    /// Server-chosen simulcast/SVC quality for a subscribed track,
    /// informational (SPEC_FULL §4.3.1 `onSubscribedQualityUpdate`).
    SubscribedQualityUpdate {
        track_sid: String,
        quality: crate::model::VideoQuality,
    },
    /// The server's current view of who may subscribe to the local
    /// participant's tracks, informational (SPEC_FULL §4.3.1
    /// `onSubscriptionPermission`).
    SubscriptionPermissionUpdate {
        track_sid: String,
        allowed: bool,
    },
    /// Acknowledges that a subscription request took effect for one
    /// track, informational (SPEC_FULL §4.3.1 `onTrackSubscribed`).
    TrackSubscribed {
        track_sid: String,
    },
    /// Generic correlated response to a prior client request, informational
    /// (SPEC_FULL §4.3.1 `onRequestResponse`).
    RequestResponse {
        request_id: u32,
        reason: String,
    },
    /// Correlated response to a `UpdateSubscription` request, informational
    /// (SPEC_FULL §4.3.1 `onSubscriptionResponse`).
    SubscriptionResponse {
        track_sid: String,
        err: String,
    },
}

/// Per-participant connection-quality estimate, as reported by the SFU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionQuality {
    Poor,
    Good,
    Excellent,
    Unknown,
}
