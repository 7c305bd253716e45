//! Wire-level and session-level data types shared across modules.
//!
//! Grounded on `original_source/include/livekit/signaling/sfu/*.h` for
//! field shapes, and on the decentraland-bevy-explorer LiveKit client for
//! idiomatic Rust enum naming (`DisconnectReason`, `ConnectionState`).

use std::collections::HashMap;

use bitflags::bitflags;
use derive_more::{Display, From};
use serde::{Deserialize, Serialize};

/// Participant lifecycle state as reported by the SFU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParticipantState {
    Joining,
    Joined,
    Active,
    Disconnected,
}

/// What kind of participant this is, per SPEC_FULL §3's
/// `kind ∈ {Standard, Ingress, Egress, Sip, Agent}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ParticipantKind {
    #[default]
    Standard,
    Ingress,
    Egress,
    Sip,
    Agent,
}

bitflags! {
    /// The subscribe/publish/publish-data bits of `ParticipantInfo.permission`
    /// (SPEC_FULL §3). The allowed track *sources* are a separate list
    /// (`ParticipantInfo::allowed_sources`), not a bit per source, since the
    /// source enum isn't a power-of-two-friendly set.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct ParticipantPermission: u32 {
        const CAN_SUBSCRIBE = 0b001;
        const CAN_PUBLISH = 0b010;
        const CAN_PUBLISH_DATA = 0b100;
    }
}

/// Kind of a track: audio, video, or SFU-internal data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackType {
    Audio,
    Video,
    Data,
}

/// Source hint for a published track (camera vs. screen-share, etc).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackSource {
    Unknown,
    Camera,
    Microphone,
    ScreenShare,
    ScreenShareAudio,
}

/// Why the session was disconnected. Integer values match the SFU wire
/// protocol exactly (see the decentraland-bevy-explorer LiveKit bindings).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum DisconnectReason {
    UnknownReason = 0,
    ClientInitiated = 1,
    DuplicateIdentity = 2,
    ServerShutdown = 3,
    ParticipantRemoved = 4,
    RoomDeleted = 5,
    StateMismatch = 6,
    JoinFailure = 7,
    Migration = 8,
    SignalClose = 9,
    RoomClosed = 10,
    UserUnavailable = 11,
    UserRejected = 12,
    SipTrunkFailure = 13,
}

/// One simulcast/SVC encoding layer of a video track (SPEC_FULL §3).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VideoLayer {
    pub quality: VideoQuality,
    pub width: u32,
    pub height: u32,
    pub bitrate_bps: u32,
    pub ssrc: u32,
}

/// Simulcast layer quality tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VideoQuality {
    Low,
    Medium,
    High,
    Off,
}

/// Per-track metadata as carried in `ParticipantInfo.tracks`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TrackInfo {
    pub sid: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: TrackType,
    pub source: TrackSource,
    pub muted: bool,
    pub width: u32,
    pub height: u32,
    pub simulcast: bool,
    /// Media-section identifier (`a=mid`) once negotiated onto an SDP
    /// media line; absent before the first negotiation round completes.
    pub mid: Option<String>,
    pub mime_type: String,
    pub layers: Vec<VideoLayer>,
    /// Disables RED (redundant audio encoding) for this track.
    pub disable_red: bool,
    pub stereo: bool,
    pub stream: String,
    /// Per-update sequence number; higher always supersedes lower for the
    /// same `sid` (SPEC_FULL §3).
    pub version: u32,
    pub encryption: EncryptionType,
    /// Extra audio processing toggles (e.g. echo cancellation, noise
    /// suppression) re-sent via `UpdateLocalAudioTrack` once the track is
    /// acknowledged, when non-empty (SPEC_FULL §4.3.1).
    pub audio_features: Vec<String>,
}

impl Default for TrackType {
    fn default() -> Self {
        Self::Audio
    }
}

impl Default for TrackSource {
    fn default() -> Self {
        Self::Unknown
    }
}

impl Default for EncryptionType {
    fn default() -> Self {
        Self::None
    }
}

/// E2EE encryption algorithm applied to a track, or none.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EncryptionType {
    None,
    Gcm,
    Custom,
}

/// A participant as reported by the SFU in `join`/`update` responses.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ParticipantInfo {
    pub sid: String,
    pub identity: String,
    pub state: ParticipantState,
    pub tracks: Vec<TrackInfo>,
    pub metadata: String,
    pub name: String,
    /// Arbitrary string key/value pairs, distinct from `metadata` (which
    /// is one opaque blob); SPEC_FULL §3.
    pub attributes: HashMap<String, String>,
    pub kind: ParticipantKind,
    pub permission: ParticipantPermission,
    /// Track sources this participant is allowed to publish, when
    /// `permission` restricts publishing to a subset (empty means
    /// unrestricted).
    pub allowed_sources: Vec<TrackSource>,
    pub region: String,
    pub joined_at_unix: i64,
    /// Per-update sequence number; `(sid, version)` orders updates
    /// (SPEC_FULL §3).
    pub version: u32,
    pub is_publisher: bool,
    /// Set when this entry represents a disconnection notice rather than
    /// a live participant snapshot (mirrors `ParticipantInfo._disconnectReason`
    /// in `original_source/include/rtc/ParticipantInfo.h`).
    pub disconnect_reason: DisconnectReason,
}

impl Default for ParticipantState {
    fn default() -> Self {
        Self::Joining
    }
}

impl Default for DisconnectReason {
    fn default() -> Self {
        Self::UnknownReason
    }
}

/// ICE server description, as handed to the transport layer for both
/// peer connections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    pub username: Option<String>,
    pub credential: Option<String>,
}

/// Whether a `ClientConfiguration` feature is enabled, disabled, or left
/// to the client's own default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClientConfigSetting {
    Unset,
    Enabled,
    Disabled,
}

/// Server-advertised feature configuration, applied when building the
/// peer connection configuration (see `transport::mod::make_configuration`).
///
/// [ADD] per SPEC_FULL §3, grounded on `RTCEngineImpl::makeConfiguration`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfiguration {
    pub force_relay: ClientConfigSetting,
    pub resume: ClientConfigSetting,
    pub reconnect: ClientConfigSetting,
}

impl Default for ClientConfiguration {
    fn default() -> Self {
        Self {
            force_relay: ClientConfigSetting::Unset,
            resume: ClientConfigSetting::Unset,
            reconnect: ClientConfigSetting::Unset,
        }
    }
}

/// Response to the initial `join` request: full room snapshot plus
/// transport configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct JoinResponse {
    pub room: RoomInfo,
    pub local_participant: ParticipantInfo,
    pub other_participants: Vec<ParticipantInfo>,
    pub ice_servers: Vec<IceServer>,
    pub subscriber_primary: bool,
    pub client_configuration: ClientConfiguration,
    pub server_version: String,
    pub ping_interval_secs: u32,
    pub ping_timeout_secs: u32,
    /// When set, the publisher transport (and its data channels) should be
    /// created eagerly rather than on first `addTrack`, so the first
    /// publish incurs no negotiation delay (SPEC_FULL §4.2 "Fast publish").
    pub fast_publish: bool,
    /// Server-Injected-Frame byte trailer: identifies unencrypted frames
    /// server-injected under E2EE, so decryption can be bypassed for them
    /// (SPEC_FULL §3 "SIF trailer", §4.7). Empty means none advertised.
    pub sif_trailer: Vec<u8>,
    /// When the current server isn't available, an alternate URL to retry
    /// the join against; when set, the rest of the fields are largely
    /// empty (`original_source/include/livekit/rtc/JoinResponse.h`).
    pub alternate_url: Option<String>,
}

/// Response to a `reconnect` request. Mirrors `JoinResponse`'s transport
/// payload but carries no participant snapshot.
///
/// [ADD] per SPEC_FULL §3, grounded on
/// `original_source/src/rtc/ReconnectResponse.h`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ReconnectResponse {
    pub ice_servers: Vec<IceServer>,
    pub client_configuration: ClientConfiguration,
}

/// Room-level metadata, updated by `onRoomUpdate`.
///
/// [ADD] per SPEC_FULL §3, grounded on
/// `original_source/include/livekit/signaling/sfu/RoomInfo.h`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RoomInfo {
    pub sid: String,
    pub name: String,
    pub empty_timeout_secs: u32,
    pub departure_timeout_secs: u32,
    pub max_participants: u32,
    pub creation_time_unix: i64,
    pub metadata: String,
    pub num_participants: u32,
    pub num_publishers: u32,
    pub active_recording: bool,
}

/// Notification that the local participant has been moved to a different
/// room, carrying the new room's full snapshot plus a fresh reconnect
/// token (SPEC_FULL §3/§6, grounded on
/// `original_source/include/livekit/signaling/sfu/RoomMovedResponse.h`).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RoomMovedResponse {
    pub room: RoomInfo,
    pub token: String,
    pub local_participant: ParticipantInfo,
    pub other_participants: Vec<ParticipantInfo>,
}

/// A client-requested network/server condition to simulate, for
/// validating reconnect and degraded-network handling
/// (`sendSimulate` in SPEC_FULL §4.1/§9's "model as an algebraic data
/// type" design note). Grounded on
/// `original_source/include/livekit/rtc/SimulateScenario.h`'s tagged
/// union, expressed as a Rust enum instead of a C `Case` discriminant
/// plus an untagged union.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SimulateScenario {
    /// Simulate N seconds of speaker activity.
    SpeakerUpdate(u32),
    /// Simulate this client's local node failing.
    NodeFailure,
    /// Simulate a cloud migration event.
    Migration,
    /// Ask the server to send a `Leave`.
    ServerLeave,
    /// Force ICE candidates onto TCP (or back to the default protocol).
    SwitchCandidateProtocolTcp(bool),
    /// Caps subscriber bandwidth, in bits per second; zero clears the cap.
    SubscriberBandwidthBps(u64),
    /// Disconnects the signal channel while a resume is in flight.
    DisconnectSignalOnResume,
    /// As above, but before the server sends any messages at all.
    DisconnectSignalOnResumeNoMessages,
    /// Forces a full reconnect (not resume) leave request.
    LeaveRequestFullReconnect,
}

/// What a `Leave` message asks the client to do next, per SPEC_FULL §6's
/// `LeaveRequestAction {Disconnect=0, Resume=1, Reconnect=2}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum LeaveRequestAction {
    Disconnect = 0,
    Resume = 1,
    Reconnect = 2,
}

/// Key material for one E2EE key index.
#[derive(Debug, Clone, PartialEq, From)]
pub struct KeyMaterial(pub Vec<u8>);

/// Identifier assigned by the client when publishing a track, echoed back
/// by the SFU in the corresponding `TrackInfo.sid` once acknowledged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Display, From, Serialize, Deserialize)]
pub struct TrackCid(pub String);

impl TrackCid {
    /// Generates a fresh client-side identifier for a not-yet-published
    /// track (SPEC_FULL §4.4).
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

/// A single label-keyed data channel catalogue entry (SPEC_FULL §4.6).
#[derive(Debug, Clone, PartialEq)]
pub struct DataChannelInfo {
    pub label: String,
    pub local: bool,
}

/// High-level connectivity state of the session, observed through a
/// `tokio::sync::watch` channel (SPEC_FULL §5/§9).
///
/// Exactly the eight-value enum SPEC_FULL §4.3 specifies: the first four
/// track the signal channel's own state machine, the last four track the
/// fused publisher/subscriber peer-connection state once a
/// `TransportManager` exists (`engine::state` derives both halves).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    #[default]
    TransportDisconnected,
    TransportConnecting,
    TransportConnected,
    TransportDisconnecting,
    RtcConnecting,
    RtcConnected,
    RtcDisconnected,
    RtcClosed,
}
