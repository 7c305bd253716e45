//! Participant and track model shared by [`local`] and [`remote`]
//! (SPEC_FULL §4.4/§4.5).

pub mod local;
pub mod remote;

pub use local::{LocalParticipant, LocalTrack};
pub use remote::{RemoteParticipants, RemoteTrack};

use crate::model::{EncryptionType, TrackSource, TrackType};

/// Which track a lookup-by-hint call should prefer when both an audio
/// and a video track exist, grounded on
/// `original_source/src/LocalParticipant.cpp`'s `track(id, cid, hint)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackTypeHint {
    Audio,
    Video,
    Any,
}

/// Common fields every bound track (local or remote) carries.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackHandle {
    pub sid: String,
    pub kind: TrackType,
    pub source: TrackSource,
    pub muted: bool,
    pub encryption: EncryptionType,
}
