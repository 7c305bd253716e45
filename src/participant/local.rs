//! Local participant and local track bookkeeping (SPEC_FULL §4.4).
//!
//! Grounded on `original_source/src/LocalParticipant.cpp`: `setInfo`'s
//! per-field diffing, `track(id, cid, hint)`'s hint-or-fallback lookup,
//! and microphone/camera add/remove returning the removed track.

use crate::model::{EncryptionType, ParticipantInfo, TrackCid, TrackSource, TrackType};
use crate::signal::ConnectionQuality;
use super::TrackTypeHint;

/// A track the local process has published or is in the process of
/// publishing.
///
/// Before the SFU acknowledges a publish, a track is identified only by
/// its client-generated [`TrackCid`]; `sid` is filled in once the
/// `TrackPublished` response arrives (SPEC_FULL §3, invariant: a track's
/// `cid` never changes across that transition).
#[derive(Debug, Clone, PartialEq)]
pub struct LocalTrack {
    pub cid: TrackCid,
    pub sid: Option<String>,
    pub kind: TrackType,
    pub source: TrackSource,
    pub muted: bool,
    pub encryption: EncryptionType,
    /// Audio processing toggles re-sent via `UpdateLocalAudioTrack` once
    /// published, when non-empty (SPEC_FULL §4.3.1). Always empty for
    /// video tracks.
    pub audio_features: Vec<String>,
    /// Whether a transport-level sender has been attached for this track
    /// yet (`onLocalTrackAdded` step 3: notify the local track that media
    /// is attached, so mute requests take effect immediately).
    pub media_attached: bool,
}

impl LocalTrack {
    #[must_use]
    pub fn new(kind: TrackType, source: TrackSource, encryption: EncryptionType) -> Self {
        Self {
            cid: TrackCid::generate(),
            sid: None,
            kind,
            source,
            muted: false,
            encryption,
            audio_features: Vec::new(),
            media_attached: false,
        }
    }

    #[must_use]
    pub fn is_published(&self) -> bool {
        self.sid.is_some()
    }
}

/// This process's own participant record: the tracks it has published,
/// plus the server-reported identity fields.
#[derive(Debug, Clone, Default)]
pub struct LocalParticipant {
    pub sid: String,
    pub identity: String,
    pub name: String,
    pub metadata: String,
    pub is_speaking: bool,
    pub quality: Option<ConnectionQuality>,
    tracks: Vec<LocalTrack>,
}

impl LocalParticipant {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a not-yet-published microphone track, returning its freshly
    /// generated `cid`. Grounded on `LocalParticipant::addAudioTrack(device,
    /// encryption)`.
    pub fn add_microphone_track(&mut self, encryption: EncryptionType) -> TrackCid {
        let track = LocalTrack::new(TrackType::Audio, TrackSource::Microphone, encryption);
        let cid = track.cid.clone();
        self.tracks.push(track);
        cid
    }

    /// Adds a not-yet-published camera track, returning its freshly
    /// generated `cid`.
    pub fn add_camera_track(&mut self, encryption: EncryptionType) -> TrackCid {
        let track = LocalTrack::new(TrackType::Video, TrackSource::Camera, encryption);
        let cid = track.cid.clone();
        self.tracks.push(track);
        cid
    }

    /// Marks that a transport-level sender is now attached to the track,
    /// so a pending `set_muted` takes effect immediately rather than
    /// waiting for `TrackPublished` reconciliation.
    pub fn mark_media_attached(&mut self, cid: &TrackCid) {
        if let Some(track) = self.tracks.iter_mut().find(|t| &t.cid == cid) {
            track.media_attached = true;
        }
    }

    /// Removes and returns the audio track identified by `cid`, if any.
    /// Grounded on `LocalParticipant::removeAudioTrack(track)`: removal is
    /// by identity, not "whichever track happens to be first".
    pub fn remove_audio_track(&mut self, cid: &TrackCid) -> Option<LocalTrack> {
        let index = self.tracks.iter().position(|t| &t.cid == cid && t.kind == TrackType::Audio)?;
        Some(self.tracks.remove(index))
    }

    /// Removes and returns the video track identified by `cid`, if any.
    pub fn remove_video_track(&mut self, cid: &TrackCid) -> Option<LocalTrack> {
        let index = self.tracks.iter().position(|t| &t.cid == cid && t.kind == TrackType::Video)?;
        Some(self.tracks.remove(index))
    }

    /// Removes and returns the track whose server-assigned `sid` matches,
    /// regardless of kind. Used by `TrackUnpublished` handling, where the
    /// server identifies the track by `sid`, not by the client's `cid`.
    pub fn remove_track_by_sid(&mut self, sid: &str) -> Option<LocalTrack> {
        let index = self.tracks.iter().position(|t| t.sid.as_deref() == Some(sid))?;
        Some(self.tracks.remove(index))
    }

    #[must_use]
    pub fn audio_track(&self, index: usize) -> Option<&LocalTrack> {
        self.tracks.iter().filter(|t| t.kind == TrackType::Audio).nth(index)
    }

    #[must_use]
    pub fn video_track(&self, index: usize) -> Option<&LocalTrack> {
        self.tracks.iter().filter(|t| t.kind == TrackType::Video).nth(index)
    }

    #[must_use]
    pub fn tracks(&self) -> &[LocalTrack] {
        &self.tracks
    }

    /// Looks up a track by `sid` or `cid`, honoring the hint when both an
    /// audio and a video candidate match (grounded on `LocalParticipant::track`'s
    /// hint-or-audio-then-video fallback).
    #[must_use]
    pub fn track(&self, sid: Option<&str>, cid: Option<&TrackCid>, hint: TrackTypeHint) -> Option<&LocalTrack> {
        let matches: Vec<&LocalTrack> = self
            .tracks
            .iter()
            .filter(|t| {
                (sid.is_some() && t.sid.as_deref() == sid) || (cid.is_some() && Some(&t.cid) == cid)
            })
            .collect();
        match hint {
            TrackTypeHint::Audio => matches.iter().copied().find(|t| t.kind == TrackType::Audio),
            TrackTypeHint::Video => matches.iter().copied().find(|t| t.kind == TrackType::Video),
            TrackTypeHint::Any => matches
                .iter()
                .copied()
                .find(|t| t.kind == TrackType::Audio)
                .or_else(|| matches.first().copied()),
        }
    }

    /// Marks the track with the given `cid` as acknowledged by the
    /// server, attaching its assigned `sid`.
    pub fn mark_published(&mut self, cid: &TrackCid, sid: String) {
        if let Some(track) = self.tracks.iter_mut().find(|t| &t.cid == cid) {
            track.sid = Some(sid);
        }
    }

    /// Flips the local `muted` bit on the track identified by `cid`.
    /// Returns the track's `sid` when it has already been published, so
    /// the caller can request the server-side mute state to converge
    /// immediately rather than waiting for `TrackPublished` reconciliation.
    pub fn set_muted(&mut self, cid: &TrackCid, muted: bool) -> Option<Option<String>> {
        let track = self.tracks.iter_mut().find(|t| &t.cid == cid)?;
        track.muted = muted;
        Some(track.sid.clone())
    }

    /// Reconciles this participant's identity fields against a fresh
    /// `ParticipantInfo`, returning whether anything actually changed.
    /// Grounded on `LocalParticipant::setInfo`'s per-field `exchangeVal`
    /// diffing.
    pub fn set_info(&mut self, info: &ParticipantInfo) -> bool {
        let mut changed = false;
        if self.sid != info.sid {
            self.sid = info.sid.clone();
            changed = true;
        }
        if self.identity != info.identity {
            self.identity = info.identity.clone();
            changed = true;
        }
        if self.name != info.name {
            self.name = info.name.clone();
            changed = true;
        }
        if self.metadata != info.metadata {
            self.metadata = info.metadata.clone();
            changed = true;
        }
        changed
    }

    /// Participant-level half of the speaker/quality double fan-out
    /// (SPEC_FULL §4): records whether this process's own sid is in the
    /// server's current speaker set.
    pub fn set_speaking(&mut self, speaker_sids: &[String]) {
        self.is_speaking = speaker_sids.iter().any(|sid| sid == &self.sid);
    }

    pub fn set_quality(&mut self, quality: ConnectionQuality) {
        self.quality = Some(quality);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_info_reports_change_only_when_fields_differ() {
        let mut participant = LocalParticipant::new();
        let info = ParticipantInfo {
            sid: "PA_1".into(),
            identity: "alice".into(),
            state: crate::model::ParticipantState::Joined,
            name: "Alice".into(),
            is_publisher: true,
            ..Default::default()
        };
        assert!(participant.set_info(&info));
        assert!(!participant.set_info(&info));
    }

    #[test]
    fn track_lookup_falls_back_audio_then_video() {
        let mut participant = LocalParticipant::new();
        let video_cid = participant.add_camera_track(EncryptionType::None);
        let found = participant.track(None, Some(&video_cid), TrackTypeHint::Any);
        assert_eq!(found.map(|t| t.kind), Some(TrackType::Video));
    }

    #[test]
    fn remove_audio_track_returns_removed_track() {
        let mut participant = LocalParticipant::new();
        let cid = participant.add_microphone_track(EncryptionType::None);
        let removed = participant.remove_audio_track(&cid);
        assert!(removed.is_some());
        assert!(participant.remove_audio_track(&cid).is_none());
    }

    #[test]
    fn remove_track_by_sid_ignores_kind() {
        let mut participant = LocalParticipant::new();
        let cid = participant.add_camera_track(EncryptionType::None);
        participant.mark_published(&cid, "TR_1".into());
        let removed = participant.remove_track_by_sid("TR_1");
        assert_eq!(removed.map(|t| t.cid), Some(cid));
    }

    #[test]
    fn set_muted_reports_sid_only_once_published() {
        let mut participant = LocalParticipant::new();
        let cid = participant.add_microphone_track(EncryptionType::None);
        assert_eq!(participant.set_muted(&cid, true), Some(None));
        assert!(participant.track(None, Some(&cid), TrackTypeHint::Audio).unwrap().muted);
        participant.mark_published(&cid, "TR_1".into());
        assert_eq!(participant.set_muted(&cid, false), Some(Some("TR_1".into())));
    }
}
