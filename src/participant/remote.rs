//! Remote participants and the orphan-receiver reconciliation buffer
//! (SPEC_FULL §4.5).
//!
//! Grounded on `original_source/src/RemoteParticipants.cpp` (participant
//! add/remove/update diffing, orphan binding) and
//! `RemoteParticipantImpl.cpp` (per-participant track binding and mute
//! propagation).

use crate::model::{EncryptionType, ParticipantInfo, ParticipantState, TrackSource, TrackType};
use crate::signal::ConnectionQuality;

/// A remote track bound to a participant, or still waiting for one.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteTrack {
    pub sid: String,
    pub kind: TrackType,
    pub source: TrackSource,
    pub muted: bool,
    pub encryption: EncryptionType,
}

#[derive(Debug, Clone)]
struct RemoteParticipant {
    info: ParticipantInfo,
    tracks: Vec<RemoteTrack>,
    is_speaking: bool,
    quality: ConnectionQuality,
}

impl RemoteParticipant {
    fn new(info: ParticipantInfo) -> Self {
        Self { info, tracks: Vec::new(), is_speaking: false, quality: ConnectionQuality::Unknown }
    }

    fn track_type(&self, sid: &str) -> Option<TrackType> {
        self.info.tracks.iter().find(|t| t.sid == sid).map(|t| t.kind)
    }

    fn add_track(&mut self, track: RemoteTrack) {
        if !self.tracks.iter().any(|t| t.sid == track.sid) {
            self.tracks.push(track);
        }
    }

    fn remove_track(&mut self, sid: &str) -> bool {
        let before = self.tracks.len();
        self.tracks.retain(|t| t.sid != sid);
        before != self.tracks.len()
    }

    fn set_remote_mute(&mut self, sid: &str, muted: bool) -> bool {
        if let Some(track) = self.tracks.iter_mut().find(|t| t.sid == sid) {
            if track.muted != muted {
                track.muted = muted;
                return true;
            }
        }
        false
    }
}

/// Events emitted while reconciling the remote participant set.
/// Resolves the spec's Open Question on listener richness in favor of
/// carrying `(track_sid, track_type, encryption)` rather than sid-only,
/// per SPEC_FULL §4.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteParticipantEvent {
    ParticipantAdded(String),
    ParticipantRemoved(String),
    TrackAdded { participant_sid: String, track_sid: String, kind: TrackType, encryption: EncryptionType },
    TrackRemoved { participant_sid: String, track_sid: String },
    TrackMuteChanged { participant_sid: String, track_sid: String, muted: bool },
}

/// Owns every known remote participant plus the orphan-receiver buffer
/// for media that arrived before its owning participant was known.
#[derive(Debug, Default)]
pub struct RemoteParticipants {
    participants: Vec<RemoteParticipant>,
    orphans: Vec<(String, RemoteTrack)>,
}

impl RemoteParticipants {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.participants.len()
    }

    #[must_use]
    pub fn infos(&self) -> Vec<ParticipantInfo> {
        self.participants.iter().map(|p| p.info.clone()).collect()
    }

    fn find_index(&self, sid: &str) -> Option<usize> {
        self.participants.iter().position(|p| p.info.sid == sid)
    }

    /// Replaces the entire participant set from a `join` snapshot.
    /// Grounded on `RemoteParticipants::setInfo`: clears first, skips
    /// participants already `Disconnected`.
    pub fn set_info(&mut self, infos: Vec<ParticipantInfo>) -> Vec<RemoteParticipantEvent> {
        let mut events = self.clear_participants();
        for info in infos {
            if info.state != ParticipantState::Disconnected {
                events.extend(self.add_participant(info));
            }
        }
        events
    }

    /// Diffs an incremental `ParticipantUpdate` against the current set
    /// by `sid`: added/removed/updated, matching
    /// `RemoteParticipants::updateInfo`'s `Seq`-based three-way split.
    pub fn update_info(&mut self, infos: Vec<ParticipantInfo>) -> Vec<RemoteParticipantEvent> {
        let mut events = Vec::new();
        let current_sids: Vec<String> = self.participants.iter().map(|p| p.info.sid.clone()).collect();
        let incoming_sids: Vec<String> = infos.iter().map(|i| i.sid.clone()).collect();

        for info in &infos {
            if !current_sids.contains(&info.sid) {
                events.extend(self.add_participant(info.clone()));
            }
        }
        for sid in &current_sids {
            if !incoming_sids.contains(sid) {
                events.extend(self.remove_participant(sid));
            }
        }
        for info in infos {
            if current_sids.contains(&info.sid) {
                if let Some(index) = self.find_index(&info.sid) {
                    if info.state == ParticipantState::Disconnected {
                        events.extend(self.remove_participant(&info.sid));
                    } else {
                        self.participants[index].info = info;
                    }
                }
            }
        }
        events
    }

    /// Binds an arriving media receiver to its owning participant by
    /// matching `sid` against that participant's published `TrackInfo`
    /// list; if no participant claims it yet, buffers it as an orphan.
    /// Grounded on `RemoteParticipants::addMedia`.
    pub fn add_media(&mut self, sid: String, kind: TrackType, encryption: EncryptionType) -> Vec<RemoteParticipantEvent> {
        let owner = self.participants.iter().position(|p| p.track_type(&sid) == Some(kind));
        match owner {
            Some(index) => {
                let participant_sid = self.participants[index].info.sid.clone();
                self.participants[index].add_track(RemoteTrack {
                    sid: sid.clone(),
                    kind,
                    source: crate::model::TrackSource::Unknown,
                    muted: false,
                    encryption,
                });
                vec![RemoteParticipantEvent::TrackAdded {
                    participant_sid,
                    track_sid: sid,
                    kind,
                    encryption,
                }]
            }
            None => {
                self.orphans.push((
                    sid,
                    RemoteTrack {
                        sid: String::new(),
                        kind,
                        source: crate::model::TrackSource::Unknown,
                        muted: false,
                        encryption,
                    },
                ));
                Vec::new()
            }
        }
    }

    /// Removes a media receiver by `sid`, erasing it from the orphan
    /// buffer if present there, otherwise from whichever participant
    /// owns it.
    pub fn remove_media(&mut self, sid: &str) -> Vec<RemoteParticipantEvent> {
        self.orphans.retain(|(orphan_sid, _)| orphan_sid != sid);
        for participant in &mut self.participants {
            if participant.remove_track(sid) {
                return vec![RemoteParticipantEvent::TrackRemoved {
                    participant_sid: participant.info.sid.clone(),
                    track_sid: sid.to_owned(),
                }];
            }
        }
        Vec::new()
    }

    /// Updates each known participant's `is_speaking` flag from the
    /// server's current speaker set. Grounded on
    /// `RTCEngineImpl::onSpeakersChanged`, which calls
    /// `participant->setSpeakerChanges(...)` on the owning participant in
    /// addition to the session-level dispatch the engine performs itself
    /// (SPEC_FULL §4's resolved Open Question on double fan-out).
    pub fn set_speaking(&mut self, speaker_sids: &[String]) {
        for participant in &mut self.participants {
            participant.is_speaking = speaker_sids.iter().any(|sid| sid == &participant.info.sid);
        }
    }

    #[must_use]
    pub fn is_speaking(&self, sid: &str) -> Option<bool> {
        self.participants.iter().find(|p| p.info.sid == sid).map(|p| p.is_speaking)
    }

    /// Records a per-participant connection-quality update, mirroring the
    /// participant-level half of the same double fan-out.
    pub fn set_quality(&mut self, sid: &str, quality: ConnectionQuality) {
        if let Some(participant) = self.participants.iter_mut().find(|p| p.info.sid == sid) {
            participant.quality = quality;
        }
    }

    #[must_use]
    pub fn quality(&self, sid: &str) -> Option<ConnectionQuality> {
        self.participants.iter().find(|p| p.info.sid == sid).map(|p| p.quality)
    }

    /// Applies a server-reported mute change to the bound track, if any.
    pub fn set_track_mute(&mut self, sid: &str, muted: bool) -> Vec<RemoteParticipantEvent> {
        for participant in &mut self.participants {
            if participant.set_remote_mute(sid, muted) {
                return vec![RemoteParticipantEvent::TrackMuteChanged {
                    participant_sid: participant.info.sid.clone(),
                    track_sid: sid.to_owned(),
                    muted,
                }];
            }
        }
        Vec::new()
    }

    /// Adds one participant, binding any orphaned receivers whose `sid`
    /// matches one of its published tracks before publishing the
    /// `ParticipantAdded` event — grounded on
    /// `RemoteParticipants::addParticipant`.
    fn add_participant(&mut self, info: ParticipantInfo) -> Vec<RemoteParticipantEvent> {
        let mut participant = RemoteParticipant::new(info);
        let mut events = Vec::new();
        let track_sids: Vec<String> = participant.info.tracks.iter().map(|t| t.sid.clone()).collect();
        self.orphans.retain(|(orphan_sid, orphan_track)| {
            if track_sids.contains(orphan_sid) {
                let kind = participant.track_type(orphan_sid).unwrap_or(orphan_track.kind);
                participant.add_track(RemoteTrack {
                    sid: orphan_sid.clone(),
                    kind,
                    source: orphan_track.source,
                    muted: orphan_track.muted,
                    encryption: orphan_track.encryption,
                });
                events.push(RemoteParticipantEvent::TrackAdded {
                    participant_sid: participant.info.sid.clone(),
                    track_sid: orphan_sid.clone(),
                    kind,
                    encryption: orphan_track.encryption,
                });
                false
            } else {
                true
            }
        });
        let sid = participant.info.sid.clone();
        self.participants.push(participant);
        events.push(RemoteParticipantEvent::ParticipantAdded(sid));
        events
    }

    /// Removes a participant by `sid`, erasing any orphan entries for its
    /// published tracks (they belong to a participant that no longer
    /// exists) and emitting `ParticipantRemoved`.
    fn remove_participant(&mut self, sid: &str) -> Vec<RemoteParticipantEvent> {
        let Some(index) = self.find_index(sid) else {
            return Vec::new();
        };
        let participant = self.participants.remove(index);
        let track_sids: Vec<String> = participant.info.tracks.iter().map(|t| t.sid.clone()).collect();
        self.orphans.retain(|(orphan_sid, _)| !track_sids.contains(orphan_sid));
        vec![RemoteParticipantEvent::ParticipantRemoved(sid.to_owned())]
    }

    fn clear_participants(&mut self) -> Vec<RemoteParticipantEvent> {
        let sids: Vec<String> = self.participants.iter().map(|p| p.info.sid.clone()).collect();
        let mut events = Vec::new();
        for sid in sids {
            events.extend(self.remove_participant(&sid));
        }
        self.orphans.clear();
        events
    }

    /// Fully resets, as on session teardown.
    pub fn reset(&mut self) {
        self.participants.clear();
        self.orphans.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TrackInfo;

    fn info(sid: &str, track_sid: &str, kind: TrackType) -> ParticipantInfo {
        ParticipantInfo {
            sid: sid.to_owned(),
            identity: format!("identity-{sid}"),
            state: ParticipantState::Joined,
            tracks: vec![TrackInfo {
                sid: track_sid.to_owned(),
                kind,
                source: TrackSource::Camera,
                ..Default::default()
            }],
            is_publisher: true,
            ..Default::default()
        }
    }

    #[test]
    fn orphan_receiver_binds_once_owning_participant_arrives() {
        let mut remote = RemoteParticipants::new();
        let events = remote.add_media("TR_1".into(), TrackType::Video, EncryptionType::None);
        assert!(events.is_empty());

        let events = remote.set_info(vec![info("PA_1", "TR_1", TrackType::Video)]);
        assert!(events.iter().any(|e| matches!(e, RemoteParticipantEvent::ParticipantAdded(sid) if sid == "PA_1")));
        assert!(events.iter().any(|e| matches!(e, RemoteParticipantEvent::TrackAdded { track_sid, .. } if track_sid == "TR_1")));
    }

    #[test]
    fn removing_participant_clears_its_orphans() {
        let mut remote = RemoteParticipants::new();
        remote.set_info(vec![info("PA_1", "TR_1", TrackType::Audio)]);
        remote.update_info(vec![]);
        assert_eq!(remote.count(), 0);
        // the orphan slot for TR_1 must be gone too, not just the participant
        let events = remote.add_media("TR_1".into(), TrackType::Audio, EncryptionType::None);
        assert!(events.is_empty());
    }

    #[test]
    fn set_speaking_marks_only_listed_participants() {
        let mut remote = RemoteParticipants::new();
        remote.set_info(vec![info("PA_1", "TR_1", TrackType::Audio), info("PA_2", "TR_2", TrackType::Audio)]);
        remote.set_speaking(&["PA_1".to_owned()]);
        assert_eq!(remote.is_speaking("PA_1"), Some(true));
        assert_eq!(remote.is_speaking("PA_2"), Some(false));
        remote.set_speaking(&[]);
        assert_eq!(remote.is_speaking("PA_1"), Some(false));
    }

    #[test]
    fn update_info_diffs_added_removed_updated() {
        let mut remote = RemoteParticipants::new();
        remote.set_info(vec![info("PA_1", "TR_1", TrackType::Audio)]);
        let events = remote.update_info(vec![info("PA_2", "TR_2", TrackType::Video)]);
        assert!(events.contains(&RemoteParticipantEvent::ParticipantRemoved("PA_1".into())));
        assert!(events.contains(&RemoteParticipantEvent::ParticipantAdded("PA_2".into())));
        assert_eq!(remote.count(), 1);
    }
}
