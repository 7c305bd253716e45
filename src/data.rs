//! Data-channel catalogue and user-packet/chat dispatch (SPEC_FULL §4.6).
//!
//! Grounded on `original_source/src/DataChannelsStorage.h`: a label-keyed
//! catalogue of local and remote channels, added/removed as the
//! transport layer reports them.

use std::collections::HashMap;

use crate::model::DataChannelInfo;
use crate::signal::DataPacketKind;

/// Well-known label for the publisher's reliable data channel
/// (SPEC_FULL §4.2: "labels are well-known constants").
pub const RELIABLE_DATA_CHANNEL_LABEL: &str = "_reliable";
/// Well-known label for the publisher's lossy (unordered, unreliable)
/// data channel.
pub const LOSSY_DATA_CHANNEL_LABEL: &str = "_lossy";

/// Picks the well-known local channel label for a send's reliability.
#[must_use]
pub fn label_for(reliable: bool) -> &'static str {
    if reliable {
        RELIABLE_DATA_CHANNEL_LABEL
    } else {
        LOSSY_DATA_CHANNEL_LABEL
    }
}

/// Tracks every data channel the two transports have opened, local and
/// remote, keyed by label.
#[derive(Debug, Default)]
pub struct DataChannelsStorage {
    channels: HashMap<String, DataChannelInfo>,
}

impl DataChannelsStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a channel. Grounded on `DataChannelsStorage::add`: keyed
    /// by label, overwriting any prior entry with the same label.
    pub fn add(&mut self, label: impl Into<String>, local: bool) {
        let label = label.into();
        self.channels.insert(label.clone(), DataChannelInfo { label, local });
    }

    /// Removes a channel by label. Returns whether one was present.
    pub fn remove(&mut self, label: &str) -> bool {
        self.channels.remove(label).is_some()
    }

    #[must_use]
    pub fn get(&self, label: &str) -> Option<&DataChannelInfo> {
        self.channels.get(label)
    }

    /// Whether a channel with this label is currently open. Used at send
    /// time to decide whether a user packet/chat message can go out
    /// (SPEC_FULL §4.6: "Return false if the channel is not open.").
    #[must_use]
    pub fn is_open(&self, label: &str) -> bool {
        self.channels.contains_key(label)
    }

    #[must_use]
    pub fn local_count(&self) -> usize {
        self.channels.values().filter(|c| c.local).count()
    }

    #[must_use]
    pub fn remote_count(&self) -> usize {
        self.channels.values().filter(|c| !c.local).count()
    }

    pub fn clear(&mut self) {
        self.channels.clear();
    }
}

/// An inbound user data packet, dispatched to the embedder with the
/// sender's participant sid attached.
#[derive(Debug, Clone, PartialEq)]
pub struct UserPacket {
    pub sender_sid: String,
    pub payload: Vec<u8>,
    pub kind: DataPacketKind,
    pub destination_identities: Vec<String>,
}

/// An inbound chat message, kept distinct from a raw [`UserPacket`]
/// since the wire protocol carries it as its own message kind
/// (SPEC_FULL §6).
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub sender_sid: String,
    pub message: String,
    pub destination_identities: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_overwrites_same_label() {
        let mut storage = DataChannelsStorage::new();
        storage.add("lossy", true);
        storage.add("lossy", false);
        assert_eq!(storage.local_count(), 0);
        assert_eq!(storage.remote_count(), 1);
    }

    #[test]
    fn remove_reports_presence() {
        let mut storage = DataChannelsStorage::new();
        assert!(!storage.remove("reliable"));
        storage.add("reliable", true);
        assert!(storage.remove("reliable"));
    }

    #[test]
    fn is_open_reflects_channel_presence() {
        let mut storage = DataChannelsStorage::new();
        assert!(!storage.is_open(RELIABLE_DATA_CHANNEL_LABEL));
        storage.add(RELIABLE_DATA_CHANNEL_LABEL, true);
        assert!(storage.is_open(RELIABLE_DATA_CHANNEL_LABEL));
        assert!(!storage.is_open(LOSSY_DATA_CHANNEL_LABEL));
    }

    #[test]
    fn label_for_picks_well_known_constant() {
        assert_eq!(label_for(true), RELIABLE_DATA_CHANNEL_LABEL);
        assert_eq!(label_for(false), LOSSY_DATA_CHANNEL_LABEL);
    }
}
