//! Per-target ICE candidate buffering (SPEC_FULL §4.2).
//!
//! Grounded on the teacher's `PeerConnection::add_ice_candidate` in
//! `src/peer/mod.rs`: candidates that arrive before the remote
//! description is set are buffered and flushed, in arrival order, once
//! it is.

use std::collections::HashMap;

use crate::signal::SignalTarget;

/// Buffers trickled ICE candidates per target until that target's remote
/// description has been applied.
#[derive(Debug, Default)]
pub struct CandidateBuffer {
    pending: HashMap<SignalTarget, Vec<String>>,
    remote_description_set: HashMap<SignalTarget, bool>,
}

impl CandidateBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `target`'s remote description has now been applied,
    /// and returns every candidate that was buffered for it, in arrival
    /// order, so the caller can apply them immediately.
    pub fn mark_remote_description_set(&mut self, target: SignalTarget) -> Vec<String> {
        self.remote_description_set.insert(target, true);
        self.pending.remove(&target).unwrap_or_default()
    }

    /// Adds a trickled candidate. Returns `Some(candidate)` if the remote
    /// description for `target` is already set (apply immediately),
    /// `None` if it was buffered instead.
    pub fn add(&mut self, target: SignalTarget, candidate: String) -> Option<String> {
        if *self.remote_description_set.get(&target).unwrap_or(&false) {
            Some(candidate)
        } else {
            self.pending.entry(target).or_default().push(candidate);
            None
        }
    }

    /// Resets buffering state for `target`, e.g. on renegotiation restart.
    pub fn reset(&mut self, target: SignalTarget) {
        self.pending.remove(&target);
        self.remote_description_set.remove(&target);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffers_until_remote_description_set() {
        let mut buf = CandidateBuffer::new();
        assert_eq!(buf.add(SignalTarget::Publisher, "a".into()), None);
        assert_eq!(buf.add(SignalTarget::Publisher, "b".into()), None);
        let flushed = buf.mark_remote_description_set(SignalTarget::Publisher);
        assert_eq!(flushed, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(buf.add(SignalTarget::Publisher, "c".into()), Some("c".into()));
    }

    #[test]
    fn targets_are_independent() {
        let mut buf = CandidateBuffer::new();
        buf.mark_remote_description_set(SignalTarget::Publisher);
        assert_eq!(buf.add(SignalTarget::Publisher, "a".into()), Some("a".into()));
        assert_eq!(buf.add(SignalTarget::Subscriber, "b".into()), None);
    }
}
