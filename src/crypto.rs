//! End-to-end frame cryptor (SPEC_FULL §4.7).
//!
//! The actual AES-GCM frame transform is an external collaborator (it
//! lives below the media pipeline, which is out of scope); this module
//! owns the key-provider contract and the per-sender/per-receiver
//! cryptor state machine the engine observes.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::SessionError;

/// A key index in `[0, 255]`, matching the on-wire `keyIndex` tag.
pub type KeyIndex = u8;

/// Ratchet-attempt budget used when a [`KeyProvider`]-minted [`FrameCryptor`]
/// has no explicit override.
pub const DEFAULT_MAX_RATCHET_ATTEMPTS: u32 = 3;

/// Maps `(identity, keyIndex)` to key bytes, with an optional
/// room-shared key used when no per-identity key is set.
///
/// Shared-resource policy per SPEC_FULL §5: writes are atomic swaps of an
/// immutable snapshot, so readers on arbitrary threads never observe a
/// partial update.
#[derive(Default)]
pub struct KeyProvider {
    per_identity: RwLock<HashMap<(String, KeyIndex), Vec<u8>>>,
    shared: RwLock<Option<Vec<u8>>>,
    sif_trailer: RwLock<Option<Vec<u8>>>,
}

impl KeyProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_key(&self, identity: impl Into<String>, index: KeyIndex, key: Vec<u8>) {
        self.per_identity
            .write()
            .expect("key provider lock poisoned")
            .insert((identity.into(), index), key);
    }

    /// Sets the room-wide shared key, used when a participant has no key
    /// of its own set.
    pub fn set_shared_key(&self, key: Vec<u8>) {
        *self.shared.write().expect("key provider lock poisoned") = Some(key);
    }

    /// Sets the server-injected-frame trailer (SIF trailer) from the
    /// `JoinResponse`, used to recognize unencrypted server frames and
    /// bypass decryption for them.
    pub fn set_sif_trailer(&self, trailer: Vec<u8>) {
        *self.sif_trailer.write().expect("key provider lock poisoned") = Some(trailer);
    }

    #[must_use]
    pub fn sif_trailer(&self) -> Option<Vec<u8>> {
        self.sif_trailer.read().expect("key provider lock poisoned").clone()
    }

    /// Resolves the key for `(identity, index)`, falling back to the
    /// shared key if no per-identity key is set.
    #[must_use]
    pub fn key_for(&self, identity: &str, index: KeyIndex) -> Option<Vec<u8>> {
        if let Some(key) = self
            .per_identity
            .read()
            .expect("key provider lock poisoned")
            .get(&(identity.to_owned(), index))
        {
            return Some(key.clone());
        }
        self.shared.read().expect("key provider lock poisoned").clone()
    }

    /// Constructs a [`FrameCryptor`] for `(identity, track_id)`, requiring a
    /// key already resolvable for `keyIndex` 0. Attaching a cryptor MUST
    /// succeed before the track it covers is exposed to the embedder, so
    /// callers treat an `Err` here as a hard failure for that track rather
    /// than something to retry inline.
    pub fn create_cryptor(&self, identity: &str, track_id: &str, max_ratchet_attempts: u32) -> Result<FrameCryptor, SessionError> {
        if self.key_for(identity, 0).is_none() {
            return Err(SessionError::CryptorCreationFailure(format!(
                "no key available for identity '{identity}'"
            )));
        }
        Ok(FrameCryptor::new(identity, track_id, max_ratchet_attempts))
    }
}

/// Lifecycle state of one [`FrameCryptor`], mirroring the six states and
/// `InternalError` spelled out in SPEC_FULL §4.7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CryptorState {
    New,
    Ok,
    EncryptionFailure,
    DecryptionFailure,
    MissingKey,
    KeyRatcheted,
    InternalError,
}

/// A per-sender/per-receiver frame cryptor, keyed by `(participant
/// identity, track id)`. Holds only the reconciliation state machine;
/// the byte-level AES-GCM transform is supplied by the media stack.
pub struct FrameCryptor {
    identity: String,
    track_id: String,
    state: RwLock<CryptorState>,
    max_ratchet_attempts: u32,
    ratchet_attempts: RwLock<u32>,
}

impl FrameCryptor {
    #[must_use]
    pub fn new(identity: impl Into<String>, track_id: impl Into<String>, max_ratchet_attempts: u32) -> Self {
        Self {
            identity: identity.into(),
            track_id: track_id.into(),
            state: RwLock::new(CryptorState::New),
            max_ratchet_attempts,
            ratchet_attempts: RwLock::new(0),
        }
    }

    #[must_use]
    pub fn identity(&self) -> &str {
        &self.identity
    }

    #[must_use]
    pub fn track_id(&self) -> &str {
        &self.track_id
    }

    #[must_use]
    pub fn state(&self) -> CryptorState {
        *self.state.read().expect("cryptor lock poisoned")
    }

    fn set_state(&self, state: CryptorState) -> bool {
        let mut guard = self.state.write().expect("cryptor lock poisoned");
        if *guard == state {
            return false;
        }
        *guard = state;
        true
    }

    /// Reports a missing key for the next frame. Requests a ratchet while
    /// under the configured attempt budget; once exhausted, transitions
    /// to `MissingKey` for the observer to see (SPEC_FULL §4.7).
    pub fn on_missing_key(&self) -> CryptorState {
        let mut attempts = self.ratchet_attempts.write().expect("cryptor lock poisoned");
        if *attempts < self.max_ratchet_attempts {
            *attempts += 1;
            self.set_state(CryptorState::KeyRatcheted);
        } else {
            self.set_state(CryptorState::MissingKey);
        }
        self.state()
    }

    /// Records a key successfully resolved and applied, resetting the
    /// ratchet-attempt counter.
    pub fn on_key_resolved(&self) {
        *self.ratchet_attempts.write().expect("cryptor lock poisoned") = 0;
        self.set_state(CryptorState::Ok);
    }

    pub fn on_encryption_failure(&self) {
        self.set_state(CryptorState::EncryptionFailure);
    }

    pub fn on_decryption_failure(&self) {
        self.set_state(CryptorState::DecryptionFailure);
    }

    /// Checks whether a frame trailer matches the known SIF trailer,
    /// meaning decryption should be bypassed for it.
    #[must_use]
    pub fn is_server_injected_frame(trailer: &[u8], sif_trailer: Option<&[u8]>) -> bool {
        sif_trailer.is_some_and(|expected| expected == trailer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_provider_falls_back_to_shared_key() {
        let provider = KeyProvider::new();
        provider.set_shared_key(vec![1, 2, 3]);
        assert_eq!(provider.key_for("alice", 0), Some(vec![1, 2, 3]));
        provider.set_key("alice", 0, vec![9, 9]);
        assert_eq!(provider.key_for("alice", 0), Some(vec![9, 9]));
    }

    #[test]
    fn missing_key_ratchets_then_surfaces() {
        let cryptor = FrameCryptor::new("alice", "TR_1", 1);
        assert_eq!(cryptor.on_missing_key(), CryptorState::KeyRatcheted);
        assert_eq!(cryptor.on_missing_key(), CryptorState::MissingKey);
    }

    #[test]
    fn create_cryptor_fails_without_a_resolvable_key() {
        let provider = KeyProvider::new();
        assert!(provider.create_cryptor("alice", "TR_1", DEFAULT_MAX_RATCHET_ATTEMPTS).is_err());
        provider.set_shared_key(vec![1, 2, 3]);
        let cryptor = provider
            .create_cryptor("alice", "TR_1", DEFAULT_MAX_RATCHET_ATTEMPTS)
            .expect("key now resolvable");
        assert_eq!(cryptor.state(), CryptorState::New);
    }

    #[test]
    fn sif_trailer_recognizes_server_injected_frames() {
        let trailer = vec![0xAB, 0xCD];
        assert!(FrameCryptor::is_server_injected_frame(&trailer, Some(&trailer)));
        assert!(!FrameCryptor::is_server_injected_frame(&trailer, Some(&[0x01])));
        assert!(!FrameCryptor::is_server_injected_frame(&trailer, None));
    }
}
