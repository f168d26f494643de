//! Security envelope: monotonic-nonce HMAC-SHA256 anti-replay sealing
//! (§4.7).
//!
//! Mirrors the original `SecurityLayer` (`PIO/ECOWATT/src/application/
//! security.cpp`): nonce persisted before the sealed envelope is ever
//! returned, HMAC computed over `nonce(be32) || payload`, payload
//! base64-encoded alongside the hex MAC.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::SecurityError;
use crate::modbus::hex;
use crate::ports::{kv, KeyValueStore};

const NONCE_KEY: &str = "security/nonce";

/// The sealed wire envelope returned by [`SecurityEnvelope::seal`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedEnvelope {
    pub nonce: u64,
    pub payload: String,
    pub mac: String,
    pub encrypted: bool,
}

/// HMAC-SHA256 sealing with a persisted, strictly-monotonic nonce.
///
/// Owns the 32-byte PSK and the in-memory mirror of the nonce; the
/// durable copy lives in [`KeyValueStore`] under `security/nonce`.
pub struct SecurityEnvelope {
    psk: [u8; 32],
    nonce: u64,
    baseline: u64,
}

impl SecurityEnvelope {
    /// Load (or initialize) the envelope's nonce from `store`.
    #[must_use]
    pub fn new(psk: [u8; 32], baseline: u64, store: &dyn KeyValueStore) -> Self {
        let nonce = kv::get_u64(store, NONCE_KEY).unwrap_or(baseline);
        Self { psk, nonce, baseline }
    }

    /// The next nonce a successful `seal` would consume.
    #[must_use]
    pub fn current_nonce(&self) -> u64 {
        self.nonce
    }

    /// Explicitly overwrite the nonce in memory and in the store.
    pub fn set_nonce(&mut self, value: u64, store: &mut dyn KeyValueStore) {
        self.nonce = value;
        kv::set_u64(store, NONCE_KEY, value);
    }

    /// Seal `payload` into the wire envelope of §4.7.
    ///
    /// On success the nonce has already been incremented and durably
    /// persisted — the caller may crash immediately afterward without
    /// risking a replayed nonce on restart. On any failure the nonce is
    /// left untouched.
    pub fn seal(
        &mut self,
        payload: &[u8],
        store: &mut dyn KeyValueStore,
    ) -> Result<SealedEnvelope, SecurityError> {
        if self.psk == [0u8; 32] {
            return Err(SecurityError::KeyUninitialized);
        }

        let next_nonce = self.nonce + 1;
        let nonce_bytes = (next_nonce as u32).to_be_bytes();

        let mut signed = Vec::with_capacity(4 + payload.len());
        signed.extend_from_slice(&nonce_bytes);
        signed.extend_from_slice(payload);
        let mac = hmac_sha256::HMAC::mac(&signed, self.psk);

        let encoded_payload = BASE64.encode(payload);
        let mac_hex = hex::encode_lower(&mac);

        // Persist before returning — a restart must never see a nonce
        // that was already issued (§4.7, §5).
        kv::set_u64(store, NONCE_KEY, next_nonce);
        self.nonce = next_nonce;

        Ok(SealedEnvelope {
            nonce: next_nonce,
            payload: encoded_payload,
            mac: mac_hex,
            encrypted: false,
        })
    }

    /// Recompute the HMAC for `nonce || payload` and compare it against
    /// `mac_hex` (lowercase hex) using the crate's constant-time
    /// comparison. Not used on the upload path (the device only seals),
    /// but exercised by tests and available for an inbound-verification
    /// collaborator (diagnostics acks, command verification).
    #[must_use]
    pub fn verify(&self, nonce: u32, payload: &[u8], mac_hex: &str) -> bool {
        let Some(expected) = hex::decode(mac_hex) else {
            return false;
        };
        if expected.len() != 32 {
            return false;
        }
        let mut signed = Vec::with_capacity(4 + payload.len());
        signed.extend_from_slice(&nonce.to_be_bytes());
        signed.extend_from_slice(payload);
        let mut expected_arr = [0u8; 32];
        expected_arr.copy_from_slice(&expected);
        hmac_sha256::HMAC::verify(&signed, self.psk, &expected_arr)
    }

    #[must_use]
    pub fn baseline(&self) -> u64 {
        self.baseline
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;

    struct MemStore(RefCell<HashMap<String, Vec<u8>>>);

    impl MemStore {
        fn new() -> Self {
            Self(RefCell::new(HashMap::new()))
        }
    }

    impl KeyValueStore for MemStore {
        fn get(&self, key: &str) -> Option<Vec<u8>> {
            self.0.borrow().get(key).cloned()
        }
        fn set(&mut self, key: &str, value: &[u8]) {
            self.0.borrow_mut().insert(key.to_string(), value.to_vec());
        }
        fn remove(&mut self, key: &str) {
            self.0.borrow_mut().remove(key);
        }
    }

    fn psk() -> [u8; 32] {
        [0x2bu8; 32]
    }

    #[test]
    fn seal_starts_at_baseline_plus_one() {
        let store = MemStore::new();
        let mut env = SecurityEnvelope::new(psk(), 10_000, &store);
        let mut store = store;
        let sealed = env.seal(b"hello", &mut store).unwrap();
        assert_eq!(sealed.nonce, 10_001);
    }

    #[test]
    fn nonce_persists_across_reinit() {
        let mut store = MemStore::new();
        let mut env = SecurityEnvelope::new(psk(), 10_000, &store);
        for _ in 0..3 {
            env.seal(b"x", &mut store).unwrap();
        }
        assert_eq!(kv::get_u64(&store, NONCE_KEY), Some(10_003));

        let mut env2 = SecurityEnvelope::new(psk(), 10_000, &store);
        let sealed = env2.seal(b"y", &mut store).unwrap();
        assert_eq!(sealed.nonce, 10_004);
    }

    #[test]
    fn nonce_not_incremented_on_failure() {
        let mut store = MemStore::new();
        let mut env = SecurityEnvelope::new([0u8; 32], 10_000, &store);
        assert_eq!(env.seal(b"x", &mut store), Err(SecurityError::KeyUninitialized));
        assert_eq!(env.current_nonce(), 10_000);
    }

    #[test]
    fn seal_then_verify_round_trip() {
        let mut store = MemStore::new();
        let mut env = SecurityEnvelope::new(psk(), 10_000, &store);
        let sealed = env.seal(b"payload-bytes", &mut store).unwrap();
        assert!(env.verify(sealed.nonce as u32, b"payload-bytes", &sealed.mac));
        assert!(!env.verify(sealed.nonce as u32, b"tampered", &sealed.mac));
    }

    #[test]
    fn set_nonce_writes_through() {
        let mut store = MemStore::new();
        let mut env = SecurityEnvelope::new(psk(), 10_000, &store);
        env.set_nonce(99_999, &mut store);
        assert_eq!(kv::get_u64(&store, NONCE_KEY), Some(99_999));
        assert_eq!(env.current_nonce(), 99_999);
    }

    proptest::proptest! {
        #[test]
        fn nonces_are_strictly_increasing(n in 1usize..20) {
            let mut store = MemStore::new();
            let mut env = SecurityEnvelope::new(psk(), 10_000, &store);
            let mut last = env.current_nonce();
            for _ in 0..n {
                let sealed = env.seal(b"data", &mut store).unwrap();
                proptest::prop_assert!(sealed.nonce > last);
                last = sealed.nonce;
            }
        }
    }
}
