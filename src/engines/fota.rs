//! FOTA engine: manifest check, streaming download-and-hash, verify,
//! commit, and post-reboot confirmation/rollback (§4.10).
//!
//! Grounded on the original split between `OTA_ESP32` (streaming
//! SHA-256 over chunked reads) and `OTA_ESP32_complex`
//! (`src/security.cpp`'s verify-before-commit discipline and constant-
//! time comparison), consolidated into the single pipeline the spec
//! calls for (§10, "two divergent OTA implementations"). The dual-slot
//! write/boot-flip mechanics follow the teacher's `adapters/nvs.rs`
//! persisted-record idiom: every transition is flushed to
//! [`KeyValueStore`] under `fota/` before it is acted on.

use serde::Deserialize;

use crate::diagnostics::{Diagnostics, Severity};
use crate::error::FotaError;
use crate::ports::{kv, Clock, KeyValueStore, PartitionDevice, Slot, Transport};

const CHUNK_SIZE: usize = 4096;

const KEY_PENDING_VERSION: &str = "fota/pending_version";
const KEY_BOOT_COUNT: &str = "fota/boot_count";
const KEY_CONFIRMED: &str = "fota/confirmed";
const KEY_LAST_GOOD_VERSION: &str = "fota/last_good_version";
const KEY_CONSECUTIVE_ROLLBACKS: &str = "fota/consecutive_rollbacks";
const KEY_REBOOT_REASON: &str = "fota/reboot_reason";
const KEY_FACTORY_RESET_REQUIRED: &str = "fota/factory_reset_required";
const KEY_BOOT_STARTED_AT: &str = "fota/boot_started_at";

/// Firmware manifest served at `/firmware/manifest` (§3, §6).
#[derive(Debug, Clone, Deserialize)]
pub struct Manifest {
    pub version: String,
    pub size: u64,
    pub sha256: String,
    pub hmac: Option<String>,
    pub url: String,
    #[serde(default)]
    pub force_update: bool,
}

/// What a post-reboot check found (§4.10 step 5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootOutcome {
    /// No update was pending; normal boot.
    NoPendingUpdate,
    /// A previously-confirmed update; pending state cleared.
    Confirmed,
    /// A fresh update awaiting `confirm_boot()` within the window.
    AwaitingConfirmation,
    /// Boot count exceeded the limit on this very boot; rolled back
    /// immediately.
    RolledBack,
    /// Three consecutive rollbacks; the device should stop attempting
    /// updates until serviced (SPEC_FULL §B.5).
    FactoryResetRequired,
}

/// Persisted FOTA state as surfaced to diagnostics (SPEC_FULL §B.5).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FotaStatus {
    pub pending_version: Option<String>,
    pub confirmed: bool,
    pub last_good_version: Option<String>,
    pub consecutive_rollbacks: u32,
    pub factory_reset_required: bool,
}

/// Manifest check, streaming verify, commit, and boot-confirmation
/// state machine.
pub struct FotaEngine {
    base_url: String,
    running_version: String,
    signing_key: [u8; 32],
    http_timeout_ms: u32,
    confirmation_window_secs: u64,
    max_boot_attempts: u32,
    max_consecutive_rollbacks: u32,
}

impl FotaEngine {
    #[must_use]
    pub fn new(
        base_url: String,
        running_version: String,
        signing_key: [u8; 32],
        http_timeout_ms: u32,
        confirmation_window_ms: u64,
        max_boot_attempts: u32,
        max_consecutive_rollbacks: u32,
    ) -> Self {
        Self {
            base_url,
            running_version,
            signing_key,
            http_timeout_ms,
            confirmation_window_secs: confirmation_window_ms / 1000,
            max_boot_attempts,
            max_consecutive_rollbacks,
        }
    }

    /// Run one full check/download/verify/commit cycle. Returns `Ok(Some(version))`
    /// on a committed update awaiting reboot, `Ok(None)` if no update was
    /// available, or the failure that aborted the attempt.
    pub fn run(
        &self,
        transport: &mut dyn Transport,
        partition: &mut dyn PartitionDevice,
        kv: &mut dyn KeyValueStore,
        diagnostics: &mut Diagnostics,
        clock: &dyn Clock,
    ) -> Result<Option<String>, FotaError> {
        let Some(manifest) = self.check(transport)? else {
            return Ok(None);
        };

        if let Err(e) = self.download_and_verify(transport, partition, &manifest) {
            let now = clock.monotonic_secs();
            match e {
                FotaError::SizeMismatch | FotaError::ShortRead | FotaError::WriteFailed => {
                    diagnostics.incr_compression_failures(kv);
                }
                FotaError::HashMismatch | FotaError::HmacMismatch => {
                    diagnostics.incr_security_violations(kv);
                }
                _ => diagnostics.incr_upload_failures(kv),
            }
            diagnostics.log_event(now, Severity::Error, "firmware verification failed", 0);
            return Err(e);
        }

        self.commit(partition, kv, &manifest)?;
        Ok(Some(manifest.version))
    }

    /// GET and parse the manifest; decide whether an update should
    /// proceed (§4.10 step 1).
    fn check(&self, transport: &mut dyn Transport) -> Result<Option<Manifest>, FotaError> {
        let url = format!("{}/firmware/manifest", self.base_url);
        let resp = transport
            .get(&url, &[("accept", "application/json")], self.http_timeout_ms)
            .map_err(|_| FotaError::ManifestFetchFailed)?;
        if !(200..300).contains(&resp.status) || resp.body.is_empty() {
            return Err(FotaError::ManifestFetchFailed);
        }
        let manifest: Manifest =
            serde_json::from_slice(&resp.body).map_err(|_| FotaError::ManifestMalformed)?;

        if manifest.force_update || compare_versions(&manifest.version, &self.running_version) == std::cmp::Ordering::Greater {
            Ok(Some(manifest))
        } else {
            Ok(None)
        }
    }

    /// Stream the firmware body into the inactive slot while hashing
    /// it, then verify SHA-256 (and HMAC, if present) before returning
    /// (§4.10 steps 2-3).
    fn download_and_verify(
        &self,
        transport: &mut dyn Transport,
        partition: &mut dyn PartitionDevice,
        manifest: &Manifest,
    ) -> Result<(), FotaError> {
        let inactive = partition.inactive_slot();
        partition
            .erase(inactive)
            .map_err(|_| FotaError::WriteFailed)?;

        let resp = transport
            .get(&manifest.url, &[], self.http_timeout_ms)
            .map_err(|_| FotaError::ShortRead)?;
        if resp.body.len() as u64 != manifest.size {
            let _ = partition.erase(inactive);
            return Err(FotaError::SizeMismatch);
        }

        let mut hasher = hmac_sha256::Hash::new();
        let mut offset = 0u32;
        for chunk in resp.body.chunks(CHUNK_SIZE) {
            hasher.update(chunk);
            if partition.write(inactive, offset, chunk).is_err() {
                let _ = partition.erase(inactive);
                return Err(FotaError::WriteFailed);
            }
            offset += chunk.len() as u32;
        }
        let digest = hasher.finalize();

        let Some(expected) = crate::modbus::hex::decode(&manifest.sha256) else {
            let _ = partition.erase(inactive);
            return Err(FotaError::ManifestMalformed);
        };
        if !constant_time_eq(&digest, &expected) {
            let _ = partition.erase(inactive);
            return Err(FotaError::HashMismatch);
        }

        if let Some(hmac_hex) = &manifest.hmac {
            let Some(expected_hmac) = crate::modbus::hex::decode(hmac_hex) else {
                let _ = partition.erase(inactive);
                return Err(FotaError::HmacMismatch);
            };
            let computed = hmac_sha256::HMAC::mac(&resp.body, self.signing_key);
            if !constant_time_eq(&computed, &expected_hmac) {
                let _ = partition.erase(inactive);
                return Err(FotaError::HmacMismatch);
            }
        }

        Ok(())
    }

    /// Flip the boot pointer and persist the pending-update record
    /// (§4.10 step 4).
    fn commit(
        &self,
        partition: &mut dyn PartitionDevice,
        kv: &mut dyn KeyValueStore,
        manifest: &Manifest,
    ) -> Result<(), FotaError> {
        let inactive = partition.inactive_slot();
        partition
            .set_boot(inactive)
            .map_err(|_| FotaError::BootSetFailed)?;

        kv::set_string(kv, KEY_PENDING_VERSION, &manifest.version);
        kv::set_u32(kv, KEY_BOOT_COUNT, 0);
        kv::set_bool(kv, KEY_CONFIRMED, false);
        kv::set_string(kv, KEY_REBOOT_REASON, "OTA_UPDATE");
        Ok(())
    }

    /// Called once at startup, before any task runs (§4.10 step 5).
    pub fn on_boot(
        &self,
        partition: &mut dyn PartitionDevice,
        kv: &mut dyn KeyValueStore,
        clock: &dyn Clock,
    ) -> BootOutcome {
        let Some(pending) = kv::get_string(kv, KEY_PENDING_VERSION) else {
            return BootOutcome::NoPendingUpdate;
        };
        let _ = pending;

        if kv::get_bool(kv, KEY_FACTORY_RESET_REQUIRED).unwrap_or(false) {
            return BootOutcome::FactoryResetRequired;
        }

        let boot_count = kv::get_u32(kv, KEY_BOOT_COUNT).unwrap_or(0) + 1;
        kv::set_u32(kv, KEY_BOOT_COUNT, boot_count);

        if kv::get_bool(kv, KEY_CONFIRMED).unwrap_or(false) {
            kv.remove(KEY_PENDING_VERSION);
            return BootOutcome::Confirmed;
        }

        if boot_count > self.max_boot_attempts {
            self.rollback(partition, kv);
            return BootOutcome::RolledBack;
        }

        kv::set_u64(kv, KEY_BOOT_STARTED_AT, clock.monotonic_secs());
        BootOutcome::AwaitingConfirmation
    }

    /// The host application calls this after its own stability checks
    /// pass within the confirmation window.
    pub fn confirm_boot(&self, kv: &mut dyn KeyValueStore) {
        kv::set_bool(kv, KEY_CONFIRMED, true);
        kv::set_string(kv, KEY_LAST_GOOD_VERSION, &self.running_version);
        kv::set_u32(kv, KEY_CONSECUTIVE_ROLLBACKS, 0);
    }

    /// Checked periodically by the supervisor while a boot is
    /// unconfirmed; triggers a rollback once the window lapses.
    pub fn poll_confirmation_window(
        &self,
        partition: &mut dyn PartitionDevice,
        kv: &mut dyn KeyValueStore,
        clock: &dyn Clock,
    ) -> BootOutcome {
        if kv::get_string(kv, KEY_PENDING_VERSION).is_none() || kv::get_bool(kv, KEY_CONFIRMED).unwrap_or(false) {
            return BootOutcome::NoPendingUpdate;
        }
        let started_at = kv::get_u64(kv, KEY_BOOT_STARTED_AT).unwrap_or(0);
        let elapsed = clock.monotonic_secs().saturating_sub(started_at);
        if elapsed < self.confirmation_window_secs {
            return BootOutcome::AwaitingConfirmation;
        }
        self.rollback(partition, kv);
        if kv::get_bool(kv, KEY_FACTORY_RESET_REQUIRED).unwrap_or(false) {
            BootOutcome::FactoryResetRequired
        } else {
            BootOutcome::RolledBack
        }
    }

    /// Read back the persisted `fota/` record, for the diagnostics
    /// snapshot (SPEC_FULL §B.5) — never mutates.
    #[must_use]
    pub fn status(&self, kv: &dyn KeyValueStore) -> FotaStatus {
        FotaStatus {
            pending_version: kv::get_string(kv, KEY_PENDING_VERSION),
            confirmed: kv::get_bool(kv, KEY_CONFIRMED).unwrap_or(false),
            last_good_version: kv::get_string(kv, KEY_LAST_GOOD_VERSION),
            consecutive_rollbacks: kv::get_u32(kv, KEY_CONSECUTIVE_ROLLBACKS).unwrap_or(0),
            factory_reset_required: kv::get_bool(kv, KEY_FACTORY_RESET_REQUIRED).unwrap_or(false),
        }
    }

    fn rollback(&self, partition: &mut dyn PartitionDevice, kv: &mut dyn KeyValueStore) {
        let previous = partition.inactive_slot();
        let _ = partition.set_boot(previous);
        let rollbacks = kv::get_u32(kv, KEY_CONSECUTIVE_ROLLBACKS).unwrap_or(0) + 1;
        kv::set_u32(kv, KEY_CONSECUTIVE_ROLLBACKS, rollbacks);
        kv::set_string(kv, KEY_REBOOT_REASON, "ROLLBACK");
        kv.remove(KEY_PENDING_VERSION);
        if rollbacks >= self.max_consecutive_rollbacks {
            kv::set_bool(kv, KEY_FACTORY_RESET_REQUIRED, true);
        }
    }

    /// Post an outcome report to `/firmware/report` (SPEC_FULL §B.6).
    /// `free_heap` is best-effort telemetry; host adapters without a
    /// real heap allocator may pass `0`.
    pub fn report_outcome(
        &self,
        transport: &mut dyn Transport,
        device_id: &str,
        version: &str,
        status: &str,
        message: &str,
        clock: &dyn Clock,
        free_heap: u32,
    ) {
        let now = clock.monotonic_secs();
        let body = serde_json::json!({
            "device_id": device_id,
            "version": version,
            "status": status,
            "message": message,
            "timestamp": now,
            "free_heap": free_heap,
            "uptime": now,
        });
        if let Ok(bytes) = serde_json::to_vec(&body) {
            let url = format!("{}/firmware/report", self.base_url);
            let headers = [("Content-Type", "application/json")];
            let _ = transport.post_json(&url, &bytes, &headers, self.http_timeout_ms);
        }
    }
}

/// Numeric, component-by-component comparison (`server > running`);
/// falls back to lexicographic ordering of the original strings if any
/// component fails to parse (§4.10 step 1).
#[must_use]
pub fn compare_versions(server: &str, running: &str) -> std::cmp::Ordering {
    let server_parts: Vec<&str> = server.split('.').collect();
    let running_parts: Vec<&str> = running.split('.').collect();
    let len = server_parts.len().max(running_parts.len());

    for i in 0..len {
        let s = server_parts.get(i).copied().unwrap_or("0");
        let r = running_parts.get(i).copied().unwrap_or("0");
        match (s.parse::<u64>(), r.parse::<u64>()) {
            (Ok(sv), Ok(rv)) if sv != rv => return sv.cmp(&rv),
            (Ok(sv), Ok(rv)) if sv == rv => continue,
            _ => return server.cmp(running),
        }
    }
    std::cmp::Ordering::Equal
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::HttpResponse;
    use std::cell::{Cell, RefCell};
    use std::collections::HashMap;

    struct FakeClock(Cell<u64>);
    impl Clock for FakeClock {
        fn monotonic_secs(&self) -> u64 {
            self.0.get()
        }
        fn sleep(&self, _millis: u32) {}
    }

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

    struct MemPartition {
        boot: Slot,
        writes: RefCell<HashMap<(u8, u32), Vec<u8>>>,
    }
    impl MemPartition {
        fn new() -> Self {
            Self {
                boot: Slot::A,
                writes: RefCell::new(HashMap::new()),
            }
        }
        fn slot_key(slot: Slot) -> u8 {
            match slot {
                Slot::A => 0,
                Slot::B => 1,
            }
        }
    }
    impl PartitionDevice for MemPartition {
        fn erase(&mut self, slot: Slot) -> Result<(), &'static str> {
            self.writes
                .borrow_mut()
                .retain(|(s, _), _| *s != Self::slot_key(slot));
            Ok(())
        }
        fn write(&mut self, slot: Slot, offset: u32, data: &[u8]) -> Result<(), &'static str> {
            self.writes
                .borrow_mut()
                .insert((Self::slot_key(slot), offset), data.to_vec());
            Ok(())
        }
        fn boot_slot(&self) -> Slot {
            self.boot
        }
        fn set_boot(&mut self, slot: Slot) -> Result<(), &'static str> {
            self.boot = slot;
            Ok(())
        }
    }

    struct ScriptedTransport {
        manifest_body: Vec<u8>,
        firmware_body: Vec<u8>,
    }
    impl Transport for ScriptedTransport {
        fn post_json(
            &mut self,
            _url: &str,
            _payload: &[u8],
            _headers: &[(&str, &str)],
            _timeout_ms: u32,
        ) -> Result<HttpResponse, crate::error::TransportError> {
            Ok(HttpResponse { status: 200, body: Vec::new() })
        }
        fn get(
            &mut self,
            url: &str,
            _headers: &[(&str, &str)],
            _timeout_ms: u32,
        ) -> Result<HttpResponse, crate::error::TransportError> {
            if url.ends_with("/firmware/manifest") {
                Ok(HttpResponse { status: 200, body: self.manifest_body.clone() })
            } else {
                Ok(HttpResponse { status: 200, body: self.firmware_body.clone() })
            }
        }
    }

    fn engine() -> FotaEngine {
        FotaEngine::new(
            "http://fota".into(),
            "1.0.0".into(),
            [9u8; 32],
            5000,
            300_000,
            3,
            3,
        )
    }

    #[test]
    fn version_comparison_numeric_component_wise() {
        assert_eq!(compare_versions("1.2.0", "1.10.0"), std::cmp::Ordering::Less);
        assert_eq!(compare_versions("2.0.0", "1.9.9"), std::cmp::Ordering::Greater);
        assert_eq!(compare_versions("1.0", "1.0.0"), std::cmp::Ordering::Equal);
    }

    #[test]
    fn run_commits_update_on_matching_hash() {
        let firmware = b"firmware-image-bytes".to_vec();
        let digest = hmac_sha256::Hash::hash(&firmware);
        let manifest = serde_json::json!({
            "version": "2.0.0",
            "size": firmware.len(),
            "sha256": crate::modbus::hex::encode_lower(&digest),
            "url": "http://fota/firmware/bin",
        });

        let mut transport = ScriptedTransport {
            manifest_body: serde_json::to_vec(&manifest).unwrap(),
            firmware_body: firmware,
        };
        let mut partition = MemPartition::new();
        let mut kv = MemStore::new();
        let mut diagnostics = Diagnostics::new("dev".into(), 10, 0, &kv);
        let clock = FakeClock(Cell::new(1));

        let result = engine().run(&mut transport, &mut partition, &mut kv, &mut diagnostics, &clock);
        assert_eq!(result, Ok(Some("2.0.0".to_string())));
        assert_eq!(partition.boot_slot(), Slot::B);
        assert_eq!(kv::get_string(&kv, KEY_PENDING_VERSION).as_deref(), Some("2.0.0"));
    }

    #[test]
    fn run_returns_ok_none_when_no_update_available() {
        let manifest = serde_json::json!({
            "version": "0.9.0",
            "size": 0,
            "sha256": "",
            "url": "http://fota/firmware/bin",
        });

        let mut transport = ScriptedTransport {
            manifest_body: serde_json::to_vec(&manifest).unwrap(),
            firmware_body: Vec::new(),
        };
        let mut partition = MemPartition::new();
        let mut kv = MemStore::new();
        let mut diagnostics = Diagnostics::new("dev".into(), 10, 0, &kv);
        let clock = FakeClock(Cell::new(1));

        let result = engine().run(&mut transport, &mut partition, &mut kv, &mut diagnostics, &clock);
        assert_eq!(result, Ok(None));
        assert_eq!(partition.boot_slot(), Slot::A);
    }

    #[test]
    fn run_rejects_hash_mismatch_and_erases() {
        let firmware = b"firmware-image-bytes".to_vec();
        let manifest = serde_json::json!({
            "version": "2.0.0",
            "size": firmware.len(),
            "sha256": "00".repeat(32),
            "url": "http://fota/firmware/bin",
        });
        let mut transport = ScriptedTransport {
            manifest_body: serde_json::to_vec(&manifest).unwrap(),
            firmware_body: firmware,
        };
        let mut partition = MemPartition::new();
        let mut kv = MemStore::new();
        let mut diagnostics = Diagnostics::new("dev".into(), 10, 0, &kv);
        let clock = FakeClock(Cell::new(1));

        let result = engine().run(&mut transport, &mut partition, &mut kv, &mut diagnostics, &clock);
        assert_eq!(result, Err(FotaError::HashMismatch));
        assert_eq!(partition.boot_slot(), Slot::A);
        assert_eq!(diagnostics.counters().security_violations, 1);
    }

    #[test]
    fn boot_confirmation_window_rolls_back_when_expired() {
        let mut partition = MemPartition::new();
        let mut kv = MemStore::new();
        partition.set_boot(Slot::B).unwrap();
        kv::set_string(&mut kv, KEY_PENDING_VERSION, "2.0.0");
        kv::set_u64(&mut kv, KEY_BOOT_STARTED_AT, 0);

        let outcome = engine().poll_confirmation_window(&mut partition, &mut kv, &FakeClock(Cell::new(301)));
        assert_eq!(outcome, BootOutcome::RolledBack);
        assert_eq!(partition.boot_slot(), Slot::A);
        assert_eq!(kv::get_u32(&kv, KEY_CONSECUTIVE_ROLLBACKS), Some(1));
    }

    #[test]
    fn repeated_rollbacks_require_factory_reset() {
        let mut partition = MemPartition::new();
        let mut kv = MemStore::new();
        kv::set_u32(&mut kv, KEY_CONSECUTIVE_ROLLBACKS, 2);
        partition.set_boot(Slot::B).unwrap();
        kv::set_string(&mut kv, KEY_PENDING_VERSION, "2.0.0");
        kv::set_u64(&mut kv, KEY_BOOT_STARTED_AT, 0);

        let outcome = engine().poll_confirmation_window(&mut partition, &mut kv, &FakeClock(Cell::new(301)));
        assert_eq!(outcome, BootOutcome::FactoryResetRequired);
        assert_eq!(kv::get_bool(&kv, KEY_FACTORY_RESET_REQUIRED), Some(true));
    }

    #[test]
    fn confirm_boot_then_on_boot_clears_pending() {
        let mut partition = MemPartition::new();
        let mut kv = MemStore::new();
        kv::set_string(&mut kv, KEY_PENDING_VERSION, "2.0.0");
        engine().confirm_boot(&mut kv);

        let clock = FakeClock(Cell::new(10));
        let outcome = engine().on_boot(&mut partition, &mut kv, &clock);
        assert_eq!(outcome, BootOutcome::Confirmed);
        assert!(kv::get_string(&kv, KEY_PENDING_VERSION).is_none());
    }

    #[test]
    fn status_reflects_rollback_bookkeeping() {
        let mut kv = MemStore::new();
        kv::set_u32(&mut kv, KEY_CONSECUTIVE_ROLLBACKS, 2);
        kv::set_bool(&mut kv, KEY_FACTORY_RESET_REQUIRED, true);
        kv::set_string(&mut kv, KEY_LAST_GOOD_VERSION, "1.0.3");

        let status = engine().status(&kv);
        assert_eq!(status.consecutive_rollbacks, 2);
        assert!(status.factory_reset_required);
        assert_eq!(status.last_good_version.as_deref(), Some("1.0.3"));
        assert!(status.pending_version.is_none());
    }
}
