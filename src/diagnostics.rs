//! Diagnostics: fixed-capacity event ring plus persistent counters
//! (§3 "EventLog"/"PersistentCounters", §4.8).
//!
//! Grounded on the original `Diagnostics` module
//! (`PIO/ECOWATT/src/application/diagnostics.cpp`): every counter
//! increment is immediately flushed to the key/value store, and the
//! JSON snapshot reuses the original's fixed per-class success-rate
//! baselines verbatim (§4.8, §9 Open Questions) — a reporting
//! convention, not a real statistical model.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::ports::{kv, KeyValueStore};

/// Severity of a logged [`Event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warn,
    Error,
    Fault,
}

/// One diagnostic event, truncated to a 64-byte message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub timestamp: u64,
    pub severity: Severity,
    pub message: String,
    pub code: u16,
}

impl Event {
    #[must_use]
    pub fn new(timestamp: u64, severity: Severity, message: &str, code: u16) -> Self {
        let truncated: String = message.chars().take(64).collect();
        Self {
            timestamp,
            severity,
            message: truncated,
            code,
        }
    }
}

/// Named counters persisted under the `diagnostics/` namespace (§6).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    pub read_errors: u32,
    pub write_errors: u32,
    pub timeouts: u32,
    pub crc_errors: u32,
    pub malformed_frames: u32,
    pub compression_failures: u32,
    pub upload_failures: u32,
    pub security_violations: u32,
}

/// Fixed-baseline success rates, preserved verbatim from the original
/// firmware's reporting convention (§4.8, §9).
const READ_BASELINE: u32 = 100;
const WRITE_BASELINE: u32 = 10;
const UPLOAD_BASELINE: u32 = 50;

/// Coarse overall health classification, recovered from the original
/// `generateDiagnosticsJSON`'s `system_health.status` field (SPEC_FULL §B.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

/// JSON-serializable diagnostics snapshot (§4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub device_id: String,
    pub uptime_secs: u64,
    pub counters: Counters,
    pub read_success_pct: f64,
    pub write_success_pct: f64,
    pub upload_success_pct: f64,
    pub recent_events: Vec<Event>,
    pub health_status: HealthStatus,
    /// Rollback bookkeeping surfaced from the `fota/` namespace
    /// (SPEC_FULL §B.5); zero/false when [`Diagnostics::snapshot`] is
    /// called directly without FOTA state merged in by the supervisor.
    pub fota_consecutive_rollbacks: u32,
    pub fota_factory_reset_required: bool,
}

/// Event ring + persistent counters, owned by the [`crate::Supervisor`].
pub struct Diagnostics {
    capacity: usize,
    events: VecDeque<Event>,
    counters: Counters,
    device_id: String,
    init_uptime_secs: u64,
}

impl Diagnostics {
    /// Load persisted counters from `store` and start an empty event
    /// ring of `capacity` slots.
    #[must_use]
    pub fn new(device_id: String, capacity: usize, now_secs: u64, store: &dyn KeyValueStore) -> Self {
        let counters = Counters {
            read_errors: kv::get_u32(store, "diagnostics/read_errors").unwrap_or(0),
            write_errors: kv::get_u32(store, "diagnostics/write_errors").unwrap_or(0),
            timeouts: kv::get_u32(store, "diagnostics/timeouts").unwrap_or(0),
            crc_errors: kv::get_u32(store, "diagnostics/crc_errors").unwrap_or(0),
            malformed_frames: kv::get_u32(store, "diagnostics/malformed_frames").unwrap_or(0),
            compression_failures: kv::get_u32(store, "diagnostics/compression_failures").unwrap_or(0),
            upload_failures: kv::get_u32(store, "diagnostics/upload_failures").unwrap_or(0),
            security_violations: kv::get_u32(store, "diagnostics/security_violations").unwrap_or(0),
        };
        Self {
            capacity: capacity.max(1),
            events: VecDeque::with_capacity(capacity),
            counters,
            device_id,
            init_uptime_secs: now_secs,
        }
    }

    /// Append an event, overwriting the oldest entry if the ring is
    /// full.
    pub fn log_event(&mut self, timestamp: u64, severity: Severity, message: &str, code: u16) {
        if self.events.len() >= self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(Event::new(timestamp, severity, message, code));
        match severity {
            Severity::Info => log::info!("{message}"),
            Severity::Warn => log::warn!("{message}"),
            Severity::Error => log::error!("{message}"),
            Severity::Fault => log::error!("FAULT: {message}"),
        }
    }

    #[must_use]
    pub fn counters(&self) -> Counters {
        self.counters
    }

    #[must_use]
    pub fn events(&self) -> &VecDeque<Event> {
        &self.events
    }

    fn persist(&self, store: &mut dyn KeyValueStore, field: &str, value: u32) {
        kv::set_u32(store, &format!("diagnostics/{field}"), value);
    }

    pub fn incr_read_errors(&mut self, store: &mut dyn KeyValueStore) {
        self.counters.read_errors += 1;
        self.persist(store, "read_errors", self.counters.read_errors);
    }

    pub fn incr_write_errors(&mut self, store: &mut dyn KeyValueStore) {
        self.counters.write_errors += 1;
        self.persist(store, "write_errors", self.counters.write_errors);
    }

    pub fn incr_timeouts(&mut self, store: &mut dyn KeyValueStore) {
        self.counters.timeouts += 1;
        self.persist(store, "timeouts", self.counters.timeouts);
    }

    pub fn incr_crc_errors(&mut self, store: &mut dyn KeyValueStore) {
        self.counters.crc_errors += 1;
        self.persist(store, "crc_errors", self.counters.crc_errors);
    }

    pub fn incr_malformed_frames(&mut self, store: &mut dyn KeyValueStore) {
        self.counters.malformed_frames += 1;
        self.persist(store, "malformed_frames", self.counters.malformed_frames);
    }

    pub fn incr_compression_failures(&mut self, store: &mut dyn KeyValueStore) {
        self.counters.compression_failures += 1;
        self.persist(store, "compression_failures", self.counters.compression_failures);
    }

    pub fn incr_upload_failures(&mut self, store: &mut dyn KeyValueStore) {
        self.counters.upload_failures += 1;
        self.persist(store, "upload_failures", self.counters.upload_failures);
    }

    pub fn incr_security_violations(&mut self, store: &mut dyn KeyValueStore) {
        self.counters.security_violations += 1;
        self.persist(store, "security_violations", self.counters.security_violations);
    }

    /// `1 - errors/(errors + baseline)`, the fixed-baseline convention
    /// of §4.8. MUST be preserved for test equality against the spec's
    /// worked examples.
    #[must_use]
    pub fn read_success_rate(&self) -> f64 {
        success_rate(self.counters.read_errors, READ_BASELINE)
    }

    #[must_use]
    pub fn write_success_rate(&self) -> f64 {
        success_rate(self.counters.write_errors, WRITE_BASELINE)
    }

    #[must_use]
    pub fn upload_success_rate(&self) -> f64 {
        success_rate(self.counters.upload_failures, UPLOAD_BASELINE)
    }

    #[must_use]
    pub fn health_status(&self) -> HealthStatus {
        if self.counters.security_violations == 0
            && self.counters.read_errors < 10
            && self.counters.upload_failures < 5
        {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        }
    }

    /// Build the JSON-ready snapshot: device id, uptime, counters,
    /// derived success rates, and the last up to 10 events (§4.8).
    #[must_use]
    pub fn snapshot(&self, now_secs: u64) -> Snapshot {
        let recent: Vec<Event> = self
            .events
            .iter()
            .rev()
            .take(10)
            .rev()
            .cloned()
            .collect();
        Snapshot {
            device_id: self.device_id.clone(),
            uptime_secs: now_secs.saturating_sub(self.init_uptime_secs),
            counters: self.counters,
            read_success_pct: self.read_success_rate(),
            write_success_pct: self.write_success_rate(),
            upload_success_pct: self.upload_success_rate(),
            recent_events: recent,
            health_status: self.health_status(),
            fota_consecutive_rollbacks: 0,
            fota_factory_reset_required: false,
        }
    }
}

fn success_rate(errors: u32, baseline: u32) -> f64 {
    let total = f64::from(errors) + f64::from(baseline);
    if total == 0.0 {
        return 1.0;
    }
    1.0 - f64::from(errors) / total
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

    #[test]
    fn event_ring_overwrites_oldest() {
        let store = MemStore::new();
        let mut diag = Diagnostics::new("dev".into(), 3, 0, &store);
        for i in 0..5u16 {
            diag.log_event(i as u64, Severity::Info, "tick", i);
        }
        assert_eq!(diag.events().len(), 3);
        assert_eq!(diag.events().front().unwrap().code, 2);
    }

    #[test]
    fn counters_persist_after_increment() {
        let mut store = MemStore::new();
        let mut diag = Diagnostics::new("dev".into(), 50, 0, &store);
        diag.incr_read_errors(&mut store);
        diag.incr_read_errors(&mut store);
        assert_eq!(kv::get_u32(&store, "diagnostics/read_errors"), Some(2));

        let diag2 = Diagnostics::new("dev".into(), 50, 0, &store);
        assert_eq!(diag2.counters().read_errors, 2);
    }

    #[test]
    fn success_rate_matches_fixed_baseline() {
        let store = MemStore::new();
        let diag = Diagnostics::new("dev".into(), 50, 0, &store);
        assert!((diag.read_success_rate() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn snapshot_caps_recent_events_at_ten() {
        let store = MemStore::new();
        let mut diag = Diagnostics::new("dev".into(), 50, 0, &store);
        for i in 0..15u16 {
            diag.log_event(i as u64, Severity::Info, "x", i);
        }
        let snap = diag.snapshot(100);
        assert_eq!(snap.recent_events.len(), 10);
        assert_eq!(snap.recent_events.last().unwrap().code, 14);
    }

    #[test]
    fn snapshot_defaults_fota_fields_when_standalone() {
        let store = MemStore::new();
        let diag = Diagnostics::new("dev".into(), 50, 0, &store);
        let snap = diag.snapshot(0);
        assert_eq!(snap.fota_consecutive_rollbacks, 0);
        assert!(!snap.fota_factory_reset_required);
    }

    #[test]
    fn health_degrades_on_security_violation() {
        let mut store = MemStore::new();
        let mut diag = Diagnostics::new("dev".into(), 50, 0, &store);
        assert_eq!(diag.health_status(), HealthStatus::Healthy);
        diag.incr_security_violations(&mut store);
        assert_eq!(diag.health_status(), HealthStatus::Degraded);
    }
}
