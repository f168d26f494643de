//! Upload engine: drain, optionally downsample, compress, seal, and
//! post a batch of samples (§4.12).
//!
//! Grounded on `Milestone1/cpp/src/core/application/Coordinator.cpp`'s
//! upload path and the teacher's own POST-and-requeue-on-failure shape
//! in `firmware/src/rpc/ota.rs`. A failed post restores the batch via
//! `push_batch_front` so nothing observed from the inverter is lost
//! (§4.4, §5 "Ordering guarantees").

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Serialize;

use crate::aggregate::{self, AggregationMode};
use crate::diagnostics::{Diagnostics, Severity};
use crate::error::TransportError;
use crate::modbus::RegisterId;
use crate::ports::{Clock, KeyValueStore, Transport};
use crate::sample::{Sample, SampleStore};
use crate::security::SecurityEnvelope;
use crate::telemetry;

/// Metadata carried alongside the compressed sample stream, sealed as
/// one payload (§4.6, §4.7). Register order is fixed at construction
/// time so the backend can zip `values` back onto `register_ids`.
#[derive(Debug, Serialize)]
struct TelemetryBatch {
    device_id: String,
    register_ids: Vec<&'static str>,
    sample_count: usize,
    start_timestamp: u64,
    compressed: String,
}

/// Drains [`SampleStore`], compresses, seals, and posts to the
/// configured ingest endpoint.
pub struct UploadEngine {
    device_id: String,
    registers: Vec<RegisterId>,
    base_url: String,
    api_key: String,
    http_timeout_ms: u32,
    target_samples: usize,
}

impl UploadEngine {
    #[must_use]
    pub fn new(
        device_id: String,
        registers: Vec<RegisterId>,
        base_url: String,
        api_key: String,
        http_timeout_ms: u32,
        target_samples: usize,
    ) -> Self {
        Self {
            device_id,
            registers,
            base_url,
            api_key,
            http_timeout_ms,
            target_samples,
        }
    }

    /// Run one upload tick. No-op if the store is empty (§4.12 step 1).
    #[allow(clippy::too_many_arguments)]
    pub fn run(
        &self,
        store: &mut SampleStore,
        security: &mut SecurityEnvelope,
        transport: &mut dyn Transport,
        diagnostics: &mut Diagnostics,
        kv: &mut dyn KeyValueStore,
        clock: &dyn Clock,
    ) {
        if store.is_empty() {
            return;
        }
        let batch = store.drain_all();
        let now = clock.monotonic_secs();

        let batch = if batch.len() > self.target_samples {
            aggregate::downsample_samples(&batch, self.target_samples, AggregationMode::Smart)
        } else {
            batch
        };

        let sealed = match self.build_envelope(&batch, security, kv) {
            Ok(sealed) => sealed,
            Err(()) => {
                diagnostics.incr_security_violations(kv);
                store.push_batch_front(batch);
                return;
            }
        };

        let body = match serde_json::to_vec(&sealed) {
            Ok(body) => body,
            Err(_) => {
                diagnostics.incr_upload_failures(kv);
                store.push_batch_front(batch);
                return;
            }
        };

        let headers = [
            ("Content-Type", "application/json"),
            ("X-Device-ID", self.device_id.as_str()),
            ("X-API-Key", self.api_key.as_str()),
        ];
        let url = format!("{}/ingest", self.base_url);
        match transport.post_json(&url, &body, &headers, self.http_timeout_ms) {
            Ok(resp) if (200..300).contains(&resp.status) => {}
            Ok(_resp) => {
                diagnostics.incr_upload_failures(kv);
                diagnostics.log_event(now, Severity::Error, "upload rejected by backend", 0);
                store.push_batch_front(batch);
            }
            Err(e) => {
                diagnostics.incr_upload_failures(kv);
                if e == TransportError::Timeout {
                    diagnostics.incr_timeouts(kv);
                }
                diagnostics.log_event(now, Severity::Error, "upload transport failure", 0);
                store.push_batch_front(batch);
            }
        }
    }

    /// Flatten the batch into a `(hi, lo)` pair stream per register in
    /// fixed order, compress it, wrap it with routing metadata, and
    /// seal the resulting JSON as the sealed envelope's payload.
    fn build_envelope(
        &self,
        batch: &[Sample],
        security: &mut SecurityEnvelope,
        kv: &mut dyn KeyValueStore,
    ) -> Result<crate::security::SealedEnvelope, ()> {
        let mut pairs = Vec::with_capacity(batch.len() * self.registers.len());
        for sample in batch {
            for &reg in &self.registers {
                let value = sample.get(reg).unwrap_or(0);
                let [hi, lo] = value.to_be_bytes();
                pairs.push((hi, lo));
            }
        }
        let compressed = telemetry::encode(&pairs);

        let metadata = TelemetryBatch {
            device_id: self.device_id.clone(),
            register_ids: self.registers.iter().map(|r| crate::modbus::registers::lookup(*r).name).collect(),
            sample_count: batch.len(),
            start_timestamp: batch.first().map_or(0, |s| s.timestamp),
            compressed: BASE64.encode(&compressed),
        };
        let payload = serde_json::to_vec(&metadata).map_err(|_| ())?;
        security.seal(&payload, kv).map_err(|_| ())
    }
}
