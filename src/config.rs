//! System configuration parameters.
//!
//! All tunables for the agent: identity, endpoints, intervals, buffer
//! sizing, and the PSKs used by [`crate::security`] and
//! [`crate::engines::fota`]. Supplied once at [`crate::Supervisor`]
//! construction (§6 "Environment/config").

use serde::{Deserialize, Serialize};

/// Core agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Human-readable device identifier, sent as `X-Device-ID`.
    pub device_id: String,

    // --- Inverter gateway ---
    /// Base URL of the Modbus-over-HTTP inverter gateway.
    pub inverter_base_url: String,
    /// `Authorization` header value for the inverter gateway.
    pub inverter_api_key: String,
    /// Modbus slave address used for all reads/writes.
    pub slave_address: u8,

    // --- Upload ---
    /// Base URL of the telemetry ingest endpoint.
    pub upload_base_url: String,
    /// API key sent as `X-API-Key` on upload/report posts.
    pub api_key: String,
    /// Sample count above which a batch is downsampled before upload.
    pub upload_target_samples: usize,

    // --- FOTA ---
    /// Base URL serving `/firmware/manifest`, firmware binaries, and
    /// `/firmware/report`.
    pub fota_base_url: String,
    /// Currently running firmware version (semver-style).
    pub running_version: String,

    // --- Security ---
    /// 32-byte HMAC PSK used by [`crate::security::SecurityEnvelope`].
    pub hmac_psk: [u8; 32],
    /// 32-byte PSK used to verify firmware HMACs during FOTA, when the
    /// manifest supplies one.
    pub fota_signing_key: [u8; 32],
    /// Starting nonce when no persisted value exists yet.
    pub nonce_baseline: u64,

    // --- Timing (milliseconds unless noted) ---
    pub poll_interval_ms: u32,
    pub upload_interval_ms: u32,
    pub command_check_interval_ms: u32,
    pub config_check_interval_ms: u32,
    pub fota_check_interval_ms: u32,
    /// Dispatch loop idle sleep when no task is ready (§4.13).
    pub poll_granularity_ms: u32,

    // --- Transport ---
    pub http_timeout_ms: u32,
    pub http_max_retries: u8,

    // --- Buffer sizing ---
    pub sample_store_capacity: usize,
    pub diagnostics_ring_capacity: usize,

    // --- FOTA windows ---
    pub fota_confirmation_window_ms: u64,
    pub fota_max_boot_attempts: u32,
    pub fota_max_consecutive_rollbacks: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            device_id: "ecowatt-001".to_string(),

            inverter_base_url: "http://20.15.114.131:8080".to_string(),
            inverter_api_key: String::new(),
            slave_address: 0x11,

            upload_base_url: "http://20.15.114.131:8080".to_string(),
            api_key: String::new(),
            upload_target_samples: 64,

            fota_base_url: "http://20.15.114.131:8080".to_string(),
            running_version: "1.0.0".to_string(),

            hmac_psk: [0u8; 32],
            fota_signing_key: [0u8; 32],
            nonce_baseline: 10_000,

            poll_interval_ms: 5_000,
            upload_interval_ms: 60_000,
            command_check_interval_ms: 10_000,
            config_check_interval_ms: 300_000,
            fota_check_interval_ms: 3_600_000,
            poll_granularity_ms: 10,

            http_timeout_ms: 5_000,
            http_max_retries: 3,

            sample_store_capacity: 256,
            diagnostics_ring_capacity: 50,

            fota_confirmation_window_ms: 300_000,
            fota_max_boot_attempts: 3,
            fota_max_consecutive_rollbacks: 3,
        }
    }
}

/// Validate a loaded/received configuration before it is applied.
///
/// Mirrors the defensive range checks the agent applies to any
/// persisted or remotely-supplied config (§4 "Security notes" precedent):
/// reject invalid values rather than silently clamping them.
pub fn validate(cfg: &AgentConfig) -> Result<(), &'static str> {
    if cfg.upload_target_samples == 0 {
        return Err("upload_target_samples must be > 0");
    }
    if cfg.sample_store_capacity == 0 {
        return Err("sample_store_capacity must be > 0");
    }
    if cfg.http_timeout_ms == 0 {
        return Err("http_timeout_ms must be > 0");
    }
    if cfg.fota_max_boot_attempts == 0 {
        return Err("fota_max_boot_attempts must be > 0");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_passes_validation() {
        assert!(validate(&AgentConfig::default()).is_ok());
    }

    #[test]
    fn rejects_zero_upload_target() {
        let cfg = AgentConfig {
            upload_target_samples: 0,
            ..Default::default()
        };
        assert!(validate(&cfg).is_err());
    }
}
