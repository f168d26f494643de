//! Acquisition engine: poll the inverter gateway, decode the response,
//! push a sample (§4.11).
//!
//! Grounded on `Milestone1/cpp/src/core/peripheral/Acquisition.cpp` and
//! `fw/fw_ecowatt/main/src/peripheral/acquisition.c`: build a read
//! request, POST it to the gateway, and on any failure skip the sample
//! rather than push a partial one.

use serde::Deserialize;
use serde_json::json;

use crate::diagnostics::{Diagnostics, Severity};
use crate::error::{ModbusError, TransportError};
use crate::modbus::{self, ParseOutcome, RegisterId};
use crate::ports::{Clock, KeyValueStore, Transport};
use crate::sample::{Sample, SampleStore};

/// Inverter gateway JSON envelope: `{"frame": "<HEX>"}` (§3, §6).
#[derive(Deserialize)]
struct FrameEnvelope {
    frame: Option<String>,
}

/// Internal classification of what went wrong polling or writing,
/// distinct from [`crate::error::Error`] so the caller can apply the
/// exact counter/log policy of §4.11 without re-deriving it from a
/// generic error.
enum Failure {
    Transport(TransportError),
    Malformed,
    Exception(u8),
}

/// Polls the inverter gateway on a fixed register selection and slave
/// address, decoding responses via [`crate::modbus`].
pub struct AcquisitionEngine {
    slave: u8,
    registers: Vec<RegisterId>,
    base_url: String,
    api_key: String,
    http_timeout_ms: u32,
}

impl AcquisitionEngine {
    #[must_use]
    pub fn new(
        slave: u8,
        registers: Vec<RegisterId>,
        base_url: String,
        api_key: String,
        http_timeout_ms: u32,
    ) -> Self {
        Self {
            slave,
            registers,
            base_url,
            api_key,
            http_timeout_ms,
        }
    }

    /// Run one poll. On success, pushes a [`Sample`] into `store`. On
    /// any failure, no sample is pushed; the appropriate counter is
    /// incremented and an event logged (§4.11).
    pub fn poll(
        &self,
        transport: &mut dyn Transport,
        store: &mut SampleStore,
        diagnostics: &mut Diagnostics,
        kv: &mut dyn KeyValueStore,
        clock: &dyn Clock,
    ) {
        let now = clock.monotonic_secs();
        match self.poll_inner(transport) {
            Ok(values) => {
                let sample = Sample::new(now, self.registers.iter().copied().zip(values).collect());
                store.push(sample);
            }
            Err(Failure::Transport(te)) => {
                diagnostics.incr_read_errors(kv);
                if te == TransportError::Timeout {
                    diagnostics.incr_timeouts(kv);
                }
                diagnostics.log_event(now, Severity::Error, "inverter read transport failure", 0);
            }
            Err(Failure::Malformed) => {
                diagnostics.incr_malformed_frames(kv);
                diagnostics.log_event(now, Severity::Error, "malformed inverter response", 0);
            }
            Err(Failure::Exception(code)) => {
                diagnostics.incr_read_errors(kv);
                diagnostics.log_event(
                    now,
                    Severity::Warn,
                    ModbusError::exception_name(code),
                    u16::from(code),
                );
            }
        }
    }

    /// Write a single register (e.g. a power setpoint command) and
    /// confirm the gateway echoed the same frame back (§8 scenario 3).
    /// Returns `true` only on a byte-exact echo.
    pub fn set_power(
        &self,
        transport: &mut dyn Transport,
        addr: u16,
        value: u16,
        diagnostics: &mut Diagnostics,
        kv: &mut dyn KeyValueStore,
        clock: &dyn Clock,
    ) -> bool {
        let now = clock.monotonic_secs();
        let frame = modbus::build_write(self.slave, addr, value);
        match self.post_frame(transport, "write", &frame) {
            Ok(echoed) => match modbus::parse(&echoed) {
                Ok(ParseOutcome::Ok) => echoed.eq_ignore_ascii_case(&frame),
                Ok(ParseOutcome::Exception(code)) => {
                    diagnostics.incr_write_errors(kv);
                    diagnostics.log_event(
                        now,
                        Severity::Warn,
                        ModbusError::exception_name(code),
                        u16::from(code),
                    );
                    false
                }
                Err(_) => {
                    diagnostics.incr_malformed_frames(kv);
                    diagnostics.log_event(now, Severity::Error, "malformed write echo", 0);
                    false
                }
            },
            Err(Failure::Transport(te)) => {
                diagnostics.incr_write_errors(kv);
                if te == TransportError::Timeout {
                    diagnostics.incr_timeouts(kv);
                }
                false
            }
            Err(Failure::Malformed) => {
                diagnostics.incr_malformed_frames(kv);
                false
            }
            Err(Failure::Exception(code)) => {
                diagnostics.incr_write_errors(kv);
                diagnostics.log_event(
                    now,
                    Severity::Warn,
                    ModbusError::exception_name(code),
                    u16::from(code),
                );
                false
            }
        }
    }

    fn poll_inner(&self, transport: &mut dyn Transport) -> Result<Vec<u16>, Failure> {
        let (frame, start, count) =
            modbus::build_read(self.slave, &self.registers).map_err(|_| Failure::Malformed)?;
        let echoed = self.post_frame(transport, "read", &frame)?;
        match modbus::parse(&echoed).map_err(|_| Failure::Malformed)? {
            ParseOutcome::Exception(code) => Err(Failure::Exception(code)),
            ParseOutcome::Ok => modbus::decode_read_response(&echoed, start, count, &self.registers)
                .map_err(|_| Failure::Malformed),
        }
    }

    /// POST `{"frame": hex}` to `/api/inverter/{op}` and pull the
    /// `frame` field back out of the JSON response (§6).
    fn post_frame(&self, transport: &mut dyn Transport, op: &str, frame_hex: &str) -> Result<String, Failure> {
        let body = serde_json::to_vec(&json!({ "frame": frame_hex })).map_err(|_| Failure::Malformed)?;
        let headers = [
            ("Content-Type", "application/json"),
            ("accept", "*/*"),
            ("Authorization", self.api_key.as_str()),
        ];
        let url = format!("{}/api/inverter/{op}", self.base_url);
        let resp = transport
            .post_json(&url, &body, &headers, self.http_timeout_ms)
            .map_err(Failure::Transport)?;

        if !(200..300).contains(&resp.status) {
            return Err(Failure::Transport(TransportError::Status(resp.status)));
        }
        if resp.body.is_empty() {
            return Err(Failure::Transport(TransportError::EmptyBody));
        }
        let envelope: FrameEnvelope = serde_json::from_slice(&resp.body).map_err(|_| Failure::Malformed)?;
        envelope.frame.ok_or(Failure::Malformed)
    }
}
