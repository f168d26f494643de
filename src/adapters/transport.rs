//! Self-contained [`Transport`] simulator.
//!
//! Stands in for the HTTP/TLS stack (§1 "Out of scope"): no sockets, no
//! DNS, just canned responses keyed by URL suffix — enough to drive the
//! binary's demo mode and integration tests end-to-end without a live
//! gateway or backend, in the same spirit as the teacher's
//! `rpc::transport::NullTransport` placeholder.

use std::collections::HashMap;

use serde::Deserialize;

use crate::error::TransportError;
use crate::modbus::{self, hex};
use crate::ports::{HttpResponse, Transport};

#[derive(Deserialize)]
struct FrameRequest {
    frame: String,
}

/// In-process Modbus-over-HTTP gateway plus FOTA backend simulator.
///
/// Register reads/writes are served from an in-memory address table;
/// `/ingest` and `/firmware/report` posts are always acknowledged;
/// `/firmware/manifest` and the firmware binary URL are served from
/// whatever [`Self::stage_firmware_update`] last staged (`None` until
/// then, so a default-constructed loopback reports no update
/// available).
pub struct LoopbackTransport {
    registers: HashMap<u16, u16>,
    manifest_body: Option<Vec<u8>>,
    firmware_url: String,
    firmware_image: Option<Vec<u8>>,
}

impl LoopbackTransport {
    #[must_use]
    pub fn new() -> Self {
        Self {
            registers: HashMap::new(),
            manifest_body: None,
            firmware_url: String::new(),
            firmware_image: None,
        }
    }

    /// Seed a register's value, as read back by a subsequent `0x03`
    /// request.
    pub fn set_register(&mut self, address: u16, value: u16) {
        self.registers.insert(address, value);
    }

    /// Publish a firmware update the next FOTA manifest check will see.
    /// Computes the image's SHA-256 (and, if `signing_key` is given, its
    /// HMAC) so the staged manifest matches what the FOTA engine will
    /// independently recompute while streaming the download.
    pub fn stage_firmware_update(&mut self, version: &str, image: Vec<u8>, signing_key: Option<[u8; 32]>) {
        let mut hasher = hmac_sha256::Hash::new();
        hasher.update(&image);
        let digest = hasher.finalize();
        let sha256_hex = hex::encode_lower(&digest);
        let hmac_hex = signing_key.map(|key| hex::encode_lower(&hmac_sha256::HMAC::mac(&image, key)));
        let url = format!("loopback://firmware/{version}.bin");

        let manifest = serde_json::json!({
            "version": version,
            "size": image.len(),
            "sha256": sha256_hex,
            "hmac": hmac_hex,
            "url": url,
            "force_update": false,
        });
        self.manifest_body = serde_json::to_vec(&manifest).ok();
        self.firmware_url = url;
        self.firmware_image = Some(image);
    }

    fn handle_inverter_frame(&mut self, payload: &[u8]) -> Result<Vec<u8>, TransportError> {
        let req: FrameRequest = serde_json::from_slice(payload).map_err(|_| TransportError::Status(500))?;
        let bytes = hex::decode(&req.frame).ok_or(TransportError::Status(422))?;
        if bytes.len() < 6 {
            return Err(TransportError::Status(422));
        }
        let slave = bytes[0];
        let func = bytes[1];

        let response_frame = match func {
            modbus::codec::READ_HOLDING_REGISTERS => {
                let start = u16::from_be_bytes([bytes[2], bytes[3]]);
                let count = u16::from_be_bytes([bytes[4], bytes[5]]);
                let mut frame = vec![slave, modbus::codec::READ_HOLDING_REGISTERS, (count * 2) as u8];
                for addr in start..start + count {
                    let value = self.registers.get(&addr).copied().unwrap_or(0);
                    frame.extend_from_slice(&value.to_be_bytes());
                }
                crate::modbus::crc::append_crc(&mut frame);
                frame
            }
            modbus::codec::WRITE_SINGLE_REGISTER => {
                let addr = u16::from_be_bytes([bytes[2], bytes[3]]);
                let value = u16::from_be_bytes([bytes[4], bytes[5]]);
                self.registers.insert(addr, value);
                bytes
            }
            _ => return Err(TransportError::Status(422)),
        };

        let body = serde_json::to_vec(&serde_json::json!({ "frame": hex::encode_upper(&response_frame) }))
            .map_err(|_| TransportError::Status(500))?;
        Ok(body)
    }
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for LoopbackTransport {
    fn post_json(
        &mut self,
        url: &str,
        payload: &[u8],
        _headers: &[(&str, &str)],
        _timeout_ms: u32,
    ) -> Result<HttpResponse, TransportError> {
        if url.ends_with("/api/inverter/read") || url.ends_with("/api/inverter/write") {
            let body = self.handle_inverter_frame(payload)?;
            return Ok(HttpResponse { status: 200, body });
        }
        if url.ends_with("/ingest") || url.ends_with("/firmware/report") {
            return Ok(HttpResponse { status: 200, body: b"{}".to_vec() });
        }
        Err(TransportError::Status(404))
    }

    fn get(&mut self, url: &str, _headers: &[(&str, &str)], _timeout_ms: u32) -> Result<HttpResponse, TransportError> {
        if url.ends_with("/firmware/manifest") {
            return match &self.manifest_body {
                Some(body) => Ok(HttpResponse { status: 200, body: body.clone() }),
                None => Err(TransportError::Status(404)),
            };
        }
        if url == self.firmware_url {
            return match &self.firmware_image {
                Some(image) => Ok(HttpResponse { status: 200, body: image.clone() }),
                None => Err(TransportError::Status(404)),
            };
        }
        Err(TransportError::Status(404))
    }
}
