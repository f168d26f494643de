//! Port traits — the hexagonal boundary between the agent's pure logic and
//! the host environment.
//!
//! ```text
//!   Host adapter ──▶ Port trait ──▶ engines (domain)
//! ```
//!
//! The four collaborators named in §1 of the spec are defined here as
//! traits. Concrete implementations (the HTTP/TLS stack, the NVS-style
//! key/value store, the flash partition driver) are out of scope for this
//! crate — see [`crate::adapters`] for the in-memory/test doubles that
//! stand in for them in the binary and in integration tests.

use crate::error::TransportError;

// ---------------------------------------------------------------------------
// Transport (HTTP-over-something, with timeouts and retries)
// ---------------------------------------------------------------------------

/// An HTTP response as observed by the agent.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

/// POST/GET capability with timeouts and retries.
///
/// Implementations MUST retry up to `max_retries` times with exponential
/// backoff (reference: start at 500ms, doubling) before surfacing
/// [`TransportError`] — the core treats a single `Transport` call as having
/// already absorbed that retry budget (§4.3, §7).
pub trait Transport {
    /// `POST` a JSON body, returning the parsed status/body on completion
    /// (after internal retries). `timeout_ms` bounds each individual
    /// attempt.
    fn post_json(
        &mut self,
        url: &str,
        payload: &[u8],
        headers: &[(&str, &str)],
        timeout_ms: u32,
    ) -> Result<HttpResponse, TransportError>;

    /// `GET` a resource, returning the full body (after internal retries).
    /// Implementations that stream large bodies (firmware images) may
    /// instead buffer progressively, but MUST deliver a
    /// `Content-Length`-consistent body or fail.
    fn get(
        &mut self,
        url: &str,
        headers: &[(&str, &str)],
        timeout_ms: u32,
    ) -> Result<HttpResponse, TransportError>;
}

// ---------------------------------------------------------------------------
// KeyValueStore (durable small-record key/value)
// ---------------------------------------------------------------------------

/// Durable small-record key/value storage, namespaced per §5
/// (`security/`, `diagnostics/`, `fota/`).
///
/// Write operations MUST be durable before returning — callers (in
/// particular [`crate::security::SecurityEnvelope`]) rely on a successful
/// `write` meaning the value survives an immediate restart.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Option<Vec<u8>>;
    fn set(&mut self, key: &str, value: &[u8]);
    fn remove(&mut self, key: &str);
}

/// Typed convenience helpers layered over the raw byte `KeyValueStore`.
/// Kept as free functions (not a trait) so any `KeyValueStore` gets them
/// without extra object-safety constraints.
pub mod kv {
    use super::KeyValueStore;

    pub fn get_u32(store: &dyn KeyValueStore, key: &str) -> Option<u32> {
        store
            .get(key)
            .and_then(|b| b.as_slice().try_into().ok())
            .map(u32::from_le_bytes)
    }

    pub fn set_u32(store: &mut dyn KeyValueStore, key: &str, value: u32) {
        store.set(key, &value.to_le_bytes());
    }

    pub fn get_u64(store: &dyn KeyValueStore, key: &str) -> Option<u64> {
        store
            .get(key)
            .and_then(|b| b.as_slice().try_into().ok())
            .map(u64::from_le_bytes)
    }

    pub fn set_u64(store: &mut dyn KeyValueStore, key: &str, value: u64) {
        store.set(key, &value.to_le_bytes());
    }

    pub fn get_bool(store: &dyn KeyValueStore, key: &str) -> Option<bool> {
        store.get(key).map(|b| b.first() == Some(&1))
    }

    pub fn set_bool(store: &mut dyn KeyValueStore, key: &str, value: bool) {
        store.set(key, &[u8::from(value)]);
    }

    pub fn get_string(store: &dyn KeyValueStore, key: &str) -> Option<String> {
        store
            .get(key)
            .and_then(|b| String::from_utf8(b).ok())
    }

    pub fn set_string(store: &mut dyn KeyValueStore, key: &str, value: &str) {
        store.set(key, value.as_bytes());
    }
}

// ---------------------------------------------------------------------------
// PartitionDevice (dual-slot flash layout)
// ---------------------------------------------------------------------------

/// Which of the two app slots is being addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    A,
    B,
}

impl Slot {
    #[must_use]
    pub const fn other(self) -> Self {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }
}

/// Two-app-slot flash device with boot-pointer switching.
///
/// The inactive slot is always the FOTA write target; `set_boot` is the
/// only operation that may change which slot is "running".
pub trait PartitionDevice {
    /// Erase the given slot before a fresh write sequence.
    fn erase(&mut self, slot: Slot) -> Result<(), &'static str>;

    /// Write `data` at `offset` within `slot`. Implementations MUST NOT
    /// reorder or coalesce writes across calls.
    fn write(&mut self, slot: Slot, offset: u32, data: &[u8]) -> Result<(), &'static str>;

    /// The slot the bootloader will start next time.
    fn boot_slot(&self) -> Slot;

    /// Flip the boot pointer. Takes effect on next reboot.
    fn set_boot(&mut self, slot: Slot) -> Result<(), &'static str>;

    /// The slot not currently pointed to by `boot_slot()`.
    fn inactive_slot(&self) -> Slot {
        self.boot_slot().other()
    }
}

// ---------------------------------------------------------------------------
// Clock (monotonic ticks + wall time)
// ---------------------------------------------------------------------------

/// Monotonic tick counter plus wall-clock seconds, and the only sleep point
/// in the dispatch loop.
pub trait Clock {
    /// Monotonic seconds since agent init. Used for sample timestamps and
    /// uptime reporting.
    fn monotonic_secs(&self) -> u64;

    /// Sleep for `millis` milliseconds. The supervisor's only blocking call
    /// outside of `Transport`/`PartitionDevice` (§5).
    fn sleep(&self, millis: u32);
}
