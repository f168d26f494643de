//! Unified error types for the EcoWatt edge agent.
//!
//! Follows the same discipline the rest of the agent uses everywhere else:
//! one enum per subsystem, `Copy` where the variants allow it, and a
//! top-level [`Error`] that every engine funnels failures into so the
//! supervisor's dispatch loop never has to match on subsystem-specific
//! types.

use core::fmt;

/// Every fallible operation in the agent funnels into this type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    Modbus(ModbusError),
    Transport(TransportError),
    Security(SecurityError),
    Fota(FotaError),
    Storage(StorageError),
    Config(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Modbus(e) => write!(f, "modbus: {e}"),
            Self::Transport(e) => write!(f, "transport: {e}"),
            Self::Security(e) => write!(f, "security: {e}"),
            Self::Fota(e) => write!(f, "fota: {e}"),
            Self::Storage(e) => write!(f, "storage: {e}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Modbus / protocol errors
// ---------------------------------------------------------------------------

/// Failures raised by the Modbus frame codec (§4.2 of the spec).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModbusError {
    /// `build_read` was given no resolvable registers.
    NoRegisters,
    /// Frame text failed to parse: too short, not hex, wrong byte count.
    Malformed,
    /// The slave device returned a Modbus exception response.
    Exception(u8),
}

impl ModbusError {
    /// The surfaced exception name, for the subset the gateway is known to
    /// return. Unknown codes fall back to a generic label rather than
    /// panicking — the device must keep running on any inverter response.
    pub const fn exception_name(code: u8) -> &'static str {
        match code {
            0x01 => "IllegalFunction",
            0x02 => "IllegalDataAddress",
            0x03 => "IllegalDataValue",
            0x04 => "SlaveDeviceFailure",
            0x05 => "Acknowledge",
            0x06 => "SlaveBusy",
            0x08 => "MemoryParityError",
            0x0A => "GatewayPathUnavailable",
            0x0B => "GatewayTargetDidNotRespond",
            _ => "UnknownException",
        }
    }
}

impl fmt::Display for ModbusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoRegisters => write!(f, "no resolvable registers"),
            Self::Malformed => write!(f, "malformed frame"),
            Self::Exception(code) => {
                write!(f, "exception 0x{code:02X} ({})", Self::exception_name(*code))
            }
        }
    }
}

impl From<ModbusError> for Error {
    fn from(e: ModbusError) -> Self {
        Self::Modbus(e)
    }
}

// ---------------------------------------------------------------------------
// Transport errors
// ---------------------------------------------------------------------------

/// Failures raised by a [`crate::ports::Transport`] call, after the
/// implementation has already exhausted its own retry budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    Timeout,
    ConnectionFailed,
    /// Non-2xx HTTP status.
    Status(u16),
    /// Response body was empty where a body was required.
    EmptyBody,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timed out"),
            Self::ConnectionFailed => write!(f, "connection failed"),
            Self::Status(code) => write!(f, "non-2xx status {code}"),
            Self::EmptyBody => write!(f, "empty body"),
        }
    }
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

// ---------------------------------------------------------------------------
// Security envelope errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityError {
    /// PSK has not been provisioned; sealing cannot proceed.
    KeyUninitialized,
    /// The persisted nonce could not be read back after a successful write.
    NonceReadFailed,
    /// Payload failed to serialize into the envelope.
    SerializationFailed,
    /// MAC did not match on verification (reserved for inbound use).
    MacMismatch,
}

impl fmt::Display for SecurityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KeyUninitialized => write!(f, "PSK not initialized"),
            Self::NonceReadFailed => write!(f, "nonce could not be persisted/read"),
            Self::SerializationFailed => write!(f, "payload serialization failed"),
            Self::MacMismatch => write!(f, "MAC mismatch"),
        }
    }
}

impl From<SecurityError> for Error {
    fn from(e: SecurityError) -> Self {
        Self::Security(e)
    }
}

// ---------------------------------------------------------------------------
// FOTA errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FotaError {
    ManifestFetchFailed,
    ManifestMalformed,
    SizeMismatch,
    ShortRead,
    WriteFailed,
    HashMismatch,
    HmacMismatch,
    BootSetFailed,
}

impl fmt::Display for FotaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ManifestFetchFailed => write!(f, "manifest fetch failed"),
            Self::ManifestMalformed => write!(f, "manifest malformed"),
            Self::SizeMismatch => write!(f, "content-length did not match manifest size"),
            Self::ShortRead => write!(f, "short read during firmware download"),
            Self::WriteFailed => write!(f, "partition write failed"),
            Self::HashMismatch => write!(f, "SHA-256 mismatch"),
            Self::HmacMismatch => write!(f, "HMAC mismatch"),
            Self::BootSetFailed => write!(f, "set boot partition failed"),
        }
    }
}

impl From<FotaError> for Error {
    fn from(e: FotaError) -> Self {
        Self::Fota(e)
    }
}

// ---------------------------------------------------------------------------
// Storage errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    NotFound,
    IoError,
    Corrupted,
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "key not found"),
            Self::IoError => write!(f, "I/O error"),
            Self::Corrupted => write!(f, "stored value corrupted"),
        }
    }
}

impl From<StorageError> for Error {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

/// Agent-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
