//! Modbus RTU-over-HTTP framing: CRC, hex encoding, the register table,
//! and request/response codec (§4.1, §4.2).

pub mod codec;
pub mod crc;
pub mod hex;
pub mod registers;

pub use codec::{build_read, build_write, decode_read_response, parse, ParseOutcome};
pub use crc::crc16;
pub use registers::{RegisterDef, RegisterId, REGISTERS};
