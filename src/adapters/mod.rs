//! In-memory/host adapters standing in for the four out-of-scope
//! collaborators named in §1: `Transport`, `KeyValueStore`,
//! `PartitionDevice`, `Clock`.
//!
//! None of these are production implementations — the real HTTP/TLS
//! stack, flash driver, and hardware timer are explicitly out of scope
//! (§1 "Out of scope", Non-goals). They exist so the binary and the
//! integration tests have something concrete to run against, in the
//! same spirit as the teacher's `adapters/nvs.rs` simulation backend.

pub mod clock;
pub mod kv_store;
pub mod partition;
pub mod transport;

pub use clock::SystemClock;
pub use kv_store::{FileKeyValueStore, MemoryKeyValueStore};
pub use partition::InMemoryPartition;
pub use transport::LoopbackTransport;
