//! EcoWatt edge agent library.
//!
//! Exposes the pure-logic modules that make up the field agent: the Modbus
//! frame codec, the sample ring buffer and aggregator, the telemetry
//! compressor, the security envelope, diagnostics, the task scheduler, and
//! the three engines (acquisition / upload / FOTA) that the [`Supervisor`]
//! wires together. Everything outside this crate — the HTTP transport, the
//! durable key/value store, the flash partition device, and wall-clock time
//! — is injected through the port traits in [`ports`].

#![deny(unused_must_use)]

pub mod aggregate;
pub mod config;
pub mod diagnostics;
pub mod engines;
pub mod error;
pub mod modbus;
pub mod ports;
pub mod sample;
pub mod scheduler;
pub mod security;
pub mod supervisor;
pub mod telemetry;
pub mod timers;

pub mod adapters;

pub use supervisor::Supervisor;
