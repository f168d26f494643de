//! Host entry point for the EcoWatt edge agent.
//!
//! Wires the [`ecowatt::Supervisor`] to the host adapters in
//! [`ecowatt::adapters`] — a [`LoopbackTransport`] standing in for the
//! inverter gateway/backend/FOTA server, an [`InMemoryPartition`]
//! standing in for dual-slot flash, a [`FileKeyValueStore`] for durable
//! small-record state, and [`SystemClock`] for monotonic time — and runs
//! the dispatch loop (§4.13). None of these adapters are production
//! implementations (§1 "Out of scope"); a real deployment swaps them for
//! a TLS HTTP client, the board's NVS partition driver, and the
//! hardware timer peripheral without touching the library crate.

use anyhow::Result;
use log::info;

use ecowatt::adapters::{FileKeyValueStore, InMemoryPartition, LoopbackTransport, SystemClock};
use ecowatt::config::{self, AgentConfig};
use ecowatt::modbus::RegisterId;
use ecowatt::Supervisor;

/// Demo seed values for the ten holding registers, matching the
/// worked example in spec §8 scenario 1 (VAC1=230, IAC1=5, IPV1=7,
/// PAC=800; everything else left at zero).
const SEED_REGISTERS: [(RegisterId, u16); 4] =
    [(RegisterId::Vac1, 230), (RegisterId::Iac1, 5), (RegisterId::Ipv1, 7), (RegisterId::Pac, 800)];

fn demo_config() -> AgentConfig {
    AgentConfig {
        hmac_psk: [0x2b; 32],
        fota_signing_key: [0x5a; 32],
        ..AgentConfig::default()
    }
}

/// `ecowatt [N]` runs the dispatch loop for `N` idle-sleep iterations
/// (default: forever). This bounds the demo for scripted runs; a real
/// deployment never passes a limit.
fn run_for_ticks_from_args() -> Option<u64> {
    std::env::args().nth(1).and_then(|s| s.parse::<u64>().ok())
}

fn main() -> Result<()> {
    env_logger::init();

    let config = demo_config();
    config::validate(&config).map_err(anyhow::Error::msg)?;
    let device_id = config.device_id.clone();

    let mut store = FileKeyValueStore::open("ecowatt-state.kv");
    let mut partition = InMemoryPartition::new();
    let mut transport = LoopbackTransport::new();
    let clock = SystemClock::new();

    for (reg, value) in SEED_REGISTERS {
        let addr = ecowatt::modbus::registers::address_of(reg);
        transport.set_register(addr, value);
    }

    let mut supervisor = Supervisor::new(config, &store, &clock);

    supervisor.on_boot(&mut partition, &mut store, &clock);
    // Stand in for the host's own post-boot stability checks (§4.10
    // step 5) — a real integration only confirms after verifying the
    // new image is actually healthy.
    supervisor.confirm_boot(&mut store);

    info!("EcoWatt agent starting (device_id={device_id})");

    supervisor.run(&mut transport, &mut partition, &mut store, &clock, run_for_ticks_from_args());

    let snapshot = supervisor.diagnostics_snapshot(&store, &clock);
    info!("final diagnostics snapshot: {snapshot:?}");

    Ok(())
}
