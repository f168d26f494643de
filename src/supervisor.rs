//! Supervisor: wires every component together and runs the dispatch
//! loop (§4.13).
//!
//! Grounded on the tick-orchestration shape of the teacher's
//! `app/service.rs` (`AppService::tick`) — one method that reads
//! inputs, runs exactly one unit of domain work, and returns, with
//! port collaborators passed in at the call site rather than owned
//! behind a trait object. Here the "one unit of work" is one
//! scheduled [`crate::scheduler::Task`] run to completion (§5
//! "Suspension points").

use log::{info, warn};

use crate::config::AgentConfig;
use crate::diagnostics::{Diagnostics, Severity};
use crate::engines::{AcquisitionEngine, FotaEngine, UploadEngine};
use crate::modbus::RegisterId;
use crate::ports::{Clock, KeyValueStore, PartitionDevice, Transport};
use crate::sample::SampleStore;
use crate::scheduler::{StatusReport, TaskKind, TaskScheduler};
use crate::security::SecurityEnvelope;
use crate::timers::TimerSource;

/// All ten registers polled on every tick, in table order (§3
/// "Register").
const POLLED_REGISTERS: [RegisterId; 10] = [
    RegisterId::Vac1,
    RegisterId::Iac1,
    RegisterId::Fac1,
    RegisterId::Vpv1,
    RegisterId::Vpv2,
    RegisterId::Ipv1,
    RegisterId::Ipv2,
    RegisterId::Temp,
    RegisterId::Pow,
    RegisterId::Pac,
];

/// Owns every long-lived component and exposes the dispatch loop that
/// drives them (§4.13, §5 "Scheduling model").
pub struct Supervisor {
    config: AgentConfig,
    scheduler: TaskScheduler,
    timers: TimerSource,
    sample_store: SampleStore,
    diagnostics: Diagnostics,
    security: SecurityEnvelope,
    acquisition: AcquisitionEngine,
    upload: UploadEngine,
    fota: FotaEngine,
}

impl Supervisor {
    /// Construct every component from `config`, loading persisted
    /// state (nonce, diagnostics counters) from `store`, and register
    /// the periodic timers that feed the scheduler.
    pub fn new(config: AgentConfig, store: &dyn KeyValueStore, clock: &dyn Clock) -> Self {
        let mut timers = TimerSource::new();
        timers.register(TaskKind::PollSensors, u64::from(config.poll_interval_ms) / 1000, clock);
        timers.register(TaskKind::UploadData, u64::from(config.upload_interval_ms) / 1000, clock);
        timers.register(TaskKind::CheckCommands, u64::from(config.command_check_interval_ms) / 1000, clock);
        timers.register(TaskKind::CheckConfig, u64::from(config.config_check_interval_ms) / 1000, clock);
        timers.register(TaskKind::CheckFota, u64::from(config.fota_check_interval_ms) / 1000, clock);

        let diagnostics = Diagnostics::new(
            config.device_id.clone(),
            config.diagnostics_ring_capacity,
            clock.monotonic_secs(),
            store,
        );
        let security = SecurityEnvelope::new(config.hmac_psk, config.nonce_baseline, store);

        let acquisition = AcquisitionEngine::new(
            config.slave_address,
            POLLED_REGISTERS.to_vec(),
            config.inverter_base_url.clone(),
            config.inverter_api_key.clone(),
            config.http_timeout_ms,
        );
        let upload = UploadEngine::new(
            config.device_id.clone(),
            POLLED_REGISTERS.to_vec(),
            config.upload_base_url.clone(),
            config.api_key.clone(),
            config.http_timeout_ms,
            config.upload_target_samples,
        );
        let fota = FotaEngine::new(
            config.fota_base_url.clone(),
            config.running_version.clone(),
            config.fota_signing_key,
            config.http_timeout_ms,
            config.fota_confirmation_window_ms,
            config.fota_max_boot_attempts,
            config.fota_max_consecutive_rollbacks,
        );

        Self {
            sample_store: SampleStore::new(config.sample_store_capacity),
            config,
            scheduler: TaskScheduler::new(),
            timers,
            diagnostics,
            security,
            acquisition,
            upload,
            fota,
        }
    }

    /// Must be called once before the dispatch loop starts, after
    /// construction — resolves any pending FOTA boot state (§4.10
    /// step 5).
    pub fn on_boot(&mut self, partition: &mut dyn PartitionDevice, store: &mut dyn KeyValueStore, clock: &dyn Clock) {
        match self.fota.on_boot(partition, store, clock) {
            crate::engines::fota::BootOutcome::RolledBack => {
                warn!("boot count exceeded; rolled back to previous slot");
            }
            crate::engines::fota::BootOutcome::FactoryResetRequired => {
                warn!("consecutive rollback limit reached; factory reset required");
            }
            crate::engines::fota::BootOutcome::AwaitingConfirmation => {
                info!("new firmware awaiting confirmation");
            }
            crate::engines::fota::BootOutcome::Confirmed | crate::engines::fota::BootOutcome::NoPendingUpdate => {}
        }
    }

    /// Confirm the currently running firmware as good, clearing the
    /// rollback window (host calls this after its own stability
    /// checks pass).
    pub fn confirm_boot(&mut self, store: &mut dyn KeyValueStore) {
        self.fota.confirm_boot(store);
    }

    /// Run the dispatch loop forever. `run_for_ticks`, if set, bounds
    /// the number of idle-sleep iterations for host/test use; `None`
    /// runs until the process is killed.
    #[allow(clippy::too_many_arguments)]
    pub fn run(
        &mut self,
        transport: &mut dyn Transport,
        partition: &mut dyn PartitionDevice,
        store: &mut dyn KeyValueStore,
        clock: &dyn Clock,
        run_for_ticks: Option<u64>,
    ) {
        let mut ticks = 0u64;
        loop {
            self.tick(transport, partition, store, clock);
            ticks += 1;
            if run_for_ticks.is_some_and(|limit| ticks >= limit) {
                return;
            }
        }
    }

    /// One iteration of the loop in §4.13: drain fired timers into the
    /// scheduler, run at most one task to completion, or sleep.
    pub fn tick(
        &mut self,
        transport: &mut dyn Transport,
        partition: &mut dyn PartitionDevice,
        store: &mut dyn KeyValueStore,
        clock: &dyn Clock,
    ) {
        for kind in self.timers.poll(clock) {
            self.scheduler.queue(kind, clock);
        }

        // The confirmation window is a post-reboot concern, independent
        // of whether a `CheckFota` task happens to be in flight — it
        // must be checked every tick so a boot that never calls
        // `confirm_boot()` still rolls back once the window lapses.
        self.poll_fota_confirmation(partition, store, clock);

        let Some(task) = self.scheduler.next_task() else {
            clock.sleep(self.config.poll_granularity_ms);
            return;
        };

        self.scheduler.task_started(task.kind);
        self.run_task(task.kind, transport, partition, store, clock);
        self.scheduler.task_completed();
    }

    fn run_task(
        &mut self,
        kind: TaskKind,
        transport: &mut dyn Transport,
        partition: &mut dyn PartitionDevice,
        store: &mut dyn KeyValueStore,
        clock: &dyn Clock,
    ) {
        match kind {
            TaskKind::PollSensors => {
                self.acquisition.poll(transport, &mut self.sample_store, &mut self.diagnostics, store, clock);
            }
            TaskKind::UploadData => {
                self.upload.run(&mut self.sample_store, &mut self.security, transport, &mut self.diagnostics, store, clock);
            }
            TaskKind::CheckCommands => {
                // No remote-command surface is exposed by the inverter
                // gateway beyond register read/write (§1 Non-goals);
                // the slot exists so a host integration can layer one
                // in without touching the scheduler.
            }
            TaskKind::CheckConfig => {
                // Configuration is supplied once at construction (§6);
                // this task is a placeholder for a future remote-config
                // poll and currently only logs a diagnostic tick.
                self.diagnostics.log_event(clock.monotonic_secs(), Severity::Info, "config check tick", 0);
            }
            TaskKind::CheckFota => {
                if !self.scheduler.can_start_fota() {
                    return;
                }
                match self.fota.run(transport, partition, store, &mut self.diagnostics, clock) {
                    Ok(Some(version)) => {
                        info!("firmware {version} staged; reboot required");
                        self.fota.report_outcome(transport, &self.config.device_id, &version, "success", "staged", clock, 0);
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!("FOTA attempt failed: {e}");
                        self.fota.report_outcome(transport, &self.config.device_id, &self.config.running_version, "failed", &e.to_string(), clock, 0);
                    }
                }
            }
        }
    }

    fn poll_fota_confirmation(&mut self, partition: &mut dyn PartitionDevice, store: &mut dyn KeyValueStore, clock: &dyn Clock) {
        let _ = self.fota.poll_confirmation_window(partition, store, clock);
    }

    /// Diagnostics snapshot, the `printStatus()`/diagnostics-JSON
    /// equivalent (SPEC_FULL §B.1, §B.2), merged with the `fota/`
    /// rollback bookkeeping (SPEC_FULL §B.5).
    #[must_use]
    pub fn diagnostics_snapshot(&self, store: &dyn KeyValueStore, clock: &dyn Clock) -> crate::diagnostics::Snapshot {
        let mut snapshot = self.diagnostics.snapshot(clock.monotonic_secs());
        let fota_status = self.fota.status(store);
        snapshot.fota_consecutive_rollbacks = fota_status.consecutive_rollbacks;
        snapshot.fota_factory_reset_required = fota_status.factory_reset_required;
        snapshot
    }

    #[must_use]
    pub fn scheduler_status(&self) -> StatusReport {
        self.scheduler.status_report()
    }

    /// Administrative reset of the scheduler's queue and in-flight
    /// state (SPEC_FULL §B.3).
    pub fn clear_all_tasks(&mut self) {
        self.scheduler.clear_all();
    }
}
