//! Priority task scheduler and single-in-flight state machine (§4.9).
//!
//! Grounded on the original `TaskScheduler`
//! (`PIO/ECOWATT/src/application/task_scheduler.cpp`): a capacity-bounded
//! FIFO queue with lowest-number-wins priority selection, `queueTask`
//! deduplication, and FOTA-exclusive blocking. The teacher's own
//! `firmware/src/scheduler.rs` informs the delegate-free, directly
//! polled shape used here (`next_task`/`task_started`/`task_completed`
//! rather than callback dispatch) since the spec's scheduler is pulled
//! by the supervisor loop, not pushed to.

use std::collections::VecDeque;

use crate::ports::Clock;

/// Upper bound on queued tasks (§4.9).
pub const MAX_TASK_QUEUE_SIZE: usize = 16;

/// The five kinds of work the supervisor dispatches (§3 "Task").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    PollSensors,
    UploadData,
    CheckCommands,
    CheckConfig,
    CheckFota,
}

/// Fixed priority ordering; lower value runs first (§3 "Task").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Critical,
    High,
    Medium,
    Low,
}

impl TaskKind {
    /// The priority fixed for each task kind (§3).
    #[must_use]
    pub const fn priority(self) -> Priority {
        match self {
            Self::PollSensors | Self::UploadData => Priority::Critical,
            Self::CheckCommands => Priority::High,
            Self::CheckConfig => Priority::Medium,
            Self::CheckFota => Priority::Low,
        }
    }

    /// The [`SystemState`] entered while this task kind runs (§3).
    #[must_use]
    pub const fn running_state(self) -> SystemState {
        match self {
            Self::PollSensors => SystemState::Polling,
            Self::UploadData => SystemState::Uploading,
            Self::CheckCommands => SystemState::Commanding,
            Self::CheckConfig => SystemState::ConfigCheck,
            Self::CheckFota => SystemState::Fota,
        }
    }
}

/// A queued unit of work (§3 "Task").
#[derive(Debug, Clone, Copy)]
pub struct Task {
    pub kind: TaskKind,
    pub priority: Priority,
    pub queued_at: u64,
}

/// Current supervisor activity (§3 "SystemState").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemState {
    Idle,
    Polling,
    Uploading,
    Commanding,
    ConfigCheck,
    Fota,
}

/// A snapshot of scheduler state, the `printStatus()` equivalent of the
/// original firmware (SPEC_FULL §B.1) — observable, not contractual.
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub state: SystemState,
    pub current_task: Option<TaskKind>,
    pub queue_len: usize,
    pub completed_count: u64,
    pub dropped_count: u64,
}

/// The priority queue + single-in-flight state machine (§4.9).
pub struct TaskScheduler {
    queue: VecDeque<Task>,
    state: SystemState,
    current_task: Option<TaskKind>,
    completed_count: u64,
    dropped_count: u64,
}

impl TaskScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self {
            queue: VecDeque::with_capacity(MAX_TASK_QUEUE_SIZE),
            state: SystemState::Idle,
            current_task: None,
            completed_count: 0,
            dropped_count: 0,
        }
    }

    /// Enqueue a task of `kind` at its fixed priority.
    ///
    /// Deduplicates: if `kind` is already queued, returns `true` without
    /// adding a second entry. Drops the task (returns `false`, bumps the
    /// dropped counter) if the queue is at `MAX_TASK_QUEUE_SIZE`.
    pub fn queue(&mut self, kind: TaskKind, clock: &dyn Clock) -> bool {
        if self.queue.iter().any(|t| t.kind == kind) {
            return true;
        }
        if self.queue.len() >= MAX_TASK_QUEUE_SIZE {
            self.dropped_count += 1;
            return false;
        }
        self.queue.push_back(Task {
            kind,
            priority: kind.priority(),
            queued_at: clock.monotonic_secs(),
        });
        true
    }

    /// Pop the next task to run, or `None` if the system is not `Idle`
    /// or the queue is empty. Ties break on earliest `queued_at`;
    /// selection preserves the relative order of the remaining items.
    pub fn next_task(&mut self) -> Option<Task> {
        if self.state != SystemState::Idle || self.queue.is_empty() {
            return None;
        }
        let mut best_index = 0;
        for (i, task) in self.queue.iter().enumerate() {
            let best = &self.queue[best_index];
            if task.priority < best.priority
                || (task.priority == best.priority && task.queued_at < best.queued_at)
            {
                best_index = i;
            }
        }
        self.queue.remove(best_index)
    }

    /// Transition into the running state for `kind` (§4.9).
    pub fn task_started(&mut self, kind: TaskKind) {
        self.current_task = Some(kind);
        self.state = kind.running_state();
    }

    /// Return to `Idle` and count the completion.
    pub fn task_completed(&mut self) {
        self.current_task = None;
        self.state = SystemState::Idle;
        self.completed_count += 1;
    }

    /// True iff idle and no `Critical`-priority task is waiting (§4.9).
    #[must_use]
    pub fn can_start_fota(&self) -> bool {
        self.state == SystemState::Idle
            && !self.queue.iter().any(|t| t.priority == Priority::Critical)
    }

    #[must_use]
    pub fn state(&self) -> SystemState {
        self.state
    }

    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    #[must_use]
    pub fn dropped_count(&self) -> u64 {
        self.dropped_count
    }

    #[must_use]
    pub fn completed_count(&self) -> u64 {
        self.completed_count
    }

    /// Administrative reset, preserved from the original firmware's
    /// `clearAllTasks()` (SPEC_FULL §B.3).
    pub fn clear_all(&mut self) {
        self.queue.clear();
        self.current_task = None;
        self.state = SystemState::Idle;
    }

    /// Observable status snapshot (SPEC_FULL §B.1).
    #[must_use]
    pub fn status_report(&self) -> StatusReport {
        StatusReport {
            state: self.state,
            current_task: self.current_task,
            queue_len: self.queue.len(),
            completed_count: self.completed_count,
            dropped_count: self.dropped_count,
        }
    }
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeClock(std::cell::Cell<u64>);
    impl Clock for FakeClock {
        fn monotonic_secs(&self) -> u64 {
            let v = self.0.get();
            self.0.set(v + 1);
            v
        }
        fn sleep(&self, _millis: u32) {}
    }

    #[test]
    fn dedup_collapses_duplicate_kind() {
        let clock = FakeClock(std::cell::Cell::new(0));
        let mut sched = TaskScheduler::new();
        assert!(sched.queue(TaskKind::PollSensors, &clock));
        assert!(sched.queue(TaskKind::PollSensors, &clock));
        assert_eq!(sched.queue_len(), 1);
    }

    #[test]
    fn drops_beyond_capacity() {
        let clock = FakeClock(std::cell::Cell::new(0));
        let mut sched = TaskScheduler::new();
        let kinds = [
            TaskKind::PollSensors,
            TaskKind::UploadData,
            TaskKind::CheckCommands,
            TaskKind::CheckConfig,
            TaskKind::CheckFota,
        ];
        // Fill via distinct queued_at without dedup by cycling different
        // synthetic kinds isn't possible (only 5 kinds exist); instead
        // verify the capacity behavior directly against the queue.
        for _ in 0..MAX_TASK_QUEUE_SIZE {
            sched.queue.push_back(Task {
                kind: kinds[0],
                priority: Priority::Critical,
                queued_at: 0,
            });
        }
        assert!(!sched.queue(TaskKind::CheckFota, &clock));
        assert_eq!(sched.dropped_count(), 1);
    }

    #[test]
    fn priority_and_dedup_scenario_10() {
        let clock = FakeClock(std::cell::Cell::new(0));
        let mut sched = TaskScheduler::new();
        for kind in [
            TaskKind::CheckFota,
            TaskKind::CheckConfig,
            TaskKind::UploadData,
            TaskKind::PollSensors,
            TaskKind::PollSensors, // duplicate, collapses
            TaskKind::CheckCommands,
        ] {
            sched.queue(kind, &clock);
        }

        let mut order = Vec::new();
        while let Some(task) = sched.next_task() {
            order.push(task.kind);
            sched.task_started(task.kind);
            sched.task_completed();
        }
        // Poll and Upload are both Critical; earliest-queued (Poll) wins first.
        assert_eq!(
            order,
            vec![
                TaskKind::PollSensors,
                TaskKind::UploadData,
                TaskKind::CheckCommands,
                TaskKind::CheckConfig,
                TaskKind::CheckFota,
            ]
        );
    }

    #[test]
    fn fota_blocks_next_task_until_idle() {
        let clock = FakeClock(std::cell::Cell::new(0));
        let mut sched = TaskScheduler::new();
        sched.queue(TaskKind::CheckFota, &clock);
        let task = sched.next_task().unwrap();
        sched.task_started(task.kind);

        sched.queue(TaskKind::PollSensors, &clock);
        assert!(sched.next_task().is_none());

        sched.task_completed();
        assert!(sched.next_task().is_some());
    }

    #[test]
    fn can_start_fota_false_when_critical_queued() {
        let clock = FakeClock(std::cell::Cell::new(0));
        let mut sched = TaskScheduler::new();
        assert!(sched.can_start_fota());
        sched.queue(TaskKind::PollSensors, &clock);
        assert!(!sched.can_start_fota());
    }

    #[test]
    fn clear_all_resets_to_idle() {
        let clock = FakeClock(std::cell::Cell::new(0));
        let mut sched = TaskScheduler::new();
        sched.queue(TaskKind::PollSensors, &clock);
        let task = sched.next_task().unwrap();
        sched.task_started(task.kind);
        sched.clear_all();
        assert_eq!(sched.state(), SystemState::Idle);
        assert_eq!(sched.queue_len(), 0);
    }
}
