//! # Kernel
//!
//! The kernel context object and the task lifecycle API.
//!
//! All kernel state lives in one [`Kernel`] value. Task bodies receive it as
//! `&mut Kernel`, so the borrow checker enforces the single thread of control
//! the design relies on, and tests can spin up as many isolated kernels as
//! they like.
//!
//! ## Lifecycle
//!
//! ```text
//!  Kernel::new()            start()               shutdown()
//!  ┌──────┐  ───────────►  ┌─────────┐  ───────►  ┌──────────┐
//!  │ Init │                │ Running │            │ Shutdown │
//!  └──────┘                └─────────┘            └──────────┘
//!                               │  starvation
//!                               ▼
//!                          ┌──────────┐
//!                          │ Faulted  │
//!                          └──────────┘
//! ```
//!
//! `start()` resets every table, activates the first task and runs the
//! dispatcher until the kernel leaves `Running`. Shutdown and faults unwind
//! every pending kernel call with the corresponding error.

use heapless::Vec;

use crate::config::{KernelConfig, MAX_FRAMES, MAX_TASK};
use crate::error::{KernelError, KernelResult};
use crate::event::{EventId, EventTable};
use crate::resource::ResourcePool;
use crate::rma::PeriodicTable;
use crate::scheduler::{outranks, InsertMode, ReadyChain};
use crate::semaphore::SemaphorePool;
use crate::task::{
    Priority, SlotState, TaskEntry, TaskId, TaskState, TaskTable, Tick, WaitReason,
};

/// Where the kernel is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Created, `start` not yet called.
    Init,
    /// Inside `start`, dispatching tasks.
    Running,
    /// A task called `shutdown`.
    Shutdown,
    /// Stopped by a fatal error.
    Faulted(KernelError),
}

/// The kernel context.
pub struct Kernel {
    pub(crate) config: KernelConfig,
    pub(crate) lifecycle: Lifecycle,
    pub(crate) tasks: TaskTable,
    pub(crate) ready: ReadyChain,
    /// Tasks with a live body frame, innermost last.
    pub(crate) frames: Vec<TaskId, MAX_FRAMES>,
    pub(crate) resources: ResourcePool,
    pub(crate) semaphores: SemaphorePool,
    pub(crate) events: EventTable,
    pub(crate) periodic: PeriodicTable,
    pub(crate) tick: Tick,
}

impl Kernel {
    /// A kernel in `Init`. Nothing runs until [`start`](Self::start).
    pub fn new(config: KernelConfig) -> Self {
        Self {
            config,
            lifecycle: Lifecycle::Init,
            tasks: TaskTable::new(),
            ready: ReadyChain::new(),
            frames: Vec::new(),
            resources: ResourcePool::new(),
            semaphores: SemaphorePool::new(),
            events: EventTable::new(),
            periodic: PeriodicTable::new(),
            tick: 0,
        }
    }

    // -----------------------------------------------------------------------
    // System control
    // -----------------------------------------------------------------------

    /// Reset all tables, activate the first task and run the kernel.
    ///
    /// Returns `Ok(())` once a task calls [`shutdown`](Self::shutdown), or the
    /// fatal error that stopped the kernel. On `Err` the host must terminate.
    pub fn start(&mut self, entry: TaskEntry, priority: Priority, name: &'static str) -> KernelResult<()> {
        if self.lifecycle == Lifecycle::Running || !self.frames.is_empty() {
            return Err(KernelError::InvalidState);
        }

        *self = Self::new(self.config);
        self.lifecycle = Lifecycle::Running;
        log::info!("kernel start: first task {} (priority {})", name, priority);

        let first = self.create(entry, priority, name)?;
        self.admit(first);

        match self.dispatch(None) {
            Ok(()) | Err(KernelError::Shutdown) => {
                log::info!("kernel stopped at tick {}", self.tick);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Mark the kernel as shut down. Pending blocking calls return
    /// `KernelError::Shutdown` and `start` returns `Ok(())`.
    pub fn shutdown(&mut self) {
        if self.lifecycle == Lifecycle::Running {
            log::info!("kernel shutdown at tick {}", self.tick);
            self.lifecycle = Lifecycle::Shutdown;
        }
    }

    pub(crate) fn ensure_running(&self) -> KernelResult<()> {
        match self.lifecycle {
            Lifecycle::Running => Ok(()),
            Lifecycle::Init => Err(KernelError::InvalidState),
            Lifecycle::Shutdown => Err(KernelError::Shutdown),
            Lifecycle::Faulted(e) => Err(e),
        }
    }

    /// Enter `Faulted`. Returns the error for propagation.
    pub(crate) fn fault(&mut self, error: KernelError) -> KernelError {
        log::error!("kernel fault at tick {}: {}", self.tick, error);
        self.lifecycle = Lifecycle::Faulted(error);
        error
    }

    /// The task currently executing in state `Running`.
    pub(crate) fn running(&self) -> KernelResult<TaskId> {
        match self.executing() {
            Some(id) if self.tasks[id].is_allocated() && self.tasks[id].state == TaskState::Running => {
                Ok(id)
            }
            _ => Err(KernelError::InvalidState),
        }
    }

    /// Queue a dormant task as a new activation.
    pub(crate) fn admit(&mut self, id: TaskId) {
        self.tasks[id].wait = None;
        self.make_ready(id, InsertMode::Tail);
        self.periodic.record_activation(id, self.tick);
    }

    // -----------------------------------------------------------------------
    // Task lifecycle
    // -----------------------------------------------------------------------

    /// Allocate a task slot without scheduling it. The task stays dormant
    /// until `resume`d or released by the periodic sweep.
    pub fn create(&mut self, entry: TaskEntry, priority: Priority, name: &'static str) -> KernelResult<TaskId> {
        self.ensure_running()?;
        let id = self.tasks.allocate(entry, priority, name).map_err(|e| {
            log::warn!("no free task slot for {}", name);
            e
        })?;
        self.periodic.reset_slot(id, self.tick);
        log::debug!("task {} created in slot {} with priority {}", name, id.index(), priority);
        Ok(id)
    }

    /// Create a task and queue it immediately. If it outranks the caller it
    /// runs before this call returns.
    pub fn activate(&mut self, entry: TaskEntry, priority: Priority, name: &'static str) -> KernelResult<TaskId> {
        let id = self.create(entry, priority, name)?;
        log::debug!("activate {}", name);
        self.admit(id);
        self.preempt_point()?;
        Ok(id)
    }

    /// End the running task. Its slot is freed, or kept dormant if the task
    /// is periodic. The body should return right after this call.
    pub fn terminate(&mut self) -> KernelResult<()> {
        self.ensure_running()?;
        let me = self.running()?;
        log::debug!("terminate {}", self.tasks[me].name);

        self.ready.remove(&mut self.tasks, me);
        self.abandon_holdings(me);

        if self.periodic.is_periodic(me) {
            let tcb = &mut self.tasks[me];
            tcb.state = TaskState::Suspended;
            tcb.slot = SlotState::Dormant;
            tcb.ceiling_priority = tcb.base_priority;
            tcb.wait = None;
        } else {
            self.tasks.free(me);
        }
        Ok(())
    }

    /// Take a ready or running task out of the chain. Suspending the running
    /// task blocks it until someone resumes it.
    pub fn suspend(&mut self, task: TaskId) -> KernelResult<()> {
        self.ensure_running()?;
        let id = self.tasks.validate(task)?;

        let state = self.tasks[id].state;
        match state {
            TaskState::Running if self.running() == Ok(id) => {
                self.park_running(id, TaskState::Suspended, None);
                self.block(id)
            }
            TaskState::Ready if self.tasks[id].slot == SlotState::Queued => {
                self.ready.remove(&mut self.tasks, id);
                self.tasks[id].state = TaskState::Suspended;
                log::debug!("{} suspended", self.tasks[id].name);
                Ok(())
            }
            _ => Err(KernelError::InvalidState),
        }
    }

    /// Queue a suspended or dormant task, or wake a delayed one early.
    /// Preempts the caller if the resumed task outranks it.
    pub fn resume(&mut self, task: TaskId) -> KernelResult<()> {
        self.ensure_running()?;
        let id = self.tasks.validate(task)?;
        let tcb = &self.tasks[id];

        match (tcb.state, tcb.slot, tcb.wait) {
            (TaskState::Suspended, SlotState::Dormant, _) => self.admit(id),
            (TaskState::Suspended, SlotState::Parked, _) => self.make_ready(id, InsertMode::Tail),
            (TaskState::Waiting, SlotState::Parked, Some(WaitReason::Delay { .. })) => self.wake(id),
            _ => return Err(KernelError::InvalidState),
        }
        log::debug!("{} resumed", self.tasks[id].name);
        self.preempt_point()
    }

    /// Park the running task for `ticks` logical ticks. The idle sweep wakes
    /// it once the clock reaches the wake tick; `resume` wakes it early.
    /// `delay(0)` yields to equal-priority peers.
    pub fn delay(&mut self, ticks: Tick) -> KernelResult<()> {
        self.ensure_running()?;
        let me = self.running()?;

        if ticks == 0 {
            self.ready.requeue(&mut self.tasks, me, InsertMode::Tail);
            return self.preempt_point();
        }

        let until = self.tick.saturating_add(ticks);
        log::debug!("delay {} for {} ticks", self.tasks[me].name, ticks);
        loop {
            self.park_running(me, TaskState::Waiting, Some(WaitReason::Delay { until }));
            self.block(me)?;
            if self.tasks[me].wait.is_none() || self.tick >= until {
                self.tasks[me].wait = None;
                return Ok(());
            }
        }
    }

    // -----------------------------------------------------------------------
    // Observers
    // -----------------------------------------------------------------------

    /// Configuration the kernel was built with.
    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// Where the kernel is in its life.
    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    /// Head of the ready chain.
    pub fn current_task(&self) -> Option<TaskId> {
        self.ready.head()
    }

    /// The task whose body is executing, if any.
    pub fn running_task(&self) -> Option<TaskId> {
        self.running().ok()
    }

    /// The ready chain in dispatch order.
    pub fn ready_tasks(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.ready.iter(&self.tasks)
    }

    /// State of an allocated task; `None` for free or out-of-range slots.
    pub fn task_state(&self, task: TaskId) -> Option<TaskState> {
        self.tasks.get(task).map(|tcb| tcb.state)
    }

    /// Name given at creation.
    pub fn task_name(&self, task: TaskId) -> Option<&'static str> {
        self.tasks.get(task).map(|tcb| tcb.name)
    }

    /// Priority given at creation.
    pub fn base_priority(&self, task: TaskId) -> Option<Priority> {
        self.tasks.get(task).map(|tcb| tcb.base_priority)
    }

    /// Effective priority, raised by held resources and semaphores.
    pub fn ceiling_priority(&self, task: TaskId) -> Option<Priority> {
        self.tasks.get(task).map(|tcb| tcb.ceiling_priority)
    }

    /// Event the task is blocked on, if any.
    pub fn waiting_event(&self, task: TaskId) -> Option<EventId> {
        self.tasks.get(task).and_then(|tcb| tcb.waiting_event())
    }

    /// Slots left on the free list.
    pub fn free_task_slots(&self) -> usize {
        self.tasks.free_count()
    }

    /// Check the structural invariants of the task table and ready chain:
    ///
    /// - the chain holds only queued `Ready`/`Running` tasks, sorted by
    ///   non-increasing ceiling priority;
    /// - at most one task is `Running`, and it is the executing one;
    /// - every slot is on exactly one of free list, chain, or detached.
    pub fn verify_invariants(&self) -> KernelResult<()> {
        let mut in_chain = [false; MAX_TASK];
        let mut in_free = [false; MAX_TASK];
        let mut previous: Option<Priority> = None;

        for (steps, id) in self.ready.iter(&self.tasks).enumerate() {
            let tcb = &self.tasks[id];
            if steps >= MAX_TASK || in_chain[id.index()] {
                return Err(self.violation("ready chain has a cycle"));
            }
            in_chain[id.index()] = true;
            if !matches!(tcb.state, TaskState::Ready | TaskState::Running) {
                return Err(self.violation("non-ready task in ready chain"));
            }
            if let Some(prev) = previous {
                if outranks(tcb.ceiling_priority, prev) {
                    return Err(self.violation("ready chain out of priority order"));
                }
            }
            previous = Some(tcb.ceiling_priority);
        }

        for (steps, id) in self.tasks.free_slots().enumerate() {
            if steps >= MAX_TASK || in_free[id.index()] {
                return Err(self.violation("free list has a cycle"));
            }
            in_free[id.index()] = true;
        }

        let mut running = 0;
        for tcb in self.tasks.iter() {
            let index = tcb.id.index();
            let consistent = match tcb.slot {
                SlotState::Free => in_free[index] && !in_chain[index],
                SlotState::Queued => in_chain[index] && !in_free[index],
                SlotState::Dormant | SlotState::Parked => !in_chain[index] && !in_free[index],
            };
            if !consistent {
                return Err(self.violation("slot membership mismatch"));
            }
            if tcb.is_allocated() && tcb.state == TaskState::Running {
                running += 1;
                if self.executing() != Some(tcb.id) {
                    return Err(self.violation("running task is not executing"));
                }
            }
        }
        if running > 1 {
            return Err(self.violation("more than one running task"));
        }
        Ok(())
    }

    fn violation(&self, what: &str) -> KernelError {
        log::warn!("invariant violated: {}", what);
        KernelError::InvalidState
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new(KernelConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
