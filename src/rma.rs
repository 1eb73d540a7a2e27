//! # Periodic Admission
//!
//! Rate-monotonic style release of periodic tasks, driven by a logical tick
//! that only advances while nothing is runnable.
//!
//! ```text
//!   dispatch() ── nothing selectable ──► idle()
//!                                          │ tick += 1
//!                                          ▼
//!                                   check_deadlines()
//!                                    ├─ delayed task due    → wake
//!                                    ├─ periodic, Dormant   → admit
//!                                    ├─ periodic, Running   → skip
//!                                    └─ periodic, otherwise → overrun
//! ```
//!
//! A task is periodic while its period is non-zero. Terminating a periodic
//! task leaves it dormant with its slot, name and timing intact until the
//! next release. Deadlines are recorded but not enforced.
//!
//! The idle tick limit only counts ticks at which no delay expiry or dormant
//! release is still scheduled, so long periods and delays never starve.

use crate::config::MAX_TASK;
use crate::error::{KernelError, KernelResult};
use crate::kernel::Kernel;
use crate::task::{SlotState, TaskId, TaskState, Tick, WaitReason};

/// Per-slot timing metadata.
pub struct PeriodicTable {
    period: [Tick; MAX_TASK],
    deadline: [Tick; MAX_TASK],
    last_activation: [Tick; MAX_TASK],
    overruns: [u32; MAX_TASK],
}

impl PeriodicTable {
    pub const fn new() -> Self {
        Self {
            period: [0; MAX_TASK],
            deadline: [0; MAX_TASK],
            last_activation: [0; MAX_TASK],
            overruns: [0; MAX_TASK],
        }
    }

    /// Forget any timing left over from a previous occupant of the slot.
    pub(crate) fn reset_slot(&mut self, id: TaskId, now: Tick) {
        let i = id.index();
        self.period[i] = 0;
        self.deadline[i] = 0;
        self.last_activation[i] = now;
        self.overruns[i] = 0;
    }

    pub(crate) fn record_activation(&mut self, id: TaskId, now: Tick) {
        self.last_activation[id.index()] = now;
    }

    pub fn is_periodic(&self, id: TaskId) -> bool {
        self.period[id.index()] > 0
    }

    /// Tick of the next release owed to `id`.
    fn next_activation(&self, id: TaskId) -> Tick {
        let i = id.index();
        self.last_activation[i].saturating_add(self.period[i])
    }

    /// Whether a release is owed to `id` at `now`.
    fn is_due(&self, id: TaskId, now: Tick) -> bool {
        let i = id.index();
        self.period[i] > 0 && now.wrapping_sub(self.last_activation[i]) >= self.period[i]
    }
}

impl Default for PeriodicTable {
    fn default() -> Self {
        Self::new()
    }
}

impl Kernel {
    /// Slot lookup for timing metadata: out-of-range ids are `InvalidId`,
    /// free slots `InvalidState`.
    fn timing_slot(&self, task: TaskId) -> KernelResult<TaskId> {
        match self.tasks.slot(task) {
            None => Err(KernelError::InvalidId),
            Some(tcb) if !tcb.is_allocated() => Err(KernelError::InvalidState),
            Some(_) => Ok(task),
        }
    }

    /// Make `task` periodic with the given period. Zero makes it aperiodic.
    pub fn set_period(&mut self, task: TaskId, ticks: Tick) -> KernelResult<()> {
        self.ensure_running()?;
        let id = self.timing_slot(task)?;
        self.periodic.period[id.index()] = ticks;
        log::debug!("{} period set to {}", self.tasks[id].name, ticks);
        Ok(())
    }

    /// Record a relative deadline for `task`. Stored, not enforced.
    pub fn set_deadline(&mut self, task: TaskId, ticks: Tick) -> KernelResult<()> {
        self.ensure_running()?;
        let id = self.timing_slot(task)?;
        self.periodic.deadline[id.index()] = ticks;
        Ok(())
    }

    /// Release period in ticks; zero for aperiodic tasks.
    pub fn period(&self, task: TaskId) -> Option<Tick> {
        self.tasks.get(task).map(|_| self.periodic.period[task.index()])
    }

    pub fn deadline(&self, task: TaskId) -> Option<Tick> {
        self.tasks.get(task).map(|_| self.periodic.deadline[task.index()])
    }

    /// Tick of the latest release or overrun.
    pub fn last_activation(&self, task: TaskId) -> Option<Tick> {
        self.tasks.get(task).map(|_| self.periodic.last_activation[task.index()])
    }

    /// Releases that found the previous one still unfinished.
    pub fn overruns(&self, task: TaskId) -> Option<u32> {
        self.tasks.get(task).map(|_| self.periodic.overruns[task.index()])
    }

    /// Current logical tick.
    pub fn tick(&self) -> Tick {
        self.tick
    }

    /// Advance the clock until something becomes selectable for `stop`.
    pub(crate) fn idle(&mut self, stop: Option<TaskId>) -> KernelResult<()> {
        let mut idle_ticks: u32 = 0;
        loop {
            if !self.has_time_source() {
                log::error!("idle with no periodic or delayed task");
                return Err(self.fault(KernelError::Starvation));
            }
            if idle_ticks >= self.config.idle_tick_limit {
                log::error!("idle for {} ticks", idle_ticks);
                return Err(self.fault(KernelError::Starvation));
            }

            self.tick = self.tick.wrapping_add(1);
            if !self.next_release().is_some_and(|at| at >= self.tick) {
                idle_ticks += 1;
            }
            self.check_deadlines();

            if self.select(stop).is_some() {
                log::trace!("idle ends at tick {}", self.tick);
                return Ok(());
            }
        }
    }

    /// Sweep every slot for due delays and periodic releases at the
    /// current tick.
    pub(crate) fn check_deadlines(&mut self) {
        let now = self.tick;
        for index in 0..MAX_TASK {
            let id = TaskId::new(index);
            let tcb = &self.tasks[id];
            if !tcb.is_allocated() {
                continue;
            }

            if let (TaskState::Waiting, Some(WaitReason::Delay { until })) = (tcb.state, tcb.wait) {
                if now >= until {
                    log::debug!("{} delay expired at tick {}", tcb.name, now);
                    self.wake(id);
                }
            }

            if !self.periodic.is_due(id, now) {
                continue;
            }
            let tcb = &self.tasks[id];
            match (tcb.slot, tcb.state) {
                (SlotState::Dormant, _) => {
                    log::info!("release {} at tick {}", tcb.name, now);
                    self.admit(id);
                }
                (_, TaskState::Running) => {}
                _ => {
                    log::warn!("{} overran its period at tick {}", tcb.name, now);
                    self.periodic.overruns[index] = self.periodic.overruns[index].saturating_add(1);
                    self.periodic.record_activation(id, now);
                }
            }
        }
    }

    /// Earliest tick at which a delay expires or a dormant periodic task is
    /// released.
    fn next_release(&self) -> Option<Tick> {
        self.tasks
            .iter()
            .filter(|tcb| tcb.is_allocated())
            .filter_map(|tcb| match (tcb.state, tcb.slot, tcb.wait) {
                (TaskState::Waiting, _, Some(WaitReason::Delay { until })) => Some(until),
                (_, SlotState::Dormant, _) if self.periodic.is_periodic(tcb.id) => {
                    Some(self.periodic.next_activation(tcb.id))
                }
                _ => None,
            })
            .min()
    }

    /// Whether the clock can still make something runnable.
    pub(crate) fn has_time_source(&self) -> bool {
        self.tasks.iter().any(|tcb| {
            tcb.is_allocated()
                && (self.periodic.is_periodic(tcb.id)
                    || matches!(tcb.wait, Some(WaitReason::Delay { .. })))
        })
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::config::KernelConfig;

    thread_local! {
        static RELEASES: RefCell<Vec<(Tick, Tick)>> = RefCell::new(Vec::new());
    }

    fn take_releases() -> Vec<(Tick, Tick)> {
        RELEASES.with(|r| core::mem::take(&mut *r.borrow_mut()))
    }

    #[test]
    fn test_due_after_full_period() {
        let mut table = PeriodicTable::new();
        let id = TaskId::new(3);
        table.reset_slot(id, 10);
        assert!(!table.is_periodic(id));
        assert!(!table.is_due(id, 100));

        table.period[3] = 4;
        assert!(!table.is_due(id, 13));
        assert!(table.is_due(id, 14));
        table.record_activation(id, 14);
        assert!(!table.is_due(id, 17));
    }

    fn sampler(k: &mut Kernel) {
        let me = k.running_task().unwrap();
        let last = k.last_activation(me).unwrap();
        RELEASES.with(|r| r.borrow_mut().push((k.tick(), last)));
        k.terminate().unwrap();
        assert_eq!(k.task_state(me), Some(TaskState::Suspended));
        if RELEASES.with(|r| r.borrow().len()) == 3 {
            k.shutdown();
        }
    }

    fn schedule_sampler(k: &mut Kernel) {
        let id = k.create(sampler, 3, "sampler").unwrap();
        k.set_period(id, 5).unwrap();
        k.set_deadline(id, 4).unwrap();
        assert_eq!(k.period(id), Some(5));
        assert_eq!(k.deadline(id), Some(4));
        k.terminate().unwrap();
    }

    #[test]
    fn test_released_at_multiples_of_period() {
        take_releases();
        let mut kernel = Kernel::new(KernelConfig::new());
        kernel.start(schedule_sampler, 1, "setup").unwrap();
        assert_eq!(take_releases(), [(5, 5), (10, 10), (15, 15)]);
    }

    fn slow(k: &mut Kernel) {
        let me = k.running_task().unwrap();
        RELEASES.with(|r| r.borrow_mut().push((k.tick(), k.overruns(me).unwrap() as Tick)));
        if RELEASES.with(|r| r.borrow().len()) == 2 {
            k.terminate().unwrap();
            k.shutdown();
            return;
        }
        k.delay(5).unwrap();
        k.terminate().unwrap();
    }

    fn schedule_slow(k: &mut Kernel) {
        let id = k.create(slow, 3, "slow").unwrap();
        k.set_period(id, 3).unwrap();
        k.terminate().unwrap();
    }

    #[test]
    fn test_unfinished_release_counts_as_overrun() {
        take_releases();
        let mut kernel = Kernel::new(KernelConfig::new());
        kernel.start(schedule_slow, 1, "setup").unwrap();
        // Released at 3, still delayed at 6 (overrun), done at 8, next
        // release three ticks after the overrun.
        assert_eq!(take_releases(), [(3, 0), (9, 1)]);
    }

    fn bad_timing(k: &mut Kernel) {
        assert_eq!(k.set_period(TaskId::new(MAX_TASK), 1), Err(KernelError::InvalidId));
        assert_eq!(k.set_deadline(TaskId::new(MAX_TASK + 4), 1), Err(KernelError::InvalidId));
        assert_eq!(k.set_period(TaskId::new(MAX_TASK - 1), 1), Err(KernelError::InvalidState));
        assert_eq!(k.period(TaskId::new(MAX_TASK - 1)), None);
        k.terminate().unwrap();
        k.shutdown();
    }

    #[test]
    fn test_timing_on_bad_slots() {
        let mut kernel = Kernel::new(KernelConfig::new());
        assert_eq!(kernel.start(bad_timing, 1, "bad"), Ok(()));
    }

    fn stuck(k: &mut Kernel) {
        let me = k.running_task().unwrap();
        // Periodic, but never dormant again: its releases only overrun.
        k.set_period(me, 3).unwrap();
        let _ = k.wait_event(crate::event::EventId::new(0), "never");
    }

    #[test]
    fn test_idle_tick_limit() {
        let mut kernel = Kernel::new(KernelConfig::new().with_idle_tick_limit(10));
        assert_eq!(kernel.start(stuck, 1, "stuck"), Err(KernelError::Starvation));
        assert_eq!(kernel.tick(), 10);
        assert_eq!(kernel.overruns(TaskId::new(0)), Some(3));
    }

    fn rare(k: &mut Kernel) {
        RELEASES.with(|r| r.borrow_mut().push((k.tick(), 0)));
        k.terminate().unwrap();
        k.shutdown();
    }

    fn schedule_rare(k: &mut Kernel) {
        let id = k.create(rare, 3, "rare").unwrap();
        k.set_period(id, 1500).unwrap();
        k.terminate().unwrap();
    }

    #[test]
    fn test_period_beyond_idle_limit() {
        take_releases();
        let mut kernel = Kernel::new(KernelConfig::new());
        assert!(kernel.config().idle_tick_limit < 1500);
        assert_eq!(kernel.start(schedule_rare, 1, "setup"), Ok(()));
        assert_eq!(take_releases(), [(1500, 0)]);
    }

    fn long_nap(k: &mut Kernel) {
        k.delay(2500).unwrap();
        RELEASES.with(|r| r.borrow_mut().push((k.tick(), 0)));
        k.terminate().unwrap();
        k.shutdown();
    }

    #[test]
    fn test_delay_beyond_idle_limit() {
        take_releases();
        let mut kernel = Kernel::new(KernelConfig::new());
        assert_eq!(kernel.start(long_nap, 2, "napper"), Ok(()));
        assert_eq!(take_releases(), [(2500, 0)]);
    }
}
