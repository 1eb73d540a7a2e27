//! # Events
//!
//! A fixed table of level-triggered event flags. Setting an event releases
//! every task waiting on it; the flag stays set until explicitly cleared, so
//! later waiters pass straight through.

use crate::config::{MAX_EVENT, MAX_TASK};
use crate::error::{KernelError, KernelResult};
use crate::kernel::Kernel;
use crate::task::{TaskId, TaskState, WaitReason};

/// Identity of an event flag: `0..MAX_EVENT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventId(usize);

impl EventId {
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    pub const fn index(self) -> usize {
        self.0
    }
}

/// Level of an event flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventStatus {
    Set,
    Clear,
}

#[derive(Debug, Clone, Copy)]
struct EventSlot {
    status: EventStatus,
    name: &'static str,
}

pub struct EventTable {
    slots: [EventSlot; MAX_EVENT],
}

impl EventTable {
    pub const fn new() -> Self {
        Self {
            slots: [EventSlot {
                status: EventStatus::Clear,
                name: "",
            }; MAX_EVENT],
        }
    }

    pub fn validate(&self, id: EventId) -> KernelResult<EventId> {
        if id.0 < MAX_EVENT {
            Ok(id)
        } else {
            Err(KernelError::InvalidId)
        }
    }

    fn status(&self, id: EventId) -> EventStatus {
        self.slots[id.0].status
    }
}

impl Default for EventTable {
    fn default() -> Self {
        Self::new()
    }
}

impl Kernel {
    /// Set `event` and release its waiters in slot order. The caller is
    /// preempted after each wakeup that outranks it.
    pub fn set_event(&mut self, event: EventId, name: &'static str) -> KernelResult<()> {
        self.ensure_running()?;
        let id = self.events.validate(event)?;
        let slot = &mut self.events.slots[id.0];
        slot.status = EventStatus::Set;
        slot.name = name;
        log::debug!("event {} set", name);

        for index in 0..MAX_TASK {
            let task = TaskId::new(index);
            let tcb = &self.tasks[task];
            if tcb.state == TaskState::Waiting && tcb.waiting_event() == Some(id) {
                log::debug!("{} woken by {}", tcb.name, name);
                self.wake(task);
                self.preempt_point()?;
            }
        }
        Ok(())
    }

    /// Clear `event`. Tasks that already passed it are unaffected.
    pub fn clear_event(&mut self, event: EventId, name: &'static str) -> KernelResult<()> {
        self.ensure_running()?;
        let id = self.events.validate(event)?;
        self.events.slots[id.0].status = EventStatus::Clear;
        log::debug!("event {} cleared", name);
        Ok(())
    }

    /// Block the running task until `event` is set. Returns at once if it
    /// already is.
    pub fn wait_event(&mut self, event: EventId, name: &'static str) -> KernelResult<()> {
        self.ensure_running()?;
        let me = self.running()?;
        let id = self.events.validate(event)?;

        loop {
            if self.events.status(id) == EventStatus::Set {
                self.tasks[me].wait = None;
                log::trace!("event {} already set", name);
                return Ok(());
            }
            log::debug!("{} waits for {}", self.tasks[me].name, name);
            self.park_running(me, TaskState::Waiting, Some(WaitReason::Event(id)));
            self.block(me)?;
            if self.tasks[me].wait.is_none() {
                return Ok(());
            }
        }
    }

    /// `None` for out-of-range ids.
    pub fn event_status(&self, event: EventId) -> Option<EventStatus> {
        let id = self.events.validate(event).ok()?;
        Some(self.events.status(id))
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
        static TRACE: RefCell<Vec<&'static str>> = RefCell::new(Vec::new());
    }

    fn mark(step: &'static str) {
        TRACE.with(|t| t.borrow_mut().push(step));
    }

    fn take_trace() -> Vec<&'static str> {
        TRACE.with(|t| core::mem::take(&mut *t.borrow_mut()))
    }

    const READY: EventId = EventId::new(2);

    #[test]
    fn test_table_bounds() {
        let table = EventTable::new();
        assert_eq!(table.validate(EventId::new(MAX_EVENT - 1)), Ok(EventId::new(MAX_EVENT - 1)));
        assert_eq!(table.validate(EventId::new(MAX_EVENT)), Err(KernelError::InvalidId));
        assert_eq!(table.status(EventId::new(0)), EventStatus::Clear);
    }

    fn fast_path(k: &mut Kernel) {
        assert_eq!(k.set_event(EventId::new(MAX_EVENT), "bad"), Err(KernelError::InvalidId));
        assert_eq!(k.wait_event(EventId::new(MAX_EVENT), "bad"), Err(KernelError::InvalidId));
        assert_eq!(k.event_status(EventId::new(MAX_EVENT)), None);

        k.set_event(READY, "ready").unwrap();
        k.set_event(READY, "ready").unwrap();
        k.wait_event(READY, "ready").unwrap();
        // Level-triggered: waiting does not consume the flag.
        assert_eq!(k.event_status(READY), Some(EventStatus::Set));
        k.clear_event(READY, "ready").unwrap();
        assert_eq!(k.event_status(READY), Some(EventStatus::Clear));
        mark("fast:done");
        k.terminate().unwrap();
        k.shutdown();
    }

    #[test]
    fn test_already_set_returns_immediately() {
        take_trace();
        let mut kernel = Kernel::new(KernelConfig::new());
        kernel.start(fast_path, 1, "fast").unwrap();
        assert_eq!(take_trace(), ["fast:done"]);
    }

    fn setter(k: &mut Kernel) {
        mark("setter:set");
        k.set_event(READY, "ready").unwrap();
        mark("setter:after");
        k.terminate().unwrap();
    }

    fn blocked(k: &mut Kernel) {
        k.activate(setter, 1, "setter").unwrap();
        mark("blocked:wait");
        k.wait_event(READY, "ready").unwrap();
        assert_eq!(k.waiting_event(k.running_task().unwrap()), None);
        mark("blocked:woke");
        k.terminate().unwrap();
        k.shutdown();
    }

    #[test]
    fn test_wait_blocks_until_set() {
        take_trace();
        let mut kernel = Kernel::new(KernelConfig::new());
        kernel.start(blocked, 6, "blocked").unwrap();
        // The waiter's frame is beneath the setter, so it resumes once the
        // setter returns.
        assert_eq!(
            take_trace(),
            ["blocked:wait", "setter:set", "setter:after", "blocked:woke"]
        );
    }

    thread_local! {
        static WAITERS: RefCell<Vec<TaskId>> = RefCell::new(Vec::new());
    }

    fn first_waiter(k: &mut Kernel) {
        WAITERS.with(|w| w.borrow_mut().push(k.running_task().unwrap()));
        mark("first:wait");
        k.wait_event(READY, "ready").unwrap();
        mark("first:woke");
        k.terminate().unwrap();
        k.shutdown();
    }

    fn second_waiter(k: &mut Kernel) {
        WAITERS.with(|w| w.borrow_mut().push(k.running_task().unwrap()));
        mark("second:wait");
        k.wait_event(READY, "ready").unwrap();
        mark("second:woke");
        k.terminate().unwrap();
    }

    fn releaser(k: &mut Kernel) {
        let me = k.running_task().unwrap();
        mark("releaser:set");
        k.set_event(READY, "ready").unwrap();

        // Both waiters are queued ahead of us in the order they were woken.
        let mut expected = WAITERS.with(|w| w.borrow().clone());
        expected.push(me);
        assert_eq!(k.ready_tasks().collect::<Vec<_>>(), expected);
        k.verify_invariants().unwrap();
        mark("releaser:done");
        k.terminate().unwrap();
    }

    fn spawner(k: &mut Kernel) {
        k.activate(first_waiter, 4, "first").unwrap();
        k.activate(second_waiter, 4, "second").unwrap();
        k.activate(releaser, 2, "releaser").unwrap();
        k.terminate().unwrap();
    }

    #[test]
    fn test_set_wakes_every_waiter_in_order() {
        take_trace();
        WAITERS.with(|w| w.borrow_mut().clear());
        let mut kernel = Kernel::new(KernelConfig::new());
        kernel.start(spawner, 9, "spawner").unwrap();
        assert_eq!(
            take_trace(),
            [
                "first:wait",
                "second:wait",
                "releaser:set",
                "releaser:done",
                "second:woke",
                "first:woke"
            ]
        );
    }

    fn latecomer(k: &mut Kernel) {
        mark("late");
        k.terminate().unwrap();
        k.shutdown();
    }

    fn announcer(k: &mut Kernel) {
        mark("announcer:set");
        k.set_event(READY, "ready").unwrap();
        // Outranks us but not the woken waiter beneath our frame.
        k.activate(latecomer, 2, "late").unwrap();
        mark("announcer:after");
        k.terminate().unwrap();
    }

    fn urgent_waiter(k: &mut Kernel) {
        k.activate(announcer, 1, "announcer").unwrap();
        k.wait_event(READY, "ready").unwrap();
        mark("waiter:woke");
        k.terminate().unwrap();
    }

    #[test]
    fn test_woken_waiter_runs_before_lower_newcomer() {
        take_trace();
        let mut kernel = Kernel::new(KernelConfig::new());
        assert_eq!(kernel.start(urgent_waiter, 6, "waiter"), Ok(()));
        assert_eq!(
            take_trace(),
            ["announcer:set", "announcer:after", "waiter:woke", "late"]
        );
    }
}
