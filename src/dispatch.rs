//! # Dispatcher
//!
//! The execution engine. Task bodies are plain functions; the dispatcher
//! runs them by direct call, and every blocking primitive re-enters the
//! dispatcher before returning. The native call stack therefore doubles as
//! the saved context of every task that is blocked or preempted:
//!
//! ```text
//!  start()
//!   └─► dispatch(None)
//!         └─► A.entry()                 ← A running
//!               └─► wait_event(E)       ← A parked
//!                     └─► dispatch(A)
//!                           └─► B.entry()
//!                                 └─► set_event(E)   ← A ready again
//!                                       ...B returns
//!                     ◄── A selected: dispatch(A) returns, A resumes
//! ```
//!
//! ## Stack discipline
//!
//! A frame can only continue once every frame above it has unwound. Task
//! selection therefore picks the first chain entry that is either the task
//! the current dispatch level is waiting for (`stop`) or a ready task with no
//! live frame. Tasks whose frame is buried further down are skipped until the
//! stack unwinds to them.
//!
//! A preemption point never starts a task that a buried `Ready` task ahead of
//! it outranks: the running frame carries on instead, so the stack unwinds
//! toward the more urgent task first.

use crate::error::{KernelError, KernelResult};
use crate::kernel::Kernel;
use crate::scheduler::{outranks, InsertMode};
use crate::task::{SlotState, TaskId, TaskState, WaitReason};

impl Kernel {
    /// Run tasks in chain order until `stop` is selected. Falls into the idle
    /// loop whenever nothing is selectable. With `stop = None` this only
    /// returns through an error (shutdown or fault).
    pub(crate) fn dispatch(&mut self, stop: Option<TaskId>) -> KernelResult<()> {
        loop {
            self.ensure_running()?;
            match self.select(stop) {
                Some(id) if Some(id) == stop => return Ok(()),
                Some(id) => self.invoke(id)?,
                None => self.idle(stop)?,
            }
        }
    }

    /// First chain entry that may execute on top of the current stack.
    pub(crate) fn select(&self, stop: Option<TaskId>) -> Option<TaskId> {
        self.ready
            .iter(&self.tasks)
            .find(|&id| Some(id) == stop || self.tasks[id].is_startable())
    }

    /// Call a task body from the top. Returns once the body returns.
    fn invoke(&mut self, id: TaskId) -> KernelResult<()> {
        let Some(entry) = self.tasks[id].entry else {
            return Err(self.fault(KernelError::InvalidState));
        };
        if self.frames.push(id).is_err() {
            return Err(self.fault(KernelError::ResourceExhausted));
        }

        let tcb = &mut self.tasks[id];
        tcb.state = TaskState::Running;
        tcb.frame_live = true;
        log::debug!("dispatch {} at tick {}", tcb.name, self.tick);

        entry(self);

        self.frames.pop();
        let tcb = &mut self.tasks[id];
        tcb.frame_live = false;
        if tcb.state == TaskState::Running {
            // Returned without terminating: counts as a yield.
            tcb.state = TaskState::Ready;
            log::trace!("{} returned without terminating", tcb.name);
        }
        Ok(())
    }

    /// Give the processor away if the running task is no longer the one
    /// selected, and take it back once it is. No-op outside a task.
    pub(crate) fn preempt_point(&mut self) -> KernelResult<()> {
        let Some(me) = self.executing() else {
            return Ok(());
        };
        if self.tasks[me].state != TaskState::Running {
            return Ok(());
        }
        match self.select(Some(me)) {
            Some(next) if next == me => return Ok(()),
            Some(next) if self.buried_ahead_of(next) => {
                log::trace!("{} keeps running to unwind", self.tasks[me].name);
                return Ok(());
            }
            _ => {}
        }

        log::debug!("{} preempted", self.tasks[me].name);
        self.tasks[me].state = TaskState::Ready;
        self.dispatch(Some(me))?;
        self.tasks[me].state = TaskState::Running;
        Ok(())
    }

    /// Detach the running task from the chain and mark it parked.
    pub(crate) fn park_running(&mut self, me: TaskId, state: TaskState, wait: Option<WaitReason>) {
        self.ready.remove(&mut self.tasks, me);
        let tcb = &mut self.tasks[me];
        tcb.state = state;
        tcb.slot = SlotState::Parked;
        tcb.wait = wait;
        log::debug!("{} parked ({:?})", tcb.name, wait);
    }

    /// Let other tasks run until the parked task `me` is queued and selected
    /// again, then resume it.
    pub(crate) fn block(&mut self, me: TaskId) -> KernelResult<()> {
        self.dispatch(Some(me))?;
        self.tasks[me].state = TaskState::Running;
        log::debug!("{} resumed", self.tasks[me].name);
        Ok(())
    }

    /// Queue a detached task as `Ready`.
    pub(crate) fn make_ready(&mut self, id: TaskId, mode: InsertMode) {
        self.tasks[id].state = TaskState::Ready;
        self.ready.insert(&mut self.tasks, id, mode);
    }

    /// Release a blocked task: its wait is satisfied.
    pub(crate) fn wake(&mut self, id: TaskId) {
        self.tasks[id].wait = None;
        self.make_ready(id, InsertMode::Tail);
    }

    /// Queue a blocked task without satisfying its wait. The task re-checks
    /// its condition when it runs and parks again if needed.
    pub(crate) fn rouse(&mut self, id: TaskId) {
        self.make_ready(id, InsertMode::Tail);
    }

    /// Task whose frame is on top of the stack.
    pub(crate) fn executing(&self) -> Option<TaskId> {
        self.frames.last().copied()
    }

    /// Whether `id` has a live frame beneath the executing one.
    pub(crate) fn is_buried(&self, id: TaskId) -> bool {
        self.tasks[id].frame_live && self.executing() != Some(id)
    }

    /// Whether a buried `Ready` task queued ahead of `next` outranks it.
    fn buried_ahead_of(&self, next: TaskId) -> bool {
        let ceiling = self.tasks[next].ceiling_priority;
        self.ready
            .iter(&self.tasks)
            .take_while(|&id| id != next)
            .any(|id| {
                let tcb = &self.tasks[id];
                tcb.state == TaskState::Ready && self.is_buried(id) && outranks(tcb.ceiling_priority, ceiling)
            })
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use crate::config::KernelConfig;
    use crate::kernel::Kernel;
    use crate::task::TaskState;

    thread_local! {
        static TRACE: RefCell<Vec<&'static str>> = RefCell::new(Vec::new());
    }

    fn mark(step: &'static str) {
        TRACE.with(|t| t.borrow_mut().push(step));
    }

    fn take_trace() -> Vec<&'static str> {
        TRACE.with(|t| core::mem::take(&mut *t.borrow_mut()))
    }

    fn low(k: &mut Kernel) {
        mark("low");
        k.terminate().unwrap();
    }

    fn high(k: &mut Kernel) {
        mark("high");
        assert_eq!(k.running_task().and_then(|id| k.task_state(id)), Some(TaskState::Running));
        k.terminate().unwrap();
    }

    fn init(k: &mut Kernel) {
        mark("init:start");
        k.activate(low, 1, "low").unwrap();
        mark("init:after-low");
        k.activate(high, 9, "high").unwrap();
        mark("init:after-high");
        k.verify_invariants().unwrap();
        k.activate(stopper, 0, "stopper").unwrap();
        k.terminate().unwrap();
    }

    fn stopper(k: &mut Kernel) {
        mark("stopper");
        k.terminate().unwrap();
        k.shutdown();
    }

    #[test]
    fn test_higher_priority_runs_inside_activate() {
        take_trace();
        let mut kernel = Kernel::new(KernelConfig::new());
        kernel.start(init, 5, "init").unwrap();

        assert_eq!(
            take_trace(),
            [
                "init:start",
                "init:after-low",
                "high",
                "init:after-high",
                "low",
                "stopper"
            ]
        );
    }

    fn yielder(k: &mut Kernel) {
        mark("yielder");
        let runs = TRACE.with(|t| t.borrow().iter().filter(|s| **s == "yielder").count());
        if runs == 3 {
            k.terminate().unwrap();
            k.shutdown();
        }
    }

    #[test]
    fn test_returning_body_is_dispatched_again() {
        take_trace();
        let mut kernel = Kernel::new(KernelConfig::new());
        kernel.start(yielder, 1, "yielder").unwrap();
        assert_eq!(take_trace(), ["yielder", "yielder", "yielder"]);
    }
}
