//! # Semaphores
//!
//! Binary, owner-tracked semaphores. Each carries a fixed ceiling priority
//! which its owner inherits while holding it, like a resource. Unlike a
//! resource, taking a semaphore that someone else owns blocks the caller.
//!
//! Semaphores are bump-allocated from a fixed pool and never freed.
//!
//! A task cannot wait for an owner whose frame is buried beneath its own:
//! that owner only continues once the waiter's frame has unwound. Such a
//! wait is refused with `InvalidState` instead of parking.
//!
//! ## Wakeup
//!
//! What `semaphore_signal` does with blocked tasks is chosen by
//! [`SemaphoreWakeup`]:
//!
//! ```text
//!  Handoff    owner ──signal──► highest waiter on this semaphore
//!                               (becomes owner, woken)
//!  Broadcast  owner ──signal──► every Waiting task woken; each re-checks
//!                               what it waits for and parks again if needed
//! ```

use crate::config::{SemaphoreWakeup, MAX_SEMAPHORE, MAX_TASK};
use crate::error::{KernelError, KernelResult};
use crate::kernel::Kernel;
use crate::scheduler::{outranks, InsertMode};
use crate::task::{Priority, TaskId, TaskState, WaitReason};

/// Identity of a semaphore: its index in the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SemaphoreId(usize);

impl SemaphoreId {
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    pub const fn index(self) -> usize {
        self.0
    }
}

/// Whether a semaphore currently has an owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SemaphoreState {
    Available,
    Taken,
}

#[derive(Debug, Clone, Copy)]
struct SemaphoreSlot {
    state: SemaphoreState,
    owner: Option<TaskId>,
    priority: Priority,
    name: &'static str,
}

impl SemaphoreSlot {
    const EMPTY: Self = Self {
        state: SemaphoreState::Available,
        owner: None,
        priority: 0,
        name: "",
    };
}

pub struct SemaphorePool {
    slots: [SemaphoreSlot; MAX_SEMAPHORE],
    created: usize,
}

impl SemaphorePool {
    pub const fn new() -> Self {
        Self {
            slots: [SemaphoreSlot::EMPTY; MAX_SEMAPHORE],
            created: 0,
        }
    }

    fn create(&mut self, priority: Priority, name: &'static str) -> KernelResult<SemaphoreId> {
        let slot = self
            .slots
            .get_mut(self.created)
            .ok_or(KernelError::ResourceExhausted)?;
        *slot = SemaphoreSlot {
            priority,
            name,
            ..SemaphoreSlot::EMPTY
        };
        let id = SemaphoreId(self.created);
        self.created += 1;
        Ok(id)
    }

    fn validate(&self, id: SemaphoreId) -> KernelResult<SemaphoreId> {
        if id.0 < self.created {
            Ok(id)
        } else {
            Err(KernelError::InvalidId)
        }
    }

    fn claim(&mut self, id: SemaphoreId, owner: TaskId) {
        let slot = &mut self.slots[id.0];
        slot.state = SemaphoreState::Taken;
        slot.owner = Some(owner);
    }

    fn vacate(&mut self, id: SemaphoreId) {
        let slot = &mut self.slots[id.0];
        slot.state = SemaphoreState::Available;
        slot.owner = None;
    }

    fn owned(&self, owner: TaskId) -> impl Iterator<Item = SemaphoreId> + '_ {
        self.slots[..self.created]
            .iter()
            .enumerate()
            .filter(move |(_, s)| s.owner == Some(owner))
            .map(|(i, _)| SemaphoreId(i))
    }

    /// Highest ceiling among the semaphores `owner` holds.
    pub(crate) fn max_owned_priority(&self, owner: TaskId) -> Option<Priority> {
        self.owned(owner).map(|id| self.slots[id.0].priority).max()
    }
}

impl Default for SemaphorePool {
    fn default() -> Self {
        Self::new()
    }
}

impl Kernel {
    /// Create an available semaphore whose owner is raised to `priority`.
    pub fn create_semaphore(&mut self, priority: Priority, name: &'static str) -> KernelResult<SemaphoreId> {
        self.ensure_running()?;
        let id = self.semaphores.create(priority, name).map_err(|e| {
            log::warn!("semaphore pool exhausted creating {}", name);
            e
        })?;
        log::debug!("semaphore {} created with ceiling {}", name, priority);
        Ok(id)
    }

    /// Take `sem` for the running task, blocking while another task owns it.
    pub fn semaphore_wait(&mut self, sem: SemaphoreId) -> KernelResult<()> {
        self.ensure_running()?;
        let me = self.running()?;
        let id = self.semaphores.validate(sem)?;

        let mut blocked = false;
        loop {
            let slot = self.semaphores.slots[id.0];
            match (slot.state, slot.owner) {
                (SemaphoreState::Available, _) => {
                    self.semaphores.claim(id, me);
                    self.tasks[me].wait = None;
                    self.inherit_ceiling(me, slot.priority);
                    log::debug!("{} took {}", self.tasks[me].name, slot.name);
                    return Ok(());
                }
                // Handed over while we were parked.
                (SemaphoreState::Taken, Some(owner)) if owner == me => {
                    if blocked {
                        return Ok(());
                    }
                    log::warn!("{} waited on {} which it already owns", self.tasks[me].name, slot.name);
                    return Err(KernelError::InvalidState);
                }
                (SemaphoreState::Taken, Some(owner)) if self.is_buried(owner) => {
                    log::warn!(
                        "{} cannot wait on {}: owner {} is beneath it",
                        self.tasks[me].name,
                        slot.name,
                        self.tasks[owner].name
                    );
                    self.tasks[me].wait = None;
                    return Err(KernelError::InvalidState);
                }
                (SemaphoreState::Taken, _) => {
                    self.park_running(me, TaskState::Waiting, Some(WaitReason::Semaphore(id)));
                    self.block(me)?;
                    blocked = true;
                }
            }
        }
    }

    /// Release `sem`, which the running task must own, and wake waiters
    /// according to the configured policy.
    pub fn semaphore_signal(&mut self, sem: SemaphoreId) -> KernelResult<()> {
        self.ensure_running()?;
        let me = self.running()?;
        let id = self.semaphores.validate(sem)?;

        let slot = self.semaphores.slots[id.0];
        if slot.state == SemaphoreState::Available {
            return Err(KernelError::InvalidState);
        }
        if slot.owner != Some(me) {
            log::warn!("{} signalled {} without owning it", self.tasks[me].name, slot.name);
            return Err(KernelError::PermissionDenied);
        }

        self.semaphores.vacate(id);
        let before = self.tasks[me].ceiling_priority;
        self.recompute_ceiling(me);
        if outranks(before, self.tasks[me].ceiling_priority) {
            self.ready.requeue(&mut self.tasks, me, InsertMode::Head);
        }
        log::debug!("{} signalled {}", self.tasks[me].name, slot.name);

        self.release_waiters(id);
        self.preempt_point()
    }

    /// `None` for ids that were never created.
    pub fn semaphore_state(&self, sem: SemaphoreId) -> Option<SemaphoreState> {
        let id = self.semaphores.validate(sem).ok()?;
        Some(self.semaphores.slots[id.0].state)
    }

    /// Task holding `sem`, if taken.
    pub fn semaphore_owner(&self, sem: SemaphoreId) -> Option<TaskId> {
        let id = self.semaphores.validate(sem).ok()?;
        self.semaphores.slots[id.0].owner
    }

    /// Vacate every semaphore owned by a terminating task and wake its
    /// waiters. Does not preempt.
    pub(crate) fn abandon_semaphores(&mut self, task: TaskId) {
        loop {
            let Some(id) = self.semaphores.owned(task).next() else {
                break;
            };
            log::warn!(
                "{} terminated owning {}",
                self.tasks[task].name,
                self.semaphores.slots[id.0].name
            );
            self.semaphores.vacate(id);
            self.release_waiters(id);
        }
    }

    fn release_waiters(&mut self, id: SemaphoreId) {
        match self.config.semaphore_wakeup {
            SemaphoreWakeup::Handoff => {
                if let Some(next) = self.highest_waiter(id) {
                    self.semaphores.claim(id, next);
                    let priority = self.semaphores.slots[id.0].priority;
                    if outranks(priority, self.tasks[next].ceiling_priority) {
                        self.tasks[next].ceiling_priority = priority;
                    }
                    log::debug!("{} handed to {}", self.semaphores.slots[id.0].name, self.tasks[next].name);
                    self.wake(next);
                }
            }
            SemaphoreWakeup::Broadcast => {
                for index in 0..MAX_TASK {
                    let tcb = &self.tasks[TaskId::new(index)];
                    if tcb.is_allocated() && tcb.state == TaskState::Waiting {
                        self.rouse(TaskId::new(index));
                    }
                }
            }
        }
    }

    /// Highest-ranked task blocked on `id`; the lowest slot wins ties.
    fn highest_waiter(&self, id: SemaphoreId) -> Option<TaskId> {
        self.tasks
            .iter()
            .filter(|tcb| tcb.state == TaskState::Waiting && tcb.wait == Some(WaitReason::Semaphore(id)))
            .fold(None, |best: Option<(TaskId, Priority)>, tcb| match best {
                Some((_, p)) if !outranks(tcb.ceiling_priority, p) => best,
                _ => Some((tcb.id, tcb.ceiling_priority)),
            })
            .map(|(task, _)| task)
    }

    fn inherit_ceiling(&mut self, task: TaskId, priority: Priority) {
        if outranks(priority, self.tasks[task].ceiling_priority) {
            self.tasks[task].ceiling_priority = priority;
            self.ready.requeue(&mut self.tasks, task, InsertMode::Head);
            log::debug!("{} ceiling raised to {}", self.tasks[task].name, priority);
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
