//! # Resources
//!
//! Priority-ceiling resources. Acquiring a resource never blocks: it raises
//! the holder's ceiling priority to the resource's priority so that no task
//! which could contend for it is dispatched while it is held. Releasing the
//! resource that defines the current ceiling drops the ceiling back and is a
//! reschedule point.

use crate::config::MAX_RES;
use crate::error::{KernelError, KernelResult};
use crate::kernel::Kernel;
use crate::scheduler::{outranks, InsertMode};
use crate::task::{Priority, TaskId};

#[derive(Debug, Clone, Copy)]
struct ResourceSlot {
    priority: Priority,
    holder: Option<TaskId>,
    name: &'static str,
    next_free: Option<usize>,
}

impl ResourceSlot {
    const EMPTY: Self = Self {
        priority: 0,
        holder: None,
        name: "",
        next_free: None,
    };
}

/// Fixed pool of resource acquisitions with a LIFO free list.
pub struct ResourcePool {
    slots: [ResourceSlot; MAX_RES],
    free_head: Option<usize>,
}

impl ResourcePool {
    pub fn new() -> Self {
        let mut slots = [ResourceSlot::EMPTY; MAX_RES];
        for (i, slot) in slots.iter_mut().enumerate() {
            slot.next_free = if i + 1 < MAX_RES { Some(i + 1) } else { None };
        }
        Self {
            slots,
            free_head: Some(0),
        }
    }

    fn allocate(&mut self, holder: TaskId, priority: Priority, name: &'static str) -> KernelResult<()> {
        let index = self.free_head.ok_or(KernelError::ResourceExhausted)?;
        let slot = &mut self.slots[index];
        self.free_head = slot.next_free;
        *slot = ResourceSlot {
            priority,
            holder: Some(holder),
            name,
            next_free: None,
        };
        Ok(())
    }

    fn free(&mut self, index: usize) {
        self.slots[index] = ResourceSlot {
            next_free: self.free_head,
            ..ResourceSlot::EMPTY
        };
        self.free_head = Some(index);
    }

    fn find(&self, holder: TaskId, priority: Priority, name: &str) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.holder == Some(holder) && s.priority == priority && s.name == name)
    }

    fn held(&self, holder: TaskId) -> impl Iterator<Item = &ResourceSlot> + '_ {
        self.slots.iter().filter(move |s| s.holder == Some(holder))
    }

    /// Highest resource priority held by `holder`.
    pub(crate) fn max_held_priority(&self, holder: TaskId) -> Option<Priority> {
        self.held(holder).map(|s| s.priority).max()
    }

    pub fn held_by(&self, holder: TaskId) -> usize {
        self.held(holder).count()
    }

    /// Free every slot held by `holder`. Returns how many were released.
    pub(crate) fn release_all(&mut self, holder: TaskId) -> usize {
        let mut released = 0;
        for index in 0..MAX_RES {
            if self.slots[index].holder == Some(holder) {
                self.free(index);
                released += 1;
            }
        }
        released
    }
}

impl Default for ResourcePool {
    fn default() -> Self {
        Self::new()
    }
}

impl Kernel {
    /// Take a resource with ceiling `priority` on behalf of the running task.
    pub fn acquire(&mut self, priority: Priority, name: &'static str) -> KernelResult<()> {
        self.ensure_running()?;
        let me = self.running()?;
        self.resources.allocate(me, priority, name).map_err(|e| {
            log::warn!("resource pool exhausted acquiring {}", name);
            e
        })?;

        if outranks(priority, self.tasks[me].ceiling_priority) {
            self.tasks[me].ceiling_priority = priority;
            self.ready.requeue(&mut self.tasks, me, InsertMode::Head);
            log::debug!("{} ceiling raised to {} by {}", self.tasks[me].name, priority, name);
        }
        Ok(())
    }

    /// Release a resource previously acquired by the running task with the
    /// same `priority` and `name`.
    pub fn release(&mut self, priority: Priority, name: &'static str) -> KernelResult<()> {
        self.ensure_running()?;
        let me = self.running()?;
        let Some(index) = self.resources.find(me, priority, name) else {
            log::warn!("{} released {} without holding it", self.tasks[me].name, name);
            return Err(KernelError::InvalidState);
        };
        self.resources.free(index);

        if priority != self.tasks[me].ceiling_priority {
            return Ok(());
        }

        self.recompute_ceiling(me);
        self.ready.requeue(&mut self.tasks, me, InsertMode::Head);
        log::debug!(
            "{} released {}, ceiling now {}",
            self.tasks[me].name,
            name,
            self.tasks[me].ceiling_priority
        );
        self.preempt_point()
    }

    /// Number of resources currently held by `task`.
    pub fn resources_held(&self, task: TaskId) -> usize {
        self.resources.held_by(task)
    }

    /// Reset `task`'s ceiling to the maximum of its base priority and every
    /// resource and semaphore it still holds.
    pub(crate) fn recompute_ceiling(&mut self, task: TaskId) {
        let ceiling = [
            self.resources.max_held_priority(task),
            self.semaphores.max_owned_priority(task),
        ]
        .into_iter()
        .flatten()
        .fold(self.tasks[task].base_priority, |acc, p| if outranks(p, acc) { p } else { acc });
        self.tasks[task].ceiling_priority = ceiling;
    }

    /// Drop everything a terminating task still holds.
    pub(crate) fn abandon_holdings(&mut self, task: TaskId) {
        let released = self.resources.release_all(task);
        if released > 0 {
            log::warn!("{} terminated holding {} resource(s)", self.tasks[task].name, released);
        }
        self.abandon_semaphores(task);
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
