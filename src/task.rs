//! # Task Control Block
//!
//! Defines the task model and the Task Store: a fixed table of TCBs with a
//! free-slot list threaded through it. A slot's index is the task's identity.
//!
//! ## Slot membership
//!
//! Every slot is in exactly one of three places, recorded by [`SlotState`]:
//!
//! ```text
//!   ┌──────────┐   allocate()   ┌─────────┐  admit()   ┌────────┐
//!   │   Free   │ ─────────────► │ Dormant │ ─────────► │ Queued │
//!   └──────────┘                └─────────┘            └────────┘
//!        ▲          terminate()       ▲   terminate()     │   ▲
//!        └────────────────────────────┴──(periodic)───────┤   │ wake / resume
//!                                                    block │   │
//!                                                          ▼   │
//!                                                       ┌────────┐
//!                                                       │ Parked │
//!                                                       └────────┘
//! ```
//!
//! `Free` slots are linked through `next_free`; `Queued` slots through
//! `next` (the ready chain, see `scheduler.rs`). The two links are
//! independent and a slot only ever uses the one matching its membership.

use core::ops::{Index, IndexMut};

use crate::config::MAX_TASK;
use crate::error::{KernelError, KernelResult};
use crate::event::EventId;
use crate::kernel::Kernel;
use crate::semaphore::SemaphoreId;

/// Task priority. Numerically larger values are more urgent; see
/// [`outranks`](crate::scheduler::outranks).
pub type Priority = u8;

/// Logical tick count.
pub type Tick = u32;

/// Task body. Invoked with the kernel context; returning without calling
/// `terminate` counts as a yield.
pub type TaskEntry = fn(&mut Kernel);

/// Identity of a task: its slot index in the task table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(usize);

impl TaskId {
    /// Wrap a raw slot index. Validity is checked by the kernel on use.
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// The slot index.
    pub const fn index(self) -> usize {
        self.0
    }
}

/// Execution state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// The task body is executing.
    Running,
    /// In the ready chain, waiting to be selected.
    Ready,
    /// Parked by `suspend`, or dormant (created / terminated periodic).
    Suspended,
    /// Blocked on an event, a semaphore or a delay.
    Waiting,
}

/// Which list, if any, a slot belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// On the free list.
    Free,
    /// Allocated, never activated or waiting for its next periodic release.
    Dormant,
    /// In the ready chain.
    Queued,
    /// Allocated and detached: suspended or blocked.
    Parked,
}

/// What a `Waiting` task is blocked on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitReason {
    Event(EventId),
    Semaphore(SemaphoreId),
    Delay { until: Tick },
}

/// Task Control Block.
#[derive(Clone, Copy)]
pub struct TaskControlBlock {
    pub id: TaskId,
    pub name: &'static str,
    pub entry: Option<TaskEntry>,
    /// Static priority, fixed for the task's lifetime.
    pub base_priority: Priority,
    /// Dynamic priority, raised while holding ceiling resources/semaphores.
    pub ceiling_priority: Priority,
    pub state: TaskState,
    pub slot: SlotState,
    pub wait: Option<WaitReason>,
    /// Ready-chain successor; meaningful only while `Queued`.
    pub next: Option<TaskId>,
    /// Free-list successor; meaningful only while `Free`.
    pub next_free: Option<TaskId>,
    /// The body has an activation frame on the native stack.
    pub frame_live: bool,
}

impl TaskControlBlock {
    /// An unallocated TCB.
    pub const EMPTY: Self = Self {
        id: TaskId(0),
        name: "",
        entry: None,
        base_priority: 0,
        ceiling_priority: 0,
        state: TaskState::Suspended,
        slot: SlotState::Free,
        wait: None,
        next: None,
        next_free: None,
        frame_live: false,
    };

    /// Populate a freshly allocated slot. The task starts dormant and
    /// detached from both lists.
    pub fn init(&mut self, entry: TaskEntry, priority: Priority, name: &'static str) {
        self.name = name;
        self.entry = Some(entry);
        self.base_priority = priority;
        self.ceiling_priority = priority;
        self.state = TaskState::Suspended;
        self.slot = SlotState::Dormant;
        self.wait = None;
        self.next = None;
        self.next_free = None;
        self.frame_live = false;
    }

    /// Event this task is blocked on, if any.
    pub fn waiting_event(&self) -> Option<EventId> {
        match self.wait {
            Some(WaitReason::Event(event)) => Some(event),
            _ => None,
        }
    }

    #[inline]
    pub fn is_allocated(&self) -> bool {
        self.slot != SlotState::Free
    }

    /// Ready and startable on top of the current stack.
    #[inline]
    pub fn is_startable(&self) -> bool {
        self.slot == SlotState::Queued && self.state == TaskState::Ready && !self.frame_live
    }
}

/// The Task Store: fixed TCB table plus free list.
pub struct TaskTable {
    slots: [TaskControlBlock; MAX_TASK],
    free_head: Option<TaskId>,
}

impl TaskTable {
    /// A table with every slot on the free list, in index order.
    pub fn new() -> Self {
        let mut slots = [TaskControlBlock::EMPTY; MAX_TASK];
        for (i, tcb) in slots.iter_mut().enumerate() {
            tcb.id = TaskId(i);
            tcb.next_free = if i + 1 < MAX_TASK {
                Some(TaskId(i + 1))
            } else {
                None
            };
        }
        Self {
            slots,
            free_head: Some(TaskId(0)),
        }
    }

    /// Pop a slot off the free list and populate it.
    pub fn allocate(
        &mut self,
        entry: TaskEntry,
        priority: Priority,
        name: &'static str,
    ) -> KernelResult<TaskId> {
        let id = self.free_head.ok_or(KernelError::ResourceExhausted)?;
        let tcb = &mut self.slots[id.0];
        self.free_head = tcb.next_free;
        tcb.init(entry, priority, name);
        Ok(id)
    }

    /// Push a slot back onto the free list. The caller must already have
    /// detached it from the ready chain.
    pub fn free(&mut self, id: TaskId) {
        let tcb = &mut self.slots[id.0];
        debug_assert!(tcb.slot != SlotState::Queued);
        *tcb = TaskControlBlock {
            id,
            next_free: self.free_head,
            ..TaskControlBlock::EMPTY
        };
        self.free_head = Some(id);
    }

    /// Check that `id` names an allocated slot.
    pub fn validate(&self, id: TaskId) -> KernelResult<TaskId> {
        match self.slots.get(id.0) {
            Some(tcb) if tcb.is_allocated() => Ok(id),
            _ => Err(KernelError::InvalidId),
        }
    }

    /// Allocated TCB by id, `None` for out-of-range or free slots.
    pub fn get(&self, id: TaskId) -> Option<&TaskControlBlock> {
        self.slots.get(id.0).filter(|tcb| tcb.is_allocated())
    }

    /// Raw slot by id, free or not. `None` only when out of range.
    pub fn slot(&self, id: TaskId) -> Option<&TaskControlBlock> {
        self.slots.get(id.0)
    }

    /// Iterate every slot, free or not.
    pub fn iter(&self) -> impl Iterator<Item = &TaskControlBlock> {
        self.slots.iter()
    }

    /// Walk the free list.
    pub fn free_slots(&self) -> FreeSlots<'_> {
        FreeSlots {
            table: self,
            cursor: self.free_head,
        }
    }

    pub fn free_count(&self) -> usize {
        self.free_slots().count()
    }
}

impl Default for TaskTable {
    fn default() -> Self {
        Self::new()
    }
}

impl Index<TaskId> for TaskTable {
    type Output = TaskControlBlock;

    fn index(&self, id: TaskId) -> &TaskControlBlock {
        &self.slots[id.0]
    }
}

impl IndexMut<TaskId> for TaskTable {
    fn index_mut(&mut self, id: TaskId) -> &mut TaskControlBlock {
        &mut self.slots[id.0]
    }
}

/// Iterator over the free list.
pub struct FreeSlots<'a> {
    table: &'a TaskTable,
    cursor: Option<TaskId>,
}

impl Iterator for FreeSlots<'_> {
    type Item = TaskId;

    fn next(&mut self) -> Option<TaskId> {
        let id = self.cursor?;
        self.cursor = self.table[id].next_free;
        Some(id)
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
