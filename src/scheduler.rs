//! # Ready-Queue Scheduler
//!
//! One singly-linked chain of `Ready`/`Running` tasks threaded through the
//! TCB table, headed by the current task and sorted by descending ceiling
//! priority.
//!
//! ## Ordering
//!
//! A task is inserted after every entry that [`outranks`] it. In
//! [`InsertMode::Tail`] it also goes after entries of equal ceiling, so equal
//! priorities run FIFO. [`InsertMode::Head`] places it in front of its
//! equals; resource release uses this to mark a reschedule point without
//! boosting the task.
//!
//! ```text
//!  insert(T=5, Tail)      head ─► [9] ─► [5] ─► [5] ─► [2]
//!                                              ▲ T goes here
//!  insert(T=5, Head)      head ─► [9] ─► [5] ─► [5] ─► [2]
//!                                  ▲ T goes here
//! ```

use crate::task::{Priority, SlotState, TaskId, TaskTable};

/// Where a task lands among peers of equal ceiling priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertMode {
    Head,
    Tail,
}

/// The single priority comparison used by the kernel: numerically larger
/// priorities are more urgent.
#[inline]
pub const fn outranks(a: Priority, b: Priority) -> bool {
    a > b
}

/// The ready chain. Links live in the TCBs; this only holds the head.
#[derive(Debug, Default)]
pub struct ReadyChain {
    head: Option<TaskId>,
}

impl ReadyChain {
    pub const fn new() -> Self {
        Self { head: None }
    }

    /// The current task: head of the chain.
    #[inline]
    pub fn head(&self) -> Option<TaskId> {
        self.head
    }

    /// Link `id` into the chain at the position its ceiling priority and
    /// `mode` dictate. The task must not already be queued.
    pub fn insert(&mut self, tasks: &mut TaskTable, id: TaskId, mode: InsertMode) {
        debug_assert!(tasks[id].slot != SlotState::Queued);
        let priority = tasks[id].ceiling_priority;

        let mut prev: Option<TaskId> = None;
        let mut cur = self.head;

        while let Some(c) = cur {
            if !outranks(tasks[c].ceiling_priority, priority) {
                break;
            }
            prev = cur;
            cur = tasks[c].next;
        }

        if mode == InsertMode::Tail {
            while let Some(c) = cur {
                if tasks[c].ceiling_priority != priority {
                    break;
                }
                prev = cur;
                cur = tasks[c].next;
            }
        }

        tasks[id].next = cur;
        tasks[id].slot = SlotState::Queued;
        match prev {
            None => self.head = Some(id),
            Some(p) => tasks[p].next = Some(id),
        }

        log::trace!(
            "queue {} (ceiling {}, {:?}) head={:?}",
            tasks[id].name,
            priority,
            mode,
            self.head
        );
    }

    /// Unlink `id` from wherever it sits. Returns `false` if it was not
    /// queued. The slot is left `Parked`; callers retag it as needed.
    pub fn remove(&mut self, tasks: &mut TaskTable, id: TaskId) -> bool {
        if tasks[id].slot != SlotState::Queued {
            return false;
        }

        let mut prev: Option<TaskId> = None;
        let mut cur = self.head;
        while let Some(c) = cur {
            if c == id {
                let next = tasks[c].next;
                match prev {
                    None => self.head = next,
                    Some(p) => tasks[p].next = next,
                }
                tasks[id].next = None;
                tasks[id].slot = SlotState::Parked;
                return true;
            }
            prev = cur;
            cur = tasks[c].next;
        }

        // Tagged Queued but unreachable from the head.
        debug_assert!(false, "queued task {} missing from chain", id.index());
        false
    }

    /// Reposition a queued task after its ceiling changed.
    pub fn requeue(&mut self, tasks: &mut TaskTable, id: TaskId, mode: InsertMode) {
        if self.remove(tasks, id) {
            self.insert(tasks, id, mode);
        }
    }

    /// Walk the chain from the head.
    pub fn iter<'a>(&self, tasks: &'a TaskTable) -> ChainIter<'a> {
        ChainIter {
            tasks,
            cursor: self.head,
        }
    }
}

/// Iterator over the ready chain.
pub struct ChainIter<'a> {
    tasks: &'a TaskTable,
    cursor: Option<TaskId>,
}

impl Iterator for ChainIter<'_> {
    type Item = TaskId;

    fn next(&mut self) -> Option<TaskId> {
        let id = self.cursor?;
        self.cursor = self.tasks[id].next;
        Some(id)
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::Kernel;

    fn body(_: &mut Kernel) {}

    fn order(chain: &ReadyChain, tasks: &TaskTable) -> Vec<&'static str> {
        chain.iter(tasks).map(|id| tasks[id].name).collect()
    }

    #[test]
    fn test_outranks_direction() {
        assert!(outranks(10, 1));
        assert!(!outranks(1, 10));
        assert!(!outranks(4, 4));
    }

    #[test]
    fn test_sorted_descending() {
        let mut tasks = TaskTable::new();
        let mut chain = ReadyChain::new();
        for (prio, name) in [(3, "mid"), (9, "high"), (1, "low")] {
            let id = tasks.allocate(body, prio, name).unwrap();
            chain.insert(&mut tasks, id, InsertMode::Tail);
        }
        assert_eq!(order(&chain, &tasks), ["high", "mid", "low"]);
        assert_eq!(chain.head().map(|id| tasks[id].name), Some("high"));
    }

    #[test]
    fn test_tail_is_fifo_among_equals() {
        let mut tasks = TaskTable::new();
        let mut chain = ReadyChain::new();
        for name in ["first", "second", "third"] {
            let id = tasks.allocate(body, 5, name).unwrap();
            chain.insert(&mut tasks, id, InsertMode::Tail);
        }
        assert_eq!(order(&chain, &tasks), ["first", "second", "third"]);
    }

    #[test]
    fn test_head_goes_before_equals() {
        let mut tasks = TaskTable::new();
        let mut chain = ReadyChain::new();
        for (prio, name) in [(8, "above"), (5, "peer"), (2, "below")] {
            let id = tasks.allocate(body, prio, name).unwrap();
            chain.insert(&mut tasks, id, InsertMode::Tail);
        }
        let id = tasks.allocate(body, 5, "new").unwrap();
        chain.insert(&mut tasks, id, InsertMode::Head);
        assert_eq!(order(&chain, &tasks), ["above", "new", "peer", "below"]);
    }

    #[test]
    fn test_remove_from_middle_and_head() {
        let mut tasks = TaskTable::new();
        let mut chain = ReadyChain::new();
        let mut ids = Vec::new();
        for (prio, name) in [(9, "a"), (5, "b"), (1, "c")] {
            let id = tasks.allocate(body, prio, name).unwrap();
            chain.insert(&mut tasks, id, InsertMode::Tail);
            ids.push(id);
        }

        assert!(chain.remove(&mut tasks, ids[1]));
        assert_eq!(order(&chain, &tasks), ["a", "c"]);
        assert_eq!(tasks[ids[1]].slot, SlotState::Parked);
        assert!(!chain.remove(&mut tasks, ids[1]));

        assert!(chain.remove(&mut tasks, ids[0]));
        assert_eq!(chain.head(), Some(ids[2]));
    }

    #[test]
    fn test_requeue_after_ceiling_drop() {
        let mut tasks = TaskTable::new();
        let mut chain = ReadyChain::new();
        let holder = tasks.allocate(body, 2, "holder").unwrap();
        tasks[holder].ceiling_priority = 9;
        chain.insert(&mut tasks, holder, InsertMode::Tail);
        let other = tasks.allocate(body, 5, "other").unwrap();
        chain.insert(&mut tasks, other, InsertMode::Tail);
        assert_eq!(chain.head(), Some(holder));

        tasks[holder].ceiling_priority = 2;
        chain.requeue(&mut tasks, holder, InsertMode::Head);
        assert_eq!(order(&chain, &tasks), ["other", "holder"]);
    }
}
