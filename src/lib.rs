//! # prio-rtos
//!
//! A cooperative, single-stack real-time kernel core with fixed-priority
//! preemptive scheduling, priority-ceiling resources, binary semaphores,
//! event flags and rate-monotonic periodic admission.
//!
//! ## Overview
//!
//! Task bodies are plain functions `fn(&mut Kernel)`. The kernel runs them by
//! direct call and every kernel primitive that can change which task should
//! run re-enters the dispatcher before returning, so the native call stack
//! holds the context of every preempted or blocked task. There are no
//! per-task stacks, no context-switch assembly and no interrupts: the kernel
//! is fully deterministic and runs the same on a host as on a Cortex-M core.
//!
//! - **Larger priority numbers are more urgent.** The single ordering rule
//!   is [`scheduler::outranks`].
//! - **Ceiling priority** is what the scheduler sorts by. It starts at the
//!   task's base priority and is raised while the task holds resources or
//!   semaphores.
//! - **Logical time** advances only while nothing is runnable, one tick per
//!   idle step. Periodic tasks are released and delays expire on those
//!   ticks.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                  Application Tasks                     │
//! │                  fn(&mut Kernel)                       │
//! ├────────────────────────────────────────────────────────┤
//! │                Kernel API (kernel.rs)                  │
//! │   start · shutdown · create · activate · terminate     │
//! │   suspend · resume · delay · observers                 │
//! ├──────────────┬──────────────┬────────────┬─────────────┤
//! │  Resources   │  Semaphores  │  Events    │  Periodic   │
//! │  resource.rs │ semaphore.rs │  event.rs  │  rma.rs     │
//! │  ─ acquire   │  ─ wait      │  ─ set     │  ─ period   │
//! │  ─ release   │  ─ signal    │  ─ clear   │  ─ idle     │
//! │              │              │  ─ wait    │  ─ sweep    │
//! ├──────────────┴──────────────┴────────────┴─────────────┤
//! │              Dispatcher (dispatch.rs)                  │
//! │     select · invoke · preempt_point · block            │
//! ├────────────────────────────────────────────────────────┤
//! │   Ready Chain (scheduler.rs) · Task Store (task.rs)    │
//! │     insert · remove · requeue · TCB table · free list  │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use prio_rtos::{Kernel, KernelConfig};
//!
//! fn worker(k: &mut Kernel) {
//!     k.terminate().unwrap();
//! }
//!
//! fn init(k: &mut Kernel) {
//!     // Outranks `init`, so it runs before `activate` returns.
//!     k.activate(worker, 5, "worker").unwrap();
//!     k.terminate().unwrap();
//!     k.shutdown();
//! }
//!
//! let mut kernel = Kernel::new(KernelConfig::new());
//! kernel.start(init, 1, "init").unwrap();
//! ```
//!
//! ## Memory Model
//!
//! - **No heap**: every table is a fixed-size array sized in `config.rs`
//! - **No globals**: all state lives in the [`Kernel`] value
//! - **Bounded nesting**: each task has at most one live frame, so dispatch
//!   depth is bounded by `MAX_TASK`

#![cfg_attr(not(test), no_std)]

pub mod config;
mod dispatch;
pub mod error;
pub mod event;
pub mod kernel;
pub mod resource;
pub mod rma;
pub mod scheduler;
pub mod semaphore;
pub mod task;

pub use config::{KernelConfig, SemaphoreWakeup};
pub use error::{KernelError, KernelResult};
pub use event::{EventId, EventStatus};
pub use kernel::{Kernel, Lifecycle};
pub use semaphore::{SemaphoreId, SemaphoreState};
pub use task::{Priority, TaskEntry, TaskId, TaskState, Tick};
