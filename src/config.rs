//! # Kernel Configuration
//!
//! Compile-time capacities and the small set of runtime knobs the kernel
//! accepts. All tables are fixed-size arrays sized by these constants — no
//! dynamic allocation.

/// Maximum number of task slots. Bounds the static TCB table and therefore
/// the depth of nested dispatch (each task has at most one live frame).
pub const MAX_TASK: usize = 32;

/// Maximum number of simultaneously outstanding resource acquisitions.
pub const MAX_RES: usize = 16;

/// Number of event flags. Event ids are `0..MAX_EVENT`.
pub const MAX_EVENT: usize = 16;

/// Number of semaphores that can ever be created. Semaphores are
/// bump-allocated and never freed.
pub const MAX_SEMAPHORE: usize = MAX_RES;

/// Capacity of the activation-frame stack. A task body has at most one live
/// frame at a time.
pub const MAX_FRAMES: usize = MAX_TASK;

/// Default number of consecutive idle ticks without any task becoming
/// runnable before the kernel declares starvation.
pub const DEFAULT_IDLE_TICK_LIMIT: u32 = 1000;

/// How `semaphore_signal` releases blocked tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SemaphoreWakeup {
    /// Ownership passes straight to the highest-ranked task waiting on the
    /// signalled semaphore. Other waiters stay parked.
    Handoff,
    /// Every `Waiting` task is woken, whatever it waits on. Each blocking
    /// call re-checks its own condition and parks again if unsatisfied.
    Broadcast,
}

/// Runtime configuration passed to [`Kernel::new`](crate::kernel::Kernel::new).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelConfig {
    /// Consecutive idle ticks tolerated before `Starvation` is raised.
    pub idle_tick_limit: u32,

    /// Wakeup policy for semaphore release.
    pub semaphore_wakeup: SemaphoreWakeup,
}

impl KernelConfig {
    /// Default configuration: handoff wakeup, `DEFAULT_IDLE_TICK_LIMIT`.
    pub const fn new() -> Self {
        Self {
            idle_tick_limit: DEFAULT_IDLE_TICK_LIMIT,
            semaphore_wakeup: SemaphoreWakeup::Handoff,
        }
    }

    /// Builder-style override of the idle tick limit.
    pub const fn with_idle_tick_limit(mut self, ticks: u32) -> Self {
        self.idle_tick_limit = ticks;
        self
    }

    /// Builder-style override of the semaphore wakeup policy.
    pub const fn with_semaphore_wakeup(mut self, policy: SemaphoreWakeup) -> Self {
        self.semaphore_wakeup = policy;
        self
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = KernelConfig::default();
        assert_eq!(config.idle_tick_limit, DEFAULT_IDLE_TICK_LIMIT);
        assert_eq!(config.semaphore_wakeup, SemaphoreWakeup::Handoff);
    }

    #[test]
    fn test_builder_overrides() {
        let config = KernelConfig::new()
            .with_idle_tick_limit(5)
            .with_semaphore_wakeup(SemaphoreWakeup::Broadcast);
        assert_eq!(config.idle_tick_limit, 5);
        assert_eq!(config.semaphore_wakeup, SemaphoreWakeup::Broadcast);
    }
}
