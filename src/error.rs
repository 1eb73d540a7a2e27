//! # Kernel Errors
//!
//! Every caller-facing primitive returns [`KernelResult`]. Recoverable errors
//! leave kernel state untouched; fatal ones move the kernel to
//! [`Lifecycle::Faulted`](crate::kernel::Lifecycle::Faulted) and unwind every
//! pending call.

use core::fmt;

/// Result type alias for kernel operations.
pub type KernelResult<T> = core::result::Result<T, KernelError>;

/// Error taxonomy of the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum KernelError {
    /// Task, event or semaphore index out of range or not allocated.
    InvalidId,
    /// A fixed-size pool (tasks, resources, semaphores) is full.
    ResourceExhausted,
    /// Semaphore signalled by a task that does not own it.
    PermissionDenied,
    /// Operation not valid in the object's current state.
    InvalidState,
    /// The idle loop never observed a runnable task. Fatal.
    Starvation,
    /// The kernel has been shut down.
    Shutdown,
}

impl KernelError {
    /// Stable numeric code, suitable for a status register or log line.
    #[must_use]
    pub const fn code(&self) -> u16 {
        match self {
            Self::InvalidId => 0x0101,
            Self::ResourceExhausted => 0x0102,
            Self::PermissionDenied => 0x0103,
            Self::InvalidState => 0x0104,
            Self::Starvation => 0x0201,
            Self::Shutdown => 0x0301,
        }
    }

    /// Human-readable description.
    #[must_use]
    pub const fn description(&self) -> &'static str {
        match self {
            Self::InvalidId => "invalid task, event or semaphore id",
            Self::ResourceExhausted => "kernel pool exhausted",
            Self::PermissionDenied => "caller does not own the semaphore",
            Self::InvalidState => "operation invalid in current state",
            Self::Starvation => "no task can ever become ready",
            Self::Shutdown => "kernel has been shut down",
        }
    }

    /// Fatal errors end the kernel run; the host must terminate.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Starvation)
    }
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[0x{:04X}] {}", self.code(), self.description())
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for KernelError {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "[0x{:04X}] {}", self.code(), self.description());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_unique() {
        let all = [
            KernelError::InvalidId,
            KernelError::ResourceExhausted,
            KernelError::PermissionDenied,
            KernelError::InvalidState,
            KernelError::Starvation,
            KernelError::Shutdown,
        ];
        for (i, a) in all.iter().enumerate() {
            for b in &all[i + 1..] {
                assert_ne!(a.code(), b.code());
            }
        }
    }

    #[test]
    fn test_only_starvation_is_fatal() {
        assert!(KernelError::Starvation.is_fatal());
        assert!(!KernelError::InvalidState.is_fatal());
        assert!(!KernelError::Shutdown.is_fatal());
    }

    #[test]
    fn test_display_includes_code() {
        let text = format!("{}", KernelError::PermissionDenied);
        assert_eq!(text, "[0x0103] caller does not own the semaphore");
    }
}
