//! # prio-rtos Example Firmware
//!
//! Walks through the kernel's scheduling features with five tasks:
//!
//! | Task | Priority | Behavior |
//! |------|----------|----------|
//! | `init` | 1 | Builds the scenario, then terminates |
//! | `medium` | 11 | Holds `BUS` while activating `high` |
//! | `high` | 15 | Deferred by the `BUS` ceiling until it is released |
//! | `low` | 6 | Waits for `DATA_READY` |
//! | `sampler` | 9 | Periodic (every 10 ticks), publishes `DATA_READY` |
//!
//! ## Expected Sequence
//!
//! 1. `init` activates `medium`, which preempts it at once.
//! 2. `medium` acquires `BUS` (ceiling 15) and activates `high`. The ceiling
//!    keeps `high` from preempting until `medium` releases `BUS`.
//! 3. `init` activates `low`, which blocks on `DATA_READY`. Nothing else is
//!    runnable, so logical time advances until `sampler` is released at
//!    tick 10 and sets the event.
//! 4. `low` finishes, `init` terminates, and `sampler` keeps running every
//!    10 ticks, serializing its output through the `uart` semaphore.
//! 5. After `SAMPLER_RUNS` releases the sampler shuts the kernel down and the
//!    core sleeps. A kernel fault, or any kernel call that fails, panics
//!    into `panic-halt`.

#![no_std]
#![no_main]

use core::sync::atomic::{AtomicU32, Ordering};

use cortex_m_rt::entry;
use panic_halt as _;

use prio_rtos::{EventId, Kernel, KernelConfig, KernelResult, Priority, SemaphoreId};

const PRIO_INIT: Priority = 1;
const PRIO_LOW: Priority = 6;
const PRIO_SAMPLER: Priority = 9;
const PRIO_MEDIUM: Priority = 11;
const PRIO_HIGH: Priority = 15;

/// Ceiling of the shared bus: that of its most urgent user.
const BUS_CEILING: Priority = PRIO_HIGH;
const UART_CEILING: Priority = PRIO_SAMPLER;

const DATA_READY: EventId = EventId::new(0);
/// The `uart` semaphore is the first one created.
const UART: SemaphoreId = SemaphoreId::new(0);

const SAMPLER_PERIOD: u32 = 10;
const SAMPLER_RUNS: u32 = 5;

static SAMPLES: AtomicU32 = AtomicU32::new(0);

// ---------------------------------------------------------------------------
// Task entry points
// ---------------------------------------------------------------------------

/// Every kernel call in this scenario is expected to succeed.
fn check<T>(result: KernelResult<T>) -> T {
    match result {
        Ok(value) => value,
        Err(e) => panic!("kernel call failed: {}", e),
    }
}

fn high(k: &mut Kernel) {
    check(k.terminate());
}

fn medium(k: &mut Kernel) {
    check(k.acquire(BUS_CEILING, "bus"));
    // Queued behind us: the ceiling already matches its priority.
    check(k.activate(high, PRIO_HIGH, "high"));
    // `high` runs inside this call.
    check(k.release(BUS_CEILING, "bus"));
    check(k.terminate());
}

fn low(k: &mut Kernel) {
    check(k.wait_event(DATA_READY, "data-ready"));
    check(k.terminate());
}

fn sampler(k: &mut Kernel) {
    check(k.semaphore_wait(UART));
    check(k.set_event(DATA_READY, "data-ready"));
    check(k.semaphore_signal(UART));

    let runs = SAMPLES.fetch_add(1, Ordering::Relaxed) + 1;
    check(k.terminate());
    if runs >= SAMPLER_RUNS {
        k.shutdown();
    }
}

fn init(k: &mut Kernel) {
    check(k.create_semaphore(UART_CEILING, "uart"));
    let sampler = check(k.create(sampler, PRIO_SAMPLER, "sampler"));
    check(k.set_period(sampler, SAMPLER_PERIOD));
    check(k.activate(medium, PRIO_MEDIUM, "medium"));
    check(k.activate(low, PRIO_LOW, "low"));
    check(k.terminate());
}

// ---------------------------------------------------------------------------
// Main entry point
// ---------------------------------------------------------------------------

/// Firmware entry point. Runs the kernel to completion, then sleeps.
#[entry]
fn main() -> ! {
    let mut kernel = Kernel::new(KernelConfig::new());

    if let Err(e) = kernel.start(init, PRIO_INIT, "init") {
        panic!("kernel fault: {}", e);
    }

    loop {
        cortex_m::asm::wfi();
    }
}
