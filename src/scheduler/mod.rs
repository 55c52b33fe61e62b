//! Scheduler core: task bookkeeping, queue-delay estimation, dispatch, and
//! status ingestion (spec §4.4), plus the three long-lived control loops
//! that drive it (spec §5).

mod scheduler_core;
mod loops;

pub use scheduler_core::SchedulerCore;
pub use loops::{run_dispatch_loop, run_watchdog_loop};
