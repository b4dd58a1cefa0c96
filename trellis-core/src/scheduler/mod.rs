//! Scheduler
//!
//! Deferred, deduplicated execution of jobs. Watchers and other integrations
//! queue jobs here instead of rerunning synchronously, so a burst of writes
//! produces one rerun per job on the next tick.
//!
//! - [`queue`]: the main and post-flush job queues and the flush loop.
//! - [`tick`]: the host-provided deferral primitive the flush runs on.

pub mod queue;
pub mod tick;

pub use queue::{
    flush_jobs, has_pending_jobs, is_flushing, queue_job, queue_post_flush_job, JobId,
    SchedulerJob,
};
pub use tick::{
    has_pending_tick, next_tick, run_ticks, set_tick_host, tick, ManualTickHost, TickCallback,
    TickHost, TokioTickHost,
};
