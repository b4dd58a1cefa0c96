//! Job Queue
//!
//! The queue collects deferred work and runs it on the next tick.
//!
//! # Algorithm
//!
//! 1. `queue_job` appends a job unless the same job is already waiting in
//!    the part of the queue that has not run yet. A job that allows
//!    recursion may re-queue itself while it is running.
//!
//! 2. The first job queued outside a flush requests a tick.
//!
//! 3. `flush_jobs` runs jobs in FIFO order, re-reading the queue length on
//!    every step so jobs queued during the flush run in the same pass.
//!
//! 4. Once the main queue is empty, the post-flush jobs run (deduplicated,
//!    again picking up jobs queued while they run).
//!
//! 5. If either queue received work in the meantime, the pass repeats.
//!
//! A job that panics does not abort the pass. The remaining jobs and the
//! post-flush jobs still run, and the first panic resumes once the flush
//! loop is done.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use super::tick::next_tick;
use crate::config;
use crate::error::ReactiveError;

/// Unique identifier for a job. Queue deduplication compares ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(u64);

impl JobId {
    /// Generate a new unique job ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job#{}", self.0)
    }
}

/// A unit of deferred work.
///
/// Clones are the same job: queueing a clone of a pending job is a no-op.
#[derive(Clone)]
pub struct SchedulerJob {
    id: JobId,
    run: Rc<dyn Fn()>,
    allow_recurse: bool,
}

impl SchedulerJob {
    pub fn new<F>(run: F) -> Self
    where
        F: Fn() + 'static,
    {
        Self {
            id: JobId::new(),
            run: Rc::new(run),
            allow_recurse: false,
        }
    }

    /// Let the job queue itself again while it is running.
    pub fn with_allow_recurse(mut self, allow: bool) -> Self {
        self.allow_recurse = allow;
        self
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn allow_recurse(&self) -> bool {
        self.allow_recurse
    }

    /// Run the job now.
    pub fn invoke(&self) {
        (self.run)();
    }
}

impl PartialEq for SchedulerJob {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for SchedulerJob {}

impl fmt::Debug for SchedulerJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedulerJob")
            .field("id", &self.id)
            .field("allow_recurse", &self.allow_recurse)
            .finish()
    }
}

struct JobQueue {
    jobs: RefCell<Vec<SchedulerJob>>,
    flush_index: Cell<usize>,
    flushing: Cell<bool>,
    flush_pending: Cell<bool>,
    pending_post: RefCell<Vec<SchedulerJob>>,
    active_post: RefCell<Option<Vec<SchedulerJob>>>,
    post_index: Cell<usize>,
}

thread_local! {
    static QUEUE: JobQueue = JobQueue {
        jobs: RefCell::new(Vec::new()),
        flush_index: Cell::new(0),
        flushing: Cell::new(false),
        flush_pending: Cell::new(false),
        pending_post: RefCell::new(Vec::new()),
        active_post: RefCell::new(None),
        post_index: Cell::new(0),
    };
}

type PanicPayload = Box<dyn Any + Send + 'static>;

/// Queue `job` for the next flush.
///
/// Ignored if the same job is already waiting in the unflushed part of the
/// queue. While the job itself is running, a job with `allow_recurse` is
/// queued again behind it.
pub fn queue_job(job: SchedulerJob) {
    let queued = QUEUE.with(|q| {
        let mut jobs = q.jobs.borrow_mut();
        let start = if q.flushing.get() && job.allow_recurse {
            q.flush_index.get() + 1
        } else {
            q.flush_index.get()
        };
        if jobs.iter().skip(start).any(|pending| pending.id == job.id) {
            return false;
        }
        tracing::trace!(target: "trellis::scheduler", job = %job.id, "job queued");
        jobs.push(job);
        true
    });
    if queued {
        queue_flush();
    }
}

/// Queue `job` to run after the main queue has drained.
pub fn queue_post_flush_job(job: SchedulerJob) {
    QUEUE.with(|q| {
        let active = q.active_post.borrow();
        let already_active = active.as_ref().is_some_and(|active| {
            let start = if job.allow_recurse {
                q.post_index.get() + 1
            } else {
                q.post_index.get()
            };
            active.iter().skip(start).any(|pending| pending.id == job.id)
        });
        if !already_active {
            q.pending_post.borrow_mut().push(job);
        }
    });
    queue_flush();
}

fn queue_flush() {
    let request = QUEUE.with(|q| {
        if q.flushing.get() || q.flush_pending.get() {
            false
        } else {
            q.flush_pending.set(true);
            true
        }
    });
    if request {
        next_tick(flush_jobs);
    }
}

/// Whether a flush is in progress on this thread.
pub fn is_flushing() -> bool {
    QUEUE.with(|q| q.flushing.get())
}

/// Whether any job is waiting to run.
pub fn has_pending_jobs() -> bool {
    QUEUE.with(|q| !q.jobs.borrow().is_empty() || !q.pending_post.borrow().is_empty())
}

/// Run every queued job, then every post-flush job, until both queues are
/// empty. A no-op when called from inside a flush.
///
/// # Panics
///
/// Re-raises the first panic of a job, after all other jobs have run.
pub fn flush_jobs() {
    if QUEUE.with(|q| q.flushing.get()) {
        return;
    }

    let limit = config::config().recursion_limit;
    let mut runs: HashMap<JobId, usize> = HashMap::new();
    let mut first_panic: Option<PanicPayload> = None;

    loop {
        QUEUE.with(|q| {
            q.flush_pending.set(false);
            q.flushing.set(true);
        });
        tracing::trace!(target: "trellis::scheduler", "flush started");

        let mut index = 0;
        loop {
            let job = QUEUE.with(|q| {
                q.flush_index.set(index);
                q.jobs.borrow().get(index).cloned()
            });
            let Some(job) = job else { break };
            index += 1;

            let count = runs.entry(job.id).or_insert(0);
            *count += 1;
            if *count > limit {
                let err = ReactiveError::RecursionLimit {
                    job: job.id.raw(),
                    limit,
                };
                tracing::error!(target: "trellis::scheduler", job = %job.id, "{err}");
                continue;
            }
            run_job(&job, &mut first_panic);
        }

        QUEUE.with(|q| {
            q.flush_index.set(0);
            q.jobs.borrow_mut().clear();
        });

        flush_post_flush_jobs(&mut first_panic);

        let again = QUEUE.with(|q| {
            q.flushing.set(false);
            !q.jobs.borrow().is_empty() || !q.pending_post.borrow().is_empty()
        });
        if !again {
            break;
        }
    }

    if let Some(payload) = first_panic {
        panic::resume_unwind(payload);
    }
}

fn flush_post_flush_jobs(first_panic: &mut Option<PanicPayload>) {
    let started = QUEUE.with(|q| {
        let pending: Vec<SchedulerJob> = q.pending_post.borrow_mut().drain(..).collect();
        if pending.is_empty() {
            return false;
        }
        let mut seen = HashSet::new();
        let active: Vec<SchedulerJob> = pending
            .into_iter()
            .filter(|job| seen.insert(job.id))
            .collect();
        *q.active_post.borrow_mut() = Some(active);
        true
    });
    if !started {
        return;
    }

    let mut index = 0;
    loop {
        let job = QUEUE.with(|q| {
            q.post_index.set(index);
            q.active_post
                .borrow()
                .as_ref()
                .and_then(|active| active.get(index).cloned())
        });
        let Some(job) = job else { break };
        index += 1;
        run_job(&job, first_panic);
    }

    QUEUE.with(|q| {
        *q.active_post.borrow_mut() = None;
        q.post_index.set(0);
    });
}

fn run_job(job: &SchedulerJob, first_panic: &mut Option<PanicPayload>) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| job.invoke())) {
        tracing::error!(
            target: "trellis::scheduler",
            job = %job.id,
            "job panicked, continuing flush"
        );
        first_panic.get_or_insert(payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::run_ticks;

    fn logging_job(log: &Rc<RefCell<Vec<&'static str>>>, name: &'static str) -> SchedulerJob {
        let log = log.clone();
        SchedulerJob::new(move || log.borrow_mut().push(name))
    }

    #[test]
    fn jobs_run_once_in_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let a = logging_job(&log, "a");
        let b = logging_job(&log, "b");

        queue_job(a.clone());
        queue_job(b.clone());
        queue_job(a);
        queue_job(b);
        assert!(has_pending_jobs());
        assert!(log.borrow().is_empty());

        assert_eq!(run_ticks(), 1);
        assert_eq!(*log.borrow(), vec!["a", "b"]);
        assert!(!has_pending_jobs());
    }

    fn self_queueing(allow_recurse: bool) -> usize {
        let runs = Rc::new(Cell::new(0));
        let slot: Rc<RefCell<Option<SchedulerJob>>> = Rc::new(RefCell::new(None));
        let (counter, me) = (runs.clone(), slot.clone());
        let job = SchedulerJob::new(move || {
            counter.set(counter.get() + 1);
            if counter.get() < 3 {
                if let Some(job) = me.borrow().clone() {
                    queue_job(job);
                }
            }
        })
        .with_allow_recurse(allow_recurse);
        *slot.borrow_mut() = Some(job.clone());

        queue_job(job);
        flush_jobs();
        slot.borrow_mut().take();
        runs.get()
    }

    #[test]
    fn self_requeue_needs_allow_recurse() {
        assert_eq!(self_queueing(false), 1);
        assert_eq!(self_queueing(true), 3);
    }

    #[test]
    fn jobs_queued_during_flush_run_in_same_pass() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let late = logging_job(&log, "late");
        let inner = log.clone();
        queue_job(SchedulerJob::new(move || {
            inner.borrow_mut().push("early");
            queue_job(late.clone());
        }));

        flush_jobs();
        assert_eq!(*log.borrow(), vec!["early", "late"]);
        assert!(!is_flushing());
    }

    #[test]
    fn post_flush_jobs_run_after_main_queue() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let post = logging_job(&log, "post");
        queue_post_flush_job(post.clone());
        queue_post_flush_job(post);
        queue_job(logging_job(&log, "main"));

        run_ticks();
        assert_eq!(*log.borrow(), vec!["main", "post"]);
    }

    #[test]
    fn post_job_queueing_main_job_repeats_the_loop() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let main = logging_job(&log, "main");
        let inner = log.clone();
        queue_post_flush_job(SchedulerJob::new(move || {
            inner.borrow_mut().push("post");
            queue_job(main.clone());
        }));

        assert_eq!(run_ticks(), 1);
        assert_eq!(*log.borrow(), vec!["post", "main"]);
    }

    fn self_queueing_post(allow_recurse: bool) -> usize {
        let runs = Rc::new(Cell::new(0));
        let slot: Rc<RefCell<Option<SchedulerJob>>> = Rc::new(RefCell::new(None));
        let (counter, me) = (runs.clone(), slot.clone());
        let job = SchedulerJob::new(move || {
            counter.set(counter.get() + 1);
            if counter.get() < 3 {
                if let Some(job) = me.borrow().clone() {
                    queue_post_flush_job(job);
                }
            }
        })
        .with_allow_recurse(allow_recurse);
        *slot.borrow_mut() = Some(job.clone());

        queue_post_flush_job(job);
        flush_jobs();
        slot.borrow_mut().take();
        assert!(!has_pending_jobs());
        runs.get()
    }

    #[test]
    fn post_job_requeue_needs_allow_recurse() {
        assert_eq!(self_queueing_post(false), 1);
        assert_eq!(self_queueing_post(true), 3);
    }

    #[test]
    fn post_job_queued_while_waiting_runs_once() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let second = logging_job(&log, "second");
        let (inner, pending) = (log.clone(), second.clone());
        queue_post_flush_job(SchedulerJob::new(move || {
            inner.borrow_mut().push("first");
            queue_post_flush_job(pending.clone());
        }));
        queue_post_flush_job(second);

        flush_jobs();
        assert_eq!(*log.borrow(), vec!["first", "second"]);
    }

    #[test]
    fn post_job_queued_during_post_flush_runs_in_next_pass() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let late = logging_job(&log, "late");
        let inner = log.clone();
        queue_post_flush_job(SchedulerJob::new(move || {
            inner.borrow_mut().push("early");
            queue_post_flush_job(late.clone());
        }));

        assert_eq!(run_ticks(), 1);
        assert_eq!(*log.borrow(), vec!["early", "late"]);
        assert!(!is_flushing());
    }

    #[test]
    fn panicking_job_does_not_abort_the_pass() {
        let log = Rc::new(RefCell::new(Vec::new()));
        queue_job(SchedulerJob::new(|| panic!("job failed")));
        queue_job(logging_job(&log, "after"));
        queue_post_flush_job(logging_job(&log, "post"));

        let result = panic::catch_unwind(flush_jobs);
        assert!(result.is_err());
        assert_eq!(*log.borrow(), vec!["after", "post"]);
        assert!(!is_flushing());
        assert!(!has_pending_jobs());
    }

    #[test]
    fn recursion_limit_stops_runaway_job() {
        config::configure(config::RuntimeConfig {
            recursion_limit: 5,
            ..Default::default()
        });
        let runs = Rc::new(Cell::new(0));
        let slot: Rc<RefCell<Option<SchedulerJob>>> = Rc::new(RefCell::new(None));
        let (counter, me) = (runs.clone(), slot.clone());
        let job = SchedulerJob::new(move || {
            counter.set(counter.get() + 1);
            if let Some(job) = me.borrow().clone() {
                queue_job(job);
            }
        })
        .with_allow_recurse(true);
        *slot.borrow_mut() = Some(job.clone());

        queue_job(job);
        flush_jobs();
        slot.borrow_mut().take();
        assert_eq!(runs.get(), 5);
    }
}
