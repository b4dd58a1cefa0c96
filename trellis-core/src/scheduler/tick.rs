//! Tick Primitive
//!
//! A tick is one deferred flush: "run these callbacks once the current
//! synchronous work is done". The runtime never decides when that is. It
//! asks a [`TickHost`], at most once per batch of callbacks, and the host
//! calls back later on the same thread.
//!
//! Two hosts are provided:
//!
//! - [`ManualTickHost`] (the default) records requests; [`run_ticks`] drains
//!   them. Useful in tests and in hosts that own their event loop.
//! - [`TokioTickHost`] spawns the flush as a local task, so it runs at the
//!   next yield point of a tokio `LocalSet`.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use tokio::sync::oneshot;

/// Deferred callback queued with [`next_tick`].
pub type TickCallback = Box<dyn FnOnce()>;

/// Provider of the deferral mechanism.
pub trait TickHost {
    /// Arrange for `flush` to be called once, after the current synchronous
    /// work completes. Requests must be served in FIFO order.
    fn request_tick(&self, flush: fn());
}

/// Host that queues requests until [`run_ticks`] is called.
#[derive(Debug, Default, Clone, Copy)]
pub struct ManualTickHost;

impl TickHost for ManualTickHost {
    fn request_tick(&self, flush: fn()) {
        MANUAL_REQUESTS.with(|r| r.borrow_mut().push_back(flush));
    }
}

/// Host that runs each tick as a task on the current tokio `LocalSet`.
///
/// # Panics
///
/// Requesting a tick outside a `LocalSet` panics, as `spawn_local` does.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioTickHost;

impl TickHost for TokioTickHost {
    fn request_tick(&self, flush: fn()) {
        tokio::task::spawn_local(async move { flush() });
    }
}

struct TickState {
    callbacks: RefCell<VecDeque<TickCallback>>,
    pending: Cell<bool>,
    host: RefCell<Rc<dyn TickHost>>,
}

thread_local! {
    static TICKS: TickState = TickState {
        callbacks: RefCell::new(VecDeque::new()),
        pending: Cell::new(false),
        host: RefCell::new(Rc::new(ManualTickHost)),
    };

    static MANUAL_REQUESTS: RefCell<VecDeque<fn()>> = const { RefCell::new(VecDeque::new()) };
}

/// Install the tick host for the current thread.
pub fn set_tick_host<H>(host: H)
where
    H: TickHost + 'static,
{
    TICKS.with(|t| *t.host.borrow_mut() = Rc::new(host));
}

fn request_tick() {
    let host = TICKS.with(|t| {
        if t.pending.replace(true) {
            None
        } else {
            Some(Rc::clone(&t.host.borrow()))
        }
    });
    if let Some(host) = host {
        tracing::trace!(target: "trellis::scheduler", "tick requested");
        host.request_tick(flush_callbacks);
    }
}

/// Run `callback` on the next tick. Callbacks run in the order they were
/// queued; one host request covers all callbacks queued before it fires.
pub fn next_tick<F>(callback: F)
where
    F: FnOnce() + 'static,
{
    TICKS.with(|t| t.callbacks.borrow_mut().push_back(Box::new(callback)));
    request_tick();
}

/// A future that resolves once the next tick has run.
///
/// The tick is requested when this is called, not when it is first polled.
pub fn tick() -> impl Future<Output = ()> {
    let (tx, rx) = oneshot::channel();
    next_tick(move || {
        let _ = tx.send(());
    });
    async move {
        let _ = rx.await;
    }
}

/// Run every callback queued so far.
///
/// If a callback panics, the ones after it are put back at the front of the
/// queue for the next tick and the panic continues.
fn flush_callbacks() {
    let batch: Vec<TickCallback> = TICKS.with(|t| {
        t.pending.set(false);
        t.callbacks.borrow_mut().drain(..).collect()
    });
    let mut batch = batch.into_iter();
    while let Some(callback) = batch.next() {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(callback)) {
            let rest: Vec<TickCallback> = batch.collect();
            if !rest.is_empty() {
                TICKS.with(|t| {
                    let mut queued = t.callbacks.borrow_mut();
                    for callback in rest.into_iter().rev() {
                        queued.push_front(callback);
                    }
                });
                request_tick();
            }
            panic::resume_unwind(payload);
        }
    }
}

/// Serve every tick requested from the [`ManualTickHost`], including ticks
/// requested while serving. Returns the number of ticks run.
pub fn run_ticks() -> usize {
    let mut ran = 0;
    while let Some(flush) = MANUAL_REQUESTS.with(|r| r.borrow_mut().pop_front()) {
        flush();
        ran += 1;
    }
    ran
}

/// Whether callbacks are waiting for a tick.
pub fn has_pending_tick() -> bool {
    TICKS.with(|t| t.pending.get())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn callbacks_share_one_tick_in_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        for i in 0..3 {
            let log = log.clone();
            next_tick(move || log.borrow_mut().push(i));
        }
        assert!(log.borrow().is_empty());
        assert!(has_pending_tick());

        assert_eq!(run_ticks(), 1);
        assert_eq!(*log.borrow(), vec![0, 1, 2]);
        assert!(!has_pending_tick());
    }

    #[test]
    fn callback_queued_during_tick_gets_a_new_tick() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let outer = log.clone();
        next_tick(move || {
            outer.borrow_mut().push("first");
            let inner = outer.clone();
            next_tick(move || inner.borrow_mut().push("second"));
        });

        assert_eq!(run_ticks(), 2);
        assert_eq!(*log.borrow(), vec!["first", "second"]);
    }

    #[test]
    fn panicking_callback_keeps_the_rest() {
        let ran = Rc::new(Cell::new(false));
        next_tick(|| panic!("boom"));
        let flag = ran.clone();
        next_tick(move || flag.set(true));

        let result = panic::catch_unwind(run_ticks);
        assert!(result.is_err());
        assert!(!ran.get());

        run_ticks();
        assert!(ran.get());
    }

    #[test]
    fn tick_future_resolves_after_flush() {
        let fut = tick();
        assert!(has_pending_tick());
        run_ticks();
        block_on(fut);
    }

    // The oneshot is already filled, so a single poll completes the future.
    fn block_on<F: Future<Output = ()>>(fut: F) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        rt.block_on(fut);
    }
}
