//! Reactive Runtime
//!
//! The runtime is the per-thread ambient state shared by every effect:
//!
//! - the effect that is currently running (the target of `track`)
//! - whether tracking is enabled, with a stack so that nested
//!   pause/enable/reset calls unwind correctly
//! - the scheduling pause counter and the effect schedulers buffered while
//!   it is above zero
//!
//! # Thread Safety
//!
//! There is none to speak of: execution is single-threaded and cooperative.
//! Every thread gets its own independent runtime through `thread_local!`,
//! and nothing in this module is `Send`.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use super::effect::EffectCore;

/// Callback invoked when a triggered effect becomes runnable.
pub type EffectScheduler = Rc<dyn Fn()>;

struct Runtime {
    active_effect: RefCell<Option<Rc<EffectCore>>>,
    should_track: Cell<bool>,
    track_stack: RefCell<Vec<bool>>,
    pause_schedule: Cell<usize>,
    queued_schedulers: RefCell<VecDeque<EffectScheduler>>,
}

thread_local! {
    static RUNTIME: Runtime = Runtime {
        active_effect: RefCell::new(None),
        should_track: Cell::new(true),
        track_stack: RefCell::new(Vec::new()),
        pause_schedule: Cell::new(0),
        queued_schedulers: RefCell::new(VecDeque::new()),
    };
}

/// The effect whose body is currently executing, if any.
pub(crate) fn active_effect() -> Option<Rc<EffectCore>> {
    RUNTIME.with(|rt| rt.active_effect.borrow().clone())
}

/// Replace the active effect, returning the previous one.
pub(crate) fn replace_active_effect(effect: Option<Rc<EffectCore>>) -> Option<Rc<EffectCore>> {
    RUNTIME.with(|rt| rt.active_effect.replace(effect))
}

pub(crate) fn should_track() -> bool {
    RUNTIME.with(|rt| rt.should_track.get())
}

/// Set the tracking flag directly, returning the previous value.
///
/// Only the run guard uses this; everything else goes through the stack.
pub(crate) fn replace_should_track(value: bool) -> bool {
    RUNTIME.with(|rt| rt.should_track.replace(value))
}

/// Whether a read right now would be recorded as a dependency.
pub fn is_tracking() -> bool {
    should_track() && RUNTIME.with(|rt| rt.active_effect.borrow().is_some())
}

/// Stop recording dependencies until the matching [`reset_tracking`].
pub fn pause_tracking() {
    RUNTIME.with(|rt| {
        rt.track_stack.borrow_mut().push(rt.should_track.get());
        rt.should_track.set(false);
    });
}

/// Record dependencies again until the matching [`reset_tracking`], even
/// inside a paused region.
pub fn enable_tracking() {
    RUNTIME.with(|rt| {
        rt.track_stack.borrow_mut().push(rt.should_track.get());
        rt.should_track.set(true);
    });
}

/// Undo the most recent [`pause_tracking`] or [`enable_tracking`].
pub fn reset_tracking() {
    RUNTIME.with(|rt| {
        let last = rt.track_stack.borrow_mut().pop().unwrap_or(true);
        rt.should_track.set(last);
    });
}

/// Alias of [`reset_tracking`], pairing with [`pause_tracking`].
pub fn resume_tracking() {
    reset_tracking();
}

/// Buffer effect schedulers until the matching [`resume_scheduling`].
pub fn pause_scheduling() {
    RUNTIME.with(|rt| rt.pause_schedule.set(rt.pause_schedule.get() + 1));
}

/// Undo one [`pause_scheduling`]. When the counter reaches zero the buffered
/// schedulers run in the order they were triggered.
///
/// The counter is re-checked before every scheduler, so a scheduler that
/// pauses scheduling itself defers the rest of the buffer.
pub fn resume_scheduling() {
    RUNTIME.with(|rt| {
        rt.pause_schedule
            .set(rt.pause_schedule.get().saturating_sub(1));
    });
    loop {
        let next = RUNTIME.with(|rt| {
            if rt.pause_schedule.get() > 0 {
                None
            } else {
                rt.queued_schedulers.borrow_mut().pop_front()
            }
        });
        match next {
            Some(scheduler) => scheduler(),
            None => break,
        }
    }
}

pub(crate) fn push_scheduler(scheduler: EffectScheduler) {
    RUNTIME.with(|rt| rt.queued_schedulers.borrow_mut().push_back(scheduler));
}

#[cfg(test)]
pub(crate) fn scheduling_paused() -> bool {
    RUNTIME.with(|rt| rt.pause_schedule.get() > 0)
}

/// Guard returned by [`TrackingPause::enter`]; resets tracking on drop.
pub(crate) struct TrackingPause;

impl TrackingPause {
    pub(crate) fn enter() -> Self {
        pause_tracking();
        Self
    }
}

impl Drop for TrackingPause {
    fn drop(&mut self) {
        reset_tracking();
    }
}

/// Guard that resumes scheduling on drop.
///
/// While unwinding from a panic the buffered schedulers are left in place
/// for the next resume instead of running user code inside `drop`.
pub(crate) struct SchedulingPause;

impl SchedulingPause {
    pub(crate) fn enter() -> Self {
        pause_scheduling();
        Self
    }
}

impl Drop for SchedulingPause {
    fn drop(&mut self) {
        if std::thread::panicking() {
            RUNTIME.with(|rt| {
                rt.pause_schedule
                    .set(rt.pause_schedule.get().saturating_sub(1));
            });
        } else {
            resume_scheduling();
        }
    }
}

/// Run `f` without recording any dependency.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    let _pause = TrackingPause::enter();
    f()
}

/// Run `f` with scheduling paused, so that effects triggered by several
/// writes run once after `f` returns.
pub fn batch<R>(f: impl FnOnce() -> R) -> R {
    let _pause = SchedulingPause::enter();
    f()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracking_stack_nests() {
        assert!(should_track());

        pause_tracking();
        assert!(!should_track());

        enable_tracking();
        assert!(should_track());

        reset_tracking();
        assert!(!should_track());

        resume_tracking();
        assert!(should_track());

        // Unbalanced reset falls back to tracking.
        reset_tracking();
        assert!(should_track());
    }

    #[test]
    fn untracked_restores_on_exit() {
        untracked(|| assert!(!should_track()));
        assert!(should_track());
    }

    #[test]
    fn schedulers_wait_for_outermost_resume() {
        let calls = Rc::new(RefCell::new(Vec::new()));

        pause_scheduling();
        pause_scheduling();
        for i in 0..3 {
            let calls = calls.clone();
            push_scheduler(Rc::new(move || calls.borrow_mut().push(i)));
        }

        resume_scheduling();
        assert!(calls.borrow().is_empty());
        assert!(scheduling_paused());

        resume_scheduling();
        assert_eq!(*calls.borrow(), vec![0, 1, 2]);
        assert!(!scheduling_paused());
    }

    #[test]
    fn batch_flushes_after_closure() {
        let calls = Rc::new(Cell::new(0));
        let inner = calls.clone();
        batch(|| {
            push_scheduler(Rc::new(move || inner.set(inner.get() + 1)));
            assert_eq!(calls.get(), 0);
        });
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn no_active_effect_means_no_tracking() {
        assert!(active_effect().is_none());
        assert!(!is_tracking());
    }
}
