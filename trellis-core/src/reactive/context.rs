//! Reactive Context
//!
//! The reactive context tracks which effect is currently running. This
//! enables automatic dependency tracking: when a cell is read, the running
//! effect is registered as a subscriber.
//!
//! # Implementation
//!
//! Entering a context swaps the effect into the thread-local runtime slot
//! and re-arms tracking. The previous effect and tracking flag are kept in
//! the guard and put back when it is dropped, so nested runs (an effect
//! reading a computed, which runs its own getter) unwind correctly even if
//! the body panics.

use std::rc::Rc;

use super::effect::EffectCore;
use super::runtime;
use super::SubscriberId;

/// Guard that restores the previous context when dropped.
pub struct ReactiveContext {
    effect: Rc<EffectCore>,
    previous: Option<Rc<EffectCore>>,
    last_should_track: bool,
}

impl ReactiveContext {
    /// Enter a new reactive context for the given effect.
    ///
    /// Bumps the effect's run counter and starts a fresh dependency pass.
    pub(crate) fn enter(effect: Rc<EffectCore>) -> Self {
        let last_should_track = runtime::replace_should_track(true);
        let previous = runtime::replace_active_effect(Some(Rc::clone(&effect)));
        effect.enter_run();

        Self {
            effect,
            previous,
            last_should_track,
        }
    }

    /// Check if there is an active reactive context.
    pub fn is_active() -> bool {
        runtime::active_effect().is_some()
    }

    /// Get the current subscriber ID, if any.
    pub fn current_subscriber() -> Option<SubscriberId> {
        runtime::active_effect().map(|effect| effect.id())
    }
}

impl Drop for ReactiveContext {
    fn drop(&mut self) {
        self.effect.exit_run();

        let popped = runtime::replace_active_effect(self.previous.take());
        runtime::replace_should_track(self.last_should_track);

        // Verify we're popping the right context.
        if let Some(popped) = popped {
            debug_assert!(
                Rc::ptr_eq(&popped, &self.effect),
                "ReactiveContext mismatch: expected {}, got {}",
                self.effect.id(),
                popped.id()
            );
        }

        // A stop requested mid-run happens once the outermost run is over.
        // While unwinding it stays pending so no user cleanup runs in drop.
        if !self.effect.is_running() && !std::thread::panicking() && self.effect.take_pending_stop() {
            self.effect.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::ReactiveEffect;

    #[test]
    fn context_tracks_subscriber() {
        assert!(!ReactiveContext::is_active());
        assert!(ReactiveContext::current_subscriber().is_none());

        let effect = ReactiveEffect::new(|| ReactiveContext::current_subscriber());
        let seen = effect.run();
        assert_eq!(seen, Some(effect.id()));

        // Context should be cleaned up after the run
        assert!(!ReactiveContext::is_active());
        assert!(ReactiveContext::current_subscriber().is_none());
    }

    #[test]
    fn nested_contexts() {
        let inner = ReactiveEffect::new(|| ReactiveContext::current_subscriber());
        let inner_clone = inner.clone();
        let outer = ReactiveEffect::new(move || {
            let before = ReactiveContext::current_subscriber();
            let nested = inner_clone.run();
            let after = ReactiveContext::current_subscriber();
            (before, nested, after)
        });

        let (before, nested, after) = outer.run();
        assert_eq!(before, Some(outer.id()));
        assert_eq!(nested, Some(inner.id()));
        // After inner context drops, outer should be current
        assert_eq!(after, Some(outer.id()));

        assert!(ReactiveContext::current_subscriber().is_none());
    }

    #[test]
    fn run_rearms_tracking() {
        crate::reactive::pause_tracking();
        let effect = ReactiveEffect::new(runtime::should_track);
        assert!(effect.run());
        assert!(!runtime::should_track());
        crate::reactive::reset_tracking();
    }
}
