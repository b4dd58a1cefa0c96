//! Effect Scopes
//!
//! An [`EffectScope`] collects the effects created while it runs, plus any
//! cleanup callbacks registered with [`on_scope_dispose`], so that they can
//! all be torn down with one `stop()`.
//!
//! Scopes nest: a scope created while another one is running becomes its
//! child, unless it is detached. Stopping a scope stops its children.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use super::effect::EffectCore;
use crate::error::{self, ReactiveError, Result};

thread_local! {
    /// The scope whose `run` is on the stack, if any.
    static ACTIVE_SCOPE: RefCell<Option<Rc<ScopeInner>>> = const { RefCell::new(None) };
}

fn active_scope() -> Option<Rc<ScopeInner>> {
    ACTIVE_SCOPE.with(|s| s.borrow().clone())
}

fn replace_active_scope(scope: Option<Rc<ScopeInner>>) -> Option<Rc<ScopeInner>> {
    ACTIVE_SCOPE.with(|s| s.replace(scope))
}

/// Cleanup callback run when a scope stops.
pub type ScopeCleanup = Box<dyn FnOnce()>;

struct ScopeInner {
    active: Cell<bool>,
    detached: bool,
    effects: RefCell<Vec<Rc<EffectCore>>>,
    cleanups: RefCell<Vec<ScopeCleanup>>,
    parent: Option<Weak<ScopeInner>>,
    scopes: RefCell<Vec<Rc<ScopeInner>>>,
}

impl ScopeInner {
    fn stop(&self, from_parent: bool) {
        if !self.active.replace(false) {
            return;
        }

        let effects: Vec<_> = self.effects.borrow_mut().drain(..).collect();
        let cleanups: Vec<_> = self.cleanups.borrow_mut().drain(..).collect();
        let scopes: Vec<_> = self.scopes.borrow_mut().drain(..).collect();
        tracing::trace!(
            target: "trellis::reactive",
            effects = effects.len(),
            cleanups = cleanups.len(),
            scopes = scopes.len(),
            "scope stopped"
        );

        for effect in effects {
            effect.stop();
        }
        for cleanup in cleanups {
            cleanup();
        }
        for scope in scopes {
            scope.stop(true);
        }

        // The parent is draining its own list when it stops us.
        if !from_parent {
            if let Some(parent) = self.parent.as_ref().and_then(Weak::upgrade) {
                let me = self as *const ScopeInner;
                parent
                    .scopes
                    .borrow_mut()
                    .retain(|child| !std::ptr::eq(Rc::as_ptr(child), me));
            }
        }
    }
}

impl Drop for ScopeInner {
    fn drop(&mut self) {
        // Dropping the last handle of a live scope stops it, so that
        // self-owning watchers inside it do not outlive it.
        if self.active.get() && !std::thread::panicking() {
            self.stop(false);
        }
    }
}

/// Restores the previously active scope when dropped.
struct ScopeGuard {
    previous: Option<Rc<ScopeInner>>,
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        replace_active_scope(self.previous.take());
    }
}

/// A disposal group for effects and cleanups.
///
/// Handles are cheap to clone and share the same scope. A scope lives while
/// a handle, or its parent scope, holds it. Dropping the last handle of an
/// active scope stops it.
#[derive(Clone)]
pub struct EffectScope(Rc<ScopeInner>);

impl EffectScope {
    /// Create a scope. Unless `detached`, it becomes a child of the scope
    /// that is currently running.
    pub fn new(detached: bool) -> Self {
        let parent = if detached { None } else { active_scope() };
        let inner = Rc::new(ScopeInner {
            active: Cell::new(true),
            detached,
            effects: RefCell::new(Vec::new()),
            cleanups: RefCell::new(Vec::new()),
            parent: parent.as_ref().map(Rc::downgrade),
            scopes: RefCell::new(Vec::new()),
        });
        if let Some(parent) = parent.filter(|p| p.active.get()) {
            parent.scopes.borrow_mut().push(Rc::clone(&inner));
        }
        Self(inner)
    }

    /// Run `f` with this scope active. Effects created inside are recorded
    /// here.
    ///
    /// Returns `None` and reports a warning if the scope has been stopped.
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        match self.try_run(f) {
            Ok(value) => Some(value),
            Err(err) => {
                error::warn(&err);
                None
            }
        }
    }

    /// Like [`run`](Self::run), but returns the misuse as an error.
    pub fn try_run<R>(&self, f: impl FnOnce() -> R) -> Result<R> {
        if !self.0.active.get() {
            return Err(ReactiveError::InactiveScope);
        }
        let _guard = ScopeGuard {
            previous: replace_active_scope(Some(Rc::clone(&self.0))),
        };
        Ok(f())
    }

    /// Stop every recorded effect, run every cleanup, and stop every child
    /// scope. Idempotent.
    pub fn stop(&self) {
        self.0.stop(false);
    }

    pub fn is_active(&self) -> bool {
        self.0.active.get()
    }

    pub fn is_detached(&self) -> bool {
        self.0.detached
    }

    /// Number of recorded effects that are still active.
    pub fn effect_count(&self) -> usize {
        self.0
            .effects
            .borrow()
            .iter()
            .filter(|effect| effect.is_active())
            .count()
    }

    /// Number of live child scopes.
    pub fn child_count(&self) -> usize {
        self.0.scopes.borrow().len()
    }

    /// Register a cleanup on this scope directly.
    ///
    /// On a stopped scope the cleanup is dropped and a warning is reported.
    pub fn on_dispose<F>(&self, cleanup: F)
    where
        F: FnOnce() + 'static,
    {
        if let Err(err) = self.try_on_dispose(cleanup) {
            error::warn(&err);
        }
    }

    /// Like [`on_dispose`](Self::on_dispose), but returns the misuse as an
    /// error.
    pub fn try_on_dispose<F>(&self, cleanup: F) -> Result<()>
    where
        F: FnOnce() + 'static,
    {
        if !self.0.active.get() {
            return Err(ReactiveError::InactiveScope);
        }
        self.0.cleanups.borrow_mut().push(Box::new(cleanup));
        Ok(())
    }
}

impl PartialEq for EffectScope {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for EffectScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectScope")
            .field("active", &self.is_active())
            .field("detached", &self.0.detached)
            .field("effects", &self.effect_count())
            .field("scopes", &self.child_count())
            .finish()
    }
}

/// Create an effect scope.
pub fn effect_scope(detached: bool) -> EffectScope {
    EffectScope::new(detached)
}

/// The scope currently running, if any.
pub fn current_scope() -> Option<EffectScope> {
    active_scope().map(EffectScope)
}

/// Register `cleanup` to run when the current scope stops.
///
/// Outside any scope the cleanup is dropped and a warning is reported.
pub fn on_scope_dispose<F>(cleanup: F)
where
    F: FnOnce() + 'static,
{
    if let Err(err) = try_on_scope_dispose(cleanup) {
        error::warn(&err);
    }
}

/// Like [`on_scope_dispose`], but returns the misuse as an error.
pub fn try_on_scope_dispose<F>(cleanup: F) -> Result<()>
where
    F: FnOnce() + 'static,
{
    match current_scope() {
        Some(scope) => scope.try_on_dispose(cleanup),
        None => Err(ReactiveError::NoActiveScope),
    }
}

/// Record a freshly created effect in the running scope.
pub(crate) fn record_effect(effect: &Rc<EffectCore>) {
    if let Some(scope) = active_scope() {
        if scope.active.get() {
            let mut effects = scope.effects.borrow_mut();
            // Drop effects stopped on their own before growing.
            if effects.len() == effects.capacity() {
                effects.retain(|effect| effect.is_active());
            }
            effects.push(Rc::clone(effect));
        }
    }
}
