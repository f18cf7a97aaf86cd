//! Reactive Context
//!
//! The reactive context tracks which computation is currently running.
//! This enables automatic dependency tracking: when a view, ref or computed
//! is read, the innermost running computation is recorded as a subscriber.
//!
//! # Implementation
//!
//! We use a thread-local stack of running computations. Running an effect
//! pushes it onto the stack; the returned guard pops it when dropped, so the
//! stack stays balanced on every exit path, including a panic unwinding out
//! of the computation.
//!
//! Nesting is the normal case: an effect that reads a dirty computed runs the
//! computed's own computation on top of itself, and an effect that writes a
//! value can synchronously run other effects from inside its body.

use std::cell::RefCell;
use std::sync::Arc;

use super::effect::Computation;
use super::SubscriberId;

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<Arc<dyn Computation>>> = const { RefCell::new(Vec::new()) };
}

/// Guard that pops the context when dropped.
pub struct ReactiveContext {
    subscriber_id: SubscriberId,
}

impl ReactiveContext {
    /// Make `computation` the active computation until the guard drops.
    pub(crate) fn enter(computation: Arc<dyn Computation>) -> Self {
        let subscriber_id = computation.core().id();
        CONTEXT_STACK.with(|stack| stack.borrow_mut().push(computation));

        Self { subscriber_id }
    }

    /// Check if there is an active reactive context.
    pub fn is_active() -> bool {
        CONTEXT_STACK.with(|stack| !stack.borrow().is_empty())
    }

    /// Number of computations currently running on this thread.
    pub fn depth() -> usize {
        CONTEXT_STACK.with(|stack| stack.borrow().len())
    }

    /// Get the innermost running subscriber, if any.
    pub fn current_subscriber() -> Option<SubscriberId> {
        CONTEXT_STACK.with(|stack| stack.borrow().last().map(|entry| entry.core().id()))
    }

    /// Get the innermost running computation, if any.
    pub(crate) fn current() -> Option<Arc<dyn Computation>> {
        CONTEXT_STACK.with(|stack| stack.borrow().last().cloned())
    }
}

impl Drop for ReactiveContext {
    fn drop(&mut self) {
        let popped = CONTEXT_STACK.with(|stack| stack.borrow_mut().pop());

        if let Some(entry) = popped {
            debug_assert_eq!(
                entry.core().id(),
                self.subscriber_id,
                "ReactiveContext mismatch: expected {:?}, got {:?}",
                self.subscriber_id,
                entry.core().id()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{effect_with, EffectOptions};

    #[test]
    fn context_tracks_subscriber() {
        let effect = effect_with(|| (), EffectOptions::new().lazy());

        assert!(!ReactiveContext::is_active());
        assert!(ReactiveContext::current_subscriber().is_none());

        {
            let _ctx = ReactiveContext::enter(effect.computation());

            assert!(ReactiveContext::is_active());
            assert_eq!(ReactiveContext::current_subscriber(), Some(effect.id()));
        }

        assert!(!ReactiveContext::is_active());
        assert!(ReactiveContext::current_subscriber().is_none());
    }

    #[test]
    fn nested_contexts() {
        let outer = effect_with(|| (), EffectOptions::new().lazy());
        let inner = effect_with(|| (), EffectOptions::new().lazy());

        {
            let _ctx1 = ReactiveContext::enter(outer.computation());
            assert_eq!(ReactiveContext::current_subscriber(), Some(outer.id()));

            {
                let _ctx2 = ReactiveContext::enter(inner.computation());
                assert_eq!(ReactiveContext::current_subscriber(), Some(inner.id()));
                assert_eq!(ReactiveContext::depth(), 2);
            }

            assert_eq!(ReactiveContext::current_subscriber(), Some(outer.id()));
        }

        assert_eq!(ReactiveContext::depth(), 0);
    }

    #[test]
    fn context_pops_during_unwind() {
        let effect = effect_with(|| (), EffectOptions::new().lazy());
        let computation = effect.computation();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _ctx = ReactiveContext::enter(computation);
            panic!("computation failed");
        }));

        assert!(result.is_err());
        assert_eq!(ReactiveContext::depth(), 0);
    }
}
