//! Ref Implementation
//!
//! A Ref is a single reactive cell. It is its own tracked target with one
//! dependency key, [`DepKey::Value`].
//!
//! Structured values stored in a ref are wrapped on the way in, so
//! `ref.get()` hands back a view and nested reads are tracked by the view
//! rather than by the ref.
//!
//! Unlike a view property, writing a ref always notifies, even if the new
//! value is the same as the old one.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use super::proxy::wrap;
use super::runtime::{DepKey, Runtime, TargetId, TrackKind, TriggerKind};
use super::value::Value;

/// A reactive cell holding one [`Value`].
///
/// # Example
///
/// ```rust,ignore
/// let count = Ref::new(0);
///
/// let reader = count.clone();
/// let _effect = effect(move || println!("count: {:?}", reader.get()));
///
/// count.set(5); // prints "count: Number(5)"
/// ```
#[derive(Clone)]
pub struct Ref {
    inner: Arc<RefInner>,
}

struct RefInner {
    id: TargetId,
    value: RwLock<Value>,
}

impl Drop for RefInner {
    fn drop(&mut self) {
        Runtime::forget(self.id);
    }
}

impl Ref {
    /// Create a ref holding `value`.
    pub fn new(value: impl Into<Value>) -> Self {
        Self {
            inner: Arc::new(RefInner {
                id: TargetId::new(),
                value: RwLock::new(wrap(value.into())),
            }),
        }
    }

    /// The ref's identity in the dependency graph.
    pub fn id(&self) -> TargetId {
        self.inner.id
    }

    /// Get the current value, tracking the dependency.
    pub fn get(&self) -> Value {
        Runtime::track(self.inner.id, TrackKind::Get, DepKey::Value);
        self.get_untracked()
    }

    /// Get the current value without tracking.
    pub fn get_untracked(&self) -> Value {
        self.inner.value.read().clone()
    }

    /// Store a new value and notify dependents.
    pub fn set(&self, value: impl Into<Value>) {
        let previous = std::mem::replace(&mut *self.inner.value.write(), wrap(value.into()));
        drop(previous);

        Runtime::trigger(self.inner.id, TriggerKind::Set, &DepKey::Value);
    }

    /// Replace the value with `f(current)`.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&Value) -> Value,
    {
        let next = f(&self.get_untracked());
        self.set(next);
    }
}

impl fmt::Debug for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ref")
            .field("id", &self.inner.id)
            .field("value", &self.get_untracked())
            .field(
                "subscriber_count",
                &Runtime::subscriber_count(self.inner.id, &DepKey::Value),
            )
            .finish()
    }
}

/// Create a ref holding `value`.
pub fn ref_value(value: impl Into<Value>) -> Ref {
    Ref::new(value)
}
