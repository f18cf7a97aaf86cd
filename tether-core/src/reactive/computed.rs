//! Computed Implementation
//!
//! A Computed is a cached derived value backed by one lazy computation.
//!
//! # How Computeds Work
//!
//! 1. The computed starts dirty and does nothing until it is first read.
//!
//! 2. Reading a dirty computed runs its getter under the computed's own
//!    computation, caches the result and clears the dirty flag. Reading a
//!    clean computed returns the cache.
//!
//! 3. When a source the getter read changes, the computation's scheduler only
//!    sets the dirty flag. Recomputation waits for the next read.
//!
//! 4. Every read links the reader into the computed's dependency sets, so an
//!    effect that only reads the computed is still notified when the sources
//!    change. Computed subscribers are dispatched before plain effects, so by
//!    the time such an effect re-runs the computed is already dirty.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use super::effect::{Effect, EffectOptions, Runner};
use super::runtime::Runtime;
use super::subscriber::SubscriberId;
use crate::error::{ReactiveError, Result};

type Getter<T> = Arc<dyn Fn() -> T + Send + Sync>;
type Setter<T> = Arc<dyn Fn(T) + Send + Sync>;

/// A lazily recomputed, memoized derived value.
///
/// # Example
///
/// ```rust,ignore
/// let count = Ref::new(1);
///
/// let source = count.clone();
/// let doubled = Computed::new(move || source.get().as_f64().unwrap_or_default() * 2.0);
///
/// assert_eq!(doubled.get(), 2.0);
/// count.set(5);
/// assert_eq!(doubled.get(), 10.0);
/// ```
pub struct Computed<T> {
    effect: Effect<T>,
    setter: Option<Setter<T>>,
    dirty: Arc<AtomicBool>,
    value: Arc<Mutex<Option<T>>>,
}

impl<T> Computed<T>
where
    T: Clone + Send + 'static,
{
    /// Create a read-only computed from a getter.
    pub fn new<G>(get: G) -> Self
    where
        G: Fn() -> T + Send + Sync + 'static,
    {
        Self::build(Arc::new(get), None)
    }

    /// Create a computed whose assignments are forwarded to `set`.
    pub fn writable<G, S>(get: G, set: S) -> Self
    where
        G: Fn() -> T + Send + Sync + 'static,
        S: Fn(T) + Send + Sync + 'static,
    {
        Self::build(Arc::new(get), Some(Arc::new(set)))
    }

    fn build(getter: Getter<T>, setter: Option<Setter<T>>) -> Self {
        let dirty = Arc::new(AtomicBool::new(true));

        let flag = dirty.clone();
        let effect = Effect::with_options(
            move || getter(),
            EffectOptions::new()
                .lazy()
                .computed()
                .scheduler(move |runner: Runner| {
                    if !flag.swap(true, Ordering::SeqCst) {
                        debug!(subscriber = ?runner.id(), "computed invalidated");
                    }
                }),
        );

        Self {
            effect,
            setter,
            dirty,
            value: Arc::new(Mutex::new(None)),
        }
    }

    /// Get the value, recomputing only if a source changed since the last
    /// computation.
    pub fn get(&self) -> T {
        let cached = if self.is_dirty() {
            None
        } else {
            self.value.lock().clone()
        };
        let value = match cached {
            Some(value) => value,
            None => self.recompute(),
        };

        Runtime::chain(self.effect.core());
        value
    }

    fn recompute(&self) -> T {
        let value = self.effect.execute();
        *self.value.lock() = Some(value.clone());
        self.dirty.store(false, Ordering::SeqCst);
        value
    }

    /// Forward `value` to the setter.
    ///
    /// Fails with [`ReactiveError::ReadonlyComputed`] if the computed was
    /// built from a getter alone.
    pub fn set(&self, value: T) -> Result<()> {
        let setter = self.setter.as_ref().ok_or(ReactiveError::ReadonlyComputed)?;
        setter(value);
        Ok(())
    }

    /// Whether the next read will recompute.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    pub fn is_writable(&self) -> bool {
        self.setter.is_some()
    }

    /// Subscriber ID of the computed's internal computation.
    pub fn subscriber_id(&self) -> SubscriberId {
        self.effect.id()
    }
}

impl<T> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            effect: self.effect.clone(),
            setter: self.setter.clone(),
            dirty: Arc::clone(&self.dirty),
            value: Arc::clone(&self.value),
        }
    }
}

impl<T> fmt::Debug for Computed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed")
            .field("effect", &self.effect)
            .field("dirty", &self.dirty.load(Ordering::SeqCst))
            .field("writable", &self.setter.is_some())
            .finish()
    }
}

/// Create a read-only computed.
pub fn computed<T, G>(get: G) -> Computed<T>
where
    T: Clone + Send + 'static,
    G: Fn() -> T + Send + Sync + 'static,
{
    Computed::new(get)
}

/// Create a computed with a getter and a setter.
pub fn computed_writable<T, G, S>(get: G, set: S) -> Computed<T>
where
    T: Clone + Send + 'static,
    G: Fn() -> T + Send + Sync + 'static,
    S: Fn(T) + Send + Sync + 'static,
{
    Computed::writable(get, set)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
