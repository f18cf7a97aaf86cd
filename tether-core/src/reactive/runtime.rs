//! Reactive Runtime
//!
//! The runtime owns the dependency graph: a mapping from tracked target
//! (a raw value or a ref) to a mapping from key to the set of computations
//! that read that key.
//!
//! # How It Works
//!
//! 1. A read through a view or ref calls [`Runtime::track`]. If a computation
//!    is running, it is added to the dependency set for `(target, key)` and
//!    the set is recorded on the computation itself.
//!
//! 2. A write calls [`Runtime::trigger`]. The subscribers of `(target, key)`
//!    are split into computed and plain computations; computed ones are
//!    dispatched first so that their dirty flag is already set when a plain
//!    effect reads them.
//!
//! 3. Dispatching hands the computation to its scheduler if it has one and
//!    runs it synchronously otherwise.
//!
//! 4. Reading a computed links the reader into the computed's own dependency
//!    sets ([`Runtime::chain`]), so sources notify the reader directly.
//!
//! # Thread Safety
//!
//! The graph is a process-wide `DashMap` keyed by [`TargetId`]. Dependency
//! sets hold their subscribers weakly. No lock is held while a computation,
//! scheduler or debugger hook runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use dashmap::DashMap;
use indexmap::IndexMap;
use parking_lot::Mutex;
use smallvec::SmallVec;
use tracing::trace;

use super::context::ReactiveContext;
use super::effect::{Computation, DebuggerEvent, EffectCore, Runner};
use super::subscriber::SubscriberId;
use super::value::Key;

/// Identity of a tracked target (a raw value or a ref).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId(u64);

impl TargetId {
    /// Generate a new unique target ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for TargetId {
    fn default() -> Self {
        Self::new()
    }
}

/// Key of a dependency set within one target.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DepKey {
    /// A property of a structured value.
    Key(Key),
    /// The key set of a structured value: its length and its keys.
    Iterate,
    /// The single cell of a ref.
    Value,
}

impl From<Key> for DepKey {
    fn from(key: Key) -> Self {
        DepKey::Key(key)
    }
}

/// Kind of read being tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Get,
    Has,
    Iterate,
}

/// Kind of write being triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerKind {
    /// A key that did not exist was written.
    Add,
    /// An existing key was written with a different value.
    Set,
    /// An existing key was removed.
    Delete,
}

/// The set of computations subscribed to one `(target, key)` pair.
#[derive(Default)]
pub(crate) struct DepSet {
    subscribers: Mutex<IndexMap<SubscriberId, Weak<dyn Computation>>>,
}

pub(crate) type Dep = Arc<DepSet>;

impl DepSet {
    /// Add a subscriber. Returns false if it was already present.
    pub(crate) fn insert(&self, computation: &Arc<dyn Computation>) -> bool {
        let id = computation.core().id();
        let mut subscribers = self.subscribers.lock();
        if subscribers.contains_key(&id) {
            return false;
        }
        subscribers.insert(id, Arc::downgrade(computation));
        true
    }

    pub(crate) fn remove(&self, id: SubscriberId) {
        self.subscribers.lock().shift_remove(&id);
    }

    pub(crate) fn contains(&self, id: SubscriberId) -> bool {
        self.subscribers.lock().contains_key(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.subscribers.lock().len()
    }

    fn snapshot(&self) -> Vec<Weak<dyn Computation>> {
        self.subscribers.lock().values().cloned().collect()
    }
}

type DepsMap = HashMap<DepKey, Dep>;

static GRAPH: OnceLock<DashMap<TargetId, DepsMap>> = OnceLock::new();

fn graph() -> &'static DashMap<TargetId, DepsMap> {
    GRAPH.get_or_init(DashMap::new)
}

/// The global dependency graph.
pub struct Runtime;

impl Runtime {
    /// Record that the running computation read `key` of `target`.
    ///
    /// Reads outside any computation are untracked and do nothing.
    pub fn track(target: TargetId, kind: TrackKind, key: DepKey) {
        let Some(active) = ReactiveContext::current() else {
            return;
        };

        // The shard guard is released at the end of this statement.
        let dep: Dep = graph()
            .entry(target)
            .or_default()
            .entry(key.clone())
            .or_default()
            .clone();

        if dep.insert(&active) {
            let core = active.core();
            core.record(dep);
            trace!(subscriber = ?core.id(), ?target, ?key, ?kind, "track");
            core.notify_track(&DebuggerEvent::Track {
                effect: core.id(),
                target,
                key,
                kind,
            });
        }
    }

    /// Notify the subscribers of `key` on `target` that it changed.
    ///
    /// ADD and DELETE also notify readers of the target's key set.
    pub fn trigger(target: TargetId, kind: TriggerKind, key: &DepKey) {
        let deps: SmallVec<[Dep; 2]> = {
            let Some(deps_map) = graph().get(&target) else {
                return;
            };
            let mut deps = SmallVec::new();
            if let Some(dep) = deps_map.get(key) {
                deps.push(dep.clone());
            }
            if matches!(kind, TriggerKind::Add | TriggerKind::Delete) {
                if let Some(dep) = deps_map.get(&DepKey::Iterate) {
                    deps.push(dep.clone());
                }
            }
            deps
        };

        let mut computed_runners: IndexMap<SubscriberId, Arc<dyn Computation>> = IndexMap::new();
        let mut effects: IndexMap<SubscriberId, Arc<dyn Computation>> = IndexMap::new();
        for dep in &deps {
            for computation in dep.snapshot().iter().filter_map(Weak::upgrade) {
                let id = computation.core().id();
                if computation.core().is_computed() {
                    computed_runners.entry(id).or_insert(computation);
                } else {
                    effects.entry(id).or_insert(computation);
                }
            }
        }

        trace!(
            ?target,
            ?key,
            ?kind,
            computed = computed_runners.len(),
            effects = effects.len(),
            "trigger"
        );

        // An effect that writes a value it reads must not re-enter itself.
        let running = ReactiveContext::current_subscriber();
        for computation in computed_runners.into_values().chain(effects.into_values()) {
            let id = computation.core().id();
            if Some(id) == running {
                continue;
            }
            let event = DebuggerEvent::Trigger {
                effect: id,
                target,
                key: key.clone(),
                kind,
            };
            Self::schedule_run(computation, &event);
        }
    }

    /// Hand a triggered computation to its scheduler, or run it now.
    pub(crate) fn schedule_run(computation: Arc<dyn Computation>, event: &DebuggerEvent) {
        let scheduler = {
            let core = computation.core();
            if !core.is_active() {
                return;
            }
            core.notify_trigger(event);
            core.scheduler()
        };

        match scheduler {
            Some(scheduler) => scheduler.schedule(Runner::new(computation)),
            None => computation.invoke(),
        }
    }

    /// Subscribe the running computation to every dependency set of `inner`.
    ///
    /// Reads performed by a computed's getter are attributed to the computed's
    /// own computation. Chaining makes whoever reads the computed a direct
    /// subscriber of the same sources.
    pub(crate) fn chain(inner: &EffectCore) {
        let Some(outer) = ReactiveContext::current() else {
            return;
        };

        for dep in inner.deps() {
            if dep.insert(&outer) {
                outer.core().record(dep);
            }
        }
    }

    /// Drop every dependency set of a target that no longer exists.
    pub fn forget(target: TargetId) {
        graph().remove(&target);
    }

    /// Whether any read of `target` was ever tracked.
    pub fn is_tracked(target: TargetId) -> bool {
        graph().contains_key(&target)
    }

    /// Number of computations subscribed to `key` of `target`.
    pub fn subscriber_count(target: TargetId, key: &DepKey) -> usize {
        graph()
            .get(&target)
            .and_then(|deps| deps.get(key).map(|dep| dep.len()))
            .unwrap_or(0)
    }

    /// Whether `subscriber` is in the dependency set for `key` of `target`.
    pub fn is_subscribed(target: TargetId, key: &DepKey, subscriber: SubscriberId) -> bool {
        graph()
            .get(&target)
            .and_then(|deps| deps.get(key).map(|dep| dep.contains(subscriber)))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{effect_with, EffectOptions};
    use std::sync::atomic::AtomicI32;

    fn key(name: &str) -> DepKey {
        DepKey::Key(Key::from(name))
    }

    #[test]
    fn untracked_reads_do_nothing() {
        let target = TargetId::new();

        Runtime::track(target, TrackKind::Get, key("a"));

        assert!(!Runtime::is_tracked(target));
    }

    #[test]
    fn trigger_on_untracked_target_is_noop() {
        let target = TargetId::new();
        Runtime::trigger(target, TriggerKind::Set, &key("a"));
        assert!(!Runtime::is_tracked(target));
    }

    #[test]
    fn track_and_trigger_run_subscriber() {
        let target = TargetId::new();
        let runs = Arc::new(AtomicI32::new(0));
        let runs_clone = runs.clone();

        let effect = effect_with(
            move || {
                runs_clone.fetch_add(1, Ordering::SeqCst);
                Runtime::track(target, TrackKind::Get, key("a"));
            },
            EffectOptions::new(),
        );

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(Runtime::is_subscribed(target, &key("a"), effect.id()));

        Runtime::trigger(target, TriggerKind::Set, &key("a"));
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        // A different key has no subscribers.
        Runtime::trigger(target, TriggerKind::Set, &key("b"));
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn duplicate_reads_subscribe_once() {
        let target = TargetId::new();

        let effect = effect_with(
            move || {
                Runtime::track(target, TrackKind::Get, key("a"));
                Runtime::track(target, TrackKind::Get, key("a"));
            },
            EffectOptions::new(),
        );

        assert_eq!(Runtime::subscriber_count(target, &key("a")), 1);
        assert_eq!(effect.dependency_count(), 1);
    }

    #[test]
    fn add_and_delete_notify_iterate_readers() {
        let target = TargetId::new();
        let runs = Arc::new(AtomicI32::new(0));
        let runs_clone = runs.clone();

        let _effect = effect_with(
            move || {
                runs_clone.fetch_add(1, Ordering::SeqCst);
                Runtime::track(target, TrackKind::Iterate, DepKey::Iterate);
            },
            EffectOptions::new(),
        );

        Runtime::trigger(target, TriggerKind::Set, &key("a"));
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        Runtime::trigger(target, TriggerKind::Add, &key("a"));
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        Runtime::trigger(target, TriggerKind::Delete, &key("a"));
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn computed_subscribers_dispatch_first() {
        let target = TargetId::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let plain_order = order.clone();
        let plain = effect_with(
            move || Runtime::track(target, TrackKind::Get, key("a")),
            EffectOptions::new().scheduler(move |_runner: Runner| plain_order.lock().push("plain")),
        );

        let computed_order = order.clone();
        let computed = effect_with(
            move || Runtime::track(target, TrackKind::Get, key("a")),
            EffectOptions::new()
                .computed()
                .scheduler(move |_runner: Runner| computed_order.lock().push("computed")),
        );

        Runtime::trigger(target, TriggerKind::Set, &key("a"));

        assert_eq!(*order.lock(), vec!["computed", "plain"]);
        drop((plain, computed));
    }

    #[test]
    fn forget_drops_target_entries() {
        let target = TargetId::new();
        let _effect = effect_with(
            move || Runtime::track(target, TrackKind::Get, key("a")),
            EffectOptions::new(),
        );
        assert!(Runtime::is_tracked(target));

        Runtime::forget(target);
        assert!(!Runtime::is_tracked(target));
    }
}
