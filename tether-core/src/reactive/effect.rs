//! Effect Implementation
//!
//! An Effect is a tracked computation that re-runs whenever a value it read
//! changes.
//!
//! # How Effects Work
//!
//! 1. When created, the effect runs immediately (unless it is lazy) to
//!    establish its initial dependencies.
//!
//! 2. Each run first unsubscribes the effect from every dependency set it
//!    belongs to, then runs the function with the effect on top of the
//!    reactive context stack, re-subscribing to whatever it reads.
//!
//! 3. When a dependency changes, the effect is handed to its scheduler, or
//!    re-run synchronously if it has none.
//!
//! # Lifetime
//!
//! Dependency sets hold effects weakly. An effect lives as long as some
//! [`Effect`] handle does; dropping the last handle unsubscribes it. Calling
//! [`Effect::stop`] unsubscribes it while handles are still alive.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use smallvec::SmallVec;
use tracing::{debug, trace};

use super::context::ReactiveContext;
use super::runtime::{Dep, DepKey, TargetId, TrackKind, TriggerKind};
use super::subscriber::SubscriberId;

/// Decides when a triggered computation actually runs.
///
/// The scheduler receives a [`Runner`] and may run it now, queue it, batch it
/// with others or drop it. Any `Fn(Runner)` closure is a scheduler.
pub trait Scheduler: Send + Sync {
    fn schedule(&self, runner: Runner);
}

impl<F> Scheduler for F
where
    F: Fn(Runner) + Send + Sync,
{
    fn schedule(&self, runner: Runner) {
        self(runner)
    }
}

/// Event passed to the `on_track` and `on_trigger` debugger hooks.
#[derive(Debug, Clone, PartialEq)]
pub enum DebuggerEvent {
    Track {
        effect: SubscriberId,
        target: TargetId,
        key: DepKey,
        kind: TrackKind,
    },
    Trigger {
        effect: SubscriberId,
        target: TargetId,
        key: DepKey,
        kind: TriggerKind,
    },
}

pub type DebugHook = Arc<dyn Fn(&DebuggerEvent) + Send + Sync>;
pub type StopHook = Arc<dyn Fn() + Send + Sync>;

/// Options for creating an effect.
///
/// ```rust,ignore
/// let effect = effect_with(
///     move || render(&state),
///     EffectOptions::new().scheduler(move |runner: Runner| queue.push(runner)),
/// );
/// ```
#[derive(Clone, Default)]
pub struct EffectOptions {
    /// Skip the initial run.
    pub lazy: bool,
    /// Dispatch before plain effects when a dependency triggers.
    pub computed: bool,
    scheduler: Option<Arc<dyn Scheduler>>,
    on_track: Option<DebugHook>,
    on_trigger: Option<DebugHook>,
    on_stop: Option<StopHook>,
}

impl EffectOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lazy(mut self) -> Self {
        self.lazy = true;
        self
    }

    pub fn computed(mut self) -> Self {
        self.computed = true;
        self
    }

    pub fn scheduler(mut self, scheduler: impl Scheduler + 'static) -> Self {
        self.scheduler = Some(Arc::new(scheduler));
        self
    }

    pub fn on_track(mut self, hook: impl Fn(&DebuggerEvent) + Send + Sync + 'static) -> Self {
        self.on_track = Some(Arc::new(hook));
        self
    }

    pub fn on_trigger(mut self, hook: impl Fn(&DebuggerEvent) + Send + Sync + 'static) -> Self {
        self.on_trigger = Some(Arc::new(hook));
        self
    }

    pub fn on_stop(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_stop = Some(Arc::new(hook));
        self
    }
}

impl fmt::Debug for EffectOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectOptions")
            .field("lazy", &self.lazy)
            .field("computed", &self.computed)
            .field("scheduler", &self.scheduler.is_some())
            .field("on_track", &self.on_track.is_some())
            .field("on_trigger", &self.on_trigger.is_some())
            .field("on_stop", &self.on_stop.is_some())
            .finish()
    }
}

/// Type-erased computation stored in dependency sets and the context stack.
pub(crate) trait Computation: Send + Sync {
    fn core(&self) -> &EffectCore;

    /// Run the computation, discarding its result.
    fn invoke(self: Arc<Self>);
}

/// State shared by every kind of computation.
pub(crate) struct EffectCore {
    id: SubscriberId,
    active: AtomicBool,
    computed: bool,
    scheduler: Option<Arc<dyn Scheduler>>,
    on_track: Option<DebugHook>,
    on_trigger: Option<DebugHook>,
    on_stop: Option<StopHook>,
    /// Dependency sets this computation currently belongs to.
    deps: Mutex<SmallVec<[Dep; 4]>>,
}

impl EffectCore {
    fn new(options: &EffectOptions) -> Self {
        Self {
            id: SubscriberId::new(),
            active: AtomicBool::new(true),
            computed: options.computed,
            scheduler: options.scheduler.clone(),
            on_track: options.on_track.clone(),
            on_trigger: options.on_trigger.clone(),
            on_stop: options.on_stop.clone(),
            deps: Mutex::new(SmallVec::new()),
        }
    }

    pub(crate) fn id(&self) -> SubscriberId {
        self.id
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub(crate) fn is_computed(&self) -> bool {
        self.computed
    }

    pub(crate) fn scheduler(&self) -> Option<Arc<dyn Scheduler>> {
        self.scheduler.clone()
    }

    pub(crate) fn record(&self, dep: Dep) {
        self.deps.lock().push(dep);
    }

    pub(crate) fn deps(&self) -> SmallVec<[Dep; 4]> {
        self.deps.lock().clone()
    }

    pub(crate) fn dependency_count(&self) -> usize {
        self.deps.lock().len()
    }

    /// Leave every dependency set this computation belongs to.
    pub(crate) fn cleanup(&self) {
        let deps = std::mem::take(&mut *self.deps.lock());
        for dep in &deps {
            dep.remove(self.id);
        }
    }

    pub(crate) fn notify_track(&self, event: &DebuggerEvent) {
        if let Some(hook) = &self.on_track {
            hook(event);
        }
    }

    pub(crate) fn notify_trigger(&self, event: &DebuggerEvent) {
        if let Some(hook) = &self.on_trigger {
            hook(event);
        }
    }

    fn stop(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        self.cleanup();
        debug!(subscriber = ?self.id, "effect stopped");
        if let Some(hook) = &self.on_stop {
            hook();
        }
    }
}

impl Drop for EffectCore {
    fn drop(&mut self) {
        self.cleanup();
    }
}

struct EffectInner<R> {
    core: EffectCore,
    func: Box<dyn Fn() -> R + Send + Sync>,
}

impl<R: 'static> Computation for EffectInner<R> {
    fn core(&self) -> &EffectCore {
        &self.core
    }

    fn invoke(self: Arc<Self>) {
        run_effect(&self);
    }
}

fn run_effect<R: 'static>(inner: &Arc<EffectInner<R>>) -> Option<R> {
    if !inner.core.is_active() {
        trace!(subscriber = ?inner.core.id(), "skipping stopped effect");
        return None;
    }

    Some(execute(inner))
}

/// Re-track and run the function, whether or not the effect is active.
fn execute<R: 'static>(inner: &Arc<EffectInner<R>>) -> R {
    inner.core.cleanup();

    let computation: Arc<dyn Computation> = inner.clone();
    let _ctx = ReactiveContext::enter(computation);
    (inner.func)()
}

/// A tracked computation that re-runs when its dependencies change.
///
/// `R` is the return type of the function; [`Effect::run`] hands it back.
///
/// Keep the handle for as long as the effect should react. Dependency sets
/// only hold effects weakly, so `let _ = effect(..)` runs the function once
/// and then unsubscribes it.
///
/// # Example
///
/// ```rust,ignore
/// let state = wrap(json!({"count": 0}).into());
/// let view = state.as_view().unwrap().clone();
///
/// let printer = view.clone();
/// let _effect = effect(move || println!("count: {:?}", printer.get("count")));
///
/// view.set("count", 5)?; // prints "count: Number(5)"
/// ```
#[must_use = "dropping the last handle unsubscribes the effect"]
pub struct Effect<R = ()> {
    inner: Arc<EffectInner<R>>,
}

impl<R: 'static> Effect<R> {
    /// Create an effect and run it immediately.
    pub fn new<F>(func: F) -> Self
    where
        F: Fn() -> R + Send + Sync + 'static,
    {
        Self::with_options(func, EffectOptions::default())
    }

    /// Create an effect with options. Runs immediately unless `lazy` is set.
    pub fn with_options<F>(func: F, options: EffectOptions) -> Self
    where
        F: Fn() -> R + Send + Sync + 'static,
    {
        let effect = Self {
            inner: Arc::new(EffectInner {
                core: EffectCore::new(&options),
                func: Box::new(func),
            }),
        };
        debug!(subscriber = ?effect.id(), ?options, "effect created");

        if !options.lazy {
            effect.run();
        }

        effect
    }

    /// Run the effect now, tracking what it reads.
    ///
    /// Returns `None` without running anything if the effect was stopped.
    pub fn run(&self) -> Option<R> {
        run_effect(&self.inner)
    }

    /// Unsubscribe the effect from all dependencies and fire `on_stop`.
    ///
    /// Stopping is idempotent; later triggers and runs are no-ops.
    pub fn stop(&self) {
        self.inner.core.stop();
    }

    pub fn id(&self) -> SubscriberId {
        self.inner.core.id()
    }

    pub fn is_active(&self) -> bool {
        self.inner.core.is_active()
    }

    /// Number of dependency sets the effect currently belongs to.
    pub fn dependency_count(&self) -> usize {
        self.inner.core.dependency_count()
    }

    /// Type-erased handle that runs this effect.
    pub fn runner(&self) -> Runner {
        Runner::new(self.computation())
    }

    /// Run the function even if the effect was stopped.
    pub(crate) fn execute(&self) -> R {
        execute(&self.inner)
    }

    pub(crate) fn core(&self) -> &EffectCore {
        &self.inner.core
    }

    pub(crate) fn computation(&self) -> Arc<dyn Computation> {
        self.inner.clone()
    }
}

impl<R> Clone for Effect<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R> fmt::Debug for Effect<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.inner.core.id())
            .field("active", &self.inner.core.is_active())
            .field("computed", &self.inner.core.is_computed())
            .field("dependency_count", &self.inner.core.dependency_count())
            .finish()
    }
}

/// Handle given to a [`Scheduler`]; runs the triggered computation.
#[derive(Clone)]
pub struct Runner {
    computation: Arc<dyn Computation>,
}

impl Runner {
    pub(crate) fn new(computation: Arc<dyn Computation>) -> Self {
        Self { computation }
    }

    /// Run the computation. A stopped computation does nothing.
    pub fn run(&self) {
        Arc::clone(&self.computation).invoke();
    }

    pub fn id(&self) -> SubscriberId {
        self.computation.core().id()
    }

    pub fn is_active(&self) -> bool {
        self.computation.core().is_active()
    }

    pub fn is_computed(&self) -> bool {
        self.computation.core().is_computed()
    }
}

impl fmt::Debug for Runner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runner")
            .field("id", &self.id())
            .field("active", &self.is_active())
            .finish()
    }
}

/// Create an effect and run it immediately.
///
/// The returned handle must be kept alive; dropping it unsubscribes the effect.
pub fn effect<R, F>(func: F) -> Effect<R>
where
    R: 'static,
    F: Fn() -> R + Send + Sync + 'static,
{
    Effect::new(func)
}

/// Create an effect with options.
pub fn effect_with<R, F>(func: F, options: EffectOptions) -> Effect<R>
where
    R: 'static,
    F: Fn() -> R + Send + Sync + 'static,
{
    Effect::with_options(func, options)
}

/// Stop an effect. See [`Effect::stop`].
pub fn stop<R: 'static>(effect: &Effect<R>) {
    effect.stop();
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::Runtime;
    use std::sync::atomic::AtomicI32;

    fn key(name: &str) -> DepKey {
        DepKey::Key(name.into())
    }

    #[test]
    fn effect_runs_on_creation() {
        let run_count = Arc::new(AtomicI32::new(0));
        let run_count_clone = run_count.clone();

        let _effect = effect(move || {
            run_count_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(run_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn lazy_effect_does_not_run_on_creation() {
        let run_count = Arc::new(AtomicI32::new(0));
        let run_count_clone = run_count.clone();

        let effect = effect_with(
            move || run_count_clone.fetch_add(1, Ordering::SeqCst) + 1,
            EffectOptions::new().lazy(),
        );

        assert_eq!(run_count.load(Ordering::SeqCst), 0);

        // The return value propagates out of run.
        assert_eq!(effect.run(), Some(1));
        assert_eq!(run_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stopped_effect_does_not_run() {
        let run_count = Arc::new(AtomicI32::new(0));
        let run_count_clone = run_count.clone();
        let target = TargetId::new();

        let effect = effect(move || {
            run_count_clone.fetch_add(1, Ordering::SeqCst);
            Runtime::track(target, TrackKind::Get, key("a"));
        });
        assert_eq!(effect.dependency_count(), 1);

        effect.stop();
        assert!(!effect.is_active());
        assert_eq!(effect.dependency_count(), 0);
        assert!(!Runtime::is_subscribed(target, &key("a"), effect.id()));

        Runtime::trigger(target, TriggerKind::Set, &key("a"));
        assert_eq!(effect.run(), None);
        effect.runner().run();

        assert_eq!(run_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stop_fires_hook_once() {
        let stops = Arc::new(AtomicI32::new(0));
        let stops_clone = stops.clone();

        let effect = effect_with(
            || (),
            EffectOptions::new().on_stop(move || {
                stops_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );

        stop(&effect);
        stop(&effect);

        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn scheduler_receives_runner_instead_of_running() {
        let run_count = Arc::new(AtomicI32::new(0));
        let run_count_clone = run_count.clone();
        let queue = Arc::new(Mutex::new(Vec::<Runner>::new()));
        let queue_clone = queue.clone();
        let target = TargetId::new();

        let effect = effect_with(
            move || {
                run_count_clone.fetch_add(1, Ordering::SeqCst);
                Runtime::track(target, TrackKind::Get, key("a"));
            },
            EffectOptions::new().scheduler(move |runner: Runner| queue_clone.lock().push(runner)),
        );
        assert_eq!(run_count.load(Ordering::SeqCst), 1);

        Runtime::trigger(target, TriggerKind::Set, &key("a"));
        assert_eq!(run_count.load(Ordering::SeqCst), 1);

        let pending: Vec<Runner> = std::mem::take(&mut *queue.lock());
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id(), effect.id());

        pending[0].run();
        assert_eq!(run_count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn hooks_observe_track_and_trigger() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let tracked = events.clone();
        let triggered = events.clone();
        let target = TargetId::new();

        let effect = effect_with(
            move || Runtime::track(target, TrackKind::Get, key("a")),
            EffectOptions::new()
                .on_track(move |event| tracked.lock().push(event.clone()))
                .on_trigger(move |event| triggered.lock().push(event.clone())),
        );

        Runtime::trigger(target, TriggerKind::Set, &key("a"));

        let events = events.lock();
        assert_eq!(
            events[0],
            DebuggerEvent::Track {
                effect: effect.id(),
                target,
                key: key("a"),
                kind: TrackKind::Get,
            }
        );
        assert_eq!(
            events[1],
            DebuggerEvent::Trigger {
                effect: effect.id(),
                target,
                key: key("a"),
                kind: TriggerKind::Set,
            }
        );
        // Re-running after the trigger tracked the key again.
        assert_eq!(events.len(), 3);
    }

    #[test]
    fn rerun_drops_stale_dependencies() {
        let target = TargetId::new();
        let branch = Arc::new(AtomicBool::new(true));
        let branch_clone = branch.clone();

        let effect = effect(move || {
            if branch_clone.load(Ordering::SeqCst) {
                Runtime::track(target, TrackKind::Get, key("a"));
            } else {
                Runtime::track(target, TrackKind::Get, key("b"));
            }
        });
        assert!(Runtime::is_subscribed(target, &key("a"), effect.id()));

        branch.store(false, Ordering::SeqCst);
        effect.run();

        assert!(!Runtime::is_subscribed(target, &key("a"), effect.id()));
        assert!(Runtime::is_subscribed(target, &key("b"), effect.id()));
    }

    #[test]
    fn dropping_last_handle_unsubscribes() {
        let target = TargetId::new();
        let effect = effect(move || Runtime::track(target, TrackKind::Get, key("a")));
        assert_eq!(Runtime::subscriber_count(target, &key("a")), 1);

        drop(effect);
        assert_eq!(Runtime::subscriber_count(target, &key("a")), 0);
    }

    #[test]
    fn discarded_handle_stops_reacting() {
        let run_count = Arc::new(AtomicI32::new(0));
        let run_count_clone = run_count.clone();
        let target = TargetId::new();

        let _ = effect(move || {
            run_count_clone.fetch_add(1, Ordering::SeqCst);
            Runtime::track(target, TrackKind::Get, key("a"));
        });
        Runtime::trigger(target, TriggerKind::Set, &key("a"));

        assert_eq!(run_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_effect_keeps_stack_balanced() {
        let effect: Effect<()> =
            effect_with(|| panic!("effect body failed"), EffectOptions::new().lazy());
        let depth = ReactiveContext::depth();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| effect.run()));

        assert!(result.is_err());
        assert_eq!(ReactiveContext::depth(), depth);
    }
}
