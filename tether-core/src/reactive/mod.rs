//! Reactive Primitives
//!
//! This module implements the reactive engine: views over structured values,
//! refs, computeds and effects. Together they form a fine-grained
//! dependency-tracking system.
//!
//! # Concepts
//!
//! ## Views
//!
//! A view wraps one raw structured value (a record or a list). Reading a key
//! through a view while an effect is running subscribes that effect to the
//! key; writing a key through the view re-runs (or reschedules) exactly the
//! effects that read it. Nested values are wrapped on access, so deep
//! structures become reactive as they are traversed.
//!
//! ## Refs
//!
//! A ref is a single reactive cell. Structured values stored in it are
//! wrapped, so nested reads are tracked by their views.
//!
//! ## Computeds
//!
//! A computed is a cached derived value. It recomputes only when read after
//! one of its sources changed; a source change by itself only marks it dirty.
//!
//! ## Effects
//!
//! An effect is a tracked computation that re-runs when something it read
//! changes. A scheduler can take over the re-runs to defer, batch or drop
//! them.
//!
//! # Implementation Notes
//!
//! The running computation is found through a thread-local stack (see
//! [`ReactiveContext`]); the dependency graph is a process-wide map keyed by
//! target identity (see [`Runtime`]).

mod value;
mod proxy;
mod interceptor;
mod context;
mod subscriber;
mod runtime;
mod effect;
mod refs;
mod computed;

pub use value::{Key, Raw, Value};
pub use proxy::{existing_view, is_reactive, reactive, to_raw, wrap, View};
pub use context::ReactiveContext;
pub use subscriber::SubscriberId;
pub use runtime::{DepKey, Runtime, TargetId, TrackKind, TriggerKind};
pub use effect::{
    effect, effect_with, stop, DebugHook, DebuggerEvent, Effect, EffectOptions, Runner,
    Scheduler, StopHook,
};
pub use refs::{ref_value, Ref};
pub use computed::{computed, computed_writable, Computed};
