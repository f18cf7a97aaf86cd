//! Tether Core
//!
//! This crate provides a fine-grained reactive dependency-tracking engine for
//! structured values. It implements:
//!
//! - Identity-preserving reactive views over records and lists
//! - Automatic dependency tracking per `(object, key)`
//! - Effects with pluggable schedulers and debugger hooks
//! - Refs (single reactive cells) and lazily recomputed computeds
//!
//! Rendering, batching and persistence are left to the caller: wrap the
//! render or update function in an effect and give it a scheduler.
//!
//! # Architecture
//!
//! - `reactive`: views, the dependency graph, effects, refs and computeds
//! - `error`: the crate error type
//!
//! # Example
//!
//! ```rust,ignore
//! use serde_json::json;
//! use tether_core::reactive::{computed, effect, wrap, Value};
//!
//! let state = wrap(Value::from(json!({"count": 1})));
//! let view = state.as_view().unwrap().clone();
//!
//! // A derived value
//! let source = view.clone();
//! let plus_two = computed(move || source.get("count").as_f64().unwrap_or_default() + 2.0);
//!
//! // An effect that only reads the derived value
//! let reader = plus_two.clone();
//! let _effect = effect(move || println!("plus two: {}", reader.get()));
//!
//! // Prints "plus two: 7"
//! view.set("count", 5)?;
//! ```

pub mod error;
pub mod reactive;

pub use error::{ReactiveError, Result};
