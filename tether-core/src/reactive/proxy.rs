//! Views
//!
//! A [`View`] is the intercepting wrapper through which tracked access to a
//! raw value happens. Reads through a view record dependencies; writes
//! through a view notify them (see the interceptor module for the access
//! semantics).
//!
//! # Identity
//!
//! There is at most one live view per raw value. The raw-to-view direction is
//! a process-wide side table keyed by the raw's [`TargetId`] that holds views
//! weakly, so the table never keeps a view alive; an entry is removed when its
//! view is dropped. The view-to-raw direction is the view itself: a view owns
//! a strong handle to its raw.
//!
//! Rust has no transparent property interception, so views expose explicit
//! accessors (`get`, `set`, `delete`, ...) instead of field syntax.

use std::fmt;
use std::sync::{Arc, OnceLock, Weak};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

use super::runtime::TargetId;
use super::value::{Raw, Value};

static VIEWS: OnceLock<DashMap<TargetId, Weak<ViewInner>>> = OnceLock::new();

fn views() -> &'static DashMap<TargetId, Weak<ViewInner>> {
    VIEWS.get_or_init(DashMap::new)
}

/// Reactive view over one raw value.
///
/// Clones share the same view; two views are equal only if they are the
/// same view.
#[derive(Clone)]
pub struct View {
    inner: Arc<ViewInner>,
}

struct ViewInner {
    raw: Raw,
}

impl Drop for ViewInner {
    fn drop(&mut self) {
        let this: *const ViewInner = self;
        views().remove_if(&self.raw.id(), |_, weak| std::ptr::eq(weak.as_ptr(), this));
    }
}

impl View {
    fn create(raw: &Raw) -> Self {
        debug!(target_id = ?raw.id(), "view created");
        Self {
            inner: Arc::new(ViewInner { raw: raw.clone() }),
        }
    }

    /// The raw value behind this view.
    pub fn raw(&self) -> &Raw {
        &self.inner.raw
    }

    /// Identity of the raw value behind this view.
    pub fn id(&self) -> TargetId {
        self.inner.raw.id()
    }

    /// Whether both handles are the same view.
    pub fn ptr_eq(&self, other: &View) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl PartialEq for View {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for View {}

impl fmt::Debug for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("View").field("raw", self.raw()).finish()
    }
}

/// Get the view of `raw`, creating it on first use.
///
/// Repeated calls return the same view for as long as any handle to it is
/// alive.
pub fn reactive(raw: &Raw) -> View {
    match views().entry(raw.id()) {
        Entry::Occupied(mut entry) => {
            if let Some(inner) = entry.get().upgrade() {
                return View { inner };
            }
            let view = View::create(raw);
            entry.insert(Arc::downgrade(&view.inner));
            view
        }
        Entry::Vacant(entry) => {
            let view = View::create(raw);
            entry.insert(Arc::downgrade(&view.inner));
            view
        }
    }
}

/// Wrap a value for tracked access.
///
/// Raw objects become their view, views pass through unchanged and
/// non-structured values are returned as they are.
pub fn wrap(value: Value) -> Value {
    match value {
        Value::Object(raw) => Value::View(reactive(&raw)),
        other => other,
    }
}

/// The raw value behind a view.
pub fn to_raw(view: &View) -> Raw {
    view.raw().clone()
}

/// Whether `value` is a view.
pub fn is_reactive(value: &Value) -> bool {
    matches!(value, Value::View(_))
}

/// The live view of `raw`, if one exists. Never creates a view.
pub fn existing_view(raw: &Raw) -> Option<View> {
    views()
        .get(&raw.id())
        .and_then(|weak| weak.upgrade())
        .map(|inner| View { inner })
}
