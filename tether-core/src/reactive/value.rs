//! Value Model
//!
//! Raw values are the plain structured data that callers hand to the engine.
//! A [`Raw`] is a shared, mutable record or list with a stable identity; a
//! [`Value`] is anything that can be stored in one of its slots.
//!
//! # Identity
//!
//! Every raw value is assigned a [`TargetId`] when it is created. The id is
//! what the dependency graph and the view identity map are keyed by, so two
//! clones of the same `Raw` always share dependencies and views.
//!
//! # Normalization
//!
//! Raw slots never hold views. Storing a [`Value::View`] stores the view's raw
//! instead, so a raw value can always be read without going through the
//! interception layer.

use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::ser::{Error as _, Serialize, SerializeMap, SerializeSeq, Serializer};
use smallvec::SmallVec;

use super::proxy::View;
use super::runtime::{Runtime, TargetId};
use crate::error::{ReactiveError, Result};

/// Property key of a structured value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    /// Named field of a record.
    Field(Arc<str>),
    /// Position in a list (records may use numeric keys too).
    Index(usize),
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Field(name) => write!(f, "{:?}", name),
            Key::Index(index) => write!(f, "[{}]", index),
        }
    }
}

impl From<&str> for Key {
    fn from(name: &str) -> Self {
        Key::Field(Arc::from(name))
    }
}

impl From<String> for Key {
    fn from(name: String) -> Self {
        Key::Field(Arc::from(name))
    }
}

impl From<usize> for Key {
    fn from(index: usize) -> Self {
        Key::Index(index)
    }
}

impl Serialize for Key {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Key::Field(name) => serializer.serialize_str(name),
            Key::Index(index) => serializer.serialize_u64(*index as u64),
        }
    }
}

/// A value that can be stored in a structured value or a ref.
///
/// Structured data appears either as [`Value::Object`] (a raw, untracked
/// value) or as [`Value::View`] (its intercepted view). Reads through a view
/// always hand back nested structures as views.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    Object(Raw),
    View(View),
}

impl Value {
    /// Compare two values with same-value semantics.
    ///
    /// `NaN` equals `NaN`, `0.0` and `-0.0` differ, and structured values are
    /// equal when they share the same raw value (a view equals its raw).
    pub fn same_value(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => same_number(*a, *b),
            (Value::Text(a), Value::Text(b)) => a == b,
            _ => match (self.target_id(), other.target_id()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }

    /// Identity of the raw value behind an object or view.
    pub fn target_id(&self) -> Option<TargetId> {
        match self {
            Value::Object(raw) => Some(raw.id()),
            Value::View(view) => Some(view.id()),
            _ => None,
        }
    }

    /// Whether this is an object or a view.
    pub fn is_structured(&self) -> bool {
        matches!(self, Value::Object(_) | Value::View(_))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_view(&self) -> Option<&View> {
        match self {
            Value::View(view) => Some(view),
            _ => None,
        }
    }

    /// The raw value behind an object or a view.
    pub fn as_raw(&self) -> Option<&Raw> {
        match self {
            Value::Object(raw) => Some(raw),
            Value::View(view) => Some(view.raw()),
            _ => None,
        }
    }

    /// Replace a view with its raw value. Used before storing into a slot.
    pub(crate) fn into_stored(self) -> Value {
        match self {
            Value::View(view) => Value::Object(view.raw().clone()),
            other => other,
        }
    }

    /// Snapshot this value as JSON.
    pub fn to_json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}

fn same_number(a: f64, b: f64) -> bool {
    if a.is_nan() && b.is_nan() {
        return true;
    }
    a == b && a.is_sign_negative() == b.is_sign_negative()
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.same_value(other)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("Null"),
            Value::Bool(value) => write!(f, "Bool({})", value),
            Value::Number(value) => write!(f, "Number({})", value),
            Value::Text(value) => write!(f, "Text({:?})", value),
            Value::Object(raw) => write!(f, "Object({:?})", raw.id()),
            Value::View(view) => write!(f, "View({:?})", view.id()),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Number(f64::from(value))
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Number(value as f64)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<Raw> for Value {
    fn from(raw: Raw) -> Self {
        Value::Object(raw)
    }
}

impl From<View> for Value {
    fn from(view: View) -> Self {
        Value::View(view)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(value) => Value::Bool(value),
            serde_json::Value::Number(number) => Value::Number(number.as_f64().unwrap_or_default()),
            serde_json::Value::String(text) => Value::Text(text),
            serde_json::Value::Array(items) => {
                Value::Object(Raw::from_items(items.into_iter().map(Value::from)))
            }
            serde_json::Value::Object(fields) => Value::Object(Raw::from_entries(
                fields.into_iter().map(|(name, value)| (Key::from(name), Value::from(value))),
            )),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(value) => serializer.serialize_bool(*value),
            Value::Number(value) => serializer.serialize_f64(*value),
            Value::Text(value) => serializer.serialize_str(value),
            Value::Object(raw) => raw.serialize(serializer),
            Value::View(view) => view.raw().serialize(serializer),
        }
    }
}

// ----------------------------------------------------------------------------
// Raw values
// ----------------------------------------------------------------------------

/// Storage of a raw value.
pub(crate) enum Slots {
    Record(IndexMap<Key, Value>),
    List(Vec<Value>),
}

impl Slots {
    pub(crate) fn get(&self, key: &Key) -> Option<&Value> {
        match (self, key) {
            (Slots::Record(fields), key) => fields.get(key),
            (Slots::List(items), Key::Index(index)) => items.get(*index),
            (Slots::List(_), Key::Field(_)) => None,
        }
    }

    pub(crate) fn contains(&self, key: &Key) -> bool {
        self.get(key).is_some()
    }

    pub(crate) fn len(&self) -> usize {
        match self {
            Slots::Record(fields) => fields.len(),
            Slots::List(items) => items.len(),
        }
    }

    pub(crate) fn keys(&self) -> Vec<Key> {
        match self {
            Slots::Record(fields) => fields.keys().cloned().collect(),
            Slots::List(items) => (0..items.len()).map(Key::Index).collect(),
        }
    }

    /// Store `value` under `key`, returning the previous value if the key
    /// existed.
    pub(crate) fn insert(&mut self, key: Key, value: Value) -> Result<Option<Value>> {
        match self {
            Slots::Record(fields) => Ok(fields.insert(key, value)),
            Slots::List(items) => {
                let index = match key {
                    Key::Index(index) => index,
                    key @ Key::Field(_) => return Err(ReactiveError::KeyMismatch { key }),
                };
                match index.cmp(&items.len()) {
                    std::cmp::Ordering::Less => Ok(Some(std::mem::replace(&mut items[index], value))),
                    std::cmp::Ordering::Equal => {
                        items.push(value);
                        Ok(None)
                    }
                    std::cmp::Ordering::Greater => Err(ReactiveError::IndexOutOfBounds {
                        index,
                        len: items.len(),
                    }),
                }
            }
        }
    }

    pub(crate) fn remove(&mut self, key: &Key) -> Result<Option<Value>> {
        match self {
            Slots::Record(fields) => Ok(fields.shift_remove(key)),
            Slots::List(_) => Err(ReactiveError::Unsupported("keyed delete on a list, use pop")),
        }
    }

    /// Append to a list, returning the index of the new element.
    pub(crate) fn push(&mut self, value: Value) -> Result<usize> {
        match self {
            Slots::List(items) => {
                items.push(value);
                Ok(items.len() - 1)
            }
            Slots::Record(_) => Err(ReactiveError::Unsupported("push on a record")),
        }
    }

    /// Remove the last element of a list, returning it with its index.
    pub(crate) fn pop(&mut self) -> Result<Option<(usize, Value)>> {
        match self {
            Slots::List(items) => Ok(items.pop().map(|value| (items.len(), value))),
            Slots::Record(_) => Err(ReactiveError::Unsupported("pop on a record")),
        }
    }
}

/// A raw structured value: a record or a list with a stable identity.
///
/// Cloning a `Raw` clones the handle, not the data. Mutating a `Raw` directly
/// bypasses tracking; mutate through its [`View`] to notify dependents.
#[derive(Clone)]
pub struct Raw {
    inner: Arc<RawInner>,
}

struct RawInner {
    id: TargetId,
    slots: RwLock<Slots>,
}

impl Drop for RawInner {
    fn drop(&mut self) {
        Runtime::forget(self.id);
    }
}

impl Raw {
    fn with_slots(slots: Slots) -> Self {
        Self {
            inner: Arc::new(RawInner {
                id: TargetId::new(),
                slots: RwLock::new(slots),
            }),
        }
    }

    /// Create an empty record.
    pub fn record() -> Self {
        Self::with_slots(Slots::Record(IndexMap::new()))
    }

    /// Create an empty list.
    pub fn list() -> Self {
        Self::with_slots(Slots::List(Vec::new()))
    }

    /// Create a record from key/value pairs.
    pub fn from_entries<K, V, I>(entries: I) -> Self
    where
        K: Into<Key>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        let fields = entries
            .into_iter()
            .map(|(key, value)| (key.into(), value.into().into_stored()))
            .collect();
        Self::with_slots(Slots::Record(fields))
    }

    /// Create a list from items.
    pub fn from_items<V, I>(items: I) -> Self
    where
        V: Into<Value>,
        I: IntoIterator<Item = V>,
    {
        let items = items.into_iter().map(|item| item.into().into_stored()).collect();
        Self::with_slots(Slots::List(items))
    }

    /// Stable identity of this raw value.
    pub fn id(&self) -> TargetId {
        self.inner.id
    }

    pub fn is_list(&self) -> bool {
        matches!(*self.read(), Slots::List(_))
    }

    /// Whether both handles refer to the same raw value.
    pub fn ptr_eq(&self, other: &Raw) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Read a slot without tracking.
    pub fn get(&self, key: impl Into<Key>) -> Option<Value> {
        self.read().get(&key.into()).cloned()
    }

    /// Write a slot without notifying dependents.
    pub fn insert(&self, key: impl Into<Key>, value: impl Into<Value>) -> Result<Option<Value>> {
        let previous = self.write().insert(key.into(), value.into().into_stored())?;
        Ok(previous)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> Vec<Key> {
        self.read().keys()
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, Slots> {
        self.inner.slots.read()
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, Slots> {
        self.inner.slots.write()
    }
}

impl fmt::Debug for Raw {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Raw")
            .field("id", &self.id())
            .field("list", &self.is_list())
            .field("len", &self.len())
            .finish()
    }
}

thread_local! {
    /// Raw values currently being serialized on this thread, outermost first.
    static SERIALIZING: RefCell<SmallVec<[TargetId; 8]>> = RefCell::new(SmallVec::new());
}

/// Marks a raw value as being serialized until dropped.
struct SerializeGuard {
    id: TargetId,
}

impl SerializeGuard {
    /// Returns `None` if `id` is already being serialized further up.
    fn enter(id: TargetId) -> Option<Self> {
        SERIALIZING.with(|stack| {
            let mut stack = stack.borrow_mut();
            if stack.contains(&id) {
                return None;
            }
            stack.push(id);
            Some(Self { id })
        })
    }
}

impl Drop for SerializeGuard {
    fn drop(&mut self) {
        SERIALIZING.with(|stack| {
            let popped = stack.borrow_mut().pop();
            debug_assert_eq!(popped, Some(self.id));
        });
    }
}

impl Serialize for Raw {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let Some(_guard) = SerializeGuard::enter(self.id()) else {
            return Err(S::Error::custom("cyclic value"));
        };

        match &*self.read() {
            Slots::Record(fields) => {
                let mut map = serializer.serialize_map(Some(fields.len()))?;
                for (key, value) in fields {
                    map.serialize_entry(key, value)?;
                }
                map.end()
            }
            Slots::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
