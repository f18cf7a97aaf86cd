//! Access Interception
//!
//! Tracked reads and triggering writes on a [`View`].
//!
//! # Reads
//!
//! A read fetches the slot from the raw value, records the dependency and, if
//! the slot holds a structured value, wraps it. Nested structures are therefore
//! turned into views lazily as they are traversed, never eagerly.
//!
//! # Writes
//!
//! A write is classified before anyone is notified:
//!
//! - the key did not exist: [`TriggerKind::Add`]
//! - the key existed and the value changed (same-value comparison):
//!   [`TriggerKind::Set`]
//! - the key existed and the value is the same: nothing is notified
//!
//! Deleting an existing key notifies with [`TriggerKind::Delete`]; deleting a
//! missing key is silent. ADD and DELETE also notify readers of the key set
//! (`len`, `keys`).

use super::proxy::{wrap, View};
use super::runtime::{DepKey, Runtime, TrackKind, TriggerKind};
use super::value::{Key, Value};
use crate::error::Result;

impl View {
    /// Read `key`, tracking the dependency. Missing keys read as `Null`.
    pub fn get(&self, key: impl Into<Key>) -> Value {
        let key = key.into();
        let value = self.raw().read().get(&key).cloned().unwrap_or_default();
        Runtime::track(self.id(), TrackKind::Get, DepKey::Key(key));
        wrap(value)
    }

    /// Whether `key` exists, tracking the dependency.
    pub fn has(&self, key: impl Into<Key>) -> bool {
        let key = key.into();
        let present = self.raw().read().contains(&key);
        Runtime::track(self.id(), TrackKind::Has, DepKey::Key(key));
        present
    }

    /// Number of fields or elements, tracking the key set.
    pub fn len(&self) -> usize {
        let len = self.raw().read().len();
        Runtime::track(self.id(), TrackKind::Iterate, DepKey::Iterate);
        len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys in order, tracking the key set.
    pub fn keys(&self) -> Vec<Key> {
        let keys = self.raw().read().keys();
        Runtime::track(self.id(), TrackKind::Iterate, DepKey::Iterate);
        keys
    }

    /// Write `value` under `key` and notify dependents if the write changed
    /// anything.
    ///
    /// Returns how the write was classified, or `None` if the value was
    /// unchanged and nobody was notified.
    pub fn set(&self, key: impl Into<Key>, value: impl Into<Value>) -> Result<Option<TriggerKind>> {
        let key = key.into();
        let value = value.into().into_stored();

        let old_value = self.raw().write().insert(key.clone(), value.clone())?;
        let kind = match old_value {
            None => Some(TriggerKind::Add),
            Some(old_value) if !old_value.same_value(&value) => Some(TriggerKind::Set),
            Some(_) => None,
        };

        if let Some(kind) = kind {
            Runtime::trigger(self.id(), kind, &DepKey::Key(key));
        }
        Ok(kind)
    }

    /// Remove `key`. Returns whether it existed.
    pub fn delete(&self, key: impl Into<Key>) -> Result<bool> {
        let key = key.into();
        let removed = self.raw().write().remove(&key)?;
        if removed.is_none() {
            return Ok(false);
        }

        Runtime::trigger(self.id(), TriggerKind::Delete, &DepKey::Key(key));
        Ok(true)
    }

    /// Append to a list. Classified as an ADD of the new index.
    pub fn push(&self, value: impl Into<Value>) -> Result<usize> {
        let index = self.raw().write().push(value.into().into_stored())?;
        Runtime::trigger(self.id(), TriggerKind::Add, &DepKey::Key(Key::Index(index)));
        Ok(index)
    }

    /// Remove the last element of a list. Classified as a DELETE of its index.
    pub fn pop(&self) -> Result<Option<Value>> {
        let popped = self.raw().write().pop()?;
        let Some((index, value)) = popped else {
            return Ok(None);
        };

        Runtime::trigger(self.id(), TriggerKind::Delete, &DepKey::Key(Key::Index(index)));
        Ok(Some(wrap(value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReactiveError;
    use crate::reactive::{effect, reactive, Raw};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Arc;

    fn counter() -> (Arc<AtomicI32>, Arc<AtomicI32>) {
        let count = Arc::new(AtomicI32::new(0));
        (count.clone(), count)
    }

    #[test]
    fn nested_reads_return_stable_views() {
        let raw = Raw::from_entries([("a", Raw::from_entries([("b", 1)]))]);
        let view = reactive(&raw);

        let first = view.get("a");
        let second = view.get("a");

        let first = first.as_view().unwrap();
        assert!(first.ptr_eq(second.as_view().unwrap()));
        assert_eq!(first.get("b"), Value::from(1));
    }

    #[test]
    fn write_classification() {
        let view = reactive(&Raw::from_entries([("a", 1)]));

        assert_eq!(view.set("a", 1).unwrap(), None);
        assert_eq!(view.set("a", 2).unwrap(), Some(TriggerKind::Set));
        assert_eq!(view.set("b", 1).unwrap(), Some(TriggerKind::Add));
        assert_eq!(view.set("c", f64::NAN).unwrap(), Some(TriggerKind::Add));
        assert_eq!(view.set("c", f64::NAN).unwrap(), None);
        assert_eq!(view.set("a", 0.0).unwrap(), Some(TriggerKind::Set));
        assert_eq!(view.set("a", -0.0).unwrap(), Some(TriggerKind::Set));
    }

    #[test]
    fn same_value_write_does_not_notify() {
        let view = reactive(&Raw::from_entries([("k", 1)]));
        let log = Arc::new(Mutex::new(Vec::new()));
        let log_clone = log.clone();
        let reader = view.clone();

        let _effect = effect(move || log_clone.lock().push(reader.get("k")));

        view.set("k", 2).unwrap();
        view.set("k", 2).unwrap();

        assert_eq!(*log.lock(), vec![Value::from(1), Value::from(2)]);
    }

    #[test]
    fn add_notifies_readers_of_missing_key() {
        let view = reactive(&Raw::record());
        let (runs, runs_clone) = counter();
        let reader = view.clone();

        let _effect = effect(move || {
            runs_clone.fetch_add(1, Ordering::SeqCst);
            reader.get("k");
        });

        view.set("k", 1).unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn storing_a_view_stores_its_raw() {
        let parent = reactive(&Raw::record());
        let child = reactive(&Raw::record());

        parent.set("child", child.clone()).unwrap();

        assert!(matches!(parent.raw().get("child"), Some(Value::Object(raw)) if raw.ptr_eq(child.raw())));
        assert!(parent.get("child").as_view().unwrap().ptr_eq(&child));
        // Assigning the same structure again is not a change.
        assert_eq!(parent.set("child", child.raw().clone()).unwrap(), None);
    }

    #[test]
    fn delete_notifies_key_and_key_set_readers() {
        let view = reactive(&Raw::from_entries([("a", 1), ("b", 2)]));
        let (key_runs, key_clone) = counter();
        let (len_runs, len_clone) = counter();

        let key_reader = view.clone();
        let _key_effect = effect(move || {
            key_clone.fetch_add(1, Ordering::SeqCst);
            key_reader.has("a");
        });
        let len_reader = view.clone();
        let _len_effect = effect(move || {
            len_clone.fetch_add(1, Ordering::SeqCst);
            len_reader.len();
        });

        assert!(view.delete("a").unwrap());
        assert!(!view.delete("a").unwrap());

        assert_eq!(key_runs.load(Ordering::SeqCst), 2);
        assert_eq!(len_runs.load(Ordering::SeqCst), 2);
        assert_eq!(view.keys(), vec![Key::from("b")]);
    }

    #[test]
    fn list_push_and_pop_notify_length_readers() {
        let view = reactive(&Raw::from_items([1, 2]));
        let observed = Arc::new(Mutex::new(Vec::new()));
        let observed_clone = observed.clone();
        let reader = view.clone();

        let _effect = effect(move || observed_clone.lock().push(reader.len()));

        assert_eq!(view.push(3).unwrap(), 2);
        assert_eq!(view.pop().unwrap(), Some(Value::from(3)));
        // Overwriting an element does not change the length.
        view.set(0usize, 10).unwrap();

        assert_eq!(*observed.lock(), vec![2, 3, 2]);
    }

    #[test]
    fn list_rejects_field_keys_and_keyed_delete() {
        let view = reactive(&Raw::list());

        assert!(matches!(view.set("name", 1), Err(ReactiveError::KeyMismatch { .. })));
        assert!(matches!(view.delete(0usize), Err(ReactiveError::Unsupported(_))));
        assert!(view.get("name").is_null());
        assert_eq!(view.pop().unwrap(), None);
    }

    #[test]
    fn record_rejects_push() {
        let view = reactive(&Raw::record());
        assert!(matches!(view.push(1), Err(ReactiveError::Unsupported(_))));
    }
}
