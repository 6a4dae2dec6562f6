//! Typed, session-local attribute storage.
//!
//! Filters keep per-session state (for example, a decoder's wait-state) in the
//! session's [`AttributeMap`]. Each slot is addressed by an [`AttributeKey<T>`], a
//! capability token that fixes the value type at compile time, so callers never
//! cast values themselves.
//!
//! ```rust
//! use mill_nio::attributes::{AttributeKey, AttributeMap};
//!
//! const HITS: AttributeKey<u32> = AttributeKey::new("example.hits");
//!
//! let mut attributes = AttributeMap::default();
//! *attributes.get_or_insert_with(&HITS, || 0) += 1;
//! assert_eq!(attributes.get(&HITS), Some(&1));
//! ```
//!
//! The map lives on the reactor side of a session and is only reachable through
//! a [`FilterContext`](crate::filter::FilterContext), which keeps every access on
//! the session's owning reactor thread.

use std::{
    any::{Any, TypeId},
    collections::HashMap,
    fmt,
    marker::PhantomData,
};

/// A typed key into an [`AttributeMap`].
pub struct AttributeKey<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> AttributeKey<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for AttributeKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for AttributeKey<T> {}

impl<T> fmt::Debug for AttributeKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AttributeKey").field(&self.name).finish()
    }
}

type Slot = (&'static str, TypeId);

#[derive(Default)]
pub struct AttributeMap {
    values: HashMap<Slot, Box<dyn Any + Send>>,
}

impl AttributeMap {
    fn slot<T: 'static>(key: &AttributeKey<T>) -> Slot {
        (key.name, TypeId::of::<T>())
    }

    pub fn get<T: Any + Send>(&self, key: &AttributeKey<T>) -> Option<&T> {
        self.values
            .get(&Self::slot(key))
            .and_then(|value| value.downcast_ref())
    }

    pub fn get_mut<T: Any + Send>(&mut self, key: &AttributeKey<T>) -> Option<&mut T> {
        self.values
            .get_mut(&Self::slot(key))
            .and_then(|value| value.downcast_mut())
    }

    pub fn insert<T: Any + Send>(&mut self, key: &AttributeKey<T>, value: T) -> Option<T> {
        self.values
            .insert(Self::slot(key), Box::new(value))
            .and_then(|old| old.downcast().ok())
            .map(|old| *old)
    }

    pub fn remove<T: Any + Send>(&mut self, key: &AttributeKey<T>) -> Option<T> {
        self.values
            .remove(&Self::slot(key))
            .and_then(|old| old.downcast().ok())
            .map(|old| *old)
    }

    pub fn get_or_insert_with<T, F>(&mut self, key: &AttributeKey<T>, init: F) -> &mut T
    where
        T: Any + Send,
        F: FnOnce() -> T,
    {
        let value = self
            .values
            .entry(Self::slot(key))
            .or_insert_with(|| Box::new(init()));
        match value.downcast_mut() {
            Some(value) => value,
            // the slot includes the TypeId, so the stored value is always a T
            None => unreachable!("attribute {} holds a foreign type", key.name),
        }
    }

    pub fn contains<T: Any + Send>(&self, key: &AttributeKey<T>) -> bool {
        self.values.contains_key(&Self::slot(key))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}

impl fmt::Debug for AttributeMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set()
            .entries(self.values.keys().map(|(name, _)| name))
            .finish()
    }
}
