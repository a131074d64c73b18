use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// A type-erased attribute value
pub type Attribute = Arc<dyn Any + Send + Sync>;

/// Concurrent, string-keyed storage of per-session user data
#[derive(Default)]
pub struct AttributeMap {
    attributes: DashMap<String, Attribute>,
}

impl AttributeMap {
    /// Creates an empty AttributeMap
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the attribute stored under `key` if it is of type `T`
    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        self.get_raw(key).and_then(|value| value.downcast::<T>().ok())
    }

    /// Returns the attribute stored under `key`, whatever its type
    pub fn get_raw(&self, key: &str) -> Option<Attribute> {
        self.attributes.get(key).map(|value| Arc::clone(value.value()))
    }

    /// Stores `value` under `key` and returns the previous value
    pub fn set<T: Any + Send + Sync>(&self, key: &str, value: T) -> Option<Attribute> {
        self.attributes.insert(key.to_owned(), Arc::new(value))
    }

    /// Stores `value` under `key` unless the key is taken; returns the value already there
    pub fn set_if_absent<T: Any + Send + Sync>(&self, key: &str, value: T) -> Option<Attribute> {
        match self.attributes.entry(key.to_owned()) {
            Entry::Occupied(occupied) => Some(Arc::clone(occupied.get())),
            Entry::Vacant(vacant) => {
                vacant.insert(Arc::new(value));
                None
            }
        }
    }

    /// Removes and returns the attribute stored under `key`
    pub fn remove(&self, key: &str) -> Option<Attribute> {
        self.attributes.remove(key).map(|(_, value)| value)
    }

    /// Removes the attribute stored under `key` and returns it if it is of type `T`
    pub fn take<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        self.remove(key).and_then(|value| value.downcast::<T>().ok())
    }

    /// Returns true if `key` is present
    pub fn contains(&self, key: &str) -> bool {
        self.attributes.contains_key(key)
    }

    /// Returns every key currently present
    pub fn keys(&self) -> Vec<String> {
        self.attributes.iter().map(|e| e.key().clone()).collect()
    }

    /// Returns the number of attributes
    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    /// Returns true if there are no attributes
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// Drops every attribute
    pub fn dispose(&self) {
        self.attributes.clear();
    }
}

impl fmt::Debug for AttributeMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.keys()).finish()
    }
}
