use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::filter::{Filter, FilterChain, FilterKind};

/// Populates the [FilterChain] of every new session
pub trait FilterChainBuilder: Send + Sync {
    /// Installs filters into `chain`
    fn build_filter_chain(&self, chain: &FilterChain) -> Result<()>;
}

impl<F> FilterChainBuilder for F
where
    F: Fn(&FilterChain) -> Result<()> + Send + Sync,
{
    fn build_filter_chain(&self, chain: &FilterChain) -> Result<()> {
        self(chain)
    }
}

/// An ordered template of named filters copied into each session's chain. The same filter
/// instances are shared by every session built from it.
#[derive(Default)]
pub struct DefaultFilterChainBuilder {
    entries: RwLock<Vec<(String, Arc<dyn Filter>)>>,
}

impl DefaultFilterChainBuilder {
    /// Creates an empty DefaultFilterChainBuilder
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the filter registered under `name`
    pub fn get(&self, name: &str) -> Option<Arc<dyn Filter>> {
        self.entries
            .read()
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, filter)| Arc::clone(filter))
    }

    /// Returns true if a filter is registered under `name`
    pub fn contains(&self, name: &str) -> bool {
        self.entries.read().iter().any(|(n, _)| n == name)
    }

    /// Returns true if a filter of the given kind is registered
    pub fn contains_kind(&self, kind: FilterKind) -> bool {
        self.entries.read().iter().any(|(_, f)| f.kind() == kind)
    }

    /// Returns the registered names in order
    pub fn names(&self) -> Vec<String> {
        self.entries.read().iter().map(|(n, _)| n.clone()).collect()
    }

    /// Returns the number of registered filters
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if no filter is registered
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Registers a filter at the first position
    pub fn add_first(&self, name: &str, filter: Arc<dyn Filter>) -> Result<&Self> {
        self.insert(name, filter, |_| Ok(0))
    }

    /// Registers a filter at the last position
    pub fn add_last(&self, name: &str, filter: Arc<dyn Filter>) -> Result<&Self> {
        self.insert(name, filter, |entries| Ok(entries.len()))
    }

    /// Registers a filter just before `base_name`
    pub fn add_before(&self, base_name: &str, name: &str, filter: Arc<dyn Filter>) -> Result<&Self> {
        self.insert(name, filter, |entries| Self::position(entries, base_name))
    }

    /// Registers a filter just after `base_name`
    pub fn add_after(&self, base_name: &str, name: &str, filter: Arc<dyn Filter>) -> Result<&Self> {
        self.insert(name, filter, |entries| {
            Self::position(entries, base_name).map(|i| i + 1)
        })
    }

    /// Unregisters the filter named `name` and returns it
    pub fn remove(&self, name: &str) -> Result<Arc<dyn Filter>> {
        let mut entries = self.entries.write();
        let index = Self::position(&entries, name)?;
        Ok(entries.remove(index).1)
    }

    /// Replaces the filter named `name` and returns the old one
    pub fn replace(&self, name: &str, filter: Arc<dyn Filter>) -> Result<Arc<dyn Filter>> {
        let mut entries = self.entries.write();
        let index = Self::position(&entries, name)?;
        Ok(std::mem::replace(&mut entries[index].1, filter))
    }

    /// Unregisters every filter
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    fn insert<F>(&self, name: &str, filter: Arc<dyn Filter>, index: F) -> Result<&Self>
    where
        F: FnOnce(&[(String, Arc<dyn Filter>)]) -> Result<usize>,
    {
        let mut entries = self.entries.write();
        if entries.iter().any(|(n, _)| n == name) {
            return Err(Error::DuplicateName(name.to_owned()));
        }
        let index = index(&entries)?;
        entries.insert(index, (name.to_owned(), filter));
        Ok(self)
    }

    fn position(entries: &[(String, Arc<dyn Filter>)], name: &str) -> Result<usize> {
        entries
            .iter()
            .position(|(n, _)| n == name)
            .ok_or_else(|| Error::NotFound(name.to_owned()))
    }
}

impl FilterChainBuilder for DefaultFilterChainBuilder {
    fn build_filter_chain(&self, chain: &FilterChain) -> Result<()> {
        let entries = self.entries.read().clone();
        for (name, filter) in entries {
            chain.add_last(&name, filter)?;
        }
        Ok(())
    }
}

impl fmt::Debug for DefaultFilterChainBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(
                self.entries
                    .read()
                    .iter()
                    .map(|(name, filter)| format!("({}:{})", name, filter.kind())),
            )
            .finish()
    }
}
