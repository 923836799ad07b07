//! Named process profiles
//!
//! Each profile is a text dump of one aspect of the process, served at
//! `/<name>` and listed on the index page with its current count.

pub mod heap;
pub mod maps;
pub mod threads;

use anyhow::Result;
use log::debug;
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;

use crate::domain::ProfileError;

pub use heap::{HeapProfile, MallocTrim, MemoryReclaimer};
pub use maps::MapsProfile;
pub use threads::{list_threads, ThreadInfo, ThreadsProfile};

/// A profile that can be dumped on request
pub trait NamedProfile: Send + Sync {
    fn name(&self) -> &str;

    /// Size shown on the index page (entries, threads, KiB...)
    fn count(&self) -> usize;

    /// Write the text dump; `debug` > 0 asks for more detail
    ///
    /// # Errors
    /// Returns an error if the underlying data cannot be read
    fn write_to(&self, out: &mut dyn Write, debug: i32) -> Result<()>;

    /// Bring the profile up to date before a dump
    fn collect(&self) {}
}

/// Name → profile, kept in name order
#[derive(Clone, Default)]
pub struct ProfileRegistry {
    profiles: BTreeMap<String, Arc<dyn NamedProfile>>,
}

impl ProfileRegistry {
    /// An empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in `heap`, `maps` and `threads` profiles
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(HeapProfile::default()));
        registry.register(Arc::new(MapsProfile::default()));
        registry.register(Arc::new(ThreadsProfile::default()));
        registry
    }

    /// Add a profile, replacing any profile with the same name
    pub fn register(&mut self, profile: Arc<dyn NamedProfile>) {
        self.profiles.insert(profile.name().to_string(), profile);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<dyn NamedProfile>> {
        self.profiles.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn NamedProfile>> {
        self.profiles.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// Dump one profile
    ///
    /// A positive `gc` runs a collection pass first, for `heap` only.
    ///
    /// # Errors
    /// Returns [`ProfileError::Unknown`] for unregistered names and
    /// [`ProfileError::Write`] if the dump fails.
    pub fn dump(&self, name: &str, debug: i32, gc: i32) -> Result<Vec<u8>, ProfileError> {
        let profile = self.get(name).ok_or_else(|| ProfileError::Unknown(name.to_string()))?;

        if name == heap::NAME && gc > 0 {
            debug!("Collecting {name} profile before dump");
            profile.collect();
        }

        let mut out = Vec::new();
        profile
            .write_to(&mut out, debug)
            .map_err(|e| ProfileError::Write { name: name.to_string(), error: format!("{e:#}") })?;
        Ok(out)
    }
}
