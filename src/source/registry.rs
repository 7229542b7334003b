//! Source registry: validated descriptors keyed by id.
//!
//! The registry is an explicit table built at process start. Descriptors are
//! registered one by one (compiled-in table first, then descriptor files);
//! each is validated on the way in and a bad one is logged and set aside
//! without affecting the rest.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use super::error::ConfigurationError;
use super::{SourceDescriptor, SourceFactory, SourceHandler};

/// Validated descriptor table plus the factory that turns entries into handlers.
#[derive(Debug)]
pub struct SourceRegistry {
    factory: SourceFactory,
    descriptors: BTreeMap<String, SourceDescriptor>,
    rejected: Vec<ConfigurationError>,
}

impl SourceRegistry {
    /// Creates an empty registry around a factory.
    #[must_use]
    pub fn new(factory: SourceFactory) -> Self {
        Self {
            factory,
            descriptors: BTreeMap::new(),
            rejected: Vec::new(),
        }
    }

    /// Validates and registers one descriptor.
    ///
    /// # Errors
    ///
    /// Returns the descriptor's [`ConfigurationError`], including
    /// [`DuplicateId`](ConfigurationError::DuplicateId) and
    /// [`UnknownCustomHandler`](ConfigurationError::UnknownCustomHandler).
    /// The registry is unchanged on error.
    #[instrument(skip(self, descriptor), fields(source_id = %descriptor.id))]
    pub fn register(&mut self, descriptor: SourceDescriptor) -> Result<(), ConfigurationError> {
        descriptor.validate()?;
        if let Some(handler) = descriptor.custom_handler()
            && !self.factory.has_custom(handler)
        {
            return Err(ConfigurationError::unknown_handler(&descriptor.id, handler));
        }
        if self.descriptors.contains_key(&descriptor.id) {
            return Err(ConfigurationError::duplicate_id(&descriptor.id));
        }
        debug!(
            category = %descriptor.category,
            discovery = %descriptor.discovery,
            "registered source"
        );
        self.descriptors.insert(descriptor.id.clone(), descriptor);
        Ok(())
    }

    /// Registers every descriptor, isolating failures.
    ///
    /// Returns how many were accepted. Rejections are logged and kept in
    /// [`rejected`](Self::rejected).
    pub fn register_all<I>(&mut self, descriptors: I) -> usize
    where
        I: IntoIterator<Item = SourceDescriptor>,
    {
        let mut accepted = 0;
        for descriptor in descriptors {
            match self.register(descriptor) {
                Ok(()) => accepted += 1,
                Err(error) => self.reject(error),
            }
        }
        accepted
    }

    /// Loads every `*.json` descriptor in `dir` (sorted by file name).
    ///
    /// Files that fail to read, parse, or validate are isolated like any
    /// other bad descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::Io`] only when the directory itself
    /// cannot be listed.
    #[instrument(skip(self), fields(dir = %dir.display()))]
    pub fn register_descriptor_dir(&mut self, dir: &Path) -> Result<usize, ConfigurationError> {
        let entries = std::fs::read_dir(dir).map_err(|e| ConfigurationError::io(dir, &e))?;
        let mut paths: Vec<_> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file() && path.extension().is_some_and(|ext| ext == "json")
            })
            .collect();
        paths.sort();

        let mut accepted = 0;
        for path in paths {
            let result =
                SourceDescriptor::from_json_file(&path).and_then(|descriptor| self.register(descriptor));
            match result {
                Ok(()) => accepted += 1,
                Err(error) => self.reject(error),
            }
        }
        info!(accepted, "loaded descriptor directory");
        Ok(accepted)
    }

    fn reject(&mut self, error: ConfigurationError) {
        warn!(error = %error, "skipping invalid source descriptor");
        self.rejected.push(error);
    }

    /// All registered descriptors keyed by id.
    #[must_use]
    pub fn discover(&self) -> &BTreeMap<String, SourceDescriptor> {
        &self.descriptors
    }

    /// Descriptors rejected so far.
    #[must_use]
    pub fn rejected(&self) -> &[ConfigurationError] {
        &self.rejected
    }

    /// Looks up one descriptor.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&SourceDescriptor> {
        self.descriptors.get(id)
    }

    /// Number of registered sources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Returns true if no source is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Named groups (categories) and their member ids.
    #[must_use]
    pub fn groups(&self) -> BTreeMap<String, Vec<String>> {
        let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for descriptor in self.descriptors.values() {
            groups
                .entry(descriptor.category.clone())
                .or_default()
                .push(descriptor.id.clone());
        }
        groups
    }

    /// Expands a mix of source ids and group names into unique source ids.
    ///
    /// Ids take precedence over group names. Request order is preserved and
    /// group members follow in id order.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::UnknownSource`] for the first name that
    /// is neither an id nor a group.
    pub fn expand<S: AsRef<str>>(&self, requested: &[S]) -> Result<Vec<String>, ConfigurationError> {
        let groups = self.groups();
        let mut seen = HashSet::new();
        let mut ids = Vec::new();
        for name in requested {
            let name = name.as_ref().trim();
            if self.descriptors.contains_key(name) {
                if seen.insert(name.to_string()) {
                    ids.push(name.to_string());
                }
            } else if let Some(members) = groups.get(name) {
                for id in members {
                    if seen.insert(id.clone()) {
                        ids.push(id.clone());
                    }
                }
            } else {
                return Err(ConfigurationError::unknown_source(name));
            }
        }
        Ok(ids)
    }

    /// Builds the handler for a registered source.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::UnknownSource`] if the id is not
    /// registered.
    pub fn create_handler(&self, id: &str) -> Result<Arc<dyn SourceHandler>, ConfigurationError> {
        let descriptor = self
            .descriptors
            .get(id)
            .ok_or_else(|| ConfigurationError::unknown_source(id))?;
        self.factory.create_handler(descriptor)
    }

    /// The factory backing this registry.
    #[must_use]
    pub fn factory(&self) -> &SourceFactory {
        &self.factory
    }
}
