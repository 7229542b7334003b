//! Descriptor-to-handler factory.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use super::error::ConfigurationError;
use super::{DeclarativeHandler, HandlerKind, SourceDescriptor, SourceHandler};
use crate::net::ConnectionPool;

/// Constructor closure for a compiled-in custom handler.
pub type HandlerConstructor =
    Arc<dyn Fn(SourceDescriptor, ConnectionPool) -> Arc<dyn SourceHandler> + Send + Sync>;

/// Maps descriptors to runnable handlers.
///
/// Creation is a pure mapping: declarative descriptors become
/// [`DeclarativeHandler`]s, custom descriptors are looked up in the
/// constructor table. No network I/O happens here.
#[derive(Clone)]
pub struct SourceFactory {
    pool: ConnectionPool,
    custom: HashMap<String, HandlerConstructor>,
}

impl std::fmt::Debug for SourceFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut handlers: Vec<_> = self.custom.keys().collect();
        handlers.sort();
        f.debug_struct("SourceFactory")
            .field("custom_handlers", &handlers)
            .finish_non_exhaustive()
    }
}

impl SourceFactory {
    /// Creates a factory with no custom handlers registered.
    #[must_use]
    pub fn new(pool: ConnectionPool) -> Self {
        Self {
            pool,
            custom: HashMap::new(),
        }
    }

    /// Registers a custom handler constructor under `handler_id`.
    pub fn register_custom<F>(&mut self, handler_id: impl Into<String>, constructor: F)
    where
        F: Fn(SourceDescriptor, ConnectionPool) -> Arc<dyn SourceHandler> + Send + Sync + 'static,
    {
        let handler_id = handler_id.into();
        debug!(handler_id = %handler_id, "registering custom handler");
        self.custom.insert(handler_id, Arc::new(constructor));
    }

    /// Returns true if a custom handler with this id is registered.
    #[must_use]
    pub fn has_custom(&self, handler_id: &str) -> bool {
        self.custom.contains_key(handler_id)
    }

    /// The connection pool handed to every handler.
    #[must_use]
    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Builds the handler for a descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::UnknownCustomHandler`] when a custom
    /// descriptor names a handler that is not registered.
    pub fn create_handler(
        &self,
        descriptor: &SourceDescriptor,
    ) -> Result<Arc<dyn SourceHandler>, ConfigurationError> {
        match &descriptor.handler {
            HandlerKind::Declarative => Ok(Arc::new(DeclarativeHandler::new(
                descriptor.clone(),
                self.pool.clone(),
            ))),
            HandlerKind::Custom { handler } => {
                let constructor = self
                    .custom
                    .get(handler)
                    .ok_or_else(|| ConfigurationError::unknown_handler(&descriptor.id, handler))?;
                Ok(constructor(descriptor.clone(), self.pool.clone()))
            }
        }
    }
}
