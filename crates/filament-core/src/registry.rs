//! Catalog of backend descriptors.
//!
//! The registry is append-only: descriptors are registered at startup and
//! read on every authentication attempt. Registration order is the order in
//! which backends are tried.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, RwLock};

use futures::future::BoxFuture;
use tracing::info;

use crate::backend::BackendInstance;
use crate::config::BackendParams;
use crate::error::BackendError;

/// Future returned by a backend constructor.
pub type BackendFuture = BoxFuture<'static, Result<BackendInstance, BackendError>>;

type Constructor = dyn Fn(BackendParams) -> BackendFuture + Send + Sync;

/// Registration metadata and constructor for one kind of backend.
#[derive(Clone)]
pub struct BackendDescriptor {
    /// Unique id, also the key of the backend's configuration block
    pub id: String,
    /// Human-readable name ("FTP", "Local directory", ...)
    pub display_name: String,
    constructor: Arc<Constructor>,
}

impl BackendDescriptor {
    pub fn new<F, Fut>(
        id: impl Into<String>,
        display_name: impl Into<String>,
        constructor: F,
    ) -> Self
    where
        F: Fn(BackendParams) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<BackendInstance, BackendError>> + Send + 'static,
    {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            constructor: Arc::new(move |params: BackendParams| -> BackendFuture {
                Box::pin(constructor(params))
            }),
        }
    }

    /// Build a fresh backend instance.
    pub fn construct(&self, params: BackendParams) -> BackendFuture {
        (self.constructor)(params)
    }
}

impl fmt::Debug for BackendDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendDescriptor")
            .field("id", &self.id)
            .field("display_name", &self.display_name)
            .finish_non_exhaustive()
    }
}

/// Registry of backend descriptors, safe for concurrent use.
#[derive(Debug, Default)]
pub struct BackendRegistry {
    descriptors: RwLock<Vec<Arc<BackendDescriptor>>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a descriptor, failing if its id is already taken.
    pub fn try_register(&self, descriptor: BackendDescriptor) -> Result<(), BackendError> {
        let mut descriptors = self.descriptors.write().expect("backend registry poisoned");
        if descriptors.iter().any(|d| d.id == descriptor.id) {
            return Err(BackendError::DuplicateBackend(descriptor.id));
        }
        info!(
            "Registered backend {} ({})",
            descriptor.id, descriptor.display_name
        );
        descriptors.push(Arc::new(descriptor));
        Ok(())
    }

    /// Register a descriptor.
    ///
    /// # Panics
    ///
    /// Panics if a descriptor with the same id is already registered.
    /// Duplicate registration is a programming error.
    pub fn register(&self, descriptor: BackendDescriptor) {
        if let Err(e) = self.try_register(descriptor) {
            panic!("{}", e);
        }
    }

    pub fn get_by_id(&self, id: &str) -> Option<Arc<BackendDescriptor>> {
        self.descriptors
            .read()
            .expect("backend registry poisoned")
            .iter()
            .find(|d| d.id == id)
            .cloned()
    }

    /// Snapshot of all descriptors in registration order.
    pub fn get_all(&self) -> Vec<Arc<BackendDescriptor>> {
        self.descriptors
            .read()
            .expect("backend registry poisoned")
            .clone()
    }

    pub fn len(&self) -> usize {
        self.descriptors.read().expect("backend registry poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
