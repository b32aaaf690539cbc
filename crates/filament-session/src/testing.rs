//! Mock backends shared by the session tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use filament_core::{
    Authenticator, Backend, BackendDescriptor, BackendError, BackendInstance, FileInfo, Storage,
};
use tokio::io::AsyncWrite;

#[derive(Debug, Default)]
pub struct Counters {
    pub constructed: AtomicUsize,
    pub closed: AtomicUsize,
}

/// Accepts a single username/password pair.
pub struct MockBackend {
    username: &'static str,
    password: &'static str,
    logged_in: Option<String>,
    counters: Arc<Counters>,
}

impl MockBackend {
    pub fn new(username: &'static str, password: &'static str, counters: Arc<Counters>) -> Self {
        Self {
            username,
            password,
            logged_in: Some(username.to_string()),
            counters,
        }
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn close(&mut self) -> Result<(), BackendError> {
        self.counters.closed.fetch_add(1, Ordering::SeqCst);
        self.logged_in = None;
        Ok(())
    }
}

#[async_trait]
impl Authenticator for MockBackend {
    async fn authenticate(&mut self, username: &str, password: &str) -> Result<bool, BackendError> {
        let ok = username == self.username && password == self.password;
        self.logged_in = ok.then(|| username.to_string());
        Ok(ok)
    }
}

#[async_trait]
impl Storage for MockBackend {
    async fn stat(&mut self, path: &str) -> Result<FileInfo, BackendError> {
        Ok(FileInfo::directory(path))
    }

    async fn read_dir(&mut self, _path: &str) -> Result<Vec<FileInfo>, BackendError> {
        Ok(Vec::new())
    }

    async fn retrieve(
        &mut self,
        _path: &str,
        _dest: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<u64, BackendError> {
        Ok(0)
    }

    fn is_logged_in_as(&self, username: &str) -> bool {
        self.logged_in.as_deref() == Some(username)
    }
}

/// Authenticator that cannot serve files.
pub struct GateOnly {
    inner: MockBackend,
}

#[async_trait]
impl Backend for GateOnly {
    async fn close(&mut self) -> Result<(), BackendError> {
        self.inner.close().await
    }
}

#[async_trait]
impl Authenticator for GateOnly {
    async fn authenticate(&mut self, username: &str, password: &str) -> Result<bool, BackendError> {
        self.inner.authenticate(username, password).await
    }
}

/// Authenticator whose remote side is unreachable.
pub struct Unreachable {
    counters: Arc<Counters>,
}

#[async_trait]
impl Backend for Unreachable {
    async fn close(&mut self) -> Result<(), BackendError> {
        self.counters.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl Authenticator for Unreachable {
    async fn authenticate(&mut self, _: &str, _: &str) -> Result<bool, BackendError> {
        Err(BackendError::Transport("connection refused".to_string()))
    }
}

#[async_trait]
impl Storage for Unreachable {
    async fn stat(&mut self, path: &str) -> Result<FileInfo, BackendError> {
        Err(BackendError::NotFound(path.to_string()))
    }

    async fn read_dir(&mut self, path: &str) -> Result<Vec<FileInfo>, BackendError> {
        Err(BackendError::NotFound(path.to_string()))
    }

    async fn retrieve(
        &mut self,
        path: &str,
        _dest: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<u64, BackendError> {
        Err(BackendError::NotFound(path.to_string()))
    }

    fn is_logged_in_as(&self, _username: &str) -> bool {
        false
    }
}

pub fn full(
    id: &str,
    username: &'static str,
    password: &'static str,
    counters: &Arc<Counters>,
) -> BackendDescriptor {
    let counters = counters.clone();
    BackendDescriptor::new(id, id.to_uppercase(), move |_params| {
        let counters = counters.clone();
        async move {
            counters.constructed.fetch_add(1, Ordering::SeqCst);
            Ok(BackendInstance::full(MockBackend::new(
                username, password, counters,
            )))
        }
    })
}

pub fn authenticator_only(
    id: &str,
    username: &'static str,
    password: &'static str,
    counters: &Arc<Counters>,
) -> BackendDescriptor {
    let counters = counters.clone();
    BackendDescriptor::new(id, id.to_uppercase(), move |_params| {
        let counters = counters.clone();
        async move {
            counters.constructed.fetch_add(1, Ordering::SeqCst);
            Ok(BackendInstance::authenticator_only(GateOnly {
                inner: MockBackend::new(username, password, counters),
            }))
        }
    })
}

pub fn storage_only(id: &str, counters: &Arc<Counters>) -> BackendDescriptor {
    let counters = counters.clone();
    BackendDescriptor::new(id, id.to_uppercase(), move |_params| {
        let counters = counters.clone();
        async move {
            counters.constructed.fetch_add(1, Ordering::SeqCst);
            Ok(BackendInstance::storage_only(Unreachable { counters }))
        }
    })
}

pub fn unreachable(id: &str, counters: &Arc<Counters>) -> BackendDescriptor {
    let counters = counters.clone();
    BackendDescriptor::new(id, id.to_uppercase(), move |_params| {
        let counters = counters.clone();
        async move {
            counters.constructed.fetch_add(1, Ordering::SeqCst);
            Ok(BackendInstance::full(Unreachable { counters }))
        }
    })
}

pub fn unconstructible(id: &str, counters: &Arc<Counters>) -> BackendDescriptor {
    let counters = counters.clone();
    BackendDescriptor::new(id, id.to_uppercase(), move |_params| {
        let counters = counters.clone();
        async move {
            counters.constructed.fetch_add(1, Ordering::SeqCst);
            Err(BackendError::Config("missing url".to_string()))
        }
    })
}
