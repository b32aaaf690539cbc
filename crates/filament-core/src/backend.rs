use std::fmt;

use async_trait::async_trait;
use tokio::io::AsyncWrite;

use crate::error::BackendError;
use crate::file_info::FileInfo;

/// A constructed backend instance.
///
/// Instances are stateful (they may hold a live connection) and are owned by
/// exactly one session, hence the `&mut self` receivers throughout.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Release all resources held by this instance, including live
    /// connections to the remote side.
    async fn close(&mut self) -> Result<(), BackendError>;
}

/// Capability: verify credentials against the backend.
#[async_trait]
pub trait Authenticator: Backend {
    /// Test the given credentials, leaving the connection open for reuse.
    ///
    /// `Ok(false)` is a clean rejection; `Err` means the backend could not
    /// answer (transport or protocol failure).
    async fn authenticate(&mut self, username: &str, password: &str)
        -> Result<bool, BackendError>;

    /// Change the password of the authenticated account.
    async fn change_password(&mut self, _new_password: &str) -> Result<(), BackendError> {
        Err(BackendError::Unsupported("change_password"))
    }
}

/// Capability: serve files.
#[async_trait]
pub trait Storage: Backend {
    /// Statistics for a single file or directory.
    async fn stat(&mut self, path: &str) -> Result<FileInfo, BackendError>;

    /// One level of entries contained in the directory at `path`.
    async fn read_dir(&mut self, path: &str) -> Result<Vec<FileInfo>, BackendError>;

    /// Stream the content of the file at `path` into `dest`.
    ///
    /// Returns the number of bytes written.
    async fn retrieve(
        &mut self,
        path: &str,
        dest: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<u64, BackendError>;

    /// Whether this instance has already authenticated as `username`.
    fn is_logged_in_as(&self, username: &str) -> bool;
}

/// A backend that is both an authenticator and a storage.
///
/// Sessions only ever hold backends of this kind.
pub trait StorageBackend: Authenticator + Storage {}

impl<T: Authenticator + Storage + ?Sized> StorageBackend for T {}

/// What a backend constructor returns.
///
/// The variant is the capability set of the instance, so the orchestration
/// matches on it instead of probing the instance at runtime.
pub enum BackendInstance {
    Full(Box<dyn StorageBackend>),
    AuthenticatorOnly(Box<dyn Authenticator>),
    StorageOnly(Box<dyn Storage>),
}

impl BackendInstance {
    pub fn full<B: Authenticator + Storage + 'static>(backend: B) -> Self {
        Self::Full(Box::new(backend))
    }

    pub fn authenticator_only<B: Authenticator + 'static>(backend: B) -> Self {
        Self::AuthenticatorOnly(Box::new(backend))
    }

    pub fn storage_only<B: Storage + 'static>(backend: B) -> Self {
        Self::StorageOnly(Box::new(backend))
    }

    pub fn is_authenticator(&self) -> bool {
        matches!(self, Self::Full(_) | Self::AuthenticatorOnly(_))
    }

    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Full(_) | Self::StorageOnly(_))
    }

    /// Short name of the capability set, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Full(_) => "authenticator+storage",
            Self::AuthenticatorOnly(_) => "authenticator",
            Self::StorageOnly(_) => "storage",
        }
    }

    /// Close the instance, whatever its capability set.
    pub async fn close(self) -> Result<(), BackendError> {
        match self {
            Self::Full(mut backend) => backend.close().await,
            Self::AuthenticatorOnly(mut backend) => backend.close().await,
            Self::StorageOnly(mut backend) => backend.close().await,
        }
    }
}

impl fmt::Debug for BackendInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("BackendInstance").field(&self.kind()).finish()
    }
}
