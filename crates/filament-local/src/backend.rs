use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use filament_core::{
    Authenticator, Backend, BackendDescriptor, BackendError, BackendInstance, BackendParams,
    FileInfo, PasswordVerifier, Storage,
};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, instrument};

use crate::config::LocalConfig;

/// Descriptor of the `local` backend, ready to register.
pub fn descriptor() -> BackendDescriptor {
    BackendDescriptor::new(
        "local",
        "Local directory",
        |params: BackendParams| async move {
            let backend = LocalBackend::from_params(&params).await?;
            Ok(BackendInstance::full(backend))
        },
    )
}

/// A directory on the local filesystem.
pub struct LocalBackend {
    /// Canonical form, symlinks resolved
    root: PathBuf,
    users: Arc<HashMap<String, PasswordVerifier>>,
    username: Option<String>,
}

impl LocalBackend {
    pub async fn from_params(params: &BackendParams) -> Result<Self, BackendError> {
        let config: LocalConfig = params.parse()?;
        let users = config.verifiers()?;
        Self::new(config.root, users).await
    }

    pub async fn new(
        root: PathBuf,
        users: HashMap<String, PasswordVerifier>,
    ) -> Result<Self, BackendError> {
        let metadata = tokio::fs::metadata(&root).await.map_err(|e| {
            BackendError::Config(format!("root {} is not accessible: {}", root.display(), e))
        })?;
        if !metadata.is_dir() {
            return Err(BackendError::Config(format!(
                "root {} is not a directory",
                root.display()
            )));
        }
        let root = tokio::fs::canonicalize(&root).await.map_err(|e| {
            BackendError::Config(format!("root {} cannot be resolved: {}", root.display(), e))
        })?;

        Ok(Self {
            root,
            users: Arc::new(users),
            username: None,
        })
    }

    /// Map a slash-separated path onto the filesystem, refusing anything
    /// that would leave the root, through `..` or through a symlink.
    ///
    /// Returns the canonical path and the entry's base name (`None` for the
    /// root).
    async fn resolve(&self, path: &str) -> Result<(PathBuf, Option<String>), BackendError> {
        if self.username.is_none() {
            return Err(BackendError::NotConnected);
        }

        let mut parts: Vec<&str> = Vec::new();
        for part in path.split('/') {
            match part {
                "" | "." => {}
                ".." => {
                    if parts.pop().is_none() {
                        return Err(BackendError::InvalidPath(path.to_string()));
                    }
                }
                part => {
                    // A single component must stay a single component.
                    let mut components = Path::new(part).components();
                    match (components.next(), components.next()) {
                        (Some(Component::Normal(_)), None) => parts.push(part),
                        _ => return Err(BackendError::InvalidPath(path.to_string())),
                    }
                }
            }
        }

        let name = parts.last().map(|part| part.to_string());
        let joined = parts
            .into_iter()
            .fold(self.root.clone(), |acc, part| acc.join(part));
        let full = tokio::fs::canonicalize(&joined).await?;
        if !full.starts_with(&self.root) {
            debug!("{} resolves outside the root to {}", path, full.display());
            return Err(BackendError::InvalidPath(path.to_string()));
        }
        Ok((full, name))
    }

    /// Metadata of a directory entry, following symlinks that stay inside
    /// the root. `None` for links that leave it or dangle.
    async fn entry_metadata(&self, entry: &tokio::fs::DirEntry) -> Option<std::fs::Metadata> {
        let file_type = entry.file_type().await.ok()?;
        if !file_type.is_symlink() {
            return entry.metadata().await.ok();
        }

        let target = tokio::fs::canonicalize(entry.path()).await.ok()?;
        if !target.starts_with(&self.root) {
            debug!(
                "Hiding {}, it links outside the root",
                entry.path().display()
            );
            return None;
        }
        tokio::fs::metadata(&target).await.ok()
    }
}

fn file_info(name: String, metadata: &std::fs::Metadata) -> FileInfo {
    let info = if metadata.is_dir() {
        FileInfo::directory(name)
    } else {
        FileInfo::file(name, metadata.len())
    };
    match metadata.modified() {
        Ok(modified) => info.with_modified(DateTime::<Utc>::from(modified)),
        Err(_) => info,
    }
}

#[async_trait]
impl Backend for LocalBackend {
    async fn close(&mut self) -> Result<(), BackendError> {
        self.username = None;
        Ok(())
    }
}

#[async_trait]
impl Authenticator for LocalBackend {
    #[instrument(skip(self, password), level = "debug")]
    async fn authenticate(&mut self, username: &str, password: &str) -> Result<bool, BackendError> {
        self.username = None;

        let Some(verifier) = self.users.get(username).cloned() else {
            debug!("Unknown local user {}", username);
            return Ok(false);
        };

        let password = password.to_string();
        let ok = tokio::task::spawn_blocking(move || verifier.verify(&password))
            .await
            .map_err(|e| BackendError::Io(format!("password check failed: {}", e)))?;

        if ok {
            self.username = Some(username.to_string());
        }
        Ok(ok)
    }
}

#[async_trait]
impl Storage for LocalBackend {
    #[instrument(skip(self), level = "debug")]
    async fn stat(&mut self, path: &str) -> Result<FileInfo, BackendError> {
        let (full, name) = self.resolve(path).await?;
        let metadata = tokio::fs::metadata(&full).await?;
        Ok(file_info(name.unwrap_or_else(|| "/".to_string()), &metadata))
    }

    #[instrument(skip(self), level = "debug")]
    async fn read_dir(&mut self, path: &str) -> Result<Vec<FileInfo>, BackendError> {
        let (full, _) = self.resolve(path).await?;
        let mut read_dir = tokio::fs::read_dir(&full).await?;

        let mut entries = Vec::new();
        while let Some(entry) = read_dir.next_entry().await? {
            let Some(metadata) = self.entry_metadata(&entry).await else {
                debug!("Skipping {}", entry.path().display());
                continue;
            };
            let name = entry.file_name().to_string_lossy().to_string();
            entries.push(file_info(name, &metadata));
        }

        debug!("Listed {} entries in {}", entries.len(), full.display());
        Ok(entries)
    }

    #[instrument(skip(self, dest), level = "debug")]
    async fn retrieve(
        &mut self,
        path: &str,
        dest: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<u64, BackendError> {
        let (full, _) = self.resolve(path).await?;
        if tokio::fs::metadata(&full).await?.is_dir() {
            return Err(BackendError::InvalidPath(format!(
                "{} is a directory",
                path
            )));
        }

        let mut file = tokio::fs::File::open(&full).await?;
        let written = tokio::io::copy(&mut file, dest).await?;
        dest.flush().await?;
        Ok(written)
    }

    fn is_logged_in_as(&self, username: &str) -> bool {
        self.username.as_deref() == Some(username)
    }
}
