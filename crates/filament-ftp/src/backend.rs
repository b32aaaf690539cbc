use std::sync::Arc;

use async_trait::async_trait;
use filament_core::{
    Authenticator, Backend, BackendDescriptor, BackendError, BackendInstance, BackendParams,
    FileInfo, Storage,
};
use rustls::ClientConfig;
use suppaftp::RustlsFtpStream;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::client;
use crate::config::{FtpConfig, FtpEndpoint, TlsMode};
use crate::tls;

/// Descriptor of the `ftp` backend, ready to register.
pub fn descriptor() -> BackendDescriptor {
    BackendDescriptor::new("ftp", "FTP", |params: BackendParams| async move {
        let backend = FtpBackend::from_params(&params)?;
        Ok(BackendInstance::full(backend))
    })
}

/// FTP account, acting as both authenticator and storage.
pub struct FtpBackend {
    endpoint: FtpEndpoint,
    tls: Option<Arc<ClientConfig>>,
    stream: Option<RustlsFtpStream>,
    username: Option<String>,
}

impl FtpBackend {
    /// Validate the configuration. Does not connect.
    pub fn from_params(params: &BackendParams) -> Result<Self, BackendError> {
        let config: FtpConfig = params.parse()?;
        Self::new(config.endpoint()?)
    }

    pub fn new(endpoint: FtpEndpoint) -> Result<Self, BackendError> {
        let tls = match endpoint.tls {
            TlsMode::Plain => None,
            TlsMode::Implicit | TlsMode::Explicit => {
                Some(tls::client_config(endpoint.insecure_skip_verify)?)
            }
        };
        Ok(Self {
            endpoint,
            tls,
            stream: None,
            username: None,
        })
    }

    /// Run a blocking operation on the control connection.
    async fn with_stream<T, F>(&mut self, op: F) -> Result<T, BackendError>
    where
        T: Send + 'static,
        F: FnOnce(&mut RustlsFtpStream) -> Result<T, BackendError> + Send + 'static,
    {
        let mut stream = self.stream.take().ok_or(BackendError::NotConnected)?;
        let (stream, result) = tokio::task::spawn_blocking(move || {
            let result = op(&mut stream);
            (stream, result)
        })
        .await
        .map_err(|e| BackendError::Transport(format!("FTP worker failed: {}", e)))?;
        self.stream = Some(stream);
        result
    }

    async fn disconnect(&mut self) -> Result<(), BackendError> {
        self.username = None;
        let Some(mut stream) = self.stream.take() else {
            return Ok(());
        };
        tokio::task::spawn_blocking(move || stream.quit())
            .await
            .map_err(|e| BackendError::Transport(format!("FTP worker failed: {}", e)))?
            .map_err(client::map_ftp_error)
    }
}

#[async_trait]
impl Backend for FtpBackend {
    #[instrument(skip(self), level = "debug")]
    async fn close(&mut self) -> Result<(), BackendError> {
        self.disconnect().await
    }
}

#[async_trait]
impl Authenticator for FtpBackend {
    #[instrument(skip(self, password), level = "debug")]
    async fn authenticate(&mut self, username: &str, password: &str) -> Result<bool, BackendError> {
        if let Err(e) = self.disconnect().await {
            debug!("Ignoring error while dropping previous FTP connection: {}", e);
        }

        let endpoint = self.endpoint.clone();
        let tls = self.tls.clone();
        let user = username.to_string();
        let pass = password.to_string();
        let stream = tokio::task::spawn_blocking(move || {
            client::connect_and_login(&endpoint, tls.as_ref(), &user, &pass)
        })
        .await
        .map_err(|e| BackendError::Transport(format!("FTP worker failed: {}", e)))??;

        match stream {
            Some(stream) => {
                info!(
                    "Logged in to {}:{} as {}",
                    self.endpoint.host, self.endpoint.port, username
                );
                self.stream = Some(stream);
                self.username = Some(username.to_string());
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl Storage for FtpBackend {
    #[instrument(skip(self), level = "debug")]
    async fn stat(&mut self, path: &str) -> Result<FileInfo, BackendError> {
        let trimmed = path.trim_end_matches('/');
        if trimmed.is_empty() {
            // The root is not listed by any parent.
            if self.stream.is_none() {
                return Err(BackendError::NotConnected);
            }
            return Ok(FileInfo::directory("/"));
        }

        let (parent, name) = match trimmed.rsplit_once('/') {
            Some(("", name)) => ("/", name),
            Some((parent, name)) => (parent, name),
            None => (".", trimmed),
        };

        let parent = parent.to_string();
        let entries = self
            .with_stream(move |stream| client::read_dir(stream, &parent))
            .await?;
        entries
            .into_iter()
            .find(|entry| entry.name == name)
            .ok_or_else(|| BackendError::NotFound(path.to_string()))
    }

    #[instrument(skip(self), level = "debug")]
    async fn read_dir(&mut self, path: &str) -> Result<Vec<FileInfo>, BackendError> {
        let owned = path.to_string();
        let entries = self
            .with_stream(move |stream| client::read_dir(stream, &owned))
            .await?;
        debug!("Listed {} entries in {}", entries.len(), path);
        Ok(entries)
    }

    #[instrument(skip(self, dest), level = "debug")]
    async fn retrieve(
        &mut self,
        path: &str,
        dest: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<u64, BackendError> {
        let mut stream = self.stream.take().ok_or(BackendError::NotConnected)?;
        let (tx, mut rx) = mpsc::channel::<Vec<u8>>(8);
        let owned = path.to_string();
        let worker = tokio::task::spawn_blocking(move || {
            let result = client::retrieve(&mut stream, &owned, tx);
            (stream, result)
        });

        let mut written = 0u64;
        let mut write_error = None;
        while let Some(chunk) = rx.recv().await {
            if let Err(e) = dest.write_all(&chunk).await {
                write_error = Some(e);
                break;
            }
            written += chunk.len() as u64;
        }
        // Unblocks the worker if we stopped reading early.
        drop(rx);

        let (stream, result) = worker
            .await
            .map_err(|e| BackendError::Transport(format!("FTP worker failed: {}", e)))?;
        self.stream = Some(stream);

        if let Some(e) = write_error {
            warn!("Download of {} aborted by the receiver: {}", path, e);
            return Err(e.into());
        }
        result?;
        dest.flush().await?;

        debug!("Retrieved {} ({} bytes)", path, written);
        Ok(written)
    }

    fn is_logged_in_as(&self, username: &str) -> bool {
        self.stream.is_some() && self.username.as_deref() == Some(username)
    }
}
