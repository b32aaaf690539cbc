//! FTP storage backend for filament.
//!
//! One backend instance holds one control connection, opened by
//! `authenticate` with the user's own credentials. The blocking FTP client
//! runs on tokio's blocking pool; `ftps` and `ftpes` URLs go through rustls.

mod backend;
mod client;
mod config;
mod tls;

pub use backend::{descriptor, FtpBackend};
pub use config::{FtpConfig, FtpEndpoint, TlsMode, TransferMode};
