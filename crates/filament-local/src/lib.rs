//! Local directory storage backend for filament.
//!
//! Serves a directory tree from the local filesystem. Accounts come from a
//! table of argon2 password hashes in the backend's configuration block.

mod backend;
mod config;

pub use backend::{descriptor, LocalBackend};
pub use config::LocalConfig;
