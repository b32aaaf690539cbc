//! Core traits and types for filament storage backends.
//!
//! This crate defines the abstractions shared between the session layer and
//! the backend implementations:
//! - `Backend`, `Authenticator`, `Storage`: the capability contract
//! - `BackendInstance`: what a backend constructor hands back
//! - `BackendRegistry`: the catalog of backend descriptors
//! - `walk`: breadth-first traversal on top of `Storage::read_dir`
//! - `PasswordVerifier`: adaptive password hashes

mod backend;
mod config;
mod error;
mod file_info;
mod registry;
mod verifier;
mod walk;

pub use backend::{Authenticator, Backend, BackendInstance, Storage, StorageBackend};
pub use config::{BackendConfigs, BackendParams};
pub use error::BackendError;
pub use file_info::{join_path, listing_order, sort_listing, FileInfo};
pub use registry::{BackendDescriptor, BackendFuture, BackendRegistry};
pub use verifier::{PasswordVerifier, VerifierCost, VerifierError};
pub use walk::{walk, walk_unlimited};
