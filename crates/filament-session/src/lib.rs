//! Session layer for filament.
//!
//! A `SessionStore` turns credentials into session tokens by trying each
//! registered backend in turn, and keeps the winning backend connection
//! alive behind the token until the session has been idle long enough.

mod session;
mod store;

#[cfg(test)]
mod testing;

pub use session::{ActiveOperation, Session, StorageGuard};
pub use store::{SessionSettings, SessionStore};

/// Short prefix of a token, safe to log.
pub(crate) fn short_token(token: &str) -> &str {
    token.get(..8).unwrap_or(token)
}
