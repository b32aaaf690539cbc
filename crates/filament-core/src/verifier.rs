//! Adaptive password hashes (argon2id, PHC string format).

use std::fmt;

use argon2::{Algorithm, Argon2, Params, PasswordHasher, PasswordVerifier as _, Version};
use password_hash::{PasswordHash, SaltString};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VerifierError {
    #[error("invalid hash parameters: {0}")]
    Params(String),

    #[error("random source failed: {0}")]
    Random(String),

    #[error("password hashing failed: {0}")]
    Hash(String),

    #[error("malformed password hash: {0}")]
    Malformed(String),
}

/// Cost parameters of the argon2id hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifierCost {
    /// Memory size in KiB
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for VerifierCost {
    fn default() -> Self {
        Self {
            memory_kib: Params::DEFAULT_M_COST,
            iterations: Params::DEFAULT_T_COST,
            parallelism: Params::DEFAULT_P_COST,
        }
    }
}

impl VerifierCost {
    /// Cheapest parameters argon2 accepts. Only meant for tests.
    pub const fn minimal() -> Self {
        Self {
            memory_kib: 8,
            iterations: 1,
            parallelism: 1,
        }
    }

    fn params(&self) -> Result<Params, VerifierError> {
        Params::new(self.memory_kib, self.iterations, self.parallelism, None)
            .map_err(|e| VerifierError::Params(e.to_string()))
    }
}

/// An irreversible verifier for a password.
#[derive(Clone, PartialEq, Eq)]
pub struct PasswordVerifier {
    phc: String,
}

impl PasswordVerifier {
    /// Hash `password` with a fresh random salt.
    ///
    /// CPU-bound; async callers should run it on a blocking thread.
    pub fn hash(password: &str, cost: VerifierCost) -> Result<Self, VerifierError> {
        let mut salt_bytes = [0u8; 16];
        getrandom::getrandom(&mut salt_bytes).map_err(|e| VerifierError::Random(e.to_string()))?;
        let salt =
            SaltString::encode_b64(&salt_bytes).map_err(|e| VerifierError::Hash(e.to_string()))?;

        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, cost.params()?);
        let phc = argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| VerifierError::Hash(e.to_string()))?
            .to_string();

        Ok(Self { phc })
    }

    /// Wrap an existing PHC string, e.g. one read from configuration.
    pub fn from_phc(phc: impl Into<String>) -> Result<Self, VerifierError> {
        let phc = phc.into();
        PasswordHash::new(&phc).map_err(|e| VerifierError::Malformed(e.to_string()))?;
        Ok(Self { phc })
    }

    /// Check a candidate password. Parameters are read from the hash itself.
    pub fn verify(&self, password: &str) -> bool {
        match PasswordHash::new(&self.phc) {
            Ok(parsed) => Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok(),
            Err(_) => false,
        }
    }

    pub fn as_phc(&self) -> &str {
        &self.phc
    }
}

impl fmt::Debug for PasswordVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PasswordVerifier(..)")
    }
}
