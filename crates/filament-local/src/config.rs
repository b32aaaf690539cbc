use std::collections::HashMap;
use std::path::PathBuf;

use filament_core::{BackendError, PasswordVerifier};
use serde::Deserialize;

/// Configuration block of the `local` backend.
///
/// ```json
/// { "root": "/srv/files", "users": { "alice": "$argon2id$v=19$..." } }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct LocalConfig {
    /// Directory served as `/`
    pub root: PathBuf,

    /// Username -> argon2 PHC string (see the `hash-password` command)
    #[serde(default)]
    pub users: HashMap<String, String>,
}

impl LocalConfig {
    /// Parse the account table.
    pub fn verifiers(&self) -> Result<HashMap<String, PasswordVerifier>, BackendError> {
        self.users
            .iter()
            .map(|(username, phc)| {
                PasswordVerifier::from_phc(phc.as_str())
                    .map(|verifier| (username.clone(), verifier))
                    .map_err(|e| {
                        BackendError::Config(format!("password hash of {}: {}", username, e))
                    })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filament_core::{BackendParams, VerifierCost};
    use serde_json::json;

    #[test]
    fn test_parse_users() {
        let phc = PasswordVerifier::hash("pw", VerifierCost::minimal()).unwrap();
        let params = BackendParams::new(json!({
            "root": "/srv/files",
            "users": { "alice": phc.as_phc() }
        }));

        let config: LocalConfig = params.parse().unwrap();
        assert_eq!(config.root, PathBuf::from("/srv/files"));

        let verifiers = config.verifiers().unwrap();
        assert!(verifiers["alice"].verify("pw"));
    }

    #[test]
    fn test_users_default_to_empty() {
        let config: LocalConfig = BackendParams::new(json!({ "root": "/srv" }))
            .parse()
            .unwrap();
        assert!(config.verifiers().unwrap().is_empty());
    }

    #[test]
    fn test_malformed_hash_names_the_user() {
        let config: LocalConfig = BackendParams::new(json!({
            "root": "/srv",
            "users": { "mallory": "plaintext" }
        }))
        .parse()
        .unwrap();

        let err = config.verifiers().unwrap_err();
        assert!(err.to_string().contains("mallory"));
    }
}
