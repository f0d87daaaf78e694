use std::collections::HashMap;
use std::fmt::Write as _;

use domain::auth::entity::Principal;
use domain::auth::error::AuthError;
use domain::auth::rbac::Role;
use infrastructure::config::ApiKeyConfig;
use ports::secondary::auth_provider::AuthProvider;
use sha2::{Digest, Sha256};

/// How a configured key is supplied.
#[derive(Debug, Clone)]
pub enum KeyMaterial {
    Plain(String),
    /// Hex SHA-256 of the key, so the secret never appears in config.
    Sha256(String),
}

#[derive(Debug, Clone)]
struct ApiKeyEntry {
    name: String,
    role: Role,
}

/// Static API key authentication provider.
///
/// Keys are held only as SHA-256 digests; incoming credentials are hashed
/// before lookup.
pub struct ApiKeyAuthProvider {
    /// Hex digest to key metadata.
    keys: HashMap<String, ApiKeyEntry>,
}

/// Hex-encoded SHA-256 of a key.
pub fn hash_key(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    let mut hex = String::with_capacity(64);
    for byte in digest {
        let _ = write!(hex, "{byte:02x}");
    }
    hex
}

impl std::fmt::Debug for ApiKeyAuthProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKeyAuthProvider")
            .field("key_count", &self.keys.len())
            .finish_non_exhaustive()
    }
}

impl ApiKeyAuthProvider {
    pub fn new(entries: Vec<(String, KeyMaterial, Role)>) -> Self {
        let mut keys = HashMap::with_capacity(entries.len());
        for (name, material, role) in entries {
            let digest = match material {
                KeyMaterial::Plain(key) => hash_key(&key),
                KeyMaterial::Sha256(hex) => hex.to_ascii_lowercase(),
            };
            keys.insert(digest, ApiKeyEntry { name, role });
        }
        Self { keys }
    }

    /// Build from validated config entries. Entries without any key
    /// material are skipped.
    pub fn from_config(entries: &[ApiKeyConfig]) -> Self {
        let entries = entries
            .iter()
            .filter_map(|cfg| {
                let material = match (&cfg.key, &cfg.key_sha256) {
                    (Some(key), _) => KeyMaterial::Plain(key.clone()),
                    (None, Some(digest)) => KeyMaterial::Sha256(digest.clone()),
                    (None, None) => return None,
                };
                Some((cfg.name.clone(), material, cfg.role))
            })
            .collect();
        Self::new(entries)
    }

    pub fn key_count(&self) -> usize {
        self.keys.len()
    }
}

impl AuthProvider for ApiKeyAuthProvider {
    fn authenticate(&self, token: &str) -> Result<Principal, AuthError> {
        if token.is_empty() {
            return Err(AuthError::TokenMissing);
        }
        let entry = self
            .keys
            .get(&hash_key(token))
            .ok_or_else(|| AuthError::TokenInvalid("invalid API key".to_string()))?;
        Ok(Principal::new(entry.name.clone(), entry.role))
    }
}
