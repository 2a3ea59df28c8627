//! Scope tags and storage key derivation.

use serde::{Deserialize, Serialize};

/// The dimension a rate limit record is keyed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Authenticated subject
    Identity,
    /// Network origin
    Address,
    /// Client-asserted device fingerprint
    Device,
}

impl Scope {
    /// Tag used as the first segment of storage keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Identity => "identity",
            Scope::Address => "address",
            Scope::Device => "device",
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Scope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "identity" => Ok(Scope::Identity),
            "address" => Ok(Scope::Address),
            "device" => Ok(Scope::Device),
            other => Err(format!("unknown scope: {}", other)),
        }
    }
}

/// Replace characters that are unsafe in a storage path with `_`.
pub fn sanitize_id(id: &str) -> String {
    id.chars()
        .map(|c| match c {
            '/' | ':' | '.' => '_',
            c if c.is_whitespace() => '_',
            c => c,
        })
        .collect()
}

/// A key that uniquely identifies one rate limit record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordKey {
    /// Trust scope of the identifier
    pub scope: Scope,
    /// Sanitized identifier
    pub id: String,
    /// Caller-chosen action label, e.g. "login"
    pub action: String,
}

impl RecordKey {
    /// Create a new record key, sanitizing the identifier.
    pub fn new(scope: Scope, id: &str, action: &str) -> Self {
        Self {
            scope,
            id: sanitize_id(id),
            action: action.to_string(),
        }
    }

    /// The key under which the record is persisted.
    pub fn storage_key(&self) -> String {
        format!("{}_{}_{}", self.scope, self.id, self.action)
    }
}

impl std::fmt::Display for RecordKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.storage_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_replaces_unsafe_characters() {
        assert_eq!(sanitize_id("192.168.1.1"), "192_168_1_1");
        assert_eq!(sanitize_id("::1"), "__1");
        assert_eq!(sanitize_id("a/b c\td"), "a_b_c_d");
        assert_eq!(sanitize_id("user-42"), "user-42");
    }

    #[test]
    fn test_storage_key_layout() {
        let key = RecordKey::new(Scope::Address, "10.0.0.1", "login");
        assert_eq!(key.storage_key(), "address_10_0_0_1_login");
        assert_eq!(key.to_string(), "address_10_0_0_1_login");
    }

    #[test]
    fn test_actions_are_isolated() {
        let login = RecordKey::new(Scope::Identity, "u1", "login");
        let totp = RecordKey::new(Scope::Identity, "u1", "verifyTotp");
        assert_ne!(login.storage_key(), totp.storage_key());
    }

    #[test]
    fn test_scopes_are_isolated() {
        let identity = RecordKey::new(Scope::Identity, "abc", "login");
        let device = RecordKey::new(Scope::Device, "abc", "login");
        assert_ne!(identity, device);
        assert_ne!(identity.storage_key(), device.storage_key());
    }

    #[test]
    fn test_scope_parse() {
        assert_eq!("device".parse::<Scope>(), Ok(Scope::Device));
        assert!("ip".parse::<Scope>().is_err());
    }
}
