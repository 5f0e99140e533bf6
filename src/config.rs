/*!
 * Transfer Security Configuration
 */

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{KeyError, KeyResult};

/// Cipher used to protect block data in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum EncryptionAlgorithm {
    /// AES-256 in Galois/Counter Mode
    #[default]
    #[serde(rename = "aes-256-gcm")]
    Aes256Gcm,
    /// ChaCha20 stream cipher with Poly1305 authentication
    #[serde(rename = "chacha20-poly1305")]
    ChaCha20Poly1305,
}

impl EncryptionAlgorithm {
    /// Canonical identifier, as accepted by [`FromStr`]
    pub fn as_str(&self) -> &'static str {
        match self {
            EncryptionAlgorithm::Aes256Gcm => "aes-256-gcm",
            EncryptionAlgorithm::ChaCha20Poly1305 => "chacha20-poly1305",
        }
    }

    /// Key length in bytes
    pub fn key_len(&self) -> usize {
        32
    }
}

impl fmt::Display for EncryptionAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EncryptionAlgorithm {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "aes-256-gcm" | "aes256gcm" | "aes/gcm" | "aes" => Ok(EncryptionAlgorithm::Aes256Gcm),
            "chacha20-poly1305" | "chacha20poly1305" | "chacha20" => {
                Ok(EncryptionAlgorithm::ChaCha20Poly1305)
            }
            other => Err(KeyError::invalid_parameter(
                "encryption_algorithm",
                "aes-256-gcm or chacha20-poly1305",
                other,
            )),
        }
    }
}

/// Settings the key manager reads from the surrounding configuration.
///
/// Missing fields take their defaults, so `{}` is a valid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransferSecurityConfig {
    /// Cipher for data-transfer encryption keys
    pub encryption_algorithm: EncryptionAlgorithm,
    /// Encode token identifiers in the compact binary form instead of the
    /// legacy form. Off by default.
    pub compact_token_encoding: bool,
}

impl TransferSecurityConfig {
    /// Parse a configuration from JSON
    pub fn from_json_str(json: &str) -> KeyResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Set the encryption algorithm from its string identifier
    pub fn with_algorithm_name(mut self, name: &str) -> KeyResult<Self> {
        self.encryption_algorithm = name.parse()?;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TransferSecurityConfig::default();
        assert_eq!(config.encryption_algorithm, EncryptionAlgorithm::Aes256Gcm);
        assert!(!config.compact_token_encoding);
    }

    #[test]
    fn test_empty_json_uses_defaults() {
        let config = TransferSecurityConfig::from_json_str("{}").unwrap();
        assert_eq!(config, TransferSecurityConfig::default());
    }

    #[test]
    fn test_json_overrides() {
        let config = TransferSecurityConfig::from_json_str(
            r#"{"encryption_algorithm": "chacha20-poly1305", "compact_token_encoding": true}"#,
        )
        .unwrap();
        assert_eq!(config.encryption_algorithm, EncryptionAlgorithm::ChaCha20Poly1305);
        assert!(config.compact_token_encoding);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result = TransferSecurityConfig::from_json_str(r#"{"protobuf": true}"#);
        assert!(matches!(result, Err(KeyError::SerializationError(_))));
    }

    #[test]
    fn test_algorithm_parsing() {
        assert_eq!(
            "AES-256-GCM".parse::<EncryptionAlgorithm>().unwrap(),
            EncryptionAlgorithm::Aes256Gcm
        );
        assert_eq!(
            " chacha20poly1305 ".parse::<EncryptionAlgorithm>().unwrap(),
            EncryptionAlgorithm::ChaCha20Poly1305
        );
        let err = "3des".parse::<EncryptionAlgorithm>().unwrap_err();
        assert_eq!(err.error_type(), "InvalidParameter");
    }

    #[test]
    fn test_with_algorithm_name() {
        let config = TransferSecurityConfig::default()
            .with_algorithm_name("chacha20")
            .unwrap();
        assert_eq!(config.encryption_algorithm.to_string(), "chacha20-poly1305");
    }
}
