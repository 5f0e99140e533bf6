/*!
 * Error Handling for Blockguard
 *
 * Provides the error type shared by the key manager, the secret store and the
 * key sources, with error codes, user-friendly messages, and suggested
 * remediation strategies.
 */

use std::collections::HashMap;
use thiserror::Error;

/// Error type for all key and token lifecycle operations
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("Cannot get access token for {scope}: key refresher is not running")]
    NotRunning { scope: String },

    #[error("Failed to fetch keys from {source_name}: {cause}")]
    FetchFailed {
        source_name: String,
        cause: String,
        error_code: u32,
    },

    #[error("Key material error: {operation} - {cause}")]
    KeyMaterial {
        operation: String,
        cause: String,
        error_code: u32,
        context: HashMap<String, String>,
    },

    #[error("Access token rejected: {reason}")]
    TokenRejected { reason: String, error_code: u32 },

    #[error("Invalid parameter: {parameter} - {expected} - got {actual}")]
    InvalidParameter {
        parameter: String,
        expected: String,
        actual: String,
        error_code: u32,
    },

    #[error("Cipher operation failed: {operation} - {cause}")]
    CipherError {
        operation: String,
        cause: String,
        error_code: u32,
    },

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("No async runtime available: {0}")]
    RuntimeUnavailable(String),

    #[error("IO error: {0}")]
    IoError(String),
}

/// Error code constants for different error categories
pub mod error_codes {
    // Lifecycle errors: 1000-1999
    pub const NOT_RUNNING: u32 = 1001;
    pub const RUNTIME_UNAVAILABLE: u32 = 1002;

    // Key source errors: 2000-2999
    pub const FETCH_FAILED: u32 = 2001;
    pub const SOURCE_UNAVAILABLE: u32 = 2002;

    // Key material errors: 3000-3999
    pub const KEY_NOT_FOUND: u32 = 3001;
    pub const KEY_EXPIRED: u32 = 3002;
    pub const NO_CURRENT_KEY: u32 = 3003;
    pub const KEYS_DISABLED: u32 = 3004;
    pub const KEY_DERIVATION_FAILED: u32 = 3005;

    // Token errors: 4000-4999
    pub const TOKEN_MALFORMED: u32 = 4001;
    pub const TOKEN_SIGNATURE_INVALID: u32 = 4002;
    pub const TOKEN_EXPIRED: u32 = 4003;
    pub const TOKEN_BLOCK_MISMATCH: u32 = 4004;
    pub const TOKEN_MODE_DENIED: u32 = 4005;

    // Cipher errors: 5000-5999
    pub const CIPHER_INIT_FAILED: u32 = 5001;
    pub const CIPHER_SEAL_FAILED: u32 = 5002;
    pub const CIPHER_OPEN_FAILED: u32 = 5003;

    // Parameter errors: 9000-9999
    pub const SERIALIZATION_FAILED: u32 = 9001;
    pub const IO_FAILED: u32 = 9002;
    pub const INVALID_PARAMETER: u32 = 9999;
}

impl KeyError {
    /// Get the numeric error code for this error
    pub fn error_code(&self) -> u32 {
        match self {
            KeyError::NotRunning { .. } => error_codes::NOT_RUNNING,
            KeyError::FetchFailed { error_code, .. } => *error_code,
            KeyError::KeyMaterial { error_code, .. } => *error_code,
            KeyError::TokenRejected { error_code, .. } => *error_code,
            KeyError::InvalidParameter { error_code, .. } => *error_code,
            KeyError::CipherError { error_code, .. } => *error_code,
            KeyError::SerializationError(_) => error_codes::SERIALIZATION_FAILED,
            KeyError::RuntimeUnavailable(_) => error_codes::RUNTIME_UNAVAILABLE,
            KeyError::IoError(_) => error_codes::IO_FAILED,
        }
    }

    /// Whether the failure is expected to clear up on a later attempt.
    ///
    /// The key refresher keeps polling after transient errors and stops for
    /// good on anything else.
    pub fn is_transient(&self) -> bool {
        matches!(self, KeyError::FetchFailed { .. } | KeyError::IoError(_))
    }

    /// Get a user-friendly error message
    pub fn user_friendly_message(&self) -> String {
        match self {
            KeyError::NotRunning { scope } => format!(
                "Access tokens for '{}' are unavailable because key management has been shut down.",
                scope
            ),
            KeyError::FetchFailed { source_name, .. } => format!(
                "Could not reach key source '{}'. Previously fetched keys remain in use.",
                source_name
            ),
            KeyError::KeyMaterial { operation, .. } => format!(
                "Key operation '{}' failed. Block keys may be missing or expired.",
                operation
            ),
            KeyError::TokenRejected { .. } => {
                "The block access token was rejected. Request a new token.".to_string()
            }
            KeyError::InvalidParameter {
                parameter,
                expected,
                ..
            } => format!(
                "Invalid parameter '{}'. Expected '{}'.",
                parameter, expected
            ),
            KeyError::CipherError { operation, .. } => format!(
                "Transfer encryption operation '{}' failed. Data cannot be protected in flight.",
                operation
            ),
            KeyError::SerializationError(_) => {
                "Data serialization failed. Token format may be corrupted.".to_string()
            }
            KeyError::RuntimeUnavailable(_) => {
                "The key refresher needs a running async runtime.".to_string()
            }
            KeyError::IoError(_) => {
                "Input/output operation failed while talking to the key source.".to_string()
            }
        }
    }

    /// Get technical details for debugging
    pub fn technical_details(&self) -> HashMap<String, String> {
        let mut details = HashMap::new();

        details.insert("error_code".to_string(), self.error_code().to_string());
        details.insert("error_type".to_string(), self.error_type().to_string());
        details.insert("timestamp".to_string(), chrono::Utc::now().to_rfc3339());

        match self {
            KeyError::NotRunning { scope } => {
                details.insert("scope".to_string(), scope.clone());
            }
            KeyError::FetchFailed {
                source_name, cause, ..
            } => {
                details.insert("source".to_string(), source_name.clone());
                details.insert("cause".to_string(), cause.clone());
            }
            KeyError::KeyMaterial {
                operation,
                cause,
                context,
                ..
            } => {
                details.insert("operation".to_string(), operation.clone());
                details.insert("cause".to_string(), cause.clone());
                details.extend(context.clone());
            }
            KeyError::InvalidParameter {
                parameter,
                expected,
                actual,
                ..
            } => {
                details.insert("parameter".to_string(), parameter.clone());
                details.insert("expected".to_string(), expected.clone());
                details.insert("actual".to_string(), actual.clone());
            }
            _ => {
                details.insert("details".to_string(), self.to_string());
            }
        }

        details
    }

    /// Get suggested remediation steps
    pub fn suggested_remediation(&self) -> Option<String> {
        match self {
            KeyError::NotRunning { .. } => Some(
                "Create a new key manager; a closed manager cannot be restarted.".to_string(),
            ),
            KeyError::FetchFailed { .. } => Some(
                "Check connectivity to the cluster coordinator. The refresher retries automatically."
                    .to_string(),
            ),
            KeyError::KeyMaterial { error_code, .. } => match *error_code {
                error_codes::KEY_EXPIRED | error_codes::KEY_NOT_FOUND => Some(
                    "Block keys may be stale. Check that the key refresher is healthy.".to_string(),
                ),
                _ => None,
            },
            KeyError::TokenRejected { error_code, .. } => match *error_code {
                error_codes::TOKEN_EXPIRED => Some("Request a fresh access token.".to_string()),
                _ => None,
            },
            KeyError::RuntimeUnavailable(_) => Some(
                "Call start_refresher from within a tokio runtime.".to_string(),
            ),
            _ => None,
        }
    }

    /// Get the error category/type as a string
    pub fn error_type(&self) -> &'static str {
        match self {
            KeyError::NotRunning { .. } => "NotRunning",
            KeyError::FetchFailed { .. } => "FetchFailed",
            KeyError::KeyMaterial { .. } => "KeyMaterial",
            KeyError::TokenRejected { .. } => "TokenRejected",
            KeyError::InvalidParameter { .. } => "InvalidParameter",
            KeyError::CipherError { .. } => "CipherError",
            KeyError::SerializationError(_) => "SerializationError",
            KeyError::RuntimeUnavailable(_) => "RuntimeUnavailable",
            KeyError::IoError(_) => "IoError",
        }
    }
}

/// Convenience constructors for common error types
impl KeyError {
    pub fn not_running(scope: &str) -> Self {
        KeyError::NotRunning {
            scope: scope.to_string(),
        }
    }

    pub fn fetch_failed(source_name: &str, cause: &str) -> Self {
        KeyError::FetchFailed {
            source_name: source_name.to_string(),
            cause: cause.to_string(),
            error_code: error_codes::FETCH_FAILED,
        }
    }

    pub fn key_material(operation: &str, cause: &str, error_code: u32) -> Self {
        KeyError::KeyMaterial {
            operation: operation.to_string(),
            cause: cause.to_string(),
            error_code,
            context: HashMap::new(),
        }
    }

    pub fn unknown_key(operation: &str, key_id: u32) -> Self {
        let mut context = HashMap::new();
        context.insert("key_id".to_string(), key_id.to_string());

        KeyError::KeyMaterial {
            operation: operation.to_string(),
            cause: format!("no block key with id {}", key_id),
            error_code: error_codes::KEY_NOT_FOUND,
            context,
        }
    }

    pub fn token_rejected(reason: &str, error_code: u32) -> Self {
        KeyError::TokenRejected {
            reason: reason.to_string(),
            error_code,
        }
    }

    pub fn invalid_parameter(parameter: &str, expected: &str, actual: &str) -> Self {
        KeyError::InvalidParameter {
            parameter: parameter.to_string(),
            expected: expected.to_string(),
            actual: actual.to_string(),
            error_code: error_codes::INVALID_PARAMETER,
        }
    }

    pub fn cipher_error(operation: &str, cause: &str, error_code: u32) -> Self {
        KeyError::CipherError {
            operation: operation.to_string(),
            cause: cause.to_string(),
            error_code,
        }
    }
}

impl From<std::io::Error> for KeyError {
    fn from(err: std::io::Error) -> Self {
        KeyError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for KeyError {
    fn from(err: serde_json::Error) -> Self {
        KeyError::SerializationError(err.to_string())
    }
}

impl From<bincode::Error> for KeyError {
    fn from(err: bincode::Error) -> Self {
        KeyError::SerializationError(err.to_string())
    }
}

/// Result type alias for key and token operations
pub type KeyResult<T> = Result<T, KeyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_generation() {
        let error = KeyError::token_rejected("expired", error_codes::TOKEN_EXPIRED);
        assert_eq!(error.error_code(), error_codes::TOKEN_EXPIRED);
        assert_eq!(KeyError::not_running("BP-1").error_code(), error_codes::NOT_RUNNING);
    }

    #[test]
    fn test_transient_classification() {
        assert!(KeyError::fetch_failed("namenode", "connection refused").is_transient());
        assert!(KeyError::IoError("reset".to_string()).is_transient());
        assert!(!KeyError::key_material("add_keys", "disabled", error_codes::KEYS_DISABLED)
            .is_transient());
        assert!(!KeyError::not_running("BP-1").is_transient());
    }

    #[test]
    fn test_user_friendly_message() {
        let message = KeyError::not_running("BP-7").user_friendly_message();
        assert!(message.contains("BP-7"));
        assert!(message.contains("shut down"));
    }

    #[test]
    fn test_technical_details() {
        let error = KeyError::unknown_key("retrieve_encryption_key", 42);
        let details = error.technical_details();
        assert_eq!(details.get("key_id").map(String::as_str), Some("42"));
        assert!(details.contains_key("timestamp"));
        assert!(details.contains_key("operation"));
    }

    #[test]
    fn test_remediation_suggestions() {
        let suggestion = KeyError::fetch_failed("namenode", "timeout").suggested_remediation();
        assert!(suggestion.unwrap().contains("retries"));
        assert!(KeyError::SerializationError("x".to_string())
            .suggested_remediation()
            .is_none());
    }
}
