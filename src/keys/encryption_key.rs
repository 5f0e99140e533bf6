use std::fmt;

use chrono::{DateTime, Utc};

use crate::config::EncryptionAlgorithm;
use crate::secure_memory::SecureBytes;

/// Symmetric key protecting one data-transfer session.
///
/// The key bytes are derived from a block key and a random nonce; the
/// receiving side re-derives them from `key_id` and `nonce`.
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptionKey {
    key_id: u32,
    scope: String,
    nonce: Vec<u8>,
    key: SecureBytes,
    expiry: DateTime<Utc>,
    algorithm: EncryptionAlgorithm,
}

impl EncryptionKey {
    pub fn new(
        key_id: u32,
        scope: String,
        nonce: Vec<u8>,
        key: SecureBytes,
        expiry: DateTime<Utc>,
        algorithm: EncryptionAlgorithm,
    ) -> Self {
        Self {
            key_id,
            scope,
            nonce,
            key,
            expiry,
            algorithm,
        }
    }

    /// Id of the block key this key was derived from
    pub fn key_id(&self) -> u32 {
        self.key_id
    }

    /// Block pool the key belongs to
    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn nonce(&self) -> &[u8] {
        &self.nonce
    }

    pub fn key(&self) -> &SecureBytes {
        &self.key
    }

    pub fn expiry(&self) -> DateTime<Utc> {
        self.expiry
    }

    pub fn algorithm(&self) -> EncryptionAlgorithm {
        self.algorithm
    }

    /// Whether the key can no longer be used at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiry <= now
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("key_id", &self.key_id)
            .field("scope", &self.scope)
            .field("nonce", &hex::encode(&self.nonce))
            .field("key", &self.key)
            .field("expiry", &self.expiry)
            .field("algorithm", &self.algorithm)
            .finish()
    }
}
