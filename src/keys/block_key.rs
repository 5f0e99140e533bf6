use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::secure_memory::SecureBytes;

/// A block key: the secret from which access-token passwords and transfer
/// encryption keys are derived
#[derive(Clone, PartialEq, Eq)]
pub struct BlockKey {
    key_id: u32,
    expiry: DateTime<Utc>,
    material: SecureBytes,
}

impl BlockKey {
    /// Create a block key from its parts
    pub fn new(key_id: u32, expiry: DateTime<Utc>, material: SecureBytes) -> Self {
        Self {
            key_id,
            expiry,
            material,
        }
    }

    /// Identifier carried in tokens and encryption keys derived from this key
    pub fn key_id(&self) -> u32 {
        self.key_id
    }

    /// Instant after which the key is purged
    pub fn expiry(&self) -> DateTime<Utc> {
        self.expiry
    }

    /// The secret key bytes
    pub fn material(&self) -> &SecureBytes {
        &self.material
    }

    /// Whether the key has expired at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiry <= now
    }
}

impl fmt::Debug for BlockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockKey")
            .field("key_id", &self.key_id)
            .field("expiry", &self.expiry)
            .field("material", &self.material)
            .finish()
    }
}

/// Key material exported by the authoritative source.
///
/// A key set is never modified after it is received; each fetch supersedes
/// the previous one as a whole.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySet {
    /// Whether block access tokens are in use at all
    pub token_security_enabled: bool,
    /// How often the authoritative source rotates its current key
    pub key_update_interval: Duration,
    /// Lifetime of issued tokens and derived encryption keys
    pub token_lifetime: Duration,
    /// Key used for new tokens and encryption keys
    pub current_key: Option<BlockKey>,
    /// Every key still valid for verification, the current one included
    pub all_keys: Vec<BlockKey>,
}

impl KeySet {
    /// A key set announcing that token security is off
    pub fn disabled() -> Self {
        Self {
            token_security_enabled: false,
            key_update_interval: Duration::ZERO,
            token_lifetime: Duration::ZERO,
            current_key: None,
            all_keys: Vec::new(),
        }
    }

    /// Polling period for a refresher tracking this key set.
    ///
    /// A quarter of the rotation interval, so a local copy never lags a
    /// rotation by more than a quarter interval.
    pub fn refresh_period(&self) -> Duration {
        self.key_update_interval / 4
    }
}
