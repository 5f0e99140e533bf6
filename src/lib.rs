/*!
 * Blockguard Block Token and Transfer Key Management
 *
 * This crate manages the short-lived credentials a data-transfer client needs
 * when it moves blocks between storage nodes:
 *
 * - Block access tokens, HMAC-signed with block keys fetched from an
 *   authoritative key source
 * - Data-transfer encryption keys derived from the current block key, cached
 *   until they expire
 * - A background refresher that keeps block keys in sync with the source
 *
 * When the key source reports token security as disabled the manager is
 * stateless and hands out a disabled token sentinel.
 */

/// AEAD sealing of block data with transfer encryption keys
pub mod cipher;

/// Time source abstraction
pub mod clock;

/// Transfer security configuration
pub mod config;

/// Common error types
pub mod error;

/// Block keys, tokens, secret stores and key sources
pub mod keys;

/// Key manager and background refresher
pub mod manager;

/// Secure memory handling utilities
pub mod secure_memory;

// Re-export main types for convenience
pub use error::{KeyError, KeyResult};
pub use keys::{AccessToken, BlockRef, EncryptionKey, KeySet, KeySource};
pub use manager::{KeyManager, RunState};

/// The types most callers need to run a key manager.
pub mod prelude {
    pub use crate::cipher::TransferCipher;
    pub use crate::clock::{Clock, ManualClock, SystemClock};
    pub use crate::config::{EncryptionAlgorithm, TransferSecurityConfig};
    pub use crate::error::{KeyError, KeyResult};
    pub use crate::keys::{
        AccessMode, AccessToken, BlockKey, BlockRef, EncryptionKey, HmacSecretStore, KeySet,
        KeySource, LocalKeyAuthority, SecretStore, StorageType,
    };
    pub use crate::manager::{KeyManager, RefreshHealthSnapshot, RunState};
    pub use crate::secure_memory::SecureBytes;
}
