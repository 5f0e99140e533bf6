/*!
 * Block Keys, Access Tokens and Transfer Encryption Keys
 *
 * This module holds the key material types exchanged with the authoritative
 * source, the secret store that turns them into tokens and encryption keys,
 * and the key source seam.
 */

mod block_key;
mod encryption_key;
pub mod source;
pub mod store;
pub mod token;


pub use block_key::{BlockKey, KeySet};
pub use encryption_key::EncryptionKey;
pub use source::{KeySource, LocalKeyAuthority};
pub use store::{HmacSecretStore, SecretStore, StoreParams};
pub use token::{
    AccessMode, AccessModes, AccessToken, BlockRef, StorageType, TokenEncoding, TokenIdentifier,
};
