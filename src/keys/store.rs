/*!
 * Secret Store
 *
 * The secret store holds block keys and performs all cryptographic work for
 * the key manager: minting access tokens, deriving transfer encryption keys,
 * and on the receiving side verifying tokens and re-deriving keys.
 */

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::clock::{add_duration, remaining, Clock};
use crate::config::EncryptionAlgorithm;
use crate::error::{error_codes, KeyError, KeyResult};
use crate::keys::{
    AccessMode, AccessModes, AccessToken, BlockKey, BlockRef, EncryptionKey, KeySet,
    StorageType, TokenEncoding, TokenIdentifier,
};
use crate::secure_memory::SecureBytes;

type HmacSha256 = Hmac<Sha256>;

/// Length of the random nonce mixed into each encryption key
pub const ENCRYPTION_KEY_NONCE_LEN: usize = 8;

const TRANSFER_KEY_INFO: &[u8] = b"blockguard/transfer-key/v1";

/// Parameters fixed when a store is seeded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreParams {
    /// Block pool the store issues tokens and keys for
    pub scope: String,
    pub key_update_interval: Duration,
    pub token_lifetime: Duration,
    pub algorithm: EncryptionAlgorithm,
    pub encoding: TokenEncoding,
}

/// Holder of block keys that mints tokens and encryption keys.
///
/// Implementations are shared between the key refresher, which writes new
/// key material, and any number of request threads, so they synchronize
/// internally.
pub trait SecretStore: Send + Sync + 'static {
    /// Build a store from the first key set fetched from the authoritative source
    fn seed(params: StoreParams, keys: KeySet, clock: Arc<dyn Clock>) -> KeyResult<Self>
    where
        Self: Sized;

    /// Take in a freshly fetched key set
    fn add_keys(&self, keys: KeySet) -> KeyResult<()>;

    /// Mint a token for `block` scoped to `modes`
    fn generate_token(
        &self,
        block: &BlockRef,
        modes: &AccessModes,
        storage_types: &[StorageType],
        storage_ids: &[String],
        block_alias: &[u8],
    ) -> KeyResult<AccessToken>;

    /// Derive a new transfer encryption key from the current block key
    fn generate_encryption_key(&self) -> EncryptionKey;
}

#[derive(Debug)]
struct KeyRing {
    current: BlockKey,
    keys: BTreeMap<u32, BlockKey>,
}

impl KeyRing {
    fn from_key_set(keys: KeySet) -> KeyResult<Self> {
        if !keys.token_security_enabled {
            return Err(KeyError::key_material(
                "load_keys",
                "key set has token security disabled",
                error_codes::KEYS_DISABLED,
            ));
        }
        let current = keys.current_key.ok_or_else(|| {
            KeyError::key_material(
                "load_keys",
                "key set has no current key",
                error_codes::NO_CURRENT_KEY,
            )
        })?;

        let mut ring = Self {
            current: current.clone(),
            keys: BTreeMap::new(),
        };
        ring.merge(keys.all_keys);
        ring.keys.insert(current.key_id(), current);
        Ok(ring)
    }

    fn merge(&mut self, keys: Vec<BlockKey>) {
        for key in keys {
            self.keys.insert(key.key_id(), key);
        }
    }

    /// Drop expired keys; the current key stays even when stale
    fn purge_expired(&mut self, now: chrono::DateTime<chrono::Utc>) -> usize {
        let before = self.keys.len();
        let current_id = self.current.key_id();
        self.keys
            .retain(|id, key| *id == current_id || !key.is_expired_at(now));
        before - self.keys.len()
    }
}

/// Secret store signing tokens with HMAC-SHA256 and deriving encryption keys
/// with HKDF-SHA256
#[derive(Debug)]
pub struct HmacSecretStore {
    params: StoreParams,
    clock: Arc<dyn Clock>,
    ring: RwLock<KeyRing>,
}

impl HmacSecretStore {
    pub fn params(&self) -> &StoreParams {
        &self.params
    }

    /// Id of the key used for new tokens and encryption keys
    pub fn current_key_id(&self) -> u32 {
        self.ring
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .current
            .key_id()
    }

    /// Ids of all keys held for verification
    pub fn key_ids(&self) -> Vec<u32> {
        self.ring
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys
            .keys()
            .copied()
            .collect()
    }

    /// Verify that `token` grants `mode` on `block`.
    ///
    /// This is the check the receiving side of a transfer performs.
    pub fn check_access(&self, token: &AccessToken, block: &BlockRef, mode: AccessMode) -> KeyResult<()> {
        if token.is_disabled() {
            return Err(KeyError::token_rejected(
                "token security is enabled but the token is the disabled sentinel",
                error_codes::TOKEN_MALFORMED,
            ));
        }
        let identifier = token.decode_identifier()?;

        {
            let ring = self.ring.read().unwrap_or_else(PoisonError::into_inner);
            let key = ring
                .keys
                .get(&identifier.key_id)
                .ok_or_else(|| KeyError::unknown_key("check_access", identifier.key_id))?;
            let mut mac = keyed_mac(key.material(), "check_access")?;
            mac.update(token.identifier());
            mac.verify_slice(token.password()).map_err(|_| {
                KeyError::token_rejected(
                    "token password does not match its identifier",
                    error_codes::TOKEN_SIGNATURE_INVALID,
                )
            })?;
        }

        if identifier.expiry <= self.clock.now() {
            return Err(KeyError::token_rejected(
                &format!("token expired at {}", identifier.expiry),
                error_codes::TOKEN_EXPIRED,
            ));
        }
        if identifier.scope != block.scope || identifier.block_id != block.block_id {
            return Err(KeyError::token_rejected(
                &format!(
                    "token is for {}:blk_{}, not {}",
                    identifier.scope, identifier.block_id, block
                ),
                error_codes::TOKEN_BLOCK_MISMATCH,
            ));
        }
        if !identifier.modes.contains(&mode) {
            return Err(KeyError::token_rejected(
                &format!("token does not grant {:?} access", mode),
                error_codes::TOKEN_MODE_DENIED,
            ));
        }
        Ok(())
    }

    /// Re-derive the key bytes of an encryption key from its key id and nonce
    pub fn retrieve_encryption_key(&self, key_id: u32, nonce: &[u8]) -> KeyResult<SecureBytes> {
        let ring = self.ring.read().unwrap_or_else(PoisonError::into_inner);
        let key = ring
            .keys
            .get(&key_id)
            .ok_or_else(|| KeyError::unknown_key("retrieve_encryption_key", key_id))?;
        if key.is_expired_at(self.clock.now()) {
            return Err(KeyError::key_material(
                "retrieve_encryption_key",
                &format!("block key {} expired at {}", key_id, key.expiry()),
                error_codes::KEY_EXPIRED,
            ));
        }
        Ok(derive_transfer_key(
            key.material(),
            nonce,
            &self.params.scope,
            self.params.algorithm,
        ))
    }
}

impl SecretStore for HmacSecretStore {
    fn seed(params: StoreParams, keys: KeySet, clock: Arc<dyn Clock>) -> KeyResult<Self> {
        let mut ring = KeyRing::from_key_set(keys)?;
        ring.purge_expired(clock.now());

        Ok(Self {
            params,
            clock,
            ring: RwLock::new(ring),
        })
    }

    fn add_keys(&self, keys: KeySet) -> KeyResult<()> {
        let incoming = KeyRing::from_key_set(keys)?;
        let now = self.clock.now();

        let mut ring = self.ring.write().unwrap_or_else(PoisonError::into_inner);
        let previous = ring.current.key_id();
        ring.current = incoming.current;
        ring.merge(incoming.keys.into_values().collect());
        let purged = ring.purge_expired(now);

        if previous != ring.current.key_id() {
            log::debug!(
                "Current block key for {} rotated from {} to {} ({})",
                self.params.scope,
                previous,
                ring.current.key_id(),
                ring.current.material().fingerprint()
            );
        }
        if purged > 0 {
            log::debug!("Purged {} expired block keys for {}", purged, self.params.scope);
        }
        Ok(())
    }

    fn generate_token(
        &self,
        block: &BlockRef,
        modes: &AccessModes,
        storage_types: &[StorageType],
        storage_ids: &[String],
        block_alias: &[u8],
    ) -> KeyResult<AccessToken> {
        let ring = self.ring.read().unwrap_or_else(PoisonError::into_inner);
        let identifier = TokenIdentifier {
            expiry: add_duration(self.clock.now(), self.params.token_lifetime),
            key_id: ring.current.key_id(),
            scope: block.scope.clone(),
            block_id: block.block_id,
            modes: modes.clone(),
            storage_types: storage_types.to_vec(),
            storage_ids: storage_ids.to_vec(),
            block_alias: block_alias.to_vec(),
        };
        let identifier = identifier.encode(self.params.encoding)?;

        let mut mac = keyed_mac(ring.current.material(), "generate_token")?;
        mac.update(&identifier);
        let password = mac.finalize().into_bytes().to_vec();

        Ok(AccessToken::new(identifier, password, self.params.scope.clone()))
    }

    fn generate_encryption_key(&self) -> EncryptionKey {
        let nonce = SecureBytes::random(ENCRYPTION_KEY_NONCE_LEN).as_bytes().to_vec();
        let now = self.clock.now();
        let ring = self.ring.read().unwrap_or_else(PoisonError::into_inner);
        let current = &ring.current;

        let headroom = remaining(now, current.expiry());
        if headroom < self.params.key_update_interval + self.params.token_lifetime {
            log::warn!(
                "Deriving encryption key for {} from block key {} with only {:?} left before it expires",
                self.params.scope,
                current.key_id(),
                headroom
            );
        }

        let key = derive_transfer_key(
            current.material(),
            &nonce,
            &self.params.scope,
            self.params.algorithm,
        );
        EncryptionKey::new(
            current.key_id(),
            self.params.scope.clone(),
            nonce,
            key,
            add_duration(now, self.params.token_lifetime),
            self.params.algorithm,
        )
    }
}

fn keyed_mac(material: &SecureBytes, operation: &str) -> KeyResult<HmacSha256> {
    <HmacSha256 as Mac>::new_from_slice(material.as_bytes()).map_err(|e| {
        KeyError::key_material(operation, &e.to_string(), error_codes::KEY_DERIVATION_FAILED)
    })
}

fn derive_transfer_key(
    material: &SecureBytes,
    nonce: &[u8],
    scope: &str,
    algorithm: EncryptionAlgorithm,
) -> SecureBytes {
    let hk = Hkdf::<Sha256>::new(Some(nonce), material.as_bytes());
    let mut okm = vec![0u8; algorithm.key_len()];
    let info: [&[u8]; 5] = [
        TRANSFER_KEY_INFO,
        b"/",
        scope.as_bytes(),
        b"/",
        algorithm.as_str().as_bytes(),
    ];
    hk.expand_multi_info(&info, &mut okm)
        .expect("transfer key length is within the HKDF-SHA256 output limit");
    SecureBytes::from(okm)
}
