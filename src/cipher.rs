/*!
 * Transfer Cipher
 *
 * Seals and opens block data with a transfer [`EncryptionKey`], using the
 * algorithm recorded in the key.
 */

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng, Payload};
use aes_gcm::Aes256Gcm;
use chacha20poly1305::ChaCha20Poly1305;

use crate::config::EncryptionAlgorithm;
use crate::error::{error_codes, KeyError, KeyResult};
use crate::keys::EncryptionKey;

/// Nonce length shared by both supported algorithms
pub const NONCE_LEN: usize = 12;

enum Inner {
    Aes(Aes256Gcm),
    ChaCha(ChaCha20Poly1305),
}

/// AEAD cipher bound to one transfer encryption key.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use std::time::Duration;
/// use blockguard::cipher::TransferCipher;
/// use blockguard::clock::{Clock, SystemClock};
/// use blockguard::config::EncryptionAlgorithm;
/// use blockguard::keys::{HmacSecretStore, LocalKeyAuthority, SecretStore, StoreParams, TokenEncoding};
///
/// let clock: Arc<dyn Clock> = Arc::new(SystemClock);
/// let authority = LocalKeyAuthority::new(
///     Duration::from_secs(3600),
///     Duration::from_secs(600),
///     clock.clone(),
/// ).unwrap();
/// let params = StoreParams {
///     scope: "BP-1".to_string(),
///     key_update_interval: Duration::from_secs(3600),
///     token_lifetime: Duration::from_secs(600),
///     algorithm: EncryptionAlgorithm::ChaCha20Poly1305,
///     encoding: TokenEncoding::Legacy,
/// };
/// let store = HmacSecretStore::seed(params, authority.export_keys(), clock).unwrap();
///
/// let cipher = TransferCipher::new(&store.generate_encryption_key()).unwrap();
/// let sealed = cipher.seal(b"block data", b"blk_1").unwrap();
/// assert_eq!(cipher.open(&sealed, b"blk_1").unwrap(), b"block data");
/// ```
pub struct TransferCipher {
    inner: Inner,
    algorithm: EncryptionAlgorithm,
}

impl std::fmt::Debug for TransferCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferCipher")
            .field("algorithm", &self.algorithm)
            .finish()
    }
}

impl TransferCipher {
    /// Create a cipher for `key`
    ///
    /// # Errors
    ///
    /// Returns an error if the key bytes have the wrong length for the
    /// key's algorithm
    pub fn new(key: &EncryptionKey) -> KeyResult<Self> {
        let bytes = key.key().as_bytes();
        let invalid = |_| {
            KeyError::cipher_error(
                "new",
                &format!("{} needs a 32-byte key, got {}", key.algorithm(), bytes.len()),
                error_codes::CIPHER_INIT_FAILED,
            )
        };
        let inner = match key.algorithm() {
            EncryptionAlgorithm::Aes256Gcm => {
                Inner::Aes(Aes256Gcm::new_from_slice(bytes).map_err(invalid)?)
            }
            EncryptionAlgorithm::ChaCha20Poly1305 => {
                Inner::ChaCha(ChaCha20Poly1305::new_from_slice(bytes).map_err(invalid)?)
            }
        };
        Ok(Self {
            inner,
            algorithm: key.algorithm(),
        })
    }

    pub fn algorithm(&self) -> EncryptionAlgorithm {
        self.algorithm
    }

    /// Encrypt `plaintext`, authenticating `aad` alongside it.
    ///
    /// The output is the random nonce followed by the ciphertext and tag.
    pub fn seal(&self, plaintext: &[u8], aad: &[u8]) -> KeyResult<Vec<u8>> {
        let payload = Payload { msg: plaintext, aad };
        let (nonce, ciphertext) = match &self.inner {
            Inner::Aes(cipher) => {
                let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
                (nonce.to_vec(), cipher.encrypt(&nonce, payload))
            }
            Inner::ChaCha(cipher) => {
                let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
                (nonce.to_vec(), cipher.encrypt(&nonce, payload))
            }
        };
        let ciphertext = ciphertext.map_err(|_| {
            KeyError::cipher_error("seal", "encryption failed", error_codes::CIPHER_SEAL_FAILED)
        })?;

        let mut sealed = nonce;
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    /// Decrypt output of [`TransferCipher::seal`]
    ///
    /// # Errors
    ///
    /// Returns an error if the input is truncated, was sealed under another
    /// key, or was tampered with
    pub fn open(&self, sealed: &[u8], aad: &[u8]) -> KeyResult<Vec<u8>> {
        if sealed.len() < NONCE_LEN {
            return Err(KeyError::cipher_error(
                "open",
                &format!("sealed data is {} bytes, shorter than a nonce", sealed.len()),
                error_codes::CIPHER_OPEN_FAILED,
            ));
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        let payload = Payload {
            msg: ciphertext,
            aad,
        };
        let plaintext = match &self.inner {
            Inner::Aes(cipher) => cipher.decrypt(nonce.into(), payload),
            Inner::ChaCha(cipher) => cipher.decrypt(nonce.into(), payload),
        };
        plaintext.map_err(|_| {
            KeyError::cipher_error(
                "open",
                "authentication failed",
                error_codes::CIPHER_OPEN_FAILED,
            )
        })
    }
}
