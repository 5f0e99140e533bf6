//! Secure Memory Handling Utilities
//!
//! Block keys and derived transfer keys are held in [`SecureBytes`], which
//! zeroes its contents when dropped and never prints them.

use std::fmt;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// A container for sensitive byte data such as block key material or
/// derived encryption keys. It automatically zeroes the memory when dropped.
///
/// # Security Properties
///
/// 1. Automatically zeroes memory when dropped
/// 2. Prevents contents from being inadvertently logged or displayed
/// 3. Compares contents in constant time
///
/// # Example
///
/// ```
/// use blockguard::secure_memory::SecureBytes;
///
/// let key = SecureBytes::new(&[0x01, 0x02, 0x03, 0x04]);
/// assert_eq!(key.len(), 4);
/// assert_eq!(format!("{:?}", key), "SecureBytes([REDACTED; 4])");
/// ```
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecureBytes {
    bytes: Vec<u8>,
}

impl SecureBytes {
    /// Create a new SecureBytes holding a copy of `data`
    pub fn new(data: &[u8]) -> Self {
        Self {
            bytes: data.to_vec(),
        }
    }

    /// Create a SecureBytes filled with `len` bytes from the OS random source
    pub fn random(len: usize) -> Self {
        use rand::RngCore;

        let mut bytes = vec![0u8; len];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Get a reference to the underlying bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Get the current length of the buffer in bytes
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Check if the buffer is empty
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Hex of the first four bytes of the SHA-256 digest, safe to put in logs
    pub fn fingerprint(&self) -> String {
        use sha2::{Digest, Sha256};

        let digest = Sha256::digest(&self.bytes);
        hex::encode(&digest[..4])
    }
}

impl From<Vec<u8>> for SecureBytes {
    fn from(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }
}

impl AsRef<[u8]> for SecureBytes {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

impl PartialEq for SecureBytes {
    fn eq(&self, other: &Self) -> bool {
        self.bytes.ct_eq(&other.bytes).into()
    }
}

impl Eq for SecureBytes {}

impl fmt::Debug for SecureBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecureBytes([REDACTED; {}])", self.bytes.len())
    }
}
