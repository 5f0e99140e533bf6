/*!
 * Block Access Tokens
 *
 * An access token is an identifier describing what the bearer may do with one
 * block, plus a password that is the HMAC of the identifier under a block key.
 */

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{error_codes, KeyError, KeyResult};

/// Token kind carried by every block access token
pub const BLOCK_TOKEN_KIND: &str = "BLOCK_ACCESS_TOKEN";

const LEGACY_TAG: u8 = 0x00;
const COMPACT_TAG: u8 = 0x01;

/// Operation a token authorizes on a block
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AccessMode {
    Read,
    Write,
    Copy,
    Replace,
}

/// Set of modes a token authorizes
pub type AccessModes = BTreeSet<AccessMode>;

/// Storage medium of a block replica
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StorageType {
    RamDisk,
    Ssd,
    Disk,
    Archive,
    Provided,
    Nvdimm,
}

/// Reference to one block of one block pool
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockRef {
    /// Block pool the block belongs to
    pub scope: String,
    pub block_id: u64,
    pub generation_stamp: u64,
}

impl BlockRef {
    pub fn new(scope: impl Into<String>, block_id: u64, generation_stamp: u64) -> Self {
        Self {
            scope: scope.into(),
            block_id,
            generation_stamp,
        }
    }
}

impl fmt::Display for BlockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:blk_{}_{}", self.scope, self.block_id, self.generation_stamp)
    }
}

/// The signed part of an access token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenIdentifier {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub expiry: DateTime<Utc>,
    pub key_id: u32,
    pub scope: String,
    pub block_id: u64,
    pub modes: AccessModes,
    pub storage_types: Vec<StorageType>,
    pub storage_ids: Vec<String>,
    pub block_alias: Vec<u8>,
}

/// Wire form of a token identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TokenEncoding {
    /// Self-describing JSON
    #[default]
    Legacy,
    /// Fixed-layout binary
    Compact,
}

impl TokenEncoding {
    /// Pick the encoding from the `compact_token_encoding` configuration flag
    pub fn from_compact_flag(compact: bool) -> Self {
        if compact {
            TokenEncoding::Compact
        } else {
            TokenEncoding::Legacy
        }
    }
}

impl TokenIdentifier {
    /// Serialize the identifier, prefixed with a tag naming the encoding
    pub fn encode(&self, encoding: TokenEncoding) -> KeyResult<Vec<u8>> {
        let (tag, body) = match encoding {
            TokenEncoding::Legacy => (LEGACY_TAG, serde_json::to_vec(self)?),
            TokenEncoding::Compact => (COMPACT_TAG, bincode::serialize(self)?),
        };
        let mut bytes = Vec::with_capacity(body.len() + 1);
        bytes.push(tag);
        bytes.extend_from_slice(&body);
        Ok(bytes)
    }

    /// Parse an identifier in either encoding
    pub fn decode(bytes: &[u8]) -> KeyResult<Self> {
        match bytes.split_first() {
            Some((&LEGACY_TAG, body)) => Ok(serde_json::from_slice(body)?),
            Some((&COMPACT_TAG, body)) => Ok(bincode::deserialize(body)?),
            Some((tag, _)) => Err(KeyError::token_rejected(
                &format!("unknown identifier encoding tag {:#04x}", tag),
                error_codes::TOKEN_MALFORMED,
            )),
            None => Err(KeyError::token_rejected(
                "empty token identifier",
                error_codes::TOKEN_MALFORMED,
            )),
        }
    }
}

/// A block access token.
///
/// Callers of the key manager treat the token as opaque and hand it to the
/// data-transfer layer unchanged.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    identifier: Vec<u8>,
    password: Vec<u8>,
    kind: String,
    service: String,
}

impl AccessToken {
    pub(crate) fn new(identifier: Vec<u8>, password: Vec<u8>, service: String) -> Self {
        Self {
            identifier,
            password,
            kind: BLOCK_TOKEN_KIND.to_string(),
            service,
        }
    }

    /// The token handed out when token security is disabled
    pub fn disabled() -> Self {
        Self {
            identifier: Vec::new(),
            password: Vec::new(),
            kind: String::new(),
            service: String::new(),
        }
    }

    /// Whether this is the disabled sentinel
    pub fn is_disabled(&self) -> bool {
        self.identifier.is_empty() && self.password.is_empty() && self.kind.is_empty()
    }

    pub fn identifier(&self) -> &[u8] {
        &self.identifier
    }

    pub fn password(&self) -> &[u8] {
        &self.password
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Decode the identifier of an enabled token
    pub fn decode_identifier(&self) -> KeyResult<TokenIdentifier> {
        TokenIdentifier::decode(&self.identifier)
    }

    /// Encode the token as a URL-safe string.
    ///
    /// The four fields are base64 encoded and joined with `.`.
    pub fn encode_url_string(&self) -> String {
        [
            self.identifier.as_slice(),
            self.password.as_slice(),
            self.kind.as_bytes(),
            self.service.as_bytes(),
        ]
        .iter()
        .map(|part| base64::encode_config(part, base64::URL_SAFE_NO_PAD))
        .collect::<Vec<_>>()
        .join(".")
    }

    /// Parse a token produced by [`AccessToken::encode_url_string`]
    pub fn decode_url_string(encoded: &str) -> KeyResult<Self> {
        let parts = encoded
            .split('.')
            .map(|part| {
                base64::decode_config(part, base64::URL_SAFE_NO_PAD).map_err(|e| {
                    KeyError::token_rejected(
                        &format!("invalid base64 segment: {}", e),
                        error_codes::TOKEN_MALFORMED,
                    )
                })
            })
            .collect::<KeyResult<Vec<_>>>()?;

        let [identifier, password, kind, service]: [Vec<u8>; 4] =
            parts.try_into().map_err(|parts: Vec<Vec<u8>>| {
                KeyError::token_rejected(
                    &format!("expected 4 token segments, found {}", parts.len()),
                    error_codes::TOKEN_MALFORMED,
                )
            })?;

        let text = |bytes: Vec<u8>| {
            String::from_utf8(bytes).map_err(|_| {
                KeyError::token_rejected("token text is not UTF-8", error_codes::TOKEN_MALFORMED)
            })
        };

        Ok(Self {
            identifier,
            password,
            kind: text(kind)?,
            service: text(service)?,
        })
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("identifier", &hex::encode(&self.identifier))
            .field("password", &"[REDACTED]")
            .field("kind", &self.kind)
            .field("service", &self.service)
            .finish()
    }
}
