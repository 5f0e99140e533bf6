#![no_main]

use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Duration;

use arbitrary::Arbitrary;
use blockguard::clock::{Clock, SystemClock};
use blockguard::config::EncryptionAlgorithm;
use blockguard::keys::{
    AccessMode, AccessToken, BlockRef, HmacSecretStore, LocalKeyAuthority, SecretStore,
    StoreParams, TokenEncoding, TokenIdentifier,
};
use libfuzzer_sys::fuzz_target;

#[derive(Arbitrary, Debug)]
enum TokenFuzzInput {
    Identifier(Vec<u8>),
    UrlString(String),
    Forged {
        identifier: Vec<u8>,
        password: Vec<u8>,
        block_id: u64,
        mode: u8,
    },
}

fn store() -> &'static HmacSecretStore {
    static STORE: OnceLock<HmacSecretStore> = OnceLock::new();
    STORE.get_or_init(|| {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let authority = LocalKeyAuthority::new(
            Duration::from_secs(3600),
            Duration::from_secs(600),
            clock.clone(),
        )
        .unwrap();
        let params = StoreParams {
            scope: "BP-fuzz".to_string(),
            key_update_interval: Duration::from_secs(3600),
            token_lifetime: Duration::from_secs(600),
            algorithm: EncryptionAlgorithm::Aes256Gcm,
            encoding: TokenEncoding::Compact,
        };
        HmacSecretStore::seed(params, authority.export_keys(), clock).unwrap()
    })
}

fuzz_target!(|input: TokenFuzzInput| {
    match input {
        TokenFuzzInput::Identifier(bytes) => {
            // Anything that decodes must survive re-encoding
            if let Ok(identifier) = TokenIdentifier::decode(&bytes) {
                for encoding in [TokenEncoding::Legacy, TokenEncoding::Compact] {
                    let encoded = identifier.encode(encoding).unwrap();
                    assert_eq!(TokenIdentifier::decode(&encoded).unwrap(), identifier);
                }
            }
        }
        TokenFuzzInput::UrlString(encoded) => {
            if let Ok(token) = AccessToken::decode_url_string(&encoded) {
                let _ = token.decode_identifier();
                let block = BlockRef::new("BP-fuzz", 1, 1);
                let _ = store().check_access(&token, &block, AccessMode::Read);
            }
        }
        TokenFuzzInput::Forged {
            identifier,
            password,
            block_id,
            mode,
        } => {
            // Tokens not minted by the store never verify
            let encoded = format!(
                "{}.{}.{}.{}",
                base64_url(&identifier),
                base64_url(&password),
                base64_url(b"BLOCK_ACCESS_TOKEN"),
                base64_url(b"BP-fuzz"),
            );
            if let Ok(token) = AccessToken::decode_url_string(&encoded) {
                let mode = match mode % 4 {
                    0 => AccessMode::Read,
                    1 => AccessMode::Write,
                    2 => AccessMode::Copy,
                    _ => AccessMode::Replace,
                };
                let block = BlockRef::new("BP-fuzz", block_id, 1);
                assert!(store().check_access(&token, &block, mode).is_err());
            }
        }
    }
});

fn base64_url(bytes: &[u8]) -> String {
    base64::encode_config(bytes, base64::URL_SAFE_NO_PAD)
}
