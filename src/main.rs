use std::sync::Arc;
use std::time::Duration;

use blockguard::prelude::*;

#[tokio::main]
async fn main() -> KeyResult<()> {
    println!("Starting blockguard key manager demo...");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let authority = Arc::new(LocalKeyAuthority::new(
        Duration::from_secs(600),
        Duration::from_secs(120),
        clock.clone(),
    )?);
    let config = TransferSecurityConfig::from_json_str(
        r#"{ "encryption_algorithm": "chacha20-poly1305", "compact_token_encoding": true }"#,
    )?;

    let manager = KeyManager::with_clock("BP-demo", authority.clone(), true, &config, clock).await?;
    manager.start_refresher()?;
    println!(
        "Key manager running for {} (refresh every {:?})",
        manager.scope(),
        manager.refresh_period().unwrap_or_default()
    );

    // Mint a token and check it the way the receiving node would
    let block = BlockRef::new("BP-demo", 1_073_741_825, 1001);
    let token = manager.get_access_token(&block, &[StorageType::Disk], &["DS-1".to_string()], &[])?;
    println!("Access token: {}", token.encode_url_string());

    if let Some(store) = manager.secret_store() {
        store.check_access(&token, &block, AccessMode::Copy)?;
        println!("✓ Token grants copy access to {}", block);
        match store.check_access(&token, &block, AccessMode::Write) {
            Ok(()) => println!("✗ Token unexpectedly grants write access"),
            Err(e) => println!("✓ Write access refused: {}", e.user_friendly_message()),
        }
    }

    // Encrypt a packet with the transfer key
    if let Some(key) = manager.new_encryption_key() {
        println!("Encryption key {:?}", key);
        let cipher = TransferCipher::new(&key)?;
        let sealed = cipher.seal(b"block payload", block.to_string().as_bytes())?;
        let opened = cipher.open(&sealed, block.to_string().as_bytes())?;
        println!(
            "Sealed {} bytes into {} bytes, round trip ok: {}",
            opened.len(),
            sealed.len(),
            opened == b"block payload"
        );
    }

    if let Some(rotated) = authority.rotate() {
        println!("Authority rotated to block key {}", rotated);
    }

    manager.close();
    manager.wait_for_refresher().await;
    println!("Key manager state: {:?}", manager.run_state());
    if let Some(health) = manager.refresh_health() {
        println!("Refresher health: {:?}", health);
    }

    Ok(())
}
