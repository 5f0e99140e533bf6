use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::*;
use crate::clock::{Clock, ManualClock};
use crate::config::{EncryptionAlgorithm, TransferSecurityConfig};
use crate::error::{error_codes, KeyError, KeyResult};
use crate::keys::{AccessMode, BlockRef, KeySet, KeySource, LocalKeyAuthority, StorageType};

const INTERVAL: Duration = Duration::from_secs(3600);
const LIFETIME: Duration = Duration::from_secs(600);

/// Source that always returns the same key set
struct FixedSource(KeySet);

#[async_trait]
impl KeySource for FixedSource {
    async fn fetch_keys(&self) -> KeyResult<KeySet> {
        Ok(self.0.clone())
    }
}

/// Source whose fetches always fail
struct UnreachableSource;

#[async_trait]
impl KeySource for UnreachableSource {
    fn name(&self) -> &str {
        "unreachable"
    }

    async fn fetch_keys(&self) -> KeyResult<KeySet> {
        Err(KeyError::fetch_failed("unreachable", "connection refused"))
    }
}

fn clock() -> (Arc<ManualClock>, Arc<dyn Clock>) {
    let clock = Arc::new(ManualClock::at_epoch());
    let dyn_clock: Arc<dyn Clock> = clock.clone();
    (clock, dyn_clock)
}

fn block() -> BlockRef {
    BlockRef::new("BP-1", 7, 1001)
}

async fn enabled_manager(encrypt: bool) -> (Arc<ManualClock>, KeyManager) {
    let (manual, clock) = clock();
    let authority = Arc::new(LocalKeyAuthority::new(INTERVAL, LIFETIME, clock.clone()).unwrap());
    let manager = KeyManager::with_clock(
        "BP-1",
        authority,
        encrypt,
        &TransferSecurityConfig::default(),
        clock,
    )
    .await
    .unwrap();
    (manual, manager)
}

#[tokio::test]
async fn test_enabled_manager_is_running() {
    let (_, manager) = enabled_manager(true).await;
    assert!(manager.is_token_security_enabled());
    assert!(manager.encrypts_data_transfer());
    assert_eq!(manager.scope(), "BP-1");
    assert_eq!(manager.run_state(), RunState::Running);
    assert_eq!(manager.refresh_period(), Some(Duration::from_secs(900)));
    assert!(manager.secret_store().is_some());

    let health = manager.refresh_health().unwrap();
    assert_eq!(health.successful_refreshes, 0);
    assert!(!health.failed);
}

#[tokio::test]
async fn test_disabled_manager_stays_not_started() {
    let (_, clock) = clock();
    let source = Arc::new(LocalKeyAuthority::disabled(clock.clone()));
    let manager = KeyManager::with_clock(
        "BP-1",
        source,
        true,
        &TransferSecurityConfig::default(),
        clock,
    )
    .await
    .unwrap();

    assert!(!manager.is_token_security_enabled());
    assert_eq!(manager.run_state(), RunState::NotStarted);
    assert!(manager.refresh_period().is_none());
    assert!(manager.refresh_health().is_none());
    assert!(manager.secret_store().is_none());
    manager.start_refresher().unwrap();

    let token = manager
        .get_access_token(&block(), &[StorageType::Disk], &[], &[])
        .unwrap();
    assert!(token.is_disabled());
    assert!(manager.new_encryption_key().is_none());

    manager.close();
    assert!(manager.get_access_token(&block(), &[], &[], &[]).unwrap().is_disabled());
}

#[tokio::test]
async fn test_construction_propagates_fetch_failure() {
    let (_, clock) = clock();
    let err = KeyManager::with_clock(
        "BP-1",
        Arc::new(UnreachableSource),
        false,
        &TransferSecurityConfig::default(),
        clock,
    )
    .await
    .unwrap_err();
    assert_eq!(err.error_code(), error_codes::FETCH_FAILED);
}

#[tokio::test]
async fn test_construction_rejects_zero_interval() {
    let (_, clock) = clock();
    let authority = LocalKeyAuthority::new(INTERVAL, LIFETIME, clock.clone()).unwrap();
    let mut keys = authority.export_keys();
    keys.key_update_interval = Duration::ZERO;

    let err = KeyManager::with_clock(
        "BP-1",
        Arc::new(FixedSource(keys)),
        false,
        &TransferSecurityConfig::default(),
        clock,
    )
    .await
    .unwrap_err();
    assert_eq!(err.error_code(), error_codes::INVALID_PARAMETER);
}

#[tokio::test]
async fn test_construction_rejects_missing_current_key() {
    let (_, clock) = clock();
    let authority = LocalKeyAuthority::new(INTERVAL, LIFETIME, clock.clone()).unwrap();
    let mut keys = authority.export_keys();
    keys.current_key = None;

    let err = KeyManager::with_clock(
        "BP-1",
        Arc::new(FixedSource(keys)),
        false,
        &TransferSecurityConfig::default(),
        clock,
    )
    .await
    .unwrap_err();
    assert_eq!(err.error_code(), error_codes::NO_CURRENT_KEY);
}

#[tokio::test]
async fn test_access_token_grants_replace_and_copy() {
    let (_, manager) = enabled_manager(false).await;
    let token = manager
        .get_access_token(&block(), &[StorageType::Ssd], &["DS-1".to_string()], b"alias")
        .unwrap();
    let identifier = token.decode_identifier().unwrap();
    assert_eq!(
        identifier.modes.into_iter().collect::<Vec<_>>(),
        vec![AccessMode::Copy, AccessMode::Replace]
    );
    assert_eq!(identifier.block_id, 7);
    assert_eq!(token.service(), "BP-1");

    let store = manager.secret_store().unwrap();
    store.check_access(&token, &block(), AccessMode::Copy).unwrap();
    assert!(store.check_access(&token, &block(), AccessMode::Read).is_err());
}

#[tokio::test]
async fn test_encryption_key_requires_encrypt_flag() {
    let (_, manager) = enabled_manager(false).await;
    assert!(manager.new_encryption_key().is_none());
}

#[tokio::test]
async fn test_config_selects_algorithm() {
    let (_, clock) = clock();
    let authority = Arc::new(LocalKeyAuthority::new(INTERVAL, LIFETIME, clock.clone()).unwrap());
    let config = TransferSecurityConfig::default()
        .with_algorithm_name("chacha20-poly1305")
        .unwrap();
    let manager = KeyManager::with_clock("BP-1", authority, true, &config, clock)
        .await
        .unwrap();
    let key = manager.new_encryption_key().unwrap();
    assert_eq!(key.algorithm(), EncryptionAlgorithm::ChaCha20Poly1305);
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let (_, manager) = enabled_manager(true).await;
    manager.start_refresher().unwrap();
    manager.close();
    manager.close();
    assert_eq!(manager.run_state(), RunState::Stopped);

    let err = manager.get_access_token(&block(), &[], &[], &[]).unwrap_err();
    assert_eq!(err.error_code(), error_codes::NOT_RUNNING);
    manager.wait_for_refresher().await;
    assert!(!manager.refresh_health().unwrap().failed);
}

#[tokio::test]
async fn test_second_start_is_a_no_op() {
    let (_, manager) = enabled_manager(false).await;
    manager.start_refresher().unwrap();
    manager.start_refresher().unwrap();
    manager.close();
    manager.wait_for_refresher().await;
    manager.wait_for_refresher().await;
}

#[tokio::test]
async fn test_close_before_start_never_spawns() {
    let (_, manager) = enabled_manager(false).await;
    manager.close();
    manager.start_refresher().unwrap();
    manager.wait_for_refresher().await;
    assert_eq!(manager.refresh_health().unwrap().successful_refreshes, 0);
}

#[test]
fn test_start_outside_runtime_fails() {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();
    let (_, manager) = runtime.block_on(enabled_manager(false));

    let err = manager.start_refresher().unwrap_err();
    assert!(matches!(err, KeyError::RuntimeUnavailable(_)));
    assert_eq!(err.error_code(), error_codes::RUNTIME_UNAVAILABLE);
}

#[tokio::test]
async fn test_debug_output() {
    let (_, manager) = enabled_manager(true).await;
    let debug = format!("{:?}", manager);
    assert!(debug.contains("BP-1"));
    assert!(debug.contains("Running"));
}
