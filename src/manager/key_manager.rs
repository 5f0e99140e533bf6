/*!
 * Key Manager
 *
 * The key manager is what data-transfer code talks to. It fetches the block
 * key set once at construction and then either runs stateless (token
 * security disabled) or owns a secret store, a cached transfer encryption
 * key, and a refresher that keeps the store's keys current.
 */

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::clock::{Clock, SystemClock};
use crate::config::TransferSecurityConfig;
use crate::error::{KeyError, KeyResult};
use crate::keys::{
    AccessMode, AccessModes, AccessToken, BlockRef, EncryptionKey, HmacSecretStore, KeySource,
    SecretStore, StorageType, StoreParams, TokenEncoding,
};
use crate::manager::refresher::{KeyRefresher, RefreshHealth, RefreshHealthSnapshot};
use crate::manager::run_state::{Lifecycle, RunState};

enum RefresherSlot<S: SecretStore> {
    Idle(KeyRefresher<S>),
    Started(JoinHandle<()>),
    Vacant,
}

/// State that only exists when token security is enabled
struct Secured<S: SecretStore> {
    store: Arc<S>,
    health: Arc<RefreshHealth>,
    period: Duration,
    refresher: Mutex<RefresherSlot<S>>,
}

/// Issues block access tokens and data-transfer encryption keys for one
/// block pool.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use std::time::Duration;
/// use blockguard::clock::SystemClock;
/// use blockguard::config::TransferSecurityConfig;
/// use blockguard::keys::{BlockRef, LocalKeyAuthority, StorageType};
/// use blockguard::manager::KeyManager;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), blockguard::KeyError> {
/// let authority = Arc::new(LocalKeyAuthority::new(
///     Duration::from_secs(3600),
///     Duration::from_secs(600),
///     Arc::new(SystemClock),
/// )?);
/// let manager = KeyManager::new("BP-1", authority, true, &TransferSecurityConfig::default()).await?;
/// manager.start_refresher()?;
///
/// let token = manager.get_access_token(
///     &BlockRef::new("BP-1", 1, 1001),
///     &[StorageType::Disk],
///     &["DS-1".to_string()],
///     &[],
/// )?;
/// assert!(!token.is_disabled());
/// assert!(manager.new_encryption_key().is_some());
///
/// manager.close();
/// # Ok(())
/// # }
/// ```
pub struct KeyManager<S: SecretStore = HmacSecretStore> {
    scope: String,
    encrypt_data_transfer: bool,
    clock: Arc<dyn Clock>,
    lifecycle: Arc<Lifecycle>,
    secured: Option<Secured<S>>,
    encryption_key: Mutex<Option<EncryptionKey>>,
}

impl KeyManager<HmacSecretStore> {
    /// Create a key manager for `scope` using the system clock
    ///
    /// # Arguments
    ///
    /// * `scope` - Block pool id the manager issues tokens and keys for
    /// * `source` - Authoritative source of block keys
    /// * `encrypt_data_transfer` - Whether callers want transfer encryption keys
    /// * `config` - Encryption algorithm and token encoding settings
    ///
    /// # Errors
    ///
    /// Returns an error if the initial key fetch fails or the fetched key set
    /// cannot be used
    pub async fn new(
        scope: &str,
        source: Arc<dyn KeySource>,
        encrypt_data_transfer: bool,
        config: &TransferSecurityConfig,
    ) -> KeyResult<Self> {
        Self::with_clock(scope, source, encrypt_data_transfer, config, Arc::new(SystemClock)).await
    }

    /// Create a key manager that reads time from `clock`
    pub async fn with_clock(
        scope: &str,
        source: Arc<dyn KeySource>,
        encrypt_data_transfer: bool,
        config: &TransferSecurityConfig,
        clock: Arc<dyn Clock>,
    ) -> KeyResult<Self> {
        Self::with_store(scope, source, encrypt_data_transfer, config, clock).await
    }
}

impl<S: SecretStore> KeyManager<S> {
    /// Create a key manager backed by secret store type `S`
    pub async fn with_store(
        scope: &str,
        source: Arc<dyn KeySource>,
        encrypt_data_transfer: bool,
        config: &TransferSecurityConfig,
        clock: Arc<dyn Clock>,
    ) -> KeyResult<Self> {
        let keys = source.fetch_keys().await?;
        let lifecycle = Arc::new(Lifecycle::new());

        if !keys.token_security_enabled {
            log::info!("Block token security is disabled for {}", scope);
            if encrypt_data_transfer {
                log::warn!(
                    "Data transfer encryption requested for {} but block tokens are disabled; no encryption keys will be issued",
                    scope
                );
            }
            return Ok(Self {
                scope: scope.to_string(),
                encrypt_data_transfer,
                clock,
                lifecycle,
                secured: None,
                encryption_key: Mutex::new(None),
            });
        }

        if keys.key_update_interval.is_zero() || keys.token_lifetime.is_zero() {
            return Err(KeyError::invalid_parameter(
                "key_set",
                "non-zero key update interval and token lifetime",
                &format!(
                    "interval={:?}, lifetime={:?}",
                    keys.key_update_interval, keys.token_lifetime
                ),
            ));
        }
        log::info!(
            "Block token params received for {}: update interval={:?}, token lifetime={:?}",
            scope,
            keys.key_update_interval,
            keys.token_lifetime
        );

        let params = StoreParams {
            scope: scope.to_string(),
            key_update_interval: keys.key_update_interval,
            token_lifetime: keys.token_lifetime,
            algorithm: config.encryption_algorithm,
            encoding: TokenEncoding::from_compact_flag(config.compact_token_encoding),
        };
        // Sync block keys more often than the source rotates them.
        let period = keys.refresh_period();
        let store = Arc::new(S::seed(params, keys, clock.clone())?);
        let health = Arc::new(RefreshHealth::default());
        let refresher = KeyRefresher::new(
            scope.to_string(),
            source,
            store.clone(),
            lifecycle.clone(),
            health.clone(),
            clock.clone(),
            period,
        );
        lifecycle.mark_running();

        Ok(Self {
            scope: scope.to_string(),
            encrypt_data_transfer,
            clock,
            lifecycle,
            secured: Some(Secured {
                store,
                health,
                period,
                refresher: Mutex::new(RefresherSlot::Idle(refresher)),
            }),
            encryption_key: Mutex::new(None),
        })
    }

    /// Start the background key refresher on the current tokio runtime.
    ///
    /// Does nothing when token security is disabled or the refresher has
    /// already been started.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::RuntimeUnavailable`] when called outside a tokio
    /// runtime
    pub fn start_refresher(&self) -> KeyResult<()> {
        let Some(secured) = &self.secured else {
            return Ok(());
        };
        let handle =
            Handle::try_current().map_err(|e| KeyError::RuntimeUnavailable(e.to_string()))?;

        let mut slot = secured
            .refresher
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match std::mem::replace(&mut *slot, RefresherSlot::Vacant) {
            RefresherSlot::Idle(refresher) => {
                *slot = RefresherSlot::Started(refresher.spawn(&handle));
            }
            other => {
                log::warn!(
                    "Block key refresher for {} was already started or the manager is closed",
                    self.scope
                );
                *slot = other;
            }
        }
        Ok(())
    }

    /// Get an access token for a block, granting replace and copy access.
    ///
    /// With token security disabled this always returns the disabled
    /// sentinel.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::NotRunning`] once the manager has been closed or
    /// its refresher has died
    pub fn get_access_token(
        &self,
        block: &BlockRef,
        storage_types: &[StorageType],
        storage_ids: &[String],
        block_alias: &[u8],
    ) -> KeyResult<AccessToken> {
        let Some(secured) = &self.secured else {
            return Ok(AccessToken::disabled());
        };
        if !self.lifecycle.is_running() {
            return Err(KeyError::not_running(&self.scope));
        }
        let modes: AccessModes = [AccessMode::Replace, AccessMode::Copy].into_iter().collect();
        secured
            .store
            .generate_token(block, &modes, storage_types, storage_ids, block_alias)
    }

    /// Get the transfer encryption key, deriving a new one if the cached key
    /// is missing or expired.
    ///
    /// Returns `None` when transfer encryption was not requested or token
    /// security is disabled. The run state is not consulted.
    pub fn new_encryption_key(&self) -> Option<EncryptionKey> {
        if !self.encrypt_data_transfer {
            return None;
        }
        let secured = self.secured.as_ref()?;

        let mut cached = self
            .encryption_key
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let now = self.clock.now();
        let regenerate = match cached.as_ref() {
            None => {
                log::debug!(
                    "Generating new data encryption key for {} because current key is absent",
                    self.scope
                );
                true
            }
            Some(key) if key.is_expired_at(now) => {
                log::debug!(
                    "Generating new data encryption key for {} because current key expired on {}",
                    self.scope,
                    key.expiry()
                );
                true
            }
            Some(_) => false,
        };
        if regenerate {
            // The block key behind a live encryption key keeps at least one
            // update interval of life, so the receiving side can re-derive it.
            *cached = Some(secured.store.generate_encryption_key());
        }
        cached.clone()
    }

    /// Stop issuing access tokens and ask the refresher to stop.
    ///
    /// Returns without waiting for the refresher to exit and never fails.
    pub fn close(&self) {
        let previous = self.lifecycle.stop();
        let Some(secured) = &self.secured else {
            return;
        };

        match secured.refresher.lock() {
            Ok(mut slot) => {
                if let RefresherSlot::Idle(_) = &*slot {
                    *slot = RefresherSlot::Vacant;
                }
                if previous == RunState::Running {
                    log::debug!("Requested block key refresher for {} to stop", self.scope);
                }
            }
            Err(e) => {
                log::warn!(
                    "Exception shutting down block key refresher for {}: {}",
                    self.scope,
                    e
                );
            }
        }
    }

    /// Wait for a started refresher to finish.
    ///
    /// Returns immediately if the refresher was never started or has already
    /// been waited for.
    pub async fn wait_for_refresher(&self) {
        let Some(secured) = &self.secured else {
            return;
        };
        let handle = {
            let mut slot = secured
                .refresher
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            match std::mem::replace(&mut *slot, RefresherSlot::Vacant) {
                RefresherSlot::Started(handle) => handle,
                other => {
                    *slot = other;
                    return;
                }
            }
        };
        if let Err(e) = handle.await {
            log::warn!("Block key refresher supervisor for {} failed: {}", self.scope, e);
        }
    }

    /// Block pool this manager serves
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Whether block access tokens are in use
    pub fn is_token_security_enabled(&self) -> bool {
        self.secured.is_some()
    }

    /// Whether transfer encryption keys were requested
    pub fn encrypts_data_transfer(&self) -> bool {
        self.encrypt_data_transfer
    }

    /// Current lifecycle state
    pub fn run_state(&self) -> RunState {
        self.lifecycle.state()
    }

    /// Polling period of the refresher, when token security is enabled
    pub fn refresh_period(&self) -> Option<Duration> {
        self.secured.as_ref().map(|secured| secured.period)
    }

    /// Health of the refresher, when token security is enabled
    pub fn refresh_health(&self) -> Option<RefreshHealthSnapshot> {
        self.secured.as_ref().map(|secured| secured.health.snapshot())
    }

    /// The secret store, when token security is enabled
    pub fn secret_store(&self) -> Option<&Arc<S>> {
        self.secured.as_ref().map(|secured| &secured.store)
    }
}

impl<S: SecretStore> Drop for KeyManager<S> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<S: SecretStore> std::fmt::Debug for KeyManager<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyManager")
            .field("scope", &self.scope)
            .field("token_security_enabled", &self.secured.is_some())
            .field("encrypt_data_transfer", &self.encrypt_data_transfer)
            .field("run_state", &self.lifecycle.state())
            .finish()
    }
}
