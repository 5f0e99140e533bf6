// Shared fixtures for the key manager integration tests

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use blockguard::clock::{Clock, ManualClock};
use blockguard::config::TransferSecurityConfig;
use blockguard::error::{error_codes, KeyError, KeyResult};
use blockguard::keys::{
    AccessModes, AccessToken, BlockRef, EncryptionKey, HmacSecretStore, KeySet, KeySource,
    LocalKeyAuthority, SecretStore, StorageType, StoreParams,
};
use blockguard::manager::KeyManager;

pub const INTERVAL: Duration = Duration::from_secs(3600);
pub const LIFETIME: Duration = Duration::from_secs(600);
pub const SCOPE: &str = "BP-1";
pub const STALL: Duration = Duration::from_secs(100);

pub fn manual_clock() -> (Arc<ManualClock>, Arc<dyn Clock>) {
    let clock = Arc::new(ManualClock::at_epoch());
    let dyn_clock: Arc<dyn Clock> = clock.clone();
    (clock, dyn_clock)
}

pub fn block() -> BlockRef {
    BlockRef::new(SCOPE, 1073741825, 1001)
}

/// Key source backed by a local authority whose fetches can be scripted to
/// fail, panic, return garbage or stall by their 1-based fetch number
#[derive(Debug)]
pub struct ScriptedSource {
    pub authority: LocalKeyAuthority,
    fetches: AtomicUsize,
    fail_on: Mutex<BTreeSet<usize>>,
    panic_on: Mutex<BTreeSet<usize>>,
    corrupt_on: Mutex<BTreeSet<usize>>,
    stall_on: Mutex<BTreeSet<usize>>,
}

impl ScriptedSource {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_authority(LocalKeyAuthority::new(INTERVAL, LIFETIME, clock).unwrap())
    }

    pub fn with_authority(authority: LocalKeyAuthority) -> Self {
        Self {
            authority,
            fetches: AtomicUsize::new(0),
            fail_on: Mutex::new(BTreeSet::new()),
            panic_on: Mutex::new(BTreeSet::new()),
            corrupt_on: Mutex::new(BTreeSet::new()),
            stall_on: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn fail_on(&self, fetch: usize) {
        self.fail_on.lock().unwrap().insert(fetch);
    }

    pub fn panic_on(&self, fetch: usize) {
        self.panic_on.lock().unwrap().insert(fetch);
    }

    pub fn corrupt_on(&self, fetch: usize) {
        self.corrupt_on.lock().unwrap().insert(fetch);
    }

    /// The fetch sleeps this long before answering
    pub fn stall_on(&self, fetch: usize) {
        self.stall_on.lock().unwrap().insert(fetch);
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeySource for ScriptedSource {
    fn name(&self) -> &str {
        "scripted source"
    }

    async fn fetch_keys(&self) -> KeyResult<KeySet> {
        let fetch = self.fetches.fetch_add(1, Ordering::SeqCst) + 1;
        let panics = self.panic_on.lock().unwrap().contains(&fetch);
        let fails = self.fail_on.lock().unwrap().contains(&fetch);
        let corrupt = self.corrupt_on.lock().unwrap().contains(&fetch);
        let stall = self.stall_on.lock().unwrap().contains(&fetch);
        if panics {
            panic!("scripted panic on fetch {}", fetch);
        }
        if fails {
            return Err(KeyError::fetch_failed(
                "scripted source",
                &format!("scripted failure on fetch {}", fetch),
            ));
        }
        if corrupt {
            return Err(KeyError::SerializationError(format!(
                "scripted corrupt key set on fetch {}",
                fetch
            )));
        }
        if stall {
            tokio::time::sleep(STALL).await;
        }
        Ok(self.authority.export_keys())
    }
}

/// Secret store that counts encryption key derivations and can be told to
/// reject incoming key sets
#[derive(Debug)]
pub struct CountingStore {
    inner: HmacSecretStore,
    derivations: AtomicUsize,
    reject_transient: AtomicBool,
    reject_fatal: AtomicBool,
}

impl CountingStore {
    pub fn inner(&self) -> &HmacSecretStore {
        &self.inner
    }

    pub fn derivations(&self) -> usize {
        self.derivations.load(Ordering::SeqCst)
    }

    pub fn reject_transient(&self, reject: bool) {
        self.reject_transient.store(reject, Ordering::SeqCst);
    }

    pub fn reject_fatal(&self, reject: bool) {
        self.reject_fatal.store(reject, Ordering::SeqCst);
    }
}

impl SecretStore for CountingStore {
    fn seed(params: StoreParams, keys: KeySet, clock: Arc<dyn Clock>) -> KeyResult<Self> {
        Ok(Self {
            inner: HmacSecretStore::seed(params, keys, clock)?,
            derivations: AtomicUsize::new(0),
            reject_transient: AtomicBool::new(false),
            reject_fatal: AtomicBool::new(false),
        })
    }

    fn add_keys(&self, keys: KeySet) -> KeyResult<()> {
        if self.reject_fatal.load(Ordering::SeqCst) {
            return Err(KeyError::key_material(
                "add_keys",
                "key ring is corrupted",
                error_codes::KEY_DERIVATION_FAILED,
            ));
        }
        if self.reject_transient.load(Ordering::SeqCst) {
            return Err(KeyError::IoError("disk full".to_string()));
        }
        self.inner.add_keys(keys)
    }

    fn generate_token(
        &self,
        block: &BlockRef,
        modes: &AccessModes,
        storage_types: &[StorageType],
        storage_ids: &[String],
        block_alias: &[u8],
    ) -> KeyResult<AccessToken> {
        self.inner
            .generate_token(block, modes, storage_types, storage_ids, block_alias)
    }

    fn generate_encryption_key(&self) -> EncryptionKey {
        self.derivations.fetch_add(1, Ordering::SeqCst);
        self.inner.generate_encryption_key()
    }
}

/// An enabled manager over a scripted source and a counting store
pub async fn counting_manager(
    encrypt: bool,
) -> (Arc<ManualClock>, Arc<ScriptedSource>, KeyManager<CountingStore>) {
    let (manual, clock) = manual_clock();
    let source = Arc::new(ScriptedSource::new(clock.clone()));
    let manager = KeyManager::<CountingStore>::with_store(
        SCOPE,
        source.clone(),
        encrypt,
        &TransferSecurityConfig::default(),
        clock,
    )
    .await
    .unwrap();
    (manual, source, manager)
}

pub fn counting_store(manager: &KeyManager<CountingStore>) -> &CountingStore {
    manager.secret_store().unwrap().as_ref()
}
