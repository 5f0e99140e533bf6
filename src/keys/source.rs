/*!
 * Authoritative Key Sources
 *
 * [`KeySource`] is the seam to the cluster coordinator. [`LocalKeyAuthority`]
 * is an in-process coordinator that generates and rotates block keys itself,
 * for single-process deployments and tests.
 */

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::clock::{add_duration, Clock};
use crate::error::{KeyError, KeyResult};
use crate::keys::{BlockKey, KeySet};
use crate::secure_memory::SecureBytes;

/// Length of generated block key material in bytes
pub const BLOCK_KEY_LEN: usize = 32;

/// The authoritative source of block keys
#[async_trait]
pub trait KeySource: Send + Sync {
    /// Name used in log lines and errors
    fn name(&self) -> &str {
        "key source"
    }

    /// Fetch the current key set
    async fn fetch_keys(&self) -> KeyResult<KeySet>;
}

#[derive(Debug)]
struct AuthorityState {
    next_key_id: u32,
    current_id: Option<u32>,
    activated_at: DateTime<Utc>,
    keys: BTreeMap<u32, BlockKey>,
}

/// In-process key authority.
///
/// The current key is replaced once `key_update_interval` has passed since it
/// was activated. Every key expires `3 * key_update_interval + token_lifetime`
/// after activation, which leaves a consumer refreshing every quarter interval
/// at least one full interval of headroom beyond any encryption key it
/// derives.
#[derive(Debug)]
pub struct LocalKeyAuthority {
    enabled: bool,
    key_update_interval: Duration,
    token_lifetime: Duration,
    clock: Arc<dyn Clock>,
    state: Mutex<AuthorityState>,
}

impl LocalKeyAuthority {
    /// Create an authority with token security enabled and an initial key
    pub fn new(
        key_update_interval: Duration,
        token_lifetime: Duration,
        clock: Arc<dyn Clock>,
    ) -> KeyResult<Self> {
        if key_update_interval.is_zero() {
            return Err(KeyError::invalid_parameter(
                "key_update_interval",
                "a non-zero duration",
                "0s",
            ));
        }
        if token_lifetime.is_zero() {
            return Err(KeyError::invalid_parameter(
                "token_lifetime",
                "a non-zero duration",
                "0s",
            ));
        }

        let now = clock.now();
        let authority = Self {
            enabled: true,
            key_update_interval,
            token_lifetime,
            clock,
            state: Mutex::new(AuthorityState {
                next_key_id: rand::random::<u32>() >> 1,
                current_id: None,
                activated_at: now,
                keys: BTreeMap::new(),
            }),
        };
        authority.rotate();
        Ok(authority)
    }

    /// Create an authority that reports token security as disabled
    pub fn disabled(clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        Self {
            enabled: false,
            key_update_interval: Duration::ZERO,
            token_lifetime: Duration::ZERO,
            clock,
            state: Mutex::new(AuthorityState {
                next_key_id: 0,
                current_id: None,
                activated_at: now,
                keys: BTreeMap::new(),
            }),
        }
    }

    /// Activate a new current key and return its id.
    ///
    /// Does nothing and returns `None` on a disabled authority.
    pub fn rotate(&self) -> Option<u32> {
        if !self.enabled {
            return None;
        }
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        Some(self.rotate_locked(&mut state, self.clock.now()))
    }

    /// Id of the key currently handed out as current
    pub fn current_key_id(&self) -> Option<u32> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .current_id
    }

    /// Export the key set, rotating first if the current key is due
    pub fn export_keys(&self) -> KeySet {
        if !self.enabled {
            return KeySet::disabled();
        }

        let now = self.clock.now();
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if add_duration(state.activated_at, self.key_update_interval) <= now {
            self.rotate_locked(&mut state, now);
        }
        let current_id = state.current_id;
        state
            .keys
            .retain(|id, key| Some(*id) == current_id || !key.is_expired_at(now));

        KeySet {
            token_security_enabled: true,
            key_update_interval: self.key_update_interval,
            token_lifetime: self.token_lifetime,
            current_key: current_id.and_then(|id| state.keys.get(&id).cloned()),
            all_keys: state.keys.values().cloned().collect(),
        }
    }

    fn rotate_locked(&self, state: &mut AuthorityState, now: DateTime<Utc>) -> u32 {
        let key_id = state.next_key_id;
        state.next_key_id = state.next_key_id.wrapping_add(1);

        let lifetime = self.key_update_interval * 3 + self.token_lifetime;
        let material = SecureBytes::random(BLOCK_KEY_LEN);
        log::info!(
            "Activated block key {} ({}, expires in {:?})",
            key_id,
            material.fingerprint(),
            lifetime
        );
        state
            .keys
            .insert(key_id, BlockKey::new(key_id, add_duration(now, lifetime), material));
        state.current_id = Some(key_id);
        state.activated_at = now;

        key_id
    }
}

#[async_trait]
impl KeySource for LocalKeyAuthority {
    fn name(&self) -> &str {
        "local key authority"
    }

    async fn fetch_keys(&self) -> KeyResult<KeySet> {
        Ok(self.export_keys())
    }
}
