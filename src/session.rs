// Copyright 2023 Simo Sorce
// See LICENSE.txt file for terms

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use crate::error::{Error, Result};
use crate::key_err;
use crate::mechanism::{MechanismFlags, MechanismType};
use crate::pss::SignatureParameters;
use crate::token::{
    Key, KeyClass, KeyHandle, SessionHandle, TokenClient, RSA_KEY_ALGORITHM,
};

use log::{debug, trace, warn};
use once_cell::sync::Lazy;

/* One pool per token identity, shared by all engines talking to it */
static POOLS: Lazy<Mutex<HashMap<String, Weak<SessionPool>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub idle: usize,
    pub leased: usize,
    pub opened: u64,
    pub closed: u64,
}

#[derive(Debug, Default)]
struct PoolState {
    idle: Vec<SessionHandle>,
    leased: HashSet<SessionHandle>,
    opened: u64,
    closed: u64,
}

/// Sessions opened on one token. A session is either idle in the pool
/// or leased to exactly one operation.
#[derive(Debug)]
pub struct SessionPool {
    token: Arc<dyn TokenClient>,
    max_idle: usize,
    state: Mutex<PoolState>,
}

impl SessionPool {
    pub fn new(token: Arc<dyn TokenClient>, max_idle: usize) -> SessionPool {
        SessionPool {
            token: token,
            max_idle: max_idle,
            state: Mutex::new(PoolState::default()),
        }
    }

    /// Returns the pool registered for this token, creating it if needed.
    /// `max_idle` only applies when a new pool is created.
    pub fn for_token(
        token: &Arc<dyn TokenClient>,
        max_idle: usize,
    ) -> Result<Arc<SessionPool>> {
        let mut pools = match POOLS.lock() {
            Ok(p) => p,
            Err(_) => {
                return Err(Error::provider(
                    "session pool registry poisoned".to_string(),
                ))
            }
        };
        if let Some(pool) = pools.get(token.token_id()).and_then(Weak::upgrade)
        {
            return Ok(pool);
        }
        pools.retain(|_, w| w.strong_count() > 0);
        let pool = Arc::new(SessionPool::new(token.clone(), max_idle));
        pools.insert(token.token_id().to_string(), Arc::downgrade(&pool));
        debug!("New session pool for token {}", token.token_id());
        Ok(pool)
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, PoolState>> {
        match self.state.lock() {
            Ok(s) => Ok(s),
            Err(_) => {
                Err(Error::provider("session pool poisoned".to_string()))
            }
        }
    }

    pub fn token(&self) -> &Arc<dyn TokenClient> {
        &self.token
    }

    pub fn acquire(self: &Arc<Self>) -> Result<SessionLease> {
        let reused = self.lock_state()?.idle.pop();
        let handle = match reused {
            Some(h) => h,
            None => {
                let h = self.token.open_session()?;
                trace!("Opened session {}", h);
                h
            }
        };
        match self.state.lock() {
            Ok(mut state) => {
                if reused.is_none() {
                    state.opened += 1;
                }
                state.leased.insert(handle);
            }
            Err(_) => {
                /* not tracked anywhere, nobody else would close it */
                if let Err(rv) = self.token.close_session(handle) {
                    warn!("Failed to close session {}: {}", handle, rv);
                }
                return Err(Error::provider(
                    "session pool poisoned".to_string(),
                ));
            }
        }
        Ok(SessionLease {
            pool: self.clone(),
            handle: handle,
            released: false,
        })
    }

    fn give_back(&self, handle: SessionHandle, force_destroy: bool) {
        let close = match self.state.lock() {
            Ok(mut state) => {
                state.leased.remove(&handle);
                if force_destroy || state.idle.len() >= self.max_idle {
                    state.closed += 1;
                    true
                } else {
                    state.idle.push(handle);
                    false
                }
            }
            Err(_) => true,
        };
        if close {
            trace!("Closing session {}", handle);
            if let Err(rv) = self.token.close_session(handle) {
                warn!("Failed to close session {}: {}", handle, rv);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn poison(&self) {
        let _ = std::thread::scope(|s| {
            s.spawn(|| {
                let _guard = self.state.lock();
                panic!("poisoning session pool");
            })
            .join()
        });
    }

    pub fn stats(&self) -> Result<PoolStats> {
        let state = self.lock_state()?;
        Ok(PoolStats {
            idle: state.idle.len(),
            leased: state.leased.len(),
            opened: state.opened,
            closed: state.closed,
        })
    }
}

impl Drop for SessionPool {
    fn drop(&mut self) {
        if let Ok(state) = self.state.get_mut() {
            for handle in state.idle.drain(..) {
                let _ = self.token.close_session(handle);
            }
        }
    }
}

/// Exclusive use of a pooled session. Dropping a lease without releasing
/// it destroys the session, since its token state is unknown.
#[derive(Debug)]
pub struct SessionLease {
    pool: Arc<SessionPool>,
    handle: SessionHandle,
    released: bool,
}

impl SessionLease {
    pub fn handle(&self) -> SessionHandle {
        self.handle
    }

    pub fn release(mut self, force_destroy: bool) {
        self.released = true;
        self.pool.give_back(self.handle, force_destroy);
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        if !self.released {
            self.pool.give_back(self.handle, true);
        }
    }
}

/// A token key handle, released exactly once when dropped
#[derive(Debug)]
pub struct KeyLease {
    token: Arc<dyn TokenClient>,
    handle: KeyHandle,
}

impl KeyLease {
    pub fn acquire(
        token: &Arc<dyn TokenClient>,
        key: &Key,
    ) -> Result<KeyLease> {
        let handle = token.acquire_key_handle(key).map_err(|rv| {
            Error::token_rv_with_errmsg(
                rv,
                "key handle acquisition".to_string(),
            )
        })?;
        trace!("Acquired key handle {}", handle);
        Ok(KeyLease {
            token: token.clone(),
            handle: handle,
        })
    }

    pub fn handle(&self) -> KeyHandle {
        self.handle
    }
}

impl Drop for KeyLease {
    fn drop(&mut self) {
        trace!("Releasing key handle {}", self.handle);
        if let Err(rv) = self.token.release_key_handle(self.handle) {
            warn!("Failed to release key handle {}: {}", self.handle, rv);
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum OpMode {
    Sign,
    Verify,
}

/// Key sizes accepted on top of what the token mechanism allows
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct KeyLimits {
    pub min_bits: Option<usize>,
    pub max_bits: Option<usize>,
}

/// Owns the key bound to an engine, its token handle and the access to
/// the token sessions
#[derive(Debug)]
pub struct KeySessionManager {
    pool: Arc<SessionPool>,
    mechanism: MechanismType,
    limits: KeyLimits,
    key: Option<Key>,
    mode: Option<OpMode>,
    key_handle: Option<KeyLease>,
}

impl KeySessionManager {
    pub fn new(
        pool: Arc<SessionPool>,
        mechanism: MechanismType,
        limits: KeyLimits,
    ) -> KeySessionManager {
        KeySessionManager {
            pool: pool,
            mechanism: mechanism,
            limits: limits,
            key: None,
            mode: None,
            key_handle: None,
        }
    }

    pub fn token(&self) -> &Arc<dyn TokenClient> {
        self.pool.token()
    }

    pub fn pool(&self) -> &Arc<SessionPool> {
        &self.pool
    }

    pub fn key(&self) -> Option<&Key> {
        self.key.as_ref()
    }

    pub fn mode(&self) -> Option<OpMode> {
        self.mode
    }

    pub fn has_key_handle(&self) -> bool {
        self.key_handle.is_some()
    }

    /// Checks a key can be used with the mechanism for `mode`, and with
    /// `params` when those are already known
    pub fn check_key(
        &self,
        key: &Key,
        mode: OpMode,
        params: Option<&SignatureParameters>,
    ) -> Result<()> {
        if !key.algorithm().eq_ignore_ascii_case(RSA_KEY_ALGORITHM) {
            return key_err!("Unsupported key algorithm {}", key.algorithm());
        }
        match (mode, key.class()) {
            (OpMode::Sign, KeyClass::Private) => (),
            (OpMode::Verify, KeyClass::Public) => (),
            (OpMode::Sign, _) => return key_err!("Signing needs a private key"),
            (OpMode::Verify, _) => {
                return key_err!("Verification needs a public key")
            }
        }
        let bits = key.bits();
        match self.token().mechanism_info(self.mechanism) {
            Ok(info) => {
                if bits < info.min_key_bits || bits > info.max_key_bits {
                    return key_err!(
                        "{} key size {} outside of [{}, {}]",
                        self.mechanism,
                        bits,
                        info.min_key_bits,
                        info.max_key_bits
                    );
                }
                let needed = match mode {
                    OpMode::Sign => MechanismFlags::SIGN,
                    OpMode::Verify => MechanismFlags::VERIFY,
                };
                if !info.flags.contains(needed) {
                    return key_err!(
                        "{} not available for {:?}",
                        self.mechanism,
                        mode
                    );
                }
            }
            Err(rv) => debug!(
                "No mechanism info for {} ({}), skipping key size check",
                self.mechanism, rv
            ),
        }
        if let Some(min) = self.limits.min_bits {
            if bits < min {
                return key_err!("Key size {} below minimum {}", bits, min);
            }
        }
        if let Some(max) = self.limits.max_bits {
            if bits > max {
                return key_err!("Key size {} above maximum {}", bits, max);
            }
        }
        if let Some(p) = params {
            if !p.fits_key_len(key.len_bytes()) {
                return key_err!(
                    "Key of {} bytes too short for salt length {} with {}",
                    key.len_bytes(),
                    p.salt_len(),
                    p.digest()
                );
            }
        }
        Ok(())
    }

    /// Validates and binds a key, replacing the previous one. A key that
    /// fails validation leaves the previous binding untouched.
    pub fn bind_key(
        &mut self,
        key: Key,
        mode: OpMode,
        params: Option<&SignatureParameters>,
    ) -> Result<()> {
        self.check_key(&key, mode, params)?;
        self.release_key();
        let lease = KeyLease::acquire(self.token(), &key)?;
        self.key = Some(key);
        self.mode = Some(mode);
        self.key_handle = Some(lease);
        Ok(())
    }

    /// Handle of the bound key, acquired again if it was released after
    /// the last operation
    pub fn ensure_key_handle(&mut self) -> Result<KeyHandle> {
        if let Some(ref lease) = self.key_handle {
            return Ok(lease.handle());
        }
        let lease = match self.key {
            Some(ref key) => KeyLease::acquire(self.pool.token(), key)?,
            None => return key_err!("No key set"),
        };
        let handle = lease.handle();
        self.key_handle = Some(lease);
        Ok(handle)
    }

    pub fn acquire_session(&self) -> Result<SessionLease> {
        self.pool.acquire()
    }

    pub fn release_session(&self, session: SessionLease, force_destroy: bool) {
        session.release(force_destroy);
    }

    pub fn release_key_handle(&mut self) {
        self.key_handle = None;
    }

    pub fn release_key(&mut self) {
        self.key_handle = None;
        self.key = None;
        self.mode = None;
    }
}
