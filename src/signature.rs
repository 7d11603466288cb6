// Copyright 2023 Simo Sorce
// See LICENSE.txt file for terms

//! The RSASSA-PSS signature engine.
//!
//! A [PssSignature] drives one sign or verify operation at a time on a
//! token: the key and parameters are set first, the token operation is
//! initialized lazily on first use, message bytes are either streamed to
//! the token or hashed locally depending on the mechanism, and the
//! terminal command turns the token answer into a signature or a
//! verification outcome. Session and key handle are always given back,
//! whatever the outcome.

use std::sync::Arc;

use crate::accumulator::DigestAccumulator;
use crate::config::{self, Config};
use crate::error::{Error, Result};
use crate::mechanism::{
    lookup_algorithm, Algorithm, Mechanism, MechanismMode, MechanismType,
};
use crate::pss::{self, PssParameterSpec, SignatureParameters};
use crate::session::{
    KeyLimits, KeySessionManager, OpMode, SessionLease, SessionPool,
};
use crate::token::{Key, TokenClient, TokenRv, TRV_MECHANISM_INVALID};
use crate::{key_err, param_err, provider_err, state_err};

use log::{debug, error, trace};

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum State {
    Idle,
    Keyed,
    Parameterized,
    Initialized,
    Active,
    Signed,
    Verified,
    Cancelled,
}

/* Chosen once at construction from the mechanism mode */
#[derive(Debug)]
enum Accumulation {
    TokenStreaming,
    LocalDigest(Option<DigestAccumulator>),
}

#[derive(Debug)]
struct Operation {
    mode: OpMode,
    session: SessionLease,
    bytes_processed: u64,
    active: bool,
}

#[derive(Debug)]
pub struct PssSignature {
    algorithm: &'static Algorithm,
    config: Config,
    mechanism: MechanismType,
    accumulation: Accumulation,
    manager: KeySessionManager,
    params: Option<SignatureParameters>,
    op: Option<Operation>,
    state: State,
}

impl PssSignature {
    /// Engine for the named algorithm using the process configuration
    pub fn new(
        token: Arc<dyn TokenClient>,
        algorithm: &str,
    ) -> Result<PssSignature> {
        Self::with_config(token, algorithm, config::global()?)
    }

    pub fn with_config(
        token: Arc<dyn TokenClient>,
        algorithm: &str,
        config: Config,
    ) -> Result<PssSignature> {
        let alg = lookup_algorithm(algorithm)?;
        let mut mechanism = alg.mechanism;
        if mechanism.mode() == MechanismMode::TokenStreaming
            && config.local_digest_fallback
        {
            if let Err(TokenRv::OtherFailure(TRV_MECHANISM_INVALID)) =
                token.mechanism_info(mechanism)
            {
                debug!(
                    "{} not offered by token {}, hashing locally",
                    mechanism,
                    token.token_id()
                );
                mechanism = MechanismType::RsaPkcsPss;
            }
        }
        Self::build(token, alg, mechanism, config)
    }

    /// Engine bound to an explicit token mechanism, which must be
    /// compatible with the algorithm digest
    pub fn with_mechanism(
        token: Arc<dyn TokenClient>,
        algorithm: &str,
        mechanism: MechanismType,
        config: Config,
    ) -> Result<PssSignature> {
        let alg = lookup_algorithm(algorithm)?;
        if let Some(d) = mechanism.fixed_digest() {
            if alg.digest != Some(d) {
                return param_err!(
                    "Mechanism {} can't be used for {}",
                    mechanism,
                    alg.name
                );
            }
        }
        Self::build(token, alg, mechanism, config)
    }

    fn build(
        token: Arc<dyn TokenClient>,
        alg: &'static Algorithm,
        mechanism: MechanismType,
        config: Config,
    ) -> Result<PssSignature> {
        crate::log::tokenpss_log_init();
        let pool = SessionPool::for_token(&token, config.max_idle_sessions)?;
        let accumulation = match mechanism.mode() {
            MechanismMode::TokenStreaming => Accumulation::TokenStreaming,
            MechanismMode::LocalDigest => Accumulation::LocalDigest(None),
        };
        let limits = KeyLimits {
            min_bits: config.min_key_bits,
            max_bits: config.max_key_bits,
        };
        trace!("{} engine using {}", alg.name, mechanism);
        Ok(PssSignature {
            algorithm: alg,
            config: config,
            mechanism: mechanism,
            accumulation: accumulation,
            manager: KeySessionManager::new(pool, mechanism, limits),
            params: None,
            op: None,
            state: State::Idle,
        })
    }

    pub fn algorithm(&self) -> &'static str {
        self.algorithm.name
    }

    pub fn mechanism(&self) -> MechanismType {
        self.mechanism
    }

    pub fn mechanism_mode(&self) -> MechanismMode {
        self.mechanism.mode()
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn key(&self) -> Option<&Key> {
        self.manager.key()
    }

    pub fn pool(&self) -> &Arc<SessionPool> {
        self.manager.pool()
    }

    /// Bytes consumed by the current operation
    pub fn bytes_processed(&self) -> u64 {
        match self.op {
            Some(ref op) => op.bytes_processed,
            None => 0,
        }
    }

    fn token(&self) -> &Arc<dyn TokenClient> {
        self.manager.token()
    }

    /* Where the engine stands when no operation is in flight */
    fn resting_state(&self) -> State {
        if self.manager.key().is_none() {
            State::Idle
        } else if self.params.is_some() {
            State::Parameterized
        } else {
            State::Keyed
        }
    }

    fn set_state(&mut self, state: State) {
        if self.state != state {
            trace!("{:?} -> {:?}", self.state, state);
            self.state = state;
        }
    }

    fn reset_accumulator(&mut self) {
        if let Accumulation::LocalDigest(Some(ref mut acc)) = self.accumulation
        {
            acc.reset();
        }
    }

    /// Binds a key for signing or verification. Any operation in flight
    /// is cancelled first.
    pub fn set_key(&mut self, key: Key, mode: OpMode) -> Result<()> {
        if self.op.is_some() {
            debug!("Key change with an operation in flight, cancelling it");
            self.abort_operation();
        }
        let ret = self.manager.bind_key(key, mode, self.params.as_ref());
        let state = self.resting_state();
        self.set_state(state);
        ret
    }

    /// Resolves and freezes the parameters for the next operations.
    /// `None` asks for the defaults of the algorithm digest.
    pub fn set_parameters(
        &mut self,
        params: Option<&PssParameterSpec>,
    ) -> Result<()> {
        if self.state == State::Active {
            return state_err!(
                "Parameters can't change while an operation is in progress"
            );
        }
        let resolved = pss::negotiate(params, None, self.algorithm.digest)?;
        if self.params == Some(resolved) {
            trace!("Parameters unchanged");
            return Ok(());
        }
        if let Some(key) = self.manager.key() {
            resolved.check_key_len(key.len_bytes())?;
        }
        if self.op.is_some() {
            /* initialized but no data yet, the token operation was set up
             * with the old parameters */
            self.abort_operation();
        }
        self.params = Some(resolved);
        if let Accumulation::LocalDigest(ref mut acc) = self.accumulation {
            match acc {
                Some(a) if a.algorithm() == resolved.digest() => a.reset(),
                _ => *acc = Some(DigestAccumulator::new(resolved.digest())),
            }
        }
        let state = self.resting_state();
        self.set_state(state);
        Ok(())
    }

    pub fn get_parameters(&self) -> Option<SignatureParameters> {
        self.params
    }

    /// Current parameters as DER RSASSA-PSS-params
    pub fn encoded_parameters(&self) -> Result<Option<Vec<u8>>> {
        match self.params {
            Some(ref p) => Ok(Some(p.to_der()?)),
            None => Ok(None),
        }
    }

    /// Starts the token operation if it is not started yet
    pub fn ensure_initialized(&mut self) -> Result<()> {
        match self.state {
            State::Initialized | State::Active => return Ok(()),
            _ => (),
        }
        let mode = match self.manager.mode() {
            Some(m) => m,
            None => return key_err!("No key set"),
        };
        if self.params.is_none() {
            if self.algorithm.digest.is_none() {
                return param_err!(
                    "{} needs explicit PSS parameters",
                    self.algorithm.name
                );
            }
            self.set_parameters(None)?;
        }
        let params = match self.params {
            Some(p) => p,
            None => return param_err!("No PSS parameters"),
        };
        let mut mech = Mechanism::new(self.mechanism);
        mech.params = Some(params.to_mech_params());

        let key_handle = match self.manager.ensure_key_handle() {
            Ok(h) => h,
            Err(e) => {
                error!("Key handle acquisition failed: {}", e);
                return Err(e);
            }
        };
        let session = match self.manager.acquire_session() {
            Ok(s) => s,
            Err(e) => {
                error!("Session acquisition failed: {}", e);
                self.manager.release_key_handle();
                return Err(e);
            }
        };
        let ret = match mode {
            OpMode::Sign => {
                self.token().sign_init(session.handle(), &mech, key_handle)
            }
            OpMode::Verify => {
                self.token().verify_init(session.handle(), &mech, key_handle)
            }
        };
        if let Err(rv) = ret {
            error!(
                "{:?} init failed on session {}: {}",
                mode,
                session.handle(),
                rv
            );
            self.manager.release_session(session, false);
            self.manager.release_key_handle();
            let state = self.resting_state();
            self.set_state(state);
            return Err(Error::token_rv_with_errmsg(
                rv,
                format!("{:?} initialization", mode),
            ));
        }
        self.reset_accumulator();
        self.op = Some(Operation {
            mode: mode,
            session: session,
            bytes_processed: 0,
            active: false,
        });
        self.set_state(State::Initialized);
        Ok(())
    }

    /* Drops the operation after a failure. The token already ended the
     * operation unless `destroy_session` is set. */
    fn fail_operation(&mut self, destroy_session: bool) {
        if let Some(op) = self.op.take() {
            self.manager.release_session(op.session, destroy_session);
        }
        self.manager.release_key_handle();
        self.reset_accumulator();
        let state = self.resting_state();
        self.set_state(state);
    }

    pub fn update(&mut self, data: &[u8]) -> Result<()> {
        self.ensure_initialized()?;
        if data.is_empty() {
            return Ok(());
        }
        let (mode, session, total) = match self.op {
            Some(ref op) => (
                op.mode,
                op.session.handle(),
                u64::try_from(data.len())
                    .ok()
                    .and_then(|len| op.bytes_processed.checked_add(len)),
            ),
            None => return state_err!("No operation in progress"),
        };
        let total = match total {
            Some(t) => t,
            None => {
                error!("Byte counter overflow");
                /* the token operation is still live */
                self.fail_operation(true);
                return provider_err!("Processed byte count overflow");
            }
        };
        let ret = match self.accumulation {
            Accumulation::TokenStreaming => match mode {
                OpMode::Sign => self.token().sign_update(session, data),
                OpMode::Verify => self.token().verify_update(session, data),
            },
            Accumulation::LocalDigest(Some(ref mut acc)) => {
                if let Err(e) = acc.update(data) {
                    self.fail_operation(true);
                    return Err(e);
                }
                Ok(())
            }
            Accumulation::LocalDigest(None) => {
                self.fail_operation(true);
                return state_err!("No digest state");
            }
        };
        if let Err(rv) = ret {
            error!("{:?} update failed on session {}: {}", mode, session, rv);
            self.fail_operation(false);
            return Err(Error::token_rv_with_errmsg(
                rv,
                format!("{:?} update", mode),
            ));
        }
        if let Some(ref mut op) = self.op {
            op.bytes_processed = total;
            op.active = true;
        }
        self.set_state(State::Active);
        Ok(())
    }

    /* The locally computed digest, None in streaming mode */
    fn finish_digest(&mut self) -> Result<Option<Vec<u8>>> {
        match self.accumulation {
            Accumulation::TokenStreaming => Ok(None),
            Accumulation::LocalDigest(Some(ref mut acc)) => {
                Ok(Some(acc.finish()?))
            }
            Accumulation::LocalDigest(None) => state_err!("No digest state"),
        }
    }

    fn check_mode(&self, wanted: OpMode) -> Result<()> {
        match self.manager.mode() {
            Some(m) if m != wanted => {
                state_err!("Engine is set up for {:?}, not {:?}", m, wanted)
            }
            _ => Ok(()),
        }
    }

    /* Takes the operation for its terminal command, with the payload to
     * send in local digest mode */
    fn start_terminal(&mut self) -> Result<(Operation, Option<Vec<u8>>)> {
        self.ensure_initialized()?;
        let digest = match self.finish_digest() {
            Ok(d) => d,
            Err(e) => {
                self.abort_operation();
                let state = self.resting_state();
                self.set_state(state);
                return Err(e);
            }
        };
        match self.op.take() {
            Some(op) => Ok((op, digest)),
            None => state_err!("No operation in progress"),
        }
    }

    /* A terminal command ends the token operation whatever its outcome */
    fn end_terminal(&mut self, op: Operation) {
        self.manager.release_session(op.session, false);
        self.manager.release_key_handle();
        self.reset_accumulator();
    }

    pub fn sign(&mut self) -> Result<Vec<u8>> {
        self.check_mode(OpMode::Sign)?;
        let (op, digest) = self.start_terminal()?;
        let session = op.session.handle();
        let ret = match digest {
            None => self.token().sign_final(session),
            Some(ref d) => self.token().sign(session, d),
        };
        self.end_terminal(op);
        match ret {
            Ok(signature) => {
                self.set_state(State::Signed);
                Ok(signature)
            }
            Err(rv) => {
                error!("Signing failed on session {}: {}", session, rv);
                let state = self.resting_state();
                self.set_state(state);
                Err(Error::token_rv_with_errmsg(rv, "signing".to_string()))
            }
        }
    }

    /// Checks `signature` over the data fed so far. The token rejection
    /// codes are a `false` outcome, any other failure is an error.
    pub fn verify(&mut self, signature: &[u8]) -> Result<bool> {
        self.check_mode(OpMode::Verify)?;
        let (op, digest) = self.start_terminal()?;
        let session = op.session.handle();
        let ret = match digest {
            None => self.token().verify_final(session, signature),
            Some(ref d) => self.token().verify(session, d, signature),
        };
        self.end_terminal(op);
        match ret {
            Ok(()) => {
                self.set_state(State::Verified);
                Ok(true)
            }
            Err(rv) if rv.is_verify_rejection() => {
                debug!("Signature rejected: {}", rv);
                self.set_state(State::Verified);
                Ok(false)
            }
            Err(rv) => {
                error!("Verification failed on session {}: {}", session, rv);
                let state = self.resting_state();
                self.set_state(state);
                Err(Error::token_rv_with_errmsg(rv, "verification".to_string()))
            }
        }
    }

    /// Abandons the operation in flight and unbinds the key
    pub fn cancel(&mut self) -> Result<()> {
        match self.state {
            State::Initialized | State::Active => (),
            s => return state_err!("Nothing to cancel in state {:?}", s),
        }
        self.abort_operation();
        self.manager.release_key();
        self.set_state(State::Cancelled);
        Ok(())
    }

    /// Back to a fresh engine, parameters are kept
    pub fn reset(&mut self) {
        if self.op.is_some() {
            self.abort_operation();
        }
        self.manager.release_key();
        self.reset_accumulator();
        self.set_state(State::Idle);
    }

    /* Ends the operation in flight without a result: token state is
     * cleared, then the session and the key handle are released */
    fn abort_operation(&mut self) {
        if let Some(op) = self.op.take() {
            let destroy = self.clear_token_state(&op);
            self.manager.release_session(op.session, destroy);
        }
        self.manager.release_key_handle();
        self.reset_accumulator();
    }

    /* Returns true when the session has to be destroyed */
    fn clear_token_state(&mut self, op: &Operation) -> bool {
        let session = op.session.handle();
        if !self.config.explicit_cancel {
            debug!("Destroying session {} on cancel", session);
            return true;
        }
        match self.token().session_has_objects(session) {
            Ok(true) => (),
            Ok(false) => {
                debug!("Session {} holds no objects, destroying it", session);
                return true;
            }
            Err(rv) => {
                debug!("Session {} object probe failed: {}", session, rv);
                return true;
            }
        }

        /* The session holds objects: force the token operation to complete
         * and discard the result. Only a failure other than a verification
         * rejection sends the session to destruction. */
        let digest = match self.accumulation {
            Accumulation::TokenStreaming => None,
            Accumulation::LocalDigest(Some(ref mut acc)) => {
                Some(acc.finish().unwrap_or_default())
            }
            Accumulation::LocalDigest(None) => Some(Vec::new()),
        };
        let key_len = self.manager.key().map(|k| k.len_bytes()).unwrap_or(0);
        let token = self.token();
        let ret = match (op.mode, digest) {
            (OpMode::Sign, None) => token.sign_final(session).map(|_| ()),
            (OpMode::Sign, Some(d)) => token.sign(session, &d).map(|_| ()),
            (OpMode::Verify, None) => {
                token.verify_final(session, &vec![0u8; key_len])
            }
            (OpMode::Verify, Some(d)) => {
                token.verify(session, &d, &vec![0u8; key_len])
            }
        };
        match ret {
            Ok(()) => false,
            Err(rv) if rv.is_verify_rejection() => false,
            Err(rv) => {
                debug!("Forced completion on session {}: {}", session, rv);
                true
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn force_bytes_processed(&mut self, count: u64) {
        if let Some(ref mut op) = self.op {
            op.bytes_processed = count;
        }
    }
}

impl Drop for PssSignature {
    fn drop(&mut self) {
        if self.op.is_some() {
            self.abort_operation();
        }
    }
}
