// Copyright 2023 Simo Sorce
// See LICENSE.txt file for terms

//! A token living in process memory, holding RSA keys and implementing
//! the PSS mechanisms with the RustCrypto `rsa` crate. It follows the
//! Cryptoki operation rules closely enough to stand in for a real device
//! in tests, and lets tests inject failures on the next command.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::hash::DigestAlgorithm;
use crate::mechanism::{
    Mechanism, MechanismFlags, MechanismInfo, MechanismType, RsaPssParams,
};
use crate::session::OpMode;
use crate::token::*;

use digest::DynDigest;
use log::trace;
use rand_core::OsRng;
use rsa::traits::PublicKeyParts;
use rsa::{Pss, RsaPrivateKey, RsaPublicKey};

static TOKEN_IDS: AtomicU64 = AtomicU64::new(1);

pub const SOFT_MIN_KEY_BITS: usize = 1024;
pub const SOFT_MAX_KEY_BITS: usize = 16384;

const ALL_MECHANISMS: [MechanismType; 6] = [
    MechanismType::RsaPkcsPss,
    MechanismType::Sha1RsaPkcsPss,
    MechanismType::Sha224RsaPkcsPss,
    MechanismType::Sha256RsaPkcsPss,
    MechanismType::Sha384RsaPkcsPss,
    MechanismType::Sha512RsaPkcsPss,
];

fn pss_scheme(digest: DigestAlgorithm, salt_len: usize) -> Pss {
    match digest {
        DigestAlgorithm::Sha1 => Pss::new_with_salt::<sha1::Sha1>(salt_len),
        DigestAlgorithm::Sha224 => {
            Pss::new_with_salt::<sha2::Sha224>(salt_len)
        }
        DigestAlgorithm::Sha256 => {
            Pss::new_with_salt::<sha2::Sha256>(salt_len)
        }
        DigestAlgorithm::Sha384 => {
            Pss::new_with_salt::<sha2::Sha384>(salt_len)
        }
        DigestAlgorithm::Sha512 => {
            Pss::new_with_salt::<sha2::Sha512>(salt_len)
        }
        DigestAlgorithm::Sha512_224 => {
            Pss::new_with_salt::<sha2::Sha512_224>(salt_len)
        }
        DigestAlgorithm::Sha512_256 => {
            Pss::new_with_salt::<sha2::Sha512_256>(salt_len)
        }
    }
}

#[derive(Debug)]
struct SoftKey {
    private: Option<RsaPrivateKey>,
    public: RsaPublicKey,
}

#[derive(Debug)]
struct HandleEntry {
    id: Vec<u8>,
    class: KeyClass,
    refs: usize,
}

struct SoftOperation {
    mode: OpMode,
    mech_type: MechanismType,
    params: RsaPssParams,
    key_id: Vec<u8>,
    /* only for the hashing mechanisms */
    hasher: Option<Box<dyn DynDigest + Send + Sync>>,
}

#[derive(Default)]
struct SoftSession {
    op: Option<SoftOperation>,
}

#[derive(Default)]
struct Faults {
    init: Option<TokenRv>,
    update: Option<TokenRv>,
    finish: Option<TokenRv>,
}

struct SoftState {
    keys: HashMap<Vec<u8>, SoftKey>,
    handles: HashMap<KeyHandle, HandleEntry>,
    sessions: HashMap<SessionHandle, SoftSession>,
    mechanisms: BTreeMap<MechanismType, MechanismInfo>,
    session_objects: bool,
    faults: Faults,
    next_handle: u64,
}

impl SoftState {
    fn new_handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    fn session(
        &mut self,
        session: SessionHandle,
    ) -> TokenResult<&mut SoftSession> {
        match self.sessions.get_mut(&session) {
            Some(s) => Ok(s),
            None => Err(TokenRv::OtherFailure(TRV_SESSION_HANDLE_INVALID)),
        }
    }

    /* Removes the operation from the session: every terminal command,
     * and every failing one, ends the operation */
    fn take_op(
        &mut self,
        session: SessionHandle,
        mode: OpMode,
    ) -> TokenResult<SoftOperation> {
        let op = match self.session(session)?.op.take() {
            Some(op) => op,
            None => {
                return Err(TokenRv::OtherFailure(TRV_OPERATION_NOT_INITIALIZED))
            }
        };
        if op.mode != mode {
            return Err(TokenRv::OtherFailure(TRV_OPERATION_NOT_INITIALIZED));
        }
        Ok(op)
    }

    fn op_init(
        &mut self,
        session: SessionHandle,
        mode: OpMode,
        mech: &Mechanism,
        key: KeyHandle,
    ) -> TokenResult<()> {
        if self.session(session)?.op.is_some() {
            return Err(TokenRv::OtherFailure(TRV_OPERATION_ACTIVE));
        }
        if let Some(rv) = self.faults.init.take() {
            return Err(rv);
        }
        let info = match self.mechanisms.get(&mech.mech_type) {
            Some(i) => *i,
            None => return Err(TokenRv::OtherFailure(TRV_MECHANISM_INVALID)),
        };
        let (needed, class) = match mode {
            OpMode::Sign => (MechanismFlags::SIGN, KeyClass::Private),
            OpMode::Verify => (MechanismFlags::VERIFY, KeyClass::Public),
        };
        if !info.flags.contains(needed) {
            return Err(TokenRv::OtherFailure(TRV_MECHANISM_INVALID));
        }
        let entry = match self.handles.get(&key) {
            Some(e) => e,
            None => return Err(TokenRv::OtherFailure(TRV_KEY_HANDLE_INVALID)),
        };
        if entry.class != class {
            return Err(TokenRv::OtherFailure(TRV_KEY_TYPE_INCONSISTENT));
        }
        let key_id = entry.id.clone();
        let bits = match self.keys.get(&key_id) {
            Some(k) => k.public.size() * 8,
            None => return Err(TokenRv::OtherFailure(TRV_KEY_HANDLE_INVALID)),
        };
        if bits < info.min_key_bits || bits > info.max_key_bits {
            return Err(TokenRv::OtherFailure(TRV_KEY_SIZE_RANGE));
        }
        let params = match mech.params {
            Some(p) => p,
            None => {
                return Err(TokenRv::OtherFailure(TRV_MECHANISM_PARAM_INVALID))
            }
        };
        /* the rsa crate masks with the message digest */
        if params.mgf != params.hash {
            return Err(TokenRv::OtherFailure(TRV_MECHANISM_PARAM_INVALID));
        }
        let hasher = match mech.mech_type.fixed_digest() {
            Some(d) if d != params.hash => {
                return Err(TokenRv::OtherFailure(TRV_MECHANISM_PARAM_INVALID))
            }
            Some(d) => Some(d.new_hasher()),
            None => None,
        };
        self.session(session)?.op = Some(SoftOperation {
            mode: mode,
            mech_type: mech.mech_type,
            params: params,
            key_id: key_id,
            hasher: hasher,
        });
        trace!("{:?} operation started on session {}", mode, session);
        Ok(())
    }

    fn op_update(
        &mut self,
        session: SessionHandle,
        mode: OpMode,
        data: &[u8],
    ) -> TokenResult<()> {
        let mut op = self.take_op(session, mode)?;
        if let Some(rv) = self.faults.update.take() {
            return Err(rv);
        }
        match op.hasher {
            Some(ref mut h) => h.update(data),
            /* single part only */
            None => return Err(TokenRv::OtherFailure(TRV_MECHANISM_INVALID)),
        }
        self.session(session)?.op = Some(op);
        Ok(())
    }

    /* The digest the PSS encoding is computed over */
    fn terminal_digest(
        &mut self,
        op: &mut SoftOperation,
        data: Option<&[u8]>,
    ) -> TokenResult<Vec<u8>> {
        if let Some(rv) = self.faults.finish.take() {
            return Err(rv);
        }
        match (op.hasher.as_mut(), data) {
            (Some(h), Some(d)) => {
                h.update(d);
                Ok(h.finalize_reset().into_vec())
            }
            (Some(h), None) => Ok(h.finalize_reset().into_vec()),
            (None, Some(d)) => {
                if d.len() != op.params.hash.output_len() {
                    return Err(TokenRv::DataLenRange);
                }
                Ok(d.to_vec())
            }
            /* no final for single part mechanisms */
            (None, None) => Err(TokenRv::OtherFailure(TRV_MECHANISM_INVALID)),
        }
    }

    fn op_sign(
        &mut self,
        session: SessionHandle,
        data: Option<&[u8]>,
    ) -> TokenResult<Vec<u8>> {
        let mut op = self.take_op(session, OpMode::Sign)?;
        let digest = self.terminal_digest(&mut op, data)?;
        let private = match self.keys.get(&op.key_id) {
            Some(SoftKey {
                private: Some(k), ..
            }) => k,
            _ => return Err(TokenRv::OtherFailure(TRV_KEY_HANDLE_INVALID)),
        };
        let scheme = pss_scheme(op.params.hash, op.params.salt_len);
        trace!("{} signature on session {}", op.mech_type, session);
        match private.sign_with_rng(&mut OsRng, scheme, &digest) {
            Ok(sig) => Ok(sig),
            Err(_) => Err(TokenRv::OtherFailure(TRV_GENERAL_ERROR)),
        }
    }

    fn op_verify(
        &mut self,
        session: SessionHandle,
        data: Option<&[u8]>,
        signature: &[u8],
    ) -> TokenResult<()> {
        let mut op = self.take_op(session, OpMode::Verify)?;
        let digest = self.terminal_digest(&mut op, data)?;
        let public = match self.keys.get(&op.key_id) {
            Some(k) => &k.public,
            None => return Err(TokenRv::OtherFailure(TRV_KEY_HANDLE_INVALID)),
        };
        if signature.len() != public.size() {
            return Err(TokenRv::SignatureLenRange);
        }
        let scheme = pss_scheme(op.params.hash, op.params.salt_len);
        trace!("{} verification on session {}", op.mech_type, session);
        match public.verify(scheme, &digest, signature) {
            Ok(()) => Ok(()),
            Err(_) => Err(TokenRv::SignatureInvalid),
        }
    }
}

pub struct SoftToken {
    id: String,
    inner: Mutex<SoftState>,
}

impl fmt::Debug for SoftToken {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SoftToken").field("id", &self.id).finish()
    }
}

impl SoftToken {
    /// A token offering every PSS mechanism for keys between
    /// [SOFT_MIN_KEY_BITS] and [SOFT_MAX_KEY_BITS]
    pub fn new() -> SoftToken {
        let info = MechanismInfo {
            min_key_bits: SOFT_MIN_KEY_BITS,
            max_key_bits: SOFT_MAX_KEY_BITS,
            flags: MechanismFlags::SIGN | MechanismFlags::VERIFY,
        };
        let mut mechanisms = BTreeMap::new();
        for m in ALL_MECHANISMS {
            mechanisms.insert(m, info);
        }
        let n = TOKEN_IDS.fetch_add(1, Ordering::Relaxed);
        SoftToken {
            id: format!("soft-token-{}", n),
            inner: Mutex::new(SoftState {
                keys: HashMap::new(),
                handles: HashMap::new(),
                sessions: HashMap::new(),
                mechanisms: mechanisms,
                session_objects: false,
                faults: Faults::default(),
                next_handle: INVALID_HANDLE,
            }),
        }
    }

    fn lock(&self) -> TokenResult<MutexGuard<'_, SoftState>> {
        match self.inner.lock() {
            Ok(s) => Ok(s),
            Err(_) => Err(TokenRv::OtherFailure(TRV_GENERAL_ERROR)),
        }
    }

    /// Stores a key pair, returns the descriptors of its two halves
    pub fn import_key_pair(
        &self,
        id: &[u8],
        private: RsaPrivateKey,
    ) -> TokenResult<(Key, Key)> {
        let public = private.to_public_key();
        let bits = public.size() * 8;
        self.lock()?.keys.insert(
            id.to_vec(),
            SoftKey {
                private: Some(private),
                public: public,
            },
        );
        Ok((Key::rsa_private(id, bits), Key::rsa_public(id, bits)))
    }

    pub fn import_public_key(
        &self,
        id: &[u8],
        public: RsaPublicKey,
    ) -> TokenResult<Key> {
        let bits = public.size() * 8;
        self.lock()?.keys.insert(
            id.to_vec(),
            SoftKey {
                private: None,
                public: public,
            },
        );
        Ok(Key::rsa_public(id, bits))
    }

    /// Replaces the offered mechanisms
    pub fn set_mechanisms(
        &self,
        mechanisms: &[(MechanismType, MechanismInfo)],
    ) -> TokenResult<()> {
        let mut state = self.lock()?;
        state.mechanisms = mechanisms.iter().cloned().collect();
        Ok(())
    }

    pub fn remove_mechanism(&self, mech: MechanismType) -> TokenResult<()> {
        self.lock()?.mechanisms.remove(&mech);
        Ok(())
    }

    /// Whether sessions report holding token objects
    pub fn set_session_objects(&self, flag: bool) -> TokenResult<()> {
        self.lock()?.session_objects = flag;
        Ok(())
    }

    pub fn fail_next_init(&self, rv: TokenRv) -> TokenResult<()> {
        self.lock()?.faults.init = Some(rv);
        Ok(())
    }

    pub fn fail_next_update(&self, rv: TokenRv) -> TokenResult<()> {
        self.lock()?.faults.update = Some(rv);
        Ok(())
    }

    /// Fails the next terminal command, single part or final
    pub fn fail_next_final(&self, rv: TokenRv) -> TokenResult<()> {
        self.lock()?.faults.finish = Some(rv);
        Ok(())
    }

    /// Key handle references not yet released
    pub fn outstanding_key_handles(&self) -> usize {
        match self.lock() {
            Ok(s) => s.handles.values().map(|e| e.refs).sum(),
            Err(_) => 0,
        }
    }

    pub fn open_sessions(&self) -> usize {
        match self.lock() {
            Ok(s) => s.sessions.len(),
            Err(_) => 0,
        }
    }

    /// Sessions with a sign or verify operation in progress
    pub fn active_operations(&self) -> usize {
        match self.lock() {
            Ok(s) => s.sessions.values().filter(|s| s.op.is_some()).count(),
            Err(_) => 0,
        }
    }
}

impl TokenClient for SoftToken {
    fn token_id(&self) -> &str {
        &self.id
    }

    fn mechanism_info(
        &self,
        mech: MechanismType,
    ) -> TokenResult<MechanismInfo> {
        match self.lock()?.mechanisms.get(&mech) {
            Some(info) => Ok(*info),
            None => Err(TokenRv::OtherFailure(TRV_MECHANISM_INVALID)),
        }
    }

    fn open_session(&self) -> TokenResult<SessionHandle> {
        let mut state = self.lock()?;
        let handle = state.new_handle();
        state.sessions.insert(handle, SoftSession::default());
        Ok(handle)
    }

    fn close_session(&self, session: SessionHandle) -> TokenResult<()> {
        match self.lock()?.sessions.remove(&session) {
            Some(_) => Ok(()),
            None => Err(TokenRv::OtherFailure(TRV_SESSION_HANDLE_INVALID)),
        }
    }

    fn session_has_objects(&self, session: SessionHandle) -> TokenResult<bool> {
        let mut state = self.lock()?;
        state.session(session)?;
        Ok(state.session_objects)
    }

    fn acquire_key_handle(&self, key: &Key) -> TokenResult<KeyHandle> {
        let mut state = self.lock()?;
        if !key.algorithm().eq_ignore_ascii_case(RSA_KEY_ALGORITHM) {
            return Err(TokenRv::OtherFailure(TRV_KEY_TYPE_INCONSISTENT));
        }
        match state.keys.get(key.id()) {
            Some(k) => {
                if key.class() == KeyClass::Private && k.private.is_none() {
                    return Err(TokenRv::OtherFailure(TRV_KEY_HANDLE_INVALID));
                }
            }
            None => return Err(TokenRv::OtherFailure(TRV_KEY_HANDLE_INVALID)),
        }
        for (handle, entry) in state.handles.iter_mut() {
            if entry.id == key.id() && entry.class == key.class() {
                entry.refs += 1;
                return Ok(*handle);
            }
        }
        let handle = state.new_handle();
        state.handles.insert(
            handle,
            HandleEntry {
                id: key.id().to_vec(),
                class: key.class(),
                refs: 1,
            },
        );
        Ok(handle)
    }

    fn release_key_handle(&self, handle: KeyHandle) -> TokenResult<()> {
        let mut state = self.lock()?;
        let drop_it = match state.handles.get_mut(&handle) {
            Some(entry) => {
                entry.refs -= 1;
                entry.refs == 0
            }
            None => return Err(TokenRv::OtherFailure(TRV_KEY_HANDLE_INVALID)),
        };
        if drop_it {
            state.handles.remove(&handle);
        }
        Ok(())
    }

    fn sign_init(
        &self,
        session: SessionHandle,
        mech: &Mechanism,
        key: KeyHandle,
    ) -> TokenResult<()> {
        self.lock()?.op_init(session, OpMode::Sign, mech, key)
    }

    fn sign_update(
        &self,
        session: SessionHandle,
        data: &[u8],
    ) -> TokenResult<()> {
        self.lock()?.op_update(session, OpMode::Sign, data)
    }

    fn sign_final(&self, session: SessionHandle) -> TokenResult<Vec<u8>> {
        self.lock()?.op_sign(session, None)
    }

    fn sign(
        &self,
        session: SessionHandle,
        data: &[u8],
    ) -> TokenResult<Vec<u8>> {
        self.lock()?.op_sign(session, Some(data))
    }

    fn verify_init(
        &self,
        session: SessionHandle,
        mech: &Mechanism,
        key: KeyHandle,
    ) -> TokenResult<()> {
        self.lock()?.op_init(session, OpMode::Verify, mech, key)
    }

    fn verify_update(
        &self,
        session: SessionHandle,
        data: &[u8],
    ) -> TokenResult<()> {
        self.lock()?.op_update(session, OpMode::Verify, data)
    }

    fn verify_final(
        &self,
        session: SessionHandle,
        signature: &[u8],
    ) -> TokenResult<()> {
        self.lock()?.op_verify(session, None, signature)
    }

    fn verify(
        &self,
        session: SessionHandle,
        data: &[u8],
        signature: &[u8],
    ) -> TokenResult<()> {
        self.lock()?.op_verify(session, Some(data), signature)
    }
}
