// Copyright 2023 Simo Sorce
// See LICENSE.txt file for terms

//! This module defines the narrow command interface the engine uses to
//! reach a cryptographic token, the small vocabulary of result codes the
//! token answers with, and the caller-side description of a key that lives
//! on the token.

use std::fmt;
use std::fmt::Debug;

use crate::mechanism::{Mechanism, MechanismInfo, MechanismType};

/// Opaque token session identifier
pub type SessionHandle = u64;
/// Opaque token key-handle identifier
pub type KeyHandle = u64;

pub const INVALID_HANDLE: u64 = 0;

/* Failure codes carried by TokenRv::OtherFailure, numbered like their
 * Cryptoki counterparts */
pub const TRV_GENERAL_ERROR: u64 = 0x05;
pub const TRV_DEVICE_ERROR: u64 = 0x30;
pub const TRV_KEY_HANDLE_INVALID: u64 = 0x60;
pub const TRV_KEY_SIZE_RANGE: u64 = 0x62;
pub const TRV_KEY_TYPE_INCONSISTENT: u64 = 0x63;
pub const TRV_KEY_FUNCTION_NOT_PERMITTED: u64 = 0x68;
pub const TRV_MECHANISM_INVALID: u64 = 0x70;
pub const TRV_MECHANISM_PARAM_INVALID: u64 = 0x71;
pub const TRV_OPERATION_ACTIVE: u64 = 0x90;
pub const TRV_OPERATION_NOT_INITIALIZED: u64 = 0x91;
pub const TRV_SESSION_HANDLE_INVALID: u64 = 0xB3;

/// Non-OK outcome of a token command
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum TokenRv {
    SignatureInvalid,
    SignatureLenRange,
    DataLenRange,
    OtherFailure(u64),
}

impl TokenRv {
    /// True for the three codes a verification maps to a plain `false`
    pub fn is_verify_rejection(&self) -> bool {
        match self {
            TokenRv::SignatureInvalid
            | TokenRv::SignatureLenRange
            | TokenRv::DataLenRange => true,
            TokenRv::OtherFailure(_) => false,
        }
    }
}

impl fmt::Display for TokenRv {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TokenRv::SignatureInvalid => write!(f, "SIGNATURE_INVALID"),
            TokenRv::SignatureLenRange => write!(f, "SIGNATURE_LEN_RANGE"),
            TokenRv::DataLenRange => write!(f, "DATA_LEN_RANGE"),
            TokenRv::OtherFailure(code) => match *code {
                TRV_GENERAL_ERROR => write!(f, "GENERAL_ERROR"),
                TRV_DEVICE_ERROR => write!(f, "DEVICE_ERROR"),
                TRV_KEY_HANDLE_INVALID => write!(f, "KEY_HANDLE_INVALID"),
                TRV_KEY_SIZE_RANGE => write!(f, "KEY_SIZE_RANGE"),
                TRV_KEY_TYPE_INCONSISTENT => {
                    write!(f, "KEY_TYPE_INCONSISTENT")
                }
                TRV_KEY_FUNCTION_NOT_PERMITTED => {
                    write!(f, "KEY_FUNCTION_NOT_PERMITTED")
                }
                TRV_MECHANISM_INVALID => write!(f, "MECHANISM_INVALID"),
                TRV_MECHANISM_PARAM_INVALID => {
                    write!(f, "MECHANISM_PARAM_INVALID")
                }
                TRV_OPERATION_ACTIVE => write!(f, "OPERATION_ACTIVE"),
                TRV_OPERATION_NOT_INITIALIZED => {
                    write!(f, "OPERATION_NOT_INITIALIZED")
                }
                TRV_SESSION_HANDLE_INVALID => {
                    write!(f, "SESSION_HANDLE_INVALID")
                }
                other => write!(f, "FAILURE({:#x})", other),
            },
        }
    }
}

pub type TokenResult<T> = std::result::Result<T, TokenRv>;

pub const RSA_KEY_ALGORITHM: &str = "RSA";

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum KeyClass {
    Public,
    Private,
}

/// Caller-side description of an asymmetric key held by the token.
///
/// The key material never leaves the token, the engine only knows how to
/// name the key (`id`), what it is and how large it is.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Key {
    id: Vec<u8>,
    class: KeyClass,
    algorithm: String,
    bits: usize,
}

impl Key {
    pub fn new(
        id: &[u8],
        class: KeyClass,
        algorithm: &str,
        bits: usize,
    ) -> Key {
        Key {
            id: id.to_vec(),
            class: class,
            algorithm: algorithm.to_string(),
            bits: bits,
        }
    }

    pub fn rsa_private(id: &[u8], bits: usize) -> Key {
        Key::new(id, KeyClass::Private, RSA_KEY_ALGORITHM, bits)
    }

    pub fn rsa_public(id: &[u8], bits: usize) -> Key {
        Key::new(id, KeyClass::Public, RSA_KEY_ALGORITHM, bits)
    }

    pub fn id(&self) -> &[u8] {
        &self.id
    }

    pub fn class(&self) -> KeyClass {
        self.class
    }

    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    pub fn bits(&self) -> usize {
        self.bits
    }

    /// Modulus length rounded up to whole bytes
    pub fn len_bytes(&self) -> usize {
        (self.bits + 7) >> 3
    }
}

/// The command interface of a cryptographic token.
///
/// Implementations are shared between engines and threads, so every
/// method takes `&self`; a token is expected to serialize commands on the
/// same session internally. Within one session at most one sign or verify
/// operation can be active, exactly as in Cryptoki: a terminal command
/// (`*_final` or single-part) ends the operation whatever its outcome.
pub trait TokenClient: Debug + Send + Sync {
    /// Stable identity of the token, used to key session pools
    fn token_id(&self) -> &str;

    fn mechanism_info(&self, mech: MechanismType) -> TokenResult<MechanismInfo>;

    fn open_session(&self) -> TokenResult<SessionHandle>;
    fn close_session(&self, session: SessionHandle) -> TokenResult<()>;
    /// Whether objects were created in the session, in which case closing
    /// it would destroy them
    fn session_has_objects(&self, session: SessionHandle) -> TokenResult<bool>;

    fn acquire_key_handle(&self, key: &Key) -> TokenResult<KeyHandle>;
    fn release_key_handle(&self, handle: KeyHandle) -> TokenResult<()>;

    fn sign_init(
        &self,
        session: SessionHandle,
        mech: &Mechanism,
        key: KeyHandle,
    ) -> TokenResult<()>;
    fn sign_update(&self, session: SessionHandle, data: &[u8])
        -> TokenResult<()>;
    fn sign_final(&self, session: SessionHandle) -> TokenResult<Vec<u8>>;
    fn sign(&self, session: SessionHandle, data: &[u8])
        -> TokenResult<Vec<u8>>;

    fn verify_init(
        &self,
        session: SessionHandle,
        mech: &Mechanism,
        key: KeyHandle,
    ) -> TokenResult<()>;
    fn verify_update(
        &self,
        session: SessionHandle,
        data: &[u8],
    ) -> TokenResult<()>;
    fn verify_final(
        &self,
        session: SessionHandle,
        signature: &[u8],
    ) -> TokenResult<()>;
    fn verify(
        &self,
        session: SessionHandle,
        data: &[u8],
        signature: &[u8],
    ) -> TokenResult<()>;
}
