// Copyright 2023 Simo Sorce
// See LICENSE.txt file for terms

//! This is tokenpss
//!
//! An RSASSA-PSS signature engine that leaves the RSA primitive to a
//! cryptographic token (an HSM or a software token) reached through the
//! [TokenClient] interface, while it negotiates the PSS parameters,
//! manages sessions and key handles, accumulates the message and cancels
//! operations cleanly.

pub mod accumulator;
pub mod config;
pub mod error;
pub mod hash;
pub mod kasn1;
pub mod log;
pub mod mechanism;
pub mod pss;
pub mod session;
pub mod signature;
#[cfg(feature = "softtoken")]
pub mod soft;
pub mod token;

pub use config::Config;
pub use error::{Error, ErrorKind, Result};
pub use hash::DigestAlgorithm;
pub use mechanism::{MechanismMode, MechanismType};
pub use pss::{PssParameterSpec, SignatureParameters};
pub use session::{OpMode, PoolStats, SessionPool};
pub use signature::{PssSignature, State};
pub use token::{Key, KeyClass, TokenClient, TokenRv};
