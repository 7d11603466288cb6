// Copyright 2023 Simo Sorce
// See LICENSE.txt file for terms

use std::fmt;

use crate::error::Result;
use crate::hash::DigestAlgorithm;
use crate::param_err;

use bitflags::bitflags;

/// Token mechanisms the engine knows how to drive
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum MechanismType {
    /// Raw PSS: the token expects an already computed digest
    RsaPkcsPss,
    Sha1RsaPkcsPss,
    Sha224RsaPkcsPss,
    Sha256RsaPkcsPss,
    Sha384RsaPkcsPss,
    Sha512RsaPkcsPss,
}

impl MechanismType {
    /// The digest the token computes itself, if any
    pub fn fixed_digest(&self) -> Option<DigestAlgorithm> {
        match self {
            MechanismType::RsaPkcsPss => None,
            MechanismType::Sha1RsaPkcsPss => Some(DigestAlgorithm::Sha1),
            MechanismType::Sha224RsaPkcsPss => Some(DigestAlgorithm::Sha224),
            MechanismType::Sha256RsaPkcsPss => Some(DigestAlgorithm::Sha256),
            MechanismType::Sha384RsaPkcsPss => Some(DigestAlgorithm::Sha384),
            MechanismType::Sha512RsaPkcsPss => Some(DigestAlgorithm::Sha512),
        }
    }

    pub fn mode(&self) -> MechanismMode {
        match self {
            MechanismType::RsaPkcsPss => MechanismMode::LocalDigest,
            _ => MechanismMode::TokenStreaming,
        }
    }

    /// The hashing variant for a digest, when the token defines one
    pub fn for_digest(digest: DigestAlgorithm) -> Option<MechanismType> {
        match digest {
            DigestAlgorithm::Sha1 => Some(MechanismType::Sha1RsaPkcsPss),
            DigestAlgorithm::Sha224 => Some(MechanismType::Sha224RsaPkcsPss),
            DigestAlgorithm::Sha256 => Some(MechanismType::Sha256RsaPkcsPss),
            DigestAlgorithm::Sha384 => Some(MechanismType::Sha384RsaPkcsPss),
            DigestAlgorithm::Sha512 => Some(MechanismType::Sha512RsaPkcsPss),
            _ => None,
        }
    }
}

impl fmt::Display for MechanismType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            MechanismType::RsaPkcsPss => "RSA_PKCS_PSS",
            MechanismType::Sha1RsaPkcsPss => "SHA1_RSA_PKCS_PSS",
            MechanismType::Sha224RsaPkcsPss => "SHA224_RSA_PKCS_PSS",
            MechanismType::Sha256RsaPkcsPss => "SHA256_RSA_PKCS_PSS",
            MechanismType::Sha384RsaPkcsPss => "SHA384_RSA_PKCS_PSS",
            MechanismType::Sha512RsaPkcsPss => "SHA512_RSA_PKCS_PSS",
        };
        write!(f, "{}", name)
    }
}

/// How message bytes reach the token
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum MechanismMode {
    /// Every update is forwarded, the token hashes
    TokenStreaming,
    /// Bytes are hashed locally, the token only sees the digest
    LocalDigest,
}

bitflags! {
    /// Operations a mechanism is offered for
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MechanismFlags: u32 {
        const SIGN   = 0x00000800;
        const VERIFY = 0x00002000;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MechanismInfo {
    /// 0 means no lower bound
    pub min_key_bits: usize,
    /// `usize::MAX` means no upper bound
    pub max_key_bits: usize,
    pub flags: MechanismFlags,
}

impl MechanismInfo {
    pub fn unbounded(flags: MechanismFlags) -> MechanismInfo {
        MechanismInfo {
            min_key_bits: 0,
            max_key_bits: usize::MAX,
            flags: flags,
        }
    }
}

/// The parameter block sent along with the init command
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RsaPssParams {
    pub hash: DigestAlgorithm,
    pub mgf: DigestAlgorithm,
    pub salt_len: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Mechanism {
    pub mech_type: MechanismType,
    pub params: Option<RsaPssParams>,
}

impl Mechanism {
    pub fn new(mech_type: MechanismType) -> Mechanism {
        Mechanism {
            mech_type: mech_type,
            params: None,
        }
    }
}

/// A signature algorithm name as callers request it
#[derive(Debug)]
pub struct Algorithm {
    pub name: &'static str,
    pub digest: Option<DigestAlgorithm>,
    pub mechanism: MechanismType,
}

pub static ALGORITHMS: [Algorithm; 6] = [
    Algorithm {
        name: "RSASSA-PSS",
        digest: None,
        mechanism: MechanismType::RsaPkcsPss,
    },
    Algorithm {
        name: "SHA1withRSASSA-PSS",
        digest: Some(DigestAlgorithm::Sha1),
        mechanism: MechanismType::Sha1RsaPkcsPss,
    },
    Algorithm {
        name: "SHA224withRSASSA-PSS",
        digest: Some(DigestAlgorithm::Sha224),
        mechanism: MechanismType::Sha224RsaPkcsPss,
    },
    Algorithm {
        name: "SHA256withRSASSA-PSS",
        digest: Some(DigestAlgorithm::Sha256),
        mechanism: MechanismType::Sha256RsaPkcsPss,
    },
    Algorithm {
        name: "SHA384withRSASSA-PSS",
        digest: Some(DigestAlgorithm::Sha384),
        mechanism: MechanismType::Sha384RsaPkcsPss,
    },
    Algorithm {
        name: "SHA512withRSASSA-PSS",
        digest: Some(DigestAlgorithm::Sha512),
        mechanism: MechanismType::Sha512RsaPkcsPss,
    },
];

pub fn lookup_algorithm(name: &str) -> Result<&'static Algorithm> {
    match ALGORITHMS.iter().find(|a| a.name.eq_ignore_ascii_case(name)) {
        Some(a) => Ok(a),
        None => param_err!("Unknown signature algorithm {}", name),
    }
}
