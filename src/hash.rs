// Copyright 2023 Simo Sorce
// See LICENSE.txt file for terms

use std::fmt;

use crate::error::Result;
use crate::kasn1::oid;
use crate::param_err;

use digest::DynDigest;

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum DigestAlgorithm {
    Sha1,
    Sha224,
    Sha256,
    Sha384,
    Sha512,
    Sha512_224,
    Sha512_256,
}

#[derive(Debug)]
pub struct DigestInfo {
    pub alg: DigestAlgorithm,
    /// Standard name, always hyphenated
    pub name: &'static str,
    /// Other accepted spellings
    pub aliases: &'static [&'static str],
    pub hash_size: usize,
    pub oid: asn1::ObjectIdentifier,
}

pub static DIGEST_SET: [DigestInfo; 7] = [
    DigestInfo {
        alg: DigestAlgorithm::Sha1,
        name: "SHA-1",
        aliases: &["SHA", "SHA1"],
        hash_size: 20,
        oid: oid::SHA1_OID,
    },
    DigestInfo {
        alg: DigestAlgorithm::Sha224,
        name: "SHA-224",
        aliases: &["SHA224"],
        hash_size: 28,
        oid: oid::SHA224_OID,
    },
    DigestInfo {
        alg: DigestAlgorithm::Sha256,
        name: "SHA-256",
        aliases: &["SHA256"],
        hash_size: 32,
        oid: oid::SHA256_OID,
    },
    DigestInfo {
        alg: DigestAlgorithm::Sha384,
        name: "SHA-384",
        aliases: &["SHA384"],
        hash_size: 48,
        oid: oid::SHA384_OID,
    },
    DigestInfo {
        alg: DigestAlgorithm::Sha512,
        name: "SHA-512",
        aliases: &["SHA512"],
        hash_size: 64,
        oid: oid::SHA512_OID,
    },
    DigestInfo {
        alg: DigestAlgorithm::Sha512_224,
        name: "SHA-512/224",
        aliases: &["SHA512/224"],
        hash_size: 28,
        oid: oid::SHA512_224_OID,
    },
    DigestInfo {
        alg: DigestAlgorithm::Sha512_256,
        name: "SHA-512/256",
        aliases: &["SHA512/256"],
        hash_size: 32,
        oid: oid::SHA512_256_OID,
    },
];

impl DigestAlgorithm {
    fn info(&self) -> &'static DigestInfo {
        /* DIGEST_SET is ordered like the enum */
        &DIGEST_SET[*self as usize]
    }

    /// Looks up a digest by any of its accepted spellings, ignoring case
    pub fn from_name(name: &str) -> Option<DigestAlgorithm> {
        for ds in &DIGEST_SET {
            if ds.name.eq_ignore_ascii_case(name)
                || ds.aliases.iter().any(|a| a.eq_ignore_ascii_case(name))
            {
                return Some(ds.alg);
            }
        }
        None
    }

    pub fn from_oid(oid: &asn1::ObjectIdentifier) -> Option<DigestAlgorithm> {
        DIGEST_SET.iter().find(|ds| ds.oid == *oid).map(|ds| ds.alg)
    }

    pub fn name(&self) -> &'static str {
        self.info().name
    }

    pub fn output_len(&self) -> usize {
        self.info().hash_size
    }

    pub fn oid(&self) -> &'static asn1::ObjectIdentifier {
        &self.info().oid
    }

    /// Fresh hashing state for this algorithm
    pub fn new_hasher(&self) -> Box<dyn DynDigest + Send + Sync> {
        match self {
            DigestAlgorithm::Sha1 => Box::new(sha1::Sha1::default()),
            DigestAlgorithm::Sha224 => Box::new(sha2::Sha224::default()),
            DigestAlgorithm::Sha256 => Box::new(sha2::Sha256::default()),
            DigestAlgorithm::Sha384 => Box::new(sha2::Sha384::default()),
            DigestAlgorithm::Sha512 => Box::new(sha2::Sha512::default()),
            DigestAlgorithm::Sha512_224 => {
                Box::new(sha2::Sha512_224::default())
            }
            DigestAlgorithm::Sha512_256 => {
                Box::new(sha2::Sha512_256::default())
            }
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Output length in bytes of the named digest, if it is a known one
pub fn digest_len(name: &str) -> Option<usize> {
    DigestAlgorithm::from_name(name).map(|d| d.output_len())
}

/// Compares a standard digest against a caller supplied name.
///
/// Hyphenated names must match a standard name exactly (ignoring case).
/// Names without a hyphen are accepted in their short form: "SHA" and
/// "SHA1" both name SHA-1, other names get a hyphen after the "SHA"
/// prefix. A name without a hyphen that does not start with "SHA" is not
/// a digest we can handle at all.
pub fn is_digest_equal(std: DigestAlgorithm, given: &str) -> Result<bool> {
    if given.contains('-') {
        return Ok(std.name().eq_ignore_ascii_case(given));
    }
    if std == DigestAlgorithm::Sha1 {
        return Ok(given.eq_ignore_ascii_case("SHA")
            || given.eq_ignore_ascii_case("SHA1"));
    }
    match given.get(..3) {
        Some(prefix) if prefix.eq_ignore_ascii_case("SHA") => {
            let hyphenated = format!("{}-{}", prefix, &given[3..]);
            Ok(std.name().eq_ignore_ascii_case(&hyphenated))
        }
        _ => param_err!("Unsupported digest algorithm {}", given),
    }
}
