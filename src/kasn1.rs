// Copyright 2023 Simo Sorce
// See LICENSE.txt file for terms

//! This module provides helpers to (de)serialize the RSASSA-PSS parameter
//! structure using Abstract Syntax Notation One (ASN.1) abstractions with
//! DER (Distinguished Encoding Rules) encoding, as defined in
//! [RFC 4055](https://www.rfc-editor.org/rfc/rfc4055)

use crate::error::Result;
use crate::hash::DigestAlgorithm;
use crate::param_err;

use asn1;

pub mod oid;

/* Values implied by an absent field, per RFC 4055 */
pub const DEFAULT_SALT_LENGTH: u64 = 20;
pub const DEFAULT_TRAILER_FIELD: u64 = 1;

/// AlgorithmIdentifier restricted to hash functions, whose parameters
/// are either absent or NULL
#[derive(asn1::Asn1Read, asn1::Asn1Write, PartialEq, Eq, Clone, Debug)]
pub struct HashAlgorithm {
    pub oid: asn1::ObjectIdentifier,
    pub params: Option<asn1::Null>,
}

/// AlgorithmIdentifier of the mask generation function, the only one
/// defined (MGF1) carries a hash AlgorithmIdentifier as parameter
#[derive(asn1::Asn1Read, asn1::Asn1Write, PartialEq, Eq, Clone, Debug)]
pub struct MaskGenAlgorithm {
    pub oid: asn1::ObjectIdentifier,
    pub params: HashAlgorithm,
}

/// RSASSA-PSS-params, fields equal to their DEFAULT are omitted
#[derive(asn1::Asn1Read, asn1::Asn1Write, PartialEq, Eq, Clone, Debug)]
pub struct RsaPssParams {
    #[explicit(0)]
    pub hash_algorithm: Option<HashAlgorithm>,
    #[explicit(1)]
    pub mask_gen_algorithm: Option<MaskGenAlgorithm>,
    #[explicit(2)]
    pub salt_length: Option<u64>,
    #[explicit(3)]
    pub trailer_field: Option<u64>,
}

impl HashAlgorithm {
    fn new(alg: DigestAlgorithm) -> HashAlgorithm {
        HashAlgorithm {
            oid: alg.oid().clone(),
            params: Some(()),
        }
    }

    fn digest(&self) -> Result<DigestAlgorithm> {
        match DigestAlgorithm::from_oid(&self.oid) {
            Some(d) => Ok(d),
            None => param_err!("Unsupported digest OID {}", self.oid),
        }
    }
}

/// PSS parameters as recovered from their DER form, with defaults applied
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedPssParams {
    pub hash: DigestAlgorithm,
    pub mgf_oid: asn1::ObjectIdentifier,
    pub mgf_hash: DigestAlgorithm,
    pub salt_length: u64,
    pub trailer_field: u64,
}

pub fn encode_pss_params(
    hash: DigestAlgorithm,
    mgf_hash: DigestAlgorithm,
    salt_length: u64,
    trailer_field: u64,
) -> Result<Vec<u8>> {
    let params = RsaPssParams {
        hash_algorithm: match hash {
            DigestAlgorithm::Sha1 => None,
            _ => Some(HashAlgorithm::new(hash)),
        },
        mask_gen_algorithm: match mgf_hash {
            DigestAlgorithm::Sha1 => None,
            _ => Some(MaskGenAlgorithm {
                oid: oid::MGF1_OID,
                params: HashAlgorithm::new(mgf_hash),
            }),
        },
        salt_length: match salt_length {
            DEFAULT_SALT_LENGTH => None,
            x => Some(x),
        },
        trailer_field: match trailer_field {
            DEFAULT_TRAILER_FIELD => None,
            x => Some(x),
        },
    };
    Ok(asn1::write_single(&params)?)
}

pub fn decode_pss_params(data: &[u8]) -> Result<DecodedPssParams> {
    let params = asn1::parse_single::<RsaPssParams>(data)?;
    let hash = match params.hash_algorithm {
        Some(ref h) => h.digest()?,
        None => DigestAlgorithm::Sha1,
    };
    let (mgf_oid, mgf_hash) = match params.mask_gen_algorithm {
        Some(ref m) => (m.oid.clone(), m.params.digest()?),
        None => (oid::MGF1_OID, DigestAlgorithm::Sha1),
    };
    Ok(DecodedPssParams {
        hash: hash,
        mgf_oid: mgf_oid,
        mgf_hash: mgf_hash,
        salt_length: params.salt_length.unwrap_or(DEFAULT_SALT_LENGTH),
        trailer_field: params.trailer_field.unwrap_or(DEFAULT_TRAILER_FIELD),
    })
}
