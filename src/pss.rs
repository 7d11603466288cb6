// Copyright 2023 Simo Sorce
// See LICENSE.txt file for terms

//! PSS parameter negotiation.
//!
//! Callers describe the parameters they want with a [PssParameterSpec],
//! which uses digest names the way they are commonly spelled. The
//! negotiator resolves those names against the digest table, checks them
//! against the signature algorithm and the key, and produces an immutable
//! [SignatureParameters] that is then used to build the token mechanism.

use crate::error::{Error, Result};
use crate::hash::{is_digest_equal, DigestAlgorithm};
use crate::kasn1;
use crate::mechanism::RsaPssParams;
use crate::param_err;

pub const MGF1_NAME: &str = "MGF1";

/// The only trailer field value defined for PSS, it denotes the 0xBC
/// trailer byte
pub const TRAILER_FIELD_BC: u32 = 1;

/// Parameters as requested by a caller, nothing is validated here
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PssParameterSpec {
    digest: String,
    mgf: String,
    mgf_digest: Option<String>,
    salt_len: usize,
    trailer_field: u32,
}

impl PssParameterSpec {
    /// MGF1 over the same digest, standard trailer
    pub fn new(digest: &str, salt_len: usize) -> PssParameterSpec {
        PssParameterSpec {
            digest: digest.to_string(),
            mgf: MGF1_NAME.to_string(),
            mgf_digest: None,
            salt_len: salt_len,
            trailer_field: TRAILER_FIELD_BC,
        }
    }

    pub fn with_mgf(mut self, mgf: &str) -> PssParameterSpec {
        self.mgf = mgf.to_string();
        self
    }

    pub fn with_mgf_digest(mut self, digest: &str) -> PssParameterSpec {
        self.mgf_digest = Some(digest.to_string());
        self
    }

    pub fn with_trailer_field(mut self, trailer: u32) -> PssParameterSpec {
        self.trailer_field = trailer;
        self
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn mgf(&self) -> &str {
        &self.mgf
    }

    pub fn mgf_digest(&self) -> Option<&str> {
        self.mgf_digest.as_deref()
    }

    pub fn salt_len(&self) -> usize {
        self.salt_len
    }

    pub fn trailer_field(&self) -> u32 {
        self.trailer_field
    }

    /// Decodes a DER RSASSA-PSS-params structure. Absent fields take
    /// their RFC 4055 defaults (SHA-1, MGF1 with SHA-1, 20, 1).
    pub fn from_der(data: &[u8]) -> Result<PssParameterSpec> {
        let decoded = kasn1::decode_pss_params(data)?;
        let mgf = if decoded.mgf_oid == kasn1::oid::MGF1_OID {
            MGF1_NAME.to_string()
        } else {
            decoded.mgf_oid.to_string()
        };
        let salt_len = usize::try_from(decoded.salt_length).map_err(|e| {
            Error::parameter_from_error("salt length".to_string(), e)
        })?;
        let trailer_field =
            u32::try_from(decoded.trailer_field).map_err(|e| {
                Error::parameter_from_error("trailer field".to_string(), e)
            })?;
        Ok(PssParameterSpec {
            digest: decoded.hash.name().to_string(),
            mgf: mgf,
            mgf_digest: Some(decoded.mgf_hash.name().to_string()),
            salt_len: salt_len,
            trailer_field: trailer_field,
        })
    }
}

/// Resolved PSS parameters, frozen for the token command
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SignatureParameters {
    digest: DigestAlgorithm,
    mgf_digest: DigestAlgorithm,
    salt_len: usize,
    trailer_field: u32,
}

impl SignatureParameters {
    /// Salt as long as the digest output, MGF1 over the same digest
    pub fn defaults_for(digest: DigestAlgorithm) -> SignatureParameters {
        SignatureParameters {
            digest: digest,
            mgf_digest: digest,
            salt_len: digest.output_len(),
            trailer_field: TRAILER_FIELD_BC,
        }
    }

    pub fn digest(&self) -> DigestAlgorithm {
        self.digest
    }

    pub fn mgf_digest(&self) -> DigestAlgorithm {
        self.mgf_digest
    }

    pub fn salt_len(&self) -> usize {
        self.salt_len
    }

    pub fn trailer_field(&self) -> u32 {
        self.trailer_field
    }

    /// `saltLen + hLen + 2`, or None if that does not fit a usize
    pub fn min_key_len_bytes(&self) -> Option<usize> {
        self.salt_len
            .checked_add(self.digest.output_len())?
            .checked_add(2)
    }

    pub fn fits_key_len(&self, key_len_bytes: usize) -> bool {
        match self.min_key_len_bytes() {
            Some(min) => min <= key_len_bytes,
            None => false,
        }
    }

    pub fn check_key_len(&self, key_len_bytes: usize) -> Result<()> {
        if self.fits_key_len(key_len_bytes) {
            return Ok(());
        }
        param_err!(
            "Salt length {} with {} needs a key of at least {} bytes, got {}",
            self.salt_len,
            self.digest,
            match self.min_key_len_bytes() {
                Some(l) => l.to_string(),
                None => "unbounded".to_string(),
            },
            key_len_bytes
        )
    }

    pub fn to_mech_params(&self) -> RsaPssParams {
        RsaPssParams {
            hash: self.digest,
            mgf: self.mgf_digest,
            salt_len: self.salt_len,
        }
    }

    pub fn to_spec(&self) -> PssParameterSpec {
        PssParameterSpec::new(self.digest.name(), self.salt_len)
            .with_mgf_digest(self.mgf_digest.name())
            .with_trailer_field(self.trailer_field)
    }

    /// DER RSASSA-PSS-params, fields at their default value are omitted
    pub fn to_der(&self) -> Result<Vec<u8>> {
        kasn1::encode_pss_params(
            self.digest,
            self.mgf_digest,
            u64::try_from(self.salt_len)?,
            u64::from(self.trailer_field),
        )
    }
}

fn resolve_digest(name: &str) -> Result<DigestAlgorithm> {
    match DigestAlgorithm::from_name(name) {
        Some(d) => Ok(d),
        None => param_err!("Unsupported digest algorithm {}", name),
    }
}

/// Resolves requested parameters into [SignatureParameters].
///
/// `fixed_digest` is the digest named by the signature algorithm, if it
/// names one. Without a request, defaults are synthesized from it, and
/// without either there is nothing to go by. The salt length is checked
/// against `key_len_bytes` only when a key is known.
pub fn negotiate(
    requested: Option<&PssParameterSpec>,
    key_len_bytes: Option<usize>,
    fixed_digest: Option<DigestAlgorithm>,
) -> Result<SignatureParameters> {
    let params = match requested {
        None => match fixed_digest {
            Some(d) => SignatureParameters::defaults_for(d),
            None => {
                return param_err!(
                    "PSS parameters required, the algorithm names no digest"
                )
            }
        },
        Some(spec) => {
            let digest = match fixed_digest {
                Some(d) => {
                    if !is_digest_equal(d, spec.digest())? {
                        return param_err!(
                            "Digest {} does not match the algorithm digest {}",
                            spec.digest(),
                            d
                        );
                    }
                    d
                }
                None => resolve_digest(spec.digest())?,
            };
            if !spec.mgf().eq_ignore_ascii_case(MGF1_NAME) {
                return param_err!(
                    "Unsupported mask generation function {}",
                    spec.mgf()
                );
            }
            let mgf_digest = match spec.mgf_digest() {
                Some(name) => resolve_digest(name)?,
                None => digest,
            };
            if spec.trailer_field() != TRAILER_FIELD_BC {
                return param_err!(
                    "Unsupported trailer field {}",
                    spec.trailer_field()
                );
            }
            SignatureParameters {
                digest: digest,
                mgf_digest: mgf_digest,
                salt_len: spec.salt_len(),
                trailer_field: TRAILER_FIELD_BC,
            }
        }
    };
    if let Some(len) = key_len_bytes {
        params.check_key_len(len)?;
    }
    Ok(params)
}
