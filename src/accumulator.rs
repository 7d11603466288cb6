// Copyright 2023 Simo Sorce
// See LICENSE.txt file for terms

use std::fmt;

use crate::error::Result;
use crate::hash::DigestAlgorithm;
use crate::state_err;

use digest::DynDigest;

/// Running hash of the message for mechanisms that take a digest as
/// input instead of the message itself
pub struct DigestAccumulator {
    alg: DigestAlgorithm,
    state: Box<dyn DynDigest + Send + Sync>,
    finished: bool,
}

impl fmt::Debug for DigestAccumulator {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("DigestAccumulator")
            .field("alg", &self.alg)
            .field("finished", &self.finished)
            .finish()
    }
}

impl DigestAccumulator {
    pub fn new(alg: DigestAlgorithm) -> DigestAccumulator {
        DigestAccumulator {
            alg: alg,
            state: alg.new_hasher(),
            finished: false,
        }
    }

    pub fn algorithm(&self) -> DigestAlgorithm {
        self.alg
    }

    pub fn update(&mut self, data: &[u8]) -> Result<()> {
        if self.finished {
            return state_err!("Digest already finished");
        }
        self.state.update(data);
        Ok(())
    }

    /// Returns the digest and leaves the hash state empty. Can be called
    /// only once until the next [reset](Self::reset).
    pub fn finish(&mut self) -> Result<Vec<u8>> {
        if self.finished {
            return state_err!("Digest already finished");
        }
        self.finished = true;
        Ok(self.state.finalize_reset().into_vec())
    }

    pub fn reset(&mut self) {
        self.state.reset();
        self.finished = false;
    }
}
