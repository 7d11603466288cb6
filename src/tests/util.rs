// Copyright 2024 Simo Sorce
// See LICENSE.txt file for terms

use crate::tests::*;

use once_cell::sync::Lazy;
use rand_core::OsRng;
use rsa::RsaPrivateKey;

macro_rules! ret_or_panic {
    ($ret:expr) => {
        match $ret {
            Ok(r) => r,
            Err(e) => panic!("{e}"),
        }
    };
}

/* Key generation is slow, do it once per test binary */
pub static RSA_1024: Lazy<RsaPrivateKey> = Lazy::new(|| {
    RsaPrivateKey::new(&mut OsRng, 1024).expect("failed to generate key")
});
pub static RSA_2048: Lazy<RsaPrivateKey> = Lazy::new(|| {
    RsaPrivateKey::new(&mut OsRng, 2048).expect("failed to generate key")
});

pub const TEST_MESSAGE: &[u8] = b"test message";

/// A software token holding one key pair
pub struct TestToken {
    pub soft: Arc<SoftToken>,
    pub private: Key,
    pub public: Key,
}

impl TestToken {
    pub fn new(key: &RsaPrivateKey) -> TestToken {
        let soft = Arc::new(SoftToken::new());
        let (private, public) =
            ret_or_panic!(soft.import_key_pair(b"test-key", key.clone()));
        TestToken {
            soft: soft,
            private: private,
            public: public,
        }
    }

    pub fn with_1024() -> TestToken {
        TestToken::new(&RSA_1024)
    }

    pub fn with_2048() -> TestToken {
        TestToken::new(&RSA_2048)
    }

    pub fn client(&self) -> Arc<dyn TokenClient> {
        self.soft.clone()
    }

    pub fn engine(&self, algorithm: &str) -> PssSignature {
        self.engine_with_config(algorithm, Config::default())
    }

    pub fn engine_with_config(
        &self,
        algorithm: &str,
        config: Config,
    ) -> PssSignature {
        ret_or_panic!(PssSignature::with_config(
            self.client(),
            algorithm,
            config
        ))
    }

    pub fn signer(
        &self,
        algorithm: &str,
        params: Option<&PssParameterSpec>,
    ) -> PssSignature {
        let mut engine = self.engine(algorithm);
        ret_or_panic!(engine.set_key(self.private.clone(), OpMode::Sign));
        if params.is_some() {
            ret_or_panic!(engine.set_parameters(params));
        }
        engine
    }

    pub fn verifier(
        &self,
        algorithm: &str,
        params: Option<&PssParameterSpec>,
    ) -> PssSignature {
        let mut engine = self.engine(algorithm);
        ret_or_panic!(engine.set_key(self.public.clone(), OpMode::Verify));
        if params.is_some() {
            ret_or_panic!(engine.set_parameters(params));
        }
        engine
    }

    /// Nothing left behind on the token by finished or aborted operations
    pub fn assert_clean(&self) {
        assert_eq!(self.soft.outstanding_key_handles(), 0);
        assert_eq!(self.soft.active_operations(), 0);
    }
}

pub fn sign_message(engine: &mut PssSignature, message: &[u8]) -> Vec<u8> {
    ret_or_panic!(engine.update(message));
    ret_or_panic!(engine.sign())
}

pub fn verify_message(
    engine: &mut PssSignature,
    message: &[u8],
    signature: &[u8],
) -> bool {
    ret_or_panic!(engine.update(message));
    ret_or_panic!(engine.verify(signature))
}

/// A token that answers every command with the same failure, to check
/// nothing is called
#[derive(Debug)]
pub struct DeadToken;

impl TokenClient for DeadToken {
    fn token_id(&self) -> &str {
        "dead-token"
    }
    fn mechanism_info(
        &self,
        _: MechanismType,
    ) -> TokenResult<mechanism::MechanismInfo> {
        Err(TokenRv::OtherFailure(token::TRV_DEVICE_ERROR))
    }
    fn open_session(&self) -> TokenResult<token::SessionHandle> {
        Err(TokenRv::OtherFailure(token::TRV_DEVICE_ERROR))
    }
    fn close_session(&self, _: token::SessionHandle) -> TokenResult<()> {
        Err(TokenRv::OtherFailure(token::TRV_DEVICE_ERROR))
    }
    fn session_has_objects(
        &self,
        _: token::SessionHandle,
    ) -> TokenResult<bool> {
        Err(TokenRv::OtherFailure(token::TRV_DEVICE_ERROR))
    }
    fn acquire_key_handle(&self, _: &Key) -> TokenResult<token::KeyHandle> {
        Err(TokenRv::OtherFailure(token::TRV_DEVICE_ERROR))
    }
    fn release_key_handle(&self, _: token::KeyHandle) -> TokenResult<()> {
        Err(TokenRv::OtherFailure(token::TRV_DEVICE_ERROR))
    }
    fn sign_init(
        &self,
        _: token::SessionHandle,
        _: &mechanism::Mechanism,
        _: token::KeyHandle,
    ) -> TokenResult<()> {
        Err(TokenRv::OtherFailure(token::TRV_DEVICE_ERROR))
    }
    fn sign_update(
        &self,
        _: token::SessionHandle,
        _: &[u8],
    ) -> TokenResult<()> {
        Err(TokenRv::OtherFailure(token::TRV_DEVICE_ERROR))
    }
    fn sign_final(&self, _: token::SessionHandle) -> TokenResult<Vec<u8>> {
        Err(TokenRv::OtherFailure(token::TRV_DEVICE_ERROR))
    }
    fn sign(&self, _: token::SessionHandle, _: &[u8]) -> TokenResult<Vec<u8>> {
        Err(TokenRv::OtherFailure(token::TRV_DEVICE_ERROR))
    }
    fn verify_init(
        &self,
        _: token::SessionHandle,
        _: &mechanism::Mechanism,
        _: token::KeyHandle,
    ) -> TokenResult<()> {
        Err(TokenRv::OtherFailure(token::TRV_DEVICE_ERROR))
    }
    fn verify_update(
        &self,
        _: token::SessionHandle,
        _: &[u8],
    ) -> TokenResult<()> {
        Err(TokenRv::OtherFailure(token::TRV_DEVICE_ERROR))
    }
    fn verify_final(
        &self,
        _: token::SessionHandle,
        _: &[u8],
    ) -> TokenResult<()> {
        Err(TokenRv::OtherFailure(token::TRV_DEVICE_ERROR))
    }
    fn verify(
        &self,
        _: token::SessionHandle,
        _: &[u8],
        _: &[u8],
    ) -> TokenResult<()> {
        Err(TokenRv::OtherFailure(token::TRV_DEVICE_ERROR))
    }
}
