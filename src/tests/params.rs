// Copyright 2023 Simo Sorce
// See LICENSE.txt file for terms

use crate::tests::*;

use crate::pss::{negotiate, TRAILER_FIELD_BC};

use serial_test::parallel;

#[test]
#[parallel]
fn test_default_parameters() {
    let p = ret_or_panic!(negotiate(None, None, Some(DigestAlgorithm::Sha256)));
    assert_eq!(p.digest(), DigestAlgorithm::Sha256);
    assert_eq!(p.mgf_digest(), DigestAlgorithm::Sha256);
    assert_eq!(p.salt_len(), 32);
    assert_eq!(p.trailer_field(), TRAILER_FIELD_BC);

    /* nothing to derive defaults from */
    let err = negotiate(None, Some(256), None).unwrap_err();
    assert!(err.is_parameter_error());
}

#[test]
#[parallel]
fn test_digest_matching() {
    let fixed = Some(DigestAlgorithm::Sha256);
    for name in ["SHA-256", "sha-256", "SHA256", "sha256"] {
        let spec = PssParameterSpec::new(name, 32);
        let p = ret_or_panic!(negotiate(Some(&spec), None, fixed));
        assert_eq!(p.digest(), DigestAlgorithm::Sha256);
    }
    for name in ["SHA-384", "SHA384", "SHA-1", "SHA"] {
        let spec = PssParameterSpec::new(name, 32);
        let err = negotiate(Some(&spec), None, fixed).unwrap_err();
        assert!(err.is_parameter_error());
    }
    let spec = PssParameterSpec::new("MD5", 16);
    assert!(negotiate(Some(&spec), None, fixed)
        .unwrap_err()
        .is_parameter_error());

    /* SHA-1 accepts its short spellings */
    let spec = PssParameterSpec::new("SHA", 20);
    let p = ret_or_panic!(negotiate(
        Some(&spec),
        None,
        Some(DigestAlgorithm::Sha1)
    ));
    assert_eq!(p.digest(), DigestAlgorithm::Sha1);

    /* without a fixed digest any known digest goes */
    let spec = PssParameterSpec::new("SHA-512/256", 32);
    let p = ret_or_panic!(negotiate(Some(&spec), None, None));
    assert_eq!(p.digest(), DigestAlgorithm::Sha512_256);
    let spec = PssParameterSpec::new("SHA3-256", 32);
    assert!(negotiate(Some(&spec), None, None)
        .unwrap_err()
        .is_parameter_error());
}

#[test]
#[parallel]
fn test_mgf_and_trailer() {
    let spec = PssParameterSpec::new("SHA-256", 32).with_mgf("mgf1");
    let p = ret_or_panic!(negotiate(Some(&spec), None, None));
    assert_eq!(p.mgf_digest(), DigestAlgorithm::Sha256);

    let spec = PssParameterSpec::new("SHA-256", 32).with_mgf_digest("SHA-1");
    let p = ret_or_panic!(negotiate(Some(&spec), None, None));
    assert_eq!(p.mgf_digest(), DigestAlgorithm::Sha1);

    let spec = PssParameterSpec::new("SHA-256", 32).with_mgf("MGF2");
    assert!(negotiate(Some(&spec), None, None)
        .unwrap_err()
        .is_parameter_error());

    let spec =
        PssParameterSpec::new("SHA-256", 32).with_mgf_digest("WHIRLPOOL");
    assert!(negotiate(Some(&spec), None, None)
        .unwrap_err()
        .is_parameter_error());

    let spec = PssParameterSpec::new("SHA-256", 32).with_trailer_field(2);
    assert!(negotiate(Some(&spec), None, None)
        .unwrap_err()
        .is_parameter_error());
}

#[test]
#[parallel]
fn test_salt_boundaries() {
    /* 1024 bit key: 128 bytes */
    let cases = [
        ("SHA-1", 106),
        ("SHA-256", 94),
        ("SHA-384", 78),
        ("SHA-512", 62),
    ];
    for (digest, max_salt) in cases {
        let ok = PssParameterSpec::new(digest, max_salt);
        ret_or_panic!(negotiate(Some(&ok), Some(128), None));
        let too_big = PssParameterSpec::new(digest, max_salt + 1);
        let err = negotiate(Some(&too_big), Some(128), None).unwrap_err();
        assert!(err.is_parameter_error());
        /* and one byte more key makes it fit again */
        ret_or_panic!(negotiate(Some(&too_big), Some(129), None));
    }

    let huge = PssParameterSpec::new("SHA-256", usize::MAX);
    assert!(negotiate(Some(&huge), Some(512), None)
        .unwrap_err()
        .is_parameter_error());
    /* not checked without a key */
    ret_or_panic!(negotiate(Some(&huge), None, None));
}

/* Largest salt for each digest with a 1024 bit key */
const MAX_SALT_1024: [(&str, usize); 5] = [
    ("SHA-1", 106),
    ("SHA-224", 98),
    ("SHA-256", 94),
    ("SHA-384", 78),
    ("SHA-512", 62),
];

#[test]
#[parallel]
fn test_engine_salt_boundaries() {
    let tok = TestToken::with_1024();
    for (digest, max_salt) in MAX_SALT_1024 {
        let mut signer = tok.engine("RSASSA-PSS");
        ret_or_panic!(signer.set_key(tok.private.clone(), OpMode::Sign));

        let fits = PssParameterSpec::new(digest, max_salt);
        ret_or_panic!(signer.set_parameters(Some(&fits)));
        let p = signer.get_parameters().unwrap();
        assert_eq!(p.min_key_len_bytes(), Some(128));

        let too_big = PssParameterSpec::new(digest, max_salt + 1);
        let err = signer.set_parameters(Some(&too_big)).unwrap_err();
        assert!(err.is_parameter_error(), "{}", digest);
        /* the previous parameters are still in place */
        assert_eq!(signer.get_parameters(), Some(p));
        assert_eq!(signer.state(), State::Parameterized);
    }
    tok.assert_clean();

    /* the salt fills the whole encoded message and still verifies */
    let spec = PssParameterSpec::new("SHA-256", 94);
    let mut signer = tok.signer("RSASSA-PSS", Some(&spec));
    let sig = sign_message(&mut signer, TEST_MESSAGE);
    let mut verifier = tok.verifier("RSASSA-PSS", Some(&spec));
    assert!(verify_message(&mut verifier, TEST_MESSAGE, &sig));
}

#[test]
#[parallel]
fn test_key_binding_salt_boundaries() {
    let tok = TestToken::with_1024();
    for (digest, max_salt) in MAX_SALT_1024 {
        let fits = PssParameterSpec::new(digest, max_salt);
        let mut signer = tok.engine("RSASSA-PSS");
        ret_or_panic!(signer.set_parameters(Some(&fits)));
        ret_or_panic!(signer.set_key(tok.private.clone(), OpMode::Sign));
        assert_eq!(signer.state(), State::Parameterized);

        /* without a key the salt can't be checked yet */
        let too_big = PssParameterSpec::new(digest, max_salt + 1);
        let mut verifier = tok.engine("RSASSA-PSS");
        ret_or_panic!(verifier.set_parameters(Some(&too_big)));
        let err = verifier
            .set_key(tok.public.clone(), OpMode::Verify)
            .unwrap_err();
        assert!(err.is_key_error(), "{}", digest);
        assert!(verifier.key().is_none());
        assert_eq!(verifier.state(), State::Idle);
        assert_eq!(tok.soft.outstanding_key_handles(), 1);
    }
    tok.assert_clean();
}

#[test]
#[parallel]
fn test_accepted_2048_sha256() {
    let tok = TestToken::with_2048();
    let mut signer = tok.engine("RSASSA-PSS");
    ret_or_panic!(signer.set_key(tok.private.clone(), OpMode::Sign));
    assert_eq!(signer.state(), State::Keyed);
    let spec = PssParameterSpec::new("SHA-256", 32);
    ret_or_panic!(signer.set_parameters(Some(&spec)));
    assert_eq!(signer.state(), State::Parameterized);

    let p = signer.get_parameters().unwrap();
    assert_eq!(p.salt_len(), 32);
    assert_eq!(p.min_key_len_bytes(), Some(66));
}

#[test]
#[parallel]
fn test_rejected_1024_sha512() {
    let tok = TestToken::with_1024();
    let mut signer = tok.engine("SHA512withRSASSA-PSS");
    ret_or_panic!(signer.set_key(tok.private.clone(), OpMode::Sign));
    let before = ret_or_panic!(signer.pool().stats());

    let spec = PssParameterSpec::new("SHA-512", 64);
    let err = signer.set_parameters(Some(&spec)).unwrap_err();
    assert!(err.is_parameter_error());
    assert_eq!(signer.get_parameters(), None);
    assert_eq!(signer.state(), State::Keyed);

    /* no session was touched */
    assert_eq!(ret_or_panic!(signer.pool().stats()), before);
    assert_eq!(tok.soft.active_operations(), 0);

    /* the defaults for SHA-512 don't fit either */
    assert!(signer.update(TEST_MESSAGE).unwrap_err().is_parameter_error());
}

#[test]
#[parallel]
fn test_validation_before_token_calls() {
    let token: Arc<dyn TokenClient> = Arc::new(DeadToken);
    let mut engine = ret_or_panic!(PssSignature::with_config(
        token,
        "SHA256withRSASSA-PSS",
        Config::default()
    ));
    let spec = PssParameterSpec::new("SHA-384", 48);
    assert!(engine
        .set_parameters(Some(&spec))
        .unwrap_err()
        .is_parameter_error());
    let spec = PssParameterSpec::new("SHA-256", 48);
    ret_or_panic!(engine.set_parameters(Some(&spec)));
    assert_eq!(engine.state(), State::Idle);

    assert!(engine.update(TEST_MESSAGE).unwrap_err().is_key_error());
    assert!(engine.sign().unwrap_err().is_key_error());
    assert!(engine.verify(&[0u8; 128]).unwrap_err().is_key_error());

    /* wrong class or algorithm is caught before asking the token */
    let key = Key::rsa_public(b"k", 2048);
    assert!(engine.set_key(key, OpMode::Sign).unwrap_err().is_key_error());
    let key = Key::new(b"k", KeyClass::Private, "EC", 256);
    assert!(engine.set_key(key, OpMode::Sign).unwrap_err().is_key_error());
}

#[test]
#[parallel]
fn test_parameters_required() {
    let tok = TestToken::with_2048();
    let mut signer = tok.signer("RSASSA-PSS", None);
    assert!(signer.sign().unwrap_err().is_parameter_error());
    assert!(signer.update(TEST_MESSAGE).unwrap_err().is_parameter_error());
    assert!(signer
        .set_parameters(None)
        .unwrap_err()
        .is_parameter_error());
    drop(signer);
    tok.assert_clean();
}

#[test]
#[parallel]
fn test_lazy_defaults() {
    let tok = TestToken::with_2048();
    let mut signer = tok.signer("SHA384withRSASSA-PSS", None);
    assert_eq!(signer.get_parameters(), None);
    ret_or_panic!(signer.update(TEST_MESSAGE));
    let p = signer.get_parameters().unwrap();
    assert_eq!(p.digest(), DigestAlgorithm::Sha384);
    assert_eq!(p.salt_len(), 48);
    let sig = ret_or_panic!(signer.sign());

    let mut verifier = tok.verifier("SHA384withRSASSA-PSS", None);
    assert!(verify_message(&mut verifier, TEST_MESSAGE, &sig));
}

#[test]
#[parallel]
fn test_set_parameters_while_active() {
    let tok = TestToken::with_2048();
    let mut signer = tok.signer("SHA256withRSASSA-PSS", None);
    ret_or_panic!(signer.update(b"test"));
    assert_eq!(signer.state(), State::Active);

    let spec = PssParameterSpec::new("SHA-256", 20);
    let err = signer.set_parameters(Some(&spec)).unwrap_err();
    assert!(err.is_state_error());

    /* the operation is unaffected */
    ret_or_panic!(signer.update(b" message"));
    let sig = ret_or_panic!(signer.sign());
    let mut verifier = tok.verifier("SHA256withRSASSA-PSS", None);
    assert!(verify_message(&mut verifier, TEST_MESSAGE, &sig));
}

#[test]
#[parallel]
fn test_set_parameters_while_initialized() {
    let tok = TestToken::with_2048();
    let mut signer = tok.signer("SHA256withRSASSA-PSS", None);
    ret_or_panic!(signer.ensure_initialized());
    assert_eq!(signer.state(), State::Initialized);
    assert_eq!(signer.get_parameters().unwrap().salt_len(), 32);

    /* no data yet, the operation restarts with the new parameters */
    let spec = PssParameterSpec::new("SHA-256", 20);
    ret_or_panic!(signer.set_parameters(Some(&spec)));
    assert_eq!(signer.state(), State::Parameterized);
    assert_eq!(tok.soft.active_operations(), 0);

    let sig = sign_message(&mut signer, TEST_MESSAGE);
    let mut verifier = tok.verifier("SHA256withRSASSA-PSS", Some(&spec));
    assert!(verify_message(&mut verifier, TEST_MESSAGE, &sig));

    /* a verifier expecting the default salt rejects it */
    let mut verifier = tok.verifier("SHA256withRSASSA-PSS", None);
    assert!(!verify_message(&mut verifier, TEST_MESSAGE, &sig));
}

#[test]
#[parallel]
fn test_same_parameters_noop() {
    let tok = TestToken::with_2048();
    let spec = PssParameterSpec::new("SHA256", 32);
    let mut signer = tok.signer("SHA256withRSASSA-PSS", Some(&spec));
    ret_or_panic!(signer.ensure_initialized());

    /* equal parameters keep the initialized operation */
    let same = PssParameterSpec::new("SHA-256", 32);
    ret_or_panic!(signer.set_parameters(Some(&same)));
    assert_eq!(signer.state(), State::Initialized);
    assert_eq!(tok.soft.active_operations(), 1);
    ret_or_panic!(signer.set_parameters(None));
    assert_eq!(signer.state(), State::Initialized);
}

#[test]
#[parallel]
fn test_key_recheck_on_binding() {
    let big = TestToken::with_2048();
    let small = TestToken::with_1024();

    let spec = PssParameterSpec::new("SHA-256", 95);
    let mut signer = big.signer("RSASSA-PSS", Some(&spec));
    assert_eq!(signer.state(), State::Parameterized);

    /* 95 + 32 + 2 = 129 > 128 */
    let err = signer.set_key(small.private.clone(), OpMode::Sign).unwrap_err();
    assert!(err.is_key_error());
    /* the previous key stays bound */
    assert_eq!(signer.key().unwrap().bits(), 2048);

    let spec = PssParameterSpec::new("SHA-256", 94);
    ret_or_panic!(signer.set_parameters(Some(&spec)));
    let mut signer = small.engine("RSASSA-PSS");
    ret_or_panic!(signer.set_parameters(Some(&spec)));
    ret_or_panic!(signer.set_key(small.private.clone(), OpMode::Sign));
    let sig = sign_message(&mut signer, TEST_MESSAGE);

    let mut verifier = small.verifier("RSASSA-PSS", Some(&spec));
    assert!(verify_message(&mut verifier, TEST_MESSAGE, &sig));
}

#[test]
#[parallel]
fn test_key_size_limits() {
    let tok = TestToken::with_1024();
    let info = mechanism::MechanismInfo {
        min_key_bits: 2048,
        max_key_bits: 4096,
        flags: mechanism::MechanismFlags::SIGN
            | mechanism::MechanismFlags::VERIFY,
    };
    ret_or_panic!(tok
        .soft
        .set_mechanisms(&[(MechanismType::Sha256RsaPkcsPss, info)]));
    let mut signer = tok.engine("SHA256withRSASSA-PSS");
    let err = signer.set_key(tok.private.clone(), OpMode::Sign).unwrap_err();
    assert!(err.is_key_error());
    assert_eq!(signer.state(), State::Idle);

    /* engine side limits */
    let tok = TestToken::with_1024();
    let mut config = Config::default();
    config.min_key_bits = Some(2048);
    let mut signer = tok.engine_with_config("SHA256withRSASSA-PSS", config);
    let err = signer.set_key(tok.private.clone(), OpMode::Sign).unwrap_err();
    assert!(err.is_key_error());

    let mut config = Config::default();
    config.max_key_bits = Some(1024);
    let mut signer = tok.engine_with_config("SHA256withRSASSA-PSS", config);
    ret_or_panic!(signer.set_key(tok.private.clone(), OpMode::Sign));
    let big = TestToken::with_2048();
    let err = signer.set_key(big.private.clone(), OpMode::Sign).unwrap_err();
    assert!(err.is_key_error());
}

#[test]
#[parallel]
fn test_unknown_algorithm() {
    let tok = TestToken::with_1024();
    let err = PssSignature::with_config(
        tok.client(),
        "SHA256withRSA",
        Config::default(),
    )
    .unwrap_err();
    assert!(err.is_parameter_error());

    let err = PssSignature::with_mechanism(
        tok.client(),
        "SHA384withRSASSA-PSS",
        MechanismType::Sha256RsaPkcsPss,
        Config::default(),
    )
    .unwrap_err();
    assert!(err.is_parameter_error());
}
