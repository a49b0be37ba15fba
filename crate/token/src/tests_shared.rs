//! Token test suite shared by the in-memory token tests and the crates testing real tokens.
//! Each caller opens a started and logged in session and delegates to these helpers.
#![allow(clippy::panic_in_result_fn)]
#![allow(clippy::missing_panics_doc)]

use std::path::PathBuf;

use pkcs11_sys::{
    CK_SLOT_ID, CKA_EC_POINT, CKK_AES, CKM_SHA256, CKM_SHA256_RSA_PKCS, CKO_SECRET_KEY,
};
use tracing::{debug, info};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::{
    AttributeMap, EcdhParams, KeyFamily, KeyGenOptions, KeyGenParams, KeyUsage, Mechanism,
    Module, NamedCurve, RsaOaepParams, Session, TResult, TokenConfig, TokenError, UserType,
    decode_ec_point, test_helpers::log_init, token_ensure,
};

pub const AES_PLAINTEXT: &[u8] = b"12345678901234567890123456789012";
pub const RSA_MESSAGE: &[u8] = b"Test message";

/// Where to find the token under test.
#[derive(Debug, Clone)]
pub struct TokenTestConfig {
    pub lib_path: PathBuf,
    pub slot_id: u64,
    pub user_pin: String,
    /// Whether the token can wrap a secret key under an RSA OAEP public key
    pub supports_rsa_wrap: bool,
}

/// The library path from `env_var`, or `default` when it is not set.
#[must_use]
pub fn lib_path(env_var: &str, default: &str) -> PathBuf {
    std::env::var(env_var).map_or_else(|_| PathBuf::from(default), PathBuf::from)
}

impl TokenTestConfig {
    fn token_config(&self) -> TokenConfig {
        let mut config = TokenConfig::default();
        config.library_path = Some(self.lib_path.clone());
        config.slot_id = self.slot_id;
        config.user_pin = Some(Zeroizing::new(self.user_pin.clone()));
        config
    }
}

/// Load the module and open a read/write session logged in as the user.
pub fn open_session(cfg: &TokenTestConfig) -> TResult<Session> {
    log_init(None);
    let module = Module::from_config(&cfg.token_config())?;
    let slots = module.slot_ids(true)?;
    info!("Available slots: {slots:?}");
    let slot_id = CK_SLOT_ID::try_from(cfg.slot_id)?;
    token_ensure!(
        slots.contains(&slot_id),
        "Configured slot {} is not available in {:?}",
        cfg.slot_id,
        slots
    );
    module.open_session(&cfg.token_config())
}

pub fn get_info(cfg: &TokenTestConfig) -> TResult<()> {
    log_init(None);
    let module = Module::from_config(&cfg.token_config())?;
    let info = module.info()?;
    info!("Connected to the token: {info}");
    Ok(())
}

/// A label unique to one test run, so concurrent runs do not see each other's objects.
fn unique_label(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4())
}

fn by_label(label: &str) -> AttributeMap {
    AttributeMap::new().with("label", label)
}

pub fn session_lifecycle(session: &mut Session, pin: &str) -> TResult<()> {
    log_init(None);
    session.start(true)?;
    session.start(true)?;
    session.login(pin, UserType::User)?;
    session.login(pin, UserType::User)?;
    token_ensure!(
        session.logged_in_as() == Some(UserType::User),
        "the session should be logged in once"
    );
    let session_info = session.info()?;
    debug!("session info: {session_info:?}");
    token_ensure!(
        session_info.slot_id == session.slot_id(),
        "the session is on slot {}",
        session_info.slot_id
    );
    Ok(())
}

pub fn aes_cbc_round_trip(session: &Session) -> TResult<()> {
    log_init(None);
    let label = unique_label("aes-cbc");
    let key = session
        .generate(
            &KeyGenParams::aes(256),
            &KeyGenOptions::with_usage(KeyUsage::ENCRYPT | KeyUsage::DECRYPT).label(&label),
        )?
        .into_secret()?;
    let iv = session.generate_random(16)?;
    let ciphertext = session.encrypt(Mechanism::aes_cbc(&iv)?, &key, AES_PLAINTEXT)?;
    token_ensure!(
        ciphertext.len() == AES_PLAINTEXT.len(),
        "CBC without padding keeps the length"
    );
    token_ensure!(ciphertext != AES_PLAINTEXT, "the plaintext was not encrypted");
    let plaintext = session.decrypt(Mechanism::aes_cbc(&iv)?, &key, &ciphertext)?;
    token_ensure!(plaintext == AES_PLAINTEXT, "AES-CBC round trip failed");
    key.destroy()
}

/// Encrypt in uneven chunks with padding, then decrypt in one go.
pub fn aes_cbc_pad_streaming(session: &Session) -> TResult<()> {
    log_init(None);
    let key = session
        .generate(
            &KeyGenParams::aes(128),
            &KeyGenOptions::with_usage(KeyUsage::ENCRYPT | KeyUsage::DECRYPT),
        )?
        .into_secret()?;
    let iv = session.generate_random(16)?;
    let data: Vec<u8> = (0..=200_u8).collect();
    let mut encryptor = session.encrypt_init(Mechanism::aes_cbc_pad(&iv)?, &key)?;
    let mut ciphertext = Vec::new();
    for chunk in data.chunks(37) {
        ciphertext.extend(encryptor.update(chunk)?);
    }
    ciphertext.extend(encryptor.finalize()?);
    token_ensure!(ciphertext.len() == 208, "201 bytes pad to 208 bytes");
    let plaintext = session.decrypt(Mechanism::aes_cbc_pad(&iv)?, &key, &ciphertext)?;
    token_ensure!(plaintext == data, "AES-CBC-PAD round trip failed");
    key.destroy()
}

pub fn rsa_sign_verify(session: &Session) -> TResult<()> {
    log_init(None);
    let pair = session
        .generate(
            &KeyGenParams::rsa(1024),
            &KeyGenOptions::with_usage(KeyUsage::SIGN | KeyUsage::VERIFY),
        )?
        .into_pair()?;
    let mechanism = Mechanism::new(CKM_SHA256_RSA_PKCS);
    let signature = session.sign(mechanism.clone(), &pair.private_key, RSA_MESSAGE)?;
    token_ensure!(signature.len() == 128, "an RSA-1024 signature is 128 bytes");
    token_ensure!(
        session.verify(mechanism.clone(), &pair.public_key, RSA_MESSAGE, &signature)?,
        "the signature should verify"
    );
    let mut mutated = signature;
    if let Some(last) = mutated.last_mut() {
        *last ^= 0x01;
    }
    token_ensure!(
        !session.verify(mechanism, &pair.public_key, RSA_MESSAGE, &mutated)?,
        "a mutated signature should not verify"
    );
    pair.private_key.destroy()?;
    pair.public_key.destroy()
}

pub fn digest_sha256(session: &Session) -> TResult<()> {
    log_init(None);
    let mut digest = session.digest_init(Mechanism::new(CKM_SHA256))?;
    digest.update(b"a")?;
    digest.update(b"bc")?;
    let hash = digest.finalize()?;
    token_ensure!(
        hex::encode(hash) == "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad",
        "wrong SHA-256 of abc"
    );
    Ok(())
}

pub fn find_and_destroy_objects(session: &Session) -> TResult<()> {
    log_init(None);
    let label = unique_label("find");
    let options = KeyGenOptions::with_usage(KeyUsage::ENCRYPT).label(&label);
    for _ in 0..3 {
        session.generate(&KeyGenParams::aes(128), &options)?;
    }
    let filter = by_label(&label)
        .with("class", u64::from(CKO_SECRET_KEY))
        .with("keyType", u64::from(CKK_AES));
    let found = session.find_objects(&filter)?;
    token_ensure!(found.len() == 3, "expected 3 objects, found {}", found.len());
    for object in &found {
        token_ensure!(
            object.label()?.as_deref() == Some(label.as_str()),
            "unexpected label"
        );
    }
    token_ensure!(session.destroy_objects(&filter)? == 3, "3 objects to destroy");
    token_ensure!(
        session.find_object(&filter)?.is_none(),
        "the objects should be gone"
    );
    Ok(())
}

pub fn export_rsa_public_keys(session: &Session) -> TResult<()> {
    log_init(None);
    for (usage, expected) in [(KeyUsage::VERIFY, "sig"), (KeyUsage::ENCRYPT, "enc")] {
        let pair = session
            .generate(&KeyGenParams::rsa(1024), &KeyGenOptions::with_usage(usage))?
            .into_pair()?;
        let jwk = pair.public_key.export_jwk()?;
        token_ensure!(jwk.kty == "RSA", "unexpected key type {}", jwk.kty);
        token_ensure!(
            jwk.use_.as_deref() == Some(expected),
            "expected use {expected}, got {:?}",
            jwk.use_
        );
        token_ensure!(jwk.e.as_deref() == Some("AQAB"), "unexpected public exponent");
        token_ensure!(jwk.d.is_none(), "a public key has no private exponent");
        pair.private_key.destroy()?;
        pair.public_key.destroy()?;
    }
    let pair = session
        .generate(
            &KeyGenParams::rsa(1024),
            &KeyGenOptions::with_usage(KeyUsage::SIGN),
        )?
        .into_pair()?;
    let exported = pair.public_key.export_jwk();
    token_ensure!(
        matches!(exported, Err(TokenError::NoAllowedUsage)),
        "a public key without verify or encrypt usage cannot be exported"
    );
    pair.private_key.destroy()?;
    pair.public_key.destroy()
}

pub fn export_ec_public_key(session: &Session) -> TResult<()> {
    log_init(None);
    let pair = session
        .generate(
            &KeyGenParams::ecdsa(NamedCurve::Secp256r1),
            &KeyGenOptions::with_usage(KeyUsage::SIGN | KeyUsage::VERIFY),
        )?
        .into_pair()?;
    let KeyFamily::Ecdsa(ec) = pair.public_key.family()? else {
        return Err(TokenError::UnsupportedKeyType("expected an EC key".to_owned()));
    };
    token_ensure!(ec.curve()? == NamedCurve::Secp256r1, "unexpected curve");
    let jwk = pair.public_key.export_jwk()?;
    token_ensure!(jwk.crv.as_deref() == Some("P-256"), "unexpected curve name");
    token_ensure!(jwk.use_.as_deref() == Some("sig"), "unexpected use");
    // 32 bytes encode to 43 base64url characters
    for coordinate in [&jwk.x, &jwk.y] {
        token_ensure!(
            coordinate.as_ref().map(String::len) == Some(43),
            "unexpected coordinate {coordinate:?}"
        );
    }
    pair.private_key.destroy()?;
    pair.public_key.destroy()
}

pub fn rsa_oaep_wrap_unwrap(session: &Session) -> TResult<()> {
    log_init(None);
    let pair = session
        .generate(
            &KeyGenParams::rsa(2048),
            &KeyGenOptions::with_usage(KeyUsage::WRAP | KeyUsage::UNWRAP),
        )?
        .into_pair()?;
    let key = session
        .generate(
            &KeyGenParams::aes(256),
            &KeyGenOptions::with_usage(KeyUsage::ENCRYPT | KeyUsage::DECRYPT).extractable(true),
        )?
        .into_secret()?;
    let mechanism = Mechanism::rsa_oaep(RsaOaepParams::default());
    let wrapped = session.wrap_key(&pair.public_key, &mechanism, &key)?;
    token_ensure!(wrapped.len() == 256, "an RSA-2048 wrap is 256 bytes");
    let attributes = AttributeMap::new()
        .with("class", u64::from(CKO_SECRET_KEY))
        .with("keyType", u64::from(CKK_AES))
        .with("token", false)
        .with("encrypt", true)
        .with("decrypt", true);
    let unwrapped = session.unwrap_key(&pair.private_key, &mechanism, &attributes, &wrapped)?;

    let iv = session.generate_random(16)?;
    let ciphertext = session.encrypt(Mechanism::aes_cbc(&iv)?, &key, AES_PLAINTEXT)?;
    let plaintext = session.decrypt(Mechanism::aes_cbc(&iv)?, &unwrapped, &ciphertext)?;
    token_ensure!(
        plaintext == AES_PLAINTEXT,
        "the unwrapped key differs from the wrapped one"
    );
    for object in [unwrapped, key, pair.private_key, pair.public_key] {
        object.destroy()?;
    }
    Ok(())
}

/// Both parties of an ECDH exchange derive the same AES key.
pub fn ecdh_derive(session: &Session) -> TResult<()> {
    log_init(None);
    let options = KeyGenOptions::with_usage(KeyUsage::DERIVE);
    let alice = session
        .generate(&KeyGenParams::ecdsa(NamedCurve::Secp256r1), &options)?
        .into_pair()?;
    let bob = session
        .generate(&KeyGenParams::ecdsa(NamedCurve::Secp256r1), &options)?
        .into_pair()?;
    let derived_template = AttributeMap::new()
        .with("class", u64::from(CKO_SECRET_KEY))
        .with("keyType", u64::from(CKK_AES))
        .with("valueLen", 32_u64)
        .with("token", false)
        .with("sensitive", false)
        .with("extractable", true)
        .with("encrypt", true)
        .with("decrypt", true);

    let mut secrets = Vec::new();
    for (own, peer) in [(&alice, &bob), (&bob, &alice)] {
        let encoded = peer
            .public_key
            .get_attribute(CKA_EC_POINT)?
            .ok_or_else(|| TokenError::InvalidPointSize("missing EC point".to_owned()))?;
        let point = decode_ec_point(&encoded, NamedCurve::Secp256r1.byte_size())?;
        let mut public_data = vec![0x04];
        public_data.extend(point.x.iter().chain(point.y.iter()));
        let derived = session.derive_key(
            &Mechanism::ecdh1_derive(EcdhParams::new(public_data)),
            &own.private_key,
            &derived_template,
        )?;
        let KeyFamily::Aes(aes) = derived.family()? else {
            return Err(TokenError::UnsupportedKeyType("expected an AES key".to_owned()));
        };
        secrets.push(aes.value()?);
        derived.destroy()?;
    }
    token_ensure!(
        secrets[0].is_some() && secrets[0] == secrets[1],
        "both parties should derive the same secret"
    );
    for object in [
        alice.private_key,
        alice.public_key,
        bob.private_key,
        bob.public_key,
    ] {
        object.destroy()?;
    }
    Ok(())
}

/// Run every test of the suite on `session`.
pub fn run_all(session: &Session, cfg: &TokenTestConfig) -> TResult<()> {
    aes_cbc_round_trip(session)?;
    aes_cbc_pad_streaming(session)?;
    rsa_sign_verify(session)?;
    digest_sha256(session)?;
    find_and_destroy_objects(session)?;
    export_rsa_public_keys(session)?;
    export_ec_public_key(session)?;
    if cfg.supports_rsa_wrap {
        rsa_oaep_wrap_unwrap(session)?;
    }
    ecdh_derive(session)
}
