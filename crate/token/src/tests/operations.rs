use pkcs11_sys::{
    CKM_SHA_1, CKM_SHA1_RSA_PKCS, CKM_SHA256, CKM_SHA256_RSA_PKCS, CKR_DEVICE_ERROR,
    CKR_MECHANISM_INVALID,
};

use super::logged_in_session;
use crate::{
    CryptoOperation, FinalOutput, Key, KeyGenOptions, KeyGenParams, KeyPair, KeyUsage, Mechanism,
    OperationKind, OperationState, Session, TResult, TokenError,
};

const IV: [u8; 16] = [7; 16];

fn aes_key(session: &Session, usage: KeyUsage) -> TResult<Key<'_>> {
    session
        .generate(&KeyGenParams::aes(256), &KeyGenOptions::with_usage(usage))?
        .into_secret()
}

fn rsa_pair(session: &Session) -> TResult<KeyPair<'_>> {
    session
        .generate(
            &KeyGenParams::rsa(1024),
            &KeyGenOptions::with_usage(KeyUsage::SIGN | KeyUsage::VERIFY),
        )?
        .into_pair()
}

#[test]
fn test_calls_out_of_order() -> TResult<()> {
    let (token, session) = logged_in_session()?;
    token.clear_journal();
    let mut digest = CryptoOperation::new(&session, OperationKind::Digest);
    assert_eq!(digest.state(), OperationState::Idle);
    assert!(matches!(
        digest.update(b"data"),
        Err(TokenError::InvalidOperationState(_))
    ));
    assert!(matches!(
        digest.finalize(None),
        Err(TokenError::InvalidOperationState(_))
    ));
    assert_eq!(token.calls("C_DigestUpdate"), 0);
    assert_eq!(token.calls("C_DigestFinal"), 0);

    digest.init(Mechanism::new(CKM_SHA256), None)?;
    assert!(matches!(
        digest.init(Mechanism::new(CKM_SHA256), None),
        Err(TokenError::InvalidOperationState(_))
    ));
    digest.update(b"data")?;
    assert!(matches!(digest.finalize(None)?, FinalOutput::Data(hash) if hash.len() == 32));
    assert_eq!(digest.state(), OperationState::Finalized);
    assert!(matches!(
        digest.update(b"more"),
        Err(TokenError::InvalidOperationState(_))
    ));
    assert!(matches!(
        digest.finalize(None),
        Err(TokenError::InvalidOperationState(_))
    ));
    assert_eq!(token.calls("C_DigestInit"), 1);
    assert_eq!(token.calls("C_DigestUpdate"), 1);
    Ok(())
}

#[test]
fn test_one_live_operation_per_kind() -> TResult<()> {
    let (token, session) = logged_in_session()?;
    let pair = rsa_pair(&session)?;
    let mechanism = Mechanism::new(CKM_SHA256_RSA_PKCS);
    let mut signer = session.sign_init(mechanism.clone(), &pair.private_key)?;
    assert!(matches!(
        session.sign_init(mechanism.clone(), &pair.private_key),
        Err(TokenError::InvalidOperationState(_))
    ));
    assert_eq!(token.calls("C_SignInit"), 1);

    // other kinds may run alongside
    let mut digest = session.digest_init(Mechanism::new(CKM_SHA_1))?;
    digest.update(b"abc")?;
    assert_eq!(
        hex::encode(digest.finalize()?),
        "a9993e364706816aba3e25717850c26c9cd0d89d"
    );

    signer.update(b"message")?;
    let signature = signer.finalize()?;
    assert_eq!(signer.state(), OperationState::Finalized);
    // the slot is free once finalized
    let mut verifier = session.verify_init(mechanism, &pair.public_key)?;
    verifier.update(b"message")?;
    assert!(verifier.finalize(&signature)?);
    Ok(())
}

#[test]
fn test_abandoned_operation_is_drained() -> TResult<()> {
    let (token, session) = logged_in_session()?;
    let key = aes_key(&session, KeyUsage::ENCRYPT | KeyUsage::DECRYPT)?;
    {
        let mut encryptor = session.encrypt_init(Mechanism::aes_cbc(&IV)?, &key)?;
        encryptor.update(&[1; 32])?;
    }
    assert!(token.calls("C_EncryptFinal") >= 1);
    // neither the session nor the token still hold an encryption
    let ciphertext = session.encrypt(Mechanism::aes_cbc(&IV)?, &key, &[2; 16])?;
    assert_eq!(ciphertext.len(), 16);

    let pair = rsa_pair(&session)?;
    let mechanism = Mechanism::new(CKM_SHA1_RSA_PKCS);
    {
        let mut verifier = session.verify_init(mechanism.clone(), &pair.public_key)?;
        verifier.update(b"never checked")?;
    }
    let signature = session.sign(mechanism.clone(), &pair.private_key, b"checked")?;
    assert!(session.verify(mechanism, &pair.public_key, b"checked", &signature)?);
    Ok(())
}

#[test]
fn test_key_usage_checked_before_init() -> TResult<()> {
    let (token, session) = logged_in_session()?;
    let key = aes_key(&session, KeyUsage::ENCRYPT)?;
    token.clear_journal();
    assert!(matches!(
        session.decrypt_init(Mechanism::aes_cbc(&IV)?, &key),
        Err(TokenError::KeyUsage(_))
    ));
    assert_eq!(token.calls("C_DecryptInit"), 0);

    let pair = rsa_pair(&session)?;
    token.clear_journal();
    // a public key never signs, whatever its flags
    assert!(matches!(
        session.sign_init(Mechanism::new(CKM_SHA256_RSA_PKCS), &pair.public_key),
        Err(TokenError::KeyUsage(_))
    ));
    assert!(matches!(
        session.verify_init(Mechanism::new(CKM_SHA256_RSA_PKCS), &key),
        Err(TokenError::KeyUsage(_))
    ));
    let mut digest = CryptoOperation::new(&session, OperationKind::Digest);
    assert!(matches!(
        digest.init(Mechanism::new(CKM_SHA256), Some(&key)),
        Err(TokenError::KeyUsage(_))
    ));
    let mut encrypt = CryptoOperation::new(&session, OperationKind::Encrypt);
    assert!(matches!(
        encrypt.init(Mechanism::aes_cbc(&IV)?, None),
        Err(TokenError::KeyUsage(_))
    ));
    assert_eq!(token.calls("C_SignInit"), 0);
    assert_eq!(token.calls("C_VerifyInit"), 0);
    assert_eq!(token.calls("C_DigestInit"), 0);
    assert_eq!(token.calls("C_EncryptInit"), 0);
    // a rejected init leaves the operation usable
    assert_eq!(digest.state(), OperationState::Idle);
    digest.init(Mechanism::new(CKM_SHA256), None)?;
    Ok(())
}

#[test]
fn test_failed_init_releases_kind() -> TResult<()> {
    let (token, session) = logged_in_session()?;
    let err = session
        .digest_init(Mechanism::new(CKM_SHA256_RSA_PKCS))
        .err()
        .unwrap();
    assert_eq!(err.rv(), Some(CKR_MECHANISM_INVALID));

    token.fail("C_DigestInit", CKR_DEVICE_ERROR);
    let err = session.digest_init(Mechanism::new(CKM_SHA256)).err().unwrap();
    assert_eq!(err.rv(), Some(CKR_DEVICE_ERROR));
    token.heal("C_DigestInit");
    assert_eq!(session.digest(Mechanism::new(CKM_SHA256), b"")?.len(), 32);
    Ok(())
}

#[test]
fn test_failed_update_ends_operation() -> TResult<()> {
    let (token, session) = logged_in_session()?;
    let mut digest = session.digest_init(Mechanism::new(CKM_SHA256))?;
    token.fail("C_DigestUpdate", CKR_DEVICE_ERROR);
    let err = digest.update(b"data").unwrap_err();
    assert_eq!(err.rv(), Some(CKR_DEVICE_ERROR));
    assert_eq!(digest.state(), OperationState::Finalized);
    token.heal("C_DigestUpdate");
    assert!(matches!(
        digest.update(b"data"),
        Err(TokenError::InvalidOperationState(_))
    ));
    Ok(())
}

#[test]
fn test_streaming_outputs() -> TResult<()> {
    let (_token, session) = logged_in_session()?;
    let key = aes_key(&session, KeyUsage::ENCRYPT | KeyUsage::DECRYPT)?;
    let mut encryptor = session.encrypt_init(Mechanism::aes_cbc(&IV)?, &key)?;
    assert!(encryptor.update(&[3; 10])?.is_empty());
    let first = encryptor.update(&[3; 6])?;
    assert_eq!(first.len(), 16);
    let second = encryptor.update(&[3; 16])?;
    assert_eq!(second.len(), 16);
    assert!(encryptor.finalize()?.is_empty());

    let ciphertext = [first, second].concat();
    let one_shot = session.encrypt(Mechanism::aes_cbc(&IV)?, &key, &[3; 32])?;
    assert_eq!(ciphertext, one_shot);

    // without padding the data must fill whole blocks
    let err = session
        .encrypt(Mechanism::aes_cbc(&IV)?, &key, &[3; 20])
        .unwrap_err();
    assert!(err.rv().is_some());
    Ok(())
}

#[test]
fn test_verify_rejections() -> TResult<()> {
    let (_token, session) = logged_in_session()?;
    let pair = rsa_pair(&session)?;
    let mechanism = Mechanism::new(CKM_SHA256_RSA_PKCS);
    let signature = session.sign(mechanism.clone(), &pair.private_key, b"signed")?;
    assert!(!session.verify(mechanism.clone(), &pair.public_key, b"other", &signature)?);
    // a truncated signature is a mismatch, not an error
    assert!(!session.verify(
        mechanism.clone(),
        &pair.public_key,
        b"signed",
        &signature[..64]
    )?);

    let mut verifier = CryptoOperation::new(&session, OperationKind::Verify);
    verifier.init(mechanism, Some(&pair.public_key))?;
    assert!(matches!(
        verifier.finalize(None),
        Err(TokenError::InvalidOperationState(_))
    ));
    assert_eq!(verifier.state(), OperationState::Initialized);
    assert_eq!(
        verifier.finalize(Some(&signature))?,
        FinalOutput::Verified(false)
    );
    Ok(())
}
