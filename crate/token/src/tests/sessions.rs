use std::sync::Arc;

use pkcs11_sys::{
    CKA_VALUE, CKO_DATA, CKR_BUFFER_TOO_SMALL, CKR_DEVICE_ERROR, CKR_PIN_INCORRECT,
    CKS_RO_PUBLIC_SESSION, CKS_RO_USER_FUNCTIONS, CKS_RW_USER_FUNCTIONS,
};

use super::{SOFT_SLOT_ID, SOFT_USER_PIN, SoftToken, logged_in_session};
use crate::{
    AttributeMap, KeyGenOptions, KeyGenParams, KeyUsage, Session, TResult, TokenCapabilities,
    TokenError, UserType,
};

fn data_object(label: &str) -> AttributeMap {
    AttributeMap::new()
        .with("class", u64::from(CKO_DATA))
        .with("token", false)
        .with("label", label)
        .with("value", b"some data".as_slice())
}

#[test]
fn test_not_started() {
    let token = Arc::new(SoftToken::new());
    let mut session = Session::new(token.clone(), SOFT_SLOT_ID);
    assert!(matches!(
        session.generate_random(8),
        Err(TokenError::SessionNotStarted)
    ));
    assert!(matches!(
        session.login(SOFT_USER_PIN, UserType::User),
        Err(TokenError::SessionNotStarted)
    ));
    assert!(matches!(session.info(), Err(TokenError::SessionNotStarted)));
    // stopping a session never started does nothing
    session.stop().unwrap();
    assert_eq!(token.calls("C_CloseSession"), 0);
}

#[test]
fn test_logout_requires_login() -> TResult<()> {
    let token = Arc::new(SoftToken::new());
    let mut session = Session::new(token.clone(), SOFT_SLOT_ID);
    session.start(false)?;
    assert!(matches!(session.logout(), Err(TokenError::NotLoggedIn)));
    assert_eq!(token.calls("C_Logout"), 0);
    Ok(())
}

#[test]
fn test_session_states() -> TResult<()> {
    let token = Arc::new(SoftToken::new());
    let mut session = Session::new(token, SOFT_SLOT_ID);
    session.start(false)?;
    assert_eq!(session.info()?.state, CKS_RO_PUBLIC_SESSION);
    session.login(SOFT_USER_PIN, UserType::User)?;
    assert_eq!(session.info()?.state, CKS_RO_USER_FUNCTIONS);
    session.logout()?;
    assert_eq!(session.logged_in_as(), None);
    assert_eq!(session.info()?.state, CKS_RO_PUBLIC_SESSION);
    Ok(())
}

#[test]
fn test_start_is_idempotent() -> TResult<()> {
    let (token, mut session) = logged_in_session()?;
    session.start(true)?;
    assert_eq!(token.calls("C_OpenSession"), 1);
    assert_eq!(session.info()?.state, CKS_RW_USER_FUNCTIONS);
    Ok(())
}

#[test]
fn test_login_already_logged_in_elsewhere() -> TResult<()> {
    let (token, _first) = logged_in_session()?;
    let mut second = Session::new(token.clone(), SOFT_SLOT_ID);
    second.start(true)?;
    second.login(SOFT_USER_PIN, UserType::User)?;
    assert_eq!(second.logged_in_as(), Some(UserType::User));
    assert_eq!(token.calls("C_Login"), 2);
    Ok(())
}

#[test]
fn test_wrong_pin() -> TResult<()> {
    let token = Arc::new(SoftToken::new());
    let mut session = Session::new(token, SOFT_SLOT_ID);
    session.start(true)?;
    let err = session.login("0000", UserType::User).unwrap_err();
    assert_eq!(err.rv(), Some(CKR_PIN_INCORRECT));
    assert_eq!(session.logged_in_as(), None);
    Ok(())
}

#[test]
fn test_stop_and_restart() -> TResult<()> {
    let (token, mut session) = logged_in_session()?;
    session.create_object(&data_object("transient"))?;
    assert_eq!(token.object_count(), 1);
    session.stop()?;
    assert!(matches!(
        session.generate_random(4),
        Err(TokenError::SessionNotStarted)
    ));
    // session objects go with their session
    assert_eq!(token.object_count(), 0);
    session.start(true)?;
    assert_eq!(session.generate_random(4)?.len(), 4);
    assert_eq!(token.calls("C_OpenSession"), 2);
    Ok(())
}

#[test]
fn test_drop_closes_session() -> TResult<()> {
    let (token, session) = logged_in_session()?;
    drop(session);
    assert_eq!(token.calls("C_Logout"), 1);
    assert_eq!(token.calls("C_CloseSession"), 1);
    assert!(!token.is_logged_in());
    Ok(())
}

#[test]
fn test_data_object_attributes() -> TResult<()> {
    let (_token, session) = logged_in_session()?;
    let object = session.create_object(&data_object("my data"))?;
    assert_eq!(object.class()?, CKO_DATA);
    assert_eq!(object.label()?.as_deref(), Some("my data"));
    assert!(!object.is_token()?);
    assert_eq!(
        object.get_attribute(CKA_VALUE)?.as_deref(),
        Some(b"some data".as_slice())
    );
    assert_eq!(object.id()?, None);
    let handle = object.handle();
    assert_eq!(session.get_object(handle)?, object);
    object.destroy()?;
    assert!(matches!(
        session.get_object(handle),
        Err(TokenError::ObjectNotFound(h)) if h == handle
    ));
    assert!(matches!(
        session.destroy_object(handle),
        Err(TokenError::ObjectNotFound(_))
    ));
    Ok(())
}

#[test]
fn test_create_empty_object() -> TResult<()> {
    let (token, session) = logged_in_session()?;
    assert!(matches!(
        session.create_object(&AttributeMap::new()),
        Err(TokenError::EmptyTemplate)
    ));
    assert_eq!(token.calls("C_CreateObject"), 0);
    Ok(())
}

#[test]
fn test_attribute_read_retried_once() -> TResult<()> {
    let (token, session) = logged_in_session()?;
    let object = session.create_object(&data_object("grown"))?;
    token.clear_journal();
    token.understate_attribute_lengths(1);
    assert_eq!(object.label()?.as_deref(), Some("grown"));
    // short length, too small buffer, length, value
    assert_eq!(token.calls("C_GetAttributeValue"), 4);

    token.understate_attribute_lengths(2);
    let err = object.label().unwrap_err();
    assert_eq!(err.rv(), Some(CKR_BUFFER_TOO_SMALL));
    Ok(())
}

#[test]
fn test_sensitive_value_unavailable() -> TResult<()> {
    let (_token, session) = logged_in_session()?;
    let key = session
        .generate(
            &KeyGenParams::aes(128),
            &KeyGenOptions::with_usage(KeyUsage::ENCRYPT),
        )?
        .into_secret()?;
    assert!(key.is_sensitive()?);
    assert_eq!(key.get_attribute(CKA_VALUE)?, None);
    Ok(())
}

#[test]
fn test_find_in_batches() -> TResult<()> {
    let token = Arc::new(SoftToken::new());
    let mut session = Session::new(token.clone(), SOFT_SLOT_ID)
        .with_capabilities(TokenCapabilities::with_find_batch_size(2));
    session.start(true)?;
    for i in 0..5 {
        session.create_object(&data_object(&format!("batch {i}")))?;
    }
    token.clear_journal();
    let found = session.find_objects(&AttributeMap::new())?;
    assert_eq!(found.len(), 5);
    // 2 + 2 + 1 handles, then an empty batch
    assert_eq!(token.calls("C_FindObjects"), 4);
    assert_eq!(token.calls("C_FindObjectsFinal"), 1);

    let filter = AttributeMap::new().with("label", "batch 3");
    let found = session.find_objects(&filter)?;
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].label()?.as_deref(), Some("batch 3"));
    Ok(())
}

#[test]
fn test_find_cursor_released_on_failure() -> TResult<()> {
    let (token, session) = logged_in_session()?;
    session.create_object(&data_object("cursor"))?;
    token.fail("C_FindObjects", CKR_DEVICE_ERROR);
    let err = session.find_objects(&AttributeMap::new()).unwrap_err();
    assert_eq!(err.rv(), Some(CKR_DEVICE_ERROR));
    assert_eq!(token.calls("C_FindObjectsFinal"), 1);
    token.heal("C_FindObjects");
    // a fresh search can start
    assert_eq!(session.find_objects(&AttributeMap::new())?.len(), 1);
    Ok(())
}

#[test]
fn test_private_objects_need_login() -> TResult<()> {
    let (token, mut session) = logged_in_session()?;
    session
        .generate(
            &KeyGenParams::rsa(1024),
            &KeyGenOptions::with_usage(KeyUsage::SIGN | KeyUsage::VERIFY).label("hidden"),
        )?
        .into_pair()?;
    let filter = AttributeMap::new().with("label", "hidden");
    assert_eq!(session.find_objects(&filter)?.len(), 2);
    session.logout()?;
    assert!(!token.is_logged_in());
    // only the public half remains visible
    assert_eq!(session.find_objects(&filter)?.len(), 1);
    Ok(())
}

#[test]
fn test_random() -> TResult<()> {
    let (token, session) = logged_in_session()?;
    session.seed_random(b"seed")?;
    let first = session.generate_random(32)?;
    let second = session.generate_random(32)?;
    assert_eq!(first.len(), 32);
    assert_ne!(first, second);
    assert_eq!(token.calls("C_GenerateRandom"), 2);
    Ok(())
}
