use std::{path::PathBuf, sync::Arc};

use super::{SOFT_SLOT_ID, SOFT_USER_PIN, SoftToken, logged_in_session};
use crate::{Session, TResult, tests_shared as shared};

fn cfg() -> shared::TokenTestConfig {
    shared::TokenTestConfig {
        lib_path: PathBuf::from("in-memory"),
        slot_id: u64::from(SOFT_SLOT_ID),
        user_pin: SOFT_USER_PIN.to_owned(),
        supports_rsa_wrap: true,
    }
}

#[test]
fn test_session_lifecycle() -> TResult<()> {
    let token = Arc::new(SoftToken::new());
    let mut session = Session::new(token.clone(), SOFT_SLOT_ID);
    shared::session_lifecycle(&mut session, SOFT_USER_PIN)?;
    assert!(token.is_logged_in());
    session.stop()?;
    assert!(!session.is_started());
    assert!(!token.is_logged_in());
    Ok(())
}

#[test]
fn test_all() -> TResult<()> {
    let (token, session) = logged_in_session()?;
    shared::run_all(&session, &cfg())?;
    assert_eq!(token.object_count(), 0);
    Ok(())
}

#[test]
fn test_aes_cbc_pad_streaming() -> TResult<()> {
    let (_token, session) = logged_in_session()?;
    shared::aes_cbc_pad_streaming(&session)
}

#[test]
fn test_rsa_oaep_wrap_unwrap() -> TResult<()> {
    let (_token, session) = logged_in_session()?;
    shared::rsa_oaep_wrap_unwrap(&session)
}

#[test]
fn test_ecdh_derive() -> TResult<()> {
    let (_token, session) = logged_in_session()?;
    shared::ecdh_derive(&session)
}
