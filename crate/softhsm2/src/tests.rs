//! These tests require an initialized SoftHSM2 token and are gated behind the `softhsm2` feature.
//! To run them, cd into the crate directory and run (replace the PIN with the actual one):
//! ```
//! TOKENKIT_USER_PIN=12345678 cargo test --features softhsm2 -- --ignored
//! ```
use std::ptr;

use libloading::Library;
use pkcs11_sys::{CK_C_INITIALIZE_ARGS, CK_RV, CK_VOID_PTR, CKF_OS_LOCKING_OK, CKR_OK};
use tokenkit::{
    TResult,
    test_helpers::{get_slot_id, get_user_pin},
    tests_shared as shared,
};
use tracing::info;

use crate::SOFTHSM2_PKCS11_LIB;

const SLOT_ID: u64 = 0x01; // SoftHSM2 fallback slot if TOKENKIT_SLOT_ID is not set

fn cfg() -> TResult<shared::TokenTestConfig> {
    Ok(shared::TokenTestConfig {
        lib_path: shared::lib_path("SOFTHSM2_PKCS11_LIB", SOFTHSM2_PKCS11_LIB),
        slot_id: get_slot_id().unwrap_or(SLOT_ID),
        user_pin: get_user_pin()?,
        supports_rsa_wrap: true,
    })
}

/// To run all the tests, try something like
/// ```sh
///  RUST_LOG=info \
///  TOKENKIT_USER_PIN="12345678" \
///  TOKENKIT_SLOT_ID=63715018 \
///  cargo test test_softhsm2_all --features softhsm2 -- --ignored
/// ```
/// WARNING: initialized tokens are reassigned to another slot (based on the token serial number),
/// so list the available slots first to determine which slot ID to use
#[test]
#[ignore = "Requires Linux, SoftHSM2 library, and HSM environment"]
fn test_softhsm2_all() -> TResult<()> {
    let cfg = cfg()?;
    shared::get_info(&cfg)?;
    let mut session = shared::open_session(&cfg)?;
    shared::session_lifecycle(&mut session, &cfg.user_pin)?;
    shared::run_all(&session, &cfg)?;
    session.stop()
}

#[test]
#[ignore = "Requires Linux, SoftHSM2 library, and HSM environment"]
fn test_softhsm2_low_level_test() -> TResult<()> {
    let cfg = cfg()?;
    let library = unsafe { Library::new(&cfg.lib_path) }?;
    let init = unsafe { library.get::<fn(p_init_args: CK_VOID_PTR) -> CK_RV>(b"C_Initialize") }?;

    let mut p_init_args = CK_C_INITIALIZE_ARGS {
        CreateMutex: None,
        DestroyMutex: None,
        LockMutex: None,
        UnlockMutex: None,
        flags: CKF_OS_LOCKING_OK,
        pReserved: ptr::null_mut(),
    };
    let rv = init(&raw mut p_init_args as CK_VOID_PTR);
    info!("C_Initialize returned {rv}");
    assert_eq!(rv, CKR_OK);
    Ok(())
}

#[test]
#[ignore = "Requires Linux, SoftHSM2 library, and HSM environment"]
fn test_softhsm2_get_info() -> TResult<()> {
    shared::get_info(&cfg()?)
}

#[test]
#[ignore = "Requires Linux, SoftHSM2 library, and HSM environment"]
fn test_softhsm2_aes_cbc() -> TResult<()> {
    let session = shared::open_session(&cfg()?)?;
    shared::aes_cbc_round_trip(&session)?;
    shared::aes_cbc_pad_streaming(&session)
}

#[test]
#[ignore = "Requires Linux, SoftHSM2 library, and HSM environment"]
fn test_softhsm2_rsa_sign_verify() -> TResult<()> {
    let session = shared::open_session(&cfg()?)?;
    shared::rsa_sign_verify(&session)
}

#[test]
#[ignore = "Requires Linux, SoftHSM2 library, and HSM environment"]
fn test_softhsm2_digest() -> TResult<()> {
    let session = shared::open_session(&cfg()?)?;
    shared::digest_sha256(&session)
}

#[test]
#[ignore = "Requires Linux, SoftHSM2 library, and HSM environment"]
fn test_softhsm2_find_and_destroy() -> TResult<()> {
    let session = shared::open_session(&cfg()?)?;
    shared::find_and_destroy_objects(&session)
}

#[test]
#[ignore = "Requires Linux, SoftHSM2 library, and HSM environment"]
fn test_softhsm2_export() -> TResult<()> {
    let session = shared::open_session(&cfg()?)?;
    shared::export_rsa_public_keys(&session)?;
    shared::export_ec_public_key(&session)
}

#[test]
#[ignore = "Requires Linux, SoftHSM2 library, and HSM environment"]
fn test_softhsm2_rsa_oaep_wrap() -> TResult<()> {
    let session = shared::open_session(&cfg()?)?;
    shared::rsa_oaep_wrap_unwrap(&session)
}

#[test]
#[ignore = "Requires Linux, SoftHSM2 library, and HSM environment"]
fn test_softhsm2_ecdh_derive() -> TResult<()> {
    let session = shared::open_session(&cfg()?)?;
    shared::ecdh_derive(&session)
}

#[test]
#[ignore = "Requires Linux, SoftHSM2 library, and HSM environment"]
fn test_softhsm2_config() -> TResult<()> {
    let config = crate::softhsm2_config()?;
    assert!(config.library_path()?.exists());
    assert!(config.find_batch_size.is_some());
    Ok(())
}
