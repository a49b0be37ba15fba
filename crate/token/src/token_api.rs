//! The narrow, safe interface every token backend implements.
//!
//! Methods mirror the cryptoki verbs and report the raw `CK_RV` on failure; callers turn it
//! into a [`TokenError::TokenCallFailed`](crate::TokenError) naming the verb.
//!
//! Output buffers follow the cryptoki convention: when `output` is `None` the method only
//! reports the length it needs, when the buffer is too small it fails with
//! `CKR_BUFFER_TOO_SMALL`, otherwise it returns the number of bytes written.

use pkcs11_sys::{
    CK_ATTRIBUTE_TYPE, CK_FLAGS, CK_OBJECT_HANDLE, CK_RV, CK_SESSION_HANDLE, CK_SLOT_ID, CK_STATE,
    CK_ULONG, CK_USER_TYPE,
};

use crate::{Mechanism, Template};

pub type Rv<T> = Result<T, CK_RV>;

/// State of a token session as reported by `C_GetSessionInfo`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionInfo {
    pub slot_id: CK_SLOT_ID,
    pub state: CK_STATE,
    pub flags: CK_FLAGS,
    pub device_error: CK_ULONG,
}

pub trait TokenApi: Send + Sync {
    fn open_session(&self, slot_id: CK_SLOT_ID, flags: CK_FLAGS) -> Rv<CK_SESSION_HANDLE>;
    fn close_session(&self, session: CK_SESSION_HANDLE) -> Rv<()>;
    fn session_info(&self, session: CK_SESSION_HANDLE) -> Rv<SessionInfo>;
    fn login(&self, session: CK_SESSION_HANDLE, user_type: CK_USER_TYPE, pin: &[u8]) -> Rv<()>;
    fn logout(&self, session: CK_SESSION_HANDLE) -> Rv<()>;

    /// Read one attribute; `Ok(None)` when the token reports the unavailable information
    /// sentinel for it.
    fn get_attribute_value(
        &self,
        session: CK_SESSION_HANDLE,
        object: CK_OBJECT_HANDLE,
        attribute: CK_ATTRIBUTE_TYPE,
        output: Option<&mut [u8]>,
    ) -> Rv<Option<usize>>;

    fn create_object(&self, session: CK_SESSION_HANDLE, template: &Template)
    -> Rv<CK_OBJECT_HANDLE>;
    fn destroy_object(&self, session: CK_SESSION_HANDLE, object: CK_OBJECT_HANDLE) -> Rv<()>;

    fn find_objects_init(&self, session: CK_SESSION_HANDLE, filter: Option<&Template>) -> Rv<()>;
    fn find_objects(&self, session: CK_SESSION_HANDLE, max: usize) -> Rv<Vec<CK_OBJECT_HANDLE>>;
    fn find_objects_final(&self, session: CK_SESSION_HANDLE) -> Rv<()>;

    fn digest_init(&self, session: CK_SESSION_HANDLE, mechanism: &Mechanism) -> Rv<()>;
    fn digest_update(&self, session: CK_SESSION_HANDLE, data: &[u8]) -> Rv<()>;
    fn digest_final(&self, session: CK_SESSION_HANDLE, output: Option<&mut [u8]>) -> Rv<usize>;

    fn sign_init(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: &Mechanism,
        key: CK_OBJECT_HANDLE,
    ) -> Rv<()>;
    fn sign_update(&self, session: CK_SESSION_HANDLE, data: &[u8]) -> Rv<()>;
    fn sign_final(&self, session: CK_SESSION_HANDLE, output: Option<&mut [u8]>) -> Rv<usize>;

    fn verify_init(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: &Mechanism,
        key: CK_OBJECT_HANDLE,
    ) -> Rv<()>;
    fn verify_update(&self, session: CK_SESSION_HANDLE, data: &[u8]) -> Rv<()>;
    fn verify_final(&self, session: CK_SESSION_HANDLE, signature: &[u8]) -> Rv<()>;

    fn encrypt_init(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: &Mechanism,
        key: CK_OBJECT_HANDLE,
    ) -> Rv<()>;
    fn encrypt_update(
        &self,
        session: CK_SESSION_HANDLE,
        data: &[u8],
        output: Option<&mut [u8]>,
    ) -> Rv<usize>;
    fn encrypt_final(&self, session: CK_SESSION_HANDLE, output: Option<&mut [u8]>) -> Rv<usize>;

    fn decrypt_init(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: &Mechanism,
        key: CK_OBJECT_HANDLE,
    ) -> Rv<()>;
    fn decrypt_update(
        &self,
        session: CK_SESSION_HANDLE,
        data: &[u8],
        output: Option<&mut [u8]>,
    ) -> Rv<usize>;
    fn decrypt_final(&self, session: CK_SESSION_HANDLE, output: Option<&mut [u8]>) -> Rv<usize>;

    fn generate_key(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: &Mechanism,
        template: &Template,
    ) -> Rv<CK_OBJECT_HANDLE>;
    /// Returns the `(public, private)` handles.
    fn generate_key_pair(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: &Mechanism,
        public_template: &Template,
        private_template: &Template,
    ) -> Rv<(CK_OBJECT_HANDLE, CK_OBJECT_HANDLE)>;
    fn derive_key(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: &Mechanism,
        base_key: CK_OBJECT_HANDLE,
        template: &Template,
    ) -> Rv<CK_OBJECT_HANDLE>;
    fn wrap_key(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: &Mechanism,
        wrapping_key: CK_OBJECT_HANDLE,
        key: CK_OBJECT_HANDLE,
        output: Option<&mut [u8]>,
    ) -> Rv<usize>;
    fn unwrap_key(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: &Mechanism,
        unwrapping_key: CK_OBJECT_HANDLE,
        wrapped_key: &[u8],
        template: &Template,
    ) -> Rv<CK_OBJECT_HANDLE>;

    fn generate_random(&self, session: CK_SESSION_HANDLE, output: &mut [u8]) -> Rv<()>;
    fn seed_random(&self, session: CK_SESSION_HANDLE, seed: &[u8]) -> Rv<()>;
}
