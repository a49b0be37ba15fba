use std::{ffi::c_void, ptr};

use pkcs11_sys::{
    CK_ATTRIBUTE, CK_ATTRIBUTE_TYPE, CK_BBOOL, CK_C_CloseSession, CK_C_CreateObject,
    CK_C_DecryptFinal, CK_C_DecryptInit, CK_C_DecryptUpdate, CK_C_DeriveKey, CK_C_DestroyObject,
    CK_C_DigestFinal, CK_C_DigestInit, CK_C_DigestUpdate, CK_C_EncryptFinal, CK_C_EncryptInit,
    CK_C_EncryptUpdate, CK_C_Finalize, CK_C_FindObjects,
    CK_C_FindObjectsFinal, CK_C_FindObjectsInit, CK_C_GenerateKey, CK_C_GenerateKeyPair,
    CK_C_GenerateRandom, CK_C_GetAttributeValue, CK_C_GetInfo, CK_C_GetSessionInfo,
    CK_C_GetSlotList, CK_C_INITIALIZE_ARGS, CK_C_Initialize, CK_C_Login, CK_C_Logout,
    CK_C_OpenSession, CK_C_SeedRandom, CK_C_SignFinal, CK_C_SignInit, CK_C_SignUpdate,
    CK_C_UnwrapKey, CK_C_VerifyFinal, CK_C_VerifyInit, CK_C_VerifyUpdate, CK_C_WrapKey, CK_FALSE,
    CK_FLAGS, CK_INFO, CK_MECHANISM, CK_OBJECT_HANDLE, CK_RV, CK_SESSION_HANDLE, CK_SESSION_INFO,
    CK_SLOT_ID, CK_TRUE, CK_ULONG, CK_USER_TYPE, CKF_OS_LOCKING_OK, CKR_ARGUMENTS_BAD,
    CKR_ATTRIBUTE_SENSITIVE, CKR_ATTRIBUTE_TYPE_INVALID, CKR_FUNCTION_NOT_SUPPORTED,
    CKR_GENERAL_ERROR, CKR_MECHANISM_PARAM_INVALID, CKR_OK,
};
use libloading::Library;
use tracing::{debug, trace, warn};

use crate::{
    Mechanism, TResult, Template, TokenError,
    token_api::{Rv, SessionInfo, TokenApi},
};

/// Length reported by `C_GetAttributeValue` for an attribute it cannot return.
const UNAVAILABLE_INFORMATION: CK_ULONG = CK_ULONG::MAX;

/// Resolve a cryptoki entry point, call it and yield its return value.
macro_rules! ck_call {
    ($lib:expr, $name:ident $(, $arg:expr)* $(,)?) => {{
        let function = $lib.$name.ok_or(CKR_FUNCTION_NOT_SUPPORTED)?;
        trace!("{}", stringify!($name));
        #[allow(unsafe_code)]
        let rv = unsafe { function($($arg),*) };
        rv
    }};
}

fn check(rv: CK_RV) -> Rv<()> {
    if rv == CKR_OK { Ok(()) } else { Err(rv) }
}

fn ck_len(len: usize) -> Rv<CK_ULONG> {
    CK_ULONG::try_from(len).map_err(|_| CKR_ARGUMENTS_BAD)
}

fn usize_len(len: CK_ULONG) -> Rv<usize> {
    usize::try_from(len).map_err(|_| CKR_GENERAL_ERROR)
}

/// Input buffers are never written by the token, cryptoki just lacks `const`.
fn input_ptr(data: &[u8]) -> *mut u8 {
    data.as_ptr().cast_mut()
}

fn output_parts(output: Option<&mut [u8]>) -> Rv<(*mut u8, CK_ULONG)> {
    match output {
        None => Ok((ptr::null_mut(), 0)),
        Some(buffer) => Ok((buffer.as_mut_ptr(), ck_len(buffer.len())?)),
    }
}

fn ck_template(template: &Template) -> Rv<Vec<CK_ATTRIBUTE>> {
    template
        .entries()
        .iter()
        .map(|entry| {
            Ok(CK_ATTRIBUTE {
                type_: entry.code,
                pValue: input_ptr(&entry.value).cast::<c_void>(),
                ulValueLen: ck_len(entry.value.len())?,
            })
        })
        .collect()
}

/// A `CK_MECHANISM` together with the parameter block it points to.
struct CkMechanism {
    raw: CK_MECHANISM,
    _params: Vec<u8>,
}

impl CkMechanism {
    fn new(mechanism: &Mechanism) -> Rv<Self> {
        let mut params = mechanism
            .params()
            .serialize()
            .map_err(|_| CKR_MECHANISM_PARAM_INVALID)?;
        let raw = CK_MECHANISM {
            mechanism: mechanism.mechanism_type(),
            pParameter: if params.is_empty() {
                ptr::null_mut()
            } else {
                params.as_mut_ptr().cast::<c_void>()
            },
            ulParameterLen: ck_len(params.len())?,
        };
        Ok(Self {
            raw,
            _params: params,
        })
    }
}

/// A PKCS#11 shared library loaded in the process.
///
/// The library is initialized with OS locking when loaded and finalized when dropped.
/// Every function pointer is resolved up front; a library lacking one of them fails to load.
#[allow(non_snake_case)]
pub struct Pkcs11Library {
    _library: Library,
    C_Initialize: CK_C_Initialize,
    C_Finalize: CK_C_Finalize,
    C_GetInfo: CK_C_GetInfo,
    C_GetSlotList: CK_C_GetSlotList,

    C_OpenSession: CK_C_OpenSession,
    C_CloseSession: CK_C_CloseSession,
    C_GetSessionInfo: CK_C_GetSessionInfo,
    C_Login: CK_C_Login,
    C_Logout: CK_C_Logout,

    C_CreateObject: CK_C_CreateObject,
    C_DestroyObject: CK_C_DestroyObject,
    C_GetAttributeValue: CK_C_GetAttributeValue,
    C_FindObjectsInit: CK_C_FindObjectsInit,
    C_FindObjects: CK_C_FindObjects,
    C_FindObjectsFinal: CK_C_FindObjectsFinal,

    C_DigestInit: CK_C_DigestInit,
    C_DigestUpdate: CK_C_DigestUpdate,
    C_DigestFinal: CK_C_DigestFinal,
    C_SignInit: CK_C_SignInit,
    C_SignUpdate: CK_C_SignUpdate,
    C_SignFinal: CK_C_SignFinal,
    C_VerifyInit: CK_C_VerifyInit,
    C_VerifyUpdate: CK_C_VerifyUpdate,
    C_VerifyFinal: CK_C_VerifyFinal,
    C_EncryptInit: CK_C_EncryptInit,
    C_EncryptUpdate: CK_C_EncryptUpdate,
    C_EncryptFinal: CK_C_EncryptFinal,
    C_DecryptInit: CK_C_DecryptInit,
    C_DecryptUpdate: CK_C_DecryptUpdate,
    C_DecryptFinal: CK_C_DecryptFinal,

    C_GenerateKey: CK_C_GenerateKey,
    C_GenerateKeyPair: CK_C_GenerateKeyPair,
    C_DeriveKey: CK_C_DeriveKey,
    C_WrapKey: CK_C_WrapKey,
    C_UnwrapKey: CK_C_UnwrapKey,
    C_GenerateRandom: CK_C_GenerateRandom,
    C_SeedRandom: CK_C_SeedRandom,
}

impl Pkcs11Library {
    pub fn instantiate<P>(path: P) -> TResult<Self>
    where
        P: AsRef<std::ffi::OsStr>,
    {
        #[allow(unsafe_code)]
        let pkcs11_lib = unsafe {
            let library = Library::new(path)?;
            Self {
                C_Initialize: Some(*library.get(b"C_Initialize")?),
                C_Finalize: Some(*library.get(b"C_Finalize")?),
                C_GetInfo: Some(*library.get(b"C_GetInfo")?),
                C_GetSlotList: Some(*library.get(b"C_GetSlotList")?),
                C_OpenSession: Some(*library.get(b"C_OpenSession")?),
                C_CloseSession: Some(*library.get(b"C_CloseSession")?),
                C_GetSessionInfo: Some(*library.get(b"C_GetSessionInfo")?),
                C_Login: Some(*library.get(b"C_Login")?),
                C_Logout: Some(*library.get(b"C_Logout")?),
                C_CreateObject: Some(*library.get(b"C_CreateObject")?),
                C_DestroyObject: Some(*library.get(b"C_DestroyObject")?),
                C_GetAttributeValue: Some(*library.get(b"C_GetAttributeValue")?),
                C_FindObjectsInit: Some(*library.get(b"C_FindObjectsInit")?),
                C_FindObjects: Some(*library.get(b"C_FindObjects")?),
                C_FindObjectsFinal: Some(*library.get(b"C_FindObjectsFinal")?),
                C_DigestInit: Some(*library.get(b"C_DigestInit")?),
                C_DigestUpdate: Some(*library.get(b"C_DigestUpdate")?),
                C_DigestFinal: Some(*library.get(b"C_DigestFinal")?),
                C_SignInit: Some(*library.get(b"C_SignInit")?),
                C_SignUpdate: Some(*library.get(b"C_SignUpdate")?),
                C_SignFinal: Some(*library.get(b"C_SignFinal")?),
                C_VerifyInit: Some(*library.get(b"C_VerifyInit")?),
                C_VerifyUpdate: Some(*library.get(b"C_VerifyUpdate")?),
                C_VerifyFinal: Some(*library.get(b"C_VerifyFinal")?),
                C_EncryptInit: Some(*library.get(b"C_EncryptInit")?),
                C_EncryptUpdate: Some(*library.get(b"C_EncryptUpdate")?),
                C_EncryptFinal: Some(*library.get(b"C_EncryptFinal")?),
                C_DecryptInit: Some(*library.get(b"C_DecryptInit")?),
                C_DecryptUpdate: Some(*library.get(b"C_DecryptUpdate")?),
                C_DecryptFinal: Some(*library.get(b"C_DecryptFinal")?),
                C_GenerateKey: Some(*library.get(b"C_GenerateKey")?),
                C_GenerateKeyPair: Some(*library.get(b"C_GenerateKeyPair")?),
                C_DeriveKey: Some(*library.get(b"C_DeriveKey")?),
                C_WrapKey: Some(*library.get(b"C_WrapKey")?),
                C_UnwrapKey: Some(*library.get(b"C_UnwrapKey")?),
                C_GenerateRandom: Some(*library.get(b"C_GenerateRandom")?),
                C_SeedRandom: Some(*library.get(b"C_SeedRandom")?),
                // the library must outlive the function pointers
                _library: library,
            }
        };
        pkcs11_lib.initialize()?;
        debug!("PKCS#11 library loaded and initialized");
        Ok(pkcs11_lib)
    }

    fn initialize(&self) -> TResult<()> {
        let mut init_args = CK_C_INITIALIZE_ARGS {
            CreateMutex: None,
            DestroyMutex: None,
            LockMutex: None,
            UnlockMutex: None,
            flags: CKF_OS_LOCKING_OK,
            pReserved: ptr::null_mut(),
        };
        let rv = self.raw_call("C_Initialize", || {
            Ok(ck_call!(
                self,
                C_Initialize,
                (&raw mut init_args).cast::<c_void>()
            ))
        })?;
        check(rv).map_err(|rv| TokenError::call_failed("C_Initialize", rv))
    }

    fn finalize(&self) -> TResult<()> {
        let rv = self.raw_call("C_Finalize", || {
            Ok(ck_call!(self, C_Finalize, ptr::null_mut()))
        })?;
        check(rv).map_err(|rv| TokenError::call_failed("C_Finalize", rv))
    }

    /// Run a call outside of the `TokenApi` surface, mapping a missing entry point.
    fn raw_call(&self, verb: &'static str, call: impl FnOnce() -> Rv<CK_RV>) -> TResult<CK_RV> {
        call().map_err(|rv| TokenError::call_failed(verb, rv))
    }

    /// General information about the library, from `C_GetInfo`.
    pub fn info(&self) -> TResult<CK_INFO> {
        let mut info = CK_INFO::default();
        let rv = self.raw_call("C_GetInfo", || Ok(ck_call!(self, C_GetInfo, &raw mut info)))?;
        check(rv).map_err(|rv| TokenError::call_failed("C_GetInfo", rv))?;
        Ok(info)
    }

    /// The slots known to the library, optionally only those holding a token.
    pub fn slot_list(&self, token_present: bool) -> TResult<Vec<CK_SLOT_ID>> {
        let present: CK_BBOOL = if token_present { CK_TRUE } else { CK_FALSE };
        let mut count: CK_ULONG = 0;
        let rv = self.raw_call("C_GetSlotList", || {
            Ok(ck_call!(
                self,
                C_GetSlotList,
                present,
                ptr::null_mut(),
                &raw mut count
            ))
        })?;
        check(rv).map_err(|rv| TokenError::call_failed("C_GetSlotList", rv))?;
        let mut slots: Vec<CK_SLOT_ID> = vec![0; usize::try_from(count)?];
        let rv = self.raw_call("C_GetSlotList", || {
            Ok(ck_call!(
                self,
                C_GetSlotList,
                present,
                slots.as_mut_ptr(),
                &raw mut count
            ))
        })?;
        check(rv).map_err(|rv| TokenError::call_failed("C_GetSlotList", rv))?;
        slots.truncate(usize::try_from(count)?);
        Ok(slots)
    }
}

impl Drop for Pkcs11Library {
    fn drop(&mut self) {
        if let Err(e) = self.finalize() {
            warn!("Failed finalizing the PKCS#11 library: {e}");
        }
    }
}

impl TokenApi for Pkcs11Library {
    fn open_session(&self, slot_id: CK_SLOT_ID, flags: CK_FLAGS) -> Rv<CK_SESSION_HANDLE> {
        let mut session: CK_SESSION_HANDLE = 0;
        check(ck_call!(
            self,
            C_OpenSession,
            slot_id,
            flags,
            ptr::null_mut(),
            None,
            &raw mut session
        ))?;
        Ok(session)
    }

    fn close_session(&self, session: CK_SESSION_HANDLE) -> Rv<()> {
        check(ck_call!(self, C_CloseSession, session))
    }

    fn session_info(&self, session: CK_SESSION_HANDLE) -> Rv<SessionInfo> {
        let mut info = CK_SESSION_INFO::default();
        check(ck_call!(self, C_GetSessionInfo, session, &raw mut info))?;
        Ok(SessionInfo {
            slot_id: info.slotID,
            state: info.state,
            flags: info.flags,
            device_error: info.ulDeviceError,
        })
    }

    fn login(&self, session: CK_SESSION_HANDLE, user_type: CK_USER_TYPE, pin: &[u8]) -> Rv<()> {
        check(ck_call!(
            self,
            C_Login,
            session,
            user_type,
            input_ptr(pin),
            ck_len(pin.len())?
        ))
    }

    fn logout(&self, session: CK_SESSION_HANDLE) -> Rv<()> {
        check(ck_call!(self, C_Logout, session))
    }

    fn get_attribute_value(
        &self,
        session: CK_SESSION_HANDLE,
        object: CK_OBJECT_HANDLE,
        attribute: CK_ATTRIBUTE_TYPE,
        output: Option<&mut [u8]>,
    ) -> Rv<Option<usize>> {
        let (value, len) = output_parts(output)?;
        let mut template = CK_ATTRIBUTE {
            type_: attribute,
            pValue: value.cast::<c_void>(),
            ulValueLen: len,
        };
        let rv = ck_call!(
            self,
            C_GetAttributeValue,
            session,
            object,
            &raw mut template,
            1
        );
        if template.ulValueLen == UNAVAILABLE_INFORMATION
            && matches!(
                rv,
                CKR_OK | CKR_ATTRIBUTE_SENSITIVE | CKR_ATTRIBUTE_TYPE_INVALID
            )
        {
            return Ok(None);
        }
        check(rv)?;
        Ok(Some(usize_len(template.ulValueLen)?))
    }

    fn create_object(
        &self,
        session: CK_SESSION_HANDLE,
        template: &Template,
    ) -> Rv<CK_OBJECT_HANDLE> {
        let mut attributes = ck_template(template)?;
        let mut object: CK_OBJECT_HANDLE = 0;
        check(ck_call!(
            self,
            C_CreateObject,
            session,
            attributes.as_mut_ptr(),
            ck_len(attributes.len())?,
            &raw mut object
        ))?;
        Ok(object)
    }

    fn destroy_object(&self, session: CK_SESSION_HANDLE, object: CK_OBJECT_HANDLE) -> Rv<()> {
        check(ck_call!(self, C_DestroyObject, session, object))
    }

    fn find_objects_init(&self, session: CK_SESSION_HANDLE, filter: Option<&Template>) -> Rv<()> {
        let mut attributes = filter.map(ck_template).transpose()?.unwrap_or_default();
        let (template, count) = if attributes.is_empty() {
            (ptr::null_mut(), 0)
        } else {
            (attributes.as_mut_ptr(), ck_len(attributes.len())?)
        };
        check(ck_call!(self, C_FindObjectsInit, session, template, count))
    }

    fn find_objects(&self, session: CK_SESSION_HANDLE, max: usize) -> Rv<Vec<CK_OBJECT_HANDLE>> {
        let mut handles: Vec<CK_OBJECT_HANDLE> = vec![0; max];
        let mut count: CK_ULONG = 0;
        check(ck_call!(
            self,
            C_FindObjects,
            session,
            handles.as_mut_ptr(),
            ck_len(max)?,
            &raw mut count
        ))?;
        handles.truncate(usize_len(count)?);
        Ok(handles)
    }

    fn find_objects_final(&self, session: CK_SESSION_HANDLE) -> Rv<()> {
        check(ck_call!(self, C_FindObjectsFinal, session))
    }

    fn digest_init(&self, session: CK_SESSION_HANDLE, mechanism: &Mechanism) -> Rv<()> {
        let mut mechanism = CkMechanism::new(mechanism)?;
        check(ck_call!(self, C_DigestInit, session, &raw mut mechanism.raw))
    }

    fn digest_update(&self, session: CK_SESSION_HANDLE, data: &[u8]) -> Rv<()> {
        check(ck_call!(
            self,
            C_DigestUpdate,
            session,
            input_ptr(data),
            ck_len(data.len())?
        ))
    }

    fn digest_final(&self, session: CK_SESSION_HANDLE, output: Option<&mut [u8]>) -> Rv<usize> {
        let (digest, mut len) = output_parts(output)?;
        check(ck_call!(self, C_DigestFinal, session, digest, &raw mut len))?;
        usize_len(len)
    }

    fn sign_init(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: &Mechanism,
        key: CK_OBJECT_HANDLE,
    ) -> Rv<()> {
        let mut mechanism = CkMechanism::new(mechanism)?;
        check(ck_call!(self, C_SignInit, session, &raw mut mechanism.raw, key))
    }

    fn sign_update(&self, session: CK_SESSION_HANDLE, data: &[u8]) -> Rv<()> {
        check(ck_call!(
            self,
            C_SignUpdate,
            session,
            input_ptr(data),
            ck_len(data.len())?
        ))
    }

    fn sign_final(&self, session: CK_SESSION_HANDLE, output: Option<&mut [u8]>) -> Rv<usize> {
        let (signature, mut len) = output_parts(output)?;
        check(ck_call!(self, C_SignFinal, session, signature, &raw mut len))?;
        usize_len(len)
    }

    fn verify_init(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: &Mechanism,
        key: CK_OBJECT_HANDLE,
    ) -> Rv<()> {
        let mut mechanism = CkMechanism::new(mechanism)?;
        check(ck_call!(self, C_VerifyInit, session, &raw mut mechanism.raw, key))
    }

    fn verify_update(&self, session: CK_SESSION_HANDLE, data: &[u8]) -> Rv<()> {
        check(ck_call!(
            self,
            C_VerifyUpdate,
            session,
            input_ptr(data),
            ck_len(data.len())?
        ))
    }

    fn verify_final(&self, session: CK_SESSION_HANDLE, signature: &[u8]) -> Rv<()> {
        check(ck_call!(
            self,
            C_VerifyFinal,
            session,
            input_ptr(signature),
            ck_len(signature.len())?
        ))
    }

    fn encrypt_init(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: &Mechanism,
        key: CK_OBJECT_HANDLE,
    ) -> Rv<()> {
        let mut mechanism = CkMechanism::new(mechanism)?;
        check(ck_call!(self, C_EncryptInit, session, &raw mut mechanism.raw, key))
    }

    fn encrypt_update(
        &self,
        session: CK_SESSION_HANDLE,
        data: &[u8],
        output: Option<&mut [u8]>,
    ) -> Rv<usize> {
        let (encrypted, mut len) = output_parts(output)?;
        check(ck_call!(
            self,
            C_EncryptUpdate,
            session,
            input_ptr(data),
            ck_len(data.len())?,
            encrypted,
            &raw mut len
        ))?;
        usize_len(len)
    }

    fn encrypt_final(&self, session: CK_SESSION_HANDLE, output: Option<&mut [u8]>) -> Rv<usize> {
        let (encrypted, mut len) = output_parts(output)?;
        check(ck_call!(self, C_EncryptFinal, session, encrypted, &raw mut len))?;
        usize_len(len)
    }

    fn decrypt_init(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: &Mechanism,
        key: CK_OBJECT_HANDLE,
    ) -> Rv<()> {
        let mut mechanism = CkMechanism::new(mechanism)?;
        check(ck_call!(self, C_DecryptInit, session, &raw mut mechanism.raw, key))
    }

    fn decrypt_update(
        &self,
        session: CK_SESSION_HANDLE,
        data: &[u8],
        output: Option<&mut [u8]>,
    ) -> Rv<usize> {
        let (decrypted, mut len) = output_parts(output)?;
        check(ck_call!(
            self,
            C_DecryptUpdate,
            session,
            input_ptr(data),
            ck_len(data.len())?,
            decrypted,
            &raw mut len
        ))?;
        usize_len(len)
    }

    fn decrypt_final(&self, session: CK_SESSION_HANDLE, output: Option<&mut [u8]>) -> Rv<usize> {
        let (decrypted, mut len) = output_parts(output)?;
        check(ck_call!(self, C_DecryptFinal, session, decrypted, &raw mut len))?;
        usize_len(len)
    }

    fn generate_key(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: &Mechanism,
        template: &Template,
    ) -> Rv<CK_OBJECT_HANDLE> {
        let mut mechanism = CkMechanism::new(mechanism)?;
        let mut attributes = ck_template(template)?;
        let mut key: CK_OBJECT_HANDLE = 0;
        check(ck_call!(
            self,
            C_GenerateKey,
            session,
            &raw mut mechanism.raw,
            attributes.as_mut_ptr(),
            ck_len(attributes.len())?,
            &raw mut key
        ))?;
        Ok(key)
    }

    fn generate_key_pair(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: &Mechanism,
        public_template: &Template,
        private_template: &Template,
    ) -> Rv<(CK_OBJECT_HANDLE, CK_OBJECT_HANDLE)> {
        let mut mechanism = CkMechanism::new(mechanism)?;
        let mut public_attributes = ck_template(public_template)?;
        let mut private_attributes = ck_template(private_template)?;
        let mut public_key: CK_OBJECT_HANDLE = 0;
        let mut private_key: CK_OBJECT_HANDLE = 0;
        check(ck_call!(
            self,
            C_GenerateKeyPair,
            session,
            &raw mut mechanism.raw,
            public_attributes.as_mut_ptr(),
            ck_len(public_attributes.len())?,
            private_attributes.as_mut_ptr(),
            ck_len(private_attributes.len())?,
            &raw mut public_key,
            &raw mut private_key
        ))?;
        Ok((public_key, private_key))
    }

    fn derive_key(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: &Mechanism,
        base_key: CK_OBJECT_HANDLE,
        template: &Template,
    ) -> Rv<CK_OBJECT_HANDLE> {
        let mut mechanism = CkMechanism::new(mechanism)?;
        let mut attributes = ck_template(template)?;
        let mut key: CK_OBJECT_HANDLE = 0;
        check(ck_call!(
            self,
            C_DeriveKey,
            session,
            &raw mut mechanism.raw,
            base_key,
            attributes.as_mut_ptr(),
            ck_len(attributes.len())?,
            &raw mut key
        ))?;
        Ok(key)
    }

    fn wrap_key(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: &Mechanism,
        wrapping_key: CK_OBJECT_HANDLE,
        key: CK_OBJECT_HANDLE,
        output: Option<&mut [u8]>,
    ) -> Rv<usize> {
        let mut mechanism = CkMechanism::new(mechanism)?;
        let (wrapped, mut len) = output_parts(output)?;
        check(ck_call!(
            self,
            C_WrapKey,
            session,
            &raw mut mechanism.raw,
            wrapping_key,
            key,
            wrapped,
            &raw mut len
        ))?;
        usize_len(len)
    }

    fn unwrap_key(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: &Mechanism,
        unwrapping_key: CK_OBJECT_HANDLE,
        wrapped_key: &[u8],
        template: &Template,
    ) -> Rv<CK_OBJECT_HANDLE> {
        let mut mechanism = CkMechanism::new(mechanism)?;
        let mut attributes = ck_template(template)?;
        let mut key: CK_OBJECT_HANDLE = 0;
        check(ck_call!(
            self,
            C_UnwrapKey,
            session,
            &raw mut mechanism.raw,
            unwrapping_key,
            input_ptr(wrapped_key),
            ck_len(wrapped_key.len())?,
            attributes.as_mut_ptr(),
            ck_len(attributes.len())?,
            &raw mut key
        ))?;
        Ok(key)
    }

    fn generate_random(&self, session: CK_SESSION_HANDLE, output: &mut [u8]) -> Rv<()> {
        check(ck_call!(
            self,
            C_GenerateRandom,
            session,
            output.as_mut_ptr(),
            ck_len(output.len())?
        ))
    }

    fn seed_random(&self, session: CK_SESSION_HANDLE, seed: &[u8]) -> Rv<()> {
        check(ck_call!(
            self,
            C_SeedRandom,
            session,
            input_ptr(seed),
            ck_len(seed.len())?
        ))
    }
}
