//! Session with a PKCS#11 token.
//!
//! A [`Session`] owns at most one open token session handle and tracks its login state.
//! It is the entry point for:
//!
//! - Session lifecycle (`start`, `login`, `logout`, `stop`)
//! - Object enumeration, creation and destruction
//! - Random number generation
//!
//! Cryptographic operations and key lifecycle are implemented on `Session` in the
//! `operation` and `lifecycle` modules.
//!
//! A `Session` is meant to be used from one thread at a time; it is `Send` but not `Sync`.

use std::{
    cell::RefCell,
    collections::HashSet,
    fmt::{self, Debug, Formatter},
    sync::Arc,
};

use pkcs11_sys::{
    CK_ATTRIBUTE_TYPE, CK_FLAGS, CK_OBJECT_HANDLE, CK_SESSION_HANDLE, CK_SLOT_ID, CK_USER_TYPE,
    CKA_CLASS, CKF_RW_SESSION, CKF_SERIAL_SESSION, CKR_BUFFER_TOO_SMALL,
    CKR_OBJECT_HANDLE_INVALID, CKR_USER_ALREADY_LOGGED_IN, CKR_USER_NOT_LOGGED_IN,
    CKU_CONTEXT_SPECIFIC, CKU_SO, CKU_USER,
};
use tracing::{debug, trace, warn};

use crate::{
    TResult, Template, TokenError,
    capabilities::TokenCapabilities,
    object::SessionObject,
    operation::OperationKind,
    template::AttributeMap,
    token_api::{Rv, SessionInfo, TokenApi},
};

/// The user a session logs in as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UserType {
    #[default]
    User,
    SecurityOfficer,
    ContextSpecific,
}

impl From<UserType> for CK_USER_TYPE {
    fn from(user_type: UserType) -> Self {
        match user_type {
            UserType::User => CKU_USER,
            UserType::SecurityOfficer => CKU_SO,
            UserType::ContextSpecific => CKU_CONTEXT_SPECIFIC,
        }
    }
}

pub struct Session {
    api: Arc<dyn TokenApi>,
    slot_id: CK_SLOT_ID,
    handle: Option<CK_SESSION_HANDLE>,
    login: Option<UserType>,
    capabilities: TokenCapabilities,
    active_operations: RefCell<HashSet<OperationKind>>,
}

impl Debug for Session {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("slot_id", &self.slot_id)
            .field("handle", &self.handle)
            .field("login", &self.login)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Create a session on `slot_id`. No token session is opened until [`Session::start`].
    pub fn new(api: Arc<dyn TokenApi>, slot_id: CK_SLOT_ID) -> Self {
        Self {
            api,
            slot_id,
            handle: None,
            login: None,
            capabilities: TokenCapabilities::default(),
            active_operations: RefCell::new(HashSet::new()),
        }
    }

    #[must_use]
    pub const fn with_capabilities(mut self, capabilities: TokenCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    #[must_use]
    pub const fn slot_id(&self) -> CK_SLOT_ID {
        self.slot_id
    }

    #[must_use]
    pub const fn capabilities(&self) -> TokenCapabilities {
        self.capabilities
    }

    #[must_use]
    pub const fn is_started(&self) -> bool {
        self.handle.is_some()
    }

    #[must_use]
    pub const fn logged_in_as(&self) -> Option<UserType> {
        self.login
    }

    /// Open the token session. Calling `start` on a started session does nothing.
    ///
    /// The session is always a serial session, read/write when `read_write` is set.
    pub fn start(&mut self, read_write: bool) -> TResult<()> {
        if let Some(handle) = self.handle {
            trace!("session {handle} already started");
            return Ok(());
        }
        let flags: CK_FLAGS = if read_write {
            CKF_RW_SESSION | CKF_SERIAL_SESSION
        } else {
            CKF_SERIAL_SESSION
        };
        trace!("C_OpenSession");
        let handle = self
            .api
            .open_session(self.slot_id, flags)
            .map_err(|rv| TokenError::call_failed("C_OpenSession", rv))?;
        debug!(
            "opened session {handle} on slot {} (read/write: {read_write})",
            self.slot_id
        );
        self.handle = Some(handle);
        Ok(())
    }

    /// Log in as `user_type`, replacing any login the session holds.
    ///
    /// A token reporting that the user is already logged in, typically because another
    /// session of the same application logged in, is not an error.
    pub fn login(&mut self, pin: &str, user_type: UserType) -> TResult<()> {
        let handle = self.handle()?;
        if self.login.is_some() {
            self.logout()?;
        }
        trace!("C_Login");
        match self.api.login(handle, user_type.into(), pin.as_bytes()) {
            Ok(()) => debug!("session {handle} logged in as {user_type:?}"),
            Err(CKR_USER_ALREADY_LOGGED_IN) => {
                warn!("user already logged in, ignoring logging");
            }
            Err(rv) => return Err(TokenError::call_failed("C_Login", rv)),
        }
        self.login = Some(user_type);
        Ok(())
    }

    pub fn logout(&mut self) -> TResult<()> {
        let handle = self.handle()?;
        if self.login.is_none() {
            return Err(TokenError::NotLoggedIn);
        }
        trace!("C_Logout");
        // the login is gone whatever the token answers
        self.login = None;
        match self.api.logout(handle) {
            Ok(()) | Err(CKR_USER_NOT_LOGGED_IN) => Ok(()),
            Err(rv) => Err(TokenError::call_failed("C_Logout", rv)),
        }
    }

    /// Log out if needed and close the token session.
    ///
    /// The session handle is released even when the token reports an error; the session
    /// can be started again afterwards.
    pub fn stop(&mut self) -> TResult<()> {
        let Some(handle) = self.handle else {
            return Ok(());
        };
        let logout = if self.login.is_some() {
            self.logout()
        } else {
            Ok(())
        };
        self.handle = None;
        self.active_operations.borrow_mut().clear();
        trace!("C_CloseSession");
        let close = self
            .api
            .close_session(handle)
            .map_err(|rv| TokenError::call_failed("C_CloseSession", rv));
        debug!("closed session {handle}");
        logout.and(close)
    }

    pub fn info(&self) -> TResult<SessionInfo> {
        self.call("C_GetSessionInfo", |api, handle| api.session_info(handle))
    }

    /// The token session handle, failing when the session is not started.
    pub(crate) fn handle(&self) -> TResult<CK_SESSION_HANDLE> {
        self.handle.ok_or(TokenError::SessionNotStarted)
    }

    /// Issue one token verb on this session.
    pub(crate) fn call<T>(
        &self,
        verb: &'static str,
        f: impl FnOnce(&dyn TokenApi, CK_SESSION_HANDLE) -> Rv<T>,
    ) -> TResult<T> {
        let handle = self.handle()?;
        trace!("{verb}");
        f(self.api.as_ref(), handle).map_err(|rv| TokenError::call_failed(verb, rv))
    }

    /// Issue a verb producing a variable length output.
    ///
    /// Without a `capacity` hint the length is first queried from the token. A buffer that
    /// turns out too small is resized to the length the token reports and the call is retried
    /// once.
    pub(crate) fn call_output(
        &self,
        verb: &'static str,
        capacity: Option<usize>,
        mut f: impl FnMut(&dyn TokenApi, CK_SESSION_HANDLE, Option<&mut [u8]>) -> Rv<usize>,
    ) -> TResult<Vec<u8>> {
        let handle = self.handle()?;
        let api = self.api.as_ref();
        let failed = |rv| TokenError::call_failed(verb, rv);
        trace!("{verb}");
        let capacity = match capacity {
            Some(capacity) => capacity,
            None => f(api, handle, None).map_err(failed)?,
        };
        let mut output = vec![0_u8; capacity];
        let written = match f(api, handle, Some(&mut output)) {
            Err(CKR_BUFFER_TOO_SMALL) => {
                let required = f(api, handle, None).map_err(failed)?;
                trace!("{verb}: retrying with a {required} bytes buffer");
                output.resize(required, 0);
                f(api, handle, Some(&mut output)).map_err(failed)?
            }
            other => other.map_err(failed)?,
        };
        output.truncate(written);
        Ok(output)
    }

    /// Read the raw value of one attribute of `object`.
    ///
    /// The length and the value are fetched in one call from the caller's point of view;
    /// `None` is returned when the token reports the attribute as unavailable.
    pub(crate) fn read_attribute(
        &self,
        object: CK_OBJECT_HANDLE,
        attribute: CK_ATTRIBUTE_TYPE,
    ) -> TResult<Option<Vec<u8>>> {
        let handle = self.handle()?;
        let api = self.api.as_ref();
        let failed = |rv| {
            if rv == CKR_OBJECT_HANDLE_INVALID {
                TokenError::ObjectNotFound(object)
            } else {
                TokenError::call_failed("C_GetAttributeValue", rv)
            }
        };
        trace!("C_GetAttributeValue 0x{attribute:x} on {object}");
        let mut retried = false;
        loop {
            let Some(len) = api
                .get_attribute_value(handle, object, attribute, None)
                .map_err(failed)?
            else {
                return Ok(None);
            };
            let mut value = vec![0_u8; len];
            match api.get_attribute_value(handle, object, attribute, Some(&mut value)) {
                Ok(Some(written)) => {
                    value.truncate(written);
                    return Ok(Some(value));
                }
                Ok(None) => return Ok(None),
                // the value grew between the two calls
                Err(CKR_BUFFER_TOO_SMALL) if !retried => retried = true,
                Err(rv) => return Err(failed(rv)),
            }
        }
    }

    /// Mark an operation kind as live; only one of each kind may run at a time.
    pub(crate) fn acquire_operation(&self, kind: OperationKind) -> TResult<()> {
        if self.active_operations.borrow_mut().insert(kind) {
            Ok(())
        } else {
            Err(TokenError::InvalidOperationState(format!(
                "a {kind} operation is already active on this session"
            )))
        }
    }

    pub(crate) fn release_operation(&self, kind: OperationKind) {
        self.active_operations.borrow_mut().remove(&kind);
    }

    /// All the objects matching `filter`; an empty filter matches every object visible to
    /// the session.
    ///
    /// The search cursor is always released, even when fetching a batch fails.
    pub fn find_objects(&self, filter: &AttributeMap) -> TResult<Vec<SessionObject<'_>>> {
        let template = if filter.is_empty() {
            None
        } else {
            Some(Template::encode(filter)?)
        };
        self.call("C_FindObjectsInit", |api, handle| {
            api.find_objects_init(handle, template.as_ref())
        })?;
        let found = self.collect_found_objects();
        let finalized = self.call("C_FindObjectsFinal", |api, handle| {
            api.find_objects_final(handle)
        });
        let handles = found?;
        finalized?;
        debug!("found {} objects", handles.len());
        Ok(handles
            .into_iter()
            .map(|handle| SessionObject::new(self, handle))
            .collect())
    }

    fn collect_found_objects(&self) -> TResult<Vec<CK_OBJECT_HANDLE>> {
        let batch_size = self.capabilities.find_batch_size.max(1);
        let mut handles = Vec::new();
        let mut seen = HashSet::new();
        loop {
            let batch = self.call("C_FindObjects", |api, handle| {
                api.find_objects(handle, batch_size)
            })?;
            let before = handles.len();
            handles.extend(batch.into_iter().filter(|handle| seen.insert(*handle)));
            // an empty batch ends the search, a batch of handles already seen means the
            // token is looping
            if handles.len() == before {
                return Ok(handles);
            }
        }
    }

    /// The first object matching `filter`, if any.
    pub fn find_object(&self, filter: &AttributeMap) -> TResult<Option<SessionObject<'_>>> {
        Ok(self.find_objects(filter)?.into_iter().next())
    }

    /// The object with `handle`, after checking it still exists on the token.
    pub fn get_object(&self, handle: CK_OBJECT_HANDLE) -> TResult<SessionObject<'_>> {
        if self.read_attribute(handle, CKA_CLASS)?.is_none() {
            return Err(TokenError::ObjectNotFound(handle));
        }
        Ok(SessionObject::new(self, handle))
    }

    pub fn create_object(&self, attributes: &AttributeMap) -> TResult<SessionObject<'_>> {
        let template = Template::encode(attributes)?;
        let handle = self.call("C_CreateObject", |api, session| {
            api.create_object(session, &template)
        })?;
        debug!("created object {handle}");
        Ok(SessionObject::new(self, handle))
    }

    pub fn destroy_object(&self, handle: CK_OBJECT_HANDLE) -> TResult<()> {
        let session = self.handle()?;
        trace!("C_DestroyObject {handle}");
        self.api.destroy_object(session, handle).map_err(|rv| {
            if rv == CKR_OBJECT_HANDLE_INVALID {
                TokenError::ObjectNotFound(handle)
            } else {
                TokenError::call_failed("C_DestroyObject", rv)
            }
        })?;
        debug!("destroyed object {handle}");
        Ok(())
    }

    /// Destroy every object matching `filter` and return how many were destroyed.
    pub fn destroy_objects(&self, filter: &AttributeMap) -> TResult<usize> {
        let objects = self.find_objects(filter)?;
        for object in &objects {
            self.destroy_object(object.handle())?;
        }
        Ok(objects.len())
    }

    pub fn generate_random(&self, len: usize) -> TResult<Vec<u8>> {
        let mut bytes = vec![0_u8; len];
        self.call("C_GenerateRandom", |api, handle| {
            api.generate_random(handle, &mut bytes)
        })?;
        Ok(bytes)
    }

    pub fn seed_random(&self, seed: &[u8]) -> TResult<()> {
        self.call("C_SeedRandom", |api, handle| api.seed_random(handle, seed))
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("Failed stopping the session: {e}");
        }
    }
}
