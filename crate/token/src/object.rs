use std::{
    fmt::{self, Debug, Formatter},
    ptr,
};

use chrono::NaiveDate;
use pkcs11_sys::{
    CK_ATTRIBUTE_TYPE, CK_OBJECT_CLASS, CK_OBJECT_HANDLE, CKA_CERTIFICATE_CATEGORY,
    CKA_CERTIFICATE_TYPE, CKA_CHECK_VALUE, CKA_CLASS, CKA_END_DATE, CKA_ID, CKA_LABEL,
    CKA_MODIFIABLE, CKA_PRIVATE, CKA_START_DATE, CKA_TOKEN, CKA_TRUSTED,
};

use crate::{
    TResult, TokenError,
    registry::{self, ValueType},
    session::Session,
    template::{self, AttributeValue},
};

/// An object stored on the token, seen through the session that found or created it.
///
/// Handles are only produced by the token; two objects are equal when they belong to the
/// same session and carry the same handle. Dropping a `SessionObject` does not destroy
/// the token object, see [`SessionObject::destroy`].
#[derive(Clone, Copy)]
pub struct SessionObject<'s> {
    session: &'s Session,
    handle: CK_OBJECT_HANDLE,
}

impl PartialEq for SessionObject<'_> {
    fn eq(&self, other: &Self) -> bool {
        ptr::eq(self.session, other.session) && self.handle == other.handle
    }
}

impl Eq for SessionObject<'_> {}

impl Debug for SessionObject<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionObject")
            .field("slot_id", &self.session.slot_id())
            .field("handle", &self.handle)
            .finish()
    }
}

fn wrong_type(code: CK_ATTRIBUTE_TYPE, expected: ValueType) -> TokenError {
    TokenError::TypeMismatch {
        attribute: registry::lookup_code(code)
            .map_or_else(|| format!("0x{code:x}"), |spec| spec.name.to_owned()),
        expected,
    }
}

impl<'s> SessionObject<'s> {
    pub(crate) const fn new(session: &'s Session, handle: CK_OBJECT_HANDLE) -> Self {
        Self { session, handle }
    }

    #[must_use]
    pub const fn handle(&self) -> CK_OBJECT_HANDLE {
        self.handle
    }

    #[must_use]
    pub const fn session(&self) -> &'s Session {
        self.session
    }

    /// Raw value of the attribute, `None` when the token has no value for it.
    pub fn get_attribute(&self, code: CK_ATTRIBUTE_TYPE) -> TResult<Option<Vec<u8>>> {
        self.session.read_attribute(self.handle, code)
    }

    /// Value of the attribute decoded according to its registry type.
    pub fn get_value(&self, code: CK_ATTRIBUTE_TYPE) -> TResult<Option<AttributeValue>> {
        self.get_attribute(code)?
            .map(|raw| template::decode(code, &raw))
            .transpose()
    }

    pub fn get_boolean(&self, code: CK_ATTRIBUTE_TYPE) -> TResult<Option<bool>> {
        match self.get_value(code)? {
            None => Ok(None),
            Some(AttributeValue::Bool(b)) => Ok(Some(b)),
            Some(_) => Err(wrong_type(code, ValueType::Boolean)),
        }
    }

    pub fn get_number(&self, code: CK_ATTRIBUTE_TYPE) -> TResult<Option<u64>> {
        match self.get_value(code)? {
            None => Ok(None),
            Some(AttributeValue::Number(n)) => Ok(Some(n)),
            Some(_) => Err(wrong_type(code, ValueType::UnsignedInt)),
        }
    }

    pub fn get_text(&self, code: CK_ATTRIBUTE_TYPE) -> TResult<Option<String>> {
        match self.get_value(code)? {
            None => Ok(None),
            Some(AttributeValue::Text(s)) => Ok(Some(s)),
            Some(_) => Err(wrong_type(code, ValueType::Utf8Text)),
        }
    }

    /// A date attribute; tokens commonly report an empty value for dates never set.
    pub fn get_date(&self, code: CK_ATTRIBUTE_TYPE) -> TResult<Option<NaiveDate>> {
        match self.get_attribute(code)? {
            None => Ok(None),
            Some(raw) if raw.is_empty() => Ok(None),
            Some(raw) => match template::decode(code, &raw)? {
                AttributeValue::Date(date) => Ok(Some(date)),
                _ => Err(wrong_type(code, ValueType::Date)),
            },
        }
    }

    /// The object class, which every token object has.
    pub fn class(&self) -> TResult<CK_OBJECT_CLASS> {
        let class = self
            .get_number(CKA_CLASS)?
            .ok_or(TokenError::ObjectNotFound(self.handle))?;
        Ok(CK_OBJECT_CLASS::try_from(class)?)
    }

    pub fn label(&self) -> TResult<Option<String>> {
        self.get_text(CKA_LABEL)
    }

    pub fn id(&self) -> TResult<Option<Vec<u8>>> {
        self.get_attribute(CKA_ID)
    }

    pub fn is_token(&self) -> TResult<bool> {
        Ok(self.get_boolean(CKA_TOKEN)?.unwrap_or(false))
    }

    pub fn is_private(&self) -> TResult<bool> {
        Ok(self.get_boolean(CKA_PRIVATE)?.unwrap_or(false))
    }

    pub fn is_modifiable(&self) -> TResult<bool> {
        Ok(self.get_boolean(CKA_MODIFIABLE)?.unwrap_or(false))
    }

    pub fn certificate_type(&self) -> TResult<Option<u64>> {
        self.get_number(CKA_CERTIFICATE_TYPE)
    }

    pub fn is_trusted(&self) -> TResult<bool> {
        Ok(self.get_boolean(CKA_TRUSTED)?.unwrap_or(false))
    }

    pub fn certificate_category(&self) -> TResult<Option<u64>> {
        self.get_number(CKA_CERTIFICATE_CATEGORY)
    }

    pub fn check_value(&self) -> TResult<Option<Vec<u8>>> {
        self.get_attribute(CKA_CHECK_VALUE)
    }

    pub fn start_date(&self) -> TResult<Option<NaiveDate>> {
        self.get_date(CKA_START_DATE)
    }

    pub fn end_date(&self) -> TResult<Option<NaiveDate>> {
        self.get_date(CKA_END_DATE)
    }

    /// Destroy the object on the token.
    pub fn destroy(self) -> TResult<()> {
        self.session.destroy_object(self.handle)
    }
}
