use std::{
    array::TryFromSliceError, convert::Infallible, num::TryFromIntError, str::Utf8Error,
    string::FromUtf8Error,
};

use pkcs11_sys::{
    CK_OBJECT_HANDLE, CK_RV, CKR_ARGUMENTS_BAD, CKR_ATTRIBUTE_SENSITIVE,
    CKR_ATTRIBUTE_TYPE_INVALID, CKR_ATTRIBUTE_VALUE_INVALID, CKR_BUFFER_TOO_SMALL,
    CKR_CRYPTOKI_NOT_INITIALIZED, CKR_DATA_LEN_RANGE, CKR_DEVICE_ERROR, CKR_ENCRYPTED_DATA_INVALID,
    CKR_FUNCTION_FAILED, CKR_FUNCTION_NOT_SUPPORTED, CKR_GENERAL_ERROR, CKR_KEY_FUNCTION_NOT_PERMITTED,
    CKR_KEY_HANDLE_INVALID, CKR_KEY_TYPE_INCONSISTENT, CKR_MECHANISM_INVALID,
    CKR_MECHANISM_PARAM_INVALID, CKR_OBJECT_HANDLE_INVALID, CKR_OK, CKR_OPERATION_ACTIVE,
    CKR_OPERATION_NOT_INITIALIZED, CKR_PIN_INCORRECT, CKR_SESSION_HANDLE_INVALID,
    CKR_SIGNATURE_INVALID, CKR_SIGNATURE_LEN_RANGE, CKR_SLOT_ID_INVALID,
    CKR_TEMPLATE_INCOMPLETE, CKR_TEMPLATE_INCONSISTENT, CKR_TOKEN_NOT_PRESENT,
    CKR_USER_ALREADY_LOGGED_IN, CKR_USER_NOT_LOGGED_IN,
};
use thiserror::Error;

use crate::registry::ValueType;

pub type TResult<T> = Result<T, TokenError>;

#[derive(Error, Debug)]
pub enum TokenError {
    #[error("Unknown attribute: {0}")]
    UnknownAttribute(String),

    #[error("Type mismatch for attribute {attribute}: expected {expected}")]
    TypeMismatch {
        attribute: String,
        expected: ValueType,
    },

    #[error("Unsupported attribute type {value_type} for attribute {attribute}")]
    UnsupportedType {
        attribute: String,
        value_type: ValueType,
    },

    #[error("A template must contain at least one attribute")]
    EmptyTemplate,

    #[error("Invalid operation state: {0}")]
    InvalidOperationState(String),

    #[error("Invalid parameter size: {0}")]
    InvalidParameterSize(String),

    #[error("The session is not started")]
    SessionNotStarted,

    #[error("The session is not logged in")]
    NotLoggedIn,

    #[error("Object not found: handle {0}")]
    ObjectNotFound(CK_OBJECT_HANDLE),

    #[error("Unknown curve: {0}")]
    UnknownCurve(String),

    #[error("Invalid EC point tag: 0x{0:02x}")]
    InvalidPointTag(u8),

    #[error("Invalid EC point size: {0}")]
    InvalidPointSize(String),

    #[error("EC point length uses {0} length bytes")]
    PointTooLarge(usize),

    #[error("The key has no usage allowing this export")]
    NoAllowedUsage,

    #[error("{verb} failed: {name} (0x{rv:08x})", name = rv_name(*.rv))]
    TokenCallFailed { verb: &'static str, rv: CK_RV },

    #[error("Unknown mechanism: {0}")]
    UnknownMechanism(String),

    #[error("Key usage error: {0}")]
    KeyUsage(String),

    #[error("Unsupported key type: {0}")]
    UnsupportedKeyType(String),

    #[error("Conversion Error: {0}")]
    Conversion(String),

    #[error("Error loading the library: {0}")]
    LibLoading(#[from] libloading::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),

    #[error("{0}")]
    Default(String),
}

impl TokenError {
    /// Build the error reported when a token verb returns a non `CKR_OK` status.
    #[must_use]
    pub const fn call_failed(verb: &'static str, rv: CK_RV) -> Self {
        Self::TokenCallFailed { verb, rv }
    }

    /// The PKCS#11 status code when this error comes from the token.
    #[must_use]
    pub const fn rv(&self) -> Option<CK_RV> {
        match self {
            Self::TokenCallFailed { rv, .. } => Some(*rv),
            _ => None,
        }
    }
}

impl From<TryFromIntError> for TokenError {
    fn from(e: TryFromIntError) -> Self {
        Self::Conversion(e.to_string())
    }
}

// `CK_ULONG` conversions are infallible where it is 64 bits wide
impl From<Infallible> for TokenError {
    fn from(e: Infallible) -> Self {
        match e {}
    }
}

impl From<TryFromSliceError> for TokenError {
    fn from(e: TryFromSliceError) -> Self {
        Self::Conversion(e.to_string())
    }
}

impl From<Utf8Error> for TokenError {
    fn from(e: Utf8Error) -> Self {
        Self::Conversion(e.to_string())
    }
}

impl From<FromUtf8Error> for TokenError {
    fn from(e: FromUtf8Error) -> Self {
        Self::Conversion(e.to_string())
    }
}

impl From<der::Error> for TokenError {
    fn from(e: der::Error) -> Self {
        Self::Conversion(format!("DER: {e}"))
    }
}

/// Symbolic name of the most common PKCS#11 return values.
#[must_use]
pub fn rv_name(rv: CK_RV) -> &'static str {
    match rv {
        CKR_OK => "CKR_OK",
        CKR_ARGUMENTS_BAD => "CKR_ARGUMENTS_BAD",
        CKR_ATTRIBUTE_SENSITIVE => "CKR_ATTRIBUTE_SENSITIVE",
        CKR_ATTRIBUTE_TYPE_INVALID => "CKR_ATTRIBUTE_TYPE_INVALID",
        CKR_ATTRIBUTE_VALUE_INVALID => "CKR_ATTRIBUTE_VALUE_INVALID",
        CKR_BUFFER_TOO_SMALL => "CKR_BUFFER_TOO_SMALL",
        CKR_CRYPTOKI_NOT_INITIALIZED => "CKR_CRYPTOKI_NOT_INITIALIZED",
        CKR_DATA_LEN_RANGE => "CKR_DATA_LEN_RANGE",
        CKR_DEVICE_ERROR => "CKR_DEVICE_ERROR",
        CKR_ENCRYPTED_DATA_INVALID => "CKR_ENCRYPTED_DATA_INVALID",
        CKR_FUNCTION_FAILED => "CKR_FUNCTION_FAILED",
        CKR_FUNCTION_NOT_SUPPORTED => "CKR_FUNCTION_NOT_SUPPORTED",
        CKR_GENERAL_ERROR => "CKR_GENERAL_ERROR",
        CKR_KEY_FUNCTION_NOT_PERMITTED => "CKR_KEY_FUNCTION_NOT_PERMITTED",
        CKR_KEY_HANDLE_INVALID => "CKR_KEY_HANDLE_INVALID",
        CKR_KEY_TYPE_INCONSISTENT => "CKR_KEY_TYPE_INCONSISTENT",
        CKR_MECHANISM_INVALID => "CKR_MECHANISM_INVALID",
        CKR_MECHANISM_PARAM_INVALID => "CKR_MECHANISM_PARAM_INVALID",
        CKR_OBJECT_HANDLE_INVALID => "CKR_OBJECT_HANDLE_INVALID",
        CKR_OPERATION_ACTIVE => "CKR_OPERATION_ACTIVE",
        CKR_OPERATION_NOT_INITIALIZED => "CKR_OPERATION_NOT_INITIALIZED",
        CKR_PIN_INCORRECT => "CKR_PIN_INCORRECT",
        CKR_SESSION_HANDLE_INVALID => "CKR_SESSION_HANDLE_INVALID",
        CKR_SIGNATURE_INVALID => "CKR_SIGNATURE_INVALID",
        CKR_SIGNATURE_LEN_RANGE => "CKR_SIGNATURE_LEN_RANGE",
        CKR_SLOT_ID_INVALID => "CKR_SLOT_ID_INVALID",
        CKR_TEMPLATE_INCOMPLETE => "CKR_TEMPLATE_INCOMPLETE",
        CKR_TEMPLATE_INCONSISTENT => "CKR_TEMPLATE_INCONSISTENT",
        CKR_TOKEN_NOT_PRESENT => "CKR_TOKEN_NOT_PRESENT",
        CKR_USER_ALREADY_LOGGED_IN => "CKR_USER_ALREADY_LOGGED_IN",
        CKR_USER_NOT_LOGGED_IN => "CKR_USER_NOT_LOGGED_IN",
        _ => "unknown status",
    }
}

/// Return early with an error if a condition is not satisfied.
///
/// This macro is equivalent to `if !$cond { return Err(From::from($err)); }`.
#[macro_export]
macro_rules! token_ensure {
    ($cond:expr, $msg:literal $(,)?) => {
        if !$cond {
            return ::core::result::Result::Err($crate::token_error!($msg));
        }
    };
    ($cond:expr, $err:expr $(,)?) => {
        if !$cond {
            return ::core::result::Result::Err($err);
        }
    };
    ($cond:expr, $fmt:expr, $($arg:tt)*) => {
        if !$cond {
            return ::core::result::Result::Err($crate::token_error!($fmt, $($arg)*));
        }
    };
}

/// Construct a default token error from a string.
#[macro_export]
macro_rules! token_error {
    ($msg:literal) => {
        $crate::TokenError::Default(::core::format_args!($msg).to_string())
    };
    ($err:expr $(,)?) => ({
        $crate::TokenError::Default($err.to_string())
    });
    ($fmt:expr, $($arg:tt)*) => {
        $crate::TokenError::Default(::core::format_args!($fmt, $($arg)*).to_string())
    };
}

/// Return early with an error.
#[macro_export]
macro_rules! token_bail {
    ($msg:literal) => {
        return ::core::result::Result::Err($crate::token_error!($msg))
    };
    ($err:expr $(,)?) => {
        return ::core::result::Result::Err($err)
    };
    ($fmt:expr, $($arg:tt)*) => {
        return ::core::result::Result::Err($crate::token_error!($fmt, $($arg)*))
    };
}
