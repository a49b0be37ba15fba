//! Static registry of the attributes and mechanisms known to the crate.
//!
//! Attributes are addressed by a camelCase symbolic name (`keyType`, `valueLen`, `ecPoint`...)
//! and resolved to their PKCS#11 code together with the type of value they carry.
//! Mechanisms are addressed by their PKCS#11 name without the `CKM_` prefix.

use pkcs11_sys::{
    CK_ATTRIBUTE_TYPE, CK_MECHANISM_TYPE, CK_ULONG, CKA_AC_ISSUER, CKA_ALWAYS_AUTHENTICATE,
    CKA_ALWAYS_SENSITIVE, CKA_APPLICATION, CKA_ATTR_TYPES, CKA_BASE, CKA_CERTIFICATE_CATEGORY,
    CKA_CERTIFICATE_TYPE, CKA_CHECK_VALUE, CKA_CLASS, CKA_COEFFICIENT, CKA_COPYABLE, CKA_DECRYPT,
    CKA_DERIVE, CKA_DESTROYABLE, CKA_EC_PARAMS, CKA_EC_POINT, CKA_ENCRYPT, CKA_END_DATE,
    CKA_EXPONENT_1, CKA_EXPONENT_2, CKA_EXTRACTABLE, CKA_HASH_OF_ISSUER_PUBLIC_KEY,
    CKA_HASH_OF_SUBJECT_PUBLIC_KEY, CKA_ID, CKA_ISSUER, CKA_JAVA_MIDP_SECURITY_DOMAIN,
    CKA_KEY_GEN_MECHANISM, CKA_KEY_TYPE, CKA_LABEL, CKA_LOCAL, CKA_MODIFIABLE, CKA_MODULUS,
    CKA_MODULUS_BITS, CKA_NEVER_EXTRACTABLE, CKA_OBJECT_ID, CKA_OWNER, CKA_PRIME, CKA_PRIME_1,
    CKA_PRIME_2, CKA_PRIME_BITS, CKA_PRIVATE, CKA_PRIVATE_EXPONENT, CKA_PUBLIC_EXPONENT,
    CKA_SENSITIVE, CKA_SERIAL_NUMBER, CKA_SIGN, CKA_SIGN_RECOVER, CKA_START_DATE, CKA_SUBJECT,
    CKA_SUBPRIME, CKA_SUBPRIME_BITS, CKA_TOKEN, CKA_TRUSTED, CKA_UNWRAP, CKA_URL, CKA_VALUE,
    CKA_VALUE_BITS, CKA_VALUE_LEN, CKA_VERIFY, CKA_VERIFY_RECOVER, CKA_WRAP, CKA_WRAP_WITH_TRUSTED,
    CKM_AES_CBC, CKM_AES_CBC_PAD, CKM_AES_CTR, CKM_AES_ECB, CKM_AES_GCM, CKM_AES_KEY_GEN,
    CKM_AES_KEY_WRAP, CKM_AES_KEY_WRAP_PAD, CKM_ECDH1_COFACTOR_DERIVE, CKM_ECDH1_DERIVE,
    CKM_ECDSA, CKM_ECDSA_SHA1, CKM_ECDSA_SHA256, CKM_ECDSA_SHA384, CKM_ECDSA_SHA512,
    CKM_EC_KEY_PAIR_GEN, CKM_GENERIC_SECRET_KEY_GEN, CKM_MD5, CKM_RSA_PKCS,
    CKM_RSA_PKCS_KEY_PAIR_GEN, CKM_RSA_PKCS_OAEP, CKM_RSA_PKCS_PSS, CKM_RSA_X_509, CKM_SHA_1,
    CKM_SHA1_RSA_PKCS, CKM_SHA1_RSA_PKCS_PSS, CKM_SHA224, CKM_SHA256, CKM_SHA256_RSA_PKCS,
    CKM_SHA256_RSA_PKCS_PSS, CKM_SHA384, CKM_SHA384_RSA_PKCS, CKM_SHA512, CKM_SHA512_RSA_PKCS,
};
use strum_macros::Display;

use crate::{TResult, TokenError};

/// Width in bytes of an unsigned integer attribute, as seen by the token.
pub const ULONG_WIDTH: usize = size_of::<CK_ULONG>();

/// Size of a `CK_DATE` value: `YYYYMMDD` as ASCII digits.
pub const DATE_WIDTH: usize = 8;

#[derive(Debug, Display, PartialEq, Eq, Clone, Copy)]
pub enum ValueType {
    UnsignedInt,
    Boolean,
    Utf8Text,
    ByteArray,
    Date,
}

impl ValueType {
    /// Number of bytes a value of this type occupies in a template.
    ///
    /// Variable length types report the actual length of the value.
    #[must_use]
    pub const fn byte_width(self, value_len: usize) -> usize {
        match self {
            Self::UnsignedInt => ULONG_WIDTH,
            Self::Boolean => 1,
            Self::Date => DATE_WIDTH,
            Self::Utf8Text | Self::ByteArray => value_len,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct AttributeSpec {
    pub name: &'static str,
    pub code: CK_ATTRIBUTE_TYPE,
    pub value_type: ValueType,
}

impl AttributeSpec {
    /// The fixed byte width of this attribute, if any.
    #[must_use]
    pub const fn byte_width(&self) -> Option<usize> {
        match self.value_type {
            ValueType::Utf8Text | ValueType::ByteArray => None,
            other => Some(other.byte_width(0)),
        }
    }
}

const fn spec(name: &'static str, code: CK_ATTRIBUTE_TYPE, value_type: ValueType) -> AttributeSpec {
    AttributeSpec {
        name,
        code,
        value_type,
    }
}

use ValueType::{Boolean, ByteArray, Date, UnsignedInt, Utf8Text};

static ATTRIBUTES: &[AttributeSpec] = &[
    // common
    spec("class", CKA_CLASS, UnsignedInt),
    spec("token", CKA_TOKEN, Boolean),
    spec("private", CKA_PRIVATE, Boolean),
    spec("label", CKA_LABEL, Utf8Text),
    spec("modifiable", CKA_MODIFIABLE, Boolean),
    spec("copyable", CKA_COPYABLE, Boolean),
    spec("destroyable", CKA_DESTROYABLE, Boolean),
    // data objects
    spec("application", CKA_APPLICATION, Utf8Text),
    spec("value", CKA_VALUE, ByteArray),
    spec("objectId", CKA_OBJECT_ID, ByteArray),
    // certificates
    spec("certificateType", CKA_CERTIFICATE_TYPE, UnsignedInt),
    spec("issuer", CKA_ISSUER, ByteArray),
    spec("serialNumber", CKA_SERIAL_NUMBER, ByteArray),
    spec("acIssuer", CKA_AC_ISSUER, ByteArray),
    spec("owner", CKA_OWNER, ByteArray),
    spec("attrTypes", CKA_ATTR_TYPES, ByteArray),
    spec("trusted", CKA_TRUSTED, Boolean),
    spec("certificateCategory", CKA_CERTIFICATE_CATEGORY, UnsignedInt),
    spec("javaDomain", CKA_JAVA_MIDP_SECURITY_DOMAIN, UnsignedInt),
    spec("url", CKA_URL, Utf8Text),
    spec("subjectKeyHash", CKA_HASH_OF_SUBJECT_PUBLIC_KEY, ByteArray),
    spec("issuerKeyHash", CKA_HASH_OF_ISSUER_PUBLIC_KEY, ByteArray),
    spec("checkValue", CKA_CHECK_VALUE, ByteArray),
    // keys
    spec("keyType", CKA_KEY_TYPE, UnsignedInt),
    spec("subject", CKA_SUBJECT, ByteArray),
    spec("id", CKA_ID, ByteArray),
    spec("sensitive", CKA_SENSITIVE, Boolean),
    spec("encrypt", CKA_ENCRYPT, Boolean),
    spec("decrypt", CKA_DECRYPT, Boolean),
    spec("wrap", CKA_WRAP, Boolean),
    spec("unwrap", CKA_UNWRAP, Boolean),
    spec("sign", CKA_SIGN, Boolean),
    spec("signRecover", CKA_SIGN_RECOVER, Boolean),
    spec("verify", CKA_VERIFY, Boolean),
    spec("verifyRecover", CKA_VERIFY_RECOVER, Boolean),
    spec("derive", CKA_DERIVE, Boolean),
    spec("startDate", CKA_START_DATE, Date),
    spec("endDate", CKA_END_DATE, Date),
    spec("extractable", CKA_EXTRACTABLE, Boolean),
    spec("local", CKA_LOCAL, Boolean),
    spec("neverExtractable", CKA_NEVER_EXTRACTABLE, Boolean),
    spec("alwaysSensitive", CKA_ALWAYS_SENSITIVE, Boolean),
    spec("keyGenMechanism", CKA_KEY_GEN_MECHANISM, UnsignedInt),
    spec("alwaysAuthenticate", CKA_ALWAYS_AUTHENTICATE, Boolean),
    spec("wrapWithTrusted", CKA_WRAP_WITH_TRUSTED, Boolean),
    // RSA
    spec("modulus", CKA_MODULUS, ByteArray),
    spec("modulusBits", CKA_MODULUS_BITS, UnsignedInt),
    spec("publicExponent", CKA_PUBLIC_EXPONENT, ByteArray),
    spec("privateExponent", CKA_PRIVATE_EXPONENT, ByteArray),
    spec("prime1", CKA_PRIME_1, ByteArray),
    spec("prime2", CKA_PRIME_2, ByteArray),
    spec("exponent1", CKA_EXPONENT_1, ByteArray),
    spec("exponent2", CKA_EXPONENT_2, ByteArray),
    spec("coefficient", CKA_COEFFICIENT, ByteArray),
    // DSA / DH domain parameters
    spec("prime", CKA_PRIME, ByteArray),
    spec("subprime", CKA_SUBPRIME, ByteArray),
    spec("base", CKA_BASE, ByteArray),
    spec("primeBits", CKA_PRIME_BITS, UnsignedInt),
    spec("subprimeBits", CKA_SUBPRIME_BITS, UnsignedInt),
    spec("valueBits", CKA_VALUE_BITS, UnsignedInt),
    // secret keys
    spec("valueLen", CKA_VALUE_LEN, UnsignedInt),
    // elliptic curves
    spec("ecParams", CKA_EC_PARAMS, ByteArray),
    spec("ecPoint", CKA_EC_POINT, ByteArray),
];

/// Resolve an attribute by its symbolic name.
pub fn lookup(name: &str) -> TResult<&'static AttributeSpec> {
    ATTRIBUTES
        .iter()
        .find(|spec| spec.name == name)
        .ok_or_else(|| TokenError::UnknownAttribute(name.to_owned()))
}

/// Resolve an attribute by its PKCS#11 code.
#[must_use]
pub fn lookup_code(code: CK_ATTRIBUTE_TYPE) -> Option<&'static AttributeSpec> {
    ATTRIBUTES.iter().find(|spec| spec.code == code)
}

/// Byte width of a value of `value_type` whose variable length is `declared_width`.
#[must_use]
pub const fn size_of_value(value_type: ValueType, declared_width: usize) -> usize {
    value_type.byte_width(declared_width)
}

static MECHANISMS: &[(&str, CK_MECHANISM_TYPE)] = &[
    ("RSA_PKCS_KEY_PAIR_GEN", CKM_RSA_PKCS_KEY_PAIR_GEN),
    ("RSA_PKCS", CKM_RSA_PKCS),
    ("RSA_X_509", CKM_RSA_X_509),
    ("RSA_PKCS_OAEP", CKM_RSA_PKCS_OAEP),
    ("RSA_PKCS_PSS", CKM_RSA_PKCS_PSS),
    ("SHA1_RSA_PKCS", CKM_SHA1_RSA_PKCS),
    ("SHA256_RSA_PKCS", CKM_SHA256_RSA_PKCS),
    ("SHA384_RSA_PKCS", CKM_SHA384_RSA_PKCS),
    ("SHA512_RSA_PKCS", CKM_SHA512_RSA_PKCS),
    ("SHA1_RSA_PKCS_PSS", CKM_SHA1_RSA_PKCS_PSS),
    ("SHA256_RSA_PKCS_PSS", CKM_SHA256_RSA_PKCS_PSS),
    ("MD5", CKM_MD5),
    ("SHA_1", CKM_SHA_1),
    ("SHA1", CKM_SHA_1),
    ("SHA224", CKM_SHA224),
    ("SHA256", CKM_SHA256),
    ("SHA384", CKM_SHA384),
    ("SHA512", CKM_SHA512),
    ("GENERIC_SECRET_KEY_GEN", CKM_GENERIC_SECRET_KEY_GEN),
    ("AES_KEY_GEN", CKM_AES_KEY_GEN),
    ("AES_ECB", CKM_AES_ECB),
    ("AES_CBC", CKM_AES_CBC),
    ("AES_CBC_PAD", CKM_AES_CBC_PAD),
    ("AES_CTR", CKM_AES_CTR),
    ("AES_GCM", CKM_AES_GCM),
    ("AES_KEY_WRAP", CKM_AES_KEY_WRAP),
    ("AES_KEY_WRAP_PAD", CKM_AES_KEY_WRAP_PAD),
    ("EC_KEY_PAIR_GEN", CKM_EC_KEY_PAIR_GEN),
    ("ECDSA", CKM_ECDSA),
    ("ECDSA_SHA1", CKM_ECDSA_SHA1),
    ("ECDSA_SHA256", CKM_ECDSA_SHA256),
    ("ECDSA_SHA384", CKM_ECDSA_SHA384),
    ("ECDSA_SHA512", CKM_ECDSA_SHA512),
    ("ECDH1_DERIVE", CKM_ECDH1_DERIVE),
    ("ECDH1_COFACTOR_DERIVE", CKM_ECDH1_COFACTOR_DERIVE),
];

/// Resolve a mechanism name, with or without the `CKM_` prefix, ignoring case.
pub fn mechanism_by_name(name: &str) -> TResult<CK_MECHANISM_TYPE> {
    let upper = name.to_ascii_uppercase();
    let bare = upper.strip_prefix("CKM_").unwrap_or(&upper);
    MECHANISMS
        .iter()
        .find(|(known, _)| *known == bare)
        .map(|(_, code)| *code)
        .ok_or_else(|| TokenError::UnknownMechanism(name.to_owned()))
}

/// The registered name of a mechanism code.
#[must_use]
pub fn mechanism_name(code: CK_MECHANISM_TYPE) -> Option<&'static str> {
    MECHANISMS
        .iter()
        .find(|(_, known)| *known == code)
        .map(|(name, _)| *name)
}
