//! Typed view over token key objects.
//!
//! The family of a key (RSA, AES, EC) is read from its `CKA_KEY_TYPE` attribute when
//! [`Key::family`] is called; it is not part of the static type.

use std::ops::Deref;

use bitflags::bitflags;
use pkcs11_sys::{
    CK_ATTRIBUTE_TYPE, CK_KEY_TYPE, CK_OBJECT_CLASS, CK_OBJECT_HANDLE, CKA_COEFFICIENT,
    CKA_DECRYPT, CKA_DERIVE, CKA_EC_PARAMS, CKA_EC_POINT, CKA_ENCRYPT, CKA_EXPONENT_1,
    CKA_EXPONENT_2, CKA_EXTRACTABLE, CKA_KEY_TYPE, CKA_MODULUS, CKA_MODULUS_BITS, CKA_PRIME_1,
    CKA_PRIME_2, CKA_PRIVATE_EXPONENT, CKA_PUBLIC_EXPONENT, CKA_SENSITIVE, CKA_SIGN, CKA_UNWRAP,
    CKA_VALUE, CKA_VALUE_LEN, CKA_VERIFY, CKA_WRAP, CKK_AES, CKK_EC, CKK_RSA, CKO_PRIVATE_KEY,
    CKO_PUBLIC_KEY, CKO_SECRET_KEY,
};

use crate::{
    TResult, TokenError, curve::NamedCurve, object::SessionObject, session::Session,
};

bitflags! {
    /// What a key may be used for, mirroring its boolean usage attributes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct KeyUsage: u8 {
        const ENCRYPT = 1;
        const DECRYPT = 1 << 1;
        const SIGN = 1 << 2;
        const VERIFY = 1 << 3;
        const WRAP = 1 << 4;
        const UNWRAP = 1 << 5;
        const DERIVE = 1 << 6;
    }
}

/// Each usage flag with its attribute code and registry name.
pub(crate) const USAGE_ATTRIBUTES: [(KeyUsage, CK_ATTRIBUTE_TYPE, &str); 7] = [
    (KeyUsage::ENCRYPT, CKA_ENCRYPT, "encrypt"),
    (KeyUsage::DECRYPT, CKA_DECRYPT, "decrypt"),
    (KeyUsage::SIGN, CKA_SIGN, "sign"),
    (KeyUsage::VERIFY, CKA_VERIFY, "verify"),
    (KeyUsage::WRAP, CKA_WRAP, "wrap"),
    (KeyUsage::UNWRAP, CKA_UNWRAP, "unwrap"),
    (KeyUsage::DERIVE, CKA_DERIVE, "derive"),
];

/// The three classes of key objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyClass {
    Public,
    Private,
    Secret,
}

impl KeyClass {
    pub fn from_class(class: CK_OBJECT_CLASS) -> Option<Self> {
        match class {
            CKO_PUBLIC_KEY => Some(Self::Public),
            CKO_PRIVATE_KEY => Some(Self::Private),
            CKO_SECRET_KEY => Some(Self::Secret),
            _ => None,
        }
    }

    #[must_use]
    pub const fn class(self) -> CK_OBJECT_CLASS {
        match self {
            Self::Public => CKO_PUBLIC_KEY,
            Self::Private => CKO_PRIVATE_KEY,
            Self::Secret => CKO_SECRET_KEY,
        }
    }
}

/// A key object on the token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Key<'s> {
    object: SessionObject<'s>,
    class: KeyClass,
}

impl<'s> Deref for Key<'s> {
    type Target = SessionObject<'s>;

    fn deref(&self) -> &Self::Target {
        &self.object
    }
}

impl<'s> Key<'s> {
    /// View `object` as a key, failing when it is not a public, private or secret key.
    pub fn new(object: SessionObject<'s>) -> TResult<Self> {
        let class = object.class()?;
        let class = KeyClass::from_class(class).ok_or_else(|| {
            TokenError::UnsupportedKeyType(format!(
                "object {} of class 0x{class:x} is not a key",
                object.handle()
            ))
        })?;
        Ok(Self { object, class })
    }

    #[must_use]
    pub const fn object(&self) -> SessionObject<'s> {
        self.object
    }

    #[must_use]
    pub const fn key_class(&self) -> KeyClass {
        self.class
    }

    pub fn key_type(&self) -> TResult<CK_KEY_TYPE> {
        let key_type = self.get_number(CKA_KEY_TYPE)?.ok_or_else(|| {
            TokenError::UnsupportedKeyType(format!("key {} has no key type", self.handle()))
        })?;
        Ok(CK_KEY_TYPE::try_from(key_type)?)
    }

    /// The usages set on the key; usage attributes the token does not report are unset.
    pub fn usage(&self) -> TResult<KeyUsage> {
        let mut usage = KeyUsage::empty();
        for (flag, code, _) in USAGE_ATTRIBUTES {
            if self.get_boolean(code)?.unwrap_or(false) {
                usage |= flag;
            }
        }
        Ok(usage)
    }

    pub fn is_extractable(&self) -> TResult<bool> {
        Ok(self.get_boolean(CKA_EXTRACTABLE)?.unwrap_or(false))
    }

    pub fn is_sensitive(&self) -> TResult<bool> {
        Ok(self.get_boolean(CKA_SENSITIVE)?.unwrap_or(false))
    }

    pub fn family(&self) -> TResult<KeyFamily<'s>> {
        let key = *self;
        match self.key_type()? {
            CKK_RSA => Ok(KeyFamily::Rsa(RsaKey(key))),
            CKK_AES => Ok(KeyFamily::Aes(AesKey(key))),
            CKK_EC => Ok(KeyFamily::Ecdsa(EcKey(key))),
            other => Err(TokenError::UnsupportedKeyType(format!(
                "key type 0x{other:x}"
            ))),
        }
    }

    /// A mandatory attribute of the key.
    pub(crate) fn require(&self, code: CK_ATTRIBUTE_TYPE, name: &str) -> TResult<Vec<u8>> {
        self.get_attribute(code)?.ok_or_else(|| {
            TokenError::KeyUsage(format!(
                "the {name} of key {} is not available",
                self.handle()
            ))
        })
    }
}

impl Session {
    /// The key with `handle`.
    pub fn get_key(&self, handle: CK_OBJECT_HANDLE) -> TResult<Key<'_>> {
        Key::new(self.get_object(handle)?)
    }
}

/// A key, specialized by the family read from the token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFamily<'s> {
    Rsa(RsaKey<'s>),
    Aes(AesKey<'s>),
    Ecdsa(EcKey<'s>),
}

impl<'s> KeyFamily<'s> {
    #[must_use]
    pub const fn key(&self) -> &Key<'s> {
        match self {
            Self::Rsa(RsaKey(key)) | Self::Aes(AesKey(key)) | Self::Ecdsa(EcKey(key)) => key,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RsaKey<'s>(Key<'s>);

impl<'s> Deref for RsaKey<'s> {
    type Target = Key<'s>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl RsaKey<'_> {
    pub fn modulus(&self) -> TResult<Option<Vec<u8>>> {
        self.get_attribute(CKA_MODULUS)
    }

    pub fn public_exponent(&self) -> TResult<Option<Vec<u8>>> {
        self.get_attribute(CKA_PUBLIC_EXPONENT)
    }

    pub fn modulus_bits(&self) -> TResult<Option<u64>> {
        self.get_number(CKA_MODULUS_BITS)
    }

    pub fn private_exponent(&self) -> TResult<Option<Vec<u8>>> {
        self.get_attribute(CKA_PRIVATE_EXPONENT)
    }

    /// The CRT parameters `(p, q, dp, dq, qi)` when the token exposes all of them.
    pub fn crt_parameters(&self) -> TResult<Option<[Vec<u8>; 5]>> {
        let mut parameters = Vec::with_capacity(5);
        for code in [
            CKA_PRIME_1,
            CKA_PRIME_2,
            CKA_EXPONENT_1,
            CKA_EXPONENT_2,
            CKA_COEFFICIENT,
        ] {
            match self.get_attribute(code)? {
                Some(value) => parameters.push(value),
                None => return Ok(None),
            }
        }
        Ok(parameters.try_into().ok())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AesKey<'s>(Key<'s>);

impl<'s> Deref for AesKey<'s> {
    type Target = Key<'s>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AesKey<'_> {
    /// Key length in bytes.
    pub fn value_len(&self) -> TResult<Option<u64>> {
        self.get_number(CKA_VALUE_LEN)
    }

    pub fn value(&self) -> TResult<Option<Vec<u8>>> {
        self.get_attribute(CKA_VALUE)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EcKey<'s>(Key<'s>);

impl<'s> Deref for EcKey<'s> {
    type Target = Key<'s>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl EcKey<'_> {
    pub fn ec_params(&self) -> TResult<Option<Vec<u8>>> {
        self.get_attribute(CKA_EC_PARAMS)
    }

    /// The public point, DER encoded as an OCTET STRING.
    pub fn ec_point(&self) -> TResult<Option<Vec<u8>>> {
        self.get_attribute(CKA_EC_POINT)
    }

    /// The private scalar.
    pub fn value(&self) -> TResult<Option<Vec<u8>>> {
        self.get_attribute(CKA_VALUE)
    }

    pub fn curve(&self) -> TResult<NamedCurve> {
        NamedCurve::from_der(&self.require(CKA_EC_PARAMS, "curve")?)
    }
}
