//! Key generation, derivation, wrapping and unwrapping.
//!
//! Every object created on the token by one of these calls is destroyed again when the call
//! fails after creating it, so a failed call never leaves half a key pair or an unchecked key
//! behind.

use pkcs11_sys::{
    CK_KEY_TYPE, CK_OBJECT_CLASS, CK_OBJECT_HANDLE, CKK_AES, CKK_EC, CKK_RSA, CKM_AES_KEY_GEN,
    CKM_EC_KEY_PAIR_GEN, CKM_RSA_PKCS_KEY_PAIR_GEN, CKO_PRIVATE_KEY, CKO_PUBLIC_KEY,
    CKO_SECRET_KEY,
};
use tracing::{debug, warn};

use crate::{
    Mechanism, TResult, Template, TokenError,
    curve::CurveSpec,
    key::{Key, KeyUsage, USAGE_ATTRIBUTES},
    object::SessionObject,
    session::Session,
    template::AttributeMap,
};

const INVALID_HANDLE: CK_OBJECT_HANDLE = 0;

/// The 65537 public exponent, big endian.
pub const RSA_DEFAULT_PUBLIC_EXPONENT: [u8; 3] = [0x01, 0x00, 0x01];

/// Usages carried by the public half of a key pair; the others go to the private half.
const PUBLIC_USAGES: KeyUsage = KeyUsage::ENCRYPT
    .union(KeyUsage::VERIFY)
    .union(KeyUsage::WRAP);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyGenParams {
    Rsa {
        modulus_bits: u64,
        public_exponent: Vec<u8>,
    },
    /// AES key of 128, 192 or 256 bits
    Aes { length_bits: u64 },
    Ecdsa { curve: CurveSpec },
}

impl KeyGenParams {
    /// RSA key pair with the 65537 public exponent.
    #[must_use]
    pub fn rsa(modulus_bits: u64) -> Self {
        Self::Rsa {
            modulus_bits,
            public_exponent: RSA_DEFAULT_PUBLIC_EXPONENT.to_vec(),
        }
    }

    #[must_use]
    pub const fn aes(length_bits: u64) -> Self {
        Self::Aes { length_bits }
    }

    #[must_use]
    pub fn ecdsa(curve: impl Into<CurveSpec>) -> Self {
        Self::Ecdsa {
            curve: curve.into(),
        }
    }

    const fn key_type(&self) -> CK_KEY_TYPE {
        match self {
            Self::Rsa { .. } => CKK_RSA,
            Self::Aes { .. } => CKK_AES,
            Self::Ecdsa { .. } => CKK_EC,
        }
    }
}

/// Attributes common to the generated objects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyGenOptions {
    pub label: Option<String>,
    pub id: Option<Vec<u8>>,
    pub usage: KeyUsage,
    pub extractable: bool,
    /// Persist the key on the token rather than in the session
    pub token: bool,
    pub sensitive: bool,
}

impl Default for KeyGenOptions {
    fn default() -> Self {
        Self {
            label: None,
            id: None,
            usage: KeyUsage::empty(),
            extractable: false,
            token: false,
            sensitive: true,
        }
    }
}

impl KeyGenOptions {
    #[must_use]
    pub fn with_usage(usage: KeyUsage) -> Self {
        Self {
            usage,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn label(mut self, label: &str) -> Self {
        self.label = Some(label.to_owned());
        self
    }

    #[must_use]
    pub fn id(mut self, id: &[u8]) -> Self {
        self.id = Some(id.to_vec());
        self
    }

    #[must_use]
    pub const fn extractable(mut self, extractable: bool) -> Self {
        self.extractable = extractable;
        self
    }

    #[must_use]
    pub const fn token(mut self, token: bool) -> Self {
        self.token = token;
        self
    }

    #[must_use]
    pub const fn sensitive(mut self, sensitive: bool) -> Self {
        self.sensitive = sensitive;
        self
    }

    /// Attributes shared by every object: class, key type, persistence, label, id and the
    /// usage flags among `usages`.
    fn base_template(
        &self,
        class: CK_OBJECT_CLASS,
        key_type: CK_KEY_TYPE,
        usages: KeyUsage,
    ) -> AttributeMap {
        let mut attributes = AttributeMap::new()
            .with("class", u64::from(class))
            .with("keyType", u64::from(key_type))
            .with("token", self.token);
        if let Some(label) = &self.label {
            attributes.set("label", label.as_str());
        }
        if let Some(id) = &self.id {
            attributes.set("id", id.as_slice());
        }
        for (flag, _, name) in USAGE_ATTRIBUTES {
            if usages.contains(flag) {
                attributes.set(name, self.usage.contains(flag));
            }
        }
        attributes
    }

    fn secret_template(&self, key_type: CK_KEY_TYPE) -> AttributeMap {
        self.base_template(CKO_SECRET_KEY, key_type, KeyUsage::all())
            .with("sensitive", self.sensitive)
            .with("extractable", self.extractable)
    }

    fn public_template(&self, key_type: CK_KEY_TYPE) -> AttributeMap {
        self.base_template(CKO_PUBLIC_KEY, key_type, PUBLIC_USAGES)
    }

    fn private_template(&self, key_type: CK_KEY_TYPE) -> AttributeMap {
        self.base_template(CKO_PRIVATE_KEY, key_type, PUBLIC_USAGES.complement())
            .with("private", true)
            .with("sensitive", self.sensitive)
            .with("extractable", self.extractable)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyPair<'s> {
    pub public_key: Key<'s>,
    pub private_key: Key<'s>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratedKey<'s> {
    Secret(Key<'s>),
    Pair(KeyPair<'s>),
}

impl<'s> GeneratedKey<'s> {
    pub fn into_secret(self) -> TResult<Key<'s>> {
        match self {
            Self::Secret(key) => Ok(key),
            Self::Pair(_) => Err(TokenError::UnsupportedKeyType(
                "expected a secret key, got a key pair".to_owned(),
            )),
        }
    }

    pub fn into_pair(self) -> TResult<KeyPair<'s>> {
        match self {
            Self::Pair(pair) => Ok(pair),
            Self::Secret(_) => Err(TokenError::UnsupportedKeyType(
                "expected a key pair, got a secret key".to_owned(),
            )),
        }
    }
}

/// Objects created during a call, destroyed on drop unless the call completed.
struct CreatedObjects<'s> {
    session: &'s Session,
    handles: Vec<CK_OBJECT_HANDLE>,
}

impl<'s> CreatedObjects<'s> {
    const fn new(session: &'s Session) -> Self {
        Self {
            session,
            handles: Vec::new(),
        }
    }

    fn push(&mut self, handle: CK_OBJECT_HANDLE) {
        if handle != INVALID_HANDLE {
            self.handles.push(handle);
        }
    }

    /// Keep the objects: the call succeeded.
    fn commit(mut self) {
        self.handles.clear();
    }
}

impl Drop for CreatedObjects<'_> {
    fn drop(&mut self) {
        for handle in self.handles.drain(..) {
            match self.session.destroy_object(handle) {
                Ok(()) => debug!("destroyed object {handle} left by a failed call"),
                Err(e) => warn!("failed destroying object {handle} left by a failed call: {e}"),
            }
        }
    }
}

/// View a freshly created object as a key, checking its type when one is expected.
fn created_key<'s>(
    session: &'s Session,
    handle: CK_OBJECT_HANDLE,
    expected_type: Option<CK_KEY_TYPE>,
) -> TResult<Key<'s>> {
    if handle == INVALID_HANDLE {
        return Err(TokenError::Default(
            "the token returned an invalid key handle".to_owned(),
        ));
    }
    let key = Key::new(SessionObject::new(session, handle))?;
    if let Some(expected) = expected_type {
        let key_type = key.key_type()?;
        if key_type != expected {
            return Err(TokenError::UnsupportedKeyType(format!(
                "the token created a key of type 0x{key_type:x} instead of 0x{expected:x}"
            )));
        }
    }
    Ok(key)
}

impl Session {
    /// Generate a key of the family described by `params`.
    pub fn generate(
        &self,
        params: &KeyGenParams,
        options: &KeyGenOptions,
    ) -> TResult<GeneratedKey<'_>> {
        let key_type = params.key_type();
        match params {
            KeyGenParams::Aes { length_bits } => {
                if !matches!(*length_bits, 128 | 192 | 256) {
                    return Err(TokenError::InvalidParameterSize(format!(
                        "AES keys are 128, 192 or 256 bits long, not {length_bits}"
                    )));
                }
                let template = options
                    .secret_template(key_type)
                    .with("valueLen", *length_bits / 8);
                let key = self.generate_key_checked(
                    &Mechanism::new(CKM_AES_KEY_GEN),
                    &template,
                    Some(key_type),
                )?;
                Ok(GeneratedKey::Secret(key))
            }
            KeyGenParams::Rsa {
                modulus_bits,
                public_exponent,
            } => {
                let public = options
                    .public_template(key_type)
                    .with("modulusBits", *modulus_bits)
                    .with("publicExponent", public_exponent.as_slice());
                let pair = self.generate_key_pair_checked(
                    &Mechanism::new(CKM_RSA_PKCS_KEY_PAIR_GEN),
                    &public,
                    &options.private_template(key_type),
                    Some(key_type),
                )?;
                Ok(GeneratedKey::Pair(pair))
            }
            KeyGenParams::Ecdsa { curve } => {
                let public = options
                    .public_template(key_type)
                    .with("ecParams", curve.ec_params()?);
                let pair = self.generate_key_pair_checked(
                    &Mechanism::new(CKM_EC_KEY_PAIR_GEN),
                    &public,
                    &options.private_template(key_type),
                    Some(key_type),
                )?;
                Ok(GeneratedKey::Pair(pair))
            }
        }
    }

    /// Generate a secret key from an explicit mechanism and template.
    pub fn generate_key(
        &self,
        mechanism: &Mechanism,
        attributes: &AttributeMap,
    ) -> TResult<Key<'_>> {
        self.generate_key_checked(mechanism, attributes, None)
    }

    fn generate_key_checked(
        &self,
        mechanism: &Mechanism,
        attributes: &AttributeMap,
        expected_type: Option<CK_KEY_TYPE>,
    ) -> TResult<Key<'_>> {
        let template = Template::encode(attributes)?;
        let mut created = CreatedObjects::new(self);
        let handle = self.call("C_GenerateKey", |api, session| {
            api.generate_key(session, mechanism, &template)
        })?;
        created.push(handle);
        let key = created_key(self, handle, expected_type)?;
        created.commit();
        debug!("generated key {handle} with {}", mechanism.name());
        Ok(key)
    }

    /// Generate a key pair from an explicit mechanism and the templates of both halves.
    pub fn generate_key_pair(
        &self,
        mechanism: &Mechanism,
        public_attributes: &AttributeMap,
        private_attributes: &AttributeMap,
    ) -> TResult<KeyPair<'_>> {
        self.generate_key_pair_checked(mechanism, public_attributes, private_attributes, None)
    }

    fn generate_key_pair_checked(
        &self,
        mechanism: &Mechanism,
        public_attributes: &AttributeMap,
        private_attributes: &AttributeMap,
        expected_type: Option<CK_KEY_TYPE>,
    ) -> TResult<KeyPair<'_>> {
        let public_template = Template::encode(public_attributes)?;
        let private_template = Template::encode(private_attributes)?;
        let mut created = CreatedObjects::new(self);
        let (public_handle, private_handle) = self.call("C_GenerateKeyPair", |api, session| {
            api.generate_key_pair(session, mechanism, &public_template, &private_template)
        })?;
        created.push(public_handle);
        created.push(private_handle);
        let public_key = created_key(self, public_handle, expected_type)?;
        let private_key = created_key(self, private_handle, expected_type)?;
        created.commit();
        debug!(
            "generated key pair ({public_handle}, {private_handle}) with {}",
            mechanism.name()
        );
        Ok(KeyPair {
            public_key,
            private_key,
        })
    }

    /// Derive a new key from `base_key`.
    pub fn derive_key(
        &self,
        mechanism: &Mechanism,
        base_key: &Key<'_>,
        attributes: &AttributeMap,
    ) -> TResult<Key<'_>> {
        if !base_key.usage()?.contains(KeyUsage::DERIVE) {
            return Err(TokenError::KeyUsage(format!(
                "key {} does not allow the derive usage",
                base_key.handle()
            )));
        }
        let template = Template::encode(attributes)?;
        let mut created = CreatedObjects::new(self);
        let handle = self.call("C_DeriveKey", |api, session| {
            api.derive_key(session, mechanism, base_key.handle(), &template)
        })?;
        created.push(handle);
        let key = created_key(self, handle, None)?;
        created.commit();
        debug!("derived key {handle} from {}", base_key.handle());
        Ok(key)
    }

    /// Wrap (encrypt) `key` under `wrapping_key`.
    pub fn wrap_key(
        &self,
        wrapping_key: &Key<'_>,
        mechanism: &Mechanism,
        key: &Key<'_>,
    ) -> TResult<Vec<u8>> {
        if !wrapping_key.usage()?.contains(KeyUsage::WRAP) {
            return Err(TokenError::KeyUsage(format!(
                "key {} does not allow the wrap usage",
                wrapping_key.handle()
            )));
        }
        self.call_output("C_WrapKey", None, |api, session, output| {
            api.wrap_key(
                session,
                mechanism,
                wrapping_key.handle(),
                key.handle(),
                output,
            )
        })
    }

    /// Unwrap (decrypt) `wrapped` under `unwrapping_key` into a new key described by
    /// `attributes`.
    pub fn unwrap_key(
        &self,
        unwrapping_key: &Key<'_>,
        mechanism: &Mechanism,
        attributes: &AttributeMap,
        wrapped: &[u8],
    ) -> TResult<Key<'_>> {
        if !unwrapping_key.usage()?.contains(KeyUsage::UNWRAP) {
            return Err(TokenError::KeyUsage(format!(
                "key {} does not allow the unwrap usage",
                unwrapping_key.handle()
            )));
        }
        let template = Template::encode(attributes)?;
        let mut created = CreatedObjects::new(self);
        let handle = self.call("C_UnwrapKey", |api, session| {
            api.unwrap_key(
                session,
                mechanism,
                unwrapping_key.handle(),
                wrapped,
                &template,
            )
        })?;
        created.push(handle);
        let key = created_key(self, handle, None)?;
        created.commit();
        debug!("unwrapped key {handle}");
        Ok(key)
    }
}
