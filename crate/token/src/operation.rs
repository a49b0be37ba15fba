//! The `Init -> Update* -> Final` protocol shared by digest, sign, verify, encrypt and
//! decrypt operations.
//!
//! A [`CryptoOperation`] moves forward only: `Idle -> Initialized -> Finalized`. Any call
//! out of order fails with [`TokenError::InvalidOperationState`] before reaching the token.
//! A session runs at most one live operation of each kind.
//!
//! The key of an operation is checked before the token is asked to initialize it: its class
//! must fit the operation (a private or secret key to sign or decrypt, a public or secret key
//! to verify or encrypt) and the matching usage flag must be set. Every kind is checked the
//! same way.

use pkcs11_sys::{
    CKR_FUNCTION_FAILED, CKR_KEY_HANDLE_INVALID, CKR_SIGNATURE_INVALID, CKR_SIGNATURE_LEN_RANGE,
};
use strum_macros::Display;
use tracing::{debug, trace};

use crate::{
    Mechanism, TResult, TokenError,
    key::{Key, KeyClass, KeyUsage},
    session::Session,
};

/// Extra room given to the output of a streaming update, enough for one cipher block.
const UPDATE_OUTPUT_SLACK: usize = 32;

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Digest,
    Sign,
    Verify,
    Encrypt,
    Decrypt,
}

impl OperationKind {
    /// Usage flag and key classes a key needs for this operation; `None` for a digest.
    const fn key_requirements(self) -> Option<(KeyUsage, [KeyClass; 2])> {
        match self {
            Self::Digest => None,
            Self::Sign => Some((KeyUsage::SIGN, [KeyClass::Private, KeyClass::Secret])),
            Self::Verify => Some((KeyUsage::VERIFY, [KeyClass::Public, KeyClass::Secret])),
            Self::Encrypt => Some((KeyUsage::ENCRYPT, [KeyClass::Public, KeyClass::Secret])),
            Self::Decrypt => Some((KeyUsage::DECRYPT, [KeyClass::Private, KeyClass::Secret])),
        }
    }

    const fn verbs(self) -> [&'static str; 3] {
        match self {
            Self::Digest => ["C_DigestInit", "C_DigestUpdate", "C_DigestFinal"],
            Self::Sign => ["C_SignInit", "C_SignUpdate", "C_SignFinal"],
            Self::Verify => ["C_VerifyInit", "C_VerifyUpdate", "C_VerifyFinal"],
            Self::Encrypt => ["C_EncryptInit", "C_EncryptUpdate", "C_EncryptFinal"],
            Self::Decrypt => ["C_DecryptInit", "C_DecryptUpdate", "C_DecryptFinal"],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    Idle,
    Initialized,
    Finalized,
}

/// Result of finalizing an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalOutput {
    /// Digest, signature or the last bytes of a ciphertext or plaintext
    Data(Vec<u8>),
    /// Outcome of a verification
    Verified(bool),
}

/// Check that `key` may be used for an operation of `kind`.
pub(crate) fn check_key(kind: OperationKind, key: Option<&Key<'_>>) -> TResult<()> {
    match (kind.key_requirements(), key) {
        (None, None) => Ok(()),
        (None, Some(_)) => Err(TokenError::KeyUsage(format!(
            "a {kind} operation does not take a key"
        ))),
        (Some(_), None) => Err(TokenError::KeyUsage(format!(
            "a {kind} operation requires a key"
        ))),
        (Some((usage, classes)), Some(key)) => {
            if !classes.contains(&key.key_class()) {
                return Err(TokenError::KeyUsage(format!(
                    "a {:?} key cannot be used for a {kind} operation",
                    key.key_class()
                )));
            }
            if !key.usage()?.contains(usage) {
                return Err(TokenError::KeyUsage(format!(
                    "key {} does not allow the {kind} usage",
                    key.handle()
                )));
            }
            Ok(())
        }
    }
}

pub struct CryptoOperation<'s> {
    session: &'s Session,
    kind: OperationKind,
    state: OperationState,
    mechanism: Option<Mechanism>,
}

impl<'s> CryptoOperation<'s> {
    #[must_use]
    pub const fn new(session: &'s Session, kind: OperationKind) -> Self {
        Self {
            session,
            kind,
            state: OperationState::Idle,
            mechanism: None,
        }
    }

    #[must_use]
    pub const fn kind(&self) -> OperationKind {
        self.kind
    }

    #[must_use]
    pub const fn state(&self) -> OperationState {
        self.state
    }

    #[must_use]
    pub const fn mechanism(&self) -> Option<&Mechanism> {
        self.mechanism.as_ref()
    }

    fn expect_state(&self, expected: OperationState, call: &str) -> TResult<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(TokenError::InvalidOperationState(format!(
                "{call} on a {} operation in state {:?}",
                self.kind, self.state
            )))
        }
    }

    /// Move to `Finalized` and free the session slot of this operation kind.
    fn finish(&mut self) {
        if self.state == OperationState::Initialized {
            self.session.release_operation(self.kind);
        }
        self.state = OperationState::Finalized;
    }

    /// Finalize the operation on a token error.
    fn fail<T>(&mut self, result: TResult<T>) -> TResult<T> {
        if result.is_err() {
            self.finish();
        }
        result
    }

    /// Initialize the operation with `mechanism` and, except for a digest, `key`.
    pub fn init(&mut self, mechanism: Mechanism, key: Option<&Key<'_>>) -> TResult<()> {
        self.expect_state(OperationState::Idle, "init")?;
        check_key(self.kind, key)?;
        self.session.acquire_operation(self.kind)?;
        let [verb, _, _] = self.kind.verbs();
        let key_handle = key.map(|key| key.handle());
        let result = self.session.call(verb, |api, session| match (self.kind, key_handle) {
            (OperationKind::Digest, _) => api.digest_init(session, &mechanism),
            (OperationKind::Sign, Some(key)) => api.sign_init(session, &mechanism, key),
            (OperationKind::Verify, Some(key)) => api.verify_init(session, &mechanism, key),
            (OperationKind::Encrypt, Some(key)) => api.encrypt_init(session, &mechanism, key),
            (OperationKind::Decrypt, Some(key)) => api.decrypt_init(session, &mechanism, key),
            // keys were checked above
            (_, None) => Err(CKR_KEY_HANDLE_INVALID),
        });
        if let Err(e) = result {
            self.session.release_operation(self.kind);
            self.state = OperationState::Finalized;
            return Err(e);
        }
        debug!("{} initialized with {}", self.kind, mechanism.name());
        self.mechanism = Some(mechanism);
        self.state = OperationState::Initialized;
        Ok(())
    }

    /// Feed `data` to the operation.
    ///
    /// Encryption and decryption return the output the token produces for this chunk, which
    /// may be empty; other kinds always return an empty buffer.
    pub fn update(&mut self, data: &[u8]) -> TResult<Vec<u8>> {
        self.expect_state(OperationState::Initialized, "update")?;
        let [_, verb, _] = self.kind.verbs();
        trace!("{}: {} bytes", self.kind, data.len());
        let result = match self.kind {
            OperationKind::Digest => self
                .session
                .call(verb, |api, session| api.digest_update(session, data))
                .map(|()| Vec::new()),
            OperationKind::Sign => self
                .session
                .call(verb, |api, session| api.sign_update(session, data))
                .map(|()| Vec::new()),
            OperationKind::Verify => self
                .session
                .call(verb, |api, session| api.verify_update(session, data))
                .map(|()| Vec::new()),
            OperationKind::Encrypt => self.session.call_output(
                verb,
                Some(data.len() + UPDATE_OUTPUT_SLACK),
                |api, session, output| api.encrypt_update(session, data, output),
            ),
            OperationKind::Decrypt => self.session.call_output(
                verb,
                Some(data.len() + UPDATE_OUTPUT_SLACK),
                |api, session, output| api.decrypt_update(session, data, output),
            ),
        };
        self.fail(result)
    }

    /// Finalize the operation. A verification takes the signature to check and reports a
    /// mismatch as `Verified(false)`.
    pub fn finalize(&mut self, signature: Option<&[u8]>) -> TResult<FinalOutput> {
        self.expect_state(OperationState::Initialized, "final")?;
        let result = match (self.kind, signature) {
            (OperationKind::Verify, Some(signature)) => match self.verify_final(signature) {
                Ok(()) => Ok(FinalOutput::Verified(true)),
                Err(TokenError::TokenCallFailed {
                    rv: CKR_SIGNATURE_INVALID | CKR_SIGNATURE_LEN_RANGE,
                    ..
                }) => Ok(FinalOutput::Verified(false)),
                Err(e) => Err(e),
            },
            (OperationKind::Verify, None) => {
                return Err(TokenError::InvalidOperationState(
                    "a verify operation is finalized with a signature".to_owned(),
                ));
            }
            _ => self.read_final().map(FinalOutput::Data),
        };
        self.finish();
        debug!("{} finalized", self.kind);
        result
    }

    fn verify_final(&self, signature: &[u8]) -> TResult<()> {
        self.session.call("C_VerifyFinal", |api, session| {
            api.verify_final(session, signature)
        })
    }

    fn read_final(&self) -> TResult<Vec<u8>> {
        let kind = self.kind;
        let [_, _, verb] = kind.verbs();
        self.session
            .call_output(verb, None, |api, session, output| match kind {
                OperationKind::Digest => api.digest_final(session, output),
                OperationKind::Sign => api.sign_final(session, output),
                OperationKind::Encrypt => api.encrypt_final(session, output),
                OperationKind::Decrypt => api.decrypt_final(session, output),
                // a verification ends with the signature, not with an output
                OperationKind::Verify => Err(CKR_FUNCTION_FAILED),
            })
    }

    /// Terminate an operation abandoned while initialized, ignoring the outcome.
    fn drain(&mut self) {
        let outcome = match self.kind {
            // an empty signature always ends the verification
            OperationKind::Verify => self.verify_final(&[]),
            _ => self.read_final().map(|_| ()),
        };
        trace!(
            "drained an abandoned {} operation: {}",
            self.kind,
            outcome.is_ok()
        );
        self.finish();
    }
}

impl Drop for CryptoOperation<'_> {
    fn drop(&mut self) {
        if self.state == OperationState::Initialized {
            self.drain();
        }
    }
}

macro_rules! typed_operation {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        pub struct $name<'s>(CryptoOperation<'s>);

        impl<'s> $name<'s> {
            #[must_use]
            pub const fn state(&self) -> OperationState {
                self.0.state()
            }

            #[must_use]
            pub const fn operation(&self) -> &CryptoOperation<'s> {
                &self.0
            }
        }
    };
}

typed_operation!(
    /// A digest being computed.
    Digest
);
typed_operation!(
    /// A signature being computed.
    Signer
);
typed_operation!(
    /// A signature being checked.
    Verifier
);
typed_operation!(
    /// A streaming encryption.
    Encryptor
);
typed_operation!(
    /// A streaming decryption.
    Decryptor
);

fn data(output: FinalOutput) -> TResult<Vec<u8>> {
    match output {
        FinalOutput::Data(data) => Ok(data),
        FinalOutput::Verified(_) => Err(TokenError::InvalidOperationState(
            "unexpected verification result".to_owned(),
        )),
    }
}

impl Digest<'_> {
    pub fn update(&mut self, data: &[u8]) -> TResult<()> {
        self.0.update(data).map(|_| ())
    }

    pub fn finalize(&mut self) -> TResult<Vec<u8>> {
        data(self.0.finalize(None)?)
    }
}

impl Signer<'_> {
    pub fn update(&mut self, data: &[u8]) -> TResult<()> {
        self.0.update(data).map(|_| ())
    }

    pub fn finalize(&mut self) -> TResult<Vec<u8>> {
        data(self.0.finalize(None)?)
    }
}

impl Verifier<'_> {
    pub fn update(&mut self, data: &[u8]) -> TResult<()> {
        self.0.update(data).map(|_| ())
    }

    /// Whether `signature` matches the data fed so far.
    pub fn finalize(&mut self, signature: &[u8]) -> TResult<bool> {
        match self.0.finalize(Some(signature))? {
            FinalOutput::Verified(verified) => Ok(verified),
            FinalOutput::Data(_) => Err(TokenError::InvalidOperationState(
                "unexpected output from a verification".to_owned(),
            )),
        }
    }
}

impl Encryptor<'_> {
    pub fn update(&mut self, plaintext: &[u8]) -> TResult<Vec<u8>> {
        self.0.update(plaintext)
    }

    pub fn finalize(&mut self) -> TResult<Vec<u8>> {
        data(self.0.finalize(None)?)
    }
}

impl Decryptor<'_> {
    pub fn update(&mut self, ciphertext: &[u8]) -> TResult<Vec<u8>> {
        self.0.update(ciphertext)
    }

    pub fn finalize(&mut self) -> TResult<Vec<u8>> {
        data(self.0.finalize(None)?)
    }
}

impl Session {
    fn init_operation(
        &self,
        kind: OperationKind,
        mechanism: Mechanism,
        key: Option<&Key<'_>>,
    ) -> TResult<CryptoOperation<'_>> {
        let mut operation = CryptoOperation::new(self, kind);
        operation.init(mechanism, key)?;
        Ok(operation)
    }

    pub fn digest_init(&self, mechanism: Mechanism) -> TResult<Digest<'_>> {
        Ok(Digest(self.init_operation(OperationKind::Digest, mechanism, None)?))
    }

    pub fn sign_init(&self, mechanism: Mechanism, key: &Key<'_>) -> TResult<Signer<'_>> {
        Ok(Signer(self.init_operation(OperationKind::Sign, mechanism, Some(key))?))
    }

    pub fn verify_init(&self, mechanism: Mechanism, key: &Key<'_>) -> TResult<Verifier<'_>> {
        Ok(Verifier(self.init_operation(
            OperationKind::Verify,
            mechanism,
            Some(key),
        )?))
    }

    pub fn encrypt_init(&self, mechanism: Mechanism, key: &Key<'_>) -> TResult<Encryptor<'_>> {
        Ok(Encryptor(self.init_operation(
            OperationKind::Encrypt,
            mechanism,
            Some(key),
        )?))
    }

    pub fn decrypt_init(&self, mechanism: Mechanism, key: &Key<'_>) -> TResult<Decryptor<'_>> {
        Ok(Decryptor(self.init_operation(
            OperationKind::Decrypt,
            mechanism,
            Some(key),
        )?))
    }

    pub fn digest(&self, mechanism: Mechanism, data: &[u8]) -> TResult<Vec<u8>> {
        let mut digest = self.digest_init(mechanism)?;
        digest.update(data)?;
        digest.finalize()
    }

    pub fn sign(&self, mechanism: Mechanism, key: &Key<'_>, data: &[u8]) -> TResult<Vec<u8>> {
        let mut signer = self.sign_init(mechanism, key)?;
        signer.update(data)?;
        signer.finalize()
    }

    pub fn verify(
        &self,
        mechanism: Mechanism,
        key: &Key<'_>,
        data: &[u8],
        signature: &[u8],
    ) -> TResult<bool> {
        let mut verifier = self.verify_init(mechanism, key)?;
        verifier.update(data)?;
        verifier.finalize(signature)
    }

    pub fn encrypt(
        &self,
        mechanism: Mechanism,
        key: &Key<'_>,
        plaintext: &[u8],
    ) -> TResult<Vec<u8>> {
        let mut encryptor = self.encrypt_init(mechanism, key)?;
        let mut ciphertext = encryptor.update(plaintext)?;
        ciphertext.extend(encryptor.finalize()?);
        Ok(ciphertext)
    }

    pub fn decrypt(
        &self,
        mechanism: Mechanism,
        key: &Key<'_>,
        ciphertext: &[u8],
    ) -> TResult<Vec<u8>> {
        let mut decryptor = self.decrypt_init(mechanism, key)?;
        let mut plaintext = decryptor.update(ciphertext)?;
        plaintext.extend(decryptor.finalize()?);
        Ok(plaintext)
    }
}
