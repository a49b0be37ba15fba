//! Copyright 2026 tokenkit developers
//!
//! Typed, session oriented access to PKCS#11 tokens.
//!
//! Objects are described with named attributes which are encoded into the token's binary
//! templates, cryptographic operations follow a checked `init -> update* -> final` state
//! machine, and keys can be generated, wrapped and exported as JSON Web Keys.

mod error;

pub use capabilities::TokenCapabilities;
pub use config::{
    ENV_FIND_BATCH_SIZE, ENV_PKCS11_LIB, ENV_READ_WRITE, ENV_SLOT_ID, ENV_USER_PIN, TokenConfig,
};
pub use curve::{CurveSpec, NamedCurve};
pub use error::{TResult, TokenError, rv_name};
pub use export::{EcPoint, Jwk, decode_ec_point, export_key};
pub use key::{AesKey, EcKey, Key, KeyClass, KeyFamily, KeyUsage, RsaKey};
pub use lifecycle::{
    GeneratedKey, KeyGenOptions, KeyGenParams, KeyPair, RSA_DEFAULT_PUBLIC_EXPONENT,
};
pub use mechanism::{
    AES_CBC_IV_LENGTH, AesCbcParams, AesGcmParams, EcdhParams, Mechanism, MechanismParams,
    RsaOaepParams,
};
pub use module::{Info, Module};
pub use object::SessionObject;
pub use operation::{
    CryptoOperation, Decryptor, Digest, Encryptor, FinalOutput, OperationKind, OperationState,
    Signer, Verifier,
};
pub use pkcs11_lib::Pkcs11Library;
pub use registry::{AttributeSpec, ValueType};
pub use session::{Session, UserType};
pub use template::{AttributeMap, AttributeValue, Template, TemplateEntry};
pub use token_api::{Rv, SessionInfo, TokenApi};

mod capabilities;
mod config;
mod curve;
mod export;
mod key;
mod lifecycle;
mod mechanism;
mod module;
mod object;
mod operation;
mod pkcs11_lib;
pub mod registry;
mod session;
pub mod template;
mod token_api;

pub mod test_helpers;
pub mod tests_shared;

#[cfg(test)]
mod tests;
