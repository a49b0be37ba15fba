//! Elliptic curves known to the crate, identified by their object identifier.
//!
//! Tokens store the curve of an EC key as the DER encoding of its OID in `CKA_EC_PARAMS`.

use der::{Decode, Encode, asn1::ObjectIdentifier};
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter};

use crate::{TResult, TokenError};

#[derive(Debug, Display, EnumIter, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NamedCurve {
    #[strum(to_string = "secp192r1")]
    Secp192r1,
    #[strum(to_string = "secp256r1")]
    Secp256r1,
    #[strum(to_string = "secp384r1")]
    Secp384r1,
    #[strum(to_string = "secp521r1")]
    Secp521r1,
    #[strum(to_string = "secp256k1")]
    Secp256k1,
    #[strum(to_string = "brainpoolP256r1")]
    BrainpoolP256r1,
    #[strum(to_string = "brainpoolP384r1")]
    BrainpoolP384r1,
    #[strum(to_string = "brainpoolP512r1")]
    BrainpoolP512r1,
}

impl NamedCurve {
    /// Dotted form of the curve OID.
    #[must_use]
    pub const fn oid(self) -> &'static str {
        match self {
            Self::Secp192r1 => "1.2.840.10045.3.1.1",
            Self::Secp256r1 => "1.2.840.10045.3.1.7",
            Self::Secp384r1 => "1.3.132.0.34",
            Self::Secp521r1 => "1.3.132.0.35",
            Self::Secp256k1 => "1.3.132.0.10",
            Self::BrainpoolP256r1 => "1.3.36.3.3.2.8.1.1.7",
            Self::BrainpoolP384r1 => "1.3.36.3.3.2.8.1.1.11",
            Self::BrainpoolP512r1 => "1.3.36.3.3.2.8.1.1.13",
        }
    }

    /// Size in bytes of a coordinate, and of a private scalar.
    #[must_use]
    pub const fn byte_size(self) -> usize {
        match self {
            Self::Secp192r1 => 24,
            Self::Secp256r1 | Self::Secp256k1 | Self::BrainpoolP256r1 => 32,
            Self::Secp384r1 | Self::BrainpoolP384r1 => 48,
            Self::BrainpoolP512r1 => 64,
            Self::Secp521r1 => 66,
        }
    }

    /// Name of the curve in a JSON Web Key; only the NIST prime curves have one.
    #[must_use]
    pub const fn jwk_name(self) -> Option<&'static str> {
        match self {
            Self::Secp192r1 => Some("P-192"),
            Self::Secp256r1 => Some("P-256"),
            Self::Secp384r1 => Some("P-384"),
            Self::Secp521r1 => Some("P-521"),
            _ => None,
        }
    }

    /// Resolve a curve by name: the SEC 2 name, the ANSI X9.62 alias or the JWK name.
    pub fn from_name(name: &str) -> TResult<Self> {
        let curve = match name.to_ascii_lowercase().as_str() {
            "prime192v1" | "p-192" => Self::Secp192r1,
            "prime256v1" | "p-256" => Self::Secp256r1,
            "p-384" => Self::Secp384r1,
            "p-521" => Self::Secp521r1,
            lower => Self::iter()
                .find(|curve| curve.to_string().to_ascii_lowercase() == lower)
                .ok_or_else(|| TokenError::UnknownCurve(name.to_owned()))?,
        };
        Ok(curve)
    }

    pub fn from_oid(oid: &ObjectIdentifier) -> TResult<Self> {
        let dotted = oid.to_string();
        Self::iter()
            .find(|curve| curve.oid() == dotted)
            .ok_or(TokenError::UnknownCurve(dotted))
    }

    /// Resolve the curve from the DER encoded OID found in `CKA_EC_PARAMS`.
    pub fn from_der(ec_params: &[u8]) -> TResult<Self> {
        let oid = ObjectIdentifier::from_der(ec_params)
            .map_err(|_| TokenError::UnknownCurve(hex::encode(ec_params)))?;
        Self::from_oid(&oid)
    }

    /// DER encoding of the curve OID, as expected in `CKA_EC_PARAMS`.
    pub fn to_der(self) -> TResult<Vec<u8>> {
        let oid = ObjectIdentifier::new(self.oid())
            .map_err(|e| TokenError::UnknownCurve(format!("{}: {e}", self.oid())))?;
        Ok(oid.to_der()?)
    }
}

/// How a caller designates the curve of a key to generate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CurveSpec {
    Named(NamedCurve),
    /// Dotted OID such as `1.2.840.10045.3.1.7`
    Oid(String),
    /// DER encoded OID, handed to the token as is
    Der(Vec<u8>),
}

impl From<NamedCurve> for CurveSpec {
    fn from(curve: NamedCurve) -> Self {
        Self::Named(curve)
    }
}

impl CurveSpec {
    /// The `CKA_EC_PARAMS` value designating this curve.
    ///
    /// Raw OIDs are not limited to the named curves; the token decides whether it supports
    /// them.
    pub fn ec_params(&self) -> TResult<Vec<u8>> {
        match self {
            Self::Named(curve) => curve.to_der(),
            Self::Oid(dotted) => Ok(ObjectIdentifier::new(dotted)
                .map_err(|_| TokenError::UnknownCurve(dotted.clone()))?
                .to_der()?),
            Self::Der(der) => {
                ObjectIdentifier::from_der(der)
                    .map_err(|_| TokenError::UnknownCurve(hex::encode(der)))?;
                Ok(der.clone())
            }
        }
    }
}
