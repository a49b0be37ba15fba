//! Export of token keys as JSON Web Keys.
//!
//! Binary fields are base64url encoded without padding. Public keys carry a `use`
//! ("sig" when they verify, "enc" when they encrypt), private keys a `key_ops` list
//! ("sign" or "decrypt"), and secret keys a `key_ops` list of every usage they allow among
//! verify, sign, encrypt and decrypt, in that order.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use pkcs11_sys::{CKA_MODULUS, CKA_PRIVATE_EXPONENT, CKA_PUBLIC_EXPONENT, CKA_VALUE};
use serde::Serialize;
use tracing::debug;
use zeroize::{Zeroize, Zeroizing};

use crate::{
    TResult, TokenError,
    curve::NamedCurve,
    key::{AesKey, EcKey, Key, KeyClass, KeyFamily, KeyUsage, RsaKey},
};

/// DER tag of an OCTET STRING, also the SEC 1 tag of an uncompressed point.
const OCTET_STRING_TAG: u8 = 0x04;
const UNCOMPRESSED_POINT_TAG: u8 = 0x04;
/// Longest long form length accepted for an EC point
const MAX_LENGTH_BYTES: usize = 6;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Jwk {
    pub kty: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub d: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub p: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub q: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dq: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qi: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub k: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
    #[serde(rename = "use", skip_serializing_if = "Option::is_none")]
    pub use_: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_ops: Option<Vec<String>>,
}

impl Drop for Jwk {
    fn drop(&mut self) {
        for secret in [
            &mut self.d,
            &mut self.p,
            &mut self.q,
            &mut self.dp,
            &mut self.dq,
            &mut self.qi,
            &mut self.k,
        ]
        .into_iter()
        .flatten()
        {
            secret.zeroize();
        }
    }
}

impl Jwk {
    fn new(kty: &str) -> Self {
        let mut jwk = Self::default();
        kty.clone_into(&mut jwk.kty);
        jwk
    }

    pub fn to_json(&self) -> TResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

fn b64(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// The `use` of a public key.
fn public_use(usage: KeyUsage) -> TResult<String> {
    if usage.contains(KeyUsage::VERIFY) {
        Ok("sig".to_owned())
    } else if usage.contains(KeyUsage::ENCRYPT) {
        Ok("enc".to_owned())
    } else {
        Err(TokenError::NoAllowedUsage)
    }
}

/// The `key_ops` of a private key.
fn private_key_ops(usage: KeyUsage) -> TResult<Vec<String>> {
    if usage.contains(KeyUsage::SIGN) {
        Ok(vec!["sign".to_owned()])
    } else if usage.contains(KeyUsage::DECRYPT) {
        Ok(vec!["decrypt".to_owned()])
    } else {
        Err(TokenError::NoAllowedUsage)
    }
}

/// The `key_ops` of a secret key.
fn secret_key_ops(usage: KeyUsage) -> Vec<String> {
    [
        (KeyUsage::VERIFY, "verify"),
        (KeyUsage::SIGN, "sign"),
        (KeyUsage::ENCRYPT, "encrypt"),
        (KeyUsage::DECRYPT, "decrypt"),
    ]
    .into_iter()
    .filter(|(flag, _)| usage.contains(*flag))
    .map(|(_, op)| op.to_owned())
    .collect()
}

/// Coordinates of an uncompressed EC point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EcPoint {
    pub x: Vec<u8>,
    pub y: Vec<u8>,
}

/// Decode the `CKA_EC_POINT` value of a key on a curve with `byte_size` bytes coordinates.
///
/// The value is an OCTET STRING wrapping the uncompressed point `04 || X || Y`. The length
/// of the OCTET STRING must be exactly `2 * byte_size + 1`.
pub fn decode_ec_point(encoded: &[u8], byte_size: usize) -> TResult<EcPoint> {
    let (&tag, rest) = encoded
        .split_first()
        .ok_or_else(|| TokenError::InvalidPointSize("empty EC point".to_owned()))?;
    if tag != OCTET_STRING_TAG {
        return Err(TokenError::InvalidPointTag(tag));
    }
    let (&first, mut rest) = rest
        .split_first()
        .ok_or_else(|| TokenError::InvalidPointSize("missing EC point length".to_owned()))?;
    let length = if first & 0x80 == 0 {
        usize::from(first)
    } else {
        let length_bytes = usize::from(first & 0x7f);
        if length_bytes > MAX_LENGTH_BYTES {
            return Err(TokenError::PointTooLarge(length_bytes));
        }
        if length_bytes == 0 {
            return Err(TokenError::InvalidPointSize(
                "indefinite EC point length".to_owned(),
            ));
        }
        let (bytes, tail) = rest.split_at_checked(length_bytes).ok_or_else(|| {
            TokenError::InvalidPointSize("truncated EC point length".to_owned())
        })?;
        rest = tail;
        bytes
            .iter()
            .fold(0_usize, |length, byte| (length << 8) | usize::from(*byte))
    };
    let expected = 2 * byte_size + 1;
    if length != expected {
        return Err(TokenError::InvalidPointSize(format!(
            "EC point of {length} bytes, expected {expected}"
        )));
    }
    if rest.len() != length {
        return Err(TokenError::InvalidPointSize(format!(
            "EC point declares {length} bytes, carries {}",
            rest.len()
        )));
    }
    let coordinates = match rest.split_first() {
        Some((&UNCOMPRESSED_POINT_TAG, coordinates)) => coordinates,
        _ => rest,
    };
    if coordinates.len() != 2 * byte_size {
        return Err(TokenError::InvalidPointSize(format!(
            "{} coordinate bytes, expected {}",
            coordinates.len(),
            2 * byte_size
        )));
    }
    let (x, y) = coordinates.split_at(byte_size);
    Ok(EcPoint {
        x: x.to_vec(),
        y: y.to_vec(),
    })
}

/// Export `key` as a JWK, with `usage` as the usages to declare.
pub fn export_key(key: &Key<'_>, usage: KeyUsage) -> TResult<Jwk> {
    let jwk = match key.family()? {
        KeyFamily::Rsa(rsa) => export_rsa(&rsa, usage)?,
        KeyFamily::Aes(aes) => export_aes(&aes, usage)?,
        KeyFamily::Ecdsa(ec) => export_ec(&ec, usage)?,
    };
    debug!("exported key {} as a {} JWK", key.handle(), jwk.kty);
    Ok(jwk)
}

impl Key<'_> {
    /// Export the key as a JWK declaring the usages set on the key.
    pub fn export_jwk(&self) -> TResult<Jwk> {
        export_key(self, self.usage()?)
    }
}

fn export_rsa(key: &RsaKey<'_>, usage: KeyUsage) -> TResult<Jwk> {
    let mut jwk = Jwk::new("RSA");
    jwk.n = Some(b64(&key.require(CKA_MODULUS, "modulus")?));
    jwk.e = Some(b64(&key.require(CKA_PUBLIC_EXPONENT, "public exponent")?));
    match key.key_class() {
        KeyClass::Public => jwk.use_ = Some(public_use(usage)?),
        KeyClass::Private => {
            jwk.key_ops = Some(private_key_ops(usage)?);
            let d = Zeroizing::new(key.require(CKA_PRIVATE_EXPONENT, "private exponent")?);
            jwk.d = Some(b64(&d));
            if let Some(crt) = key.crt_parameters()? {
                let [p, q, dp, dq, qi] = crt.map(Zeroizing::new);
                jwk.p = Some(b64(&p));
                jwk.q = Some(b64(&q));
                jwk.dp = Some(b64(&dp));
                jwk.dq = Some(b64(&dq));
                jwk.qi = Some(b64(&qi));
            }
        }
        KeyClass::Secret => {
            return Err(TokenError::UnsupportedKeyType(
                "an RSA key cannot be a secret key".to_owned(),
            ));
        }
    }
    Ok(jwk)
}

fn export_aes(key: &AesKey<'_>, usage: KeyUsage) -> TResult<Jwk> {
    let mut jwk = Jwk::new("oct");
    let value = Zeroizing::new(key.require(CKA_VALUE, "value")?);
    jwk.k = Some(b64(&value));
    jwk.key_ops = Some(secret_key_ops(usage));
    Ok(jwk)
}

fn export_ec(key: &EcKey<'_>, usage: KeyUsage) -> TResult<Jwk> {
    let curve: NamedCurve = key.curve()?;
    let crv = curve
        .jwk_name()
        .ok_or_else(|| TokenError::UnknownCurve(curve.to_string()))?;
    let mut jwk = Jwk::new("EC");
    jwk.crv = Some(crv.to_owned());
    match key.key_class() {
        KeyClass::Public => {
            jwk.use_ = Some(public_use(usage)?);
            let encoded = key
                .ec_point()?
                .ok_or_else(|| TokenError::InvalidPointSize("missing EC point".to_owned()))?;
            let point = decode_ec_point(&encoded, curve.byte_size())?;
            jwk.x = Some(b64(&point.x));
            jwk.y = Some(b64(&point.y));
        }
        KeyClass::Private => {
            jwk.key_ops = Some(private_key_ops(usage)?);
            let d = Zeroizing::new(key.require(CKA_VALUE, "private value")?);
            jwk.d = Some(b64(&d));
        }
        KeyClass::Secret => {
            return Err(TokenError::UnsupportedKeyType(
                "an EC key cannot be a secret key".to_owned(),
            ));
        }
    }
    Ok(jwk)
}
