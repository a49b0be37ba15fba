//! Mechanisms and their parameter blocks.
//!
//! A parameter block is serialized with the native C layout of the matching `CK_*_PARAMS`
//! structure. `CK_ULONG` and pointers share their width everywhere but on Windows, where
//! cryptoki structures are packed, so fields are always laid out back to back.
//! Pointer fields reference buffers owned by the parameters: a serialized block is only valid
//! while the [`MechanismParams`] it came from is alive and unchanged.

use pkcs11_sys::{
    CK_EC_KDF_TYPE, CK_MECHANISM_TYPE, CK_RSA_PKCS_MGF_TYPE, CKD_NULL, CKG_MGF1_SHA1,
    CKG_MGF1_SHA224, CKG_MGF1_SHA256, CKG_MGF1_SHA384, CKG_MGF1_SHA512, CKM_AES_CBC,
    CKM_AES_CBC_ENCRYPT_DATA, CKM_AES_CBC_PAD, CKM_AES_GCM, CKM_ECDH1_DERIVE, CKM_RSA_PKCS_OAEP,
    CKM_SHA_1, CKM_SHA224, CKM_SHA256, CKM_SHA384, CKM_SHA512, CKZ_DATA_SPECIFIED,
};

use crate::{
    TResult, TokenError,
    registry::{self, ULONG_WIDTH},
};

pub const AES_CBC_IV_LENGTH: usize = 16;
const AES_GCM_MAX_IV_LENGTH: usize = 256;
const AES_GCM_MAX_TAG_BITS: u64 = 128;

/// Writes the fields of a cryptoki parameter structure.
#[derive(Default)]
struct ParamBlock(Vec<u8>);

impl ParamBlock {
    fn ulong(mut self, value: u64) -> TResult<Self> {
        let bytes = value.to_le_bytes();
        let (low, high) = bytes.split_at(ULONG_WIDTH);
        if high.iter().any(|b| *b != 0) {
            return Err(TokenError::InvalidParameterSize(format!(
                "{value} does not fit in {ULONG_WIDTH} bytes"
            )));
        }
        self.0.extend_from_slice(low);
        Ok(self)
    }

    fn len_of(self, data: &[u8]) -> TResult<Self> {
        self.ulong(u64::try_from(data.len())?)
    }

    fn pointer(mut self, data: &[u8]) -> Self {
        let address = if data.is_empty() {
            0
        } else {
            data.as_ptr().expose_provenance()
        };
        self.0.extend_from_slice(&address.to_ne_bytes());
        self
    }

    fn bytes(mut self, data: &[u8]) -> Self {
        self.0.extend_from_slice(data);
        self
    }

    fn finish(self) -> Vec<u8> {
        self.0
    }
}

/// IV for the AES-CBC family, optionally with the data of `CKM_AES_CBC_ENCRYPT_DATA`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AesCbcParams {
    iv: [u8; AES_CBC_IV_LENGTH],
    data: Option<Vec<u8>>,
}

impl AesCbcParams {
    pub fn new(iv: &[u8]) -> TResult<Self> {
        let iv: [u8; AES_CBC_IV_LENGTH] = iv.try_into().map_err(|_| {
            TokenError::InvalidParameterSize(format!(
                "AES CBC IV must be {AES_CBC_IV_LENGTH} bytes long, got {}",
                iv.len()
            ))
        })?;
        Ok(Self { iv, data: None })
    }

    #[must_use]
    pub fn with_data(mut self, data: Vec<u8>) -> Self {
        self.data = Some(data);
        self
    }

    #[must_use]
    pub const fn iv(&self) -> &[u8; AES_CBC_IV_LENGTH] {
        &self.iv
    }

    #[must_use]
    pub fn data(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }

    fn serialize(&self) -> TResult<Vec<u8>> {
        let block = ParamBlock::default().bytes(&self.iv);
        Ok(match &self.data {
            // CK_AES_CBC_ENCRYPT_DATA_PARAMS
            Some(data) => block.pointer(data).len_of(data)?.finish(),
            None => block.finish(),
        })
    }
}

/// `CK_GCM_PARAMS`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AesGcmParams {
    iv: Vec<u8>,
    aad: Vec<u8>,
    tag_bits: u64,
}

impl AesGcmParams {
    pub fn new(iv: &[u8], aad: &[u8], tag_bits: u64) -> TResult<Self> {
        if iv.is_empty() || iv.len() > AES_GCM_MAX_IV_LENGTH {
            return Err(TokenError::InvalidParameterSize(format!(
                "AES GCM IV must be 1 to {AES_GCM_MAX_IV_LENGTH} bytes long, got {}",
                iv.len()
            )));
        }
        if tag_bits > AES_GCM_MAX_TAG_BITS || tag_bits % 8 != 0 {
            return Err(TokenError::InvalidParameterSize(format!(
                "AES GCM tag length must be a multiple of 8 up to {AES_GCM_MAX_TAG_BITS} bits, \
                 got {tag_bits}"
            )));
        }
        Ok(Self {
            iv: iv.to_vec(),
            aad: aad.to_vec(),
            tag_bits,
        })
    }

    #[must_use]
    pub fn iv(&self) -> &[u8] {
        &self.iv
    }

    #[must_use]
    pub fn aad(&self) -> &[u8] {
        &self.aad
    }

    #[must_use]
    pub const fn tag_bits(&self) -> u64 {
        self.tag_bits
    }

    fn serialize(&self) -> TResult<Vec<u8>> {
        let iv_bits = u64::try_from(self.iv.len())? * 8;
        Ok(ParamBlock::default()
            .pointer(&self.iv)
            .len_of(&self.iv)?
            .ulong(iv_bits)?
            .pointer(&self.aad)
            .len_of(&self.aad)?
            .ulong(self.tag_bits)?
            .finish())
    }
}

/// `CK_RSA_PKCS_OAEP_PARAMS`, the label is always data specified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RsaOaepParams {
    hash: CK_MECHANISM_TYPE,
    mgf: CK_RSA_PKCS_MGF_TYPE,
    source_data: Option<Vec<u8>>,
}

impl Default for RsaOaepParams {
    fn default() -> Self {
        Self {
            hash: CKM_SHA_1,
            mgf: CKG_MGF1_SHA1,
            source_data: None,
        }
    }
}

impl RsaOaepParams {
    #[must_use]
    pub const fn new(hash: CK_MECHANISM_TYPE, mgf: CK_RSA_PKCS_MGF_TYPE) -> Self {
        Self {
            hash,
            mgf,
            source_data: None,
        }
    }

    /// OAEP with the same digest for the hash and the mask generation.
    pub fn with_digest(hash: CK_MECHANISM_TYPE) -> TResult<Self> {
        let mgf = match hash {
            CKM_SHA_1 => CKG_MGF1_SHA1,
            CKM_SHA224 => CKG_MGF1_SHA224,
            CKM_SHA256 => CKG_MGF1_SHA256,
            CKM_SHA384 => CKG_MGF1_SHA384,
            CKM_SHA512 => CKG_MGF1_SHA512,
            other => {
                return Err(TokenError::UnknownMechanism(format!(
                    "no MGF1 function for digest {}",
                    registry::mechanism_name(other).unwrap_or("unknown")
                )));
            }
        };
        Ok(Self::new(hash, mgf))
    }

    #[must_use]
    pub fn with_source_data(mut self, label: Vec<u8>) -> Self {
        self.source_data = Some(label);
        self
    }

    #[must_use]
    pub const fn hash(&self) -> CK_MECHANISM_TYPE {
        self.hash
    }

    #[must_use]
    pub const fn mgf(&self) -> CK_RSA_PKCS_MGF_TYPE {
        self.mgf
    }

    #[must_use]
    pub fn source_data(&self) -> Option<&[u8]> {
        self.source_data.as_deref()
    }

    fn serialize(&self) -> TResult<Vec<u8>> {
        let label = self.source_data.as_deref().unwrap_or_default();
        Ok(ParamBlock::default()
            .ulong(u64::from(self.hash))?
            .ulong(u64::from(self.mgf))?
            .ulong(u64::from(CKZ_DATA_SPECIFIED))?
            .pointer(label)
            .len_of(label)?
            .finish())
    }
}

/// `CK_ECDH1_DERIVE_PARAMS`
///
/// `public_data` is the peer public point exactly as the token stores it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EcdhParams {
    kdf: CK_EC_KDF_TYPE,
    shared_data: Option<Vec<u8>>,
    public_data: Vec<u8>,
}

impl EcdhParams {
    #[must_use]
    pub const fn new(public_data: Vec<u8>) -> Self {
        Self {
            kdf: CKD_NULL,
            shared_data: None,
            public_data,
        }
    }

    #[must_use]
    pub const fn with_kdf(mut self, kdf: CK_EC_KDF_TYPE) -> Self {
        self.kdf = kdf;
        self
    }

    #[must_use]
    pub fn with_shared_data(mut self, shared_data: Vec<u8>) -> Self {
        self.shared_data = Some(shared_data);
        self
    }

    #[must_use]
    pub const fn kdf(&self) -> CK_EC_KDF_TYPE {
        self.kdf
    }

    #[must_use]
    pub fn shared_data(&self) -> Option<&[u8]> {
        self.shared_data.as_deref()
    }

    #[must_use]
    pub fn public_data(&self) -> &[u8] {
        &self.public_data
    }

    fn serialize(&self) -> TResult<Vec<u8>> {
        let shared = self.shared_data.as_deref().unwrap_or_default();
        Ok(ParamBlock::default()
            .ulong(u64::from(self.kdf))?
            .len_of(shared)?
            .pointer(shared)
            .len_of(&self.public_data)?
            .pointer(&self.public_data)
            .finish())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MechanismParams {
    #[default]
    None,
    AesCbc(AesCbcParams),
    AesGcm(AesGcmParams),
    RsaOaep(RsaOaepParams),
    Ecdh(EcdhParams),
}

impl MechanismParams {
    /// The parameter block handed to the token; empty when the mechanism takes none.
    pub fn serialize(&self) -> TResult<Vec<u8>> {
        match self {
            Self::None => Ok(Vec::new()),
            Self::AesCbc(params) => params.serialize(),
            Self::AesGcm(params) => params.serialize(),
            Self::RsaOaep(params) => params.serialize(),
            Self::Ecdh(params) => params.serialize(),
        }
    }

    /// Length of the IV this parameter set requires, for block cipher modes.
    #[must_use]
    pub const fn expected_iv_len(&self) -> Option<usize> {
        match self {
            Self::AesCbc(_) => Some(AES_CBC_IV_LENGTH),
            _ => None,
        }
    }
}

/// A mechanism type together with its parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mechanism {
    mechanism_type: CK_MECHANISM_TYPE,
    params: MechanismParams,
}

impl Mechanism {
    #[must_use]
    pub const fn new(mechanism_type: CK_MECHANISM_TYPE) -> Self {
        Self {
            mechanism_type,
            params: MechanismParams::None,
        }
    }

    #[must_use]
    pub const fn with_params(mechanism_type: CK_MECHANISM_TYPE, params: MechanismParams) -> Self {
        Self {
            mechanism_type,
            params,
        }
    }

    /// A parameterless mechanism from its name, e.g. `SHA256` or `sha1_rsa_pkcs`.
    pub fn from_name(name: &str) -> TResult<Self> {
        registry::mechanism_by_name(name).map(Self::new)
    }

    pub fn aes_cbc(iv: &[u8]) -> TResult<Self> {
        Ok(Self::with_params(
            CKM_AES_CBC,
            MechanismParams::AesCbc(AesCbcParams::new(iv)?),
        ))
    }

    pub fn aes_cbc_pad(iv: &[u8]) -> TResult<Self> {
        Ok(Self::with_params(
            CKM_AES_CBC_PAD,
            MechanismParams::AesCbc(AesCbcParams::new(iv)?),
        ))
    }

    /// Derive a secret key by encrypting `data` with AES-CBC.
    pub fn aes_cbc_encrypt_data(iv: &[u8], data: Vec<u8>) -> TResult<Self> {
        Ok(Self::with_params(
            CKM_AES_CBC_ENCRYPT_DATA,
            MechanismParams::AesCbc(AesCbcParams::new(iv)?.with_data(data)),
        ))
    }

    pub fn aes_gcm(iv: &[u8], aad: &[u8], tag_bits: u64) -> TResult<Self> {
        Ok(Self::with_params(
            CKM_AES_GCM,
            MechanismParams::AesGcm(AesGcmParams::new(iv, aad, tag_bits)?),
        ))
    }

    #[must_use]
    pub const fn rsa_oaep(params: RsaOaepParams) -> Self {
        Self::with_params(CKM_RSA_PKCS_OAEP, MechanismParams::RsaOaep(params))
    }

    #[must_use]
    pub const fn ecdh1_derive(params: EcdhParams) -> Self {
        Self::with_params(CKM_ECDH1_DERIVE, MechanismParams::Ecdh(params))
    }

    #[must_use]
    pub const fn mechanism_type(&self) -> CK_MECHANISM_TYPE {
        self.mechanism_type
    }

    #[must_use]
    pub const fn params(&self) -> &MechanismParams {
        &self.params
    }

    #[must_use]
    pub fn name(&self) -> String {
        registry::mechanism_name(self.mechanism_type)
            .map_or_else(|| format!("0x{:x}", self.mechanism_type), ToOwned::to_owned)
    }
}

#[cfg(test)]
mod tests {
    use pkcs11_sys::{
        CKD_SHA1_KDF, CKG_MGF1_SHA256, CKM_AES_CBC, CKM_SHA_1, CKM_SHA256, CKM_SHA256_RSA_PKCS,
        CKZ_DATA_SPECIFIED,
    };

    use super::{
        AES_CBC_IV_LENGTH, AesCbcParams, EcdhParams, Mechanism, MechanismParams, RsaOaepParams,
    };
    use crate::{TResult, TokenError, registry::ULONG_WIDTH};

    const PTR: usize = size_of::<usize>();

    fn word(block: &[u8], offset: usize) -> u64 {
        let mut bytes = [0_u8; 8];
        bytes[..ULONG_WIDTH].copy_from_slice(&block[offset..offset + ULONG_WIDTH]);
        u64::from_le_bytes(bytes)
    }

    fn address(block: &[u8], offset: usize) -> usize {
        let mut bytes = [0_u8; PTR];
        bytes.copy_from_slice(&block[offset..offset + PTR]);
        usize::from_ne_bytes(bytes)
    }

    #[test]
    fn test_cbc_iv_must_be_16_bytes() -> TResult<()> {
        for len in [0, 8, 15, 17, 32] {
            assert!(matches!(
                Mechanism::aes_cbc(&vec![0; len]),
                Err(TokenError::InvalidParameterSize(_))
            ));
        }
        let iv: Vec<u8> = (0..16).collect();
        let mechanism = Mechanism::aes_cbc(&iv)?;
        assert_eq!(mechanism.mechanism_type(), CKM_AES_CBC);
        assert_eq!(mechanism.params().serialize()?, iv);
        assert_eq!(
            mechanism.params().expected_iv_len(),
            Some(AES_CBC_IV_LENGTH)
        );
        Ok(())
    }

    #[test]
    fn test_cbc_encrypt_data_layout() -> TResult<()> {
        let params =
            MechanismParams::AesCbc(AesCbcParams::new(&[7; 16])?.with_data(vec![1, 2, 3]));
        let block = params.serialize()?;
        let MechanismParams::AesCbc(cbc) = &params else {
            panic!("expected CBC parameters");
        };
        assert_eq!(block.len(), 16 + PTR + ULONG_WIDTH);
        assert_eq!(&block[..16], &[7; 16]);
        assert_eq!(
            address(&block, 16),
            cbc.data().unwrap().as_ptr().expose_provenance()
        );
        assert_eq!(word(&block, 16 + PTR), 3);
        Ok(())
    }

    #[test]
    fn test_oaep_layout() -> TResult<()> {
        let params = MechanismParams::RsaOaep(RsaOaepParams::default());
        let block = params.serialize()?;
        assert_eq!(block.len(), 4 * ULONG_WIDTH + PTR);
        assert_eq!(word(&block, 0), u64::from(CKM_SHA_1));
        assert_eq!(word(&block, 2 * ULONG_WIDTH), u64::from(CKZ_DATA_SPECIFIED));
        assert_eq!(address(&block, 3 * ULONG_WIDTH), 0);
        assert_eq!(word(&block, 3 * ULONG_WIDTH + PTR), 0);

        let sha256 = RsaOaepParams::with_digest(CKM_SHA256)?.with_source_data(b"label".to_vec());
        assert_eq!(sha256.mgf(), CKG_MGF1_SHA256);
        let block = MechanismParams::RsaOaep(sha256).serialize()?;
        assert_eq!(word(&block, 3 * ULONG_WIDTH + PTR), 5);
        assert!(RsaOaepParams::with_digest(CKM_SHA256_RSA_PKCS).is_err());
        Ok(())
    }

    #[test]
    fn test_gcm_layout_and_bounds() -> TResult<()> {
        let mechanism = Mechanism::aes_gcm(&[0; 12], b"aad", 128)?;
        let block = mechanism.params().serialize()?;
        assert_eq!(block.len(), 4 * ULONG_WIDTH + 2 * PTR);
        assert_eq!(word(&block, PTR), 12);
        assert_eq!(word(&block, PTR + ULONG_WIDTH), 96);
        assert_eq!(word(&block, 2 * PTR + 2 * ULONG_WIDTH), 3);
        assert_eq!(word(&block, 2 * PTR + 3 * ULONG_WIDTH), 128);
        assert!(Mechanism::aes_gcm(&[], b"", 128).is_err());
        assert!(Mechanism::aes_gcm(&[0; 12], b"", 129).is_err());
        assert!(Mechanism::aes_gcm(&[0; 12], b"", 136).is_err());
        Ok(())
    }

    #[test]
    fn test_ecdh_layout_keeps_the_point_verbatim() -> TResult<()> {
        let point = vec![0x04, 0x41, 0x04, 1, 2, 3];
        let params = EcdhParams::new(point.clone()).with_kdf(CKD_SHA1_KDF);
        let mechanism = Mechanism::ecdh1_derive(params);
        let MechanismParams::Ecdh(params) = mechanism.params() else {
            panic!("expected ECDH parameters");
        };
        assert_eq!(params.public_data(), point.as_slice());
        let block = mechanism.params().serialize()?;
        assert_eq!(block.len(), 3 * ULONG_WIDTH + 2 * PTR);
        assert_eq!(word(&block, 0), u64::from(CKD_SHA1_KDF));
        assert_eq!(word(&block, ULONG_WIDTH), 0);
        assert_eq!(address(&block, 2 * ULONG_WIDTH), 0);
        assert_eq!(word(&block, 2 * ULONG_WIDTH + PTR), 6);
        assert_eq!(
            address(&block, 3 * ULONG_WIDTH + PTR),
            params.public_data().as_ptr().expose_provenance()
        );
        Ok(())
    }

    #[test]
    fn test_named_mechanisms() -> TResult<()> {
        let mechanism = Mechanism::from_name("sha256")?;
        assert_eq!(mechanism.mechanism_type(), CKM_SHA256);
        assert_eq!(mechanism.params(), &MechanismParams::None);
        assert!(mechanism.params().serialize()?.is_empty());
        assert_eq!(mechanism.name(), "SHA256");
        Ok(())
    }
}
