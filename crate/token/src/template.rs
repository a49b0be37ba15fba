//! Conversion between typed attribute values and the binary attribute lists sent to the token.

use std::fmt;

use chrono::NaiveDate;
use pkcs11_sys::CK_ATTRIBUTE_TYPE;
use tracing::trace;

use crate::{
    TResult, TokenError,
    registry::{self, AttributeSpec, DATE_WIDTH, ULONG_WIDTH, ValueType},
};

const DATE_FORMAT: &str = "%Y%m%d";

/// A typed attribute value, before encoding or after decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeValue {
    Number(u64),
    Bool(bool),
    Text(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
}

impl AttributeValue {
    const fn kind(&self) -> &'static str {
        match self {
            Self::Number(_) => "number",
            Self::Bool(_) => "boolean",
            Self::Text(_) => "text",
            Self::Bytes(_) => "bytes",
            Self::Date(_) => "date",
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Text(s) => write!(f, "{s}"),
            Self::Bytes(b) => write!(f, "{}", hex::encode(b)),
            Self::Date(d) => write!(f, "{d}"),
        }
    }
}

impl From<u64> for AttributeValue {
    fn from(n: u64) -> Self {
        Self::Number(n)
    }
}

impl From<u32> for AttributeValue {
    fn from(n: u32) -> Self {
        Self::Number(u64::from(n))
    }
}

impl From<bool> for AttributeValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_owned())
    }
}

impl From<String> for AttributeValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<Vec<u8>> for AttributeValue {
    fn from(b: Vec<u8>) -> Self {
        Self::Bytes(b)
    }
}

impl From<&[u8]> for AttributeValue {
    fn from(b: &[u8]) -> Self {
        Self::Bytes(b.to_vec())
    }
}

impl From<NaiveDate> for AttributeValue {
    fn from(d: NaiveDate) -> Self {
        Self::Date(d)
    }
}

/// An insertion ordered mapping from attribute names to values.
///
/// Setting a name twice keeps the position of the first insertion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeMap(Vec<(String, AttributeValue)>);

impl AttributeMap {
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    #[must_use]
    pub fn with(mut self, name: &str, value: impl Into<AttributeValue>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: &str, value: impl Into<AttributeValue>) {
        let value = value.into();
        if let Some(entry) = self.0.iter_mut().find(|(known, _)| known == name) {
            entry.1 = value;
        } else {
            self.0.push((name.to_owned(), value));
        }
    }

    /// Append every entry of `other`, overriding existing names.
    pub fn extend(&mut self, other: Self) {
        for (name, value) in other.0 {
            self.set(&name, value);
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&AttributeValue> {
        self.0
            .iter()
            .find(|(known, _)| known == name)
            .map(|(_, value)| value)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttributeValue)> {
        self.0.iter().map(|(name, value)| (name.as_str(), value))
    }
}

impl<S: Into<String>, V: Into<AttributeValue>> FromIterator<(S, V)> for AttributeMap {
    fn from_iter<T: IntoIterator<Item = (S, V)>>(iter: T) -> Self {
        let mut map = Self::new();
        for (name, value) in iter {
            let name: String = name.into();
            map.set(&name, value);
        }
        map
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateEntry {
    pub code: CK_ATTRIBUTE_TYPE,
    pub value: Vec<u8>,
}

/// An ordered, non empty list of encoded attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template(Vec<TemplateEntry>);

impl Template {
    /// Encode an attribute mapping, in insertion order.
    pub fn encode(values: &AttributeMap) -> TResult<Self> {
        if values.is_empty() {
            return Err(TokenError::EmptyTemplate);
        }
        let entries = values
            .iter()
            .map(|(name, value)| {
                let spec = registry::lookup(name)?;
                Ok(TemplateEntry {
                    code: spec.code,
                    value: encode_value(spec, value)?,
                })
            })
            .collect::<TResult<Vec<_>>>()?;
        trace!("Encoded a template of {} attributes", entries.len());
        Ok(Self(entries))
    }

    /// Build a template from entries already encoded, typically received from a token.
    pub fn from_entries(entries: Vec<TemplateEntry>) -> TResult<Self> {
        if entries.is_empty() {
            return Err(TokenError::EmptyTemplate);
        }
        if let Some(unknown) = entries
            .iter()
            .find(|entry| registry::lookup_code(entry.code).is_none())
        {
            return Err(TokenError::UnknownAttribute(format!("0x{:x}", unknown.code)));
        }
        Ok(Self(entries))
    }

    #[must_use]
    pub fn bytes_for(&self, code: CK_ATTRIBUTE_TYPE) -> Option<&[u8]> {
        self.0
            .iter()
            .find(|entry| entry.code == code)
            .map(|entry| entry.value.as_slice())
    }

    /// Decode the value stored for `code`, if present.
    pub fn value_for(&self, code: CK_ATTRIBUTE_TYPE) -> TResult<Option<AttributeValue>> {
        self.bytes_for(code).map(|raw| decode(code, raw)).transpose()
    }

    #[must_use]
    pub fn entries(&self) -> &[TemplateEntry] {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn type_mismatch(spec: &AttributeSpec) -> TokenError {
    TokenError::TypeMismatch {
        attribute: spec.name.to_owned(),
        expected: spec.value_type,
    }
}

/// Encode a single value according to its `AttributeSpec`.
pub fn encode_value(spec: &AttributeSpec, value: &AttributeValue) -> TResult<Vec<u8>> {
    let encoded = match (spec.value_type, value) {
        (ValueType::UnsignedInt, AttributeValue::Number(n)) => {
            let bytes = n.to_le_bytes();
            let (low, high) = bytes.split_at(ULONG_WIDTH);
            if high.iter().any(|b| *b != 0) {
                return Err(type_mismatch(spec));
            }
            low.to_vec()
        }
        (ValueType::Boolean, AttributeValue::Bool(b)) => vec![u8::from(*b)],
        (ValueType::Boolean, AttributeValue::Number(n)) => vec![u8::from(*n != 0)],
        (ValueType::Utf8Text, AttributeValue::Text(s)) => s.as_bytes().to_vec(),
        (ValueType::ByteArray, AttributeValue::Bytes(b)) => b.clone(),
        (ValueType::Date, _) => {
            return Err(TokenError::UnsupportedType {
                attribute: spec.name.to_owned(),
                value_type: ValueType::Date,
            });
        }
        (_, other) => {
            trace!("Cannot encode a {} as {}", other.kind(), spec.value_type);
            return Err(type_mismatch(spec));
        }
    };
    Ok(encoded)
}

/// Decode raw bytes returned by the token for the attribute `code`.
pub fn decode(code: CK_ATTRIBUTE_TYPE, raw: &[u8]) -> TResult<AttributeValue> {
    let spec = registry::lookup_code(code)
        .ok_or_else(|| TokenError::UnknownAttribute(format!("0x{code:x}")))?;
    let value = match spec.value_type {
        ValueType::UnsignedInt => {
            if raw.len() != ULONG_WIDTH {
                return Err(TokenError::Conversion(format!(
                    "{}: expected {ULONG_WIDTH} bytes, got {}",
                    spec.name,
                    raw.len()
                )));
            }
            let mut bytes = [0_u8; 8];
            bytes
                .get_mut(..ULONG_WIDTH)
                .ok_or_else(|| TokenError::Conversion("unsigned integer width".to_owned()))?
                .copy_from_slice(raw);
            AttributeValue::Number(u64::from_le_bytes(bytes))
        }
        ValueType::Boolean => match raw {
            [b] => AttributeValue::Bool(*b != 0),
            _ => {
                return Err(TokenError::Conversion(format!(
                    "{}: expected a single byte boolean, got {} bytes",
                    spec.name,
                    raw.len()
                )));
            }
        },
        ValueType::Utf8Text => AttributeValue::Text(String::from_utf8(raw.to_vec())?),
        ValueType::ByteArray => AttributeValue::Bytes(raw.to_vec()),
        ValueType::Date => {
            if raw.len() != DATE_WIDTH {
                return Err(TokenError::Conversion(format!(
                    "{}: expected {DATE_WIDTH} date bytes, got {}",
                    spec.name,
                    raw.len()
                )));
            }
            let text = std::str::from_utf8(raw)?;
            let date = NaiveDate::parse_from_str(text, DATE_FORMAT)
                .map_err(|e| TokenError::Conversion(format!("{}: {e}", spec.name)))?;
            AttributeValue::Date(date)
        }
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use pkcs11_sys::{
        CKA_CLASS, CKA_ID, CKA_KEY_TYPE, CKA_LABEL, CKA_START_DATE, CKA_TOKEN, CKA_VALUE,
        CKA_VALUE_LEN, CKK_AES, CKO_SECRET_KEY,
    };

    use super::{AttributeMap, AttributeValue, Template, TemplateEntry, decode};
    use crate::{TResult, TokenError, registry::ULONG_WIDTH};

    fn round_trip(name: &str, value: AttributeValue) -> TResult<AttributeValue> {
        let code = crate::registry::lookup(name)?.code;
        let template = Template::encode(&AttributeMap::new().with(name, value))?;
        let raw = template
            .bytes_for(code)
            .ok_or_else(|| crate::token_error!("missing {name}"))?;
        decode(code, raw)
    }

    #[test]
    fn test_round_trip_all_value_types() -> TResult<()> {
        let max = if ULONG_WIDTH == 8 {
            u64::MAX
        } else {
            u64::from(u32::MAX)
        };
        let samples = [
            ("valueLen", AttributeValue::Number(0)),
            ("valueLen", AttributeValue::Number(max)),
            ("token", AttributeValue::Bool(true)),
            ("token", AttributeValue::Bool(false)),
            ("label", AttributeValue::Text(String::new())),
            ("label", AttributeValue::Text("clé de test ✓ 鍵".to_owned())),
            ("id", AttributeValue::Bytes(vec![])),
            ("id", AttributeValue::Bytes(vec![0x2a])),
            ("value", AttributeValue::Bytes((0..=255).cycle().take(4096).collect())),
        ];
        for (name, value) in samples {
            assert_eq!(round_trip(name, value.clone())?, value, "{name}");
        }
        Ok(())
    }

    #[test]
    fn test_encoding_layout() -> TResult<()> {
        let template = Template::encode(
            &AttributeMap::new()
                .with("class", u64::from(CKO_SECRET_KEY))
                .with("token", true)
                .with("label", "my key")
                .with("keyType", u64::from(CKK_AES))
                .with("valueLen", 32_u64),
        )?;
        let codes: Vec<_> = template.entries().iter().map(|e| e.code).collect();
        assert_eq!(
            codes,
            vec![CKA_CLASS, CKA_TOKEN, CKA_LABEL, CKA_KEY_TYPE, CKA_VALUE_LEN]
        );
        let value_len = template.bytes_for(CKA_VALUE_LEN).unwrap();
        assert_eq!(value_len.len(), ULONG_WIDTH);
        assert_eq!(value_len[0], 32);
        assert!(value_len[1..].iter().all(|b| *b == 0));
        assert_eq!(template.bytes_for(CKA_TOKEN), Some(&[1_u8][..]));
        assert_eq!(template.bytes_for(CKA_LABEL), Some(&b"my key"[..]));
        assert_eq!(template.bytes_for(CKA_ID), None);
        assert_eq!(
            template.value_for(CKA_LABEL)?,
            Some(AttributeValue::Text("my key".to_owned()))
        );
        Ok(())
    }

    #[test]
    fn test_insertion_order_is_stable() -> TResult<()> {
        let mut map = AttributeMap::new()
            .with("label", "first")
            .with("id", vec![1_u8, 2]);
        map.set("label", "second");
        let template = Template::encode(&map)?;
        assert_eq!(template.entries()[0].code, CKA_LABEL);
        assert_eq!(template.entries()[0].value, b"second".to_vec());
        assert_eq!(template, Template::encode(&map)?);
        Ok(())
    }

    #[test]
    fn test_encoding_errors() {
        assert!(matches!(
            Template::encode(&AttributeMap::new()),
            Err(TokenError::EmptyTemplate)
        ));
        assert!(matches!(
            Template::encode(&AttributeMap::new().with("colour", "blue")),
            Err(TokenError::UnknownAttribute(name)) if name == "colour"
        ));
        assert!(matches!(
            Template::encode(&AttributeMap::new().with("valueLen", "32")),
            Err(TokenError::TypeMismatch { attribute, .. }) if attribute == "valueLen"
        ));
        assert!(matches!(
            Template::encode(&AttributeMap::new().with("value", "not bytes")),
            Err(TokenError::TypeMismatch { .. })
        ));
        assert!(matches!(
            Template::encode(&AttributeMap::new().with("label", vec![0_u8])),
            Err(TokenError::TypeMismatch { .. })
        ));
        let date = chrono::NaiveDate::from_ymd_opt(2024, 1, 31).unwrap();
        assert!(matches!(
            Template::encode(&AttributeMap::new().with("startDate", date)),
            Err(TokenError::UnsupportedType { .. })
        ));
        if ULONG_WIDTH == 4 {
            assert!(matches!(
                Template::encode(&AttributeMap::new().with("valueLen", u64::MAX)),
                Err(TokenError::TypeMismatch { .. })
            ));
        }
    }

    #[test]
    fn test_boolean_accepts_truthy_numbers() -> TResult<()> {
        let template = Template::encode(&AttributeMap::new().with("sensitive", 7_u64))?;
        assert_eq!(template.entries()[0].value, vec![1]);
        Ok(())
    }

    #[test]
    fn test_decode() -> TResult<()> {
        let date = decode(CKA_START_DATE, b"20250301")?;
        assert_eq!(
            date,
            AttributeValue::Date(chrono::NaiveDate::from_ymd_opt(2025, 3, 1).unwrap())
        );
        assert!(decode(CKA_START_DATE, b"2025").is_err());
        assert!(decode(CKA_VALUE_LEN, &[1, 2, 3]).is_err());
        assert!(decode(CKA_TOKEN, &[]).is_err());
        assert!(matches!(
            decode(0xdead_beef, &[]),
            Err(TokenError::UnknownAttribute(_))
        ));
        assert_eq!(decode(CKA_VALUE, &[9, 9])?, AttributeValue::Bytes(vec![9, 9]));
        Ok(())
    }

    #[test]
    fn test_from_entries() {
        assert!(Template::from_entries(vec![]).is_err());
        assert!(
            Template::from_entries(vec![TemplateEntry {
                code: 0xdead_beef,
                value: vec![]
            }])
            .is_err()
        );
        let template = Template::from_entries(vec![TemplateEntry {
            code: CKA_ID,
            value: vec![1],
        }])
        .unwrap();
        assert_eq!(template.len(), 1);
    }
}
