use std::{fmt, path::PathBuf};

use serde::Deserialize;
use zeroize::Zeroizing;

use crate::{TResult, TokenError, capabilities::TokenCapabilities};

pub const ENV_PKCS11_LIB: &str = "TOKENKIT_PKCS11_LIB";
pub const ENV_SLOT_ID: &str = "TOKENKIT_SLOT_ID";
pub const ENV_USER_PIN: &str = "TOKENKIT_USER_PIN";
pub const ENV_READ_WRITE: &str = "TOKENKIT_READ_WRITE";
pub const ENV_FIND_BATCH_SIZE: &str = "TOKENKIT_FIND_BATCH_SIZE";

/// Where the token lives and how to open sessions on it.
///
/// The configuration is read either from the `TOKENKIT_*` environment variables or from a
/// JSON document. The user PIN is wiped from memory when the configuration is dropped.
#[derive(Clone, Deserialize)]
#[serde(default, rename_all = "snake_case", deny_unknown_fields)]
pub struct TokenConfig {
    pub library_path: Option<PathBuf>,
    pub slot_id: u64,
    pub user_pin: Option<Zeroizing<String>>,
    pub read_write: bool,
    pub find_batch_size: Option<usize>,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            library_path: None,
            slot_id: 0,
            user_pin: None,
            read_write: true,
            find_batch_size: None,
        }
    }
}

impl fmt::Debug for TokenConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenConfig")
            .field("library_path", &self.library_path)
            .field("slot_id", &self.slot_id)
            .field("user_pin", &self.user_pin.as_ref().map(|_| "****"))
            .field("read_write", &self.read_write)
            .field("find_batch_size", &self.find_batch_size)
            .finish()
    }
}

impl TokenConfig {
    /// Read the configuration from the process environment.
    pub fn from_env() -> TResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Parse a JSON configuration document; missing fields take their default value.
    pub fn from_json(json: &str) -> TResult<Self> {
        serde_json::from_str(json).map_err(|e| TokenError::Config(e.to_string()))
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> TResult<Self> {
        let mut config = Self::default();
        if let Some(path) = lookup(ENV_PKCS11_LIB) {
            config.library_path = Some(PathBuf::from(path));
        }
        if let Some(slot_id) = lookup(ENV_SLOT_ID) {
            config.slot_id = parse_number(ENV_SLOT_ID, &slot_id)?;
        }
        config.user_pin = lookup(ENV_USER_PIN).map(Zeroizing::new);
        if let Some(read_write) = lookup(ENV_READ_WRITE) {
            config.read_write = parse_flag(ENV_READ_WRITE, &read_write)?;
        }
        if let Some(batch) = lookup(ENV_FIND_BATCH_SIZE) {
            config.find_batch_size = Some(parse_number(ENV_FIND_BATCH_SIZE, &batch)?);
        }
        Ok(config)
    }

    /// The library path, which must be configured to load a token.
    pub fn library_path(&self) -> TResult<&PathBuf> {
        self.library_path.as_ref().ok_or_else(|| {
            TokenError::Config(format!(
                "the PKCS#11 library path is not set. Please set the {ENV_PKCS11_LIB} \
                 environment variable"
            ))
        })
    }

    #[must_use]
    pub fn capabilities(&self) -> TokenCapabilities {
        self.find_batch_size
            .map_or_else(TokenCapabilities::default, TokenCapabilities::with_find_batch_size)
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> TResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| TokenError::Config(format!("{name}: not a valid number: {value:?}")))
}

fn parse_flag(name: &str, value: &str) -> TResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(TokenError::Config(format!(
            "{name}: not a valid boolean: {value:?}"
        ))),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;

    use serial_test::serial;

    use super::*;

    fn lookup_in(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = TokenConfig::from_lookup(lookup_in(&[])).unwrap();
        assert!(config.library_path.is_none());
        assert_eq!(config.slot_id, 0);
        assert!(config.read_write);
        assert_eq!(config.capabilities(), TokenCapabilities::default());
        assert!(matches!(config.library_path(), Err(TokenError::Config(_))));
    }

    #[test]
    fn test_lookup() {
        let config = TokenConfig::from_lookup(lookup_in(&[
            (ENV_PKCS11_LIB, "/usr/lib/softhsm/libsofthsm2.so"),
            (ENV_SLOT_ID, "12"),
            (ENV_USER_PIN, "12345678"),
            (ENV_READ_WRITE, "false"),
            (ENV_FIND_BATCH_SIZE, "0"),
        ]))
        .unwrap();
        assert_eq!(
            config.library_path().unwrap(),
            &PathBuf::from("/usr/lib/softhsm/libsofthsm2.so")
        );
        assert_eq!(config.slot_id, 12);
        assert_eq!(config.user_pin.as_deref().map(String::as_str), Some("12345678"));
        assert!(!config.read_write);
        assert_eq!(config.capabilities().find_batch_size, 1);
        assert!(!format!("{config:?}").contains("12345678"));
    }

    #[test]
    fn test_malformed_values() {
        let err = TokenConfig::from_lookup(lookup_in(&[(ENV_SLOT_ID, "twelve")])).unwrap_err();
        assert!(matches!(err, TokenError::Config(_)));
        let err = TokenConfig::from_lookup(lookup_in(&[(ENV_READ_WRITE, "maybe")])).unwrap_err();
        assert!(matches!(err, TokenError::Config(_)));
    }

    #[test]
    fn test_from_empty_json() {
        let config = TokenConfig::from_json("{}").unwrap();
        let defaults = TokenConfig::default();
        assert_eq!(config.library_path, defaults.library_path);
        assert_eq!(config.slot_id, defaults.slot_id);
        assert!(config.user_pin.is_none());
        assert!(config.read_write);
        assert_eq!(config.capabilities(), TokenCapabilities::default());

        let config = TokenConfig::from_json(r#"{"user_pin": "1234"}"#).unwrap();
        assert_eq!(config.user_pin.as_deref().map(String::as_str), Some("1234"));
        assert!(!format!("{config:?}").contains("1234"));
    }

    #[test]
    fn test_from_json() {
        let config =
            TokenConfig::from_json(r#"{"slot_id": 3, "find_batch_size": 16, "read_write": false}"#)
                .unwrap();
        assert_eq!(config.slot_id, 3);
        assert!(!config.read_write);
        assert_eq!(config.capabilities().find_batch_size, 16);
        assert!(matches!(
            TokenConfig::from_json(r#"{"slot": 3}"#),
            Err(TokenError::Config(_))
        ));
    }

    #[test]
    #[serial]
    #[allow(unsafe_code)]
    fn test_from_env() {
        unsafe {
            std::env::set_var(ENV_SLOT_ID, "7");
            std::env::set_var(ENV_READ_WRITE, "1");
        }
        let config = TokenConfig::from_env();
        unsafe {
            std::env::remove_var(ENV_SLOT_ID);
            std::env::remove_var(ENV_READ_WRITE);
        }
        let config = config.unwrap();
        assert_eq!(config.slot_id, 7);
        assert!(config.read_write);
    }
}
