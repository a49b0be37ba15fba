//! Copyright 2026 tokenkit developers
//!
//! SoftHSM2 tokens, accessed through the generic tokenkit sessions.

use std::path::PathBuf;

use tokenkit::{TResult, TokenConfig};

#[cfg(test)]
#[cfg(feature = "softhsm2")]
mod tests;

/// Location of the SoftHSM2 library on Debian and Ubuntu.
pub const SOFTHSM2_PKCS11_LIB: &str = "/usr/lib/softhsm/libsofthsm2.so";

/// Handles requested per `C_FindObjects` call.
const SOFTHSM2_FIND_BATCH_SIZE: usize = 256;

/// The configuration for a SoftHSM2 token.
///
/// The `TOKENKIT_*` environment variables apply; the library defaults to
/// [`SOFTHSM2_PKCS11_LIB`].
pub fn softhsm2_config() -> TResult<TokenConfig> {
    let mut config = TokenConfig::from_env()?;
    if config.library_path.is_none() {
        config.library_path = Some(PathBuf::from(SOFTHSM2_PKCS11_LIB));
    }
    if config.find_batch_size.is_none() {
        config.find_batch_size = Some(SOFTHSM2_FIND_BATCH_SIZE);
    }
    Ok(config)
}
