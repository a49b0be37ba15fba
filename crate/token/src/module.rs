use std::{
    fmt::{self, Display, Formatter},
    sync::Arc,
};

use pkcs11_sys::{CK_INFO, CK_SLOT_ID};
use tracing::debug;

use crate::{
    TResult,
    capabilities::TokenCapabilities,
    config::TokenConfig,
    pkcs11_lib::Pkcs11Library,
    session::{Session, UserType},
};

/// General information about a PKCS#11 library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Info {
    pub cryptoki_version: (u8, u8),
    pub manufacturer_id: String,
    pub flags: u64,
    pub library_description: String,
    pub library_version: (u8, u8),
}

/// Cryptoki strings are fixed width and blank padded.
fn padded_string(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_end_matches([' ', '\0'])
        .to_owned()
}

impl From<CK_INFO> for Info {
    fn from(info: CK_INFO) -> Self {
        Self {
            cryptoki_version: (info.cryptokiVersion.major, info.cryptokiVersion.minor),
            manufacturer_id: padded_string(&info.manufacturerID),
            flags: u64::from(info.flags),
            library_description: padded_string(&info.libraryDescription),
            library_version: (info.libraryVersion.major, info.libraryVersion.minor),
        }
    }
}

impl Display for Info {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Cryptoki Version: {}.{}\nManufacturer ID: {}\nFlags: {}\nLibrary Description: \
             {}\nLibrary Version: {}.{}",
            self.cryptoki_version.0,
            self.cryptoki_version.1,
            self.manufacturer_id,
            self.flags,
            self.library_description,
            self.library_version.0,
            self.library_version.1
        )
    }
}

/// A loaded PKCS#11 module, the entry point to its slots and sessions.
pub struct Module {
    library: Arc<Pkcs11Library>,
    capabilities: TokenCapabilities,
}

impl Module {
    /// Load and initialize the PKCS#11 library at `path`.
    pub fn load<P: AsRef<std::ffi::OsStr>>(path: P) -> TResult<Self> {
        Ok(Self {
            library: Arc::new(Pkcs11Library::instantiate(path)?),
            capabilities: TokenCapabilities::default(),
        })
    }

    /// Load the library named by the configuration, with the configured capabilities.
    pub fn from_config(config: &TokenConfig) -> TResult<Self> {
        let library_path = config.library_path()?;
        debug!("Loading the PKCS#11 library {}", library_path.display());
        Ok(Self {
            library: Arc::new(Pkcs11Library::instantiate(library_path)?),
            capabilities: config.capabilities(),
        })
    }

    pub fn info(&self) -> TResult<Info> {
        Ok(self.library.info()?.into())
    }

    /// The slot ids of the module; with `token_present` only the slots holding a token.
    pub fn slot_ids(&self, token_present: bool) -> TResult<Vec<CK_SLOT_ID>> {
        self.library.slot_list(token_present)
    }

    /// A session on `slot_id`, not started yet.
    #[must_use]
    pub fn session(&self, slot_id: CK_SLOT_ID) -> Session {
        Session::new(self.library.clone(), slot_id).with_capabilities(self.capabilities)
    }

    /// Start a session on the configured slot, logged in as the normal user when a PIN is set.
    pub fn open_session(&self, config: &TokenConfig) -> TResult<Session> {
        let mut session = self.session(CK_SLOT_ID::try_from(config.slot_id)?);
        session.start(config.read_write)?;
        if let Some(pin) = config.user_pin.as_ref() {
            session.login(pin, UserType::User)?;
        }
        Ok(session)
    }
}
