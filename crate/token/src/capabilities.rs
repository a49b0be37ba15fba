/// Default number of handles requested from the token per `C_FindObjects` call.
pub const DEFAULT_FIND_BATCH_SIZE: usize = 64;

/// Tuning knobs that depend on the token a session talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenCapabilities {
    /// Maximum number of handles fetched per enumeration round trip (at least 1)
    pub find_batch_size: usize,
}

impl Default for TokenCapabilities {
    fn default() -> Self {
        Self {
            find_batch_size: DEFAULT_FIND_BATCH_SIZE,
        }
    }
}

impl TokenCapabilities {
    #[must_use]
    pub fn with_find_batch_size(find_batch_size: usize) -> Self {
        Self {
            find_batch_size: find_batch_size.max(1),
        }
    }
}
