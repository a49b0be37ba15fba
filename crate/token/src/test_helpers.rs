use std::sync::Once;

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::{TResult, TokenError};

static LOG_INIT: Once = Once::new();

/// Install a `tracing` subscriber for tests, once per process.
///
/// `RUST_LOG` takes precedence over `default_filter`, which itself defaults to `info`.
pub fn log_init(default_filter: Option<&str>) {
    LOG_INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_filter.unwrap_or("info")));
        let format = tracing_subscriber::fmt::layer()
            .with_level(true)
            .with_target(true)
            .with_thread_ids(true)
            .with_line_number(true)
            .with_file(true)
            .compact();
        // another test harness may already have installed a global subscriber
        drop(
            tracing_subscriber::registry()
                .with(filter)
                .with(format)
                .try_init(),
        );
    });
}

/// The user PIN of the token under test, from `TOKENKIT_USER_PIN`.
pub fn get_user_pin() -> TResult<String> {
    std::env::var(crate::config::ENV_USER_PIN).map_err(|_| {
        TokenError::Config(format!(
            "The user PIN for the token is not set. Please set the {} environment variable",
            crate::config::ENV_USER_PIN
        ))
    })
}

/// The slot of the token under test, from `TOKENKIT_SLOT_ID`, if set.
#[must_use]
pub fn get_slot_id() -> Option<u64> {
    std::env::var(crate::config::ENV_SLOT_ID)
        .ok()
        .and_then(|slot| slot.parse().ok())
}
