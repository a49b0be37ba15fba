#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic_in_result_fn)]

use std::sync::Arc;

use crate::{Session, TResult, UserType, test_helpers::log_init};

mod export;
mod operations;
mod sessions;
mod suite;

use soft_token::{SOFT_SLOT_ID, SOFT_USER_PIN, SoftToken};

/// A fresh in-memory token with a started read/write session logged in as the user.
fn logged_in_session() -> TResult<(Arc<SoftToken>, Session)> {
    log_init(None);
    let token = Arc::new(SoftToken::new());
    let mut session = Session::new(token.clone(), SOFT_SLOT_ID);
    session.start(true)?;
    session.login(SOFT_USER_PIN, UserType::User)?;
    Ok((token, session))
}
