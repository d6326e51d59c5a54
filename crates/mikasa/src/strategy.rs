//! Pluggable authentication strategies.
//!
//! A strategy implements any subset of the lifecycle hooks. It advertises
//! which ones through [`Strategy::capabilities`], and the engine takes an
//! explicit fallback branch for every hook that is absent:
//!
//! | hook         | fallback when absent                       |
//! |--------------|--------------------------------------------|
//! | `mounted`    | fetch the user once                        |
//! | `login`      | resolve immediately                        |
//! | `fetch_user` | no-op                                      |
//! | `logout`     | local reset                                |
//! | `reset`      | clear user, access and refresh token       |
//! | `set_token`  | nothing; the token lives in storage only   |

use crate::{Auth, AuthError, AuthResult};
use async_trait::async_trait;
use serde_json::Value;

/// Hooks a strategy implements.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub mounted: bool,
    pub login: bool,
    pub fetch_user: bool,
    pub logout: bool,
    pub reset: bool,
    pub set_token: bool,
}

impl Capabilities {
    /// Every hook implemented.
    pub fn all() -> Self {
        Self {
            mounted: true,
            login: true,
            fetch_user: true,
            logout: true,
            reset: true,
            set_token: true,
        }
    }
}

/// Settings the refresh protocol reads from a strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StrategyOptions {
    /// Token endpoint for the refresh exchange.
    pub token_endpoint: Option<String>,
    /// `client_id` sent with the refresh exchange.
    pub client_id: Option<String>,
}

/// One authentication method.
///
/// Hooks receive the engine so they can read and write session state
/// (`set_user`, token helpers, `request`). Default hook bodies return
/// [`AuthError::MissingHook`]; the engine never calls a hook that
/// [`Strategy::capabilities`] does not report.
#[async_trait]
pub trait Strategy: Send + Sync {
    fn capabilities(&self) -> Capabilities;

    fn options(&self) -> StrategyOptions {
        StrategyOptions::default()
    }

    async fn mounted(&self, _auth: &Auth) -> AuthResult<()> {
        Err(AuthError::MissingHook("mounted"))
    }

    async fn login(&self, _auth: &Auth, _args: Value) -> AuthResult<Value> {
        Err(AuthError::MissingHook("login"))
    }

    async fn fetch_user(&self, _auth: &Auth) -> AuthResult<()> {
        Err(AuthError::MissingHook("fetch_user"))
    }

    async fn logout(&self, _auth: &Auth) -> AuthResult<()> {
        Err(AuthError::MissingHook("logout"))
    }

    async fn reset(&self, _auth: &Auth) -> AuthResult<()> {
        Err(AuthError::MissingHook("reset"))
    }

    /// Push a renewed access token into the strategy's own token holder.
    fn set_token(&self, _token: &str) -> AuthResult<()> {
        Err(AuthError::MissingHook("set_token"))
    }
}
