//! Request pipeline.
//!
//! `request` checks the active strategy's token record before dispatching.
//! When the access token has expired and a refresh token is present, the
//! refresh protocol runs first:
//!
//! ```text
//!              ┌──────────────────────┐
//!   expired ──►│ Refreshing           │── ok ─────────────► Dispatch
//!              │ (recovered = false)  │── 400 ──┐
//!              └──────────────────────┘         ▼
//!                                          Recovering ── ok ──┐
//!              ┌──────────────────────┐         │             │
//!              │ Refreshing           │◄────────┼─────────────┘
//!              │ (recovered = true)   │── ok ───┼─────────► Dispatch
//!              └──────────────────────┘         │
//!                        │ any error            │ any error
//!                        ▼                      ▼
//!                      Failed ("completeRequest")
//! ```
//!
//! Each step runs at most once, so a request triggers at most two token
//! exchanges and one credential recovery. Concurrent requests racing past the
//! same expired token may each refresh.

use crate::session::Auth;
use crate::strategy::Strategy;
use crate::transport::{lookup_path, Endpoint};
use crate::{AuthError, AuthResult};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};

const AUTHORIZATION: &str = "Authorization";

/// Token grant returned by the token endpoint and the credential endpoint.
#[derive(Debug, Clone, Deserialize)]
struct TokenGrant {
    #[serde(default)]
    token_type: Option<String>,
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    scope: Option<Value>,
}

impl TokenGrant {
    /// Header form, `"<type> <opaque>"`.
    fn header_value(&self) -> String {
        let token_type = self.token_type.as_deref().unwrap_or("Bearer");
        format!("{} {}", token_type, self.access_token)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefreshStep {
    Refreshing { recovered: bool },
    Recovering,
    Dispatch,
}

fn extract(body: Value, property_name: Option<&str>) -> Value {
    match property_name {
        Some(path) => lookup_path(&body, path).cloned().unwrap_or(Value::Null),
        None => body,
    }
}

/// Strip the type prefix from `"<type> <opaque>"`.
fn strip_token_type(token: &str) -> &str {
    token.split_once(' ').map(|(_, raw)| raw).unwrap_or(token)
}

impl Auth {
    /// Execute `endpoint` layered over `defaults`, refreshing an expired
    /// access token first. Returns the response body, or the sub-value named
    /// by the endpoint's `property_name`.
    pub async fn request(&self, endpoint: Endpoint, defaults: &Endpoint) -> AuthResult<Value> {
        let endpoint = endpoint.merged_over(defaults);
        let now = Utc::now().timestamp();

        let due = self
            .strategy_name()
            .filter(|name| self.tokens.refresh_due(name, now));

        match due {
            Some(name) => {
                let strategy = self
                    .strategy(&name)
                    .ok_or_else(|| AuthError::UnknownStrategy(name.clone()));
                match strategy {
                    Ok(strategy) => self.refresh_and_dispatch(&name, strategy, endpoint).await,
                    Err(e) => Err(self.fail_request(e).await),
                }
            }
            None => self.dispatch(endpoint).await,
        }
    }

    /// Like [`Auth::request`], adding the stored token of `strategy` as the
    /// `Authorization` header when the endpoint has none.
    pub async fn request_with(
        &self,
        strategy: &str,
        endpoint: Endpoint,
        defaults: &Endpoint,
    ) -> AuthResult<Value> {
        let mut endpoint = endpoint.merged_over(defaults);
        if endpoint.header_value(AUTHORIZATION).is_none() {
            if let Some(token) = self.tokens.get_token(strategy) {
                endpoint.headers.insert(AUTHORIZATION.to_string(), token);
            }
        }
        self.request(endpoint, &Endpoint::default()).await
    }

    /// Dispatch without any token handling. Failures are reported as
    /// `"request"`.
    async fn dispatch(&self, endpoint: Endpoint) -> AuthResult<Value> {
        match self.transport.execute(&endpoint).await {
            Ok(response) => {
                self.progress.finish();
                Ok(extract(response.body, endpoint.property_name.as_deref()))
            }
            Err(e) => {
                self.progress.fail();
                Err(self.report(e, "request").await)
            }
        }
    }

    async fn refresh_and_dispatch(
        &self,
        name: &str,
        strategy: Arc<dyn Strategy>,
        mut endpoint: Endpoint,
    ) -> AuthResult<Value> {
        let stale_token = self.tokens.get_token(name);
        let mut step = RefreshStep::Refreshing { recovered: false };

        loop {
            debug!(strategy = %name, step = ?step, "Refresh protocol step");
            step = match step {
                RefreshStep::Refreshing { recovered } => {
                    match self.refresh_tokens(name, strategy.as_ref()).await {
                        Ok(()) => RefreshStep::Dispatch,
                        Err(e) if e.status() == Some(400) && !recovered => {
                            debug!(strategy = %name, "Refresh token rejected, recovering credentials");
                            RefreshStep::Recovering
                        }
                        Err(e) => return Err(self.fail_request(e).await),
                    }
                }
                RefreshStep::Recovering => {
                    match self.recover_credentials(name, strategy.as_ref()).await {
                        Ok(()) => RefreshStep::Refreshing { recovered: true },
                        Err(e) => return Err(self.fail_request(e).await),
                    }
                }
                RefreshStep::Dispatch => break,
            };
        }

        // Swap a header that carried the token we just replaced.
        if let (Some(stale), Some(fresh)) = (stale_token, self.tokens.get_token(name)) {
            if endpoint.header_value(AUTHORIZATION) == Some(stale.as_str()) {
                endpoint
                    .headers
                    .retain(|k, _| !k.eq_ignore_ascii_case(AUTHORIZATION));
                endpoint.headers.insert(AUTHORIZATION.to_string(), fresh);
            }
        }

        match self.transport.execute(&endpoint).await {
            Ok(response) => {
                self.progress.finish();
                Ok(extract(response.body, endpoint.property_name.as_deref()))
            }
            Err(e) => Err(self.fail_request(e).await),
        }
    }

    /// Terminal failure of a request that went through the refresh protocol.
    async fn fail_request(&self, error: AuthError) -> AuthError {
        self.progress.fail();
        self.report(error, "completeRequest").await
    }

    /// One token exchange with the stored refresh token.
    async fn refresh_tokens(&self, name: &str, strategy: &dyn Strategy) -> AuthResult<()> {
        let refresh_token = self
            .tokens
            .get_refresh_token(name)
            .ok_or_else(|| AuthError::MissingRefreshToken(name.to_string()))?;
        let options = strategy.options();
        let token_endpoint = options
            .token_endpoint
            .ok_or_else(|| AuthError::MissingTokenEndpoint(name.to_string()))?;

        let exchange = Endpoint::post(token_endpoint)
            .base_url("")
            .form([
                ("client_id", options.client_id.unwrap_or_default()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token".to_string()),
            ]);

        debug!(strategy = %name, "Exchanging refresh token");
        let response = self.transport.execute(&exchange).await?;
        let grant: TokenGrant = serde_json::from_value(response.body)?;

        self.install_grant(name, strategy, &grant)?;
        info!(strategy = %name, "Access token refreshed");

        if let Err(e) = self.sync_profile().await {
            debug!(error = %e, "Profile sync after refresh failed");
        }
        Ok(())
    }

    /// Fetch fresh credentials for the cached user from the credential
    /// endpoint.
    async fn recover_credentials(&self, name: &str, strategy: &dyn Strategy) -> AuthResult<()> {
        let user = self.user().ok_or(AuthError::MissingUser)?;
        let template = self
            .options
            .credentials_endpoint
            .as_deref()
            .ok_or_else(|| AuthError::Config("no credentials endpoint configured".to_string()))?;

        let user_id = match user.get(&self.options.user_id_property) {
            Some(Value::String(id)) => id.clone(),
            Some(Value::Number(id)) => id.to_string(),
            _ => return Err(AuthError::MissingUser),
        };

        let endpoint = Endpoint::get(template.replace("{id}", &user_id));
        debug!(strategy = %name, "Recovering credentials");
        let response = self.transport.execute(&endpoint).await?;
        let grant: TokenGrant = serde_json::from_value(response.body)?;

        self.install_grant(name, strategy, &grant)?;
        info!(strategy = %name, "Credentials recovered");
        Ok(())
    }

    /// Persist a grant and hand the new token to the strategy.
    fn install_grant(
        &self,
        name: &str,
        strategy: &dyn Strategy,
        grant: &TokenGrant,
    ) -> AuthResult<()> {
        let expires_at = match grant.expires_in {
            Some(seconds) if seconds < 0 => {
                return Err(AuthError::Json(format!(
                    "negative expires_in in token grant: {}",
                    seconds
                )));
            }
            Some(seconds) => Some(Utc::now().timestamp().saturating_add(seconds)),
            None => None,
        };

        let token = grant.header_value();
        self.tokens.set_token(name, Some(&token));

        if let Some(refresh_token) = &grant.refresh_token {
            self.tokens.set_refresh_token(name, Some(refresh_token));
        }
        if expires_at.is_some() {
            self.tokens.set_expiration(name, expires_at);
        }
        if let Some(scope) = &grant.scope {
            self.tokens.set_scope(name, scope.clone());
        }

        if strategy.capabilities().set_token {
            strategy.set_token(&token)?;
        }
        Ok(())
    }

    /// POST the user and the active strategy's credentials to the profile
    /// endpoint. Skipped without a user or without a configured endpoint.
    ///
    /// The sync runs beside the caller's request, so it leaves the progress
    /// indicator alone. Failures are reported as `"request"`.
    pub(crate) async fn sync_profile(&self) -> AuthResult<()> {
        let (Some(user), Some(url)) = (self.user(), self.options.user_update_endpoint.clone())
        else {
            return Ok(());
        };

        let strategy = self.strategy_name();
        let token = strategy.as_deref().and_then(|s| self.tokens.get_token(s));
        let refresh_token = strategy
            .as_deref()
            .and_then(|s| self.tokens.get_refresh_token(s));
        let scope = strategy
            .as_deref()
            .and_then(|s| self.store.get_universal(&self.tokens.scope_key(s)));

        let endpoint = Endpoint::post(url).json(json!({
            "user": user,
            "access_token": token.as_deref().map(strip_token_type),
            "refresh_token": refresh_token,
            "scope": scope,
        }));

        debug!("Syncing user profile");
        match self.transport.execute(&endpoint).await {
            Ok(_) => Ok(()),
            Err(e) => Err(self.report(e, "request").await),
        }
    }
}
