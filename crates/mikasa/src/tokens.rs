//! Per-strategy token records.
//!
//! Each strategy owns four universal keys:
//!
//! | record        | key                                   |
//! |---------------|---------------------------------------|
//! | access token  | `<token_prefix><strategy>`            |
//! | expiration    | `<token_prefix>expiration.<strategy>` |
//! | scope         | `<token_prefix>scope.<strategy>`      |
//! | refresh token | `<refresh_prefix><strategy>`          |
//!
//! A cleared token is stored as `false`, not deleted, so a server render can
//! tell "logged out" apart from "never seen". Expirations are absolute epoch
//! seconds.

use crate::transport::lookup_path;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;
use universal_storage::UniversalStore;

/// Granted scope.
#[derive(Debug, Clone, PartialEq)]
pub enum Scope {
    /// Ordered scope names, parsed from a space-delimited string or an array.
    List(Vec<String>),
    /// Structured scope queried by dotted path.
    Structured(Value),
}

impl Scope {
    /// Normalize a stored value. Returns `None` for anything that does not
    /// describe a scope.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(Scope::List(
                s.split_whitespace().map(str::to_string).collect(),
            )),
            Value::Array(items) => Some(Scope::List(
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect(),
            )),
            Value::Object(_) => Some(Scope::Structured(value.clone())),
            _ => None,
        }
    }

    /// Whether `scope` is granted.
    pub fn contains(&self, scope: &str) -> bool {
        match self {
            Scope::List(names) => names.iter().any(|name| name == scope),
            Scope::Structured(value) => lookup_path(value, scope).is_some_and(is_truthy),
        }
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// A token is "set" when it is a non-empty string. `false` marks a cleared one.
fn as_set_token(value: Option<Value>) -> Option<String> {
    match value {
        Some(Value::String(s)) if !s.is_empty() => Some(s),
        _ => None,
    }
}

fn as_epoch(value: Option<Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn token_value(token: Option<&str>) -> Value {
    match token {
        Some(t) if !t.is_empty() => Value::String(t.to_string()),
        _ => Value::Bool(false),
    }
}

/// Key derivation plus storage delegation for token records.
pub struct TokenManager {
    store: Arc<UniversalStore>,
    token_prefix: String,
    refresh_token_prefix: String,
}

impl TokenManager {
    pub fn new(
        store: Arc<UniversalStore>,
        token_prefix: impl Into<String>,
        refresh_token_prefix: impl Into<String>,
    ) -> Self {
        Self {
            store,
            token_prefix: token_prefix.into(),
            refresh_token_prefix: refresh_token_prefix.into(),
        }
    }

    pub fn token_key(&self, strategy: &str) -> String {
        format!("{}{}", self.token_prefix, strategy)
    }

    pub fn expiration_key(&self, strategy: &str) -> String {
        format!("{}expiration.{}", self.token_prefix, strategy)
    }

    pub fn scope_key(&self, strategy: &str) -> String {
        format!("{}scope.{}", self.token_prefix, strategy)
    }

    pub fn refresh_token_key(&self, strategy: &str) -> String {
        format!("{}{}", self.refresh_token_prefix, strategy)
    }

    // Access token

    /// Store the access token (`"<type> <opaque>"`). `None` clears it.
    pub fn set_token(&self, strategy: &str, token: Option<&str>) {
        self.store
            .set_universal(&self.token_key(strategy), token_value(token));
    }

    pub fn get_token(&self, strategy: &str) -> Option<String> {
        as_set_token(self.store.get_universal(&self.token_key(strategy)))
    }

    pub fn sync_token(&self, strategy: &str) -> Option<String> {
        as_set_token(self.store.sync_universal(&self.token_key(strategy), None))
    }

    // Refresh token

    pub fn set_refresh_token(&self, strategy: &str, token: Option<&str>) {
        self.store
            .set_universal(&self.refresh_token_key(strategy), token_value(token));
    }

    pub fn get_refresh_token(&self, strategy: &str) -> Option<String> {
        as_set_token(self.store.get_universal(&self.refresh_token_key(strategy)))
    }

    pub fn sync_refresh_token(&self, strategy: &str) -> Option<String> {
        as_set_token(
            self.store
                .sync_universal(&self.refresh_token_key(strategy), None),
        )
    }

    // Expiration

    /// Store the absolute expiration in epoch seconds. `None` removes it.
    pub fn set_expiration(&self, strategy: &str, expires_at: Option<i64>) {
        let value = expires_at.map(Value::from).unwrap_or(Value::Null);
        self.store
            .set_universal(&self.expiration_key(strategy), value);
    }

    pub fn get_expiration(&self, strategy: &str) -> Option<i64> {
        as_epoch(self.store.get_universal(&self.expiration_key(strategy)))
    }

    pub fn sync_expiration(&self, strategy: &str) -> Option<i64> {
        as_epoch(
            self.store
                .sync_universal(&self.expiration_key(strategy), None),
        )
    }

    // Scope

    /// Store the granted scope as received (string, array or object).
    pub fn set_scope(&self, strategy: &str, scope: Value) {
        self.store.set_universal(&self.scope_key(strategy), scope);
    }

    pub fn get_scope(&self, strategy: &str) -> Option<Scope> {
        self.store
            .get_universal(&self.scope_key(strategy))
            .and_then(|v| Scope::from_value(&v))
    }

    pub fn sync_scope(&self, strategy: &str) -> Option<Scope> {
        self.store
            .sync_universal(&self.scope_key(strategy), None)
            .and_then(|v| Scope::from_value(&v))
    }

    /// Clear every record of `strategy`.
    pub fn clear(&self, strategy: &str) {
        self.set_token(strategy, None);
        self.set_refresh_token(strategy, None);
        self.set_expiration(strategy, None);
        self.store.remove_universal(&self.scope_key(strategy));
        debug!(strategy, "Cleared token record");
    }

    /// True when an expiration is recorded and `now` is at or past it.
    pub fn is_expired(&self, strategy: &str, now: i64) -> bool {
        self.get_expiration(strategy)
            .is_some_and(|expires_at| now >= expires_at)
    }

    /// True when the access token has expired and a refresh token is
    /// available to renew it.
    pub fn refresh_due(&self, strategy: &str, now: i64) -> bool {
        self.is_expired(strategy, now) && self.get_refresh_token(strategy).is_some()
    }
}
