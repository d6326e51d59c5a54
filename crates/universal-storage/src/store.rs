//! Three-tier key/value store.
//!
//! Tiers, from most to least volatile:
//!
//! 1. **State**: in-memory values, lost on reload. Observable through
//!    [`UniversalStore::watch_state`] unless the key starts with `_`, in which
//!    case it lives in a private map that is never dispatched.
//! 2. **Cookies**: persisted, readable in both render contexts.
//! 3. **Local**: persisted on the client only.
//!
//! "Universal" keys are written to every tier and read back with a fixed
//! resolution order, so a server render and the client that hydrates after it
//! agree on the value.
//!
//! Persisted tiers hold JSON-encoded strings under a per-tier prefix. Backend
//! failures are logged and dropped; callers treat persistence as
//! fire-and-forget.

use crate::{JsonFileStorage, StorageBackend, StorageKeys, StorageResult};
use auth_config_and_utils::{Config, Paths, DEFAULT_COOKIE_PREFIX, DEFAULT_LOCAL_PREFIX};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Where the store is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderContext {
    /// Pre-render pass. Watchers are never registered nor dispatched.
    Server,
    /// Post-render, interactive context.
    Client,
}

/// Store construction options.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Key prefix inside the cookie tier.
    pub cookie_prefix: String,
    /// Key prefix inside the local tier.
    pub local_prefix: String,
    /// Render context the store serves.
    pub context: RenderContext,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            cookie_prefix: DEFAULT_COOKIE_PREFIX.to_string(),
            local_prefix: DEFAULT_LOCAL_PREFIX.to_string(),
            context: RenderContext::Client,
        }
    }
}

impl From<&Config> for StoreOptions {
    fn from(config: &Config) -> Self {
        Self {
            cookie_prefix: config.cookie_prefix.clone(),
            local_prefix: config.local_prefix.clone(),
            context: RenderContext::Client,
        }
    }
}

/// Callback invoked with `(new, old)` on a state transition.
pub type WatchCallback = Arc<dyn Fn(&Value, &Value) + Send + Sync>;

/// Handle returned by [`UniversalStore::watch_state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchId(u64);

struct Watcher {
    id: WatchId,
    key: String,
    callback: WatchCallback,
}

/// Reactive state plus cookie and local tiers.
pub struct UniversalStore {
    options: StoreOptions,
    cookies: Option<Arc<dyn StorageBackend>>,
    local: Option<Arc<dyn StorageBackend>>,
    state: Mutex<HashMap<String, Value>>,
    private_state: Mutex<HashMap<String, Value>>,
    watchers: Mutex<Vec<Watcher>>,
    next_watch_id: AtomicU64,
}

fn is_unset(value: &Value) -> bool {
    value.is_null()
}

fn is_private(key: &str) -> bool {
    key.starts_with(StorageKeys::PRIVATE_PREFIX)
}

fn encode(value: &Value) -> String {
    value.to_string()
}

/// Decode a persisted string. Values written by other clients may not be JSON,
/// those are returned as plain strings.
fn decode(raw: String) -> Value {
    serde_json::from_str(&raw).unwrap_or(Value::String(raw))
}

impl UniversalStore {
    /// Create a store with no persisted tiers.
    pub fn new(options: StoreOptions) -> Self {
        Self {
            options,
            cookies: None,
            local: None,
            state: Mutex::new(HashMap::new()),
            private_state: Mutex::new(HashMap::new()),
            watchers: Mutex::new(Vec::new()),
            next_watch_id: AtomicU64::new(1),
        }
    }

    /// Client store with both persisted tiers kept as JSON files under
    /// `paths`, using the tier prefixes from `config`.
    pub fn open(config: &Config, paths: &Paths) -> StorageResult<Self> {
        let cookies = JsonFileStorage::open(paths.cookie_store_file())?;
        let local = JsonFileStorage::open(paths.local_store_file())?;
        debug!(base_dir = %paths.base_dir().display(), "Opened file-backed store");

        Ok(Self::new(StoreOptions::from(config))
            .with_cookies(Arc::new(cookies))
            .with_local(Arc::new(local)))
    }

    /// Attach the cookie tier.
    pub fn with_cookies(mut self, backend: Arc<dyn StorageBackend>) -> Self {
        self.cookies = Some(backend);
        self
    }

    /// Attach the local tier.
    pub fn with_local(mut self, backend: Arc<dyn StorageBackend>) -> Self {
        self.local = Some(backend);
        self
    }

    /// Render context this store serves.
    pub fn context(&self) -> RenderContext {
        self.options.context
    }

    // ==========================================
    // Universal
    // ==========================================

    /// Write `value` to every tier. An unset (null) value removes the key
    /// everywhere instead.
    pub fn set_universal(&self, key: &str, value: Value) -> Value {
        if is_unset(&value) {
            self.remove_universal(key);
            return value;
        }

        self.set_cookie(key, &value);
        self.set_local(key, &value);
        self.set_state(key, value.clone());

        value
    }

    /// Resolve `key` across tiers.
    ///
    /// Server: state, cookies, local. Client: cookies, local, state.
    pub fn get_universal(&self, key: &str) -> Option<Value> {
        let value = match self.options.context {
            RenderContext::Server => self.get_state(key),
            RenderContext::Client => None,
        };

        value
            .or_else(|| self.get_cookie(key))
            .or_else(|| self.get_local(key))
            .or_else(|| match self.options.context {
                RenderContext::Client => self.get_state(key),
                RenderContext::Server => None,
            })
    }

    /// Reconcile `key` across tiers: keep an already persisted value, else use
    /// `default`, and write the result back to every tier.
    ///
    /// Calling this twice with unchanged tiers resolves the same value and only
    /// rewrites identical data.
    pub fn sync_universal(&self, key: &str, default: Option<Value>) -> Option<Value> {
        let value = self
            .get_universal(key)
            .or_else(|| default.filter(|d| !is_unset(d)));

        if let Some(value) = &value {
            self.set_universal(key, value.clone());
        }

        debug!(key, resolved = value.is_some(), "Synced universal key");
        value
    }

    /// Remove `key` from every tier.
    pub fn remove_universal(&self, key: &str) {
        self.remove_cookie(key);
        self.remove_local(key);
        self.set_state(key, Value::Null);
    }

    // ==========================================
    // Persisted fallback (cookies, then local)
    // ==========================================

    /// Read `key` from the persisted tiers only.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.get_cookie(key).or_else(|| self.get_local(key))
    }

    /// Write `key` to the persisted tiers only.
    pub fn set(&self, key: &str, value: Value) -> Value {
        if is_unset(&value) {
            self.remove_cookie(key);
            self.remove_local(key);
        } else {
            self.set_cookie(key, &value);
            self.set_local(key, &value);
        }
        value
    }

    // ==========================================
    // State
    // ==========================================

    /// Set an in-memory value. Watchers of `key` fire when the value actually
    /// changes, and only in the client context.
    pub fn set_state(&self, key: &str, value: Value) -> Value {
        if is_private(key) {
            self.private_state.lock().insert(key.to_string(), value.clone());
            return value;
        }

        let old = self
            .state
            .lock()
            .insert(key.to_string(), value.clone())
            .unwrap_or(Value::Null);

        if old != value && self.options.context == RenderContext::Client {
            self.dispatch(key, &value, &old);
        }

        value
    }

    /// Read an in-memory value. Null is reported as absent.
    pub fn get_state(&self, key: &str) -> Option<Value> {
        let value = if is_private(key) {
            self.private_state.lock().get(key).cloned()
        } else {
            self.state.lock().get(key).cloned()
        };
        value.filter(|v| !is_unset(v))
    }

    /// Subscribe to transitions of `key`.
    ///
    /// Returns `None` in the server context or for private keys, where
    /// nothing is ever dispatched.
    pub fn watch_state<F>(&self, key: &str, callback: F) -> Option<WatchId>
    where
        F: Fn(&Value, &Value) + Send + Sync + 'static,
    {
        if self.options.context == RenderContext::Server || is_private(key) {
            return None;
        }

        let id = WatchId(self.next_watch_id.fetch_add(1, Ordering::Relaxed));
        self.watchers.lock().push(Watcher {
            id,
            key: key.to_string(),
            callback: Arc::new(callback),
        });
        Some(id)
    }

    /// Drop a subscription. Returns whether it existed.
    pub fn unwatch_state(&self, id: WatchId) -> bool {
        let mut watchers = self.watchers.lock();
        let before = watchers.len();
        watchers.retain(|w| w.id != id);
        watchers.len() != before
    }

    fn dispatch(&self, key: &str, new: &Value, old: &Value) {
        // Callbacks run outside the lock so they may touch the store.
        let callbacks: Vec<WatchCallback> = self
            .watchers
            .lock()
            .iter()
            .filter(|w| w.key == key)
            .map(|w| w.callback.clone())
            .collect();

        for callback in callbacks {
            callback(new, old);
        }
    }

    // ==========================================
    // Cookies
    // ==========================================

    pub fn set_cookie(&self, key: &str, value: &Value) {
        let Some(backend) = &self.cookies else { return };
        let full_key = format!("{}{}", self.options.cookie_prefix, key);
        let result = if is_unset(value) {
            backend.delete(&full_key).map(|_| ())
        } else {
            backend.set(&full_key, &encode(value))
        };
        if let Err(e) = result {
            warn!(key = %full_key, error = %e, "Cookie write failed");
        }
    }

    pub fn get_cookie(&self, key: &str) -> Option<Value> {
        let backend = self.cookies.as_ref()?;
        let full_key = format!("{}{}", self.options.cookie_prefix, key);
        match backend.get(&full_key) {
            Ok(raw) => raw.map(decode).filter(|v| !is_unset(v)),
            Err(e) => {
                warn!(key = %full_key, error = %e, "Cookie read failed");
                None
            }
        }
    }

    pub fn remove_cookie(&self, key: &str) {
        self.set_cookie(key, &Value::Null);
    }

    // ==========================================
    // Local
    // ==========================================

    pub fn set_local(&self, key: &str, value: &Value) {
        let Some(backend) = &self.local else { return };
        let full_key = format!("{}{}", self.options.local_prefix, key);
        let result = if is_unset(value) {
            backend.delete(&full_key).map(|_| ())
        } else {
            backend.set(&full_key, &encode(value))
        };
        if let Err(e) = result {
            warn!(key = %full_key, error = %e, "Local storage write failed");
        }
    }

    pub fn get_local(&self, key: &str) -> Option<Value> {
        let backend = self.local.as_ref()?;
        let full_key = format!("{}{}", self.options.local_prefix, key);
        match backend.get(&full_key) {
            Ok(raw) => raw.map(decode).filter(|v| !is_unset(v)),
            Err(e) => {
                warn!(key = %full_key, error = %e, "Local storage read failed");
                None
            }
        }
    }

    pub fn remove_local(&self, key: &str) {
        self.set_local(key, &Value::Null);
    }
}
