//! Session engine.
//!
//! [`Auth`] owns the session fields (`user`, `loggedIn`, `busy`, `strategy`)
//! inside a [`UniversalStore`], delegates lifecycle calls to the active
//! [`Strategy`], and reports every strategy failure on the [`ErrorBus`] before
//! handing it back to the caller. The request pipeline lives in
//! `request.rs`.

use crate::auth_fsm::{SessionMachine, SessionMachineInput, SessionPhase};
use crate::error_bus::{ErrorBus, ErrorPayload};
use crate::redirect::{apply_redirect, Navigator, Transition};
use crate::strategy::Strategy;
use crate::tokens::{Scope, TokenManager};
use crate::transport::{NoProgress, ProgressIndicator, Transport};
use crate::{AuthError, AuthResult};
use auth_config_and_utils::{Config, RedirectConfig};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};
use universal_storage::{StorageKeys, UniversalStore, WatchId};

/// Predicate deciding whether an error resets the session.
pub type ResetPredicate = Arc<dyn Fn(&AuthError, &ErrorPayload) -> bool + Send + Sync>;

/// Reset-on-error policy.
///
/// Errors tagged `"reset"`, and errors raised while a policy reset is
/// running, never reach the predicate and never trigger another reset.
///
/// The reset goes through the active strategy's `reset` hook when it has one.
/// Hook resets are asynchronous, so the listener only schedules them and the
/// failing engine operation runs them before returning; see
/// [`Auth::run_pending_reset`]. Strategies without the hook are reset locally
/// right away.
#[derive(Clone, Default)]
pub enum ResetOnError {
    #[default]
    Disabled,
    Always,
    When(ResetPredicate),
}

impl ResetOnError {
    fn applies(&self, error: &AuthError, payload: &ErrorPayload) -> bool {
        match self {
            ResetOnError::Disabled => false,
            ResetOnError::Always => true,
            ResetOnError::When(predicate) => predicate(error, payload),
        }
    }
}

impl fmt::Debug for ResetOnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResetOnError::Disabled => f.write_str("Disabled"),
            ResetOnError::Always => f.write_str("Always"),
            ResetOnError::When(_) => f.write_str("When(..)"),
        }
    }
}

/// Engine options.
#[derive(Debug, Clone)]
pub struct AuthOptions {
    pub default_strategy: Option<String>,
    pub token_prefix: String,
    pub refresh_token_prefix: String,
    pub watch_logged_in: bool,
    pub reset_on_error: ResetOnError,
    pub redirect: RedirectConfig,
    pub user_update_endpoint: Option<String>,
    pub credentials_endpoint: Option<String>,
    pub user_id_property: String,
}

impl Default for AuthOptions {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for AuthOptions {
    fn from(config: &Config) -> Self {
        Self {
            default_strategy: config.default_strategy.clone(),
            token_prefix: config.token_prefix.clone(),
            refresh_token_prefix: config.refresh_token_prefix.clone(),
            watch_logged_in: config.watch_logged_in,
            reset_on_error: if config.reset_on_error {
                ResetOnError::Always
            } else {
                ResetOnError::Disabled
            },
            redirect: config.redirect.clone(),
            user_update_endpoint: config.user_update_endpoint.clone(),
            credentials_endpoint: config.credentials_endpoint.clone(),
            user_id_property: config.user_id_property.clone(),
        }
    }
}

/// Point-in-time view of the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthSnapshot {
    pub logged_in: bool,
    pub busy: bool,
    pub strategy: Option<String>,
    pub user: Option<Value>,
    pub phase: SessionPhase,
}

type StrategyMap = HashMap<String, Arc<dyn Strategy>>;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Reset requested by the reset-on-error listener.
#[derive(Debug, Default)]
struct PendingReset {
    requested: AtomicBool,
    running: AtomicBool,
}

/// Session engine.
pub struct Auth {
    pub(crate) options: AuthOptions,
    pub(crate) store: Arc<UniversalStore>,
    pub(crate) tokens: Arc<TokenManager>,
    strategies: Arc<RwLock<StrategyMap>>,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) progress: Arc<dyn ProgressIndicator>,
    navigator: Option<Arc<dyn Navigator>>,
    pub(crate) error_bus: ErrorBus,
    fsm: Mutex<SessionMachine>,
    watch_ids: Mutex<Vec<WatchId>>,
    pending_reset: Arc<PendingReset>,
}

/// User record, with `null` and `false` treated as absent.
fn present_user(value: Option<Value>) -> Option<Value> {
    value.filter(|v| !matches!(v, Value::Null | Value::Bool(false)))
}

fn as_name(value: Option<Value>) -> Option<String> {
    match value {
        Some(Value::String(s)) if !s.is_empty() => Some(s),
        _ => None,
    }
}

/// Local credential reset: clear the user and the active strategy's tokens.
fn reset_local(store: &UniversalStore, tokens: &TokenManager) {
    store.set_state(StorageKeys::LOGGED_IN, json!(false));
    store.set_state(StorageKeys::USER, Value::Null);

    if let Some(strategy) = as_name(store.get_state(StorageKeys::STRATEGY)) {
        tokens.set_token(&strategy, None);
        tokens.set_refresh_token(&strategy, None);
    }
    debug!("Session reset locally");
}

impl Auth {
    /// Create an engine over `store`, dispatching requests through
    /// `transport`.
    pub fn new(
        options: AuthOptions,
        store: Arc<UniversalStore>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let tokens = Arc::new(TokenManager::new(
            store.clone(),
            options.token_prefix.clone(),
            options.refresh_token_prefix.clone(),
        ));

        store.set_state(StorageKeys::USER, Value::Null);
        store.set_state(StorageKeys::LOGGED_IN, json!(false));
        store.set_state(StorageKeys::BUSY, json!(false));

        let strategies: Arc<RwLock<StrategyMap>> = Arc::new(RwLock::new(HashMap::new()));
        let pending_reset = Arc::new(PendingReset::default());

        let error_bus = ErrorBus::new();
        if !matches!(options.reset_on_error, ResetOnError::Disabled) {
            let policy = options.reset_on_error.clone();
            let store = store.clone();
            let tokens = tokens.clone();
            let strategies = strategies.clone();
            let pending = pending_reset.clone();
            error_bus.on_error(move |error, payload| {
                if payload.method == "reset" || pending.running.load(Ordering::SeqCst) {
                    return;
                }
                if !policy.applies(error, payload) {
                    return;
                }

                let has_hook = as_name(store.get_state(StorageKeys::STRATEGY))
                    .and_then(|name| strategies.read().get(&name).cloned())
                    .is_some_and(|strategy| strategy.capabilities().reset);
                if has_hook {
                    debug!(method = %payload.method, "Strategy reset scheduled");
                    pending.requested.store(true, Ordering::SeqCst);
                } else {
                    reset_local(&store, &tokens);
                }
            });
        }

        Self {
            options,
            store,
            tokens,
            strategies,
            transport,
            progress: Arc::new(NoProgress),
            navigator: None,
            error_bus,
            fsm: Mutex::new(SessionMachine::new()),
            watch_ids: Mutex::new(Vec::new()),
            pending_reset,
        }
    }

    /// Create an engine from a loaded [`Config`].
    pub fn from_config(
        config: &Config,
        store: Arc<UniversalStore>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self::new(AuthOptions::from(config), store, transport)
    }

    pub fn with_navigator(mut self, navigator: Arc<dyn Navigator>) -> Self {
        self.navigator = Some(navigator);
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressIndicator>) -> Self {
        self.progress = progress;
        self
    }

    pub fn options(&self) -> &AuthOptions {
        &self.options
    }

    pub fn store(&self) -> &Arc<UniversalStore> {
        &self.store
    }

    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    // ==========================================
    // Phase
    // ==========================================

    /// Current lifecycle phase.
    pub fn phase(&self) -> SessionPhase {
        SessionPhase::from(self.fsm.lock().state())
    }

    /// Feed the phase machine. Inputs invalid for the current phase are
    /// ignored: `busy` is advisory and overlapping calls are allowed.
    fn transition(&self, input: SessionMachineInput) {
        let mut fsm = self.fsm.lock();
        let old_phase = SessionPhase::from(fsm.state());

        if fsm.consume(&input).is_err() {
            debug!(input = ?input, phase = ?old_phase, "Ignoring phase input");
            return;
        }

        let new_phase = SessionPhase::from(fsm.state());
        if old_phase != new_phase {
            debug!(old_phase = ?old_phase, new_phase = ?new_phase, "Session phase transition");
        }
    }

    // ==========================================
    // Registry
    // ==========================================

    /// Register `strategy` under `name`. A later registration replaces an
    /// earlier one.
    pub fn register_strategy(&self, name: impl Into<String>, strategy: Arc<dyn Strategy>) {
        let name = name.into();
        if self.strategies.write().insert(name.clone(), strategy).is_some() {
            debug!(strategy = %name, "Replaced strategy");
        }
    }

    pub fn strategy(&self, name: &str) -> Option<Arc<dyn Strategy>> {
        self.strategies.read().get(name).cloned()
    }

    fn is_registered(&self, name: &str) -> bool {
        self.strategies.read().contains_key(name)
    }

    /// Name of the active strategy.
    pub fn strategy_name(&self) -> Option<String> {
        as_name(self.store.get_state(StorageKeys::STRATEGY))
    }

    pub(crate) fn active(&self) -> AuthResult<(String, Arc<dyn Strategy>)> {
        let name = self.strategy_name().ok_or(AuthError::NoStrategy)?;
        let strategy = self
            .strategy(&name)
            .ok_or_else(|| AuthError::UnknownStrategy(name.clone()))?;
        Ok((name, strategy))
    }

    // ==========================================
    // Lifecycle
    // ==========================================

    /// Resolve the active strategy, install the `loggedIn` watcher and mount.
    ///
    /// Completes without mounting when neither the persisted nor the default
    /// strategy is registered; strategy calls then fail with
    /// [`AuthError::NoStrategy`].
    pub async fn init(&self) -> AuthResult<()> {
        let default = self.options.default_strategy.clone();
        let persisted = as_name(
            self.store
                .sync_universal(StorageKeys::STRATEGY, default.clone().map(Value::String)),
        );

        let resolved = match persisted {
            Some(name) if self.is_registered(&name) => Some(name),
            _ => default.filter(|name| self.is_registered(name)),
        };

        let Some(name) = resolved else {
            warn!("No registered strategy to mount");
            self.store.set_state(StorageKeys::STRATEGY, Value::Null);
            return Ok(());
        };

        if self.strategy_name().as_deref() != Some(name.as_str()) {
            self.store
                .set_universal(StorageKeys::STRATEGY, json!(name));
        }

        if self.options.watch_logged_in {
            self.watch_logged_in();
        }

        info!(strategy = %name, "Session engine initialized");
        self.mounted().await
    }

    fn watch_logged_in(&self) {
        let Some(navigator) = self.navigator.clone() else {
            return;
        };
        let mut watch_ids = self.watch_ids.lock();
        if !watch_ids.is_empty() {
            return;
        }

        let store: Weak<UniversalStore> = Arc::downgrade(&self.store);
        let redirect = self.options.redirect.clone();
        let id = self.store.watch_state(StorageKeys::LOGGED_IN, move |new, _old| {
            let Some(store) = store.upgrade() else { return };
            if navigator.current_route().auth_disabled {
                return;
            }
            let transition = if new.as_bool().unwrap_or(false) {
                Transition::Home
            } else {
                Transition::Logout
            };
            apply_redirect(&store, navigator.as_ref(), &redirect, transition, false);
        });

        if let Some(id) = id {
            watch_ids.push(id);
        }
    }

    /// Switch the active strategy and mount it. Switching to the active
    /// strategy does nothing.
    pub async fn set_strategy(&self, name: &str) -> AuthResult<()> {
        if self.strategy_name().as_deref() == Some(name) {
            return Ok(());
        }
        if !self.is_registered(name) {
            return Err(AuthError::UnknownStrategy(name.to_string()));
        }

        self.store.set_universal(StorageKeys::STRATEGY, json!(name));
        info!(strategy = %name, "Switched strategy");
        self.mounted().await
    }

    /// Run the strategy's mount hook, or fetch the user once without one.
    pub async fn mounted(&self) -> AuthResult<()> {
        let (name, strategy) = self.active()?;
        self.transition(SessionMachineInput::Mount);

        if !strategy.capabilities().mounted {
            return self.fetch_user_once().await;
        }

        debug!(strategy = %name, "Mounting strategy");
        match strategy.mounted(self).await {
            Ok(()) => Ok(()),
            Err(e) => Err(self.report(e, "mounted").await),
        }
    }

    /// Log in with strategy-specific arguments.
    pub async fn login(&self, args: Value) -> AuthResult<Value> {
        let (name, strategy) = self.active()?;
        if !strategy.capabilities().login {
            return Ok(Value::Null);
        }

        self.transition(SessionMachineInput::LoginStarted);
        self.store.set_state(StorageKeys::BUSY, json!(true));

        let result = strategy.login(self, args).await;

        self.store.set_state(StorageKeys::BUSY, json!(false));
        self.transition(SessionMachineInput::LoginFinished);

        match result {
            Ok(value) => {
                info!(strategy = %name, "Login successful");
                Ok(value)
            }
            Err(e) => Err(self.report(e, "login").await),
        }
    }

    /// Log out through the strategy, or reset locally without a hook.
    pub async fn logout(&self) -> AuthResult<()> {
        let (name, strategy) = self.active()?;
        self.transition(SessionMachineInput::LogoutStarted);

        let result = if strategy.capabilities().logout {
            match strategy.logout(self).await {
                Ok(()) => Ok(()),
                Err(e) => Err(self.report(e, "logout").await),
            }
        } else {
            self.reset().await
        };

        self.transition(SessionMachineInput::LogoutFinished);
        if result.is_ok() {
            info!(strategy = %name, "Logged out");
        }
        result
    }

    /// Reset the session through the strategy, or clear it locally.
    pub async fn reset(&self) -> AuthResult<()> {
        let (_, strategy) = self.active()?;
        self.transition(SessionMachineInput::Reset);

        if !strategy.capabilities().reset {
            reset_local(&self.store, &self.tokens);
            return Ok(());
        }

        match strategy.reset(self).await {
            Ok(()) => Ok(()),
            Err(e) => Err(self.report(e, "reset").await),
        }
    }

    pub async fn fetch_user(&self) -> AuthResult<()> {
        let (_, strategy) = self.active()?;
        if !strategy.capabilities().fetch_user {
            return Ok(());
        }

        match strategy.fetch_user(self).await {
            Ok(()) => Ok(()),
            Err(e) => Err(self.report(e, "fetchUser").await),
        }
    }

    /// Fetch the user unless one is cached.
    pub async fn fetch_user_once(&self) -> AuthResult<()> {
        if self.user().is_some() {
            return Ok(());
        }
        self.fetch_user().await
    }

    // ==========================================
    // Session fields
    // ==========================================

    /// Set the user and `loggedIn`, then sync the profile.
    ///
    /// Profile sync failures are reported on the error bus like any other
    /// request failure but never returned from here.
    pub async fn set_user(&self, user: Value) {
        let user = present_user(Some(user));
        self.store
            .set_state(StorageKeys::LOGGED_IN, json!(user.is_some()));
        self.store
            .set_state(StorageKeys::USER, user.unwrap_or(Value::Null));

        if let Err(e) = self.sync_profile().await {
            debug!(error = %e, "Profile sync failed");
        }
    }

    pub fn user(&self) -> Option<Value> {
        present_user(self.store.get_state(StorageKeys::USER))
    }

    pub fn logged_in(&self) -> bool {
        self.store
            .get_state(StorageKeys::LOGGED_IN)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    pub fn busy(&self) -> bool {
        self.store
            .get_state(StorageKeys::BUSY)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    pub fn snapshot(&self) -> AuthSnapshot {
        AuthSnapshot {
            logged_in: self.logged_in(),
            busy: self.busy(),
            strategy: self.strategy_name(),
            user: self.user(),
            phase: self.phase(),
        }
    }

    /// Whether the active strategy's recorded scope grants `scope`.
    ///
    /// `None` means no scope is recorded, which is not the same as denied.
    pub fn has_scope(&self, scope: &str) -> Option<bool> {
        let name = self.strategy_name()?;
        self.tokens
            .get_scope(&name)
            .map(|granted: Scope| granted.contains(scope))
    }

    // ==========================================
    // Tokens
    // ==========================================

    pub fn set_token(&self, strategy: &str, token: Option<&str>) {
        self.tokens.set_token(strategy, token);
    }

    pub fn get_token(&self, strategy: &str) -> Option<String> {
        self.tokens.get_token(strategy)
    }

    pub fn sync_token(&self, strategy: &str) -> Option<String> {
        self.tokens.sync_token(strategy)
    }

    pub fn set_refresh_token(&self, strategy: &str, token: Option<&str>) {
        self.tokens.set_refresh_token(strategy, token);
    }

    pub fn get_refresh_token(&self, strategy: &str) -> Option<String> {
        self.tokens.get_refresh_token(strategy)
    }

    pub fn sync_refresh_token(&self, strategy: &str) -> Option<String> {
        self.tokens.sync_refresh_token(strategy)
    }

    // ==========================================
    // Errors and redirects
    // ==========================================

    /// Append an error listener.
    pub fn on_error<F>(&self, listener: F)
    where
        F: Fn(&AuthError, &ErrorPayload) + Send + Sync + 'static,
    {
        self.error_bus.on_error(listener);
    }

    /// Record and broadcast `error`.
    pub fn call_on_error(&self, error: &AuthError, method: &str) {
        self.error_bus.call_on_error(error, method);
    }

    pub fn current_error(&self) -> Option<AuthError> {
        self.error_bus.current_error()
    }

    pub fn clear_error(&self) {
        self.error_bus.clear_error();
    }

    /// Broadcast `error`, then run any reset it scheduled.
    pub(crate) async fn report(&self, error: AuthError, method: &str) -> AuthError {
        self.error_bus.call_on_error(&error, method);
        self.run_pending_reset().await;
        error
    }

    /// Run a strategy reset scheduled by the reset-on-error policy.
    ///
    /// Engine operations do this before returning a failure. Callers that
    /// broadcast their own errors through [`Auth::call_on_error`] call it
    /// afterwards.
    pub async fn run_pending_reset(&self) {
        if !self.pending_reset.requested.swap(false, Ordering::SeqCst) {
            return;
        }

        self.pending_reset.running.store(true, Ordering::SeqCst);
        // `reset` reports its own failures, which lands back here.
        let result = self.boxed_reset().await;
        self.pending_reset.running.store(false, Ordering::SeqCst);

        if let Err(e) = result {
            warn!(error = %e, "Reset after error failed");
        }
    }

    // Boxed outside the async body so the `reset` -> `report` ->
    // `run_pending_reset` recursion does not cycle on the `Send` check.
    fn boxed_reset(&self) -> BoxFuture<'_, AuthResult<()>> {
        Box::pin(self.reset())
    }

    /// Apply the redirect policy for `name` (`login`, `logout`, `home`).
    /// `no_router` asks the navigator for a full-page replace. Returns the
    /// target navigated to.
    pub fn redirect(&self, name: &str, no_router: bool) -> Option<String> {
        let transition = Transition::from_name(name)?;
        let navigator = self.navigator.as_ref()?;
        apply_redirect(
            &self.store,
            navigator.as_ref(),
            &self.options.redirect,
            transition,
            no_router,
        )
    }
}

impl Drop for Auth {
    fn drop(&mut self) {
        for id in self.watch_ids.lock().drain(..) {
            self.store.unwatch_state(id);
        }
    }
}
