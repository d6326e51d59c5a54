#![allow(dead_code)]

use async_trait::async_trait;
use mikasa::{
    Auth, AuthError, AuthOptions, AuthResult, Capabilities, Endpoint, HttpResponse, Navigator,
    ProgressIndicator, Route, Strategy, StrategyOptions, Transport,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use universal_storage::{MemoryStorage, StorageBackend, StoreOptions, UniversalStore};

pub const TOKEN_ENDPOINT: &str = "https://auth.example.com/oauth/token";
pub const CREDENTIALS_ENDPOINT: &str = "/api/users/{id}/credentials";
pub const USER_UPDATE_ENDPOINT: &str = "/api/user/update";

/// Transport replaying scripted responses per URL and recording every request.
///
/// URLs without a script answer `200 {}`.
#[derive(Default)]
pub struct MockTransport {
    scripts: Mutex<HashMap<String, VecDeque<AuthResult<Value>>>>,
    requests: Mutex<Vec<Endpoint>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, url: &str, body: Value) {
        self.push(url, Ok(body));
    }

    pub fn reject(&self, url: &str, status: u16, body: Value) {
        self.push(url, Err(AuthError::Http { status, body }));
    }

    pub fn fail(&self, url: &str, error: AuthError) {
        self.push(url, Err(error));
    }

    fn push(&self, url: &str, result: AuthResult<Value>) {
        self.scripts
            .lock()
            .entry(url.to_string())
            .or_default()
            .push_back(result);
    }

    pub fn requests(&self) -> Vec<Endpoint> {
        self.requests.lock().clone()
    }

    pub fn requests_to(&self, url: &str) -> Vec<Endpoint> {
        self.requests
            .lock()
            .iter()
            .filter(|e| e.url.as_deref() == Some(url))
            .cloned()
            .collect()
    }

    pub fn calls_to(&self, url: &str) -> usize {
        self.requests_to(url).len()
    }

    /// URLs in dispatch order.
    pub fn urls(&self) -> Vec<String> {
        self.requests
            .lock()
            .iter()
            .filter_map(|e| e.url.clone())
            .collect()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn execute(&self, endpoint: &Endpoint) -> AuthResult<HttpResponse> {
        self.requests.lock().push(endpoint.clone());

        let url = endpoint.url.clone().unwrap_or_default();
        let scripted = self
            .scripts
            .lock()
            .get_mut(&url)
            .and_then(|queue| queue.pop_front());

        match scripted.unwrap_or_else(|| Ok(json!({}))) {
            Ok(body) => Ok(HttpResponse { status: 200, body }),
            Err(e) => Err(e),
        }
    }
}

/// Strategy with configurable hooks that counts every invocation.
pub struct MockStrategy {
    pub name: String,
    pub capabilities: Capabilities,
    pub options: StrategyOptions,
    /// User installed by `fetch_user` and `login`.
    pub user: Mutex<Value>,
    /// Error returned by the next hook call, if any.
    pub fail_with: Mutex<Option<AuthError>>,
    pub mounted_calls: AtomicUsize,
    pub login_calls: AtomicUsize,
    pub fetch_user_calls: AtomicUsize,
    pub logout_calls: AtomicUsize,
    pub reset_calls: AtomicUsize,
    pub tokens_set: Mutex<Vec<String>>,
    /// `busy` as seen from inside the login hook.
    pub busy_during_login: Mutex<Option<bool>>,
}

impl MockStrategy {
    pub fn new(name: &str, capabilities: Capabilities) -> Self {
        Self {
            name: name.to_string(),
            capabilities,
            options: StrategyOptions {
                token_endpoint: Some(TOKEN_ENDPOINT.to_string()),
                client_id: Some("web-client".to_string()),
            },
            user: Mutex::new(json!({"id": 42, "name": "Ada"})),
            fail_with: Mutex::new(None),
            mounted_calls: AtomicUsize::new(0),
            login_calls: AtomicUsize::new(0),
            fetch_user_calls: AtomicUsize::new(0),
            logout_calls: AtomicUsize::new(0),
            reset_calls: AtomicUsize::new(0),
            tokens_set: Mutex::new(Vec::new()),
            busy_during_login: Mutex::new(None),
        }
    }

    /// Strategy implementing every hook.
    pub fn full(name: &str) -> Arc<Self> {
        Arc::new(Self::new(name, Capabilities::all()))
    }

    /// Strategy implementing no hook at all.
    pub fn bare(name: &str) -> Arc<Self> {
        Arc::new(Self::new(name, Capabilities::default()))
    }

    pub fn fail_next(&self, error: AuthError) {
        *self.fail_with.lock() = Some(error);
    }

    fn take_failure(&self) -> AuthResult<()> {
        match self.fail_with.lock().take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Strategy for MockStrategy {
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn options(&self) -> StrategyOptions {
        self.options.clone()
    }

    async fn mounted(&self, auth: &Auth) -> AuthResult<()> {
        self.mounted_calls.fetch_add(1, Ordering::SeqCst);
        self.take_failure()?;
        auth.fetch_user_once().await
    }

    async fn login(&self, auth: &Auth, args: Value) -> AuthResult<Value> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        *self.busy_during_login.lock() = Some(auth.busy());
        self.take_failure()?;

        auth.set_token(&self.name, Some("Bearer access-1"));
        auth.set_refresh_token(&self.name, Some("refresh-1"));
        let user = self.user.lock().clone();
        auth.set_user(user).await;
        Ok(args)
    }

    async fn fetch_user(&self, auth: &Auth) -> AuthResult<()> {
        self.fetch_user_calls.fetch_add(1, Ordering::SeqCst);
        self.take_failure()?;
        let user = self.user.lock().clone();
        auth.set_user(user).await;
        Ok(())
    }

    async fn logout(&self, auth: &Auth) -> AuthResult<()> {
        self.logout_calls.fetch_add(1, Ordering::SeqCst);
        self.take_failure()?;
        auth.set_user(Value::Null).await;
        Ok(())
    }

    async fn reset(&self, auth: &Auth) -> AuthResult<()> {
        self.reset_calls.fetch_add(1, Ordering::SeqCst);
        self.take_failure()?;
        auth.set_user(Value::Null).await;
        auth.set_token(&self.name, None);
        auth.set_refresh_token(&self.name, None);
        Ok(())
    }

    fn set_token(&self, token: &str) -> AuthResult<()> {
        self.tokens_set.lock().push(token.to_string());
        Ok(())
    }
}

/// Navigator that records every navigation.
pub struct RecordingNavigator {
    pub route: Mutex<Route>,
    pub navigations: Mutex<Vec<(String, bool)>>,
}

impl RecordingNavigator {
    pub fn at(path: &str) -> Arc<Self> {
        Arc::new(Self {
            route: Mutex::new(Route::new(path)),
            navigations: Mutex::new(Vec::new()),
        })
    }

    pub fn go(&self, path: &str) {
        *self.route.lock() = Route::new(path);
    }

    pub fn disable_auth(&self) {
        self.route.lock().auth_disabled = true;
    }

    pub fn targets(&self) -> Vec<String> {
        self.navigations.lock().iter().map(|(t, _)| t.clone()).collect()
    }
}

impl Navigator for RecordingNavigator {
    fn current_route(&self) -> Route {
        self.route.lock().clone()
    }

    fn navigate(&self, to: &str, replace: bool) {
        self.navigations.lock().push((to.to_string(), replace));
        *self.route.lock() = Route::new(to);
    }
}

/// Progress indicator counting completions and failures.
#[derive(Default)]
pub struct RecordingProgress {
    pub finished: AtomicUsize,
    pub failed: AtomicUsize,
}

impl RecordingProgress {
    pub fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }

    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }
}

impl ProgressIndicator for RecordingProgress {
    fn finish(&self) {
        self.finished.fetch_add(1, Ordering::SeqCst);
    }

    fn fail(&self) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Engine plus every collaborator, wired for inspection.
pub struct Harness {
    pub auth: Auth,
    pub store: Arc<UniversalStore>,
    pub cookies: Arc<MemoryStorage>,
    pub local: Arc<MemoryStorage>,
    pub transport: Arc<MockTransport>,
    pub navigator: Arc<RecordingNavigator>,
    pub progress: Arc<RecordingProgress>,
}

pub fn default_options() -> AuthOptions {
    AuthOptions {
        default_strategy: Some("local".to_string()),
        credentials_endpoint: Some(CREDENTIALS_ENDPOINT.to_string()),
        ..Default::default()
    }
}

pub fn harness(options: AuthOptions) -> Harness {
    harness_with_storage(
        options,
        Arc::new(MemoryStorage::new()),
        Arc::new(MemoryStorage::new()),
    )
}

pub fn harness_with_storage(
    options: AuthOptions,
    cookies: Arc<MemoryStorage>,
    local: Arc<MemoryStorage>,
) -> Harness {
    let store = Arc::new(
        UniversalStore::new(StoreOptions::default())
            .with_cookies(cookies.clone())
            .with_local(local.clone()),
    );
    let transport = MockTransport::new();
    let navigator = RecordingNavigator::at("/");
    let progress = Arc::new(RecordingProgress::default());

    let auth = Auth::new(options, store.clone(), transport.clone())
        .with_navigator(navigator.clone())
        .with_progress(progress.clone());

    Harness {
        auth,
        store,
        cookies,
        local,
        transport,
        navigator,
        progress,
    }
}

/// Record the caller's errors as `(method, error)` pairs.
pub fn record_errors(auth: &Auth) -> Arc<Mutex<Vec<(String, AuthError)>>> {
    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = errors.clone();
    auth.on_error(move |error, payload| {
        sink.lock().push((payload.method.clone(), error.clone()));
    });
    errors
}

/// Raw persisted value of `key`.
pub fn raw(storage: &MemoryStorage, key: &str) -> Option<String> {
    storage.get(key).unwrap()
}

pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}
