//! Redirect policy.
//!
//! [`RedirectPolicy::decide`] is pure: it maps a transition and the current
//! route to a navigation target plus the bookkeeping to apply to the deferred
//! "return-to" key. [`apply_redirect`] performs that bookkeeping against the
//! store and drives the [`Navigator`].

use auth_config_and_utils::RedirectConfig;
use serde_json::{json, Value};
use tracing::debug;
use universal_storage::{StorageKeys, UniversalStore};

/// Named redirect transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Login,
    Logout,
    Home,
}

impl Transition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transition::Login => "login",
            Transition::Logout => "logout",
            Transition::Home => "home",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "login" => Some(Transition::Login),
            "logout" => Some(Transition::Logout),
            "home" => Some(Transition::Home),
            _ => None,
        }
    }
}

/// The route the host is currently showing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Route {
    pub path: String,
    /// Path including query and fragment.
    pub full_path: String,
    /// The route opted out of automatic auth redirects.
    pub auth_disabled: bool,
}

impl Route {
    pub fn new(full_path: impl Into<String>) -> Self {
        let full_path = full_path.into();
        let path = full_path
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_string();
        Self {
            path,
            full_path,
            auth_disabled: false,
        }
    }
}

/// Host router.
pub trait Navigator: Send + Sync {
    fn current_route(&self) -> Route;

    /// Navigate to `to`. `replace` asks for a full-page replace instead of a
    /// router push.
    fn navigate(&self, to: &str, replace: bool);
}

/// Outcome of [`RedirectPolicy::decide`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RedirectDecision {
    /// Where to go, or `None` to stay.
    pub target: Option<String>,
    /// Path to record as the deferred return-to value.
    pub remember: Option<String>,
    /// The deferred value was read and must be cleared.
    pub consume_deferred: bool,
}

/// Relative URL: starts with a single `/`.
pub fn is_relative_url(url: &str) -> bool {
    url.starts_with('/') && !url.starts_with("//")
}

/// Compare two locations ignoring trailing slashes. The query string is
/// ignored unless `with_query` is set.
pub fn is_same_url(a: &str, b: &str, with_query: bool) -> bool {
    fn normalize(url: &str, with_query: bool) -> &str {
        let url = if with_query {
            url
        } else {
            url.split('?').next().unwrap_or_default()
        };
        url.trim_end_matches('/')
    }
    normalize(a, with_query) == normalize(b, with_query)
}

/// Pure redirect decision over a [`RedirectConfig`].
pub struct RedirectPolicy<'a> {
    config: &'a RedirectConfig,
}

impl<'a> RedirectPolicy<'a> {
    pub fn new(config: &'a RedirectConfig) -> Self {
        Self { config }
    }

    fn configured(&self, transition: Transition) -> Option<&'a str> {
        let target = match transition {
            Transition::Login => &self.config.login,
            Transition::Logout => &self.config.logout,
            Transition::Home => &self.config.home,
        };
        target.as_deref().filter(|t| !t.is_empty())
    }

    /// Decide where `transition` leads from `route`.
    ///
    /// `deferred` is the currently recorded return-to value. The loop check
    /// runs on the final target, after any rewrite.
    pub fn decide(
        &self,
        transition: Transition,
        route: &Route,
        deferred: Option<&str>,
    ) -> RedirectDecision {
        let mut decision = RedirectDecision::default();

        let Some(configured) = self.configured(transition) else {
            return decision;
        };
        let mut to = configured.to_string();

        let from = if self.config.full_path_redirect {
            route.full_path.as_str()
        } else {
            route.path.as_str()
        };
        let with_query = self.config.full_path_redirect;

        if self.config.rewrite_redirects {
            match transition {
                Transition::Login
                    if is_relative_url(from) && !is_same_url(&to, from, with_query) =>
                {
                    decision.remember = Some(from.to_string());
                }
                Transition::Home => {
                    decision.consume_deferred = deferred.is_some();
                    if let Some(redirect) = deferred.filter(|r| is_relative_url(r)) {
                        to = redirect.to_string();
                    }
                }
                _ => {}
            }
        }

        if !is_same_url(&to, from, with_query) {
            decision.target = Some(to);
        }
        decision
    }
}

/// Run the redirect policy for `transition`, updating the deferred return-to
/// key and navigating. Returns the target navigated to.
pub fn apply_redirect(
    store: &UniversalStore,
    navigator: &dyn Navigator,
    config: &RedirectConfig,
    transition: Transition,
    no_router: bool,
) -> Option<String> {
    let route = navigator.current_route();
    let deferred = store
        .get_universal(StorageKeys::REDIRECT)
        .and_then(|v| match v {
            Value::String(s) => Some(s),
            _ => None,
        });

    let decision = RedirectPolicy::new(config).decide(transition, &route, deferred.as_deref());

    if let Some(remember) = &decision.remember {
        store.set_universal(StorageKeys::REDIRECT, json!(remember));
    }
    if decision.consume_deferred {
        store.remove_universal(StorageKeys::REDIRECT);
    }

    let target = decision.target?;
    debug!(
        transition = transition.as_str(),
        from = %route.full_path,
        to = %target,
        "Redirecting"
    );
    navigator.navigate(&target, no_router);
    Some(target)
}
