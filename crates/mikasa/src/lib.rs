//! Authentication session engine.
//!
//! This crate provides:
//! - [`Auth`]: strategy-pluggable session lifecycle (mount, login, logout,
//!   reset, fetch user) over a [`UniversalStore`](universal_storage::UniversalStore)
//! - [`TokenManager`]: per-strategy access token, refresh token, expiration
//!   and scope records
//! - A request pipeline that refreshes expired tokens before dispatching,
//!   with one credential recovery on a rejected refresh
//! - [`ErrorBus`]: ordered listeners for every unrecovered failure
//! - [`RedirectPolicy`]: loop-safe login/logout/home redirects
//! - Explicit FSM-based phase tracking

mod auth_fsm;
mod error;
mod error_bus;
mod redirect;
mod request;
mod session;
mod strategy;
mod tokens;
mod transport;

pub use auth_fsm::session_machine;
pub use auth_fsm::{SessionMachine, SessionMachineInput, SessionMachineState, SessionPhase};
pub use error::{AuthError, AuthResult};
pub use error_bus::{ErrorBus, ErrorListener, ErrorPayload};
pub use redirect::{
    apply_redirect, is_relative_url, is_same_url, Navigator, RedirectDecision, RedirectPolicy,
    Route, Transition,
};
pub use session::{Auth, AuthOptions, AuthSnapshot, ResetOnError, ResetPredicate};
pub use strategy::{Capabilities, Strategy, StrategyOptions};
pub use tokens::{Scope, TokenManager};
pub use transport::{
    lookup_path, Body, Endpoint, HttpResponse, Method, NoProgress, ProgressIndicator,
    ReqwestTransport, Transport,
};
