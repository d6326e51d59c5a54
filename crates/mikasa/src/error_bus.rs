//! Ordered error listeners.

use crate::AuthError;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::warn;

/// Context delivered with every error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorPayload {
    /// Failing operation (`"login"`, `"mounted"`, `"completeRequest"`, ...).
    pub method: String,
}

/// Error listener.
pub type ErrorListener = Arc<dyn Fn(&AuthError, &ErrorPayload) + Send + Sync>;

/// Synchronous fan-out of unrecovered failures.
///
/// Listeners run in registration order on the caller's task. They must not
/// panic: a panicking listener unwinds through [`ErrorBus::call_on_error`]
/// and the listeners after it are never called.
#[derive(Default)]
pub struct ErrorBus {
    listeners: Mutex<Vec<ErrorListener>>,
    current: Mutex<Option<AuthError>>,
}

impl ErrorBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a listener.
    pub fn on_error<F>(&self, listener: F)
    where
        F: Fn(&AuthError, &ErrorPayload) + Send + Sync + 'static,
    {
        self.listeners.lock().push(Arc::new(listener));
    }

    /// Record `error` as the current error and deliver it to every listener.
    pub fn call_on_error(&self, error: &AuthError, method: &str) {
        warn!(method, error = %error, "Session error");

        *self.current.lock() = Some(error.clone());

        let payload = ErrorPayload {
            method: method.to_string(),
        };
        // Listeners may register further listeners or report again.
        let listeners: Vec<ErrorListener> = self.listeners.lock().clone();
        for listener in listeners {
            listener(error, &payload);
        }
    }

    /// Most recently recorded error.
    pub fn current_error(&self) -> Option<AuthError> {
        self.current.lock().clone()
    }

    pub fn clear_error(&self) {
        *self.current.lock() = None;
    }

    #[cfg(test)]
    pub(crate) fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }
}
