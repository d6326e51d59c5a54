//! Fixed storage keys.

/// Keys shared by the session engine and its collaborators.
pub struct StorageKeys;

impl StorageKeys {
    /// Name of the active strategy (universal)
    pub const STRATEGY: &'static str = "strategy";

    /// Deferred "return-to" path (universal, one-shot)
    pub const REDIRECT: &'static str = "redirect";

    /// Cached user record (state)
    pub const USER: &'static str = "user";

    /// Whether a user is logged in (state)
    pub const LOGGED_IN: &'static str = "loggedIn";

    /// Login in flight (state)
    pub const BUSY: &'static str = "busy";

    /// Key prefix that keeps a state key out of the observable tier.
    pub const PRIVATE_PREFIX: char = '_';
}
