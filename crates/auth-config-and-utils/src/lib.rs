//! Configuration, paths and logging bootstrap for the mikasa session engine.

mod config;
mod error;
mod logging;
mod paths;

pub use config::{
    Config, RedirectConfig, DEFAULT_LOCAL_PREFIX, DEFAULT_COOKIE_PREFIX, DEFAULT_LOG_LEVEL,
    DEFAULT_REFRESH_TOKEN_PREFIX, DEFAULT_TOKEN_PREFIX, DEFAULT_USER_ID_PROPERTY,
};
pub use error::{CoreError, CoreResult};
pub use logging::{init_logging, init_logging_for_service, init_logging_from_config};
pub use paths::Paths;
