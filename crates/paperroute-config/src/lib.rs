//! PaperRoute Config - Configuration loading and validation.

mod config;
mod env;
mod error;
mod paths;

pub use config::*;
pub use error::{ConfigError, ConfigResult};
pub use paths::AppPaths;
