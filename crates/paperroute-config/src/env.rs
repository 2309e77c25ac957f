//! `${VAR}` substitution over parsed configuration values.

use crate::error::{ConfigError, ConfigResult};
use toml::Value;

/// Replace environment variable references in a single string.
pub(crate) fn substitute_str(value: &str) -> ConfigResult<String> {
    shellexpand::env(value)
        .map(|expanded| expanded.into_owned())
        .map_err(|e| ConfigError::MissingEnvVar(e.var_name))
}

/// Walk a parsed TOML tree and substitute every string in place.
pub(crate) fn substitute_env_vars(value: &mut Value) -> ConfigResult<()> {
    match value {
        Value::String(s) => {
            if s.contains('$') {
                *s = substitute_str(s)?;
            }
        }
        Value::Array(items) => {
            for item in items {
                substitute_env_vars(item)?;
            }
        }
        Value::Table(table) => {
            for (_, item) in table.iter_mut() {
                substitute_env_vars(item)?;
            }
        }
        _ => {}
    }
    Ok(())
}
