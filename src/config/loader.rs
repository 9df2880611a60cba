//! Configuration loading from flags and the environment.

use thiserror::Error;

use crate::config::cli::Flags;
use crate::config::schema::Options;
use crate::config::validation::{validate, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Switches read from the environment rather than from flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnvToggles {
    /// `DEBUG` is set and non-empty.
    pub debug: bool,
    /// `PROFILE` is set and non-empty.
    pub profile: bool,
}

impl EnvToggles {
    pub fn from_env() -> Self {
        Self {
            debug: is_set("DEBUG"),
            profile: is_set("PROFILE"),
        }
    }
}

fn is_set(name: &str) -> bool {
    std::env::var_os(name).is_some_and(|value| !value.is_empty())
}

/// Validate parsed flags into [`Options`].
pub fn load(flags: Flags, env: EnvToggles) -> Result<Options, ConfigError> {
    validate(flags, env).map_err(ConfigError::Validation)
}
