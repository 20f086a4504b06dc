//! Configuration loading, validation, and env substitution.
//!
//! Config files: `stagehand.toml`, `stagehand.yaml`, or `stagehand.json`
//! Searched in `./` then `~/.config/stagehand/`.
//!
//! Supports `${ENV_VAR}` substitution in all string values.

pub mod env_subst;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    loader::{config_dir, discover_and_load, find_config_file, load_config},
    schema::{
        ProvisionConfig, ProvisionMode, RelayConfig, RouterConfig, StagehandConfig,
        TelegramConfig, TransitionMap,
    },
    validate::{Diagnostic, Severity, ValidationResult, validate_config, validate_file},
};
