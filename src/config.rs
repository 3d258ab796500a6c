//! Configuration loading via `ortho-config`.

use std::ffi::OsString;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

/// Default location of the instances file, relative to the working directory.
pub const DEFAULT_INSTANCES_FILE: &str = "create-instances.toml";

/// Application settings derived from defaults, configuration files,
/// environment variables, and CLI flags.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "USERDATA_FORGE",
    discovery(
        app_name = "userdata-forge",
        env_var = "USERDATA_FORGE_CONFIG_PATH",
        config_file_name = "userdata-forge.toml",
        dotfile_name = ".userdata-forge.toml",
        project_file_name = "userdata-forge.toml"
    )
)]
pub struct ForgeConfig {
    /// Instances file declaring server sections and their variables.
    #[ortho_config(default = DEFAULT_INSTANCES_FILE.to_owned())]
    pub instances_file: String,
    /// Directory that userdata templates and file directories are resolved
    /// against.
    #[ortho_config(default = ".".to_owned())]
    pub template_root: String,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }
}

impl ForgeConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {} or add {} to userdata-forge.toml",
                metadata.description, metadata.env_var, metadata.toml_key
            )));
        }
        Ok(())
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// still merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("userdata-forge")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation on required fields. Error messages include
    /// guidance on how to provide missing values via environment variables or
    /// configuration files.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_field(
            &self.instances_file,
            &FieldMetadata::new(
                "instances file",
                "USERDATA_FORGE_INSTANCES_FILE",
                "instances_file",
            ),
        )?;
        Self::require_field(
            &self.template_root,
            &FieldMetadata::new(
                "template root",
                "USERDATA_FORGE_TEMPLATE_ROOT",
                "template_root",
            ),
        )?;
        Ok(())
    }

    /// Instances file as a UTF-8 path.
    #[must_use]
    pub fn instances_path(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(self.instances_file.trim())
    }

    /// Template root as a UTF-8 path.
    #[must_use]
    pub fn template_root_path(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(self.template_root.trim())
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
