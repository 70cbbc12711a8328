//! core::config::schema
//!
//! Configuration file schema.
//!
//! # Example
//!
//! ```toml
//! [defaults]
//! address = "http://consul.internal:8500"
//! token_env = "CONSUL_HTTP_TOKEN"
//! timeout_secs = 5
//!
//! [environments.staging]
//! prefix = "staging/app"
//!
//! [environments.prod]
//! prefix = "prod/app"
//! address = "https://consul.prod.internal:8501"
//! datacenter = "eu-west"
//! token_env = "CONSUL_PROD_TOKEN"
//! ```
//!
//! # Validation
//!
//! Values are checked right after parsing: environment names are
//! restricted to a safe character set, prefixes must parse as key paths,
//! addresses must be http(s) URLs and timeouts must be positive.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::ConfigError;
use crate::core::path::KeyPath;

/// The whole configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    /// Connection settings shared by every environment.
    pub defaults: ConnectionSettings,

    /// Environments by name.
    pub environments: BTreeMap<String, EnvironmentSettings>,
}

impl ConfigFile {
    /// Validate every value.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` naming the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.defaults.validate("defaults")?;

        for (name, env) in &self.environments {
            validate_env_name(name)?;
            env.validate(name)?;
        }

        Ok(())
    }
}

/// Connection settings (all optional so they can layer).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ConnectionSettings {
    /// Consul HTTP address.
    pub address: Option<String>,

    /// ACL token, inline.
    pub token: Option<String>,

    /// Name of an environment variable holding the ACL token.
    pub token_env: Option<String>,

    /// Datacenter.
    pub datacenter: Option<String>,

    /// Per-call timeout in seconds.
    pub timeout_secs: Option<u64>,
}

impl ConnectionSettings {
    fn validate(&self, scope: &str) -> Result<(), ConfigError> {
        if let Some(address) = &self.address {
            validate_address(address)
                .map_err(|msg| ConfigError::InvalidValue(format!("{}.address: {}", scope, msg)))?;
        }

        if self.token.is_some() && self.token_env.is_some() {
            return Err(ConfigError::InvalidValue(format!(
                "{}: set either token or token_env, not both",
                scope
            )));
        }

        if let Some(var) = &self.token_env {
            if var.is_empty() {
                return Err(ConfigError::InvalidValue(format!(
                    "{}.token_env cannot be empty",
                    scope
                )));
            }
        }

        if let Some(dc) = &self.datacenter {
            if dc.is_empty() {
                return Err(ConfigError::InvalidValue(format!(
                    "{}.datacenter cannot be empty",
                    scope
                )));
            }
        }

        if self.timeout_secs == Some(0) {
            return Err(ConfigError::InvalidValue(format!(
                "{}.timeout_secs must be greater than zero",
                scope
            )));
        }

        Ok(())
    }
}

/// One environment.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct EnvironmentSettings {
    /// Key prefix of the environment. `""` or `"/"` means the whole store.
    pub prefix: String,

    /// Overrides `defaults.address`.
    pub address: Option<String>,

    /// Overrides `defaults.token`.
    pub token: Option<String>,

    /// Overrides `defaults.token_env`.
    pub token_env: Option<String>,

    /// Overrides `defaults.datacenter`.
    pub datacenter: Option<String>,

    /// Overrides `defaults.timeout_secs`.
    pub timeout_secs: Option<u64>,
}

impl EnvironmentSettings {
    fn validate(&self, name: &str) -> Result<(), ConfigError> {
        KeyPath::parse(&self.prefix).map_err(|e| {
            ConfigError::InvalidValue(format!("environments.{}.prefix: {}", name, e))
        })?;

        self.connection().validate(&format!("environments.{}", name))
    }

    /// This environment's own connection overrides.
    pub fn connection(&self) -> ConnectionSettings {
        ConnectionSettings {
            address: self.address.clone(),
            token: self.token.clone(),
            token_env: self.token_env.clone(),
            datacenter: self.datacenter.clone(),
            timeout_secs: self.timeout_secs,
        }
    }
}

fn validate_env_name(name: &str) -> Result<(), ConfigError> {
    if name.is_empty() {
        return Err(ConfigError::InvalidValue(
            "environment name cannot be empty".to_string(),
        ));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(ConfigError::InvalidValue(format!(
            "invalid environment name '{}': use letters, digits, '-', '_' or '.'",
            name
        )));
    }
    Ok(())
}

/// Normalize an address, adding `http://` when no scheme is given.
///
/// `CONSUL_HTTP_ADDR` is commonly set as bare `host:port`.
pub fn normalize_address(address: &str) -> String {
    let trimmed = address.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    }
}

fn validate_address(address: &str) -> Result<(), String> {
    let normalized = normalize_address(address);
    let host = normalized
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or_default();
    if host.is_empty() {
        return Err(format!("'{}' has no host", address));
    }
    if host.contains(char::is_whitespace) {
        return Err(format!("'{}' contains whitespace", address));
    }
    Ok(())
}
