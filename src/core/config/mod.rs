//! core::config
//!
//! Configuration loading and environment resolution.
//!
//! # Locations
//!
//! The first of these that exists is loaded:
//! 1. `--config <path>` (must exist)
//! 2. `$CONSULKV_CONFIG`
//! 3. `$XDG_CONFIG_HOME/consulkv/config.toml`
//! 4. `~/.consulkv/config.toml`
//!
//! No file at all is not an error; the resulting config simply has no
//! environments.
//!
//! # Precedence
//!
//! Connection fields resolve in this order (later overrides earlier):
//! 1. Built-in defaults
//! 2. `CONSUL_HTTP_ADDR` / `CONSUL_HTTP_TOKEN`
//! 3. `[defaults]`
//! 4. `[environments.<name>]`
//!
//! Validation happens once, here. Downstream code receives
//! [`Environment`] values and never re-checks them.
//!
//! # Example
//!
//! ```no_run
//! use consulkv::core::config::Config;
//!
//! let config = Config::load(None).unwrap();
//! let prod = config.environment("prod").unwrap();
//! println!("{} -> {}", prod.name, prod.prefix);
//! ```

pub mod schema;

pub use schema::{ConfigFile, ConnectionSettings, EnvironmentSettings};

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::core::path::KeyPath;
use crate::core::types::{Connection, Environment};

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV_VAR: &str = "CONSULKV_CONFIG";

/// Errors from configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("config file '{0}' does not exist")]
    NotFound(PathBuf),

    #[error("invalid config value: {0}")]
    InvalidValue(String),

    #[error("environment variable '{var}' (token_env of '{env}') is not set")]
    MissingTokenVar { env: String, var: String },

    #[error("unknown environment '{name}'{}", known_hint(.known))]
    UnknownEnvironment { name: String, known: Vec<String> },
}

fn known_hint(known: &[String]) -> String {
    if known.is_empty() {
        " (no environments configured)".to_string()
    } else {
        format!(" (known: {})", known.join(", "))
    }
}

/// Loaded, validated configuration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    environments: BTreeMap<String, Environment>,
    path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from `explicit` or the default locations.
    ///
    /// # Errors
    ///
    /// Returns an error if an explicit path is missing, or a file exists
    /// but cannot be read, parsed or validated.
    pub fn load(explicit: Option<&Path>) -> Result<Config, ConfigError> {
        let path = match explicit {
            Some(path) if !path.exists() => {
                return Err(ConfigError::NotFound(path.to_path_buf()));
            }
            Some(path) => Some(path.to_path_buf()),
            None => Self::find_default(),
        };

        let Some(path) = path else {
            tracing::debug!("no config file found, using empty configuration");
            return Self::resolve(ConfigFile::default(), None, env_lookup);
        };

        tracing::debug!(path = %path.display(), "loading config");
        let file = Self::read_file(&path)?;
        Self::resolve(file, Some(path), env_lookup)
    }

    /// Parse a TOML document.
    ///
    /// # Errors
    ///
    /// Returns `ParseError` or a validation error.
    pub fn from_toml_str(contents: &str) -> Result<Config, ConfigError> {
        let file: ConfigFile = toml::from_str(contents).map_err(|e| ConfigError::ParseError {
            path: PathBuf::from("<inline>"),
            message: e.to_string(),
        })?;
        Self::resolve(file, None, env_lookup)
    }

    /// Search the default locations.
    fn find_default() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        if let Ok(xdg_home) = std::env::var("XDG_CONFIG_HOME") {
            let path = PathBuf::from(xdg_home).join("consulkv/config.toml");
            if path.exists() {
                return Some(path);
            }
        }

        if let Some(home) = dirs::home_dir() {
            let path = home.join(".consulkv/config.toml");
            if path.exists() {
                return Some(path);
            }
        }

        None
    }

    fn read_file(path: &Path) -> Result<ConfigFile, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&contents).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Validate a parsed file and resolve every environment.
    ///
    /// `lookup` reads process environment variables; tests pass a closure.
    pub fn resolve<F>(
        file: ConfigFile,
        path: Option<PathBuf>,
        lookup: F,
    ) -> Result<Config, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        file.validate()?;

        let mut environments = BTreeMap::new();
        for (name, settings) in &file.environments {
            let env = resolve_environment(name, settings, &file.defaults, &lookup)?;
            environments.insert(name.clone(), env);
        }

        Ok(Config { environments, path })
    }

    /// Look up an environment by name.
    ///
    /// # Errors
    ///
    /// Returns `UnknownEnvironment` listing the configured names.
    pub fn environment(&self, name: &str) -> Result<&Environment, ConfigError> {
        self.environments
            .get(name)
            .ok_or_else(|| ConfigError::UnknownEnvironment {
                name: name.to_string(),
                known: self.environments.keys().cloned().collect(),
            })
    }

    /// All environments, ordered by name.
    pub fn environments(&self) -> impl Iterator<Item = &Environment> {
        self.environments.values()
    }

    /// The file this configuration was loaded from, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

fn env_lookup(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|v| !v.is_empty())
}

fn resolve_environment<F>(
    name: &str,
    settings: &EnvironmentSettings,
    defaults: &ConnectionSettings,
    lookup: &F,
) -> Result<Environment, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let overrides = settings.connection();

    let address = overrides
        .address
        .clone()
        .or_else(|| defaults.address.clone())
        .or_else(|| lookup("CONSUL_HTTP_ADDR"))
        .map(|a| schema::normalize_address(&a))
        .unwrap_or_else(|| Connection::DEFAULT_ADDRESS.to_string());

    // An environment's own token settings shadow the defaults as a unit.
    let (token, token_env) = if overrides.token.is_some() || overrides.token_env.is_some() {
        (overrides.token.clone(), overrides.token_env.clone())
    } else {
        (defaults.token.clone(), defaults.token_env.clone())
    };
    let token = match (token, token_env) {
        (Some(token), _) => Some(token),
        (None, Some(var)) => Some(lookup(&var).ok_or_else(|| ConfigError::MissingTokenVar {
            env: name.to_string(),
            var: var.clone(),
        })?),
        (None, None) => lookup("CONSUL_HTTP_TOKEN"),
    };

    let timeout = overrides
        .timeout_secs
        .or(defaults.timeout_secs)
        .map(Duration::from_secs)
        .unwrap_or(Connection::DEFAULT_TIMEOUT);

    let prefix = KeyPath::parse(&settings.prefix).map_err(|e| {
        ConfigError::InvalidValue(format!("environments.{}.prefix: {}", name, e))
    })?;

    Ok(Environment {
        name: name.to_string(),
        prefix,
        connection: Connection {
            address,
            token,
            datacenter: overrides.datacenter.or_else(|| defaults.datacenter.clone()),
            timeout,
        },
    })
}
