//! Stage configuration
//!
//! Sources, lowest priority first:
//! 1. Built-in defaults
//! 2. TOML file (explicit path, `FLOWSCRIPT_CONFIG_PATH`, or `./flowscript.toml`)
//! 3. Environment variables: `FLOWSCRIPT_POOL__MAX_CONCURRENT_TASKS=4`
//!    (a `.env` file is loaded first if present)
//! 4. Builder overrides
//!
//! ```toml
//! [script]
//! script_file = "transform.flow"
//!
//! [pool]
//! max_concurrent_tasks = 4
//!
//! [properties]
//! separator = ";"
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::interpreter::EngineEnvironment;
use crate::pool::EngineFailurePolicy;

pub const CONFIG_PATH_ENV: &str = "FLOWSCRIPT_CONFIG_PATH";
pub const DEFAULT_CONFIG_FILE: &str = "flowscript.toml";
const ENV_PREFIX: &str = "FLOWSCRIPT";

/* ===================== Settings ===================== */

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub script: ScriptSettings,

    #[serde(default)]
    pub pool: PoolSettings,

    /// Free-form values readable from scripts via `context.property(name)`
    #[serde(default)]
    pub properties: BTreeMap<String, serde_json::Value>,
}

/// Where the script comes from and how interpreters are built
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptSettings {
    /// Path to a script file; mutually exclusive with `script_body`
    #[serde(default)]
    pub script_file: Option<PathBuf>,

    /// Inline script text; mutually exclusive with `script_file`
    #[serde(default)]
    pub script_body: Option<String>,

    #[serde(default)]
    pub interpreter_home: Option<PathBuf>,

    /// Skip site scripts under `<interpreter_home>/site`
    #[serde(default = "default_vanilla")]
    pub vanilla: bool,

    #[serde(default)]
    pub max_operations: Option<u64>,
}

impl Default for ScriptSettings {
    fn default() -> Self {
        Self {
            script_file: None,
            script_body: None,
            interpreter_home: None,
            vanilla: default_vanilla(),
            max_operations: None,
        }
    }
}

impl ScriptSettings {
    pub fn engine_environment(&self) -> EngineEnvironment {
        EngineEnvironment {
            interpreter_home: self.interpreter_home.clone(),
            vanilla: self.vanilla,
            max_operations: self.max_operations,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolSettings {
    /// Pool capacity; also the number of tasks allowed to run at once
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,

    /// Give up waiting for an interpreter after this long; wait forever if unset
    #[serde(default)]
    pub acquire_timeout_ms: Option<u64>,

    #[serde(default)]
    pub on_engine_failure: EngineFailurePolicy,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: default_max_concurrent_tasks(),
            acquire_timeout_ms: None,
            on_engine_failure: EngineFailurePolicy::default(),
        }
    }
}

impl PoolSettings {
    pub fn acquire_timeout(&self) -> Option<Duration> {
        self.acquire_timeout_ms.map(Duration::from_millis)
    }
}

fn default_vanilla() -> bool {
    true
}

fn default_max_concurrent_tasks() -> usize {
    1
}

/* ===================== Loading ===================== */

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Load from the default sources
    pub fn load() -> Result<Self, ConfigError> {
        Self::builder().build()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool.max_concurrent_tasks == 0 {
            return Err(ConfigError::InvalidConcurrency);
        }
        Ok(())
    }

    /// Render the effective configuration
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

/// Layers configuration sources and explicit overrides
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config_path: Option<PathBuf>,
    overrides: Vec<(String, config::Value)>,
}

impl ConfigBuilder {
    /// Read this file instead of searching for one
    pub fn config_path(mut self, path: Option<PathBuf>) -> Self {
        self.config_path = path;
        self
    }

    pub fn script_body(self, body: impl Into<String>) -> Self {
        self.set("script.script_body", body.into())
    }

    pub fn script_file(self, path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_string_lossy().into_owned();
        self.set("script.script_file", path)
    }

    pub fn max_concurrent_tasks(self, n: usize) -> Self {
        self.set("pool.max_concurrent_tasks", n as i64)
    }

    pub fn acquire_timeout_ms(self, ms: u64) -> Self {
        self.set("pool.acquire_timeout_ms", ms as i64)
    }

    pub fn property(self, name: &str, value: impl Into<String>) -> Self {
        self.set(&format!("properties.{}", name), value.into())
    }

    /// Override any key, using dotted paths such as `pool.max_concurrent_tasks`
    pub fn set(mut self, key: &str, value: impl Into<config::Value>) -> Self {
        self.overrides.push((key.to_string(), value.into()));
        self
    }

    pub fn build(self) -> Result<Config, ConfigError> {
        dotenvy::dotenv().ok();

        let mut builder = config::Config::builder();

        let explicit = self
            .config_path
            .or_else(|| std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from));
        builder = match explicit {
            Some(path) => builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(true),
            ),
            None => builder.add_source(
                config::File::with_name(DEFAULT_CONFIG_FILE)
                    .format(config::FileFormat::Toml)
                    .required(false),
            ),
        };

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        for (key, value) in self.overrides {
            builder = builder.set_override(key, value)?;
        }

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn defaults() {
        let config = Config::default();
        assert!(config.script.vanilla);
        assert_eq!(config.pool.max_concurrent_tasks, 1);
        assert_eq!(config.pool.acquire_timeout(), None);
        assert_eq!(config.pool.on_engine_failure, EngineFailurePolicy::Degrade);
    }

    #[test]
    fn loads_file_and_applies_overrides() {
        let file = write_config(
            r#"
            [script]
            script_body = "1 + 1"
            vanilla = false

            [pool]
            max_concurrent_tasks = 2
            on_engine_failure = "fail_fast"

            [properties]
            separator = ";"
            "#,
        );

        let config = Config::builder()
            .config_path(Some(file.path().to_path_buf()))
            .max_concurrent_tasks(8)
            .acquire_timeout_ms(250)
            .build()
            .unwrap();

        assert_eq!(config.script.script_body.as_deref(), Some("1 + 1"));
        assert!(!config.script.vanilla);
        assert_eq!(config.pool.max_concurrent_tasks, 8);
        assert_eq!(config.pool.acquire_timeout(), Some(Duration::from_millis(250)));
        assert_eq!(config.pool.on_engine_failure, EngineFailurePolicy::FailFast);
        assert_eq!(config.properties["separator"], serde_json::json!(";"));
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let file = write_config("[pool]\nmax_concurrent_tasks = 0\n");
        let err = Config::builder()
            .config_path(Some(file.path().to_path_buf()))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidConcurrency));
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let err = Config::builder()
            .config_path(Some(PathBuf::from("/no/such/flowscript.toml")))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Load(_)));
    }

    #[test]
    fn renders_as_toml() {
        let file = write_config("[script]\nscript_body = \"x = 1\"\n");
        let config = Config::builder()
            .config_path(Some(file.path().to_path_buf()))
            .build()
            .unwrap();
        let rendered = config.to_toml().unwrap();
        assert!(rendered.contains("script_body = \"x = 1\""));
        assert!(rendered.contains("max_concurrent_tasks = 1"));
    }
}
