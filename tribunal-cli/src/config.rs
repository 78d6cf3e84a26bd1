/// Layered configuration for the tribunal CLI.
///
/// Sources, lowest to highest priority:
/// 1. Built-in defaults
/// 2. `~/.config/tribunal/config.toml`
/// 3. `./tribunal.toml`
/// 4. The file passed with `--config`
/// 5. `TRIBUNAL_*` environment variables, `__` between section and key
///    (`TRIBUNAL_POLICY__STRATEGY=overlap`, `TRIBUNAL_STORAGE__DATA_DIR=/var/lib/tribunal`)
use std::path::{Path, PathBuf};

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tribunal_core::constants::{
    DEFAULT_CHECKPOINT_INTERVAL, DEFAULT_HISTORY_INTERVAL, DEFAULT_NARROW_WIN, DEFAULT_RETAIN_CHECKPOINTS,
};
use tribunal_core::{EngineConfig, FileLogOptions, ModelConfig, PolicyConfig};

pub const LOCAL_CONFIG_FILE: &str = "tribunal.toml";
const ENV_PREFIX: &str = "TRIBUNAL_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Figment(#[from] Box<figment::Error>),

    #[error("Invalid configuration value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Config file not found: {0}")]
    Missing(PathBuf),

    #[error("Config file already exists at {0}")]
    AlreadyExists(PathBuf),

    #[error("Could not determine the user config directory")]
    NoConfigDir,

    #[error("Failed to write config: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub checkpoint_interval: u64,
    pub retain_checkpoints: usize,
    pub history_interval: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            data_dir: PathBuf::from("tribunal-data"),
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
            retain_checkpoints: DEFAULT_RETAIN_CHECKPOINTS,
            history_interval: DEFAULT_HISTORY_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// Win probability for a narrow likert verdict (B, and 1 minus this for D).
    pub narrow_win: f64,
}

impl Default for InputConfig {
    fn default() -> Self {
        InputConfig { narrow_win: DEFAULT_NARROW_WIN }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TribunalConfig {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub input: InputConfig,
}

impl TribunalConfig {
    /// Load from every source, with `explicit` (from `--config`) above the
    /// discovered files.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit.filter(|p| !p.exists()) {
            return Err(ConfigError::Missing(path.to_path_buf()));
        }
        let config: Self = Self::figment(explicit).extract().map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    pub fn figment(explicit: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(global) = global_config_path() {
            if global.exists() {
                figment = figment.merge(Toml::file(global));
            }
        }
        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            figment = figment.merge(Toml::file(local));
        }
        if let Some(path) = explicit {
            figment = figment.merge(Toml::file(path));
        }

        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field: &str, reason: String| ConfigError::InvalidValue { field: field.to_string(), reason };
        self.model.validate().map_err(|r| invalid("model", r))?;
        self.policy.validate().map_err(|r| invalid("policy", r))?;
        let nw = self.input.narrow_win;
        if !(nw > 0.5 && nw < 1.0) {
            return Err(invalid("input.narrow_win", format!("must be in (0.5, 1.0), got {nw}")));
        }
        Ok(())
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            model: self.model.clone(),
            policy: self.policy.clone(),
            checkpoint_interval: self.storage.checkpoint_interval,
            history_interval: self.storage.history_interval,
        }
    }

    pub fn log_options(&self) -> FileLogOptions {
        FileLogOptions { retain_checkpoints: self.storage.retain_checkpoints }
    }
}

/// `~/.config/tribunal/config.toml` (platform config dir).
pub fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("tribunal").join("config.toml"))
}

const DEFAULT_CONFIG_TEMPLATE: &str = "\
# tribunal configuration
# Every value can be overridden with TRIBUNAL_<SECTION>__<KEY> environment variables.

[model]
# Changing any model value invalidates existing checkpoints; the log is replayed in full.
# prior_mean = 0.0
# prior_variance = 1.0
# judge_noise = 0.5
# draw_margin = 0.1
# min_variance = 0.0001

[policy]
# \"variance_reduction\" or \"overlap\"
# strategy = \"variance_reduction\"
# confidence_threshold = 0.95
# max_comparisons = 5000
# window_size = 100

[storage]
# data_dir = \"tribunal-data\"
# checkpoint_interval = 500
# retain_checkpoints = 2
# history_interval = 25

[input]
# Probability assigned to a narrow likert win (B); D gets 1 minus this.
# narrow_win = 0.8
";

/// Write the commented default config to `path`, or the user config path.
pub fn create_default_config(path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => global_config_path().ok_or(ConfigError::NoConfigDir)?,
    };
    if path.exists() {
        return Err(ConfigError::AlreadyExists(path));
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, DEFAULT_CONFIG_TEMPLATE)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use tribunal_core::Strategy;

    /// Point the platform config dir into the jail so a real user config is never read.
    fn isolate_user_config(jail: &mut Jail) {
        let dir = jail.directory().to_path_buf();
        jail.set_env("XDG_CONFIG_HOME", dir.display());
    }

    #[test]
    fn test_defaults_without_files() {
        Jail::expect_with(|jail| {
            isolate_user_config(jail);
            let config: TribunalConfig = TribunalConfig::figment(None).extract()?;
            assert_eq!(config, TribunalConfig::default());
            Ok(())
        });
    }

    #[test]
    fn test_template_parses_to_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file("template.toml", DEFAULT_CONFIG_TEMPLATE)?;
            let config: TribunalConfig = Figment::from(Serialized::defaults(TribunalConfig::default()))
                .merge(Toml::file("template.toml"))
                .extract()?;
            assert_eq!(config, TribunalConfig::default());
            Ok(())
        });
    }

    #[test]
    fn test_local_file_then_explicit_then_env() {
        Jail::expect_with(|jail| {
            isolate_user_config(jail);
            jail.create_file(
                LOCAL_CONFIG_FILE,
                r#"
[policy]
strategy = "overlap"
window_size = 10

[storage]
data_dir = "local-data"
"#,
            )?;
            jail.create_file("explicit.toml", "[policy]\nwindow_size = 20\n")?;
            jail.set_env("TRIBUNAL_STORAGE__DATA_DIR", "env-data");

            let config = TribunalConfig::load(Some(Path::new("explicit.toml"))).map_err(|e| e.to_string())?;
            assert_eq!(config.policy.strategy, Strategy::Overlap);
            assert_eq!(config.policy.window_size, 20);
            assert_eq!(config.storage.data_dir, PathBuf::from("env-data"));
            assert_eq!(config.model, ModelConfig::default());
            Ok(())
        });
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        Jail::expect_with(|_jail| {
            let err = TribunalConfig::load(Some(Path::new("nope.toml"))).unwrap_err();
            assert!(matches!(err, ConfigError::Missing(_)));
            Ok(())
        });
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        Jail::expect_with(|jail| {
            isolate_user_config(jail);
            jail.set_env("TRIBUNAL_INPUT__NARROW_WIN", "0.4");
            let err = TribunalConfig::load(None).unwrap_err();
            assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "input.narrow_win"));

            jail.set_env("TRIBUNAL_INPUT__NARROW_WIN", "0.7");
            jail.set_env("TRIBUNAL_MODEL__JUDGE_NOISE", "-1");
            let err = TribunalConfig::load(None).unwrap_err();
            assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "model"));
            Ok(())
        });
    }

    #[test]
    fn test_create_default_config_refuses_overwrite() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        assert_eq!(create_default_config(Some(&path)).unwrap(), path);
        assert!(matches!(create_default_config(Some(&path)), Err(ConfigError::AlreadyExists(_))));
    }
}
