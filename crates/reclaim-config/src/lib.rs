//! `reclaim.toml`: discovery, loading and logging setup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use parking_lot::ReentrantMutex;
use reclaim_memory::{ReclamationConfig, SubprocessHelper, TargetRule};
use thiserror::Error;

mod logging;

pub use logging::{init_tracing, LoggingConfig};

/// Environment variable overriding config discovery.
pub const RECLAIM_CONFIG_ENV_VAR: &str = "RECLAIM_CONFIG_PATH";

/// File names searched, in order, when the env var is unset.
pub const CONFIG_FILE_NAMES: [&str; 2] = ["reclaim.toml", ".reclaim.toml"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReclaimConfig {
    /// The reclamation cycle itself.
    pub cleanup: ReclamationConfig,
    pub helper: HelperConfig,
    pub logging: LoggingConfig,
}

/// Settings for the out-of-process trim helper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HelperConfig {
    /// Explicit path to `reclaim-trim-target`. Defaults to the binary shipped
    /// next to the running executable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// Wall-clock limit for one helper run.
    pub timeout_ms: u64,
    /// Interpreter executable names used by `--auto`.
    pub interpreter_names: Vec<String>,
    /// Command-line markers used by `--auto`.
    pub markers: Vec<String>,
}

impl Default for HelperConfig {
    fn default() -> Self {
        let rule = TargetRule::default();
        Self {
            path: None,
            timeout_ms: 60_000,
            interpreter_names: rule.interpreter_names,
            markers: rule.markers,
        }
    }
}

impl HelperConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn target_rule(&self) -> TargetRule {
        TargetRule {
            interpreter_names: self.interpreter_names.clone(),
            markers: self.markers.clone(),
        }
    }

    /// The helper launcher, or `None` when the binary cannot be found.
    pub fn launcher(&self) -> Option<SubprocessHelper> {
        SubprocessHelper::locate(self.path.as_deref())
            .map(|helper| helper.with_timeout(self.timeout()))
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse toml config: {0}")]
    Toml(String),
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        // `Display` would echo a snippet of the input; keep only the message.
        ConfigError::Toml(sanitize_toml_error_message(err.message()))
    }
}

/// Redact user-supplied values from a `toml`/`serde` message.
fn sanitize_toml_error_message(message: &str) -> String {
    static QUOTED: OnceLock<Option<regex::Regex>> = OnceLock::new();
    let quoted = QUOTED
        .get_or_init(|| regex::Regex::new(r#""(?:\\.|[^"\\])*"|'(?:\\.|[^'\\])*'"#).ok());

    let mut out = match quoted {
        Some(re) => re.replace_all(message, "\"<redacted>\"").into_owned(),
        None => message.to_owned(),
    };

    // `invalid type: integer `123`, expected ...` carries the offending scalar in
    // backticks before the `expected` part; field names after it stay readable.
    if out.starts_with("invalid type:") || out.starts_with("invalid value:") {
        let boundary = out.find(", expected").unwrap_or(out.len());
        if let Some(start) = out[..boundary].find('`') {
            if let Some(end) = out[start + 1..boundary].rfind('`') {
                out.replace_range(start + 1..start + 1 + end, "<redacted>");
            }
        }
    }
    out
}

impl ReclaimConfig {
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::load_from_str(&text)
    }

    pub fn load_from_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }
}

static CONFIG_ENV_LOCK: OnceLock<ReentrantMutex<()>> = OnceLock::new();

/// Run `f` while holding the lock that serializes reads of
/// [`RECLAIM_CONFIG_ENV_VAR`]. Tests that set the variable go through here.
pub fn with_config_env_lock<R>(f: impl FnOnce() -> R) -> R {
    let _guard = CONFIG_ENV_LOCK.get_or_init(|| ReentrantMutex::new(())).lock();
    f()
}

/// Find the config file for `root`.
///
/// Search order:
/// 1) `RECLAIM_CONFIG_PATH` (absolute or relative to `root`)
/// 2) `reclaim.toml` in `root`
/// 3) `.reclaim.toml` in `root`
pub fn discover_config_path(root: &Path) -> Option<PathBuf> {
    with_config_env_lock(|| {
        if let Some(value) =
            std::env::var_os(RECLAIM_CONFIG_ENV_VAR).filter(|value| !value.is_empty())
        {
            let candidate = PathBuf::from(value);
            let path = if candidate.is_absolute() {
                candidate
            } else {
                root.join(candidate)
            };
            return Some(path);
        }

        CONFIG_FILE_NAMES
            .into_iter()
            .map(|name| root.join(name))
            .find(|path| path.is_file())
    })
}

/// Load the config for `root`, falling back to defaults when no file exists.
///
/// A path named by the env var that does not exist is an error, not a
/// fallback.
pub fn load_for_dir(root: &Path) -> Result<(ReclaimConfig, Option<PathBuf>), ConfigError> {
    let Some(path) = discover_config_path(root) else {
        return Ok((ReclaimConfig::default(), None));
    };
    let config = ReclaimConfig::load_from_path(&path)?;
    tracing::debug!(target = "reclaim.config", path = %path.display(), "loaded config");
    Ok((config, Some(path)))
}
