//! Configuration for pipeline runs.
//!
//! Two layers are involved:
//!
//! - [`EngineSettings`]: process-wide launch settings (which engine binary and
//!   interpreter to use, where the stage scripts live, the stage timeout),
//!   built from defaults, builders or environment variables
//! - [`ProjectConfig`]: the per-project `pipeline/config.json` declaring the
//!   profile and per-stage sections such as `sprite_generation`

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Wall-clock limit for a single stage.
pub const DEFAULT_STAGE_TIMEOUT: Duration = Duration::from_secs(3600);

/// Errors that can occur while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The project configuration file does not exist.
    #[error("Project configuration not found: {}", .0.display())]
    MissingProjectConfig(PathBuf),

    /// A configuration file could not be parsed.
    #[error("Failed to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// The project declares a profile the stage registry does not know.
    #[error("Unknown profile '{0}'")]
    UnknownProfile(String),

    /// A profile ordering references a stage that is not registered.
    #[error("Profile '{profile}' references unknown stage '{stage}'")]
    UnknownStage { profile: String, stage: String },

    /// Two stages share a key.
    #[error("Duplicate stage key '{0}'")]
    DuplicateStage(String),

    /// IO error while reading configuration.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// How collaborators are launched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    /// Authoring engine binary for engine-hosted stages.
    pub engine_binary: String,
    /// Interpreter for plain script stages.
    pub interpreter: String,
    /// Flag that introduces the script argument on the engine command line.
    pub script_flag: String,
    /// Directory stage script references are resolved against.
    pub tools_dir: PathBuf,
    /// Wall-clock limit for one stage.
    pub stage_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            engine_binary: "blender".to_string(),
            interpreter: "python3".to_string(),
            script_flag: "--python".to_string(),
            tools_dir: PathBuf::from("./tools"),
            stage_timeout: DEFAULT_STAGE_TIMEOUT,
        }
    }
}

impl EngineSettings {
    /// Creates settings with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates settings from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `ASSET_FORGE_ENGINE`: engine binary (default: blender)
    /// - `ASSET_FORGE_INTERPRETER`: script interpreter (default: python3)
    /// - `ASSET_FORGE_ENGINE_SCRIPT_FLAG`: engine script flag (default: --python)
    /// - `ASSET_FORGE_TOOLS_DIR`: stage script directory (default: ./tools)
    /// - `ASSET_FORGE_STAGE_TIMEOUT_SECS`: stage timeout in seconds (default: 3600)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if a numeric variable does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut settings = Self::default();

        if let Ok(val) = std::env::var("ASSET_FORGE_ENGINE") {
            settings.engine_binary = val;
        }

        if let Ok(val) = std::env::var("ASSET_FORGE_INTERPRETER") {
            settings.interpreter = val;
        }

        if let Ok(val) = std::env::var("ASSET_FORGE_ENGINE_SCRIPT_FLAG") {
            settings.script_flag = val;
        }

        if let Ok(val) = std::env::var("ASSET_FORGE_TOOLS_DIR") {
            settings.tools_dir = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("ASSET_FORGE_STAGE_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "ASSET_FORGE_STAGE_TIMEOUT_SECS")?;
            settings.stage_timeout = Duration::from_secs(secs);
        }

        Ok(settings)
    }

    /// Sets the engine binary.
    pub fn with_engine_binary(mut self, binary: impl Into<String>) -> Self {
        self.engine_binary = binary.into();
        self
    }

    /// Sets the interpreter.
    pub fn with_interpreter(mut self, interpreter: impl Into<String>) -> Self {
        self.interpreter = interpreter.into();
        self
    }

    /// Sets the engine script flag.
    pub fn with_script_flag(mut self, flag: impl Into<String>) -> Self {
        self.script_flag = flag.into();
        self
    }

    /// Sets the tools directory.
    pub fn with_tools_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.tools_dir = dir.into();
        self
    }

    /// Sets the stage timeout.
    pub fn with_stage_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout = timeout;
        self
    }
}

/// Parses an environment variable value.
pub(crate) fn parse_env_value<T: std::str::FromStr>(val: &str, key: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    val.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: e.to_string(),
    })
}

fn default_profile() -> String {
    "skeletal".to_string()
}

/// Per-project configuration stored at `<project>/pipeline/config.json`.
///
/// Only `profile` is interpreted directly. Everything else is kept verbatim
/// in `sections` so stage scripts, which receive the config path, see the
/// whole document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(alias = "mesh_type", default = "default_profile")]
    pub profile: String,
    #[serde(flatten)]
    pub sections: Map<String, Value>,
}

impl ProjectConfig {
    /// Location of the config file relative to the project root.
    pub const RELATIVE_PATH: &'static str = "pipeline/config.json";

    /// Creates a config with the given profile and no sections.
    pub fn new(profile: impl Into<String>) -> Self {
        Self {
            profile: profile.into(),
            sections: Map::new(),
        }
    }

    /// Returns the config path for a project.
    pub fn path_for(project: &Path) -> PathBuf {
        project.join(Self::RELATIVE_PATH)
    }

    /// Loads the config of a project.
    pub fn load(project: &Path) -> Result<Self, ConfigError> {
        let path = Self::path_for(project);
        if !path.is_file() {
            return Err(ConfigError::MissingProjectConfig(path));
        }

        let content = std::fs::read_to_string(&path)?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse { path, source })
    }

    /// Sets `<section>.enabled`.
    pub fn with_section_enabled(mut self, section: &str, enabled: bool) -> Self {
        let entry = self
            .sections
            .entry(section.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(map) = entry {
            map.insert("enabled".to_string(), Value::Bool(enabled));
        } else {
            *entry = serde_json::json!({ "enabled": enabled });
        }
        self
    }

    /// Whether `<section>.enabled` is `true`. Absent means disabled.
    pub fn section_enabled(&self, section: &str) -> bool {
        self.sections
            .get(section)
            .and_then(|s| s.get("enabled"))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}
