use serde::Deserialize;
use shared::constants::{DEFAULT_ARG_COUNT, DEFAULT_STRING_CAP, SCAN_RESULT_CAP};
use shared::errors::ConfigError;
use std::{env, fs, path::Path, path::PathBuf};

/// Full agent configuration, loaded from TOML. Every section is optional;
/// an injected agent with no config file runs on the defaults.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AgentConfig {
    /// Logging settings
    pub log: LogConfig,
    /// Scanner response shaping
    pub scanner: ScannerConfig,
    /// Memory reader limits
    pub memory: MemoryConfig,
    /// Hook defaults
    pub hooks: HooksConfig,
}

/// `[log]` section.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LogConfig {
    /// Module/level spec handed to the logger (e.g. `"agent=info"`)
    pub spec: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig { spec: "agent=info".to_string() }
    }
}

/// `[scanner]` section.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ScannerConfig {
    /// Transport guard on any scan response's `results` array
    pub result_cap: usize,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        ScannerConfig { result_cap: SCAN_RESULT_CAP }
    }
}

/// `[memory]` section.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MemoryConfig {
    /// Byte ceiling for C-string reads
    pub string_cap: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        MemoryConfig { string_cap: DEFAULT_STRING_CAP }
    }
}

/// `[hooks]` section.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HooksConfig {
    /// Argument slots sampled when a hook config does not say
    pub default_arg_count: usize,
}

impl Default for HooksConfig {
    fn default() -> Self {
        HooksConfig { default_arg_count: DEFAULT_ARG_COUNT }
    }
}

impl AgentConfig {
    /// Load, parse, and validate a config from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let s = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_str(&s)
    }

    pub fn from_str(raw: &str) -> Result<Self, ConfigError> {
        let cfg: AgentConfig = toml::from_str(raw).map_err(ConfigError::Parse)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Resolve the config next to the host artefact (or via the
    /// `AGENT_CONFIG` override) and fall back to defaults when nothing is
    /// there; an injected agent must come up regardless.
    pub fn load_or_default() -> Self {
        let path = find_config_file();
        match Self::load(&path) {
            Ok(cfg) => cfg,
            Err(ConfigError::Io { .. }) => AgentConfig::default(),
            Err(e) => {
                log::error!("config at {} rejected: {e}; using defaults", path.display());
                AgentConfig::default()
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.scanner.result_cap == 0 {
            return Err(ConfigError::Validation(
                "scanner.result_cap must be > 0".into(),
            ));
        }
        if self.memory.string_cap == 0 {
            return Err(ConfigError::Validation(
                "memory.string_cap must be > 0".into(),
            ));
        }
        if self.hooks.default_arg_count > 64 {
            return Err(ConfigError::Validation(
                "hooks.default_arg_count must be <= 64".into(),
            ));
        }
        Ok(())
    }
}

/// Check the override environment variable first, then a file next to the
/// running executable. Never panics; a missing file surfaces as a clean
/// `Io` error at load time.
fn find_config_file() -> PathBuf {
    if let Some(cfg) = env::var_os("AGENT_CONFIG") {
        return PathBuf::from(cfg);
    }

    let mut exe_path = env::current_exe().unwrap_or_else(|_| PathBuf::from("."));
    exe_path.pop();
    exe_path.push("agent.toml");
    exe_path
}
