use anyhow::{Context, Result};
use directories::ProjectDirs;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::agents::DispatchPolicy;
use crate::constants::{
    COMMAND_TIMEOUT_SECS, CREDENTIALS_FILE, DEFAULT_KEY_COOLDOWN_SECS, DEFAULT_MAX_ACTIONS_PER_STEP,
    DEFAULT_MAX_RETRY_ATTEMPTS, DEFAULT_NOOP_STREAK_THRESHOLD, DEFAULT_PLANNER_BASE_URL,
    DEFAULT_PLANNER_MODEL, DEFAULT_RETRY_BASE_DELAY_MS, LOCAL_CONFIG_DIR, MAX_OUTPUT_BYTES,
    SESSION_TIMEOUT_SECS,
};
use crate::models::ModelConfig;
use crate::runtime::RetryPolicy;
use crate::shell::ShellPolicy;
use crate::workspace::DiffCeiling;

/// Flat `PAI_*` environment switches that land under `[policy]`
const POLICY_KEYS: [&str; 12] = [
    "allow_shell_exec",
    "allow_network",
    "stream_output",
    "shell_timeout_secs",
    "session_timeout_secs",
    "max_actions_per_step",
    "noop_streak_threshold",
    "max_retry_attempts",
    "retry_base_delay_ms",
    "diff_ceiling",
    "diff_ceiling_reject",
    "max_output_bytes",
];

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Planner model
    #[serde(default)]
    pub model: ModelSettings,

    /// Execution policy switches
    #[serde(default)]
    pub policy: PolicyConfig,

    /// Credential file location
    #[serde(default)]
    pub credentials: CredentialsConfig,
}

/// Planner model settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSettings {
    /// Model name, optionally prefixed with its provider
    pub name: String,
    /// Base URL of the generateContent API
    pub base_url: String,
    /// Temperature for generation
    pub temperature: f32,
    /// Maximum tokens to generate
    pub max_tokens: Option<usize>,
    /// System prompt
    pub system_prompt: Option<String>,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            name: DEFAULT_PLANNER_MODEL.to_string(),
            base_url: DEFAULT_PLANNER_BASE_URL.to_string(),
            temperature: 0.3,
            max_tokens: None,
            system_prompt: None,
        }
    }
}

impl ModelSettings {
    pub fn model_config(&self) -> ModelConfig {
        ModelConfig {
            temperature: Some(self.temperature),
            max_tokens: self.max_tokens,
            system_prompt: self.system_prompt.clone(),
        }
    }
}

/// Execution policy switches
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub allow_shell_exec: bool,
    pub allow_network: bool,
    pub stream_output: bool,
    pub shell_timeout_secs: u64,
    pub session_timeout_secs: u64,
    pub max_actions_per_step: usize,
    pub noop_streak_threshold: usize,
    pub max_retry_attempts: u32,
    pub retry_base_delay_ms: u64,
    /// Changed-line ceiling for one edit; 0 disables it
    pub diff_ceiling: usize,
    /// Refuse over-ceiling edits instead of only advising
    pub diff_ceiling_reject: bool,
    pub max_output_bytes: usize,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            allow_shell_exec: true,
            allow_network: false,
            stream_output: true,
            shell_timeout_secs: COMMAND_TIMEOUT_SECS,
            session_timeout_secs: SESSION_TIMEOUT_SECS,
            max_actions_per_step: DEFAULT_MAX_ACTIONS_PER_STEP,
            noop_streak_threshold: DEFAULT_NOOP_STREAK_THRESHOLD,
            max_retry_attempts: DEFAULT_MAX_RETRY_ATTEMPTS,
            retry_base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            diff_ceiling: 0,
            diff_ceiling_reject: false,
            max_output_bytes: MAX_OUTPUT_BYTES,
        }
    }
}

impl PolicyConfig {
    pub fn shell_policy(&self) -> ShellPolicy {
        ShellPolicy {
            allow_shell_exec: self.allow_shell_exec,
            allow_network: self.allow_network,
            stream_output: self.stream_output,
            timeout: Duration::from_secs(self.shell_timeout_secs.max(1)),
            session_timeout: Duration::from_secs(self.session_timeout_secs.max(1)),
            max_output_bytes: self.max_output_bytes,
        }
    }

    pub fn dispatch_policy(&self) -> DispatchPolicy {
        DispatchPolicy {
            max_actions_per_step: self.max_actions_per_step.max(1),
            noop_streak_threshold: self.noop_streak_threshold.max(1),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retry_attempts.max(1),
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            ..RetryPolicy::default()
        }
    }

    pub fn diff_ceiling(&self) -> DiffCeiling {
        DiffCeiling::from_config(self.diff_ceiling, self.diff_ceiling_reject)
    }
}

/// Credential file location
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CredentialsConfig {
    /// Overrides `<config dir>/credentials.json`
    pub path: Option<PathBuf>,
    /// How long a rate-limited key sits out of rotation
    pub cooldown_secs: Option<u64>,
}

impl CredentialsConfig {
    pub fn resolve_path(&self) -> Result<PathBuf> {
        match &self.path {
            Some(path) => Ok(path.clone()),
            None => Ok(get_config_dir()?.join(CREDENTIALS_FILE)),
        }
    }

    pub fn cooldown(&self) -> chrono::Duration {
        let secs = self
            .cooldown_secs
            .map_or(DEFAULT_KEY_COOLDOWN_SECS, |s| s.max(1) as i64);
        chrono::Duration::seconds(secs)
    }
}

/// Layered sources: defaults, global file, project file, then environment
fn figment_for(global_config: Option<&Path>, local_config: &Path) -> Figment {
    let mut figment = Figment::from(Serialized::defaults(Config::default()));

    if let Some(global) = global_config.filter(|p| p.exists()) {
        figment = figment.merge(Toml::file(global));
    }
    if local_config.exists() {
        figment = figment.merge(Toml::file(local_config));
    }

    // PAI_ALLOW_NETWORK=true -> policy.allow_network
    figment
        .merge(
            Env::prefixed("PAI_")
                .only(&POLICY_KEYS)
                .map(|key| format!("policy.{}", key.as_str()).into()),
        )
        // PAI_MODEL__NAME=... -> model.name
        .merge(Env::prefixed("PAI_").ignore(&POLICY_KEYS).split("__"))
}

/// Load configuration from multiple sources
pub fn load_config(project_root: &Path) -> Result<Config> {
    let global_config = get_config_dir().ok().map(|dir| dir.join("config.toml"));
    let local_config = project_root.join(LOCAL_CONFIG_DIR).join("config.toml");

    figment_for(global_config.as_deref(), &local_config)
        .extract()
        .context("Failed to load configuration")
}

/// Get the configuration directory
pub fn get_config_dir() -> Result<PathBuf> {
    if let Some(proj_dirs) = ProjectDirs::from("", "", "pai") {
        let config_dir = proj_dirs.config_dir();
        std::fs::create_dir_all(config_dir)?;
        Ok(config_dir.to_path_buf())
    } else {
        // Fallback to home directory
        let home = std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .context("Could not determine home directory")?;
        let config_dir = PathBuf::from(home).join(".config").join("pai");
        std::fs::create_dir_all(&config_dir)?;
        Ok(config_dir)
    }
}

/// Save configuration to file
pub fn save_config(config: &Config, path: Option<PathBuf>) -> Result<()> {
    let path = if let Some(p) = path {
        p
    } else {
        get_config_dir()?.join("config.toml")
    };

    let toml_string = toml::to_string_pretty(config)?;
    std::fs::write(&path, toml_string)
        .with_context(|| format!("Failed to write config to {}", path.display()))?;

    Ok(())
}

/// Create a default configuration file if it doesn't exist. Returns the files created.
pub fn init_config(project_root: &Path) -> Result<Vec<PathBuf>> {
    let mut created = Vec::new();
    let config_file = get_config_dir()?.join("config.toml");

    if !config_file.exists() {
        save_config(&Config::default(), Some(config_file.clone()))?;
        created.push(config_file);
    }

    let local_example = project_root
        .join(LOCAL_CONFIG_DIR)
        .join("config.toml.example");
    if !local_example.exists() {
        if let Some(parent) = local_example.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let example_config = r#"# Pai Project Configuration
# This file overrides global settings for this project

[model]
name = "gemini-2.5-flash"
temperature = 0.3

[policy]
allow_shell_exec = true
allow_network = false
shell_timeout_secs = 30
max_actions_per_step = 1
diff_ceiling = 50
diff_ceiling_reject = true
"#;
        std::fs::write(&local_example, example_config)
            .with_context(|| format!("Failed to write {}", local_example.display()))?;
        created.push(local_example);
    }

    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.model.name, "gemini-2.5-flash");
        assert_eq!(config.credentials.cooldown().num_seconds(), DEFAULT_KEY_COOLDOWN_SECS);
        assert!(config.policy.allow_shell_exec);
        assert!(!config.policy.allow_network);
        assert_eq!(config.policy.max_actions_per_step, 1);
        assert_eq!(config.policy.diff_ceiling(), DiffCeiling::Off);
    }

    #[test]
    fn test_local_file_and_env_layering() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "local.toml",
                r#"
                [model]
                name = "gemini/gemini-2.5-pro"

                [policy]
                shell_timeout_secs = 5
                diff_ceiling = 50
                diff_ceiling_reject = true
                "#,
            )?;
            jail.set_env("PAI_ALLOW_NETWORK", "true");
            jail.set_env("PAI_SHELL_TIMEOUT_SECS", "7");
            jail.set_env("PAI_MODEL__TEMPERATURE", "0.9");

            let config: Config = figment_for(None, Path::new("local.toml")).extract()?;
            assert_eq!(config.model.name, "gemini/gemini-2.5-pro");
            assert!((config.model.temperature - 0.9).abs() < f32::EPSILON);
            assert!(config.policy.allow_network);
            assert_eq!(config.policy.shell_timeout_secs, 7);
            assert_eq!(config.policy.diff_ceiling(), DiffCeiling::Reject(50));
            Ok(())
        });
    }

    #[test]
    fn test_missing_files_fall_back_to_defaults() {
        Jail::expect_with(|_jail| {
            let config: Config =
                figment_for(Some(Path::new("nope.toml")), Path::new("also-nope.toml")).extract()?;
            assert_eq!(config.policy, PolicyConfig::default());
            Ok(())
        });
    }

    #[test]
    fn test_policy_conversions_clamp_zeroes() {
        let policy = PolicyConfig {
            max_actions_per_step: 0,
            shell_timeout_secs: 0,
            ..Default::default()
        };
        assert_eq!(policy.dispatch_policy().max_actions_per_step, 1);
        assert_eq!(policy.shell_policy().timeout, Duration::from_secs(1));
        assert_eq!(policy.retry_policy().max_attempts, DEFAULT_MAX_RETRY_ATTEMPTS);
    }

    #[test]
    fn test_config_serializes_to_toml() {
        let text = toml::to_string_pretty(&Config::default()).unwrap();
        assert!(text.contains("[policy]"));
        assert!(text.contains("allow_shell_exec = true"));
    }
}
