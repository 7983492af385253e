use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const STATE_DIR_NAME: &str = ".grok";

fn default_timeout_ms() -> u64 {
    360_000
}

fn default_stream_timeout_ms() -> u64 {
    3_600_000
}

fn default_max_concurrent_tools() -> usize {
    3
}

fn default_true() -> bool {
    true
}

/// One settings file on disk. Every field is optional so that project and
/// user files can each override only the keys they care about.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SettingsFile {
    pub api_key: Option<String>,
    #[serde(rename = "baseURL")]
    pub base_url: Option<String>,
    pub default_model: Option<String>,
    pub models: Option<Vec<String>>,
    pub timeout: Option<u64>,
    pub stream_timeout: Option<u64>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub parallel_tool_calls: Option<bool>,
    pub max_concurrent_tools: Option<usize>,
    pub mcp_servers: Option<HashMap<String, McpServerConfig>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum McpServerConfig {
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
    },
    Http {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
}

/// Fully-resolved settings after layering defaults, user file, project file
/// and environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub default_model: Option<String>,
    pub models: Vec<String>,
    pub timeout_ms: u64,
    pub stream_timeout_ms: u64,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub parallel_tool_calls: bool,
    pub max_concurrent_tools: usize,
    pub mcp_servers: HashMap<String, McpServerConfig>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: None,
            default_model: None,
            models: Vec::new(),
            timeout_ms: default_timeout_ms(),
            stream_timeout_ms: default_stream_timeout_ms(),
            temperature: None,
            max_tokens: None,
            parallel_tool_calls: default_true(),
            max_concurrent_tools: default_max_concurrent_tools(),
            mcp_servers: HashMap::new(),
        }
    }
}

/// Environment overrides, highest precedence. Collected into a struct so the
/// merge logic is testable without mutating the process environment.
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub timeout: Option<u64>,
    pub stream_timeout: Option<u64>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl EnvOverrides {
    pub fn from_process_env() -> Self {
        fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
            match std::env::var(name) {
                Ok(raw) => match raw.parse() {
                    Ok(v) => Some(v),
                    Err(_) => {
                        tracing::warn!("ignoring unparseable {name}={raw}");
                        None
                    }
                },
                Err(_) => None,
            }
        }

        Self {
            api_key: std::env::var("GROK_API_KEY").ok().filter(|v| !v.is_empty()),
            base_url: std::env::var("GROK_BASE_URL").ok().filter(|v| !v.is_empty()),
            timeout: parse_var("GROK_TIMEOUT"),
            stream_timeout: parse_var("GROK_STREAM_TIMEOUT"),
            temperature: parse_var("GROK_TEMPERATURE"),
            max_tokens: parse_var("GROK_MAX_TOKENS"),
        }
    }
}

impl Settings {
    /// Load settings for a project root. Precedence, lowest first:
    /// defaults < `~/.grok/user-settings.json` < `<project>/.grok/settings.json` < env.
    pub fn load(project_root: &Path) -> Self {
        let user = read_settings_file(&user_settings_path());
        let project = read_settings_file(&project_settings_path(project_root));
        Self::resolve(user, project, EnvOverrides::from_process_env())
    }

    pub fn resolve(
        user: Option<SettingsFile>,
        project: Option<SettingsFile>,
        env: EnvOverrides,
    ) -> Self {
        let mut settings = Settings::default();
        for layer in [user, project].into_iter().flatten() {
            settings.apply_file(layer);
        }
        settings.apply_env(env);
        settings
    }

    fn apply_file(&mut self, file: SettingsFile) {
        if file.api_key.is_some() {
            self.api_key = file.api_key;
        }
        if file.base_url.is_some() {
            self.base_url = file.base_url.map(|u| u.trim_end_matches('/').to_string());
        }
        if file.default_model.is_some() {
            self.default_model = file.default_model;
        }
        if let Some(models) = file.models {
            self.models = models;
        }
        if let Some(timeout) = file.timeout {
            self.timeout_ms = timeout;
        }
        if let Some(stream_timeout) = file.stream_timeout {
            self.stream_timeout_ms = stream_timeout;
        }
        if file.temperature.is_some() {
            self.temperature = file.temperature;
        }
        if file.max_tokens.is_some() {
            self.max_tokens = file.max_tokens;
        }
        if let Some(parallel) = file.parallel_tool_calls {
            self.parallel_tool_calls = parallel;
        }
        if let Some(max) = file.max_concurrent_tools {
            self.max_concurrent_tools = max.max(1);
        }
        if let Some(servers) = file.mcp_servers {
            self.mcp_servers = servers;
        }
    }

    fn apply_env(&mut self, env: EnvOverrides) {
        if env.api_key.is_some() {
            self.api_key = env.api_key;
        }
        if env.base_url.is_some() {
            self.base_url = env.base_url.map(|u| u.trim_end_matches('/').to_string());
        }
        if let Some(timeout) = env.timeout {
            self.timeout_ms = timeout;
        }
        if let Some(stream_timeout) = env.stream_timeout {
            self.stream_timeout_ms = stream_timeout;
        }
        if env.temperature.is_some() {
            self.temperature = env.temperature;
        }
        if env.max_tokens.is_some() {
            self.max_tokens = env.max_tokens;
        }
    }

    pub fn save_project(&self, project_root: &Path) -> Result<()> {
        let dir = state_dir(project_root);
        std::fs::create_dir_all(&dir).context("failed to create .grok directory")?;
        let file = SettingsFile {
            api_key: self.api_key.clone(),
            base_url: self.base_url.clone(),
            default_model: self.default_model.clone(),
            models: (!self.models.is_empty()).then(|| self.models.clone()),
            timeout: Some(self.timeout_ms),
            stream_timeout: Some(self.stream_timeout_ms),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            parallel_tool_calls: Some(self.parallel_tool_calls),
            max_concurrent_tools: Some(self.max_concurrent_tools),
            mcp_servers: (!self.mcp_servers.is_empty()).then(|| self.mcp_servers.clone()),
        };
        let json = serde_json::to_string_pretty(&file)?;
        std::fs::write(dir.join("settings.json"), json).context("failed to write settings.json")?;
        Ok(())
    }
}

pub fn state_dir(project_root: &Path) -> PathBuf {
    project_root.join(STATE_DIR_NAME)
}

pub fn project_settings_path(project_root: &Path) -> PathBuf {
    state_dir(project_root).join("settings.json")
}

pub fn user_settings_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(STATE_DIR_NAME)
        .join("user-settings.json")
}

/// Missing or malformed files are treated as absent; a malformed file logs a
/// warning so a typo does not silently reset the configuration.
pub fn read_settings_file(path: &Path) -> Option<SettingsFile> {
    let content = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str(&content) {
        Ok(file) => Some(file),
        Err(e) => {
            tracing::warn!("ignoring malformed settings file {}: {e}", path.display());
            None
        }
    }
}
