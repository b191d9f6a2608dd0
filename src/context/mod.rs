use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default config file location: ~/.esi-cluster/config
pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".esi-cluster")
        .join("config")
}

/// Expand `~` and environment variables in a user-supplied path
pub fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).into_owned())
}

/// Errors that can occur during context operations
#[derive(Error, Debug)]
pub enum ContextError {
    #[error("Context '{0}' not found")]
    ContextNotFound(String),

    #[error("No current context set; add one with `esi-cluster context add`")]
    NoCurrentContext,

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Failed to write config: {0}")]
    WriteError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Endpoints and credentials for one cloud
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Context {
    /// Display name for this context
    pub name: String,
    /// Bare-metal service endpoint (e.g., "https://cloud.example.com:6385")
    pub baremetal_url: String,
    /// Network service endpoint
    pub network_url: String,
    /// Image service endpoint
    pub image_url: String,
    /// Token sent with every service request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// The complete configuration file structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Currently active context name
    #[serde(rename = "current-context")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_context: Option<String>,

    /// Map of context name to context definition
    #[serde(default)]
    pub contexts: HashMap<String, Context>,
}

// ============================================================================
// SBIO: Pure business logic (no I/O)
// ============================================================================

/// Parse config from YAML string
pub fn parse_config(content: &str) -> Result<Config, ContextError> {
    serde_yaml::from_str(content).map_err(|e| ContextError::ParseError(e.to_string()))
}

/// Serialize config to YAML string
pub fn serialize_config(config: &Config) -> Result<String, ContextError> {
    serde_yaml::to_string(config).map_err(|e| ContextError::WriteError(e.to_string()))
}

/// Add or update a context in the config
pub fn add_context(config: &mut Config, context: Context) {
    config.contexts.insert(context.name.clone(), context);
}

/// Remove a context from the config
pub fn remove_context(config: &mut Config, name: &str) -> Option<Context> {
    let removed = config.contexts.remove(name);
    if config.current_context.as_deref() == Some(name) {
        config.current_context = None;
    }
    removed
}

/// Set the current context
pub fn set_current_context(config: &mut Config, name: &str) -> Result<(), ContextError> {
    if !config.contexts.contains_key(name) {
        return Err(ContextError::ContextNotFound(name.to_string()));
    }
    config.current_context = Some(name.to_string());
    Ok(())
}

/// Get the current context name
pub fn get_current_context(config: &Config) -> Result<&str, ContextError> {
    config
        .current_context
        .as_deref()
        .ok_or(ContextError::NoCurrentContext)
}

/// Get a context by name
pub fn get_context<'a>(config: &'a Config, name: &str) -> Result<&'a Context, ContextError> {
    config
        .contexts
        .get(name)
        .ok_or_else(|| ContextError::ContextNotFound(name.to_string()))
}

/// List all context names, sorted
pub fn list_contexts(config: &Config) -> Vec<&str> {
    let mut names: Vec<&str> = config.contexts.keys().map(|s| s.as_str()).collect();
    names.sort_unstable();
    names
}

// ============================================================================
// I/O boundary functions
// ============================================================================

/// Load config from a specific path; a missing file is an empty config
pub fn load_config_from(path: &Path) -> Result<Config, ContextError> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

/// Save config to a specific path
pub fn save_config_to(config: &Config, path: &Path) -> Result<(), ContextError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = serialize_config(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

impl Config {
    /// The context every service command talks to
    pub fn current(&self) -> Result<&Context, ContextError> {
        get_context(self, get_current_context(self)?)
    }
}

impl Context {
    pub fn new(
        name: impl Into<String>,
        baremetal_url: impl Into<String>,
        network_url: impl Into<String>,
        image_url: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            baremetal_url: baremetal_url.into(),
            network_url: network_url.into(),
            image_url: image_url.into(),
            token: None,
            description: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }
}
