use std::env;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::AgentError;

/// Durable agent configuration, stored as `agent.toml` in the state
/// directory. Tokens and the encrypted password live in the JSON state
/// file next to it, not here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    pub server_url: String,
    pub username: String,
    #[serde(default)]
    pub auto_renew: bool,
}

/// `MARKNEST_AGENT_DIR`, falling back to `~/.marknest`.
pub fn default_state_dir() -> PathBuf {
    if let Some(dir) = env::var_os("MARKNEST_AGENT_DIR") {
        return PathBuf::from(dir);
    }
    match env::var_os("HOME") {
        Some(home) => Path::new(&home).join(".marknest"),
        None => PathBuf::from(".marknest"),
    }
}

pub fn config_path(state_dir: &Path) -> PathBuf {
    state_dir.join("agent.toml")
}

pub fn load_config(state_dir: &Path) -> Result<Option<AgentConfig>, AgentError> {
    let path = config_path(state_dir);
    let raw = match std::fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let config: AgentConfig = toml::from_str(&raw)
        .map_err(|e| AgentError::Config(format!("invalid {}: {e}", path.display())))?;
    Ok(Some(config))
}

pub fn save_config(state_dir: &Path, config: &AgentConfig) -> Result<(), AgentError> {
    std::fs::create_dir_all(state_dir)?;
    let raw = toml::to_string_pretty(config)
        .map_err(|e| AgentError::Config(format!("failed to serialize config: {e}")))?;
    std::fs::write(config_path(state_dir), raw)?;
    Ok(())
}
