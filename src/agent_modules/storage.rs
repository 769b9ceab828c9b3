use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::AgentError;

/// Volatile agent state: the current token and the encrypted stored
/// password. Lives in `state.json` next to the config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentState {
    #[serde(default)]
    pub auth_token: Option<String>,
    /// Epoch milliseconds; kept alongside the token so renewal checks
    /// don't have to re-derive it every time.
    #[serde(default)]
    pub token_expiry: Option<i64>,
    #[serde(default)]
    pub encrypted_password: Option<String>,
}

pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            path: state_dir.join("state.json"),
        }
    }

    pub fn load(&self) -> Result<AgentState, AgentError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(AgentState::default());
            }
            Err(err) => return Err(err.into()),
        };
        serde_json::from_str(&raw)
            .map_err(|e| AgentError::Config(format!("invalid {}: {e}", self.path.display())))
    }

    pub fn save(&self, state: &AgentState) -> Result<(), AgentError> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let raw = serde_json::to_string_pretty(state)
            .map_err(|e| AgentError::Config(format!("failed to serialize state: {e}")))?;
        std::fs::write(&self.path, raw)?;
        Ok(())
    }

    pub fn clear(&self) -> Result<(), AgentError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_loads_default_and_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        assert!(store.load().unwrap().auth_token.is_none());

        let state = AgentState {
            auth_token: Some("123.short.sig".to_string()),
            token_expiry: Some(456),
            encrypted_password: None,
        };
        store.save(&state).unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded.auth_token.as_deref(), Some("123.short.sig"));
        assert_eq!(loaded.token_expiry, Some(456));

        store.clear().unwrap();
        assert!(store.load().unwrap().auth_token.is_none());
        store.clear().unwrap();
    }
}
