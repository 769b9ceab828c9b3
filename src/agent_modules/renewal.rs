//! Background token renewal.
//!
//! One scheduled task owns the cadence: an immediate check at start,
//! then one every five minutes, plus an opportunistic check before any
//! authenticated command. All of them funnel through a single-flight
//! guard, so overlapping timers can never issue duplicate logins.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::time::interval;
use tracing::{debug, info, warn};

use super::api::ApiClient;
use super::config::AgentConfig;
use super::crypto;
use super::storage::{AgentState, StateStore};
use super::AgentError;
use crate::services::token::AuthToken;

/// Renew once remaining validity drops below this.
pub const RENEW_THRESHOLD_MS: i64 = 5 * 60 * 1000;
/// Cadence of the background check.
pub const CHECK_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewOutcome {
    /// A fresh token was obtained and persisted.
    Renewed,
    /// The current token is still comfortably valid.
    StillValid,
    /// Auto-renew is off or prerequisites are missing.
    Disabled,
    /// Another check held the guard; nothing was done.
    InFlight,
}

pub struct TokenRenewer {
    config: AgentConfig,
    store: StateStore,
    in_flight: AtomicBool,
}

/// Expiry for a stored token: the persisted value when present,
/// otherwise derived from the token's own kind (15 minutes short, 30
/// days long).
pub fn effective_expiry(state: &AgentState) -> Option<i64> {
    if let Some(expiry) = state.token_expiry {
        return Some(expiry);
    }
    state
        .auth_token
        .as_deref()
        .and_then(|raw| AuthToken::decode(raw).ok())
        .map(|token| token.expires_at_ms())
}

pub fn needs_renewal(expiry: i64, now_ms: i64) -> bool {
    now_ms >= expiry || expiry - now_ms < RENEW_THRESHOLD_MS
}

impl TokenRenewer {
    pub fn new(config: AgentConfig, store: StateStore) -> Self {
        Self {
            config,
            store,
            in_flight: AtomicBool::new(false),
        }
    }

    /// Checks the stored token and re-authenticates when it is expired
    /// or about to expire. Safe to call from anywhere, any time: the
    /// guard collapses concurrent calls into one.
    pub async fn check_and_renew(&self) -> Result<RenewOutcome, AgentError> {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            debug!("renewal already in flight, skipping");
            return Ok(RenewOutcome::InFlight);
        }
        let outcome = self.check_and_renew_inner().await;
        self.in_flight.store(false, Ordering::SeqCst);
        outcome
    }

    async fn check_and_renew_inner(&self) -> Result<RenewOutcome, AgentError> {
        if !self.config.auto_renew {
            return Ok(RenewOutcome::Disabled);
        }
        let state = self.store.load()?;
        if state.auth_token.is_none() {
            return Ok(RenewOutcome::Disabled);
        }
        let Some(expiry) = effective_expiry(&state) else {
            return Ok(RenewOutcome::Disabled);
        };

        if !needs_renewal(expiry, Utc::now().timestamp_millis()) {
            return Ok(RenewOutcome::StillValid);
        }
        self.renew(state).await?;
        Ok(RenewOutcome::Renewed)
    }

    async fn renew(&self, mut state: AgentState) -> Result<(), AgentError> {
        let encrypted = state
            .encrypted_password
            .as_deref()
            .ok_or(AgentError::MissingStoredPassword)?;
        let password = crypto::decrypt_password(encrypted)?;

        let client = ApiClient::new(&self.config.server_url)?;
        let reply = client
            .login(&self.config.username, &password, false)
            .await?;

        let expiry = AuthToken::decode(&reply.token)
            .ok()
            .map(|token| token.expires_at_ms());
        state.auth_token = Some(reply.token);
        state.token_expiry = expiry;
        self.store.save(&state)?;
        info!("token renewed");
        Ok(())
    }

    /// The background loop: immediate check, then every five minutes
    /// until cancelled.
    pub async fn run_loop(&self) {
        let mut ticker = interval(CHECK_INTERVAL);
        loop {
            ticker.tick().await;
            match self.check_and_renew().await {
                Ok(outcome) => debug!(?outcome, "renewal check"),
                Err(err) => warn!(error = %err, "renewal check failed"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::token::{self, TokenKind};

    #[test]
    fn threshold_logic() {
        let now = 1_700_000_000_000;
        assert!(needs_renewal(now - 1, now)); // already expired
        assert!(needs_renewal(now + RENEW_THRESHOLD_MS - 1, now)); // closing in
        assert!(!needs_renewal(now + RENEW_THRESHOLD_MS + 1, now));
    }

    #[test]
    fn expiry_prefers_persisted_value() {
        let state = AgentState {
            auth_token: Some(token::mint(TokenKind::Short, "s", 1_000)),
            token_expiry: Some(42),
            encrypted_password: None,
        };
        assert_eq!(effective_expiry(&state), Some(42));
    }

    #[test]
    fn expiry_derived_from_token_kind_when_not_persisted() {
        let issued = 1_700_000_000_000;
        let short = AgentState {
            auth_token: Some(token::mint(TokenKind::Short, "s", issued)),
            token_expiry: None,
            encrypted_password: None,
        };
        assert_eq!(
            effective_expiry(&short),
            Some(issued + token::SHORT_WINDOW_MS)
        );

        // A long-lived token gets its real 30-day window, not the
        // 15-minute estimate.
        let long = AgentState {
            auth_token: Some(token::mint(TokenKind::Long, "s", issued)),
            token_expiry: None,
            encrypted_password: None,
        };
        assert_eq!(
            effective_expiry(&long),
            Some(issued + token::LONG_WINDOW_MS)
        );
    }

    #[test]
    fn missing_token_has_no_expiry() {
        assert_eq!(effective_expiry(&AgentState::default()), None);
    }

    #[tokio::test]
    async fn disabled_config_short_circuits() {
        let dir = tempfile::tempdir().unwrap();
        let renewer = TokenRenewer::new(
            AgentConfig {
                server_url: "http://127.0.0.1:1".to_string(),
                username: "admin".to_string(),
                auto_renew: false,
            },
            StateStore::new(dir.path()),
        );
        assert_eq!(
            renewer.check_and_renew().await.unwrap(),
            RenewOutcome::Disabled
        );
    }

    #[tokio::test]
    async fn fresh_token_is_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        store
            .save(&AgentState {
                auth_token: Some(token::mint(
                    TokenKind::Long,
                    "s",
                    Utc::now().timestamp_millis(),
                )),
                token_expiry: None,
                encrypted_password: None,
            })
            .unwrap();

        let renewer = TokenRenewer::new(
            AgentConfig {
                server_url: "http://127.0.0.1:1".to_string(),
                username: "admin".to_string(),
                auto_renew: true,
            },
            StateStore::new(dir.path()),
        );
        assert_eq!(
            renewer.check_and_renew().await.unwrap(),
            RenewOutcome::StillValid
        );
    }
}
