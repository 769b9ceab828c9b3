use chrono::Utc;

use crate::server::config::ServerConfig;
use crate::services::token::{self, TokenKind};
use crate::web::error::AppError;
use crate::web::models::{LoginRequest, LoginResponse};

/// Checks the supplied credentials against the configured admin account
/// and mints a bearer token. No user table, no server-side session: the
/// token itself carries everything validation needs.
pub fn login(config: &ServerConfig, req: &LoginRequest) -> Result<LoginResponse, AppError> {
    if req.username.is_empty() || req.password.is_empty() {
        return Err(AppError::InvalidCredentials);
    }
    if req.username != config.admin_username || req.password != config.admin_password {
        return Err(AppError::InvalidCredentials);
    }

    let kind = if req.remember_me {
        TokenKind::Long
    } else {
        TokenKind::Short
    };
    let token = token::mint(kind, &config.token_secret, Utc::now().timestamp_millis());

    Ok(LoginResponse {
        success: true,
        token,
        username: req.username.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::token::AuthToken;

    fn config() -> ServerConfig {
        ServerConfig {
            listen_addr: "127.0.0.1:0".to_string(),
            database_url: "sqlite::memory:".to_string(),
            admin_username: "admin".to_string(),
            admin_password: "hunter2".to_string(),
            token_secret: "secret".to_string(),
            backup_dir: None,
        }
    }

    fn request(username: &str, password: &str, remember_me: bool) -> LoginRequest {
        LoginRequest {
            username: username.to_string(),
            password: password.to_string(),
            remember_me,
        }
    }

    #[test]
    fn valid_credentials_mint_short_token() {
        let resp = login(&config(), &request("admin", "hunter2", false)).unwrap();
        assert!(resp.success);
        assert_eq!(resp.username, "admin");
        let token = AuthToken::decode(&resp.token).unwrap();
        assert_eq!(token.kind, TokenKind::Short);
        token
            .verify("secret", Utc::now().timestamp_millis())
            .unwrap();
    }

    #[test]
    fn remember_me_mints_long_token() {
        let resp = login(&config(), &request("admin", "hunter2", true)).unwrap();
        let token = AuthToken::decode(&resp.token).unwrap();
        assert_eq!(token.kind, TokenKind::Long);
    }

    #[test]
    fn wrong_or_empty_credentials_rejected() {
        assert!(matches!(
            login(&config(), &request("admin", "wrong", false)),
            Err(AppError::InvalidCredentials)
        ));
        assert!(matches!(
            login(&config(), &request("", "", false)),
            Err(AppError::InvalidCredentials)
        ));
    }
}
