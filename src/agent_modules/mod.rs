//! The quick-save companion client: talks to the same HTTP API as the
//! web frontend, keeps its credentials encrypted on disk, and renews
//! the bearer token in the background.

pub mod api;
pub mod config;
pub mod crypto;
pub mod renewal;
pub mod storage;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("not logged in; run `agent login` first")]
    NotLoggedIn,
    #[error("auto-renew is enabled but no stored password was found")]
    MissingStoredPassword,
    #[error("config error: {0}")]
    Config(String),
    #[error("crypto error: {0}")]
    Crypto(#[from] crypto::CryptoError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server answered {status}: {message}")]
    Api { status: u16, message: String },
    #[error("unexpected server response: {0}")]
    Protocol(String),
}
