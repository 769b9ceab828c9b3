//! Stateless bearer tokens.
//!
//! Wire format: `{timestamp_ms}.{kind}.{signature}` where the signature
//! is base64(SHA-256("{timestamp_ms}_{kind}_{secret}")). Older clients
//! still hold two-segment `{timestamp_ms}.{signature}` tokens; those are
//! decoded as short-lived. The server keeps no session state: expiry is
//! the only invalidation mechanism.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Validity window for short-lived tokens: 15 minutes.
pub const SHORT_WINDOW_MS: i64 = 15 * 60 * 1000;
/// Validity window for "remember me" tokens: 30 days.
pub const LONG_WINDOW_MS: i64 = 30 * 24 * 60 * 60 * 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Short,
    Long,
}

impl TokenKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TokenKind::Short => "short",
            TokenKind::Long => "long",
        }
    }

    pub fn window_ms(self) -> i64 {
        match self {
            TokenKind::Short => SHORT_WINDOW_MS,
            TokenKind::Long => LONG_WINDOW_MS,
        }
    }
}

/// Which wire shape the token arrived in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenScheme {
    /// `timestamp.signature`, implicitly short-lived.
    Legacy,
    /// `timestamp.kind.signature`.
    Versioned,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("Invalid token format")]
    InvalidFormat,
    #[error("Token expired")]
    Expired,
    #[error("Invalid token")]
    InvalidSignature,
}

/// A token decoded once at the boundary. Callers never re-split the raw
/// string; they work with the tagged fields here.
#[derive(Debug, Clone)]
pub struct AuthToken {
    pub scheme: TokenScheme,
    pub issued_at_ms: i64,
    pub kind: TokenKind,
    signature: String,
}

impl AuthToken {
    pub fn decode(raw: &str) -> Result<Self, TokenError> {
        let parts: Vec<&str> = raw.split('.').collect();
        let (timestamp, kind, signature, scheme) = match parts.as_slice() {
            [timestamp, kind, signature] => {
                let kind = match *kind {
                    "short" => TokenKind::Short,
                    "long" => TokenKind::Long,
                    _ => return Err(TokenError::InvalidFormat),
                };
                (*timestamp, kind, *signature, TokenScheme::Versioned)
            }
            [timestamp, signature] => {
                (*timestamp, TokenKind::Short, *signature, TokenScheme::Legacy)
            }
            _ => return Err(TokenError::InvalidFormat),
        };

        let issued_at_ms: i64 = timestamp.parse().map_err(|_| TokenError::InvalidFormat)?;

        Ok(AuthToken {
            scheme,
            issued_at_ms,
            kind,
            signature: signature.to_string(),
        })
    }

    /// Expiry comes before the signature check, mirroring the order the
    /// API has always reported these failures in.
    pub fn verify(&self, secret: &str, now_ms: i64) -> Result<(), TokenError> {
        if now_ms - self.issued_at_ms > self.kind.window_ms() {
            return Err(TokenError::Expired);
        }
        if self.signature != signature(self.issued_at_ms, self.kind, secret) {
            return Err(TokenError::InvalidSignature);
        }
        Ok(())
    }

    pub fn expires_at_ms(&self) -> i64 {
        self.issued_at_ms + self.kind.window_ms()
    }
}

/// Mints a fresh token string.
pub fn mint(kind: TokenKind, secret: &str, now_ms: i64) -> String {
    format!("{now_ms}.{}.{}", kind.as_str(), signature(now_ms, kind, secret))
}

fn signature(issued_at_ms: i64, kind: TokenKind, secret: &str) -> String {
    let payload = format!("{issued_at_ms}_{}_{secret}", kind.as_str());
    BASE64.encode(Sha256::digest(payload.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret";
    const ISSUED: i64 = 1_700_000_000_000;

    #[test]
    fn mint_and_verify_short_token() {
        let raw = mint(TokenKind::Short, SECRET, ISSUED);
        let token = AuthToken::decode(&raw).unwrap();

        assert_eq!(token.scheme, TokenScheme::Versioned);
        assert_eq!(token.kind, TokenKind::Short);
        assert_eq!(token.issued_at_ms, ISSUED);
        assert_eq!(token.verify(SECRET, ISSUED + 14 * 60 * 1000), Ok(()));
    }

    #[test]
    fn short_token_expires_after_fifteen_minutes() {
        let raw = mint(TokenKind::Short, SECRET, ISSUED);
        let token = AuthToken::decode(&raw).unwrap();
        assert_eq!(
            token.verify(SECRET, ISSUED + SHORT_WINDOW_MS + 1),
            Err(TokenError::Expired)
        );
    }

    #[test]
    fn long_token_survives_past_short_window() {
        let raw = mint(TokenKind::Long, SECRET, ISSUED);
        let token = AuthToken::decode(&raw).unwrap();
        assert_eq!(token.verify(SECRET, ISSUED + SHORT_WINDOW_MS + 1), Ok(()));
        assert_eq!(
            token.verify(SECRET, ISSUED + LONG_WINDOW_MS + 1),
            Err(TokenError::Expired)
        );
    }

    #[test]
    fn tampered_signature_is_rejected() {
        let raw = mint(TokenKind::Short, SECRET, ISSUED);
        let mut tampered = raw.clone();
        // Flip the last character of the signature segment.
        let last = tampered.pop().unwrap();
        tampered.push(if last == 'A' { 'B' } else { 'A' });

        let token = AuthToken::decode(&tampered).unwrap();
        assert_eq!(
            token.verify(SECRET, ISSUED + 1),
            Err(TokenError::InvalidSignature)
        );
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let raw = mint(TokenKind::Short, SECRET, ISSUED);
        let token = AuthToken::decode(&raw).unwrap();
        assert_eq!(
            token.verify("other-secret", ISSUED + 1),
            Err(TokenError::InvalidSignature)
        );
    }

    #[test]
    fn legacy_two_segment_token_is_short() {
        // A legacy token carries the same signature formula with
        // kind fixed to "short".
        let versioned = mint(TokenKind::Short, SECRET, ISSUED);
        let signature = versioned.rsplit('.').next().unwrap();
        let legacy = format!("{ISSUED}.{signature}");

        let token = AuthToken::decode(&legacy).unwrap();
        assert_eq!(token.scheme, TokenScheme::Legacy);
        assert_eq!(token.kind, TokenKind::Short);
        assert_eq!(token.verify(SECRET, ISSUED + 1), Ok(()));
        assert_eq!(
            token.verify(SECRET, ISSUED + SHORT_WINDOW_MS + 1),
            Err(TokenError::Expired)
        );
    }

    #[test]
    fn malformed_tokens_are_invalid_format() {
        for raw in ["", "abc", "1.2.3.4", "notanumber.short.sig", "12.weird.sig"] {
            assert_eq!(
                AuthToken::decode(raw).unwrap_err(),
                TokenError::InvalidFormat,
                "raw = {raw:?}"
            );
        }
    }

    #[test]
    fn expiry_derived_from_kind() {
        let long = AuthToken::decode(&mint(TokenKind::Long, SECRET, ISSUED)).unwrap();
        assert_eq!(long.expires_at_ms(), ISSUED + LONG_WINDOW_MS);
        let short = AuthToken::decode(&mint(TokenKind::Short, SECRET, ISSUED)).unwrap();
        assert_eq!(short.expires_at_ms(), ISSUED + SHORT_WINDOW_MS);
    }
}
