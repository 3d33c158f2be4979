//! Credential error types.

use std::time::Duration;

use thiserror::Error;
use warden_platforms::bilibili::CookieRefreshError;

/// Errors that can occur during credential operations.
#[derive(Debug, Error)]
pub enum CredentialError {
    /// Missing required cookie.
    #[error("Missing required cookie: {0}")]
    MissingCookie(&'static str),

    /// Missing refresh token - re-login required.
    #[error("Missing refresh token - re-login required")]
    MissingRefreshToken,

    /// The service reports the session as logged out.
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    /// The correspond page did not carry the one-time refresh token.
    #[error("Challenge token not found in correspond page (HTTP {status})")]
    ChallengeTokenNotFound { status: u16 },

    /// Required cookies never showed up in the browser jar.
    #[error("Browser refresh timed out after {waited:?}; missing cookies: {missing:?}")]
    BrowserTimeout {
        waited: Duration,
        missing: Vec<String>,
    },

    /// The server refused the rotation or the post-refresh probe failed.
    #[error("Refresh rejected: {0}")]
    RefreshRejected(String),

    /// Browser automation failure.
    #[error("Browser error: {0}")]
    Browser(String),

    /// Crypto error.
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// Network error.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Parse error.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Durable storage failed.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// No credential could be loaded for the target.
    #[error("No credential stored for target {0}")]
    NoCredentials(String),
}

impl CredentialError {
    /// Check if this error requires manual re-login.
    pub fn requires_relogin(&self) -> bool {
        matches!(
            self,
            Self::MissingCookie(_)
                | Self::MissingRefreshToken
                | Self::InvalidCredentials(_)
                | Self::NoCredentials(_)
        )
    }

    /// Check if this error is transient and may be retried.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Parse(_) | Self::Browser(_) | Self::BrowserTimeout { .. }
        )
    }
}

impl From<CookieRefreshError> for CredentialError {
    fn from(err: CookieRefreshError) -> Self {
        match err {
            CookieRefreshError::Network(e) => Self::Network(e),
            CookieRefreshError::Parse(msg) => Self::Parse(msg),
            CookieRefreshError::Crypto(msg) => Self::Crypto(msg),
            CookieRefreshError::MissingCookie(name) => Self::MissingCookie(name),
            CookieRefreshError::MissingRefreshToken => Self::MissingRefreshToken,
            CookieRefreshError::RefreshCsrfNotFound { status } => {
                Self::ChallengeTokenNotFound { status }
            }
            CookieRefreshError::NotLoggedIn => Self::InvalidCredentials("not logged in".into()),
            CookieRefreshError::Rejected { code, message } => {
                Self::RefreshRejected(format!("{message} ({code})"))
            }
        }
    }
}

impl From<sqlx::Error> for CredentialError {
    fn from(err: sqlx::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}

impl From<crate::Error> for CredentialError {
    fn from(err: crate::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(CredentialError::MissingRefreshToken.requires_relogin());
        assert!(!CredentialError::MissingRefreshToken.is_transient());

        let timeout = CredentialError::BrowserTimeout {
            waited: Duration::from_secs(40),
            missing: vec!["XSRF-TOKEN".into()],
        };
        assert!(timeout.is_transient());
        assert!(!timeout.requires_relogin());
    }

    #[test]
    fn test_missing_marker_maps_to_challenge_error() {
        let err: CredentialError = CookieRefreshError::RefreshCsrfNotFound { status: 200 }.into();
        assert!(matches!(
            err,
            CredentialError::ChallengeTokenNotFound { status: 200 }
        ));
    }
}
