//! OAuth token management for linked mailboxes.
//!
//! Refresh-then-use: a provider call never starts with a token that is about
//! to expire, and a refreshed token is persisted before it is handed out.
//! There is no background refresh racing the main flow.

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tracing::{debug, error};

use crate::connection_store::{ConnectionPersistence, ConnectionStoreError, MailboxConnection};
use crate::crypto::{CryptoError, TokenCipher};

const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Seconds of remaining validity below which a token is refreshed anyway.
const EXPIRY_BUFFER_SECS: i64 = 60;

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    /// The upstream rejected the grant; the user must re-link the mailbox.
    #[error("refresh token rejected: {0}")]
    InvalidGrant(String),
    #[error("token refresh failed: HTTP {status}: {body}")]
    RefreshFailed { status: u16, body: String },
    #[error("http error: {0}")]
    Http(String),
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
    #[error("store error: {0}")]
    Store(#[from] ConnectionStoreError),
}

impl TokenError {
    pub fn is_auth(&self) -> bool {
        matches!(self, TokenError::InvalidGrant(_))
    }
}

#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct TokenVault {
    client_id: String,
    client_secret: String,
    cipher: TokenCipher,
    token_url: String,
}

impl TokenVault {
    pub fn new(client_id: String, client_secret: String, cipher: TokenCipher) -> Self {
        Self {
            client_id,
            client_secret,
            cipher,
            token_url: GOOGLE_TOKEN_URL.to_string(),
        }
    }

    /// Override the token endpoint; used by tests.
    pub fn with_token_url(mut self, token_url: String) -> Self {
        self.token_url = token_url;
        self
    }

    pub fn cipher(&self) -> &TokenCipher {
        &self.cipher
    }

    /// Return a usable access token for the connection, refreshing and
    /// persisting first when the stored one is missing or near expiry.
    pub fn access_token(
        &self,
        store: &dyn ConnectionPersistence,
        connection: &mut MailboxConnection,
    ) -> Result<String, TokenError> {
        if let (Some(encrypted), Some(expires_at)) = (
            connection.access_token_enc.as_deref(),
            connection.token_expires_at,
        ) {
            if expires_at > Utc::now() + Duration::seconds(EXPIRY_BUFFER_SECS) {
                return Ok(self.cipher.decrypt(encrypted)?);
            }
        }

        let refresh_token = self.cipher.decrypt(&connection.refresh_token_enc)?;
        let grant = self.refresh(&refresh_token)?;

        let encrypted = self.cipher.encrypt(&grant.access_token);
        store.update_tokens(connection.id, &encrypted, grant.expires_at)?;
        connection.access_token_enc = Some(encrypted);
        connection.token_expires_at = Some(grant.expires_at);

        Ok(grant.access_token)
    }

    /// Exchange a refresh token for a fresh access token.
    pub fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, TokenError> {
        debug!("refreshing mailbox access token");

        let client = reqwest::blocking::Client::new();
        let response = client
            .post(&self.token_url)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .map_err(|err| TokenError::Http(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            error!("token refresh failed: {} - {}", status, body);
            if body.contains("invalid_grant") {
                return Err(TokenError::InvalidGrant(body));
            }
            return Err(TokenError::RefreshFailed {
                status: status.as_u16(),
                body,
            });
        }

        let token_response: OAuthTokenResponse = response
            .json()
            .map_err(|err| TokenError::Http(err.to_string()))?;

        Ok(TokenGrant {
            access_token: token_response.access_token,
            expires_at: Utc::now() + Duration::seconds(token_response.expires_in),
        })
    }
}

#[derive(Debug, Deserialize)]
struct OAuthTokenResponse {
    access_token: String,
    expires_in: i64,
    #[allow(dead_code)]
    token_type: Option<String>,
    #[allow(dead_code)]
    scope: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

    fn vault(token_url: String) -> TokenVault {
        TokenVault::new(
            "client-id".to_string(),
            "client-secret".to_string(),
            TokenCipher::from_hex(TEST_KEY).unwrap(),
        )
        .with_token_url(token_url)
    }

    #[test]
    fn refresh_returns_grant() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"access_token": "fresh-token", "expires_in": 3600, "token_type": "Bearer"}"#,
            )
            .create();

        let vault = vault(server.url());
        let grant = vault.refresh("refresh-token").unwrap();

        mock.assert();
        assert_eq!(grant.access_token, "fresh-token");
        assert!(grant.expires_at > Utc::now() + Duration::seconds(3000));
    }

    #[test]
    fn invalid_grant_is_distinguishable() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("POST", "/")
            .with_status(400)
            .with_body(r#"{"error": "invalid_grant", "error_description": "Token revoked"}"#)
            .create();

        let vault = vault(server.url());
        let err = vault.refresh("revoked-token").unwrap_err();
        assert!(err.is_auth());
    }

    #[test]
    fn other_failures_are_not_auth_errors() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("POST", "/")
            .with_status(503)
            .with_body("upstream down")
            .create();

        let vault = vault(server.url());
        let err = vault.refresh("refresh-token").unwrap_err();
        assert!(!err.is_auth());
        assert!(matches!(err, TokenError::RefreshFailed { status: 503, .. }));
    }
}
