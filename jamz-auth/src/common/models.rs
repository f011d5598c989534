use chrono::{serde::ts_seconds, DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AuthError;

/// A credential is only handed out while `now + EXPIRY_BUFFER < expires_at`.
pub const EXPIRY_BUFFER: Duration = Duration::minutes(5);

/// Token payload returned by the token endpoint for both grant types
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

/// The persisted unit: access token, optional refresh token and absolute expiry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(with = "ts_seconds")]
    pub expires_at: DateTime<Utc>,
}

impl Credential {
    /// Build the credential to persist after a successful token response.
    ///
    /// `received_at` is the instant the response arrived, not when the request
    /// was sent. A response without a refresh token keeps the one from
    /// `previous`, so a stored refresh token is never erased by a refresh.
    pub fn from_response(
        response: TokenResponse,
        received_at: DateTime<Utc>,
        previous: Option<&Credential>,
    ) -> Result<Self, AuthError> {
        if response.access_token.is_empty() {
            return Err(AuthError::Decode("empty access_token".to_string()));
        }

        let expires_at = i64::try_from(response.expires_in)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|lifetime| received_at.checked_add_signed(lifetime))
            .ok_or_else(|| {
                AuthError::Decode(format!("expires_in out of range: {}", response.expires_in))
            })?;

        let refresh_token = response
            .refresh_token
            .filter(|token| !token.is_empty())
            .or_else(|| previous.and_then(|p| p.refresh_token().map(str::to_string)));

        Ok(Self {
            access_token: response.access_token,
            refresh_token,
            expires_at,
        })
    }

    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now + EXPIRY_BUFFER < self.expires_at
    }

    /// The stored refresh token, treating an empty string as absent
    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref().filter(|token| !token.is_empty())
    }
}
