use std::time::Duration;

use reqwest::header::ACCEPT;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};

use super::{TokenGrant, TokenTransport};
use crate::common::TokenResponse;
use crate::config::OAuthSettings;
use crate::error::AuthError;

/// `reqwest`-backed client for the provider's token endpoint, authenticating
/// with HTTP Basic client credentials
pub struct TokenEndpointClient {
    http_client: Client,
    token_url: String,
    redirect_uri: String,
    client_id: String,
    client_secret: SecretString,
}

impl TokenEndpointClient {
    pub fn new(settings: &OAuthSettings) -> Result<Self, AuthError> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()
            .map_err(|e| AuthError::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            token_url: settings.token_url.clone(),
            redirect_uri: settings.redirect_uri.clone(),
            client_id: settings.client_id.clone(),
            client_secret: settings.client_secret.clone(),
        })
    }
}

impl TokenTransport for TokenEndpointClient {
    async fn request_token(&self, grant: TokenGrant) -> Result<TokenResponse, AuthError> {
        let params = grant.form_params(&self.redirect_uri);

        let response = self
            .http_client
            .post(&self.token_url)
            .basic_auth(&self.client_id, Some(self.client_secret.expose_secret()))
            .header(ACCEPT, "application/json")
            .form(&params)
            .send()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        if !status.is_success() {
            tracing::debug!(
                %status,
                grant_type = grant.grant_type(),
                "Token endpoint rejected request"
            );
            return Err(AuthError::HttpStatus { status, body });
        }

        serde_json::from_str::<TokenResponse>(&body).map_err(|e| AuthError::Decode(e.to_string()))
    }
}
