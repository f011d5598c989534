mod endpoint;

pub use endpoint::TokenEndpointClient;

use std::future::Future;

use crate::common::TokenResponse;
use crate::error::AuthError;

/// One POST to the token endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenGrant {
    AuthorizationCode { code: String },
    RefreshToken { refresh_token: String },
}

impl TokenGrant {
    pub fn grant_type(&self) -> &'static str {
        match self {
            Self::AuthorizationCode { .. } => "authorization_code",
            Self::RefreshToken { .. } => "refresh_token",
        }
    }

    /// Form fields for the request body, in wire order
    pub fn form_params<'a>(&'a self, redirect_uri: &'a str) -> Vec<(&'static str, &'a str)> {
        match self {
            Self::AuthorizationCode { code } => vec![
                ("grant_type", self.grant_type()),
                ("code", code.as_str()),
                ("redirect_uri", redirect_uri),
            ],
            Self::RefreshToken { refresh_token } => vec![
                ("grant_type", self.grant_type()),
                ("refresh_token", refresh_token.as_str()),
            ],
        }
    }
}

/// Performs token-endpoint requests for the lifecycle manager.
///
/// Implementations own the request timeout and never retry. Every failure is
/// reported as one of [`AuthError::Transport`], [`AuthError::HttpStatus`] or
/// [`AuthError::Decode`].
pub trait TokenTransport: Send + Sync + 'static {
    fn request_token(
        &self,
        grant: TokenGrant,
    ) -> impl Future<Output = Result<TokenResponse, AuthError>> + Send;
}
