use base64::Engine;
use rand::Rng;
use url::Url;

use crate::config::OAuthSettings;
use crate::error::AuthError;

/// Sign-in URL for the provider's consent page plus the state it was issued with
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    url: Url,
    state: String,
}

impl AuthorizationRequest {
    pub fn new(settings: &OAuthSettings) -> Result<Self, AuthError> {
        let state = generate_state_token();

        let mut url = Url::parse(&settings.authorize_url)
            .map_err(|e| AuthError::Configuration(format!("Invalid authorize URL: {}", e)))?;
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &settings.client_id)
            .append_pair("scope", &settings.scopes.join(" "))
            .append_pair("redirect_uri", &settings.redirect_uri)
            .append_pair("show_dialog", "true")
            .append_pair("state", &state);

        Ok(Self { url, state })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn state(&self) -> &str {
        &self.state
    }

    /// Pull the one-time `code` out of the URL the provider redirected to
    pub fn code_from_redirect(&self, redirect: &str) -> Result<String, AuthError> {
        let url = Url::parse(redirect)
            .map_err(|e| AuthError::Authorization(format!("Invalid redirect URL: {}", e)))?;

        let mut code = None;
        let mut state = None;
        let mut error = None;
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "code" => code = Some(value.into_owned()),
                "state" => state = Some(value.into_owned()),
                "error" => error = Some(value.into_owned()),
                _ => {}
            }
        }

        if let Some(error) = error {
            return Err(AuthError::Authorization(format!(
                "Provider denied authorization: {}",
                error
            )));
        }

        if state.as_deref() != Some(self.state.as_str()) {
            return Err(AuthError::Authorization(
                "State parameter does not match the sign-in request".to_string(),
            ));
        }

        code.filter(|code| !code.is_empty())
            .ok_or_else(|| AuthError::Authorization("Redirect has no code parameter".to_string()))
    }
}

/// Random CSRF state token
fn generate_state_token() -> String {
    let mut rng = rand::rng();
    let random_bytes: Vec<u8> = (0..32).map(|_| rng.random()).collect();
    base64::prelude::BASE64_URL_SAFE_NO_PAD.encode(&random_bytes)
}
