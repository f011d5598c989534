use std::path::PathBuf;

use config::{Config, ConfigError, Environment, File, FileFormat};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::error::AuthError;
use crate::store::FileCredentialStore;

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub oauth: OAuthSettings,

    #[serde(default)]
    pub storage: StorageSettings,
}

#[derive(Debug, Deserialize)]
pub struct OAuthSettings {
    pub client_id: String,
    pub client_secret: SecretString,
    pub redirect_uri: String,

    #[serde(default = "default_token_url")]
    pub token_url: String,

    #[serde(default = "default_authorize_url")]
    pub authorize_url: String,

    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Default, Deserialize)]
pub struct StorageSettings {
    pub credential_path: Option<PathBuf>,
}

fn default_token_url() -> String {
    "https://accounts.spotify.com/api/token".to_string()
}

fn default_authorize_url() -> String {
    "https://accounts.spotify.com/authorize".to_string()
}

fn default_scopes() -> Vec<String> {
    [
        "user-read-private",
        "playlist-modify-public",
        "playlist-read-private",
        "playlist-modify-private",
        "user-follow-read",
        "user-library-modify",
        "user-library-read",
        "user-read-email",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

fn default_request_timeout() -> u64 {
    10
}

impl Settings {
    /// Load `config.toml` (or the file named by `JAMZ_CONFIG`) overlaid with
    /// `JAMZ__SECTION__KEY` environment variables
    pub fn new() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("JAMZ_CONFIG").unwrap_or_else(|_| "config.toml".to_string());

        let settings = Config::builder()
            .add_source(File::with_name(&config_path).required(false))
            .add_source(Environment::with_prefix("JAMZ").separator("__"))
            .build()?;

        settings.try_deserialize()
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::from_str(contents, FileFormat::Toml))
            .build()?
            .try_deserialize()
    }

    pub fn validate(&self) -> Result<(), String> {
        let oauth = &self.oauth;
        if oauth.client_id.is_empty() {
            return Err("oauth.client_id is required".to_string());
        }
        if oauth.client_secret.expose_secret().is_empty() {
            return Err("oauth.client_secret is required".to_string());
        }
        if oauth.redirect_uri.is_empty() {
            return Err("oauth.redirect_uri is required".to_string());
        }
        for (key, value) in [
            ("oauth.token_url", &oauth.token_url),
            ("oauth.authorize_url", &oauth.authorize_url),
        ] {
            if !value.starts_with("http") {
                return Err(format!("{} must be a valid HTTP(S) URL", key));
            }
        }
        if oauth.request_timeout_secs == 0 {
            return Err("oauth.request_timeout_secs must be positive".to_string());
        }
        Ok(())
    }

    pub fn credential_path(&self) -> Result<PathBuf, AuthError> {
        match &self.storage.credential_path {
            Some(path) => Ok(path.clone()),
            None => FileCredentialStore::default_path(),
        }
    }
}
