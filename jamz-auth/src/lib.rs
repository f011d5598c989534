// Shared data types
pub mod common;

mod authorize;
mod clock;
mod config;
mod error;
mod manager;
pub mod store;
pub mod transport;

// Always expose testing module (integration tests need it)
pub mod testing;

pub use authorize::AuthorizationRequest;
pub use clock::{Clock, SystemClock};
pub use common::{Credential, TokenResponse, EXPIRY_BUFFER};
pub use crate::config::{OAuthSettings, Settings, StorageSettings};
pub use error::AuthError;
pub use manager::{CredentialState, TokenLifecycleManager};
pub use store::{CredentialStore, FileCredentialStore, MemoryCredentialStore};
pub use transport::{TokenEndpointClient, TokenGrant, TokenTransport};

/// Manager wired to the on-disk store and the real token endpoint
pub type DefaultTokenManager = TokenLifecycleManager<FileCredentialStore, TokenEndpointClient>;

/// Build the production manager from validated settings
pub fn manager_from_settings(settings: &Settings) -> Result<DefaultTokenManager, AuthError> {
    settings.validate().map_err(AuthError::Configuration)?;

    let store = FileCredentialStore::with_path(settings.credential_path()?);
    let transport = TokenEndpointClient::new(&settings.oauth)?;

    tracing::debug!(path = %store.path().display(), "Credential store ready");
    Ok(TokenLifecycleManager::new(store, transport))
}
