mod file;

pub use file::FileCredentialStore;

use crate::common::Credential;
use crate::error::AuthError;

/// Durable home of the current credential.
///
/// Plain key/value semantics with no locking of its own: the manager owns
/// the store behind its mutex and serializes every call.
pub trait CredentialStore: Send + 'static {
    /// `None` when nothing was ever written or after [`CredentialStore::clear`]
    fn get(&self) -> Result<Option<Credential>, AuthError>;

    /// Writes all fields of `credential` together
    fn put(&mut self, credential: &Credential) -> Result<(), AuthError>;

    /// Removes every field, leaving the canonical signed-out state
    fn clear(&mut self) -> Result<(), AuthError>;
}

/// Process-local store, useful for hosts without durable storage and for tests
#[derive(Debug, Default, Clone)]
pub struct MemoryCredentialStore {
    credential: Option<Credential>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credential(credential: Credential) -> Self {
        Self {
            credential: Some(credential),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self) -> Result<Option<Credential>, AuthError> {
        Ok(self.credential.clone())
    }

    fn put(&mut self, credential: &Credential) -> Result<(), AuthError> {
        self.credential = Some(credential.clone());
        Ok(())
    }

    fn clear(&mut self) -> Result<(), AuthError> {
        self.credential = None;
        Ok(())
    }
}
