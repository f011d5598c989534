use std::fs;
use std::path::{Path, PathBuf};

use super::CredentialStore;
use crate::common::Credential;
use crate::error::AuthError;

/// JSON file holding the three credential fields, readable by the owner only
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    credential_path: PathBuf,
}

impl FileCredentialStore {
    /// Store at `<cache_dir>/jamz/credential.json`
    pub fn new() -> Result<Self, AuthError> {
        Ok(Self::with_path(Self::default_path()?))
    }

    pub fn with_path(credential_path: PathBuf) -> Self {
        Self { credential_path }
    }

    pub fn default_path() -> Result<PathBuf, AuthError> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| AuthError::Configuration("Could not find cache directory".to_string()))?
            .join("jamz");
        Ok(cache_dir.join("credential.json"))
    }

    pub fn path(&self) -> &Path {
        &self.credential_path
    }

    fn staging_path(&self) -> PathBuf {
        self.credential_path.with_extension("json.tmp")
    }
}

impl CredentialStore for FileCredentialStore {
    fn get(&self) -> Result<Option<Credential>, AuthError> {
        if !self.credential_path.exists() {
            return Ok(None);
        }

        let json = fs::read_to_string(&self.credential_path).map_err(|e| {
            AuthError::CredentialStorage(format!("Failed to read credential: {}", e))
        })?;

        let credential: Credential = serde_json::from_str(&json)?;
        Ok(Some(credential))
    }

    fn put(&mut self, credential: &Credential) -> Result<(), AuthError> {
        if let Some(parent) = self.credential_path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                AuthError::CredentialStorage(format!(
                    "Failed to create credential directory: {}",
                    e
                ))
            })?;
        }

        let json = serde_json::to_string_pretty(credential)?;

        // All fields land in one rename so a reader never sees a token without its expiry
        let staging = self.staging_path();
        fs::write(&staging, json).map_err(|e| {
            AuthError::CredentialStorage(format!("Failed to save credential: {}", e))
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&staging, fs::Permissions::from_mode(0o600)).map_err(|e| {
                AuthError::CredentialStorage(format!("Failed to set file permissions: {}", e))
            })?;
        }

        fs::rename(&staging, &self.credential_path).map_err(|e| {
            AuthError::CredentialStorage(format!("Failed to replace credential: {}", e))
        })?;

        Ok(())
    }

    fn clear(&mut self) -> Result<(), AuthError> {
        if self.credential_path.exists() {
            fs::remove_file(&self.credential_path).map_err(|e| {
                AuthError::CredentialStorage(format!("Failed to delete credential: {}", e))
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn credential(refresh_token: Option<&str>) -> Credential {
        Credential {
            access_token: "access".to_string(),
            refresh_token: refresh_token.map(str::to_string),
            expires_at: Utc.with_ymd_and_hms(2024, 3, 1, 13, 0, 0).unwrap(),
        }
    }

    fn store_in(dir: &tempfile::TempDir) -> FileCredentialStore {
        FileCredentialStore::with_path(dir.path().join("nested").join("credential.json"))
    }

    #[test]
    fn get_on_fresh_store_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        assert!(store.get().unwrap().is_none());
    }

    #[test]
    fn put_then_get_returns_all_fields() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir);
        store.put(&credential(Some("refresh"))).unwrap();

        assert_eq!(store.get().unwrap(), Some(credential(Some("refresh"))));
        assert!(!store.staging_path().exists());
    }

    #[test]
    fn absent_refresh_token_is_not_written() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir);
        store.put(&credential(None)).unwrap();

        let raw = fs::read_to_string(store.path()).unwrap();
        assert!(!raw.contains("refresh_token"));
        assert_eq!(store.get().unwrap(), Some(credential(None)));
    }

    #[test]
    fn clear_removes_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir);
        store.put(&credential(Some("refresh"))).unwrap();
        store.clear().unwrap();

        assert!(!store.path().exists());
        assert!(store.get().unwrap().is_none());
        // clearing twice is fine
        store.clear().unwrap();
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::with_path(dir.path().join("credential.json"));
        fs::write(store.path(), "{not json").unwrap();

        assert!(matches!(store.get(), Err(AuthError::Json(_))));
    }

    #[cfg(unix)]
    #[test]
    fn file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir);
        store.put(&credential(Some("refresh"))).unwrap();

        let mode = fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
