mod settings;

pub use settings::{OAuthSettings, Settings, StorageSettings};
