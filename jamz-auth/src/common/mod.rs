mod models;

pub use models::{Credential, TokenResponse, EXPIRY_BUFFER};
