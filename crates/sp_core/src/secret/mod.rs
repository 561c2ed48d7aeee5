//! At-rest handling for datasource api keys.
//!
//! Keys are sealed with a reversible base64 encoding before storage and opened only by the
//! sync engine immediately before a provider call. Logs carry a fingerprint, never the key.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha2::{Digest, Sha256};

use crate::error::AppError;

pub fn seal(api_key: &str) -> String {
    STANDARD.encode(api_key.as_bytes())
}

pub fn open(sealed: &str) -> Result<String, AppError> {
    let bytes = STANDARD.decode(sealed.trim()).map_err(|e| {
        AppError::new("DATASOURCE_SECRET_INVALID", "Stored api key could not be decoded")
            .with_details(e.to_string())
    })?;
    String::from_utf8(bytes).map_err(|e| {
        AppError::new("DATASOURCE_SECRET_INVALID", "Stored api key is not valid UTF-8")
            .with_details(e.to_string())
    })
}

/// Short, stable identifier for a key that is safe to log.
pub fn key_fingerprint(api_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(api_key.as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..12].to_string()
}
