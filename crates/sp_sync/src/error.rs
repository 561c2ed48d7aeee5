//! Classification of sync failures.
//!
//! Every failure inside a run is an `AppError`; the kind is recovered from its code so the
//! run boundary can word `sync_error` consistently without threading a second error type.
//! Reconciliation conflicts never abort a run; they surface as skipped incidents instead.

use serde::{Deserialize, Serialize};
use sp_core::error::AppError;

pub const CONFIGURATION_ERROR: &str = "SYNC_CONFIGURATION_INVALID";
pub const TRANSPORT_ERROR: &str = "PROVIDER_TRANSPORT_FAILED";
pub const AUTH_REJECTED: &str = "PROVIDER_AUTH_REJECTED";
pub const UNEXPECTED_STATUS: &str = "PROVIDER_UNEXPECTED_STATUS";
pub const MALFORMED_RESPONSE: &str = "PROVIDER_MALFORMED_RESPONSE";
pub const UNSUPPORTED: &str = "PROVIDER_UNSUPPORTED";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncErrorKind {
    /// Missing or invalid datasource settings; detected before any network call.
    Configuration,
    /// Network failure or timeout; the next scheduled run retries.
    Transport,
    /// The provider answered, but rejected us or answered with something unusable.
    ProviderResponse,
    /// Local database failure.
    Storage,
}

impl SyncErrorKind {
    pub fn classify(err: &AppError) -> Self {
        let code = err.code.as_str();
        match code {
            TRANSPORT_ERROR => SyncErrorKind::Transport,
            _ if code.starts_with("PROVIDER_") => SyncErrorKind::ProviderResponse,
            _ if code.starts_with("VALIDATION_")
                || code.starts_with("DATASOURCE_")
                || code == CONFIGURATION_ERROR =>
            {
                SyncErrorKind::Configuration
            }
            _ => SyncErrorKind::Storage,
        }
    }

    /// Whether the scheduler may run the datasource again unchanged. Configuration failures
    /// wait for an operator to edit the datasource.
    pub fn is_retryable(self) -> bool {
        !matches!(self, SyncErrorKind::Configuration)
    }
}

pub fn configuration(message: impl Into<String>) -> AppError {
    AppError::new(CONFIGURATION_ERROR, message)
}

pub fn transport(details: impl Into<String>) -> AppError {
    AppError::new(TRANSPORT_ERROR, "connection failed")
        .with_details(details)
        .with_retryable(true)
}

/// Human-readable text stored in `sync_error` and returned in the sync result.
pub fn describe(err: &AppError) -> String {
    match (SyncErrorKind::classify(err), err.details.as_deref()) {
        (SyncErrorKind::Configuration, _) | (_, None) => err.message.clone(),
        (_, Some(details)) => format!("{}: {details}", err.message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_map_onto_the_taxonomy() {
        assert_eq!(
            SyncErrorKind::classify(&transport("timed out")),
            SyncErrorKind::Transport
        );
        assert_eq!(
            SyncErrorKind::classify(&AppError::new(AUTH_REJECTED, "authentication rejected")),
            SyncErrorKind::ProviderResponse
        );
        assert_eq!(
            SyncErrorKind::classify(&AppError::new("VALIDATION_API_KEY_MISSING", "x")),
            SyncErrorKind::Configuration
        );
        assert_eq!(
            SyncErrorKind::classify(&AppError::new("DATASOURCE_SECRET_INVALID", "x")),
            SyncErrorKind::Configuration
        );
        assert_eq!(
            SyncErrorKind::classify(&AppError::new("DB_UPDATE_FAILED", "x")),
            SyncErrorKind::Storage
        );
        assert_eq!(
            SyncErrorKind::classify(&AppError::new("INCIDENT_CONCURRENT_UPDATE", "x")),
            SyncErrorKind::Storage
        );
        assert!(SyncErrorKind::Transport.is_retryable());
        assert!(SyncErrorKind::ProviderResponse.is_retryable());
        assert!(!SyncErrorKind::Configuration.is_retryable());
    }

    #[test]
    fn describe_keeps_configuration_messages_verbatim() {
        let err = AppError::new("VALIDATION_API_KEY_MISSING", "API key not configured")
            .with_details("datasource_id=1");
        assert_eq!(describe(&err), "API key not configured");
        assert_eq!(
            describe(&transport("Connection refused")),
            "connection failed: Connection refused"
        );
    }
}
