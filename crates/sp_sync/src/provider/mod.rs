use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sp_core::domain::ProviderKind;
use sp_core::error::AppError;

use crate::error::UNSUPPORTED;

pub mod mock;
pub mod pagerduty;

pub use mock::{MockClient, MockProvider};
pub use pagerduty::PagerDutyClient;

/// Provider-neutral incident shape. Status and severity stay opaque here; mapping onto local
/// enums belongs to the sync engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExternalIncident {
    pub external_id: String,
    pub title: String,
    pub provider_status: String,
    pub provider_severity: Option<String>,
    pub service: Option<String>,
    pub html_url: Option<String>,
    pub created_at: Option<String>,
    pub resolved_at: Option<String>,
    /// Payload as received, kept for the external link record.
    pub raw: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Identity {
    pub name: String,
    pub email: Option<String>,
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.email {
            Some(email) => write!(f, "{} ({email})", self.name),
            None => f.write_str(&self.name),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IncidentFilter {
    pub statuses: Vec<String>,
    /// Empty means all services.
    pub service_ids: Vec<String>,
    pub limit: usize,
}

/// Capability set every provider variant offers.
pub trait ProviderClient {
    fn kind(&self) -> ProviderKind;

    fn test_connection(&self) -> Result<Identity, AppError>;

    fn list_incidents(&self, filter: &IncidentFilter) -> Result<Vec<ExternalIncident>, AppError>;

    fn acknowledge(&self, external_id: &str) -> Result<(), AppError> {
        Err(unsupported(self.kind(), "acknowledge", external_id))
    }

    fn resolve(&self, external_id: &str) -> Result<(), AppError> {
        Err(unsupported(self.kind(), "resolve", external_id))
    }
}

fn unsupported(kind: ProviderKind, action: &str, external_id: &str) -> AppError {
    AppError::new(UNSUPPORTED, format!("{kind} does not support {action}"))
        .with_details(format!("external_id={external_id}"))
}

/// Closed set of provider clients, one variant per `ProviderKind`.
#[derive(Debug, Clone)]
pub enum Provider {
    PagerDuty(PagerDutyClient),
    Mock(MockClient),
}

impl ProviderClient for Provider {
    fn kind(&self) -> ProviderKind {
        match self {
            Provider::PagerDuty(c) => c.kind(),
            Provider::Mock(c) => c.kind(),
        }
    }

    fn test_connection(&self) -> Result<Identity, AppError> {
        match self {
            Provider::PagerDuty(c) => c.test_connection(),
            Provider::Mock(c) => c.test_connection(),
        }
    }

    fn list_incidents(&self, filter: &IncidentFilter) -> Result<Vec<ExternalIncident>, AppError> {
        match self {
            Provider::PagerDuty(c) => c.list_incidents(filter),
            Provider::Mock(c) => c.list_incidents(filter),
        }
    }

    fn acknowledge(&self, external_id: &str) -> Result<(), AppError> {
        match self {
            Provider::PagerDuty(c) => c.acknowledge(external_id),
            Provider::Mock(c) => c.acknowledge(external_id),
        }
    }

    fn resolve(&self, external_id: &str) -> Result<(), AppError> {
        match self {
            Provider::PagerDuty(c) => c.resolve(external_id),
            Provider::Mock(c) => c.resolve(external_id),
        }
    }
}

pub const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(8);

/// Builds provider clients from datasource settings. Holds what every client of a process
/// shares: the request timeout and the in-process mock feed.
#[derive(Debug, Clone)]
pub struct Connector {
    timeout: Duration,
    mock: MockProvider,
}

impl Connector {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            mock: MockProvider::with_sample_data(),
        }
    }

    pub fn with_mock(timeout: Duration, mock: MockProvider) -> Self {
        Self { timeout, mock }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn connect(
        &self,
        kind: ProviderKind,
        api_key: &str,
        base_url: Option<&str>,
    ) -> Result<Provider, AppError> {
        match kind {
            ProviderKind::PagerDuty => Ok(Provider::PagerDuty(PagerDutyClient::new(
                api_key,
                base_url,
                self.timeout,
            )?)),
            ProviderKind::Mock => Ok(Provider::Mock(self.mock.client(api_key))),
        }
    }
}

impl Default for Connector {
    fn default() -> Self {
        Self::new(DEFAULT_PROVIDER_TIMEOUT)
    }
}
