//! In-process stand-in for a PagerDuty-compatible provider.
//!
//! The feed is shared: every client handed out by one `MockProvider` sees the same incidents,
//! so tests and staging can mutate upstream state between sync runs.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use serde_json::json;
use sp_core::domain::ProviderKind;
use sp_core::error::AppError;
use sp_core::timestamps;

use super::{ExternalIncident, Identity, IncidentFilter, ProviderClient};
use crate::error::{self, AUTH_REJECTED};

pub const VALID_API_KEYS: &[&str] = &["mock-pd-api-key-12345", "test-api-key"];

const SAMPLE_TITLES: &[&str] = &[
    "High CPU usage on production servers",
    "Database connection timeout",
    "API response time degraded",
    "Memory leak detected in worker nodes",
    "SSL certificate expiring soon",
    "Disk space running low on storage cluster",
    "Network latency spike detected",
    "Service health check failing",
];

const SAMPLE_SERVICES: &[&str] = &["PSVC001", "PSVC002", "PSVC003"];

#[derive(Debug, Default)]
struct FeedState {
    incidents: Vec<ExternalIncident>,
    list_calls: usize,
    held: bool,
    unreachable: bool,
}

#[derive(Debug, Default)]
struct Feed {
    state: Mutex<FeedState>,
    changed: Condvar,
}

#[derive(Debug, Clone, Default)]
pub struct MockProvider {
    feed: Arc<Feed>,
}

/// Build a mock incident in the PagerDuty payload shape.
pub fn mock_incident(
    external_id: &str,
    title: &str,
    status: &str,
    urgency: &str,
    service: &str,
    created_at: &str,
) -> ExternalIncident {
    let mut incident = ExternalIncident {
        external_id: external_id.to_string(),
        title: title.to_string(),
        provider_status: status.to_string(),
        provider_severity: Some(urgency.to_string()),
        service: Some(service.to_string()),
        html_url: Some(format!("https://mock-pagerduty.local/incidents/{external_id}")),
        created_at: Some(created_at.to_string()),
        resolved_at: None,
        raw: serde_json::Value::Null,
    };
    refresh_raw(&mut incident);
    incident
}

fn refresh_raw(incident: &mut ExternalIncident) {
    incident.raw = json!({
        "id": incident.external_id,
        "type": "incident",
        "title": incident.title,
        "status": incident.provider_status,
        "urgency": incident.provider_severity,
        "html_url": incident.html_url,
        "created_at": incident.created_at,
        "resolved_at": incident.resolved_at,
        "service": incident.service.as_ref().map(|id| json!({"id": id})),
    });
}

fn not_found(external_id: &str) -> AppError {
    AppError::new("PROVIDER_INCIDENT_NOT_FOUND", "Incident not found")
        .with_details(format!("external_id={external_id}"))
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Eight deterministic incidents: the first five open, the rest resolved.
    pub fn with_sample_data() -> Self {
        let mock = Self::new();
        let incidents = SAMPLE_TITLES
            .iter()
            .enumerate()
            .map(|(i, title)| {
                let status = match i {
                    0..=4 if i % 2 == 0 => "triggered",
                    0..=4 => "acknowledged",
                    _ => "resolved",
                };
                let urgency = if i % 3 == 0 { "high" } else { "low" };
                let created_at = format!("2026-01-01T{:02}:00:00Z", i);
                let mut incident = mock_incident(
                    &format!("PINC{:03}", i + 1),
                    title,
                    status,
                    urgency,
                    SAMPLE_SERVICES[i % SAMPLE_SERVICES.len()],
                    &created_at,
                );
                if status == "resolved" {
                    incident.resolved_at = Some(format!("2026-01-01T{:02}:30:00Z", i));
                    refresh_raw(&mut incident);
                }
                incident
            })
            .collect();
        mock.set_incidents(incidents);
        mock
    }

    fn lock(&self) -> MutexGuard<'_, FeedState> {
        self.feed.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn client(&self, api_key: &str) -> MockClient {
        MockClient {
            provider: self.clone(),
            api_key: api_key.to_string(),
        }
    }

    pub fn set_incidents(&self, incidents: Vec<ExternalIncident>) {
        self.lock().incidents = incidents;
    }

    pub fn push_incident(&self, incident: ExternalIncident) {
        self.lock().incidents.push(incident);
    }

    pub fn incidents(&self) -> Vec<ExternalIncident> {
        self.lock().incidents.clone()
    }

    /// Change an incident's upstream status. Moving to `resolved` stamps `resolved_at`;
    /// moving away clears it.
    pub fn set_status(
        &self,
        external_id: &str,
        status: &str,
        resolved_at: Option<&str>,
    ) -> Result<(), AppError> {
        let mut state = self.lock();
        let incident = state
            .incidents
            .iter_mut()
            .find(|i| i.external_id == external_id)
            .ok_or_else(|| not_found(external_id))?;
        incident.provider_status = status.to_string();
        incident.resolved_at = if status == "resolved" {
            Some(match resolved_at {
                Some(ts) => ts.to_string(),
                None => timestamps::now_utc()?,
            })
        } else {
            None
        };
        refresh_raw(incident);
        Ok(())
    }

    /// Simulate a network failure on every call until cleared.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.lock().unreachable = unreachable;
    }

    pub fn list_calls(&self) -> usize {
        self.lock().list_calls
    }

    /// Park every subsequent `list_incidents` call until `release`.
    pub fn hold(&self) {
        self.lock().held = true;
    }

    pub fn release(&self) {
        self.lock().held = false;
        self.feed.changed.notify_all();
    }

    /// Block until at least `n` list calls have been made.
    pub fn wait_for_list_calls(&self, n: usize) {
        let mut state = self.lock();
        while state.list_calls < n {
            state = self
                .feed
                .changed
                .wait(state)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    fn list(&self, filter: &IncidentFilter) -> Result<Vec<ExternalIncident>, AppError> {
        let mut state = self.lock();
        state.list_calls += 1;
        self.feed.changed.notify_all();
        while state.held {
            state = self
                .feed
                .changed
                .wait(state)
                .unwrap_or_else(|e| e.into_inner());
        }
        if state.unreachable {
            return Err(error::transport("mock provider unreachable"));
        }

        let mut matching: Vec<ExternalIncident> = state
            .incidents
            .iter()
            .filter(|i| filter.statuses.is_empty() || filter.statuses.contains(&i.provider_status))
            .filter(|i| {
                filter.service_ids.is_empty()
                    || i.service.as_ref().is_some_and(|s| filter.service_ids.contains(s))
            })
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matching.truncate(filter.limit);
        Ok(matching)
    }

    fn transition(&self, external_id: &str, to: &str) -> Result<(), AppError> {
        let current = {
            let state = self.lock();
            state
                .incidents
                .iter()
                .find(|i| i.external_id == external_id)
                .map(|i| i.provider_status.clone())
                .ok_or_else(|| not_found(external_id))?
        };
        match (current.as_str(), to) {
            ("triggered", "acknowledged") | (_, "resolved") if current != "resolved" => {
                self.set_status(external_id, to, None)
            }
            _ => Ok(()),
        }
    }
}

/// One authenticated view of a `MockProvider` feed.
#[derive(Debug, Clone)]
pub struct MockClient {
    provider: MockProvider,
    api_key: String,
}

impl MockClient {
    fn authorize(&self) -> Result<(), AppError> {
        if self.provider.lock().unreachable {
            return Err(error::transport("mock provider unreachable"));
        }
        if !VALID_API_KEYS.contains(&self.api_key.as_str()) {
            return Err(
                AppError::new(AUTH_REJECTED, "authentication rejected").with_details("HTTP 401")
            );
        }
        Ok(())
    }
}

impl ProviderClient for MockClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Mock
    }

    fn test_connection(&self) -> Result<Identity, AppError> {
        self.authorize()?;
        Ok(Identity {
            name: "Mock Admin".to_string(),
            email: Some("admin@mock-pagerduty.local".to_string()),
        })
    }

    fn list_incidents(&self, filter: &IncidentFilter) -> Result<Vec<ExternalIncident>, AppError> {
        self.authorize()?;
        self.provider.list(filter)
    }

    fn acknowledge(&self, external_id: &str) -> Result<(), AppError> {
        self.authorize()?;
        self.provider.transition(external_id, "acknowledged")
    }

    fn resolve(&self, external_id: &str) -> Result<(), AppError> {
        self.authorize()?;
        self.provider.transition(external_id, "resolved")
    }
}
