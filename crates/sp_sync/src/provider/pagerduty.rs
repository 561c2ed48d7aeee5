use std::time::Duration;

use serde::Deserialize;
use sp_core::domain::ProviderKind;
use sp_core::error::AppError;
use sp_core::validate::validate_base_url;

use super::{ExternalIncident, Identity, IncidentFilter, ProviderClient};
use crate::error::{self, AUTH_REJECTED, MALFORMED_RESPONSE, UNEXPECTED_STATUS};

pub const DEFAULT_BASE_URL: &str = "https://api.pagerduty.com";
const ACCEPT: &str = "application/vnd.pagerduty+json;version=2";
const BODY_EXCERPT_CHARS: usize = 200;

/// Client for the PagerDuty REST API v2 (or anything serving the same shapes).
#[derive(Debug, Clone)]
pub struct PagerDutyClient {
    base_url: String,
    api_key: String,
    agent: ureq::Agent,
}

#[derive(Debug, Deserialize)]
struct UserEnvelope {
    user: PdUser,
}

#[derive(Debug, Deserialize)]
struct PdUser {
    name: String,
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IncidentsEnvelope {
    incidents: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct PdIncident {
    id: String,
    title: String,
    status: String,
    urgency: Option<String>,
    html_url: Option<String>,
    created_at: Option<String>,
    resolved_at: Option<String>,
    service: Option<PdReference>,
}

#[derive(Debug, Deserialize)]
struct PdReference {
    id: String,
}

impl PagerDutyClient {
    pub fn new(api_key: &str, base_url: Option<&str>, timeout: Duration) -> Result<Self, AppError> {
        let base_url = match base_url {
            Some(url) => validate_base_url(url)?,
            None => DEFAULT_BASE_URL.to_string(),
        };
        Ok(Self {
            base_url,
            api_key: api_key.to_string(),
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn get(&self, path: &str) -> ureq::Request {
        self.agent
            .get(&format!("{}{path}", self.base_url))
            .set("Authorization", &format!("Token token={}", self.api_key))
            .set("Accept", ACCEPT)
    }

    fn post(&self, path: &str) -> ureq::Request {
        self.agent
            .post(&format!("{}{path}", self.base_url))
            .set("Authorization", &format!("Token token={}", self.api_key))
            .set("Accept", ACCEPT)
            .set("Content-Type", "application/json")
    }

    /// Map ureq's result onto the sync error taxonomy; only HTTP 200 counts as success.
    fn expect_ok(
        &self,
        what: &str,
        result: Result<ureq::Response, ureq::Error>,
    ) -> Result<ureq::Response, AppError> {
        match result {
            Ok(r) if r.status() == 200 => Ok(r),
            Ok(r) => {
                let status = r.status();
                Err(rejected(what, status, r.into_string().unwrap_or_default()))
            }
            Err(ureq::Error::Status(status, r)) => {
                Err(rejected(what, status, r.into_string().unwrap_or_default()))
            }
            Err(ureq::Error::Transport(t)) => Err(error::transport(format!("{what}: {t}"))),
        }
    }
}

fn excerpt(body: &str) -> String {
    body.chars().take(BODY_EXCERPT_CHARS).collect()
}

fn rejected(what: &str, status: u16, body: String) -> AppError {
    if status == 401 || status == 403 {
        return AppError::new(AUTH_REJECTED, "authentication rejected")
            .with_details(format!("HTTP {status}"));
    }
    AppError::new(UNEXPECTED_STATUS, format!("{what} returned HTTP {status}"))
        .with_details(excerpt(&body))
}

fn malformed(what: &str, err: impl std::fmt::Display) -> AppError {
    AppError::new(MALFORMED_RESPONSE, format!("Failed to decode {what} response"))
        .with_details(err.to_string())
}

fn to_external(raw: serde_json::Value) -> Result<ExternalIncident, AppError> {
    let pd: PdIncident =
        serde_json::from_value(raw.clone()).map_err(|e| malformed("incident", e))?;
    Ok(ExternalIncident {
        external_id: pd.id,
        title: pd.title,
        provider_status: pd.status,
        provider_severity: pd.urgency,
        service: pd.service.map(|s| s.id),
        html_url: pd.html_url,
        created_at: pd.created_at,
        resolved_at: pd.resolved_at,
        raw,
    })
}

impl ProviderClient for PagerDutyClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::PagerDuty
    }

    fn test_connection(&self) -> Result<Identity, AppError> {
        let resp = self.expect_ok("users/me", self.get("/users/me").call())?;
        let envelope: UserEnvelope = resp.into_json().map_err(|e| malformed("users/me", e))?;
        Ok(Identity {
            name: envelope.user.name,
            email: envelope.user.email,
        })
    }

    fn list_incidents(&self, filter: &IncidentFilter) -> Result<Vec<ExternalIncident>, AppError> {
        let mut req = self
            .get("/incidents")
            .query("limit", &filter.limit.to_string())
            .query("sort_by", "created_at:desc");
        for status in &filter.statuses {
            req = req.query("statuses[]", status);
        }
        for service in &filter.service_ids {
            req = req.query("service_ids[]", service);
        }

        let resp = self.expect_ok("incidents", req.call())?;
        let envelope: IncidentsEnvelope =
            resp.into_json().map_err(|e| malformed("incidents", e))?;
        envelope.incidents.into_iter().map(to_external).collect()
    }

    fn acknowledge(&self, external_id: &str) -> Result<(), AppError> {
        let path = format!("/incidents/{external_id}/acknowledge");
        self.expect_ok("acknowledge", self.post(&path).send_string("{}"))?;
        Ok(())
    }

    fn resolve(&self, external_id: &str) -> Result<(), AppError> {
        let path = format!("/incidents/{external_id}/resolve");
        self.expect_ok("resolve", self.post(&path).send_string("{}"))?;
        Ok(())
    }
}
