//! Per-provider lookup tables from opaque provider fields onto local enums.

use sp_core::domain::{IncidentStatus, ProviderKind, Severity};

/// Provider statuses fetched by the open pass.
pub const OPEN_STATUSES: &[&str] = &["triggered", "acknowledged"];
/// Provider statuses fetched by the resolved pass.
pub const RESOLVED_STATUSES: &[&str] = &["resolved"];

pub fn map_status(kind: ProviderKind, provider_status: &str) -> IncidentStatus {
    match kind {
        // The mock speaks the PagerDuty dialect.
        ProviderKind::PagerDuty | ProviderKind::Mock => match provider_status {
            "triggered" => IncidentStatus::Investigating,
            "acknowledged" => IncidentStatus::Identified,
            "resolved" => IncidentStatus::Resolved,
            _ => IncidentStatus::Investigating,
        },
    }
}

pub fn map_severity(kind: ProviderKind, provider_severity: Option<&str>) -> Severity {
    match kind {
        ProviderKind::PagerDuty | ProviderKind::Mock => match provider_severity {
            // Incidents without an urgency are treated as high urgency.
            Some("high") | None => Severity::Critical,
            Some(_) => Severity::Major,
        },
    }
}
