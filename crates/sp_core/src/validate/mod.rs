use crate::domain::{Incident, IncidentUpdate, ValidationWarning};
use crate::error::AppError;
use crate::timestamps;

pub const MIN_SYNC_INTERVAL_SECONDS: i64 = 30;
pub const MAX_SYNC_INTERVAL_SECONDS: i64 = 3600;
pub const DEFAULT_SYNC_INTERVAL_SECONDS: i64 = 60;

pub fn validate_sync_interval(seconds: i64) -> Result<(), AppError> {
    if !(MIN_SYNC_INTERVAL_SECONDS..=MAX_SYNC_INTERVAL_SECONDS).contains(&seconds) {
        return Err(AppError::new(
            "VALIDATION_SYNC_INTERVAL_OUT_OF_RANGE",
            format!(
                "Sync interval must be between {MIN_SYNC_INTERVAL_SECONDS} and {MAX_SYNC_INTERVAL_SECONDS} seconds"
            ),
        )
        .with_details(format!("sync_interval_seconds={seconds}")));
    }
    Ok(())
}

/// Accepts absolute `http://` / `https://` URLs with a non-empty authority. Returns the URL with
/// trailing slashes trimmed.
pub fn validate_base_url(raw: &str) -> Result<String, AppError> {
    let url = raw.trim().trim_end_matches('/');
    let invalid = || {
        AppError::new("VALIDATION_BASE_URL_INVALID", "Base URL must be an absolute http(s) URL")
            .with_details(format!("base_url={raw}"))
    };

    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .ok_or_else(invalid)?;
    let authority = rest.split('/').next().unwrap_or("");
    if authority.is_empty()
        || authority.contains('@')
        || url.chars().any(|c| c.is_whitespace())
        || authority.ends_with(':')
    {
        return Err(invalid());
    }
    Ok(url.to_string())
}

pub fn validate_api_key(api_key: &str) -> Result<(), AppError> {
    if api_key.trim().is_empty() {
        return Err(AppError::new(
            "VALIDATION_API_KEY_MISSING",
            "API key not configured",
        ));
    }
    Ok(())
}

pub fn validate_name(field: &str, name: &str) -> Result<(), AppError> {
    let trimmed = name.trim();
    if trimmed.is_empty() || trimmed.chars().count() > 255 {
        return Err(AppError::new(
            "VALIDATION_NAME_INVALID",
            format!("{field} must be 1..=255 characters"),
        ));
    }
    Ok(())
}

pub fn validate_maintenance_window(start_at: &str, end_at: &str) -> Result<(), AppError> {
    let start = timestamps::parse("start_at", start_at)?;
    let end = timestamps::parse("end_at", end_at)?;
    if end <= start {
        return Err(AppError::new(
            "VALIDATION_MAINTENANCE_WINDOW_INVALID",
            "End time must be after start time",
        )
        .with_details(format!("start_at={start_at}; end_at={end_at}")));
    }
    Ok(())
}

/// Check an incident against its update timeline:
/// resolved_at is set iff resolved, updates are ordered by creation time, and the latest
/// update's status snapshot equals the incident status.
pub fn validate_incident(
    incident: &Incident,
    updates: &[IncidentUpdate],
) -> Vec<ValidationWarning> {
    let mut warnings = Vec::new();

    match (incident.status.is_resolved(), incident.resolved_at.as_deref()) {
        (true, None) => warnings.push(
            ValidationWarning::new(
                "VALIDATION_RESOLVED_AT_MISSING",
                "Resolved incident has no resolved_at",
            )
            .with_details(format!("incident_id={}", incident.id)),
        ),
        (false, Some(ts)) => warnings.push(
            ValidationWarning::new(
                "VALIDATION_RESOLVED_AT_UNEXPECTED",
                "Unresolved incident carries resolved_at",
            )
            .with_details(format!("incident_id={}; resolved_at={ts}", incident.id)),
        ),
        _ => {}
    }

    for pair in updates.windows(2) {
        if pair[0].created_at > pair[1].created_at {
            warnings.push(
                ValidationWarning::new(
                    "VALIDATION_UPDATES_OUT_OF_ORDER",
                    "Incident updates are not ordered by creation time",
                )
                .with_details(format!("update_ids={},{}", pair[0].id, pair[1].id)),
            );
        }
    }

    if let Some(latest) = updates.last() {
        if latest.status_snapshot != incident.status {
            warnings.push(
                ValidationWarning::new(
                    "VALIDATION_STATUS_DRIFT",
                    "Incident status does not match its latest update",
                )
                .with_details(format!(
                    "status={}; latest_snapshot={}",
                    incident.status, latest.status_snapshot
                )),
            );
        }
    }

    warnings
}
