//! Per-incident reconciliation of one fetched external incident into local records.
//!
//! Each incident is reconciled in its own IMMEDIATE transaction: look up the link, decide, write.
//! The status write is additionally version-checked; a lost race is retried once and then the
//! incident is skipped for this run.
//!
//! Change detection compares the provider status with the one stored on the link by the previous
//! sync, never with the incident itself, so operator edits survive an unchanged feed. A locally
//! resolved incident is not reopened by the provider.

use rusqlite::{Connection, Transaction, TransactionBehavior};
use serde::{Deserialize, Serialize};
use sp_core::domain::{Datasource, IncidentStatus, ValidationWarning};
use sp_core::error::AppError;
use sp_core::repo::datasources::{
    find_external_link, insert_external_link, touch_external_link, NewExternalLink,
};
use sp_core::repo::incidents::{
    apply_status_transition, get_incident, insert_incident, list_incident_updates, NewIncident,
    StatusTransition,
};
use sp_core::timestamps;
use sp_core::validate::validate_incident;

use crate::mapping::{map_severity, map_status};
use crate::provider::ExternalIncident;

const MAX_TITLE_CHARS: usize = 255;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PassMode {
    /// Unknown incidents are imported, known ones updated.
    CreateOrUpdate,
    /// Known incidents are updated; unknown ones are ignored.
    UpdateOnly,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Created(i64),
    Updated(i64),
    Unchanged,
    /// Conflicted twice; left for the next run.
    Skipped,
}

/// Result of one attempt at reconciling an incident.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    Done(Outcome),
    Conflict,
}

/// Fixed inputs shared by every incident of one run.
#[derive(Debug, Clone, Copy)]
pub struct RunContext<'a> {
    pub datasource: &'a Datasource,
    pub started_at: &'a str,
}

impl RunContext<'_> {
    fn author(&self) -> String {
        format!("{}:{}", self.datasource.provider_type, self.datasource.name)
    }
}

/// Run `attempt` until it completes, retrying a conflict once.
pub fn with_conflict_retry<F>(external_id: &str, mut attempt: F) -> Result<Outcome, AppError>
where
    F: FnMut() -> Result<Attempt, AppError>,
{
    for round in 0..2 {
        match attempt()? {
            Attempt::Done(outcome) => return Ok(outcome),
            Attempt::Conflict => {
                tracing::warn!(external_id, round, "reconciliation conflict");
            }
        }
    }
    tracing::warn!(external_id, "skipping incident after repeated conflicts");
    Ok(Outcome::Skipped)
}

pub fn reconcile_incident(
    conn: &mut Connection,
    ctx: &RunContext<'_>,
    external: &ExternalIncident,
    mode: PassMode,
) -> Result<Outcome, AppError> {
    with_conflict_retry(&external.external_id, || {
        reconcile_once(conn, ctx, external, mode)
    })
}

fn local_title(ctx: &RunContext<'_>, external: &ExternalIncident) -> String {
    let title = external.title.trim();
    if title.is_empty() {
        return format!(
            "{} incident {}",
            ctx.datasource.provider_type, external.external_id
        );
    }
    title.chars().take(MAX_TITLE_CHARS).collect()
}

fn raw_json(external: &ExternalIncident) -> Result<String, AppError> {
    serde_json::to_string(&external.raw).map_err(|e| {
        AppError::new("SYNC_SERIALIZE_FAILED", "Failed to encode provider payload")
            .with_details(e.to_string())
    })
}

/// `resolved_at` for a local status: the provider's value when it parses, else the run start.
fn resolved_at_for(
    status: IncidentStatus,
    ctx: &RunContext<'_>,
    external: &ExternalIncident,
) -> Option<String> {
    if !status.is_resolved() {
        return None;
    }
    Some(
        external
            .resolved_at
            .as_deref()
            .and_then(timestamps::canonicalize)
            .unwrap_or_else(|| ctx.started_at.to_string()),
    )
}

/// Timeline invariants broken after a sync write. Logged, never fatal to the run.
fn timeline_warnings(
    conn: &Connection,
    incident_id: i64,
) -> Result<Vec<ValidationWarning>, AppError> {
    let incident = get_incident(conn, incident_id)?;
    let updates = list_incident_updates(conn, incident_id)?;
    let warnings = validate_incident(&incident, &updates);
    for warning in &warnings {
        tracing::warn!(
            incident_id,
            code = %warning.code,
            details = warning.details.as_deref().unwrap_or_default(),
            "{}",
            warning.message
        );
    }
    Ok(warnings)
}

fn commit(tx: Transaction<'_>) -> Result<(), AppError> {
    tx.commit().map_err(|e| {
        AppError::new("DB_TX_FAILED", "Failed to commit reconciliation").with_details(e.to_string())
    })
}

fn reconcile_once(
    conn: &mut Connection,
    ctx: &RunContext<'_>,
    external: &ExternalIncident,
    mode: PassMode,
) -> Result<Attempt, AppError> {
    let kind = ctx.datasource.provider_type;
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(|e| {
            AppError::new("DB_TX_FAILED", "Failed to start reconciliation transaction")
                .with_details(e.to_string())
        })?;
    let mapped = map_status(kind, &external.provider_status);
    let synced_at = timestamps::now_utc()?;

    let Some(link) = find_external_link(&tx, ctx.datasource.id, &external.external_id)? else {
        if mode == PassMode::UpdateOnly {
            return Ok(Attempt::Done(Outcome::Unchanged));
        }

        let started_at = external
            .created_at
            .as_deref()
            .and_then(timestamps::canonicalize)
            .unwrap_or_else(|| ctx.started_at.to_string());
        let incident_id = insert_incident(
            &tx,
            &NewIncident {
                title: local_title(ctx, external),
                severity: map_severity(kind, external.provider_severity.as_deref()),
                status: mapped,
                started_at,
                resolved_at: resolved_at_for(mapped, ctx, external),
                message: format!("Imported from {kind}"),
                components: Vec::new(),
                source: kind.to_string(),
                created_by: ctx.author(),
            },
        )?;
        insert_external_link(
            &tx,
            &NewExternalLink {
                datasource_id: ctx.datasource.id,
                external_id: &external.external_id,
                incident_id,
                external_url: external.html_url.as_deref(),
                upstream_status: mapped,
                raw_json: &raw_json(external)?,
                synced_at: &synced_at,
            },
        )?;
        timeline_warnings(&tx, incident_id)?;
        commit(tx)?;
        tracing::debug!(
            datasource_id = ctx.datasource.id,
            external_id = %external.external_id,
            incident_id,
            status = %mapped,
            "imported external incident"
        );
        return Ok(Attempt::Done(Outcome::Created(incident_id)));
    };

    let current = get_incident(&tx, link.incident_id)?;
    // Links written before upstream tracking fall back to the incident's own status.
    let previous = link.upstream_status.unwrap_or(current.status);
    if previous == mapped {
        if link.upstream_status.is_none() {
            touch_external_link(&tx, link.id, mapped, &raw_json(external)?, &synced_at)?;
            commit(tx)?;
        }
        return Ok(Attempt::Done(Outcome::Unchanged));
    }

    if current.status == mapped || (current.status.is_resolved() && !mapped.is_resolved()) {
        touch_external_link(&tx, link.id, mapped, &raw_json(external)?, &synced_at)?;
        commit(tx)?;
        tracing::debug!(
            datasource_id = ctx.datasource.id,
            external_id = %external.external_id,
            incident_id = current.id,
            local = %current.status,
            upstream = %mapped,
            "recorded upstream status without changing the incident"
        );
        return Ok(Attempt::Done(Outcome::Unchanged));
    }

    let resolved_at = resolved_at_for(mapped, ctx, external);
    let message = format!("Status changed upstream: {} → {}", current.status, mapped);
    let author = ctx.author();
    let applied = apply_status_transition(
        &tx,
        &StatusTransition {
            incident_id: current.id,
            expected_version: current.version,
            status: mapped,
            resolved_at: resolved_at.as_deref(),
            message: &message,
            created_by: &author,
        },
    )?;
    if !applied {
        return Ok(Attempt::Conflict);
    }
    touch_external_link(&tx, link.id, mapped, &raw_json(external)?, &synced_at)?;
    timeline_warnings(&tx, current.id)?;
    commit(tx)?;

    tracing::debug!(
        datasource_id = ctx.datasource.id,
        external_id = %external.external_id,
        incident_id = current.id,
        from = %current.status,
        to = %mapped,
        "applied upstream status change"
    );
    Ok(Attempt::Done(Outcome::Updated(current.id)))
}
