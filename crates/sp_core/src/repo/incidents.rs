use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::domain::{
    ComponentImpact, Incident, IncidentImpactRow, IncidentStatus, IncidentUpdate, Severity,
};
use crate::error::AppError;
use crate::timestamps;
use crate::validate::validate_name;

use super::{collect_rows, ensure_components_exist, not_found};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewIncident {
    pub title: String,
    pub severity: Severity,
    pub status: IncidentStatus,
    pub started_at: String,
    /// Set only when `status` is `resolved`; defaults to the creation time in that case.
    pub resolved_at: Option<String>,
    /// Message of the initial timeline update.
    pub message: String,
    pub components: Vec<ComponentImpact>,
    pub source: String,
    pub created_by: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IncidentUpdateInput {
    pub message: String,
    /// New status; `None` keeps the current one.
    pub status: Option<IncidentStatus>,
    pub created_by: String,
}

/// A status change decided against a previously read `version`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusTransition<'a> {
    pub incident_id: i64,
    pub expected_version: i64,
    pub status: IncidentStatus,
    pub resolved_at: Option<&'a str>,
    pub message: &'a str,
    pub created_by: &'a str,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActiveIncidentSummary {
    pub id: i64,
    pub title: String,
    pub severity: Severity,
    pub status: IncidentStatus,
    pub started_at: String,
    pub affected_components: i64,
}

const INCIDENT_COLUMNS: &str =
    "id, title, severity, status, started_at, resolved_at, source, created_by, version";

fn incident_from_row(row: &Row<'_>) -> rusqlite::Result<Incident> {
    Ok(Incident {
        id: row.get(0)?,
        title: row.get(1)?,
        severity: row.get(2)?,
        status: row.get(3)?,
        started_at: row.get(4)?,
        resolved_at: row.get(5)?,
        source: row.get(6)?,
        created_by: row.get(7)?,
        version: row.get(8)?,
    })
}

fn insert_update_row(
    conn: &Connection,
    incident_id: i64,
    message: &str,
    status: IncidentStatus,
    created_by: &str,
    created_at: &str,
) -> Result<i64, AppError> {
    conn.execute(
        r#"
      INSERT INTO incident_updates(incident_id, message, status_snapshot, created_by, created_at)
      VALUES (?1, ?2, ?3, ?4, ?5)
      "#,
        params![incident_id, message, status, created_by, created_at],
    )
    .map_err(|e| AppError::db("DB_INSERT_FAILED", "Failed to insert incident update", e))?;
    Ok(conn.last_insert_rowid())
}

/// Insert an incident, its component impacts, and its initial update inside the caller's
/// transaction.
pub fn insert_incident(conn: &Connection, new: &NewIncident) -> Result<i64, AppError> {
    validate_name("Incident title", &new.title)?;
    let started_at = timestamps::canonical("started_at", &new.started_at)?;
    let ids: Vec<i64> = new.components.iter().map(|c| c.component_id).collect();
    ensure_components_exist(conn, &ids)?;

    let now = timestamps::now_utc()?;
    let resolved_at = match (new.status.is_resolved(), new.resolved_at.as_deref()) {
        (true, Some(ts)) => Some(timestamps::canonical("resolved_at", ts)?),
        (true, None) => Some(now.clone()),
        (false, _) => None,
    };

    conn.execute(
        r#"
      INSERT INTO incidents(title, severity, status, started_at, resolved_at, source, created_by,
                            version, created_at, updated_at)
      VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1, ?8, ?8)
      "#,
        params![
            new.title.trim(),
            new.severity,
            new.status,
            started_at,
            resolved_at,
            new.source,
            new.created_by,
            now
        ],
    )
    .map_err(|e| AppError::db("DB_INSERT_FAILED", "Failed to insert incident", e))?;
    let incident_id = conn.last_insert_rowid();

    for c in &new.components {
        conn.execute(
            "INSERT INTO incident_components(incident_id, component_id, impact) VALUES (?1, ?2, ?3)",
            params![incident_id, c.component_id, c.impact],
        )
        .map_err(|e| AppError::db("DB_INSERT_FAILED", "Failed to link incident component", e))?;
    }

    insert_update_row(
        conn,
        incident_id,
        &new.message,
        new.status,
        &new.created_by,
        &now,
    )?;

    Ok(incident_id)
}

pub fn create_incident(conn: &mut Connection, new: &NewIncident) -> Result<i64, AppError> {
    let tx = conn
        .transaction()
        .map_err(|e| AppError::db("DB_TX_FAILED", "Failed to start incident transaction", e))?;
    let id = insert_incident(&tx, new)?;
    tx.commit()
        .map_err(|e| AppError::db("DB_TX_FAILED", "Failed to commit incident", e))?;
    Ok(id)
}

pub fn get_incident(conn: &Connection, id: i64) -> Result<Incident, AppError> {
    conn.query_row(
        &format!("SELECT {INCIDENT_COLUMNS} FROM incidents WHERE id = ?1"),
        [id],
        incident_from_row,
    )
    .optional()
    .map_err(|e| AppError::db("DB_QUERY_FAILED", "Failed to query incident", e))?
    .ok_or_else(|| not_found("Incident", id))
}

pub fn count_incidents(conn: &Connection) -> Result<i64, AppError> {
    conn.query_row("SELECT COUNT(*) FROM incidents", [], |row| row.get(0))
        .map_err(|e| AppError::db("DB_QUERY_FAILED", "Failed to count incidents", e))
}

/// Timeline in creation order (append-only).
pub fn list_incident_updates(
    conn: &Connection,
    incident_id: i64,
) -> Result<Vec<IncidentUpdate>, AppError> {
    let mut stmt = conn
        .prepare(
            r#"
      SELECT id, incident_id, message, status_snapshot, created_by, created_at
      FROM incident_updates
      WHERE incident_id = ?1
      ORDER BY created_at ASC, id ASC
      "#,
        )
        .map_err(|e| AppError::db("DB_QUERY_FAILED", "Failed to prepare updates query", e))?;

    let rows = stmt
        .query_map([incident_id], |row| {
            Ok(IncidentUpdate {
                id: row.get(0)?,
                incident_id: row.get(1)?,
                message: row.get(2)?,
                status_snapshot: row.get(3)?,
                created_by: row.get(4)?,
                created_at: row.get(5)?,
            })
        })
        .map_err(|e| AppError::db("DB_QUERY_FAILED", "Failed to query incident updates", e))?;

    collect_rows(rows, "incident update")
}

pub fn list_incident_components(
    conn: &Connection,
    incident_id: i64,
) -> Result<Vec<ComponentImpact>, AppError> {
    let mut stmt = conn
        .prepare(
            "SELECT component_id, impact FROM incident_components WHERE incident_id = ?1 ORDER BY component_id",
        )
        .map_err(|e| AppError::db("DB_QUERY_FAILED", "Failed to prepare impacts query", e))?;
    let rows = stmt
        .query_map([incident_id], |row| {
            Ok(ComponentImpact {
                component_id: row.get(0)?,
                impact: row.get(1)?,
            })
        })
        .map_err(|e| AppError::db("DB_QUERY_FAILED", "Failed to query incident impacts", e))?;
    collect_rows(rows, "incident impact")
}

/// Optimistic status write: applies only when the stored version still equals
/// `expected_version`, appending the matching timeline update. Returns `false` on a version
/// mismatch, leaving the incident untouched.
pub fn apply_status_transition(
    conn: &Connection,
    transition: &StatusTransition<'_>,
) -> Result<bool, AppError> {
    let now = timestamps::now_utc()?;
    let resolved_at = if transition.status.is_resolved() {
        Some(transition.resolved_at.unwrap_or(now.as_str()).to_string())
    } else {
        None
    };

    let changed = conn
        .execute(
            r#"
      UPDATE incidents
      SET status = ?1, resolved_at = ?2, version = version + 1, updated_at = ?3
      WHERE id = ?4 AND version = ?5
      "#,
            params![
                transition.status,
                resolved_at,
                now,
                transition.incident_id,
                transition.expected_version
            ],
        )
        .map_err(|e| AppError::db("DB_UPDATE_FAILED", "Failed to update incident status", e))?;

    if changed == 0 {
        return Ok(false);
    }

    insert_update_row(
        conn,
        transition.incident_id,
        transition.message,
        transition.status,
        transition.created_by,
        &now,
    )?;
    Ok(true)
}

/// Append an operator update. Resolved incidents are closed to further updates; the incident
/// status follows the update and `resolved_at` is stamped when the update resolves it.
pub fn append_incident_update(
    conn: &mut Connection,
    incident_id: i64,
    input: &IncidentUpdateInput,
) -> Result<IncidentUpdate, AppError> {
    if input.message.trim().is_empty() {
        return Err(AppError::new("VALIDATION_MESSAGE_MISSING", "Update message is required"));
    }

    let tx = conn
        .transaction()
        .map_err(|e| AppError::db("DB_TX_FAILED", "Failed to start update transaction", e))?;

    let current = get_incident(&tx, incident_id)?;
    if current.status.is_resolved() {
        return Err(AppError::new(
            "INCIDENT_ALREADY_RESOLVED",
            "Cannot update resolved incident",
        )
        .with_details(format!("incident_id={incident_id}")));
    }

    let status = input.status.unwrap_or(current.status);
    let applied = apply_status_transition(
        &tx,
        &StatusTransition {
            incident_id,
            expected_version: current.version,
            status,
            resolved_at: None,
            message: &input.message,
            created_by: &input.created_by,
        },
    )?;
    if !applied {
        return Err(AppError::new(
            "INCIDENT_CONCURRENT_UPDATE",
            "Incident was modified concurrently",
        )
        .with_details(format!("incident_id={incident_id}"))
        .with_retryable(true));
    }

    let update = list_incident_updates(&tx, incident_id)?
        .pop()
        .ok_or_else(|| not_found("Incident update", incident_id))?;

    tx.commit()
        .map_err(|e| AppError::db("DB_TX_FAILED", "Failed to commit incident update", e))?;
    Ok(update)
}

pub fn resolve_incident(
    conn: &mut Connection,
    incident_id: i64,
    message: &str,
    created_by: &str,
) -> Result<IncidentUpdate, AppError> {
    append_incident_update(
        conn,
        incident_id,
        &IncidentUpdateInput {
            message: message.to_string(),
            status: Some(IncidentStatus::Resolved),
            created_by: created_by.to_string(),
        },
    )
}

/// Aggregation read path: every impact row of every unresolved incident.
pub fn list_unresolved_incident_impacts(
    conn: &Connection,
) -> Result<Vec<IncidentImpactRow>, AppError> {
    let mut stmt = conn
        .prepare(
            r#"
      SELECT ic.incident_id, ic.component_id, ic.impact
      FROM incident_components ic
      JOIN incidents i ON i.id = ic.incident_id
      WHERE i.status <> 'resolved'
      "#,
        )
        .map_err(|e| AppError::db("DB_QUERY_FAILED", "Failed to prepare active impacts query", e))?;
    let rows = stmt
        .query_map([], |row| {
            Ok(IncidentImpactRow {
                incident_id: row.get(0)?,
                component_id: row.get(1)?,
                impact: row.get(2)?,
            })
        })
        .map_err(|e| AppError::db("DB_QUERY_FAILED", "Failed to query active impacts", e))?;
    collect_rows(rows, "incident impact")
}

/// Unresolved incidents, newest first, with their affected component count.
pub fn list_active_incident_summaries(
    conn: &Connection,
) -> Result<Vec<ActiveIncidentSummary>, AppError> {
    let mut stmt = conn
        .prepare(
            r#"
      SELECT i.id, i.title, i.severity, i.status, i.started_at,
             (SELECT COUNT(*) FROM incident_components ic WHERE ic.incident_id = i.id)
      FROM incidents i
      WHERE i.status <> 'resolved'
      ORDER BY i.started_at DESC, i.id DESC
      "#,
        )
        .map_err(|e| AppError::db("DB_QUERY_FAILED", "Failed to prepare incident summaries", e))?;
    let rows = stmt
        .query_map([], |row| {
            Ok(ActiveIncidentSummary {
                id: row.get(0)?,
                title: row.get(1)?,
                severity: row.get(2)?,
                status: row.get(3)?,
                started_at: row.get(4)?,
                affected_components: row.get(5)?,
            })
        })
        .map_err(|e| AppError::db("DB_QUERY_FAILED", "Failed to query incident summaries", e))?;
    collect_rows(rows, "incident summary")
}
