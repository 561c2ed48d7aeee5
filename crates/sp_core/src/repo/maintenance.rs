use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::domain::{ComponentImpact, MaintenanceImpactRow, MaintenanceStatus, MaintenanceWindow};
use crate::error::AppError;
use crate::timestamps;
use crate::validate::{validate_maintenance_window, validate_name};

use super::{collect_rows, ensure_components_exist, not_found};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewMaintenance {
    pub title: String,
    pub description: Option<String>,
    pub start_at: String,
    pub end_at: String,
    pub components: Vec<ComponentImpact>,
    pub created_by: String,
}

const MAINTENANCE_COLUMNS: &str = "id, title, description, status, start_at, end_at, created_by";

fn maintenance_from_row(row: &Row<'_>) -> rusqlite::Result<MaintenanceWindow> {
    Ok(MaintenanceWindow {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        status: row.get(3)?,
        start_at: row.get(4)?,
        end_at: row.get(5)?,
        created_by: row.get(6)?,
    })
}

/// New windows always start out `scheduled`; an external process moves them through
/// `start_maintenance` / `complete_maintenance` at the window boundaries.
pub fn create_maintenance(conn: &mut Connection, new: &NewMaintenance) -> Result<i64, AppError> {
    validate_name("Maintenance title", &new.title)?;
    validate_maintenance_window(&new.start_at, &new.end_at)?;

    let tx = conn
        .transaction()
        .map_err(|e| AppError::db("DB_TX_FAILED", "Failed to start maintenance transaction", e))?;
    let ids: Vec<i64> = new.components.iter().map(|c| c.component_id).collect();
    ensure_components_exist(&tx, &ids)?;

    let start_at = timestamps::canonical("start_at", &new.start_at)?;
    let end_at = timestamps::canonical("end_at", &new.end_at)?;
    let now = timestamps::now_utc()?;
    tx.execute(
        r#"
      INSERT INTO maintenance_windows(title, description, status, start_at, end_at, created_by,
                                      created_at, updated_at)
      VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
      "#,
        params![
            new.title.trim(),
            new.description,
            MaintenanceStatus::Scheduled,
            start_at,
            end_at,
            new.created_by,
            now
        ],
    )
    .map_err(|e| AppError::db("DB_INSERT_FAILED", "Failed to insert maintenance window", e))?;
    let id = tx.last_insert_rowid();

    for c in &new.components {
        tx.execute(
            "INSERT INTO maintenance_components(maintenance_id, component_id, expected_impact) VALUES (?1, ?2, ?3)",
            params![id, c.component_id, c.impact],
        )
        .map_err(|e| AppError::db("DB_INSERT_FAILED", "Failed to link maintenance component", e))?;
    }

    tx.commit()
        .map_err(|e| AppError::db("DB_TX_FAILED", "Failed to commit maintenance window", e))?;
    Ok(id)
}

pub fn get_maintenance(conn: &Connection, id: i64) -> Result<MaintenanceWindow, AppError> {
    conn.query_row(
        &format!("SELECT {MAINTENANCE_COLUMNS} FROM maintenance_windows WHERE id = ?1"),
        [id],
        maintenance_from_row,
    )
    .optional()
    .map_err(|e| AppError::db("DB_QUERY_FAILED", "Failed to query maintenance window", e))?
    .ok_or_else(|| not_found("Maintenance window", id))
}

fn transition(
    conn: &Connection,
    id: i64,
    allowed_from: &[MaintenanceStatus],
    to: MaintenanceStatus,
) -> Result<MaintenanceWindow, AppError> {
    let current = get_maintenance(conn, id)?;
    if !allowed_from.contains(&current.status) {
        return Err(AppError::new(
            "MAINTENANCE_INVALID_TRANSITION",
            format!("Cannot move maintenance from {} to {}", current.status, to),
        )
        .with_details(format!("maintenance_id={id}")));
    }

    let now = timestamps::now_utc()?;
    conn.execute(
        "UPDATE maintenance_windows SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = ?4",
        params![to, now, id, current.status],
    )
    .map_err(|e| AppError::db("DB_UPDATE_FAILED", "Failed to update maintenance status", e))?;
    get_maintenance(conn, id)
}

pub fn start_maintenance(conn: &Connection, id: i64) -> Result<MaintenanceWindow, AppError> {
    transition(conn, id, &[MaintenanceStatus::Scheduled], MaintenanceStatus::InProgress)
}

pub fn complete_maintenance(conn: &Connection, id: i64) -> Result<MaintenanceWindow, AppError> {
    transition(conn, id, &[MaintenanceStatus::InProgress], MaintenanceStatus::Completed)
}

pub fn cancel_maintenance(conn: &Connection, id: i64) -> Result<MaintenanceWindow, AppError> {
    transition(
        conn,
        id,
        &[MaintenanceStatus::Scheduled, MaintenanceStatus::InProgress],
        MaintenanceStatus::Canceled,
    )
}

/// Aggregation read path: expected-impact rows of in-progress windows. Status, not the clock,
/// decides whether a window is active.
pub fn list_in_progress_maintenance_impacts(
    conn: &Connection,
) -> Result<Vec<MaintenanceImpactRow>, AppError> {
    let mut stmt = conn
        .prepare(
            r#"
      SELECT mc.maintenance_id, mc.component_id, mc.expected_impact
      FROM maintenance_components mc
      JOIN maintenance_windows m ON m.id = mc.maintenance_id
      WHERE m.status = 'in_progress'
      "#,
        )
        .map_err(|e| AppError::db("DB_QUERY_FAILED", "Failed to prepare maintenance impacts", e))?;
    let rows = stmt
        .query_map([], |row| {
            Ok(MaintenanceImpactRow {
                maintenance_id: row.get(0)?,
                component_id: row.get(1)?,
                impact: row.get(2)?,
            })
        })
        .map_err(|e| AppError::db("DB_QUERY_FAILED", "Failed to query maintenance impacts", e))?;
    collect_rows(rows, "maintenance impact")
}

/// Scheduled windows starting in `[from, until]`, soonest first.
pub fn list_upcoming_maintenance(
    conn: &Connection,
    from: &str,
    until: &str,
    limit: usize,
) -> Result<Vec<MaintenanceWindow>, AppError> {
    let mut stmt = conn
        .prepare(&format!(
            r#"
      SELECT {MAINTENANCE_COLUMNS}
      FROM maintenance_windows
      WHERE status = 'scheduled' AND start_at >= ?1 AND start_at <= ?2
      ORDER BY start_at ASC, id ASC
      LIMIT ?3
      "#
        ))
        .map_err(|e| AppError::db("DB_QUERY_FAILED", "Failed to prepare upcoming maintenance", e))?;
    let rows = stmt
        .query_map(params![from, until, limit as i64], maintenance_from_row)
        .map_err(|e| AppError::db("DB_QUERY_FAILED", "Failed to query upcoming maintenance", e))?;
    collect_rows(rows, "maintenance window")
}
