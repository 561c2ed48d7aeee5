//! SQLite persistence for the status page entities.
//!
//! Functions take `&Connection` and issue one logical write each; operations that touch several
//! tables come in two flavors: a composable `insert_*`/`apply_*` that runs inside the caller's
//! transaction, and a `create_*`/`append_*` wrapper that owns its transaction.

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::domain::{Component, ComponentGroup, Tier};
use crate::error::AppError;
use crate::timestamps;
use crate::validate::validate_name;

pub mod datasources;
pub mod incidents;
pub mod maintenance;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewComponentGroup {
    pub name: String,
    pub description: Option<String>,
    pub display_order: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewComponent {
    pub group_id: Option<i64>,
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub tier: Tier,
    #[serde(default)]
    pub display_order: i64,
}

pub(crate) fn not_found(entity: &str, id: i64) -> AppError {
    AppError::new("DB_NOT_FOUND", format!("{entity} not found")).with_details(format!("id={id}"))
}

pub(crate) fn collect_rows<T>(
    rows: impl Iterator<Item = rusqlite::Result<T>>,
    what: &str,
) -> Result<Vec<T>, AppError> {
    let mut out = Vec::new();
    for r in rows {
        out.push(r.map_err(|e| {
            AppError::db("DB_QUERY_FAILED", format!("Failed to decode {what} row"), e)
        })?);
    }
    Ok(out)
}

pub fn create_group(conn: &Connection, group: &NewComponentGroup) -> Result<i64, AppError> {
    validate_name("Group name", &group.name)?;
    let now = timestamps::now_utc()?;
    conn.execute(
        "INSERT INTO component_groups(name, description, display_order, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![group.name.trim(), group.description, group.display_order, now],
    )
    .map_err(|e| AppError::db("DB_INSERT_FAILED", "Failed to insert component group", e))?;
    Ok(conn.last_insert_rowid())
}

pub fn list_groups(conn: &Connection) -> Result<Vec<ComponentGroup>, AppError> {
    let mut stmt = conn
        .prepare(
            r#"
      SELECT id, name, description, display_order
      FROM component_groups
      ORDER BY display_order ASC, name ASC, id ASC
      "#,
        )
        .map_err(|e| AppError::db("DB_QUERY_FAILED", "Failed to prepare groups query", e))?;

    let rows = stmt
        .query_map([], |row| {
            Ok(ComponentGroup {
                id: row.get(0)?,
                name: row.get(1)?,
                description: row.get(2)?,
                display_order: row.get(3)?,
            })
        })
        .map_err(|e| AppError::db("DB_QUERY_FAILED", "Failed to query groups", e))?;

    collect_rows(rows, "component group")
}

pub fn create_component(conn: &Connection, component: &NewComponent) -> Result<i64, AppError> {
    validate_name("Component name", &component.name)?;
    let now = timestamps::now_utc()?;
    conn.execute(
        r#"
      INSERT INTO components(group_id, name, description, tier, display_order, is_active, created_at)
      VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6)
      "#,
        params![
            component.group_id,
            component.name.trim(),
            component.description,
            component.tier,
            component.display_order,
            now
        ],
    )
    .map_err(|e| AppError::db("DB_INSERT_FAILED", "Failed to insert component", e))?;
    Ok(conn.last_insert_rowid())
}

const COMPONENT_COLUMNS: &str = "id, group_id, name, description, tier, display_order, is_active";

fn component_from_row(row: &Row<'_>) -> rusqlite::Result<Component> {
    Ok(Component {
        id: row.get(0)?,
        group_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        tier: row.get(4)?,
        display_order: row.get(5)?,
        is_active: row.get(6)?,
    })
}

pub fn get_component(conn: &Connection, id: i64) -> Result<Component, AppError> {
    conn.query_row(
        &format!("SELECT {COMPONENT_COLUMNS} FROM components WHERE id = ?1"),
        [id],
        component_from_row,
    )
    .optional()
    .map_err(|e| AppError::db("DB_QUERY_FAILED", "Failed to query component", e))?
    .ok_or_else(|| not_found("Component", id))
}

/// Active components in display order. Inactive components never take part in aggregation.
pub fn list_active_components(conn: &Connection) -> Result<Vec<Component>, AppError> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {COMPONENT_COLUMNS} FROM components WHERE is_active = 1 ORDER BY display_order ASC, name ASC, id ASC"
        ))
        .map_err(|e| AppError::db("DB_QUERY_FAILED", "Failed to prepare components query", e))?;
    let rows = stmt
        .query_map([], component_from_row)
        .map_err(|e| AppError::db("DB_QUERY_FAILED", "Failed to query components", e))?;
    collect_rows(rows, "component")
}

/// Components are soft-deactivated rather than deleted so historic impacts stay resolvable.
pub fn set_component_active(conn: &Connection, id: i64, active: bool) -> Result<(), AppError> {
    let changed = conn
        .execute(
            "UPDATE components SET is_active = ?1 WHERE id = ?2",
            params![active, id],
        )
        .map_err(|e| AppError::db("DB_UPDATE_FAILED", "Failed to update component", e))?;
    if changed == 0 {
        return Err(not_found("Component", id));
    }
    Ok(())
}

/// Reject impact lists that reference unknown components.
pub(crate) fn ensure_components_exist(conn: &Connection, ids: &[i64]) -> Result<(), AppError> {
    let mut missing = Vec::new();
    for id in ids {
        let exists: bool = conn
            .query_row("SELECT EXISTS(SELECT 1 FROM components WHERE id = ?1)", [id], |row| {
                row.get(0)
            })
            .map_err(|e| AppError::db("DB_QUERY_FAILED", "Failed to check component", e))?;
        if !exists {
            missing.push(id.to_string());
        }
    }
    if !missing.is_empty() {
        return Err(AppError::new("VALIDATION_COMPONENTS_NOT_FOUND", "Components not found")
            .with_details(format!("ids={}", missing.join(","))));
    }
    Ok(())
}
