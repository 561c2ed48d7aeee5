use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::domain::{Datasource, ExternalIncidentLink, IncidentStatus, ProviderKind, SyncStatus};
use crate::error::AppError;
use crate::secret;
use crate::timestamps;
use crate::validate::{
    validate_api_key, validate_base_url, validate_name, validate_sync_interval,
    DEFAULT_SYNC_INTERVAL_SECONDS,
};

use super::{collect_rows, not_found};

/// Message recorded on datasources found mid-sync when the process starts.
pub const SYNC_INTERRUPTED_MESSAGE: &str = "sync interrupted";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewDatasource {
    pub name: String,
    pub provider_type: ProviderKind,
    pub api_key: String,
    pub base_url: Option<String>,
    #[serde(default)]
    pub service_ids: Vec<String>,
    pub sync_interval_seconds: Option<i64>,
}

/// Partial update; `None` leaves a field untouched. `base_url: Some(None)` clears the override.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DatasourcePatch {
    pub name: Option<String>,
    pub api_key: Option<String>,
    pub base_url: Option<Option<String>>,
    pub service_ids: Option<Vec<String>>,
    pub enabled: Option<bool>,
    pub sync_interval_seconds: Option<i64>,
}

const DATASOURCE_COLUMNS: &str = "id, name, provider_type, api_key_sealed, base_url, \
     service_ids_json, enabled, sync_interval_seconds, last_sync_at, sync_status, sync_error";

fn datasource_from_row(row: &Row<'_>) -> rusqlite::Result<Datasource> {
    let service_ids_json: String = row.get(5)?;
    let service_ids: Vec<String> = serde_json::from_str(&service_ids_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(Datasource {
        id: row.get(0)?,
        name: row.get(1)?,
        provider_type: row.get(2)?,
        api_key_sealed: row.get(3)?,
        base_url: row.get(4)?,
        service_ids,
        enabled: row.get(6)?,
        sync_interval_seconds: row.get(7)?,
        last_sync_at: row.get(8)?,
        sync_status: row.get(9)?,
        sync_error: row.get(10)?,
    })
}

fn normalize_service_ids(ids: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for id in ids.iter().map(|s| s.trim()).filter(|s| !s.is_empty()) {
        if !out.iter().any(|existing| existing == id) {
            out.push(id.to_string());
        }
    }
    out
}

fn service_ids_json(ids: &[String]) -> Result<String, AppError> {
    serde_json::to_string(&normalize_service_ids(ids)).map_err(|e| {
        AppError::new("DATASOURCE_SERIALIZE_FAILED", "Failed to encode service ids")
            .with_details(e.to_string())
    })
}

fn normalize_base_url(base_url: Option<&str>) -> Result<Option<String>, AppError> {
    match base_url.map(str::trim) {
        None | Some("") => Ok(None),
        Some(raw) => validate_base_url(raw).map(Some),
    }
}

/// New datasources start disabled; enabling is a separate, explicit patch.
pub fn create_datasource(conn: &Connection, new: &NewDatasource) -> Result<i64, AppError> {
    validate_name("Datasource name", &new.name)?;
    validate_api_key(&new.api_key)?;
    let interval = new
        .sync_interval_seconds
        .unwrap_or(DEFAULT_SYNC_INTERVAL_SECONDS);
    validate_sync_interval(interval)?;
    let base_url = normalize_base_url(new.base_url.as_deref())?;
    let service_ids = service_ids_json(&new.service_ids)?;

    let now = timestamps::now_utc()?;
    conn.execute(
        r#"
      INSERT INTO datasources(name, provider_type, api_key_sealed, base_url, service_ids_json,
                              enabled, sync_interval_seconds, sync_status, created_at, updated_at)
      VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?7, ?8, ?8)
      "#,
        params![
            new.name.trim(),
            new.provider_type,
            secret::seal(new.api_key.trim()),
            base_url,
            service_ids,
            interval,
            SyncStatus::Idle,
            now
        ],
    )
    .map_err(|e| AppError::db("DB_INSERT_FAILED", "Failed to insert datasource", e))?;
    Ok(conn.last_insert_rowid())
}

pub fn get_datasource(conn: &Connection, id: i64) -> Result<Datasource, AppError> {
    conn.query_row(
        &format!("SELECT {DATASOURCE_COLUMNS} FROM datasources WHERE id = ?1"),
        [id],
        datasource_from_row,
    )
    .optional()
    .map_err(|e| AppError::db("DB_QUERY_FAILED", "Failed to query datasource", e))?
    .ok_or_else(|| not_found("Datasource", id))
}

fn query_datasources(conn: &Connection, filter: &str) -> Result<Vec<Datasource>, AppError> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {DATASOURCE_COLUMNS} FROM datasources {filter} ORDER BY name ASC, id ASC"
        ))
        .map_err(|e| AppError::db("DB_QUERY_FAILED", "Failed to prepare datasources query", e))?;
    let rows = stmt
        .query_map([], datasource_from_row)
        .map_err(|e| AppError::db("DB_QUERY_FAILED", "Failed to query datasources", e))?;
    collect_rows(rows, "datasource")
}

pub fn list_datasources(conn: &Connection) -> Result<Vec<Datasource>, AppError> {
    query_datasources(conn, "")
}

pub fn list_enabled_datasources(conn: &Connection) -> Result<Vec<Datasource>, AppError> {
    query_datasources(conn, "WHERE enabled = 1")
}

/// Settings-layer update. Sync bookkeeping columns are never touched here.
pub fn update_datasource(
    conn: &Connection,
    id: i64,
    patch: &DatasourcePatch,
) -> Result<Datasource, AppError> {
    let current = get_datasource(conn, id)?;

    let name = match &patch.name {
        Some(name) => {
            validate_name("Datasource name", name)?;
            name.trim().to_string()
        }
        None => current.name,
    };
    let api_key_sealed = match &patch.api_key {
        Some(key) => {
            validate_api_key(key)?;
            secret::seal(key.trim())
        }
        None => current.api_key_sealed,
    };
    let base_url = match &patch.base_url {
        Some(url) => normalize_base_url(url.as_deref())?,
        None => current.base_url,
    };
    let service_ids = service_ids_json(patch.service_ids.as_ref().unwrap_or(&current.service_ids))?;
    let interval = patch
        .sync_interval_seconds
        .unwrap_or(current.sync_interval_seconds);
    validate_sync_interval(interval)?;
    let enabled = patch.enabled.unwrap_or(current.enabled);

    let now = timestamps::now_utc()?;
    conn.execute(
        r#"
      UPDATE datasources
      SET name = ?1, api_key_sealed = ?2, base_url = ?3, service_ids_json = ?4,
          enabled = ?5, sync_interval_seconds = ?6, updated_at = ?7
      WHERE id = ?8
      "#,
        params![name, api_key_sealed, base_url, service_ids, enabled, interval, now, id],
    )
    .map_err(|e| AppError::db("DB_UPDATE_FAILED", "Failed to update datasource", e))?;

    get_datasource(conn, id)
}

/// Removes the datasource and its external links. Incidents it imported are kept.
pub fn delete_datasource(conn: &Connection, id: i64) -> Result<(), AppError> {
    let changed = conn
        .execute("DELETE FROM datasources WHERE id = ?1", [id])
        .map_err(|e| AppError::db("DB_DELETE_FAILED", "Failed to delete datasource", e))?;
    if changed == 0 {
        return Err(not_found("Datasource", id));
    }
    Ok(())
}

/// The per-datasource sync guard: a compare-and-swap into `syncing`. Returns `false` when
/// another run already holds it.
pub fn try_begin_sync(conn: &Connection, id: i64) -> Result<bool, AppError> {
    let changed = conn
        .execute(
            "UPDATE datasources SET sync_status = ?1 WHERE id = ?2 AND sync_status <> ?1",
            params![SyncStatus::Syncing, id],
        )
        .map_err(|e| AppError::db("DB_UPDATE_FAILED", "Failed to acquire sync guard", e))?;
    if changed == 1 {
        return Ok(true);
    }
    // Zero rows: either already syncing or no such datasource.
    get_datasource(conn, id)?;
    Ok(false)
}

/// Release the guard, recording the run outcome. `last_sync_at` is the run start time.
pub fn finish_sync(
    conn: &Connection,
    id: i64,
    started_at: &str,
    outcome: Result<(), &str>,
) -> Result<(), AppError> {
    let (status, error) = match outcome {
        Ok(()) => (SyncStatus::Success, None),
        Err(message) => (SyncStatus::Error, Some(message)),
    };
    let changed = conn
        .execute(
            r#"
      UPDATE datasources
      SET sync_status = ?1, sync_error = ?2, last_sync_at = ?3
      WHERE id = ?4
      "#,
            params![status, error, started_at, id],
        )
        .map_err(|e| AppError::db("DB_UPDATE_FAILED", "Failed to record sync result", e))?;
    if changed == 0 {
        return Err(not_found("Datasource", id));
    }
    Ok(())
}

/// Datasources left `syncing` by a process that died mid-run are moved to `error` so the
/// guard can be acquired again. Returns the number of rows reset.
pub fn recover_interrupted_syncs(conn: &Connection) -> Result<usize, AppError> {
    conn.execute(
        "UPDATE datasources SET sync_status = ?1, sync_error = ?2 WHERE sync_status = ?3",
        params![SyncStatus::Error, SYNC_INTERRUPTED_MESSAGE, SyncStatus::Syncing],
    )
    .map_err(|e| AppError::db("DB_UPDATE_FAILED", "Failed to recover interrupted syncs", e))
}

pub fn find_external_link(
    conn: &Connection,
    datasource_id: i64,
    external_id: &str,
) -> Result<Option<ExternalIncidentLink>, AppError> {
    conn.query_row(
        r#"
      SELECT id, datasource_id, external_id, incident_id, external_url, upstream_status,
             synced_at
      FROM external_incidents
      WHERE datasource_id = ?1 AND external_id = ?2
      "#,
        params![datasource_id, external_id],
        |row| {
            Ok(ExternalIncidentLink {
                id: row.get(0)?,
                datasource_id: row.get(1)?,
                external_id: row.get(2)?,
                incident_id: row.get(3)?,
                external_url: row.get(4)?,
                upstream_status: row.get(5)?,
                synced_at: row.get(6)?,
            })
        },
    )
    .optional()
    .map_err(|e| {
        AppError::db(
            "DB_QUERY_FAILED",
            "Failed to query external incident link",
            e,
        )
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewExternalLink<'a> {
    pub datasource_id: i64,
    pub external_id: &'a str,
    pub incident_id: i64,
    pub external_url: Option<&'a str>,
    pub upstream_status: IncidentStatus,
    pub raw_json: &'a str,
    pub synced_at: &'a str,
}

pub fn insert_external_link(
    conn: &Connection,
    link: &NewExternalLink<'_>,
) -> Result<i64, AppError> {
    conn.execute(
        r#"
      INSERT INTO external_incidents(datasource_id, external_id, incident_id, external_url,
                                     upstream_status, raw_json, synced_at)
      VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
      "#,
        params![
            link.datasource_id,
            link.external_id,
            link.incident_id,
            link.external_url,
            link.upstream_status,
            link.raw_json,
            link.synced_at
        ],
    )
    .map_err(|e| {
        AppError::db(
            "DB_INSERT_FAILED",
            "Failed to insert external incident link",
            e,
        )
    })?;
    Ok(conn.last_insert_rowid())
}

/// Record what the provider reported on this sync without touching the linked incident.
pub fn touch_external_link(
    conn: &Connection,
    link_id: i64,
    upstream_status: IncidentStatus,
    raw_json: &str,
    synced_at: &str,
) -> Result<(), AppError> {
    conn.execute(
        r#"
      UPDATE external_incidents
      SET upstream_status = ?1, raw_json = ?2, synced_at = ?3
      WHERE id = ?4
      "#,
        params![upstream_status, raw_json, synced_at, link_id],
    )
    .map_err(|e| {
        AppError::db(
            "DB_UPDATE_FAILED",
            "Failed to refresh external incident link",
            e,
        )
    })?;
    Ok(())
}

pub fn count_external_links(conn: &Connection, datasource_id: i64) -> Result<i64, AppError> {
    conn.query_row(
        "SELECT COUNT(*) FROM external_incidents WHERE datasource_id = ?1",
        [datasource_id],
        |row| row.get(0),
    )
    .map_err(|e| {
        AppError::db(
            "DB_QUERY_FAILED",
            "Failed to count external incident links",
            e,
        )
    })
}
