//! The run-once sync entry point and the connection test.
//!
//! `run_sync` is trigger-agnostic: the scheduler and a human "Sync Now" call it the same way.
//! Failures inside a run never escape as `Err`; they land in the returned `SyncResult` and in
//! the datasource's `sync_error`. `Err` is reserved for a missing datasource or a database that
//! cannot record the run at all.

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use sp_core::domain::Datasource;
use sp_core::error::AppError;
use sp_core::repo::datasources::{finish_sync, get_datasource, try_begin_sync};
use sp_core::secret;
use sp_core::timestamps;
use sp_core::validate::validate_base_url;

use crate::error::{self, describe, SyncErrorKind};
use crate::mapping::{OPEN_STATUSES, RESOLVED_STATUSES};
use crate::provider::{Connector, IncidentFilter, Provider, ProviderClient};
use crate::reconcile::{reconcile_incident, Outcome, PassMode, RunContext};

pub const ALREADY_IN_PROGRESS: &str = "sync already in progress";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SyncSettings {
    pub open_page_limit: usize,
    pub resolved_lookback_limit: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            open_page_limit: 100,
            resolved_lookback_limit: 50,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncResult {
    pub success: bool,
    pub created: usize,
    pub updated: usize,
    /// Incidents left alone after repeated reconciliation conflicts.
    pub skipped: usize,
    pub total_fetched: usize,
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<SyncErrorKind>,
}

impl SyncResult {
    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Created(_) => self.created += 1,
            Outcome::Updated(_) => self.updated += 1,
            Outcome::Skipped => self.skipped += 1,
            Outcome::Unchanged => {}
        }
    }

    /// Whether the run wrote incidents, i.e. derived status may have changed.
    pub fn changed_incidents(&self) -> bool {
        self.created + self.updated > 0
    }

    /// Whether running again with the same datasource settings can succeed.
    pub fn is_retryable(&self) -> bool {
        self.error_kind.map_or(true, SyncErrorKind::is_retryable)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionTest {
    pub success: bool,
    pub message: String,
}

/// Open the stored key and build the client. Everything here fails before any network call.
fn connect(connector: &Connector, datasource: &Datasource) -> Result<Provider, AppError> {
    if !datasource.has_api_key() {
        return Err(error::configuration("API key not configured"));
    }
    let api_key = secret::open(&datasource.api_key_sealed)?;
    if api_key.trim().is_empty() {
        return Err(error::configuration("API key not configured"));
    }
    let base_url = datasource
        .base_url
        .as_deref()
        .map(validate_base_url)
        .transpose()?;

    tracing::debug!(
        datasource_id = datasource.id,
        provider = %datasource.provider_type,
        key = %secret::key_fingerprint(&api_key),
        "connecting to provider"
    );
    connector.connect(datasource.provider_type, &api_key, base_url.as_deref())
}

fn sync_datasource(
    conn: &mut Connection,
    connector: &Connector,
    settings: &SyncSettings,
    ctx: &RunContext<'_>,
    result: &mut SyncResult,
) -> Result<(), AppError> {
    let provider = connect(connector, ctx.datasource)?;
    let passes = [
        (OPEN_STATUSES, settings.open_page_limit, PassMode::CreateOrUpdate),
        (RESOLVED_STATUSES, settings.resolved_lookback_limit, PassMode::UpdateOnly),
    ];

    for (statuses, limit, mode) in passes {
        let filter = IncidentFilter {
            statuses: statuses.iter().map(|s| s.to_string()).collect(),
            service_ids: ctx.datasource.service_ids.clone(),
            limit,
        };
        let fetched = provider.list_incidents(&filter)?;
        result.total_fetched += fetched.len();

        // Provider order is preserved; each incident commits on its own.
        for external in &fetched {
            result.record(reconcile_incident(conn, ctx, external, mode)?);
        }
    }
    Ok(())
}

/// Run one sync for `datasource_id` now.
pub fn run_sync(
    conn: &mut Connection,
    connector: &Connector,
    settings: &SyncSettings,
    datasource_id: i64,
) -> Result<SyncResult, AppError> {
    let datasource = get_datasource(conn, datasource_id)?;
    let started_at = timestamps::now_utc()?;

    if !try_begin_sync(conn, datasource_id)? {
        tracing::info!(datasource_id, "sync skipped: already in progress");
        return Ok(SyncResult {
            success: false,
            error: Some(ALREADY_IN_PROGRESS.to_string()),
            ..SyncResult::default()
        });
    }
    tracing::info!(datasource_id, name = %datasource.name, "sync started");

    let ctx = RunContext {
        datasource: &datasource,
        started_at: &started_at,
    };
    let mut result = SyncResult::default();
    match sync_datasource(conn, connector, settings, &ctx, &mut result) {
        Ok(()) => {
            result.success = true;
            tracing::info!(
                datasource_id,
                created = result.created,
                updated = result.updated,
                skipped = result.skipped,
                total_fetched = result.total_fetched,
                "sync finished"
            );
        }
        Err(err) => {
            let kind = SyncErrorKind::classify(&err);
            let message = describe(&err);
            tracing::warn!(
                datasource_id,
                kind = ?kind,
                code = %err.code,
                error = %message,
                created = result.created,
                updated = result.updated,
                "sync failed"
            );
            result.error = Some(message);
            result.error_kind = Some(kind);
        }
    }

    let outcome = match &result.error {
        None => Ok(()),
        Some(message) => Err(message.as_str()),
    };
    release_with_retry(datasource_id, || {
        finish_sync(conn, datasource_id, &started_at, outcome)
    })?;
    Ok(result)
}

/// Release the in-progress guard, retrying once. A datasource left `syncing` refuses every
/// later run until the next process start.
fn release_with_retry<F>(datasource_id: i64, mut release: F) -> Result<(), AppError>
where
    F: FnMut() -> Result<(), AppError>,
{
    match release() {
        Ok(()) => Ok(()),
        Err(err) => {
            tracing::warn!(
                datasource_id,
                code = %err.code,
                error = %err,
                "failed to record sync outcome; retrying"
            );
            release()
        }
    }
}

/// Authenticate and fetch the provider identity. Sync bookkeeping is left untouched.
pub fn test_connection(
    conn: &Connection,
    connector: &Connector,
    datasource_id: i64,
) -> Result<ConnectionTest, AppError> {
    let datasource = get_datasource(conn, datasource_id)?;
    let outcome = connect(connector, &datasource).and_then(|p| p.test_connection());
    Ok(match outcome {
        Ok(identity) => ConnectionTest {
            success: true,
            message: format!("Connected as {identity}"),
        },
        Err(err) => {
            tracing::info!(datasource_id, code = %err.code, "connection test failed");
            ConnectionTest {
                success: false,
                message: describe(&err),
            }
        }
    })
}
