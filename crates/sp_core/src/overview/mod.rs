use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

use crate::domain::{ComponentStatus, MaintenanceWindow};
use crate::error::AppError;
use crate::repo::incidents::{
    list_active_incident_summaries, list_unresolved_incident_impacts, ActiveIncidentSummary,
};
use crate::repo::maintenance::{list_in_progress_maintenance_impacts, list_upcoming_maintenance};
use crate::repo::{list_active_components, list_groups};
use crate::status::{
    compute_component_statuses, compute_global_status, ActiveImpacts, ComponentStatusInfo,
};
use crate::timestamps;

/// Name of the trailing pseudo-group holding active components without a group.
pub const UNGROUPED_NAME: &str = "Other Services";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct OverviewSettings {
    pub upcoming_maintenance_days: i64,
    pub upcoming_maintenance_limit: usize,
}

impl Default for OverviewSettings {
    fn default() -> Self {
        Self {
            upcoming_maintenance_days: 7,
            upcoming_maintenance_limit: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupStatus {
    /// `None` for the ungrouped pseudo-group.
    pub id: Option<i64>,
    pub name: String,
    pub components: Vec<ComponentStatusInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusOverview {
    pub global_status: ComponentStatus,
    pub groups: Vec<GroupStatus>,
    pub active_incidents: Vec<ActiveIncidentSummary>,
    pub upcoming_maintenance: Vec<MaintenanceWindow>,
    pub last_updated: String,
}

pub fn compute_status_overview(
    conn: &Connection,
    settings: &OverviewSettings,
) -> Result<StatusOverview, AppError> {
    compute_status_overview_at(conn, settings, OffsetDateTime::now_utc())
}

/// Overview as of `now`. Reads are fetched up front, then reduced without further I/O.
pub fn compute_status_overview_at(
    conn: &Connection,
    settings: &OverviewSettings,
    now: OffsetDateTime,
) -> Result<StatusOverview, AppError> {
    let groups = list_groups(conn)?;
    let components = list_active_components(conn)?;
    let incident_rows = list_unresolved_incident_impacts(conn)?;
    let maintenance_rows = list_in_progress_maintenance_impacts(conn)?;

    let impacts = ActiveImpacts::from_rows(&incident_rows, &maintenance_rows);
    let statuses = compute_component_statuses(&components, &impacts);
    let global_status = compute_global_status(&statuses);

    let mut grouped: Vec<GroupStatus> = groups
        .iter()
        .map(|g| GroupStatus {
            id: Some(g.id),
            name: g.name.clone(),
            components: statuses
                .iter()
                .filter(|s| s.group_id == Some(g.id))
                .cloned()
                .collect(),
        })
        .filter(|g| !g.components.is_empty())
        .collect();

    // Components pointing at a group that no longer exists fall through to the pseudo-group.
    let ungrouped: Vec<ComponentStatusInfo> = statuses
        .iter()
        .filter(|s| match s.group_id {
            None => true,
            Some(id) => !groups.iter().any(|g| g.id == id),
        })
        .cloned()
        .collect();
    if !ungrouped.is_empty() {
        grouped.push(GroupStatus {
            id: None,
            name: UNGROUPED_NAME.to_string(),
            components: ungrouped,
        });
    }

    let from = timestamps::format_utc(now)?;
    let until = timestamps::format_utc(now + Duration::days(settings.upcoming_maintenance_days))?;
    let upcoming_maintenance =
        list_upcoming_maintenance(conn, &from, &until, settings.upcoming_maintenance_limit)?;

    Ok(StatusOverview {
        global_status,
        groups: grouped,
        active_incidents: list_active_incident_summaries(conn)?,
        upcoming_maintenance,
        last_updated: from,
    })
}
