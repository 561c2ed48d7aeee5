use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::domain::{ComponentImpact, Impact, IncidentStatus, Severity, Tier};
use crate::error::AppError;
use crate::repo::incidents::{create_incident, NewIncident};
use crate::repo::maintenance::{create_maintenance, start_maintenance, NewMaintenance};
use crate::repo::{create_component, create_group, NewComponent, NewComponentGroup};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DemoSeedSummary {
    pub groups: usize,
    pub components: usize,
    pub incidents: usize,
    pub maintenance_windows: usize,
}

const DEMO_AUTHOR: &str = "demo";

// (group, [(component, tier)])
const DEMO_LAYOUT: &[(&str, &[(&str, i64)])] = &[
    ("Core Platform", &[("API", 0), ("Authentication", 0), ("Database", 1)]),
    ("Customer Facing", &[("Web App", 1), ("Mobile App", 2)]),
];

const DEMO_UNGROUPED: &[(&str, i64)] = &[("Status Emails", 3)];

fn ensure_empty(conn: &Connection) -> Result<(), AppError> {
    let existing: i64 = conn
        .query_row("SELECT COUNT(*) FROM components", [], |row| row.get(0))
        .map_err(|e| AppError::db("DB_QUERY_FAILED", "Failed to count components", e))?;
    if existing > 0 {
        return Err(AppError::new(
            "DEMO_ALREADY_SEEDED",
            "Database already has components; demo data is only seeded into an empty database",
        )
        .with_details(format!("components={existing}")));
    }
    Ok(())
}

/// Deterministic dataset that exercises every aggregation rule: a degraded tier-2 component,
/// a tier-1 component under maintenance, one resolved incident and one upcoming window.
pub fn seed_demo_dataset(conn: &mut Connection) -> Result<DemoSeedSummary, AppError> {
    ensure_empty(conn)?;

    let mut summary = DemoSeedSummary {
        groups: 0,
        components: 0,
        incidents: 0,
        maintenance_windows: 0,
    };
    let mut ids = Vec::new();

    for (order, (group_name, components)) in DEMO_LAYOUT.iter().enumerate() {
        let group_id = create_group(
            conn,
            &NewComponentGroup {
                name: group_name.to_string(),
                description: None,
                display_order: order as i64,
            },
        )?;
        summary.groups += 1;
        for (position, (name, tier)) in components.iter().enumerate() {
            let id = create_component(
                conn,
                &NewComponent {
                    group_id: Some(group_id),
                    name: name.to_string(),
                    description: None,
                    tier: Tier::new(*tier)?,
                    display_order: position as i64,
                },
            )?;
            ids.push((*name, id));
            summary.components += 1;
        }
    }
    for (name, tier) in DEMO_UNGROUPED {
        let id = create_component(
            conn,
            &NewComponent {
                group_id: None,
                name: name.to_string(),
                description: None,
                tier: Tier::new(*tier)?,
                display_order: 0,
            },
        )?;
        ids.push((*name, id));
        summary.components += 1;
    }

    let component = |name: &str| -> Result<i64, AppError> {
        ids.iter()
            .find(|(n, _)| *n == name)
            .map(|(_, id)| *id)
            .ok_or_else(|| {
                AppError::new(
                    "DEMO_LAYOUT_INVALID",
                    format!("Unknown demo component {name}"),
                )
            })
    };

    create_incident(
        conn,
        &NewIncident {
            title: "Mobile push notifications delayed".to_string(),
            severity: Severity::Minor,
            status: IncidentStatus::Identified,
            started_at: "2026-01-10T08:00:00Z".to_string(),
            resolved_at: None,
            message: "Push delivery is running behind; a fix is being rolled out.".to_string(),
            components: vec![ComponentImpact {
                component_id: component("Mobile App")?,
                impact: Impact::Degraded,
            }],
            source: "manual".to_string(),
            created_by: DEMO_AUTHOR.to_string(),
        },
    )?;
    create_incident(
        conn,
        &NewIncident {
            title: "Login errors for SSO users".to_string(),
            severity: Severity::Major,
            status: IncidentStatus::Resolved,
            started_at: "2026-01-05T14:00:00Z".to_string(),
            resolved_at: Some("2026-01-05T15:10:00Z".to_string()),
            message: "Identity provider certificate rotated; logins recovered.".to_string(),
            components: vec![ComponentImpact {
                component_id: component("Authentication")?,
                impact: Impact::Outage,
            }],
            source: "manual".to_string(),
            created_by: DEMO_AUTHOR.to_string(),
        },
    )?;
    summary.incidents += 2;

    let failover = create_maintenance(
        conn,
        &NewMaintenance {
            title: "Database failover drill".to_string(),
            description: Some("Primary is promoted from the standby region.".to_string()),
            start_at: "2026-01-10T02:00:00Z".to_string(),
            end_at: "2026-01-10T04:00:00Z".to_string(),
            components: vec![ComponentImpact {
                component_id: component("Database")?,
                impact: Impact::Degraded,
            }],
            created_by: DEMO_AUTHOR.to_string(),
        },
    )?;
    start_maintenance(conn, failover)?;
    create_maintenance(
        conn,
        &NewMaintenance {
            title: "Web App framework upgrade".to_string(),
            description: None,
            start_at: "2099-01-01T00:00:00Z".to_string(),
            end_at: "2099-01-01T01:00:00Z".to_string(),
            components: vec![ComponentImpact {
                component_id: component("Web App")?,
                impact: Impact::Outage,
            }],
            created_by: DEMO_AUTHOR.to_string(),
        },
    )?;
    summary.maintenance_windows += 2;

    tracing::info!(
        groups = summary.groups,
        components = summary.components,
        incidents = summary.incidents,
        maintenance_windows = summary.maintenance_windows,
        "seeded demo dataset"
    );
    Ok(summary)
}
