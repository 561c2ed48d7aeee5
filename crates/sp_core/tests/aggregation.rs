use pretty_assertions::assert_eq;
use rusqlite::Connection;

use sp_core::db;
use sp_core::domain::{ComponentImpact, ComponentStatus, Impact, IncidentStatus, Severity, Tier};
use sp_core::overview::{compute_status_overview, OverviewSettings};
use sp_core::repo::incidents::{create_incident, resolve_incident, NewIncident};
use sp_core::repo::maintenance::{
    complete_maintenance, create_maintenance, start_maintenance, NewMaintenance,
};
use sp_core::repo::{create_component, set_component_active, NewComponent};

fn conn() -> Connection {
    let mut conn = db::open_in_memory().expect("open");
    db::migrate(&mut conn).expect("migrate");
    conn
}

fn component(conn: &Connection, name: &str, tier: i64) -> i64 {
    create_component(
        conn,
        &NewComponent {
            group_id: None,
            name: name.to_string(),
            description: None,
            tier: Tier::new(tier).expect("tier"),
            display_order: 0,
        },
    )
    .expect("component")
}

fn incident(conn: &mut Connection, impacts: &[(i64, Impact)]) -> i64 {
    create_incident(
        conn,
        &NewIncident {
            title: "Elevated errors".to_string(),
            severity: Severity::Critical,
            status: IncidentStatus::Investigating,
            started_at: "2026-01-01T00:00:00Z".to_string(),
            resolved_at: None,
            message: "Investigating".to_string(),
            components: impacts
                .iter()
                .map(|(component_id, impact)| ComponentImpact {
                    component_id: *component_id,
                    impact: *impact,
                })
                .collect(),
            source: "manual".to_string(),
            created_by: "ops".to_string(),
        },
    )
    .expect("incident")
}

fn in_progress_maintenance(conn: &mut Connection, component_id: i64, impact: Impact) -> i64 {
    let id = create_maintenance(
        conn,
        &NewMaintenance {
            title: "Planned upgrade".to_string(),
            description: None,
            start_at: "2026-01-01T00:00:00Z".to_string(),
            end_at: "2026-01-01T02:00:00Z".to_string(),
            components: vec![ComponentImpact {
                component_id,
                impact,
            }],
            created_by: "ops".to_string(),
        },
    )
    .expect("maintenance");
    start_maintenance(conn, id).expect("start");
    id
}

fn statuses(conn: &Connection) -> (ComponentStatus, Vec<(String, ComponentStatus)>) {
    let overview = compute_status_overview(conn, &OverviewSettings::default()).expect("overview");
    let components = overview
        .groups
        .iter()
        .flat_map(|g| g.components.iter())
        .map(|c| (c.name.clone(), c.status))
        .collect();
    (overview.global_status, components)
}

#[test]
fn tier_zero_outage_drives_global_major_outage() {
    let mut conn = conn();
    let a = component(&conn, "A", 0);
    component(&conn, "B", 3);
    incident(&mut conn, &[(a, Impact::Outage)]);

    let (global, components) = statuses(&conn);
    assert_eq!(global, ComponentStatus::MajorOutage);
    assert_eq!(
        components,
        vec![
            ("A".to_string(), ComponentStatus::MajorOutage),
            ("B".to_string(), ComponentStatus::Operational),
        ]
    );
}

#[test]
fn isolated_tier_three_degradation_is_global_degraded() {
    let mut conn = conn();
    component(&conn, "A", 0);
    component(&conn, "B", 1);
    let c = component(&conn, "C", 3);
    incident(&mut conn, &[(c, Impact::Degraded)]);

    let (global, components) = statuses(&conn);
    assert_eq!(global, ComponentStatus::Degraded);
    assert_eq!(components[2], ("C".to_string(), ComponentStatus::Degraded));
}

#[test]
fn outage_incident_beats_degraded_incident_and_maintenance() {
    let mut conn = conn();
    let a = component(&conn, "A", 0);
    incident(&mut conn, &[(a, Impact::Degraded)]);
    incident(&mut conn, &[(a, Impact::Outage)]);
    in_progress_maintenance(&mut conn, a, Impact::Degraded);

    let (_, components) = statuses(&conn);
    assert_eq!(components, vec![("A".to_string(), ComponentStatus::MajorOutage)]);
}

#[test]
fn maintenance_outage_alone_reads_as_maintenance() {
    let mut conn = conn();
    let a = component(&conn, "A", 0);
    let window = in_progress_maintenance(&mut conn, a, Impact::Outage);

    let (global, components) = statuses(&conn);
    assert_eq!(components, vec![("A".to_string(), ComponentStatus::Maintenance)]);
    assert_eq!(global, ComponentStatus::Maintenance);

    complete_maintenance(&conn, window).expect("complete");
    let (global, _) = statuses(&conn);
    assert_eq!(global, ComponentStatus::Operational);
}

#[test]
fn resolving_the_incident_restores_operational() {
    let mut conn = conn();
    let a = component(&conn, "A", 0);
    let id = incident(&mut conn, &[(a, Impact::Outage)]);
    resolve_incident(&mut conn, id, "Fixed", "ops").expect("resolve");

    let (global, components) = statuses(&conn);
    assert_eq!(global, ComponentStatus::Operational);
    assert_eq!(components, vec![("A".to_string(), ComponentStatus::Operational)]);
}

#[test]
fn deactivated_components_do_not_contribute() {
    let mut conn = conn();
    let a = component(&conn, "A", 0);
    component(&conn, "B", 0);
    incident(&mut conn, &[(a, Impact::Outage)]);
    set_component_active(&conn, a, false).expect("deactivate");

    let (global, components) = statuses(&conn);
    assert_eq!(global, ComponentStatus::Operational);
    assert_eq!(components, vec![("B".to_string(), ComponentStatus::Operational)]);
}
