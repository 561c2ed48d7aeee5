use std::time::Duration;

use pretty_assertions::assert_eq;
use rusqlite::Connection;

use sp_core::db;
use sp_core::domain::{IncidentStatus, ProviderKind, Severity, SyncStatus};
use sp_core::repo::datasources::{
    count_external_links, create_datasource, find_external_link, get_datasource,
    update_datasource, DatasourcePatch, NewDatasource,
};
use sp_core::repo::incidents::{
    append_incident_update, count_incidents, get_incident, list_incident_updates,
    resolve_incident, IncidentUpdateInput,
};
use sp_sync::provider::mock::mock_incident;
use sp_sync::provider::{Connector, MockProvider};
use sp_sync::{run_sync, test_connection, SyncSettings};

fn setup(mock: &MockProvider, api_key: &str) -> (Connection, Connector, i64) {
    let mut conn = db::open_in_memory().expect("open");
    db::migrate(&mut conn).expect("migrate");
    let id = create_datasource(
        &conn,
        &NewDatasource {
            name: "Primary".to_string(),
            provider_type: ProviderKind::Mock,
            api_key: api_key.to_string(),
            base_url: None,
            service_ids: vec![],
            sync_interval_seconds: None,
        },
    )
    .expect("datasource");
    let connector = Connector::with_mock(Duration::from_secs(2), mock.clone());
    (conn, connector, id)
}

fn single(status: &str) -> MockProvider {
    let mock = MockProvider::new();
    mock.set_incidents(vec![mock_incident(
        "E1",
        "Checkout failing",
        status,
        "high",
        "PSVC001",
        "2026-01-01T00:00:00Z",
    )]);
    mock
}

fn linked_incident(conn: &Connection, datasource_id: i64, external_id: &str) -> i64 {
    find_external_link(conn, datasource_id, external_id)
        .expect("lookup")
        .expect("link")
        .incident_id
}

fn upstream_status(
    conn: &Connection,
    datasource_id: i64,
    external_id: &str,
) -> Option<IncidentStatus> {
    find_external_link(conn, datasource_id, external_id)
        .expect("lookup")
        .expect("link")
        .upstream_status
}

#[test]
fn first_sync_imports_open_incidents_only() {
    let mock = MockProvider::with_sample_data();
    let (mut conn, connector, id) = setup(&mock, "test-api-key");

    let result = run_sync(&mut conn, &connector, &SyncSettings::default(), id).expect("sync");
    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.created, 5);
    assert_eq!(result.updated, 0);
    assert_eq!(result.total_fetched, 8);
    assert_eq!(count_incidents(&conn).expect("count"), 5);
    assert_eq!(mock.list_calls(), 2);

    let ds = get_datasource(&conn, id).expect("datasource");
    assert_eq!(ds.sync_status, SyncStatus::Success);
    assert_eq!(ds.sync_error, None);
    assert!(ds.last_sync_at.is_some());
}

#[test]
fn imported_incident_carries_provenance() {
    let mock = single("acknowledged");
    let (mut conn, connector, id) = setup(&mock, "test-api-key");
    run_sync(&mut conn, &connector, &SyncSettings::default(), id).expect("sync");

    let incident = get_incident(&conn, linked_incident(&conn, id, "E1")).expect("incident");
    assert_eq!(incident.status, IncidentStatus::Identified);
    assert_eq!(incident.severity, Severity::Critical);
    assert_eq!(incident.source, "mock");
    assert_eq!(incident.created_by, "mock:Primary");
    assert_eq!(incident.started_at, "2026-01-01T00:00:00Z");
    assert_eq!(incident.resolved_at, None);

    let updates = list_incident_updates(&conn, incident.id).expect("updates");
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].message, "Imported from mock");
    assert_eq!(updates[0].status_snapshot, IncidentStatus::Identified);
}

#[test]
fn second_sync_with_unchanged_feed_is_a_no_op() {
    let mock = MockProvider::with_sample_data();
    let (mut conn, connector, id) = setup(&mock, "test-api-key");
    run_sync(&mut conn, &connector, &SyncSettings::default(), id).expect("first");

    let snapshot = |conn: &Connection| -> Vec<(i64, String, i64, usize)> {
        let mut stmt = conn
            .prepare("SELECT id, status, version FROM incidents ORDER BY id")
            .expect("prepare");
        let rows: Vec<(i64, String, i64)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
            .expect("query")
            .collect::<Result<_, _>>()
            .expect("rows");
        rows.into_iter()
            .map(|(id, status, version)| {
                let updates = list_incident_updates(conn, id).expect("updates").len();
                (id, status, version, updates)
            })
            .collect()
    };
    let before = snapshot(&conn);

    let result = run_sync(&mut conn, &connector, &SyncSettings::default(), id).expect("second");
    assert!(result.success);
    assert_eq!((result.created, result.updated), (0, 0));
    assert_eq!(result.total_fetched, 8);
    assert_eq!(snapshot(&conn), before);
}

#[test]
fn upstream_resolution_appends_exactly_one_update() {
    let mock = single("triggered");
    let (mut conn, connector, id) = setup(&mock, "test-api-key");
    run_sync(&mut conn, &connector, &SyncSettings::default(), id).expect("first");
    let incident_id = linked_incident(&conn, id, "E1");
    assert_eq!(
        get_incident(&conn, incident_id).expect("incident").status,
        IncidentStatus::Investigating
    );

    mock.set_status("E1", "resolved", Some("2026-01-02T03:04:05+00:00"))
        .expect("resolve upstream");
    let result = run_sync(&mut conn, &connector, &SyncSettings::default(), id).expect("second");
    assert_eq!((result.created, result.updated), (0, 1));

    let incident = get_incident(&conn, incident_id).expect("incident");
    assert_eq!(incident.status, IncidentStatus::Resolved);
    assert_eq!(incident.resolved_at.as_deref(), Some("2026-01-02T03:04:05Z"));

    let updates = list_incident_updates(&conn, incident_id).expect("updates");
    assert_eq!(updates.len(), 2);
    assert_eq!(updates[1].status_snapshot, IncidentStatus::Resolved);
    assert_eq!(updates[1].message, "Status changed upstream: investigating → resolved");

    let result = run_sync(&mut conn, &connector, &SyncSettings::default(), id).expect("third");
    assert_eq!((result.created, result.updated), (0, 0));
    assert_eq!(list_incident_updates(&conn, incident_id).expect("updates").len(), 2);
}

#[test]
fn acknowledgement_is_tracked_and_resolution_is_final() {
    let mock = single("triggered");
    let (mut conn, connector, id) = setup(&mock, "test-api-key");
    run_sync(&mut conn, &connector, &SyncSettings::default(), id).expect("first");
    let incident_id = linked_incident(&conn, id, "E1");

    mock.set_status("E1", "acknowledged", None).expect("ack");
    run_sync(&mut conn, &connector, &SyncSettings::default(), id).expect("ack sync");
    assert_eq!(
        get_incident(&conn, incident_id).expect("incident").status,
        IncidentStatus::Identified
    );

    mock.set_status("E1", "resolved", Some("not a timestamp")).expect("resolve");
    run_sync(&mut conn, &connector, &SyncSettings::default(), id).expect("resolve sync");
    let resolved = get_incident(&conn, incident_id).expect("incident");
    let ds = get_datasource(&conn, id).expect("datasource");
    // Unparseable provider timestamps fall back to the run start time.
    assert_eq!(resolved.resolved_at, ds.last_sync_at);

    mock.set_status("E1", "triggered", None).expect("reopen");
    let result =
        run_sync(&mut conn, &connector, &SyncSettings::default(), id).expect("reopen sync");
    assert_eq!(result.updated, 0);
    let after = get_incident(&conn, incident_id).expect("incident");
    assert_eq!(after.status, IncidentStatus::Resolved);
    assert_eq!(after.resolved_at, resolved.resolved_at);
    assert_eq!(list_incident_updates(&conn, incident_id).expect("updates").len(), 3);
    assert_eq!(
        upstream_status(&conn, id, "E1"),
        Some(IncidentStatus::Investigating)
    );
}

#[test]
fn operator_edit_survives_an_unchanged_feed() {
    let mock = single("acknowledged");
    let (mut conn, connector, id) = setup(&mock, "test-api-key");
    run_sync(&mut conn, &connector, &SyncSettings::default(), id).expect("first");
    let incident_id = linked_incident(&conn, id, "E1");

    append_incident_update(
        &mut conn,
        incident_id,
        &IncidentUpdateInput {
            message: "Fix deployed, watching error rates".to_string(),
            status: Some(IncidentStatus::Monitoring),
            created_by: "ops@example.com".to_string(),
        },
    )
    .expect("operator update");

    let result = run_sync(&mut conn, &connector, &SyncSettings::default(), id).expect("second");
    assert_eq!((result.created, result.updated), (0, 0));
    let incident = get_incident(&conn, incident_id).expect("incident");
    assert_eq!(incident.status, IncidentStatus::Monitoring);
    let updates = list_incident_updates(&conn, incident_id).expect("updates");
    assert_eq!(updates.len(), 2);
    assert_eq!(updates[1].created_by, "ops@example.com");

    // A real upstream change still applies on top of the operator's status.
    mock.set_status("E1", "resolved", Some("2026-01-03T00:00:00Z"))
        .expect("resolve upstream");
    let result = run_sync(&mut conn, &connector, &SyncSettings::default(), id).expect("third");
    assert_eq!(result.updated, 1);
    let updates = list_incident_updates(&conn, incident_id).expect("updates");
    assert_eq!(updates.len(), 3);
    assert_eq!(updates[2].message, "Status changed upstream: monitoring → resolved");
}

#[test]
fn local_resolution_is_not_reopened_by_sync() {
    let mock = single("triggered");
    let (mut conn, connector, id) = setup(&mock, "test-api-key");
    run_sync(&mut conn, &connector, &SyncSettings::default(), id).expect("first");
    let incident_id = linked_incident(&conn, id, "E1");

    resolve_incident(&mut conn, incident_id, "Mitigated by failover", "ops@example.com")
        .expect("resolve locally");
    let resolved_at = get_incident(&conn, incident_id).expect("incident").resolved_at;

    let result = run_sync(&mut conn, &connector, &SyncSettings::default(), id).expect("second");
    assert!(result.success);
    assert_eq!(result.updated, 0);
    let incident = get_incident(&conn, incident_id).expect("incident");
    assert_eq!(incident.status, IncidentStatus::Resolved);
    assert_eq!(incident.resolved_at, resolved_at);
    assert_eq!(list_incident_updates(&conn, incident_id).expect("updates").len(), 2);
}

#[test]
fn links_without_upstream_status_are_backfilled_quietly() {
    let mock = single("acknowledged");
    let (mut conn, connector, id) = setup(&mock, "test-api-key");
    run_sync(&mut conn, &connector, &SyncSettings::default(), id).expect("first");
    conn.execute("UPDATE external_incidents SET upstream_status = NULL", [])
        .expect("clear upstream status");

    let result = run_sync(&mut conn, &connector, &SyncSettings::default(), id).expect("second");
    assert_eq!(result.updated, 0);
    assert_eq!(
        upstream_status(&conn, id, "E1"),
        Some(IncidentStatus::Identified)
    );
    let incident_id = linked_incident(&conn, id, "E1");
    assert_eq!(list_incident_updates(&conn, incident_id).expect("updates").len(), 1);
}

#[test]
fn incident_that_keeps_conflicting_is_skipped_and_retried_next_run() {
    let mock = single("triggered");
    let (mut conn, connector, id) = setup(&mock, "test-api-key");
    run_sync(&mut conn, &connector, &SyncSettings::default(), id).expect("first");
    let incident_id = linked_incident(&conn, id, "E1");

    // Every versioned write to the incident matches no row, as if another writer won the race.
    conn.execute_batch(
        "CREATE TRIGGER lose_race BEFORE UPDATE ON incidents BEGIN SELECT RAISE(IGNORE); END;",
    )
    .expect("trigger");
    mock.set_status("E1", "resolved", Some("2026-01-02T03:04:05Z"))
        .expect("resolve upstream");

    let result = run_sync(&mut conn, &connector, &SyncSettings::default(), id).expect("second");
    assert!(result.success, "{:?}", result.error);
    assert_eq!((result.created, result.updated, result.skipped), (0, 0, 1));
    assert_eq!(
        get_incident(&conn, incident_id).expect("incident").status,
        IncidentStatus::Investigating
    );
    assert_eq!(
        upstream_status(&conn, id, "E1"),
        Some(IncidentStatus::Investigating)
    );

    conn.execute_batch("DROP TRIGGER lose_race;").expect("drop trigger");
    let result = run_sync(&mut conn, &connector, &SyncSettings::default(), id).expect("third");
    assert_eq!((result.updated, result.skipped), (1, 0));
    assert_eq!(
        get_incident(&conn, incident_id).expect("incident").status,
        IncidentStatus::Resolved
    );
}

#[test]
fn incidents_missing_from_the_feed_are_kept() {
    let mock = single("triggered");
    let (mut conn, connector, id) = setup(&mock, "test-api-key");
    run_sync(&mut conn, &connector, &SyncSettings::default(), id).expect("first");

    mock.set_incidents(vec![]);
    let result = run_sync(&mut conn, &connector, &SyncSettings::default(), id).expect("second");
    assert!(result.success);
    assert_eq!(result.total_fetched, 0);
    assert_eq!(count_incidents(&conn).expect("count"), 1);
    assert_eq!(
        get_incident(&conn, linked_incident(&conn, id, "E1"))
            .expect("incident")
            .status,
        IncidentStatus::Investigating
    );
}

#[test]
fn new_upstream_incident_is_imported_on_next_run() {
    let mock = MockProvider::with_sample_data();
    let (mut conn, connector, id) = setup(&mock, "test-api-key");
    run_sync(&mut conn, &connector, &SyncSettings::default(), id).expect("first");
    assert_eq!(count_external_links(&conn, id).expect("links"), 5);

    mock.push_incident(mock_incident(
        "PINC009",
        "Queue backlog growing",
        "triggered",
        "low",
        "PSVC003",
        "2026-01-02T00:00:00Z",
    ));
    let result = run_sync(&mut conn, &connector, &SyncSettings::default(), id).expect("second");
    assert_eq!((result.created, result.updated), (1, 0));
    assert_eq!(count_external_links(&conn, id).expect("links"), 6);

    let incident = get_incident(&conn, linked_incident(&conn, id, "PINC009")).expect("incident");
    assert_eq!(incident.severity, Severity::Major);
    assert_eq!(incident.title, "Queue backlog growing");
}

#[test]
fn service_filter_is_passed_to_the_provider() {
    let mock = MockProvider::with_sample_data();
    let (mut conn, connector, id) = setup(&mock, "test-api-key");
    update_datasource(
        &conn,
        id,
        &DatasourcePatch {
            service_ids: Some(vec!["PSVC002".to_string()]),
            ..Default::default()
        },
    )
    .expect("patch");

    let result = run_sync(&mut conn, &connector, &SyncSettings::default(), id).expect("sync");
    // Open incidents on PSVC002 in the sample feed: PINC002 and PINC005.
    assert_eq!(result.created, 2);
    assert!(find_external_link(&conn, id, "PINC002").expect("lookup").is_some());
    assert!(find_external_link(&conn, id, "PINC001").expect("lookup").is_none());
}

#[test]
fn missing_api_key_fails_before_any_provider_call() {
    let mock = MockProvider::with_sample_data();
    let (mut conn, connector, id) = setup(&mock, "test-api-key");
    conn.execute("UPDATE datasources SET api_key_sealed = '' WHERE id = ?1", [id])
        .expect("clear key");

    let result = run_sync(&mut conn, &connector, &SyncSettings::default(), id).expect("sync");
    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("API key not configured"));
    assert_eq!(mock.list_calls(), 0);

    let ds = get_datasource(&conn, id).expect("datasource");
    assert_eq!(ds.sync_status, SyncStatus::Error);
    assert_eq!(ds.sync_error.as_deref(), Some("API key not configured"));
}

#[test]
fn transport_failure_is_recorded_and_recovers_next_run() {
    let mock = MockProvider::with_sample_data();
    let (mut conn, connector, id) = setup(&mock, "test-api-key");
    mock.set_unreachable(true);

    let result = run_sync(&mut conn, &connector, &SyncSettings::default(), id).expect("sync");
    assert!(!result.success);
    let error = result.error.expect("error");
    assert!(error.starts_with("connection failed"), "{error}");
    assert_eq!(count_incidents(&conn).expect("count"), 0);
    assert_eq!(
        get_datasource(&conn, id).expect("datasource").sync_status,
        SyncStatus::Error
    );

    mock.set_unreachable(false);
    let result = run_sync(&mut conn, &connector, &SyncSettings::default(), id).expect("retry");
    assert!(result.success);
    assert_eq!(result.created, 5);
    let ds = get_datasource(&conn, id).expect("datasource");
    assert_eq!(ds.sync_status, SyncStatus::Success);
    assert_eq!(ds.sync_error, None);
}

#[test]
fn rejected_credentials_surface_provider_detail() {
    let mock = MockProvider::with_sample_data();
    let (mut conn, connector, id) = setup(&mock, "not-a-valid-key");

    let result = run_sync(&mut conn, &connector, &SyncSettings::default(), id).expect("sync");
    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("authentication rejected: HTTP 401"));
}

#[test]
fn test_connection_reports_identity_without_bookkeeping() {
    let mock = MockProvider::with_sample_data();
    let (conn, connector, id) = setup(&mock, "test-api-key");

    let outcome = test_connection(&conn, &connector, id).expect("test");
    assert!(outcome.success);
    assert_eq!(
        outcome.message,
        "Connected as Mock Admin (admin@mock-pagerduty.local)"
    );

    let ds = get_datasource(&conn, id).expect("datasource");
    assert_eq!(ds.sync_status, SyncStatus::Idle);
    assert_eq!(ds.last_sync_at, None);
    assert_eq!(mock.list_calls(), 0);
}

#[test]
fn test_connection_failure_is_a_result_not_an_error() {
    let mock = MockProvider::with_sample_data();
    let (conn, connector, id) = setup(&mock, "wrong-key");

    let outcome = test_connection(&conn, &connector, id).expect("test");
    assert!(!outcome.success);
    assert_eq!(outcome.message, "authentication rejected: HTTP 401");

    assert_eq!(
        test_connection(&conn, &connector, 404).unwrap_err().code,
        "DB_NOT_FOUND"
    );
}
