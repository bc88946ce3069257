use agentdb::db;
use agentdb::db::migrations::{get_schema_version, run_migrations, CURRENT_SCHEMA_VERSION};

fn column_names(conn: &rusqlite::Connection, table: &str) -> Vec<String> {
    conn.prepare(&format!("PRAGMA table_info({table})"))
        .unwrap()
        .query_map([], |row| row.get::<_, String>(1))
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap()
}

#[test]
fn fresh_db_migrates_to_current_version() {
    let conn = db::open_memory_database().unwrap();
    assert_eq!(get_schema_version(&conn).unwrap(), CURRENT_SCHEMA_VERSION);
}

#[test]
fn migrations_are_idempotent() {
    let conn = db::open_memory_database().unwrap();
    // Running again should be a no-op
    run_migrations(&conn).unwrap();
    assert_eq!(get_schema_version(&conn).unwrap(), CURRENT_SCHEMA_VERSION);
}

#[test]
fn manual_v1_db_upgrades_correctly() {
    // Simulate a v1 journal that hasn't been migrated
    let conn = rusqlite::Connection::open_in_memory().unwrap();
    db::schema::init_schema(&conn).unwrap();

    assert_eq!(get_schema_version(&conn).unwrap(), 1);
    assert!(!column_names(&conn, "attestation_log").contains(&"resolved_at".to_string()));

    run_migrations(&conn).unwrap();

    assert_eq!(get_schema_version(&conn).unwrap(), CURRENT_SCHEMA_VERSION);
    assert!(column_names(&conn, "attestation_log").contains(&"resolved_at".to_string()));
}

#[test]
fn on_disk_journal_reports_health() {
    let dir = tempfile::tempdir().unwrap();
    let conn = db::open_database(dir.path().join("journal.db")).unwrap();
    let report = db::check_database_health(&conn).unwrap();
    assert!(report.integrity_ok);
    assert_eq!(report.schema_version, CURRENT_SCHEMA_VERSION);
    assert_eq!((report.node_count, report.log_count, report.rejection_count), (0, 0, 0));
}
