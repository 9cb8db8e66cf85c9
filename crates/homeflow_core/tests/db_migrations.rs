use homeflow_core::db::migrations::{apply_migrations, latest_version};
use homeflow_core::db::{open_db, open_db_in_memory, DbError};
use rusqlite::Connection;

#[test]
fn open_db_in_memory_applies_all_migrations() {
    let conn = open_db_in_memory().unwrap();

    assert_eq!(schema_version(&conn), latest_version());
    for table in [
        "members",
        "chores",
        "chore_eligible_members",
        "assignments",
        "point_history",
        "sync_queue",
        "sync_dead_letters",
        "sync_state",
        "applied_changes",
        "sync_aliases",
    ] {
        assert_table_exists(&conn, table);
    }
}

#[test]
fn upgrade_marks_restricted_chores_and_moves_aliases() {
    let mut conn = Connection::open_in_memory().unwrap();
    conn.execute_batch(include_str!("../src/db/migrations/0001_family.sql"))
        .unwrap();
    conn.execute_batch(include_str!("../src/db/migrations/0002_sync.sql"))
        .unwrap();
    conn.execute_batch(
        "PRAGMA user_version = 2;
         INSERT INTO members (id, family_id, name) VALUES ('m1', 'f1', 'Alex');
         INSERT INTO chores (id, family_id, name, difficulty, interval_count, interval_unit)
             VALUES ('c1', 'f1', 'Dishes', 1, 1, 'day'), ('c2', 'f1', 'Trash', 1, 1, 'day');
         INSERT INTO chore_eligible_members (chore_id, member_id) VALUES ('c1', 'm1');
         INSERT INTO sync_state (key, value) VALUES ('alias:local-1', 'remote-1');
         INSERT INTO sync_state (key, value) VALUES ('last_sync_at', '42');",
    )
    .unwrap();

    apply_migrations(&mut conn).unwrap();

    let restricted: Vec<(String, i64)> = conn
        .prepare("SELECT id, eligibility_restricted FROM chores ORDER BY id;")
        .unwrap()
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(
        restricted,
        vec![("c1".to_string(), 1), ("c2".to_string(), 0)]
    );

    let alias: String = conn
        .query_row(
            "SELECT remote_id FROM sync_aliases WHERE local_id = 'local-1';",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(alias, "remote-1");
    let state_keys: i64 = conn
        .query_row("SELECT COUNT(*) FROM sync_state;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(state_keys, 1);
}

#[test]
fn connections_enforce_foreign_keys() {
    let conn = open_db_in_memory().unwrap();
    let enabled: i64 = conn
        .query_row("PRAGMA foreign_keys;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(enabled, 1);
}

#[test]
fn opening_same_database_twice_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("family.db");

    let conn_first = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn_first), latest_version());
    drop(conn_first);

    let conn_second = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn_second), latest_version());
    assert_table_exists(&conn_second, "assignments");
    assert_table_exists(&conn_second, "sync_queue");
}

#[test]
fn opening_database_with_newer_schema_version_returns_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.db");

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("PRAGMA user_version = 999;").unwrap();
    drop(conn);

    let err = open_db(&path).unwrap_err();
    match err {
        DbError::UnsupportedSchemaVersion {
            db_version,
            latest_supported,
        } => {
            assert_eq!(db_version, 999);
            assert_eq!(latest_supported, latest_version());
        }
        other => panic!("unexpected error: {other}"),
    }
}

fn schema_version(conn: &Connection) -> u32 {
    conn.query_row("PRAGMA user_version;", [], |row| row.get(0))
        .unwrap()
}

fn assert_table_exists(conn: &Connection, table_name: &str) {
    let exists: i64 = conn
        .query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = 'table' AND name = ?1
            );",
            [table_name],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(exists, 1, "table {table_name} does not exist");
}
