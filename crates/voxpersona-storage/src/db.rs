use rusqlite::{Connection, Result};

/// Initialise audit-trail tables. Safe to call on every startup (idempotent).
///
/// The `user_road` and `place` tables reference the prompt-catalogue tables
/// (`scenario`, `report_type`, `building_type`), so the catalogue's
/// `init_db` must have run against the same database first.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    create_transcription_table(conn)?;
    create_dimension_tables(conn)?;
    create_audit_tables(conn)?;
    Ok(())
}

fn create_transcription_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS transcription (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            text        TEXT NOT NULL,
            source_name TEXT NOT NULL UNIQUE,
            sequence_no INTEGER NOT NULL,
            created_at  TEXT NOT NULL
        );",
    )
}

fn create_dimension_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS employee (
            id   INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE
        );
        CREATE TABLE IF NOT EXISTS client (
            id   INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE
        );
        CREATE TABLE IF NOT EXISTS city (
            id   INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE
        );
        CREATE TABLE IF NOT EXISTS zone (
            id   INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE
        );
        CREATE TABLE IF NOT EXISTS place (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            name          TEXT NOT NULL,
            building_type INTEGER NOT NULL REFERENCES building_type(id),
            UNIQUE(name, building_type)
        );",
    )
}

fn create_audit_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS audit (
            id               INTEGER PRIMARY KEY AUTOINCREMENT,
            text             TEXT NOT NULL,
            transcription_id INTEGER NOT NULL REFERENCES transcription(id),
            employee_id      INTEGER NOT NULL REFERENCES employee(id),
            client_id        INTEGER REFERENCES client(id),
            place_id         INTEGER NOT NULL REFERENCES place(id),
            date             TEXT NOT NULL,
            city_id          INTEGER REFERENCES city(id)
        );
        CREATE TABLE IF NOT EXISTS user_road (
            audit_id       INTEGER NOT NULL REFERENCES audit(id),
            scenario_id    INTEGER NOT NULL REFERENCES scenario(id),
            report_type_id INTEGER NOT NULL REFERENCES report_type(id),
            building_id    INTEGER NOT NULL REFERENCES building_type(id),
            PRIMARY KEY (audit_id)
        );
        CREATE INDEX IF NOT EXISTS idx_road_triple
            ON user_road(scenario_id, report_type_id);",
    )
}
