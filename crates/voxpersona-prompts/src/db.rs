use rusqlite::{Connection, Result};

/// Initialise the prompt catalogue tables. Safe to call on every startup
/// (idempotent). The runtime only ever reads these tables; rows are written
/// by the external seeding tool that walks the prompt directory tree.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS scenario (
            id      INTEGER PRIMARY KEY AUTOINCREMENT,
            name    TEXT NOT NULL UNIQUE
        );
        CREATE TABLE IF NOT EXISTS report_type (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            desc        TEXT NOT NULL,
            scenario_id INTEGER NOT NULL REFERENCES scenario(id),
            UNIQUE(desc, scenario_id)
        );
        CREATE TABLE IF NOT EXISTS building_type (
            id      INTEGER PRIMARY KEY AUTOINCREMENT,
            name    TEXT NOT NULL UNIQUE
        );
        CREATE TABLE IF NOT EXISTS prompt (
            id       INTEGER PRIMARY KEY AUTOINCREMENT,
            text     TEXT NOT NULL,
            run_part INTEGER NOT NULL DEFAULT 1,
            is_json  INTEGER NOT NULL DEFAULT 0
        );
        CREATE TABLE IF NOT EXISTS prompt_building_report (
            prompt_id      INTEGER NOT NULL REFERENCES prompt(id),
            building_id    INTEGER NOT NULL REFERENCES building_type(id),
            report_type_id INTEGER NOT NULL REFERENCES report_type(id),
            PRIMARY KEY (prompt_id, building_id, report_type_id)
        );
        CREATE TABLE IF NOT EXISTS named_prompt (
            id      INTEGER PRIMARY KEY AUTOINCREMENT,
            name    TEXT NOT NULL UNIQUE,
            text    TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_pbr_lookup
            ON prompt_building_report(report_type_id, building_id);",
    )
}
