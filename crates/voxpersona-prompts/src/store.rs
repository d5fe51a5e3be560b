use std::sync::Mutex;

use rusqlite::Connection;
use tracing::debug;

use crate::error::{PromptError, Result};
use crate::types::{PromptStage, ResolvedPrompts};

/// Read-only view over the prompt catalogue.
///
/// Wraps a single SQLite connection in a `Mutex`; resolution queries are
/// cheap and the catalogue is written once by the seeding tool, so no
/// caching layer is needed.
pub struct PromptStore {
    db: Mutex<Connection>,
}

impl PromptStore {
    /// Wrap an already-open (and `init_db`-initialised) connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            db: Mutex::new(conn),
        }
    }

    /// Resolve the ordered prompt set for a triple.
    ///
    /// Ordering is stable: run_part ascending, then prompt id ascending.
    /// Fails with `NotFound` when the triple has no prompts; never partial.
    pub fn resolve(
        &self,
        scenario: &str,
        report_type: &str,
        building_type: &str,
    ) -> Result<ResolvedPrompts> {
        let db = self.db.lock().unwrap();

        let not_found = || PromptError::NotFound {
            scenario: scenario.to_string(),
            report_type: report_type.to_string(),
            building_type: building_type.to_string(),
        };

        let scenario_id: i64 = db
            .query_row(
                "SELECT id FROM scenario WHERE name = ?1",
                rusqlite::params![scenario],
                |row| row.get(0),
            )
            .map_err(|_| not_found())?;
        let report_type_id: i64 = db
            .query_row(
                "SELECT id FROM report_type WHERE desc = ?1 AND scenario_id = ?2",
                rusqlite::params![report_type, scenario_id],
                |row| row.get(0),
            )
            .map_err(|_| not_found())?;
        let building_id: i64 = db
            .query_row(
                "SELECT id FROM building_type WHERE name = ?1",
                rusqlite::params![building_type],
                |row| row.get(0),
            )
            .map_err(|_| not_found())?;

        let mut stmt = db.prepare(
            "SELECT p.id, p.text, p.run_part, p.is_json
             FROM prompt p
             JOIN prompt_building_report pbr ON pbr.prompt_id = p.id
             WHERE pbr.report_type_id = ?1 AND pbr.building_id = ?2
             ORDER BY p.run_part ASC, p.id ASC",
        )?;
        let stages: Vec<PromptStage> = stmt
            .query_map(rusqlite::params![report_type_id, building_id], |row| {
                Ok(PromptStage {
                    prompt_id: row.get(0)?,
                    text: row.get(1)?,
                    run_part: row.get(2)?,
                    is_json: row.get::<_, i64>(3)? != 0,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();

        if stages.is_empty() {
            return Err(not_found());
        }

        debug!(scenario, report_type, building_type, stages = stages.len(), "prompts resolved");

        Ok(ResolvedPrompts {
            scenario_id,
            report_type_id,
            building_id,
            stages,
        })
    }

    /// Fetch one of the flat, single-stage system prompts by name
    /// (role assignment, query classification).
    pub fn resolve_named(&self, name: &str) -> Result<String> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT text FROM named_prompt WHERE name = ?1",
            rusqlite::params![name],
            |row| row.get::<_, String>(0),
        ) {
            Ok(text) => Ok(text),
            Err(rusqlite::Error::QueryReturnedNoRows) => Err(PromptError::NamedNotFound {
                name: name.to_string(),
            }),
            Err(e) => Err(PromptError::Database(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;

    fn seeded_store() -> PromptStore {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        conn.execute_batch(
            "INSERT INTO scenario (name) VALUES ('interview');
             INSERT INTO report_type (desc, scenario_id) VALUES ('methodology', 1);
             INSERT INTO building_type (name) VALUES ('hotel');",
        )
        .unwrap();
        PromptStore::new(conn)
    }

    fn link(store: &PromptStore, text: &str, run_part: i64, is_json: bool) -> i64 {
        let db = store.db.lock().unwrap();
        db.execute(
            "INSERT INTO prompt (text, run_part, is_json) VALUES (?1, ?2, ?3)",
            rusqlite::params![text, run_part, is_json as i64],
        )
        .unwrap();
        let id = db.last_insert_rowid();
        db.execute(
            "INSERT INTO prompt_building_report (prompt_id, building_id, report_type_id)
             VALUES (?1, 1, 1)",
            rusqlite::params![id],
        )
        .unwrap();
        id
    }

    #[test]
    fn ordering_is_run_part_then_id_and_stable() {
        let store = seeded_store();
        // Insert out of order on purpose.
        link(&store, "part2-a", 2, false);
        link(&store, "part1-a", 1, false);
        link(&store, "part1-b", 1, false);
        link(&store, "json", 3, true);

        let first = store.resolve("interview", "methodology", "hotel").unwrap();
        let order: Vec<(i64, i64)> = first
            .stages
            .iter()
            .map(|s| (s.run_part, s.prompt_id))
            .collect();
        assert_eq!(order, vec![(1, 2), (1, 3), (2, 1), (3, 4)]);

        // Identical across calls.
        let second = store.resolve("interview", "methodology", "hotel").unwrap();
        assert_eq!(first.stages, second.stages);
    }

    #[test]
    fn empty_triple_is_not_found() {
        let store = seeded_store();
        let err = store
            .resolve("interview", "methodology", "hotel")
            .unwrap_err();
        assert!(matches!(err, PromptError::NotFound { .. }));
    }

    #[test]
    fn unknown_triple_is_not_found() {
        let store = seeded_store();
        link(&store, "p", 1, false);
        let err = store.resolve("design", "methodology", "hotel").unwrap_err();
        assert!(matches!(err, PromptError::NotFound { .. }));
    }

    #[test]
    fn named_prompt_roundtrip() {
        let store = seeded_store();
        {
            let db = store.db.lock().unwrap();
            db.execute(
                "INSERT INTO named_prompt (name, text) VALUES (?1, ?2)",
                rusqlite::params![crate::ASSIGN_ROLES, "label the speakers"],
            )
            .unwrap();
        }
        assert_eq!(
            store.resolve_named(crate::ASSIGN_ROLES).unwrap(),
            "label the speakers"
        );
        assert!(matches!(
            store.resolve_named(crate::CLASSIFY),
            Err(PromptError::NamedNotFound { .. })
        ));
    }
}
