use std::sync::Mutex;

use rusqlite::Connection;
use tracing::{debug, info};
use voxpersona_core::types::AnalysisContext;

use crate::error::{Result, StorageError};
use crate::types::{PersistedAnalysis, ReportGroup, Road, Transcription};

/// Write side of the audit trail plus the read queries RAG ingestion needs.
///
/// Every public operation opens its own transaction; `persist_analysis`
/// is the one multi-write unit of work — the transcription upsert, the
/// audit row and the user_road row commit together or not at all.
pub struct AuditRepository {
    db: Mutex<Connection>,
}

impl AuditRepository {
    /// Wrap an already-open (and `init_db`-initialised) connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            db: Mutex::new(conn),
        }
    }

    /// Look up a transcription by source name without creating one.
    pub fn find_transcription(&self, source_name: &str) -> Result<Option<Transcription>> {
        let db = self.db.lock().unwrap();
        find_transcription_in(&db, source_name)
    }

    /// Return the existing transcription id for `source_name`, or insert a
    /// new row. Re-uploads never overwrite the stored text.
    pub fn upsert_transcription(&self, source_name: &str, text: &str) -> Result<i64> {
        let mut db = self.db.lock().unwrap();
        let tx = db.transaction()?;
        let id = upsert_transcription_in(&tx, source_name, text)?;
        tx.commit()?;
        Ok(id)
    }

    pub fn get_or_create_employee(&self, name: &str) -> Result<i64> {
        let db = self.db.lock().unwrap();
        get_or_create_in(&db, "employee", name)
    }

    pub fn get_or_create_client(&self, name: &str) -> Result<i64> {
        let db = self.db.lock().unwrap();
        get_or_create_in(&db, "client", name)
    }

    pub fn get_or_create_city(&self, name: &str) -> Result<i64> {
        let db = self.db.lock().unwrap();
        get_or_create_in(&db, "city", name)
    }

    pub fn get_or_create_zone(&self, name: &str) -> Result<i64> {
        let db = self.db.lock().unwrap();
        get_or_create_in(&db, "zone", name)
    }

    /// Persist one finished analysis: transcription upsert, dimension
    /// lookups, the audit row and its user_road row, in one transaction.
    /// Partial writes are never visible.
    pub fn persist_analysis(
        &self,
        ctx: &AnalysisContext,
        source_name: &str,
        transcript_text: &str,
        audit_text: &str,
        road: Road,
    ) -> Result<PersistedAnalysis> {
        let mut db = self.db.lock().unwrap();
        let tx = db.transaction()?;

        let transcription_id = upsert_transcription_in(&tx, source_name, transcript_text)?;
        validate_road_in(&tx, road)?;

        let employee_id = get_or_create_in(&tx, "employee", &ctx.employee)?;
        let client_id = match &ctx.client {
            Some(name) => Some(get_or_create_in(&tx, "client", name)?),
            None => None,
        };
        let city_id = match &ctx.city {
            Some(name) => Some(get_or_create_in(&tx, "city", name)?),
            None => None,
        };
        if let Some(zone) = &ctx.zone {
            get_or_create_in(&tx, "zone", zone)?;
        }
        let place_id = get_or_create_place_in(&tx, &ctx.place, road.building_id)?;

        tx.execute(
            "INSERT INTO audit
             (text, transcription_id, employee_id, client_id, place_id, date, city_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                audit_text,
                transcription_id,
                employee_id,
                client_id,
                place_id,
                ctx.date,
                city_id,
            ],
        )?;
        let audit_id = tx.last_insert_rowid();

        tx.execute(
            "INSERT INTO user_road (audit_id, scenario_id, report_type_id, building_id)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![audit_id, road.scenario_id, road.report_type_id, road.building_id],
        )?;

        tx.commit()?;
        info!(audit_id, transcription_id, "analysis persisted");
        Ok(PersistedAnalysis {
            audit_id,
            transcription_id,
        })
    }

    /// All prior audits joined with their dimensions, grouped by
    /// (scenario, report_type) for RAG ingestion. `None` filters match all.
    pub fn grouped_reports(
        &self,
        scenario: Option<&str>,
        report_type: Option<&str>,
    ) -> Result<Vec<ReportGroup>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT s.name, rt.desc, a.text
             FROM audit a
             JOIN user_road ur ON ur.audit_id = a.id
             JOIN scenario s ON s.id = ur.scenario_id
             JOIN report_type rt ON rt.id = ur.report_type_id
             WHERE (?1 IS NULL OR s.name = ?1)
               AND (?2 IS NULL OR rt.desc = ?2)
             ORDER BY s.name, rt.desc, a.id",
        )?;
        let rows = stmt.query_map(rusqlite::params![scenario, report_type], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut groups: Vec<ReportGroup> = Vec::new();
        for row in rows.filter_map(|r| r.ok()) {
            let (scenario, report_type, text) = row;
            match groups.last_mut() {
                Some(g) if g.scenario == scenario && g.report_type == report_type => {
                    g.texts.push(text);
                }
                _ => groups.push(ReportGroup {
                    scenario,
                    report_type,
                    texts: vec![text],
                }),
            }
        }
        Ok(groups)
    }
}

// --- transaction-scoped helpers --------------------------------------------
//
// These take `&Connection` so they compose inside an ambient transaction
// (`rusqlite::Transaction` derefs to `Connection`) as well as standalone.

fn find_transcription_in(conn: &Connection, source_name: &str) -> Result<Option<Transcription>> {
    match conn.query_row(
        "SELECT id, text, source_name, sequence_no, created_at
         FROM transcription WHERE source_name = ?1",
        rusqlite::params![source_name],
        |row| {
            Ok(Transcription {
                id: row.get(0)?,
                text: row.get(1)?,
                source_name: row.get(2)?,
                sequence_no: row.get(3)?,
                created_at: row.get(4)?,
            })
        },
    ) {
        Ok(t) => Ok(Some(t)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(StorageError::Database(e)),
    }
}

fn upsert_transcription_in(conn: &Connection, source_name: &str, text: &str) -> Result<i64> {
    if let Some(existing) = find_transcription_in(conn, source_name)? {
        debug!(source_name, id = existing.id, "transcription reused");
        return Ok(existing.id);
    }

    let sequence_no: i64 = conn.query_row(
        "SELECT COALESCE(MAX(sequence_no), 0) + 1 FROM transcription",
        [],
        |row| row.get(0),
    )?;
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT OR IGNORE INTO transcription (text, source_name, sequence_no, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![text, source_name, sequence_no, now],
    )?;

    // Read back — handles the race where two writers insert simultaneously.
    let id = conn.query_row(
        "SELECT id FROM transcription WHERE source_name = ?1",
        rusqlite::params![source_name],
        |row| row.get(0),
    )?;
    Ok(id)
}

/// Get-or-create for the single-column name dimensions
/// (employee, client, city, zone). Idempotent under contention: the UNIQUE
/// constraint absorbs the losing insert and the re-select returns the
/// winner's id.
fn get_or_create_in(conn: &Connection, table: &str, name: &str) -> Result<i64> {
    let (insert_sql, select_sql) = match table {
        "employee" => (
            "INSERT OR IGNORE INTO employee (name) VALUES (?1)",
            "SELECT id FROM employee WHERE name = ?1",
        ),
        "client" => (
            "INSERT OR IGNORE INTO client (name) VALUES (?1)",
            "SELECT id FROM client WHERE name = ?1",
        ),
        "city" => (
            "INSERT OR IGNORE INTO city (name) VALUES (?1)",
            "SELECT id FROM city WHERE name = ?1",
        ),
        "zone" => (
            "INSERT OR IGNORE INTO zone (name) VALUES (?1)",
            "SELECT id FROM zone WHERE name = ?1",
        ),
        other => {
            return Err(StorageError::InvalidReference(format!(
                "unknown dimension table: {other}"
            )))
        }
    };
    conn.execute(insert_sql, rusqlite::params![name])?;
    let id = conn.query_row(select_sql, rusqlite::params![name], |row| row.get(0))?;
    Ok(id)
}

fn get_or_create_place_in(conn: &Connection, name: &str, building_id: i64) -> Result<i64> {
    conn.execute(
        "INSERT OR IGNORE INTO place (name, building_type) VALUES (?1, ?2)",
        rusqlite::params![name, building_id],
    )?;
    let id = conn.query_row(
        "SELECT id FROM place WHERE name = ?1 AND building_type = ?2",
        rusqlite::params![name, building_id],
        |row| row.get(0),
    )?;
    Ok(id)
}

/// Check the triple before inserting audit/user_road rows so a bad
/// reference surfaces as `InvalidReference` rather than an FK violation.
fn validate_road_in(conn: &Connection, road: Road) -> Result<()> {
    let scenario_of_report: Option<i64> = conn
        .query_row(
            "SELECT scenario_id FROM report_type WHERE id = ?1",
            rusqlite::params![road.report_type_id],
            |row| row.get(0),
        )
        .ok();
    match scenario_of_report {
        None => {
            return Err(StorageError::InvalidReference(format!(
                "report_type {} does not exist",
                road.report_type_id
            )))
        }
        Some(sid) if sid != road.scenario_id => {
            return Err(StorageError::InvalidReference(format!(
                "report_type {} belongs to scenario {}, not {}",
                road.report_type_id, sid, road.scenario_id
            )))
        }
        Some(_) => {}
    }

    let building_exists: bool = conn
        .query_row(
            "SELECT 1 FROM building_type WHERE id = ?1",
            rusqlite::params![road.building_id],
            |_| Ok(true),
        )
        .unwrap_or(false);
    if !building_exists {
        return Err(StorageError::InvalidReference(format!(
            "building_type {} does not exist",
            road.building_id
        )));
    }
    Ok(())
}
