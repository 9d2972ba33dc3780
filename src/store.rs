use crate::personas::Persona;
use crate::pipeline::SimulationRun;
use chrono::Utc;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use uuid::Uuid;

/// One persisted simulation row. Structured fields are stored serialized;
/// the store is an opaque save/query surface, not a query engine.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SimulationRecord {
    pub id: String,
    pub dilemma: String,
    pub process_hint: String,
    pub structure_json: String,
    pub personas_json: String,
    pub transcript_json: String,
    pub summary: String,
    pub keywords_json: String,
    pub suggestion: String,
    pub created_at: String,
}

pub struct SimulationStore {
    conn: Mutex<Connection>,
}

impl SimulationStore {
    pub fn new(path: &str) -> Result<Self, rusqlite::Error> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS simulations (
                id TEXT PRIMARY KEY,
                dilemma TEXT NOT NULL,
                process_hint TEXT NOT NULL,
                structure_json TEXT NOT NULL,
                personas_json TEXT NOT NULL,
                transcript_json TEXT NOT NULL,
                summary TEXT NOT NULL,
                keywords_json TEXT NOT NULL,
                suggestion TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
        ",
        )?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn save_simulation(
        &self,
        run: &SimulationRun,
    ) -> Result<SimulationRecord, crate::error::SimError> {
        let record = SimulationRecord {
            id: Uuid::new_v4().to_string(),
            dilemma: run.dilemma.clone(),
            process_hint: run.process_hint.clone(),
            structure_json: serde_json::to_string(&run.structure)
                .map_err(|e| crate::error::SimError::Validation(e.to_string()))?,
            personas_json: serde_json::to_string(&run.personas)
                .map_err(|e| crate::error::SimError::Validation(e.to_string()))?,
            transcript_json: serde_json::to_string(&run.transcript)
                .map_err(|e| crate::error::SimError::Validation(e.to_string()))?,
            summary: run.summary.clone(),
            keywords_json: serde_json::to_string(&run.keywords)
                .map_err(|e| crate::error::SimError::Validation(e.to_string()))?,
            suggestion: run.suggestion.clone(),
            created_at: Utc::now().to_rfc3339(),
        };

        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO simulations (id, dilemma, process_hint, structure_json, personas_json, transcript_json, summary, keywords_json, suggestion, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                record.id,
                record.dilemma,
                record.process_hint,
                record.structure_json,
                record.personas_json,
                record.transcript_json,
                record.summary,
                record.keywords_json,
                record.suggestion,
                record.created_at,
            ],
        )?;
        Ok(record)
    }

    pub fn get_simulation(
        &self,
        id: &str,
    ) -> Result<Option<SimulationRecord>, crate::error::SimError> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, dilemma, process_hint, structure_json, personas_json, transcript_json, summary, keywords_json, suggestion, created_at FROM simulations WHERE id = ?1",
        )?;
        let mut rows = stmt.query_map(params![id], row_to_record)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    pub fn get_simulations(&self) -> Result<Vec<SimulationRecord>, crate::error::SimError> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, dilemma, process_hint, structure_json, personas_json, transcript_json, summary, keywords_json, suggestion, created_at FROM simulations ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map([], row_to_record)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// All personas across every saved run. Rows with undecodable persona
    /// payloads are skipped rather than failing the whole query.
    pub fn all_personas(&self) -> Result<Vec<Persona>, crate::error::SimError> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare("SELECT personas_json FROM simulations")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut personas = Vec::new();
        for row in rows {
            let payload = row?;
            if let Ok(batch) = serde_json::from_str::<Vec<Persona>>(&payload) {
                personas.extend(batch);
            }
        }
        Ok(personas)
    }

    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>, crate::error::SimError> {
        self.conn.lock().map_err(|_| {
            crate::error::SimError::Configuration("store connection poisoned".to_string())
        })
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> Result<SimulationRecord, rusqlite::Error> {
    Ok(SimulationRecord {
        id: row.get(0)?,
        dilemma: row.get(1)?,
        process_hint: row.get(2)?,
        structure_json: row.get(3)?,
        personas_json: row.get(4)?,
        transcript_json: row.get(5)?,
        summary: row.get(6)?,
        keywords_json: row.get(7)?,
        suggestion: row.get(8)?,
        created_at: row.get(9)?,
    })
}
