// Database persistence layer using SQLite

use ioc_core::{Candidate, IndicatorType, ThreatLevel};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;

/// Case record. Collaborator entity: the engine only needs its id and
/// title for the cases-count join and enrichment output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredCase {
    pub id: String,
    pub title: String,
    pub status: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// File attachment metadata carried on evidence (content hashes are
/// precomputed by the uploader).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceFile {
    pub name: String,
    pub mime: String,
    pub sha256: String,
}

/// Evidence record stored in the database.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredEvidence {
    pub id: String,
    pub case_id: String,
    pub title: String,
    pub content: String,
    pub source: String,
    pub observation_ts: i64,
    #[serde(default)]
    pub files: Vec<EvidenceFile>,
    pub imported_at: i64,
}

/// Canonical observable row. `obs_value` is the wire name for the
/// indicator value and is globally unique.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredObservable {
    pub id: String,
    pub obs_value: String,
    #[serde(rename = "type")]
    pub indicator_type: IndicatorType,
    #[serde(rename = "threatLevel")]
    pub threat_level: ThreatLevel,
    pub source: String,
    #[serde(rename = "firstSeen")]
    pub first_seen: i64,
    #[serde(rename = "lastSeen")]
    pub last_seen: i64,
    #[serde(rename = "createdAt")]
    pub created_at: i64,
    #[serde(rename = "evidencesCount")]
    pub evidences_count: i64,
    #[serde(rename = "casesCount")]
    pub cases_count: i64,
}

/// Distinct case reachable from an observable through its evidence links.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RelatedCase {
    pub id: String,
    pub title: String,
}

/// Observable augmented with its related cases (read-time join).
#[derive(Debug, Clone, Serialize)]
pub struct EnrichedObservable {
    #[serde(flatten)]
    pub observable: StoredObservable,
    #[serde(rename = "relatedCases")]
    pub related_cases: Vec<RelatedCase>,
}

/// Audit trail entry. Writes are best-effort and never fail the
/// operation they document.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: String,
    pub ts: i64,
    pub action: String,
    pub actor: String,
    pub payload: serde_json::Value,
    pub case_id: Option<String>,
}

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self, rusqlite::Error> {
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self, rusqlite::Error> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<(), rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        // Cascades on evidence/observable deletion depend on this pragma.
        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS cases (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS evidence (
                id TEXT PRIMARY KEY,
                case_id TEXT NOT NULL,
                title TEXT NOT NULL,
                content TEXT NOT NULL,
                source TEXT NOT NULL,
                observation_ts INTEGER NOT NULL,
                files TEXT NOT NULL,
                imported_at INTEGER NOT NULL,
                FOREIGN KEY (case_id) REFERENCES cases(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS observables (
                id TEXT PRIMARY KEY,
                obs_value TEXT NOT NULL UNIQUE,
                type TEXT NOT NULL,
                threat_level TEXT NOT NULL,
                source TEXT NOT NULL,
                first_seen INTEGER NOT NULL,
                last_seen INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                evidences_count INTEGER NOT NULL DEFAULT 0,
                cases_count INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS evidence_observables (
                evidence_id TEXT NOT NULL,
                observable_id TEXT NOT NULL,
                PRIMARY KEY (evidence_id, observable_id),
                FOREIGN KEY (evidence_id) REFERENCES evidence(id) ON DELETE CASCADE,
                FOREIGN KEY (observable_id) REFERENCES observables(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS audit_logs (
                id TEXT PRIMARY KEY,
                ts INTEGER NOT NULL,
                action TEXT NOT NULL,
                actor TEXT NOT NULL,
                payload TEXT NOT NULL,
                case_id TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_evidence_case
                ON evidence(case_id);

            CREATE INDEX IF NOT EXISTS idx_observables_last_seen
                ON observables(last_seen DESC);

            CREATE INDEX IF NOT EXISTS idx_links_observable
                ON evidence_observables(observable_id);

            CREATE INDEX IF NOT EXISTS idx_audit_ts
                ON audit_logs(ts DESC);
        "#,
        )?;
        Ok(())
    }

    // Case operations

    pub fn save_case(&self, case: &StoredCase) -> Result<(), rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO cases (id, title, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                case.id,
                case.title,
                case.status,
                case.created_at,
                case.updated_at
            ],
        )?;
        Ok(())
    }

    pub fn get_case(&self, id: &str) -> Result<Option<StoredCase>, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, title, status, created_at, updated_at FROM cases WHERE id = ?1",
            params![id],
            Self::row_to_case,
        )
        .optional()
    }

    pub fn list_cases(&self) -> Result<Vec<StoredCase>, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, title, status, created_at, updated_at FROM cases ORDER BY updated_at DESC",
        )?;
        let rows = stmt.query_map([], Self::row_to_case)?;
        rows.collect()
    }

    pub fn delete_case(&self, id: &str) -> Result<bool, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        let count = conn.execute("DELETE FROM cases WHERE id = ?1", params![id])?;
        Ok(count > 0)
    }

    // Evidence operations

    pub fn save_evidence(&self, evidence: &StoredEvidence) -> Result<(), rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        let files = serde_json::to_string(&evidence.files).unwrap_or_default();
        conn.execute(
            r#"INSERT OR REPLACE INTO evidence
               (id, case_id, title, content, source, observation_ts, files, imported_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"#,
            params![
                evidence.id,
                evidence.case_id,
                evidence.title,
                evidence.content,
                evidence.source,
                evidence.observation_ts,
                files,
                evidence.imported_at
            ],
        )?;
        Ok(())
    }

    pub fn get_evidence(&self, id: &str) -> Result<Option<StoredEvidence>, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, case_id, title, content, source, observation_ts, files, imported_at
             FROM evidence WHERE id = ?1",
            params![id],
            Self::row_to_evidence,
        )
        .optional()
    }

    pub fn list_evidence(&self, case_id: Option<&str>) -> Result<Vec<StoredEvidence>, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        let sql_all = "SELECT id, case_id, title, content, source, observation_ts, files, imported_at
             FROM evidence ORDER BY observation_ts DESC";
        let sql_case = "SELECT id, case_id, title, content, source, observation_ts, files, imported_at
             FROM evidence WHERE case_id = ?1 ORDER BY observation_ts DESC";

        match case_id {
            Some(cid) => {
                let mut stmt = conn.prepare(sql_case)?;
                let rows = stmt.query_map(params![cid], Self::row_to_evidence)?;
                rows.collect()
            }
            None => {
                let mut stmt = conn.prepare(sql_all)?;
                let rows = stmt.query_map([], Self::row_to_evidence)?;
                rows.collect()
            }
        }
    }

    pub fn delete_evidence(&self, id: &str) -> Result<bool, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        let count = conn.execute("DELETE FROM evidence WHERE id = ?1", params![id])?;
        Ok(count > 0)
    }

    // Observable store

    /// Atomic insert-or-merge keyed on the unique indicator value.
    ///
    /// A new value gets `first_seen = last_seen = now` and zeroed counts;
    /// an existing row only has `last_seen` and `threat_level` overwritten.
    /// `type`, `source` and `first_seen` keep the first observation's
    /// classification even if the incoming candidate disagrees. Two racing
    /// ingestions of the same new value both land on the winner's row.
    ///
    /// Returns `(id, created)` where `created` is true when this call
    /// inserted the canonical row.
    pub fn upsert_observable(
        &self,
        candidate: &Candidate,
        now: i64,
    ) -> Result<(String, bool), rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        let new_id = uuid::Uuid::new_v4().to_string();

        conn.execute(
            r#"INSERT INTO observables
               (id, obs_value, type, threat_level, source, first_seen, last_seen, created_at,
                evidences_count, cases_count)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6, ?6, 0, 0)
               ON CONFLICT(obs_value) DO UPDATE SET
                   last_seen = excluded.last_seen,
                   threat_level = excluded.threat_level"#,
            params![
                new_id,
                candidate.value,
                candidate.indicator_type.as_str(),
                candidate.threat_level.as_str(),
                candidate.source,
                now
            ],
        )?;

        let id: String = conn.query_row(
            "SELECT id FROM observables WHERE obs_value = ?1",
            params![candidate.value],
            |r| r.get(0),
        )?;

        let created = id == new_id;
        Ok((id, created))
    }

    pub fn get_observable(&self, id: &str) -> Result<Option<StoredObservable>, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            &format!("{} WHERE id = ?1", Self::SELECT_OBSERVABLE),
            params![id],
            Self::row_to_observable,
        )
        .optional()
    }

    pub fn get_observable_by_value(
        &self,
        value: &str,
    ) -> Result<Option<StoredObservable>, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            &format!("{} WHERE obs_value = ?1", Self::SELECT_OBSERVABLE),
            params![value],
            Self::row_to_observable,
        )
        .optional()
    }

    pub fn delete_observable(&self, id: &str) -> Result<bool, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        let count = conn.execute("DELETE FROM observables WHERE id = ?1", params![id])?;
        Ok(count > 0)
    }

    // Link table

    /// Idempotent association: repeated links for the same pair are no-ops.
    pub fn link_evidence(
        &self,
        evidence_id: &str,
        observable_id: &str,
    ) -> Result<(), rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO evidence_observables (evidence_id, observable_id)
             VALUES (?1, ?2)",
            params![evidence_id, observable_id],
        )?;
        Ok(())
    }

    /// Observable ids linked to an evidence record. Callers capture this
    /// before deleting the evidence, since the delete cascades the link
    /// rows away.
    pub fn linked_observables(&self, evidence_id: &str) -> Result<Vec<String>, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT observable_id FROM evidence_observables WHERE evidence_id = ?1")?;
        let rows = stmt.query_map(params![evidence_id], |r| r.get(0))?;
        rows.collect()
    }

    // Aggregate counter

    /// Full re-derivation of the cached usage counters from the link table.
    /// Not incremental: a recount always self-heals drift introduced by any
    /// other write path.
    pub fn recount_observable(&self, observable_id: &str) -> Result<(), rusqlite::Error> {
        let conn = self.conn.lock().unwrap();

        let evidences: i64 = conn.query_row(
            "SELECT COUNT(*) FROM evidence_observables WHERE observable_id = ?1",
            params![observable_id],
            |r| r.get(0),
        )?;
        let cases: i64 = conn.query_row(
            r#"SELECT COUNT(DISTINCT e.case_id)
               FROM evidence_observables eo
               JOIN evidence e ON eo.evidence_id = e.id
               WHERE eo.observable_id = ?1"#,
            params![observable_id],
            |r| r.get(0),
        )?;

        conn.execute(
            "UPDATE observables SET evidences_count = ?1, cases_count = ?2 WHERE id = ?3",
            params![evidences, cases, observable_id],
        )?;
        Ok(())
    }

    // Enrichment reader

    /// All observables ordered by `last_seen` descending, each joined to
    /// the distinct cases reachable through its evidence links. Read-time
    /// join; reflects the link table as of this call.
    pub fn list_observables(&self) -> Result<Vec<EnrichedObservable>, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare(&format!("{} ORDER BY last_seen DESC", Self::SELECT_OBSERVABLE))?;
        let observables: Vec<StoredObservable> = stmt
            .query_map([], Self::row_to_observable)?
            .collect::<Result<_, _>>()?;

        let mut related_stmt = conn.prepare(
            r#"SELECT DISTINCT c.id, c.title
               FROM evidence_observables eo
               JOIN evidence e ON eo.evidence_id = e.id
               JOIN cases c ON e.case_id = c.id
               WHERE eo.observable_id = ?1"#,
        )?;

        let mut enriched = Vec::with_capacity(observables.len());
        for observable in observables {
            let related_cases: Vec<RelatedCase> = related_stmt
                .query_map(params![observable.id], |r| {
                    Ok(RelatedCase {
                        id: r.get(0)?,
                        title: r.get(1)?,
                    })
                })?
                .collect::<Result<_, _>>()?;
            enriched.push(EnrichedObservable {
                observable,
                related_cases,
            });
        }
        Ok(enriched)
    }

    // Audit trail

    /// Best-effort audit write. A failure is logged and swallowed; it must
    /// never abort the operation it documents.
    pub fn record_audit(&self, action: &str, payload: serde_json::Value, case_id: Option<&str>) {
        if let Err(e) = self.insert_audit(action, &payload, case_id) {
            tracing::warn!("Failed to write audit log for {}: {}", action, e);
        }
    }

    fn insert_audit(
        &self,
        action: &str,
        payload: &serde_json::Value,
        case_id: Option<&str>,
    ) -> Result<(), rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO audit_logs (id, ts, action, actor, payload, case_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                uuid::Uuid::new_v4().to_string(),
                chrono::Utc::now().timestamp_millis(),
                action,
                "local",
                serde_json::to_string(payload).unwrap_or_default(),
                case_id
            ],
        )?;
        Ok(())
    }

    pub fn list_audit_logs(
        &self,
        case_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<AuditEntry>, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        let sql_all = "SELECT id, ts, action, actor, payload, case_id
             FROM audit_logs ORDER BY ts DESC LIMIT ?1";
        let sql_case = "SELECT id, ts, action, actor, payload, case_id
             FROM audit_logs WHERE case_id = ?1 ORDER BY ts DESC LIMIT ?2";

        let map_row = |r: &rusqlite::Row| -> Result<AuditEntry, rusqlite::Error> {
            let payload_str: String = r.get(4)?;
            Ok(AuditEntry {
                id: r.get(0)?,
                ts: r.get(1)?,
                action: r.get(2)?,
                actor: r.get(3)?,
                payload: serde_json::from_str(&payload_str).unwrap_or_default(),
                case_id: r.get(5)?,
            })
        };

        match case_id {
            Some(cid) => {
                let mut stmt = conn.prepare(sql_case)?;
                let rows = stmt.query_map(params![cid, limit as i64], map_row)?;
                rows.collect()
            }
            None => {
                let mut stmt = conn.prepare(sql_all)?;
                let rows = stmt.query_map(params![limit as i64], map_row)?;
                rows.collect()
            }
        }
    }

    /// Health check - verify database is accessible
    pub fn health_check(&self) -> Result<(), rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
    }

    const SELECT_OBSERVABLE: &'static str =
        "SELECT id, obs_value, type, threat_level, source, first_seen, last_seen, created_at,
                evidences_count, cases_count
         FROM observables";

    fn row_to_case(row: &rusqlite::Row) -> Result<StoredCase, rusqlite::Error> {
        Ok(StoredCase {
            id: row.get(0)?,
            title: row.get(1)?,
            status: row.get(2)?,
            created_at: row.get(3)?,
            updated_at: row.get(4)?,
        })
    }

    fn row_to_evidence(row: &rusqlite::Row) -> Result<StoredEvidence, rusqlite::Error> {
        let files_str: String = row.get(6)?;
        Ok(StoredEvidence {
            id: row.get(0)?,
            case_id: row.get(1)?,
            title: row.get(2)?,
            content: row.get(3)?,
            source: row.get(4)?,
            observation_ts: row.get(5)?,
            files: serde_json::from_str(&files_str).unwrap_or_default(),
            imported_at: row.get(7)?,
        })
    }

    fn row_to_observable(row: &rusqlite::Row) -> Result<StoredObservable, rusqlite::Error> {
        let type_str: String = row.get(2)?;
        let level_str: String = row.get(3)?;
        Ok(StoredObservable {
            id: row.get(0)?,
            obs_value: row.get(1)?,
            indicator_type: serde_json::from_value(serde_json::Value::String(type_str))
                .unwrap_or(IndicatorType::Hostname),
            threat_level: serde_json::from_value(serde_json::Value::String(level_str))
                .unwrap_or(ThreatLevel::Suspicious),
            source: row.get(4)?,
            first_seen: row.get(5)?,
            last_seen: row.get(6)?,
            created_at: row.get(7)?,
            evidences_count: row.get(8)?,
            cases_count: row.get(9)?,
        })
    }
}
