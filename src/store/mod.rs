//! SQLite-backed persistence for calls, turns, escalations, and agents
//!
//! Single-connection store behind an async mutex, WAL mode. The schema
//! is created on open; there is no external migration step.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::error::{BridgeError, Result};
use crate::types::{
    CallDirection, CallRecord, CallStatus, EscalationRecord, EscalationStatus, HumanAgent,
    Interaction, Speaker, TriggerType,
};

/// SQLite-backed store shared process-wide.
pub struct CallStore {
    conn: Arc<Mutex<Connection>>,
}

impl CallStore {
    /// Open (and initialize) a store at the given path.
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| BridgeError::Configuration(e.to_string()))?;
        }

        let conn = Connection::open(&path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        Self::init_schema(&conn)?;

        info!(path = %path.display(), "call store opened");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory store, used by tests.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS calls (
                id TEXT PRIMARY KEY,
                call_sid TEXT UNIQUE,
                direction TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'initiated',
                from_number TEXT NOT NULL,
                to_number TEXT NOT NULL,
                business_id TEXT,
                started_at TEXT NOT NULL,
                ended_at TEXT,
                meta TEXT NOT NULL DEFAULT '{}'
            );

            CREATE TABLE IF NOT EXISTS call_interactions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                call_id TEXT NOT NULL,
                speaker TEXT NOT NULL,
                text TEXT NOT NULL,
                audio_url TEXT,
                timestamp TEXT NOT NULL,
                meta TEXT NOT NULL DEFAULT '{}',
                FOREIGN KEY (call_id) REFERENCES calls(id)
            );

            CREATE TABLE IF NOT EXISTS escalations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                call_id TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                trigger_type TEXT NOT NULL,
                trigger_details TEXT NOT NULL DEFAULT '{}',
                assigned_agent_id TEXT,
                conversation_summary TEXT,
                context_data TEXT NOT NULL DEFAULT '{}',
                requested_at TEXT NOT NULL,
                accepted_at TEXT,
                completed_at TEXT,
                FOREIGN KEY (call_id) REFERENCES calls(id)
            );

            CREATE TABLE IF NOT EXISTS human_agents (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                email TEXT UNIQUE NOT NULL,
                is_available INTEGER NOT NULL DEFAULT 1,
                is_active INTEGER NOT NULL DEFAULT 1,
                skills TEXT NOT NULL DEFAULT '[]',
                departments TEXT NOT NULL DEFAULT '[]',
                active_escalations INTEGER NOT NULL DEFAULT 0,
                total_escalations INTEGER NOT NULL DEFAULT 0,
                last_active_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_calls_sid ON calls(call_sid);
            CREATE INDEX IF NOT EXISTS idx_calls_status ON calls(status);
            CREATE INDEX IF NOT EXISTS idx_interactions_call
                ON call_interactions(call_id, timestamp);
            CREATE INDEX IF NOT EXISTS idx_escalations_call ON escalations(call_id);
            CREATE INDEX IF NOT EXISTS idx_agents_available
                ON human_agents(is_available, is_active);
            "#,
        )?;
        Ok(())
    }

    // ─── Calls ───────────────────────────────────────────────────

    /// Create a call row. The internal id is a fresh UUID.
    pub async fn create_call(
        &self,
        call_sid: Option<&str>,
        direction: CallDirection,
        from_number: &str,
        to_number: &str,
        business_id: Option<&str>,
        meta: serde_json::Value,
    ) -> Result<CallRecord> {
        let record = CallRecord {
            id: Uuid::new_v4().to_string(),
            call_sid: call_sid.map(str::to_string),
            direction,
            status: CallStatus::Initiated,
            from_number: from_number.to_string(),
            to_number: to_number.to_string(),
            business_id: business_id.map(str::to_string),
            started_at: Utc::now(),
            ended_at: None,
            meta,
        };

        let conn = self.conn.lock().await;
        conn.execute(
            r#"INSERT INTO calls
               (id, call_sid, direction, status, from_number, to_number,
                business_id, started_at, ended_at, meta)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"#,
            params![
                record.id,
                record.call_sid,
                record.direction.as_str(),
                record.status.as_str(),
                record.from_number,
                record.to_number,
                record.business_id,
                record.started_at.to_rfc3339(),
                Option::<String>::None,
                record.meta.to_string(),
            ],
        )?;
        Ok(record)
    }

    pub async fn get_call(&self, id: &str) -> Result<Option<CallRecord>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT id, call_sid, direction, status, from_number, to_number,
                    business_id, started_at, ended_at, meta
             FROM calls WHERE id = ?1",
        )?;
        let record = stmt.query_row(params![id], row_to_call).optional()?;
        Ok(record)
    }

    pub async fn get_call_by_sid(&self, call_sid: &str) -> Result<Option<CallRecord>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT id, call_sid, direction, status, from_number, to_number,
                    business_id, started_at, ended_at, meta
             FROM calls WHERE call_sid = ?1",
        )?;
        let record = stmt.query_row(params![call_sid], row_to_call).optional()?;
        Ok(record)
    }

    /// Attach a carrier SID to an existing call.
    pub async fn set_call_sid(&self, id: &str, call_sid: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        let updated = conn.execute(
            "UPDATE calls SET call_sid = ?1 WHERE id = ?2",
            params![call_sid, id],
        )?;
        if updated == 0 {
            return Err(BridgeError::NotFound(format!("call {id}")));
        }
        Ok(())
    }

    /// Persist a status transition. `ended_at` is stamped iff the new
    /// status is terminal.
    pub async fn update_call_status(&self, id: &str, status: CallStatus) -> Result<()> {
        let ended_at = if status.is_terminal() {
            Some(Utc::now().to_rfc3339())
        } else {
            None
        };
        let conn = self.conn.lock().await;
        let updated = conn.execute(
            "UPDATE calls SET status = ?1,
                    ended_at = COALESCE(?2, ended_at)
             WHERE id = ?3",
            params![status.as_str(), ended_at, id],
        )?;
        if updated == 0 {
            return Err(BridgeError::NotFound(format!("call {id}")));
        }
        Ok(())
    }

    pub async fn list_recent_calls(&self, limit: usize) -> Result<Vec<CallRecord>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT id, call_sid, direction, status, from_number, to_number,
                    business_id, started_at, ended_at, meta
             FROM calls ORDER BY started_at DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], row_to_call)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    // ─── Interactions ────────────────────────────────────────────

    /// Append one turn. Timestamps are assigned here so interactions
    /// for a call stay monotonic in insertion order.
    pub async fn add_interaction(
        &self,
        call_id: &str,
        speaker: Speaker,
        text: &str,
        audio_url: Option<&str>,
        meta: serde_json::Value,
    ) -> Result<Interaction> {
        let timestamp = Utc::now();
        let conn = self.conn.lock().await;
        conn.execute(
            r#"INSERT INTO call_interactions
               (call_id, speaker, text, audio_url, timestamp, meta)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6)"#,
            params![
                call_id,
                speaker.as_str(),
                text,
                audio_url,
                timestamp.to_rfc3339(),
                meta.to_string(),
            ],
        )?;
        let id = conn.last_insert_rowid();
        Ok(Interaction {
            id,
            call_id: call_id.to_string(),
            speaker,
            text: text.to_string(),
            audio_url: audio_url.map(str::to_string),
            timestamp,
            meta,
        })
    }

    /// Interactions for a call in timestamp order, optionally limited
    /// to the most recent `limit`.
    pub async fn interactions(&self, call_id: &str, limit: Option<usize>) -> Result<Vec<Interaction>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT id, call_id, speaker, text, audio_url, timestamp, meta
             FROM call_interactions
             WHERE call_id = ?1
             ORDER BY timestamp ASC, id ASC",
        )?;
        let rows = stmt.query_map(params![call_id], row_to_interaction)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        if let Some(limit) = limit {
            let skip = out.len().saturating_sub(limit);
            out.drain(..skip);
        }
        Ok(out)
    }

    // ─── Escalations ─────────────────────────────────────────────

    pub async fn create_escalation(
        &self,
        call_id: &str,
        trigger_type: TriggerType,
        trigger_details: serde_json::Value,
        assigned_agent_id: Option<&str>,
        conversation_summary: Option<&str>,
        context_data: serde_json::Value,
    ) -> Result<EscalationRecord> {
        let requested_at = Utc::now();
        let conn = self.conn.lock().await;
        conn.execute(
            r#"INSERT INTO escalations
               (call_id, status, trigger_type, trigger_details,
                assigned_agent_id, conversation_summary, context_data, requested_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"#,
            params![
                call_id,
                EscalationStatus::Pending.as_str(),
                trigger_type.as_str(),
                trigger_details.to_string(),
                assigned_agent_id,
                conversation_summary,
                context_data.to_string(),
                requested_at.to_rfc3339(),
            ],
        )?;
        let id = conn.last_insert_rowid();
        Ok(EscalationRecord {
            id,
            call_id: call_id.to_string(),
            status: EscalationStatus::Pending,
            trigger_type,
            trigger_details,
            assigned_agent_id: assigned_agent_id.map(str::to_string),
            conversation_summary: conversation_summary.map(str::to_string),
            context_data,
            requested_at,
            accepted_at: None,
            completed_at: None,
        })
    }

    pub async fn get_escalation(&self, id: i64) -> Result<Option<EscalationRecord>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT id, call_id, status, trigger_type, trigger_details,
                    assigned_agent_id, conversation_summary, context_data,
                    requested_at, accepted_at, completed_at
             FROM escalations WHERE id = ?1",
        )?;
        let record = stmt.query_row(params![id], row_to_escalation).optional()?;
        Ok(record)
    }

    /// Advance escalation status; stamps `accepted_at` / `completed_at`
    /// as appropriate.
    pub async fn update_escalation_status(&self, id: i64, status: EscalationStatus) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn.lock().await;
        let updated = match status {
            EscalationStatus::InProgress => conn.execute(
                "UPDATE escalations SET status = ?1, accepted_at = ?2 WHERE id = ?3",
                params![status.as_str(), now, id],
            )?,
            EscalationStatus::Completed | EscalationStatus::Cancelled => conn.execute(
                "UPDATE escalations SET status = ?1, completed_at = ?2 WHERE id = ?3",
                params![status.as_str(), now, id],
            )?,
            EscalationStatus::Pending => conn.execute(
                "UPDATE escalations SET status = ?1 WHERE id = ?2",
                params![status.as_str(), id],
            )?,
        };
        if updated == 0 {
            return Err(BridgeError::NotFound(format!("escalation {id}")));
        }
        Ok(())
    }

    /// Attach handoff context to an escalation row.
    pub async fn attach_escalation_context(
        &self,
        id: i64,
        conversation_summary: &str,
        context_data: &serde_json::Value,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        let updated = conn.execute(
            "UPDATE escalations SET conversation_summary = ?1, context_data = ?2 WHERE id = ?3",
            params![conversation_summary, context_data.to_string(), id],
        )?;
        if updated == 0 {
            return Err(BridgeError::NotFound(format!("escalation {id}")));
        }
        Ok(())
    }

    // ─── Human agents ────────────────────────────────────────────

    pub async fn upsert_agent(&self, agent: &HumanAgent) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"INSERT OR REPLACE INTO human_agents
               (id, name, email, is_available, is_active, skills, departments,
                active_escalations, total_escalations, last_active_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"#,
            params![
                agent.id,
                agent.name,
                agent.email,
                agent.is_available as i64,
                agent.is_active as i64,
                serde_json::to_string(&agent.skills)?,
                serde_json::to_string(&agent.departments)?,
                agent.active_escalations as i64,
                agent.total_escalations as i64,
                agent.last_active_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    /// Agents that are both available and active.
    pub async fn available_agents(&self) -> Result<Vec<HumanAgent>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT id, name, email, is_available, is_active, skills, departments,
                    active_escalations, total_escalations, last_active_at
             FROM human_agents
             WHERE is_available = 1 AND is_active = 1
             ORDER BY active_escalations ASC, name ASC",
        )?;
        let rows = stmt.query_map([], row_to_agent)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub async fn list_agents(&self) -> Result<Vec<HumanAgent>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT id, name, email, is_available, is_active, skills, departments,
                    active_escalations, total_escalations, last_active_at
             FROM human_agents ORDER BY name ASC",
        )?;
        let rows = stmt.query_map([], row_to_agent)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Flip availability. Going available also stamps `last_active_at`.
    pub async fn set_agent_availability(&self, id: &str, available: bool) -> Result<()> {
        let conn = self.conn.lock().await;
        let updated = if available {
            conn.execute(
                "UPDATE human_agents SET is_available = 1, last_active_at = ?1 WHERE id = ?2",
                params![Utc::now().to_rfc3339(), id],
            )?
        } else {
            conn.execute(
                "UPDATE human_agents SET is_available = 0,
                        active_escalations = active_escalations + 1,
                        total_escalations = total_escalations + 1
                 WHERE id = ?1",
                params![id],
            )?
        };
        if updated == 0 {
            return Err(BridgeError::NotFound(format!("agent {id}")));
        }
        Ok(())
    }
}

// ─── Row mappers ─────────────────────────────────────────────────

fn parse_time(raw: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn row_to_call(row: &Row<'_>) -> rusqlite::Result<CallRecord> {
    let direction: String = row.get(2)?;
    let status: String = row.get(3)?;
    let started_at: String = row.get(7)?;
    let ended_at: Option<String> = row.get(8)?;
    let meta: String = row.get(9)?;
    Ok(CallRecord {
        id: row.get(0)?,
        call_sid: row.get(1)?,
        direction: CallDirection::parse(&direction).unwrap_or(CallDirection::Inbound),
        status: CallStatus::parse(&status).unwrap_or(CallStatus::Initiated),
        from_number: row.get(4)?,
        to_number: row.get(5)?,
        business_id: row.get(6)?,
        started_at: parse_time(started_at),
        ended_at: ended_at.map(parse_time),
        meta: serde_json::from_str(&meta).unwrap_or_else(|_| serde_json::json!({})),
    })
}

fn row_to_interaction(row: &Row<'_>) -> rusqlite::Result<Interaction> {
    let speaker: String = row.get(2)?;
    let timestamp: String = row.get(5)?;
    let meta: String = row.get(6)?;
    Ok(Interaction {
        id: row.get(0)?,
        call_id: row.get(1)?,
        speaker: Speaker::parse(&speaker).unwrap_or(Speaker::Customer),
        text: row.get(3)?,
        audio_url: row.get(4)?,
        timestamp: parse_time(timestamp),
        meta: serde_json::from_str(&meta).unwrap_or_else(|_| serde_json::json!({})),
    })
}

fn row_to_escalation(row: &Row<'_>) -> rusqlite::Result<EscalationRecord> {
    let status: String = row.get(2)?;
    let trigger_type: String = row.get(3)?;
    let trigger_details: String = row.get(4)?;
    let context_data: String = row.get(7)?;
    let requested_at: String = row.get(8)?;
    let accepted_at: Option<String> = row.get(9)?;
    let completed_at: Option<String> = row.get(10)?;
    Ok(EscalationRecord {
        id: row.get(0)?,
        call_id: row.get(1)?,
        status: EscalationStatus::parse(&status).unwrap_or(EscalationStatus::Pending),
        trigger_type: TriggerType::parse(&trigger_type).unwrap_or(TriggerType::CustomerRequest),
        trigger_details: serde_json::from_str(&trigger_details)
            .unwrap_or_else(|_| serde_json::json!({})),
        assigned_agent_id: row.get(5)?,
        conversation_summary: row.get(6)?,
        context_data: serde_json::from_str(&context_data)
            .unwrap_or_else(|_| serde_json::json!({})),
        requested_at: parse_time(requested_at),
        accepted_at: accepted_at.map(parse_time),
        completed_at: completed_at.map(parse_time),
    })
}

fn row_to_agent(row: &Row<'_>) -> rusqlite::Result<HumanAgent> {
    let skills: String = row.get(5)?;
    let departments: String = row.get(6)?;
    let last_active_at: Option<String> = row.get(9)?;
    Ok(HumanAgent {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        is_available: row.get::<_, i64>(3)? != 0,
        is_active: row.get::<_, i64>(4)? != 0,
        skills: serde_json::from_str(&skills).unwrap_or_default(),
        departments: serde_json::from_str(&departments).unwrap_or_default(),
        active_escalations: row.get::<_, i64>(7)? as u32,
        total_escalations: row.get::<_, i64>(8)? as u32,
        last_active_at: last_active_at.map(parse_time),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_agent(id: &str) -> HumanAgent {
        HumanAgent {
            id: id.to_string(),
            name: format!("Agent {id}"),
            email: format!("{id}@example.com"),
            is_available: true,
            is_active: true,
            skills: vec!["billing".to_string()],
            departments: vec!["support".to_string()],
            active_escalations: 0,
            total_escalations: 0,
            last_active_at: None,
        }
    }

    #[tokio::test]
    async fn test_call_lifecycle() {
        let store = CallStore::in_memory().unwrap();
        let call = store
            .create_call(
                Some("CA1"),
                CallDirection::Inbound,
                "+15550001",
                "+15550002",
                None,
                serde_json::json!({}),
            )
            .await
            .unwrap();

        assert_eq!(call.status, CallStatus::Initiated);
        assert!(call.ended_at.is_none());

        let by_sid = store.get_call_by_sid("CA1").await.unwrap().unwrap();
        assert_eq!(by_sid.id, call.id);

        store
            .update_call_status(&call.id, CallStatus::InProgress)
            .await
            .unwrap();
        let call = store.get_call(&call.id).await.unwrap().unwrap();
        assert_eq!(call.status, CallStatus::InProgress);
        assert!(call.ended_at.is_none());

        store
            .update_call_status(&call.id, CallStatus::Completed)
            .await
            .unwrap();
        let call = store.get_call(&call.id).await.unwrap().unwrap();
        assert!(call.ended_at.is_some());
        assert!(call.ended_at.unwrap() >= call.started_at);
    }

    #[tokio::test]
    async fn test_interactions_monotonic() {
        let store = CallStore::in_memory().unwrap();
        let call = store
            .create_call(None, CallDirection::Inbound, "a", "b", None, serde_json::json!({}))
            .await
            .unwrap();

        for i in 0..5 {
            store
                .add_interaction(
                    &call.id,
                    if i % 2 == 0 { Speaker::Customer } else { Speaker::Ai },
                    &format!("turn {i}"),
                    None,
                    serde_json::json!({}),
                )
                .await
                .unwrap();
        }

        let turns = store.interactions(&call.id, None).await.unwrap();
        assert_eq!(turns.len(), 5);
        for pair in turns.windows(2) {
            assert!(pair[1].timestamp >= pair[0].timestamp);
        }

        let last_two = store.interactions(&call.id, Some(2)).await.unwrap();
        assert_eq!(last_two.len(), 2);
        assert_eq!(last_two[1].text, "turn 4");
    }

    #[tokio::test]
    async fn test_escalation_rows() {
        let store = CallStore::in_memory().unwrap();
        let call = store
            .create_call(None, CallDirection::Inbound, "a", "b", None, serde_json::json!({}))
            .await
            .unwrap();

        let esc = store
            .create_escalation(
                &call.id,
                TriggerType::Keyword,
                serde_json::json!({"keyword": "manager"}),
                Some("agent-1"),
                Some("short summary"),
                serde_json::json!({}),
            )
            .await
            .unwrap();
        assert_eq!(esc.status, EscalationStatus::Pending);

        store
            .update_escalation_status(esc.id, EscalationStatus::InProgress)
            .await
            .unwrap();
        let loaded = store.get_escalation(esc.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, EscalationStatus::InProgress);
        assert!(loaded.accepted_at.is_some());

        store
            .update_escalation_status(esc.id, EscalationStatus::Completed)
            .await
            .unwrap();
        let loaded = store.get_escalation(esc.id).await.unwrap().unwrap();
        assert!(loaded.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_agent_availability() {
        let store = CallStore::in_memory().unwrap();
        store.upsert_agent(&sample_agent("a1")).await.unwrap();
        store.upsert_agent(&sample_agent("a2")).await.unwrap();

        assert_eq!(store.available_agents().await.unwrap().len(), 2);

        store.set_agent_availability("a1", false).await.unwrap();
        let available = store.available_agents().await.unwrap();
        assert_eq!(available.len(), 1);
        assert_eq!(available[0].id, "a2");

        store.set_agent_availability("a1", true).await.unwrap();
        let agents = store.list_agents().await.unwrap();
        let a1 = agents.iter().find(|a| a.id == "a1").unwrap();
        assert!(a1.is_available);
        assert!(a1.last_active_at.is_some());
        assert_eq!(a1.total_escalations, 1);
    }

    #[tokio::test]
    async fn test_missing_rows_are_not_found() {
        let store = CallStore::in_memory().unwrap();
        assert!(store.get_call("nope").await.unwrap().is_none());
        assert!(matches!(
            store.update_call_status("nope", CallStatus::Failed).await,
            Err(BridgeError::NotFound(_))
        ));
    }
}
