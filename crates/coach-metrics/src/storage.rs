//! Persistent sink for metrics events, backed by `rusqlite`. Mirrors the
//! teacher's `agent-metrics::storage` trait-behind-a-worker shape: callers
//! depend on the `MetricsStorage` trait object, never the concrete
//! backend, so tests can swap in an in-memory connection.

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::Connection;
use std::sync::Mutex;

use crate::events::{
    CacheEvent, DispatchEvent, LlmCallEvent, ModerationEvent, ParseFailureEvent, RaceEvent,
    RetryEvent,
};

#[async_trait]
pub trait MetricsStorage: Send + Sync {
    async fn record_llm_call(&self, event: &LlmCallEvent) -> anyhow::Result<()>;
    async fn record_race(&self, event: &RaceEvent) -> anyhow::Result<()>;
    async fn record_cache(&self, event: &CacheEvent) -> anyhow::Result<()>;
    async fn record_retry(&self, event: &RetryEvent) -> anyhow::Result<()>;
    async fn record_moderation(&self, event: &ModerationEvent) -> anyhow::Result<()>;
    async fn record_dispatch(&self, event: &DispatchEvent) -> anyhow::Result<()>;
    /// §4.6 "Failure artefacts": raw text plus the last parser error, kept
    /// for post-hoc diagnosis only.
    async fn record_parse_failure(&self, event: &ParseFailureEvent) -> anyhow::Result<()>;
}

pub struct SqliteMetricsStorage {
    conn: Mutex<Connection>,
}

impl SqliteMetricsStorage {
    pub fn open(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn init_schema(conn: &Connection) -> anyhow::Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS llm_calls (
                event_id TEXT PRIMARY KEY,
                occurred_at TEXT NOT NULL,
                provider TEXT NOT NULL,
                model TEXT NOT NULL,
                prompt_version TEXT NOT NULL,
                input_tokens INTEGER NOT NULL,
                output_tokens INTEGER NOT NULL,
                cost_estimate_usd REAL NOT NULL,
                latency_ms INTEGER NOT NULL,
                status TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS race_events (
                event_id TEXT PRIMARY KEY,
                occurred_at TEXT NOT NULL,
                arm_label TEXT NOT NULL,
                outcome TEXT NOT NULL,
                latency_ms INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS cache_events (
                event_id TEXT PRIMARY KEY,
                occurred_at TEXT NOT NULL,
                session_id TEXT NOT NULL,
                category TEXT NOT NULL,
                resource TEXT NOT NULL,
                outcome TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS retry_events (
                event_id TEXT PRIMARY KEY,
                occurred_at TEXT NOT NULL,
                session_id TEXT NOT NULL,
                attempt INTEGER NOT NULL,
                max_attempts INTEGER NOT NULL,
                succeeded INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS moderation_events (
                event_id TEXT PRIMARY KEY,
                occurred_at TEXT NOT NULL,
                session_id TEXT NOT NULL,
                verdict TEXT NOT NULL,
                attempt INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS dispatch_events (
                event_id TEXT PRIMARY KEY,
                occurred_at TEXT NOT NULL,
                session_id TEXT NOT NULL,
                item_count INTEGER NOT NULL,
                parallel INTEGER NOT NULL,
                latency_ms INTEGER NOT NULL,
                success INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS parse_failures (
                event_id TEXT PRIMARY KEY,
                occurred_at TEXT NOT NULL,
                raw_text TEXT NOT NULL,
                last_parser_error TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }
}

#[async_trait]
impl MetricsStorage for SqliteMetricsStorage {
    async fn record_llm_call(&self, event: &LlmCallEvent) -> anyhow::Result<()> {
        let conn = self.conn.lock().expect("metrics connection poisoned");
        conn.execute(
            "INSERT OR REPLACE INTO llm_calls (event_id, occurred_at, provider, model, prompt_version, input_tokens, output_tokens, cost_estimate_usd, latency_ms, status) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)",
            rusqlite::params![
                event.meta.event_id,
                event.meta.occurred_at.to_rfc3339(),
                event.provider,
                event.model,
                event.prompt_version,
                event.input_tokens,
                event.output_tokens,
                event.cost_estimate_usd,
                event.latency_ms,
                format!("{:?}", event.status),
            ],
        )?;
        Ok(())
    }

    async fn record_race(&self, event: &RaceEvent) -> anyhow::Result<()> {
        let conn = self.conn.lock().expect("metrics connection poisoned");
        conn.execute(
            "INSERT OR REPLACE INTO race_events (event_id, occurred_at, arm_label, outcome, latency_ms) VALUES (?1,?2,?3,?4,?5)",
            rusqlite::params![
                event.meta.event_id,
                event.meta.occurred_at.to_rfc3339(),
                event.arm_label,
                format!("{:?}", event.outcome),
                event.latency_ms,
            ],
        )?;
        Ok(())
    }

    async fn record_cache(&self, event: &CacheEvent) -> anyhow::Result<()> {
        let conn = self.conn.lock().expect("metrics connection poisoned");
        conn.execute(
            "INSERT OR REPLACE INTO cache_events (event_id, occurred_at, session_id, category, resource, outcome) VALUES (?1,?2,?3,?4,?5,?6)",
            rusqlite::params![
                event.meta.event_id,
                event.meta.occurred_at.to_rfc3339(),
                event.session_id,
                event.category,
                event.resource,
                format!("{:?}", event.outcome),
            ],
        )?;
        Ok(())
    }

    async fn record_retry(&self, event: &RetryEvent) -> anyhow::Result<()> {
        let conn = self.conn.lock().expect("metrics connection poisoned");
        conn.execute(
            "INSERT OR REPLACE INTO retry_events (event_id, occurred_at, session_id, attempt, max_attempts, succeeded) VALUES (?1,?2,?3,?4,?5,?6)",
            rusqlite::params![
                event.meta.event_id,
                event.meta.occurred_at.to_rfc3339(),
                event.session_id,
                event.attempt,
                event.max_attempts,
                event.succeeded,
            ],
        )?;
        Ok(())
    }

    async fn record_moderation(&self, event: &ModerationEvent) -> anyhow::Result<()> {
        let conn = self.conn.lock().expect("metrics connection poisoned");
        conn.execute(
            "INSERT OR REPLACE INTO moderation_events (event_id, occurred_at, session_id, verdict, attempt) VALUES (?1,?2,?3,?4,?5)",
            rusqlite::params![
                event.meta.event_id,
                event.meta.occurred_at.to_rfc3339(),
                event.session_id,
                event.verdict,
                event.attempt,
            ],
        )?;
        Ok(())
    }

    async fn record_dispatch(&self, event: &DispatchEvent) -> anyhow::Result<()> {
        let conn = self.conn.lock().expect("metrics connection poisoned");
        conn.execute(
            "INSERT OR REPLACE INTO dispatch_events (event_id, occurred_at, session_id, item_count, parallel, latency_ms, success) VALUES (?1,?2,?3,?4,?5,?6,?7)",
            rusqlite::params![
                event.meta.event_id,
                event.meta.occurred_at.to_rfc3339(),
                event.session_id,
                event.item_count,
                event.parallel,
                event.latency_ms,
                event.success,
            ],
        )?;
        Ok(())
    }

    async fn record_parse_failure(&self, event: &ParseFailureEvent) -> anyhow::Result<()> {
        let conn = self.conn.lock().expect("metrics connection poisoned");
        conn.execute(
            "INSERT OR REPLACE INTO parse_failures (event_id, occurred_at, raw_text, last_parser_error) VALUES (?1,?2,?3,?4)",
            rusqlite::params![
                event.meta.event_id,
                event.meta.occurred_at.to_rfc3339(),
                event.raw_text,
                event.last_parser_error,
            ],
        )?;
        Ok(())
    }
}

/// No-op storage for tests that only care about the bus/aggregator, not
/// persistence.
pub struct NullMetricsStorage;

#[async_trait]
impl MetricsStorage for NullMetricsStorage {
    async fn record_llm_call(&self, _event: &LlmCallEvent) -> anyhow::Result<()> {
        Ok(())
    }
    async fn record_race(&self, _event: &RaceEvent) -> anyhow::Result<()> {
        Ok(())
    }
    async fn record_cache(&self, _event: &CacheEvent) -> anyhow::Result<()> {
        Ok(())
    }
    async fn record_retry(&self, _event: &RetryEvent) -> anyhow::Result<()> {
        Ok(())
    }
    async fn record_moderation(&self, _event: &ModerationEvent) -> anyhow::Result<()> {
        Ok(())
    }
    async fn record_dispatch(&self, _event: &DispatchEvent) -> anyhow::Result<()> {
        Ok(())
    }
    async fn record_parse_failure(&self, _event: &ParseFailureEvent) -> anyhow::Result<()> {
        Ok(())
    }
}

pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{CacheOutcome, EventMeta};

    #[tokio::test]
    async fn sqlite_storage_round_trips_a_cache_event() {
        let storage = SqliteMetricsStorage::open_in_memory().unwrap();
        let event = CacheEvent {
            meta: EventMeta::new(None),
            session_id: "s1".to_string(),
            category: "reply".to_string(),
            resource: "r1".to_string(),
            outcome: CacheOutcome::Hit,
        };

        storage.record_cache(&event).await.unwrap();

        let conn = storage.conn.lock().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM cache_events", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }
}
