use std::fs::{create_dir_all, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// One finished send attempt, however it ended. Everything is stringly
/// typed here on purpose: the record outlives enum refactors in the
/// workflow, and operators grep the JSONL file.
#[derive(Debug, Clone, Serialize)]
pub struct AttemptRecord {
    pub timestamp: DateTime<Utc>,
    pub attempt_id: Uuid,
    pub platform: String,
    pub username: String,
    pub outcome: String,
    pub stage: Option<String>,
    pub error: Option<String>,
    pub matched_candidate: Option<usize>,
    pub verification: Option<String>,
    pub duration_ms: i64,
}

impl AttemptRecord {
    pub fn new(platform: &str, username: &str, outcome: &str, duration_ms: i64) -> Self {
        Self {
            timestamp: Utc::now(),
            attempt_id: Uuid::new_v4(),
            platform: platform.to_string(),
            username: username.to_string(),
            outcome: outcome.to_string(),
            stage: None,
            error: None,
            matched_candidate: None,
            verification: None,
            duration_ms,
        }
    }
}

/// Send-attempt observability: JSONL append for grepping plus sqlite
/// tables the CLI reads. Writes happen after the attempt finished, so a
/// telemetry failure must never fail the send; callers log and move on.
#[derive(Debug)]
pub struct OutreachTelemetry {
    log: Mutex<File>,
    db_path: PathBuf,
    flags: OpenFlags,
}

impl OutreachTelemetry {
    pub fn new(
        log_path: impl AsRef<Path>,
        db_path: impl AsRef<Path>,
    ) -> Result<Self, TelemetryError> {
        let log_path = log_path.as_ref().to_path_buf();
        if let Some(parent) = log_path.parent() {
            create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;
        let db_path = db_path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            create_dir_all(parent)?;
        }
        let telemetry = Self {
            log: Mutex::new(file),
            db_path,
            flags: OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        };
        telemetry.initialize_db()?;
        Ok(telemetry)
    }

    fn initialize_db(&self) -> Result<(), TelemetryError> {
        let conn = self.open_db()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS send_attempts (
                ts DATETIME DEFAULT CURRENT_TIMESTAMP,
                attempt_id TEXT,
                platform TEXT,
                username TEXT,
                outcome TEXT,
                stage TEXT,
                error TEXT,
                matched_candidate INTEGER,
                verification TEXT,
                duration_ms INTEGER
            );
            CREATE INDEX IF NOT EXISTS idx_send_attempts_ts ON send_attempts(ts DESC);
            CREATE TABLE IF NOT EXISTS limiter_events (
                ts DATETIME DEFAULT CURRENT_TIMESTAMP,
                kind TEXT,
                detail TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_limiter_events_ts ON limiter_events(ts DESC);",
        )?;
        Ok(())
    }

    fn open_db(&self) -> Result<Connection, TelemetryError> {
        Ok(Connection::open_with_flags(&self.db_path, self.flags)?)
    }

    pub fn record_attempt(&self, record: &AttemptRecord) -> Result<(), TelemetryError> {
        let json = serde_json::to_string(record)?;
        if let Ok(mut guard) = self.log.lock() {
            writeln!(guard, "{json}")?;
            guard.flush()?;
        }
        let conn = self.open_db()?;
        conn.execute(
            "INSERT INTO send_attempts (
                attempt_id, platform, username, outcome, stage, error,
                matched_candidate, verification, duration_ms
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                record.attempt_id.to_string(),
                record.platform,
                record.username,
                record.outcome,
                record.stage.clone().unwrap_or_default(),
                record.error.clone().unwrap_or_default(),
                record.matched_candidate.map(|index| index as i64),
                record.verification.clone().unwrap_or_default(),
                record.duration_ms,
            ],
        )?;
        Ok(())
    }

    pub fn record_limiter_event(&self, kind: &str, detail: &str) -> Result<(), TelemetryError> {
        let conn = self.open_db()?;
        conn.execute(
            "INSERT INTO limiter_events (kind, detail) VALUES (?1, ?2)",
            params![kind, detail],
        )?;
        Ok(())
    }

    pub fn database_path(&self) -> &Path {
        &self.db_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn telemetry_persists_attempts_and_events() {
        let dir = tempdir().unwrap();
        let log_path = dir.path().join("sends.log");
        let db_path = dir.path().join("telemetry.sqlite");
        let telemetry = OutreachTelemetry::new(&log_path, &db_path).unwrap();

        let mut record = AttemptRecord::new("tiktok", "garyvee", "delivered", 5400);
        record.matched_candidate = Some(0);
        record.verification = Some("verified".to_string());
        telemetry.record_attempt(&record).unwrap();
        telemetry
            .record_limiter_event("cooldown", "account restricted")
            .unwrap();

        let log_contents = std::fs::read_to_string(&log_path).unwrap();
        assert!(log_contents.contains("garyvee"));
        assert!(log_contents.contains("delivered"));

        let conn = Connection::open(&db_path).unwrap();
        let attempts: i64 = conn
            .query_row("SELECT COUNT(*) FROM send_attempts", [], |row| row.get(0))
            .unwrap();
        assert_eq!(attempts, 1);
        let events: i64 = conn
            .query_row("SELECT COUNT(*) FROM limiter_events", [], |row| row.get(0))
            .unwrap();
        assert_eq!(events, 1);
    }

    #[test]
    fn failed_attempts_keep_stage_and_error() {
        let dir = tempdir().unwrap();
        let telemetry = OutreachTelemetry::new(
            dir.path().join("sends.log"),
            dir.path().join("telemetry.sqlite"),
        )
        .unwrap();

        let mut record = AttemptRecord::new("instagram", "someone", "failed", 900);
        record.stage = Some("open_composer".to_string());
        record.error = Some("no_match_found".to_string());
        telemetry.record_attempt(&record).unwrap();

        let conn = Connection::open(telemetry.database_path()).unwrap();
        let (stage, error): (String, String) = conn
            .query_row(
                "SELECT stage, error FROM send_attempts WHERE username = 'someone'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(stage, "open_composer");
        assert_eq!(error, "no_match_found");
    }
}
