//! SQLite-backed record store.
//!
//! One parent row per call plus child tables for participants, summary
//! topics, takeaways, next steps and questions. An upsert runs in a single
//! transaction: the parent row is inserted or updated in place and the
//! child rows are deleted and re-inserted, so retries never duplicate.

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::Connection;
use tokio::sync::Mutex;

use crate::domain::CanonicalRecord;

use super::{PersistedId, RecordStore};

pub struct SqliteRecordStore {
    conn: Mutex<Connection>,
}

impl SqliteRecordStore {
    /// Open (and migrate) the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create database directory")?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;
        migrate(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        migrate(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Number of stored call records.
    pub async fn record_count(&self) -> Result<i64> {
        let conn = self.conn.lock().await;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM calls", [], |row| row.get(0))
            .context("Failed to count calls")?;
        Ok(count)
    }
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS calls (
            id TEXT PRIMARY KEY,
            url TEXT NOT NULL,
            share_url TEXT,
            title TEXT NOT NULL,
            date TEXT,
            date_formatted TEXT,
            duration TEXT,
            duration_minutes INTEGER,
            host_name TEXT,
            company_domain TEXT,
            summary_purpose TEXT,
            transcript_text TEXT NOT NULL,
            participant_count INTEGER NOT NULL,
            topic_count INTEGER NOT NULL,
            takeaway_count INTEGER NOT NULL,
            next_step_count INTEGER NOT NULL,
            question_count INTEGER NOT NULL,
            extracted_at TEXT NOT NULL,
            status TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS call_participants (
            call_id TEXT NOT NULL,
            position INTEGER NOT NULL,
            speaker_id TEXT NOT NULL,
            name TEXT NOT NULL,
            is_host INTEGER NOT NULL
        );
        CREATE TABLE IF NOT EXISTS call_topics (
            call_id TEXT NOT NULL,
            position INTEGER NOT NULL,
            title TEXT NOT NULL,
            points TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS call_takeaways (
            call_id TEXT NOT NULL,
            position INTEGER NOT NULL,
            takeaway TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS call_next_steps (
            call_id TEXT NOT NULL,
            position INTEGER NOT NULL,
            step TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS call_questions (
            call_id TEXT NOT NULL,
            position INTEGER NOT NULL,
            speaker_id TEXT,
            question TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_calls_extracted_at ON calls(extracted_at DESC);
        CREATE INDEX IF NOT EXISTS idx_call_participants_call ON call_participants(call_id);
        CREATE INDEX IF NOT EXISTS idx_call_questions_call ON call_questions(call_id);",
    )
    .context("Failed to migrate record store schema")?;

    Ok(())
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn upsert(&self, record: &CanonicalRecord) -> Result<PersistedId> {
        let mut conn = self.conn.lock().await;
        let tx = conn
            .transaction()
            .context("Failed to start upsert transaction")?;

        let call_id = record.id.as_str();

        tx.execute(
            "INSERT INTO calls (
                id, url, share_url, title, date, date_formatted, duration,
                duration_minutes, host_name, company_domain, summary_purpose,
                transcript_text, participant_count, topic_count, takeaway_count,
                next_step_count, question_count, extracted_at, status
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13,
                      ?14, ?15, ?16, ?17, ?18, ?19)
            ON CONFLICT(id) DO UPDATE SET
                url = excluded.url,
                share_url = excluded.share_url,
                title = excluded.title,
                date = excluded.date,
                date_formatted = excluded.date_formatted,
                duration = excluded.duration,
                duration_minutes = excluded.duration_minutes,
                host_name = excluded.host_name,
                company_domain = excluded.company_domain,
                summary_purpose = excluded.summary_purpose,
                transcript_text = excluded.transcript_text,
                participant_count = excluded.participant_count,
                topic_count = excluded.topic_count,
                takeaway_count = excluded.takeaway_count,
                next_step_count = excluded.next_step_count,
                question_count = excluded.question_count,
                extracted_at = excluded.extracted_at,
                status = excluded.status",
            rusqlite::params![
                call_id,
                record.url,
                record.share_url,
                record.title,
                record.date,
                record.date_formatted,
                record.duration,
                record.duration_minutes,
                record.host_name,
                record.company_domain,
                record.summary.purpose,
                record.transcript_text,
                record.participants.len() as i64,
                record.summary.topics.len() as i64,
                record.summary.key_takeaways.len() as i64,
                record.summary.next_steps.len() as i64,
                record.questions.len() as i64,
                record.extracted_at.to_rfc3339(),
                record.status.as_str(),
            ],
        )
        .context("Failed to upsert call row")?;

        // Replace child rows wholesale
        for table in [
            "call_participants",
            "call_topics",
            "call_takeaways",
            "call_next_steps",
            "call_questions",
        ] {
            tx.execute(&format!("DELETE FROM {} WHERE call_id = ?1", table), [call_id])
                .with_context(|| format!("Failed to clear {}", table))?;
        }

        for (i, participant) in record.participants.iter().enumerate() {
            tx.execute(
                "INSERT INTO call_participants (call_id, position, speaker_id, name, is_host)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    call_id,
                    i as i64,
                    participant.speaker_id,
                    participant.name,
                    participant.is_host,
                ],
            )
            .context("Failed to insert participant")?;
        }

        for (i, topic) in record.summary.topics.iter().enumerate() {
            let points = serde_json::to_string(&topic.points)?;
            tx.execute(
                "INSERT INTO call_topics (call_id, position, title, points)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![call_id, i as i64, topic.title, points],
            )
            .context("Failed to insert topic")?;
        }

        for (i, takeaway) in record.summary.key_takeaways.iter().enumerate() {
            tx.execute(
                "INSERT INTO call_takeaways (call_id, position, takeaway) VALUES (?1, ?2, ?3)",
                rusqlite::params![call_id, i as i64, takeaway],
            )
            .context("Failed to insert takeaway")?;
        }

        for (i, step) in record.summary.next_steps.iter().enumerate() {
            tx.execute(
                "INSERT INTO call_next_steps (call_id, position, step) VALUES (?1, ?2, ?3)",
                rusqlite::params![call_id, i as i64, step],
            )
            .context("Failed to insert next step")?;
        }

        for (i, question) in record.questions.iter().enumerate() {
            tx.execute(
                "INSERT INTO call_questions (call_id, position, speaker_id, question)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![call_id, i as i64, question.speaker_id, question.question],
            )
            .context("Failed to insert question")?;
        }

        tx.commit().context("Failed to commit upsert")?;

        Ok(PersistedId(call_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        CallSummary, ItemId, Participant, RecordQuestion, RecordStatus, TopicOutline,
    };
    use chrono::Utc;

    fn test_record(id: &str, title: &str) -> CanonicalRecord {
        CanonicalRecord {
            id: ItemId::new(id),
            url: format!("https://fathom.video/calls/{}", id),
            share_url: None,
            title: title.to_string(),
            date: Some("2025-01-05T14:30:00Z".to_string()),
            date_formatted: Some("2025-01-05".to_string()),
            duration: Some("45 mins".to_string()),
            duration_minutes: Some(45),
            host_name: Some("Ana Lima".to_string()),
            company_domain: Some("example.com".to_string()),
            participants: vec![
                Participant {
                    speaker_id: "A".to_string(),
                    name: "Ana Lima".to_string(),
                    is_host: true,
                },
                Participant {
                    speaker_id: "B".to_string(),
                    name: "Bruno Reis".to_string(),
                    is_host: false,
                },
            ],
            summary: CallSummary {
                purpose: Some("Quarterly review".to_string()),
                key_takeaways: vec!["Renewal confirmed".to_string()],
                topics: vec![TopicOutline {
                    title: "Pricing".to_string(),
                    points: vec!["Volume discount".to_string()],
                }],
                next_steps: vec!["Send proposal".to_string()],
            },
            questions: vec![RecordQuestion {
                speaker_id: Some("B".to_string()),
                question: "What about onboarding?".to_string(),
            }],
            transcript_text: "Full transcript here.".to_string(),
            extracted_at: Utc::now(),
            status: RecordStatus::Extracted,
        }
    }

    #[tokio::test]
    async fn test_upsert_inserts_parent_and_children() {
        let store = SqliteRecordStore::open_in_memory().unwrap();
        let record = test_record("call-1", "First Call");

        let persisted = store.upsert(&record).await.unwrap();
        assert_eq!(persisted.0, "call-1");
        assert_eq!(store.record_count().await.unwrap(), 1);

        let conn = store.conn.lock().await;
        let participants: i64 = conn
            .query_row("SELECT COUNT(*) FROM call_participants", [], |row| row.get(0))
            .unwrap();
        let questions: i64 = conn
            .query_row("SELECT COUNT(*) FROM call_questions", [], |row| row.get(0))
            .unwrap();
        assert_eq!(participants, 2);
        assert_eq!(questions, 1);
    }

    #[tokio::test]
    async fn test_upsert_twice_replaces_instead_of_duplicating() {
        let store = SqliteRecordStore::open_in_memory().unwrap();

        store.upsert(&test_record("call-1", "Original")).await.unwrap();
        let mut updated = test_record("call-1", "Updated Title");
        updated.participants.push(Participant {
            speaker_id: "C".to_string(),
            name: "Carla Dias".to_string(),
            is_host: false,
        });
        store.upsert(&updated).await.unwrap();

        assert_eq!(store.record_count().await.unwrap(), 1);

        let conn = store.conn.lock().await;
        let title: String = conn
            .query_row("SELECT title FROM calls WHERE id = 'call-1'", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(title, "Updated Title");

        // Child rows replaced, not accumulated
        let participants: i64 = conn
            .query_row("SELECT COUNT(*) FROM call_participants", [], |row| row.get(0))
            .unwrap();
        assert_eq!(participants, 3);
    }

    #[tokio::test]
    async fn test_distinct_ids_get_distinct_rows() {
        let store = SqliteRecordStore::open_in_memory().unwrap();

        store.upsert(&test_record("call-1", "First")).await.unwrap();
        store.upsert(&test_record("call-2", "Second")).await.unwrap();

        assert_eq!(store.record_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_denormalized_counts_match_children() {
        let store = SqliteRecordStore::open_in_memory().unwrap();
        store.upsert(&test_record("call-1", "First")).await.unwrap();

        let conn = store.conn.lock().await;
        let counts: (i64, i64, i64, i64, i64) = conn
            .query_row(
                "SELECT participant_count, topic_count, takeaway_count,
                        next_step_count, question_count
                 FROM calls WHERE id = 'call-1'",
                [],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                    ))
                },
            )
            .unwrap();
        assert_eq!(counts, (2, 1, 1, 1, 1));
    }
}
