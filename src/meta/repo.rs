//! SQLite-backed metadata repository.
//!
//! Uses `rusqlite` with the `bundled` feature so no system SQLite library
//! is required. All methods are synchronous rusqlite calls under a mutex;
//! callers are async but every statement is point-lookup sized.
//!
//! Passing `":memory:"` creates an in-memory database (used by tests).

use super::{
    MetaRecord, PartRecord, TaskKind, TaskRecord, TASK_ERROR, TASK_FINISH, TASK_RUNNING, TASK_UNDO,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetaError {
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("payload error: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Repository over the `meta`, `part` and `task` tables.
pub struct MetaRepo {
    conn: Mutex<Connection>,
}

impl MetaRepo {
    /// Open (or create) the database at `path` and initialize the schema.
    pub fn new(path: &str) -> Result<Self, MetaError> {
        let conn = Connection::open(path)?;
        let repo = Self {
            conn: Mutex::new(conn),
        };
        repo.init_db()?;
        Ok(repo)
    }

    fn init_db(&self) -> Result<(), MetaError> {
        let conn = self.conn.lock();
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;

            CREATE TABLE IF NOT EXISTS meta (
                uid           INTEGER PRIMARY KEY,
                bucket        TEXT NOT NULL,
                name          TEXT NOT NULL,
                storage_name  TEXT NOT NULL,
                address       TEXT NOT NULL,
                md5           TEXT NOT NULL DEFAULT '',
                height        INTEGER NOT NULL DEFAULT 0,
                width         INTEGER NOT NULL DEFAULT 0,
                storage_size  INTEGER NOT NULL DEFAULT 0,
                multi_part    INTEGER NOT NULL DEFAULT 0,
                part_num      INTEGER NOT NULL DEFAULT 0,
                status        INTEGER NOT NULL,
                content_type  TEXT NOT NULL DEFAULT 'application/octet-stream',
                created_at    TEXT NOT NULL,
                updated_at    TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_meta_md5 ON meta(md5, status, multi_part);

            CREATE TABLE IF NOT EXISTS part (
                storage_uid   INTEGER NOT NULL,
                chunk_num     INTEGER NOT NULL,
                bucket        TEXT NOT NULL,
                storage_name  TEXT NOT NULL,
                storage_size  INTEGER NOT NULL,
                part_md5      TEXT NOT NULL,
                status        INTEGER NOT NULL DEFAULT 1,
                created_at    TEXT NOT NULL,
                updated_at    TEXT NOT NULL,

                PRIMARY KEY (storage_uid, chunk_num)
            );

            CREATE TABLE IF NOT EXISTS task (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                task_type     TEXT NOT NULL,
                status        INTEGER NOT NULL DEFAULT 0,
                extra_data    TEXT NOT NULL,
                retry_count   INTEGER NOT NULL DEFAULT 0,
                created_at    TEXT NOT NULL,
                updated_at    TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_task_status ON task(status);
            ",
        )?;
        Ok(())
    }

    /// Liveness probe for `/ping`.
    pub fn ping(&self) -> Result<(), MetaError> {
        let conn = self.conn.lock();
        conn.query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
    }

    // === meta ===

    pub fn meta_by_uid(&self, uid: i64) -> Result<Option<MetaRecord>, MetaError> {
        let conn = self.conn.lock();
        let rec = conn
            .query_row(
                "SELECT uid, bucket, name, storage_name, address, md5, height, width,
                        storage_size, multi_part, part_num, status, content_type,
                        created_at, updated_at
                 FROM meta WHERE uid = ?1",
                params![uid],
                meta_from_row,
            )
            .optional()?;
        Ok(rec)
    }

    pub fn meta_by_uids(&self, uids: &[i64]) -> Result<Vec<MetaRecord>, MetaError> {
        let conn = self.conn.lock();
        let mut out = Vec::new();
        let mut stmt = conn.prepare(
            "SELECT uid, bucket, name, storage_name, address, md5, height, width,
                    storage_size, multi_part, part_num, status, content_type,
                    created_at, updated_at
             FROM meta WHERE uid = ?1",
        )?;
        for uid in uids {
            if let Some(rec) = stmt.query_row(params![uid], meta_from_row).optional()? {
                out.push(rec);
            }
        }
        Ok(out)
    }

    /// Completed, non-multipart rows matching any of `md5s`, the dedupe
    /// sources for instant upload.
    pub fn completed_by_md5(&self, md5s: &[String]) -> Result<Vec<MetaRecord>, MetaError> {
        let conn = self.conn.lock();
        let mut out = Vec::new();
        let mut stmt = conn.prepare(
            "SELECT uid, bucket, name, storage_name, address, md5, height, width,
                    storage_size, multi_part, part_num, status, content_type,
                    created_at, updated_at
             FROM meta WHERE md5 = ?1 AND status = 1 AND multi_part = 0",
        )?;
        for md5 in md5s {
            let mut rows = stmt.query(params![md5])?;
            while let Some(row) = rows.next()? {
                out.push(meta_from_row(row)?);
            }
        }
        Ok(out)
    }

    /// Insert all records in one transaction; rolls back as a unit.
    pub fn batch_insert_meta(&self, records: &[MetaRecord]) -> Result<(), MetaError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO meta (uid, bucket, name, storage_name, address, md5, height,
                                   width, storage_size, multi_part, part_num, status,
                                   content_type, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            )?;
            for rec in records {
                stmt.execute(params![
                    rec.uid,
                    rec.bucket,
                    rec.name,
                    rec.storage_name,
                    rec.address,
                    rec.md5,
                    rec.height,
                    rec.width,
                    rec.storage_size,
                    rec.multi_part as i64,
                    rec.part_num,
                    rec.status,
                    rec.content_type,
                    format_time(rec.created_at),
                    format_time(rec.updated_at),
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Flip a single upload to complete with its measured content.
    pub fn complete_single(
        &self,
        uid: i64,
        md5: &str,
        storage_size: i64,
        content_type: &str,
    ) -> Result<(), MetaError> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE meta SET md5 = ?2, storage_size = ?3, multi_part = 0, status = 1,
                             content_type = ?4, updated_at = ?5
             WHERE uid = ?1",
            params![uid, md5, storage_size, content_type, format_time(Utc::now())],
        )?;
        Ok(())
    }

    /// Point an upload at an existing completed object (instant upload).
    pub fn complete_dedupe(&self, uid: i64, md5: &str, source: &MetaRecord) -> Result<(), MetaError> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE meta SET bucket = ?2, storage_name = ?3, address = ?4, md5 = ?5,
                             storage_size = ?6, multi_part = 0, status = 1,
                             content_type = ?7, updated_at = ?8
             WHERE uid = ?1",
            params![
                uid,
                source.bucket,
                source.storage_name,
                source.address,
                md5,
                source.storage_size,
                source.content_type,
                format_time(Utc::now()),
            ],
        )?;
        Ok(())
    }

    /// Flip a multipart upload to complete once all chunks are accepted.
    pub fn complete_multipart(
        &self,
        uid: i64,
        part_num: i64,
        md5: &str,
        storage_size: i64,
        content_type: &str,
    ) -> Result<(), MetaError> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE meta SET part_num = ?2, md5 = ?3, storage_size = ?4, multi_part = 1,
                             status = 1, content_type = ?5, updated_at = ?6
             WHERE uid = ?1",
            params![
                uid,
                part_num,
                md5,
                storage_size,
                content_type,
                format_time(Utc::now()),
            ],
        )?;
        Ok(())
    }

    // === part ===

    /// Accepted chunks for an upload, ordered by chunk number.
    pub fn parts_by_uid(&self, uid: i64) -> Result<Vec<PartRecord>, MetaError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT storage_uid, chunk_num, bucket, storage_name, storage_size,
                    part_md5, status, created_at, updated_at
             FROM part WHERE storage_uid = ?1 AND status = 1
             ORDER BY chunk_num ASC",
        )?;
        let mut rows = stmt.query(params![uid])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(part_from_row(row)?);
        }
        Ok(out)
    }

    /// Whether this exact chunk (uid, position, content) was already accepted.
    pub fn part_exists(&self, uid: i64, chunk_num: i64, md5: &str) -> Result<bool, MetaError> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM part
             WHERE storage_uid = ?1 AND chunk_num = ?2 AND part_md5 = ?3 AND status = 1",
            params![uid, chunk_num, md5],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Record an accepted chunk. Replays of the same (uid, chunk) are
    /// absorbed by the primary key.
    pub fn insert_part(&self, part: &PartRecord) -> Result<(), MetaError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO part (storage_uid, chunk_num, bucket, storage_name, storage_size,
                               part_md5, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT (storage_uid, chunk_num) DO NOTHING",
            params![
                part.storage_uid,
                part.chunk_num,
                part.bucket,
                part.storage_name,
                part.storage_size,
                part.part_md5,
                part.status,
                format_time(part.created_at),
                format_time(part.updated_at),
            ],
        )?;
        Ok(())
    }

    pub fn delete_parts(&self, uid: i64) -> Result<(), MetaError> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM part WHERE storage_uid = ?1", params![uid])?;
        Ok(())
    }

    // === task ===

    pub fn create_task(&self, kind: TaskKind, payload: &super::TaskPayload) -> Result<i64, MetaError> {
        let conn = self.conn.lock();
        let now = format_time(Utc::now());
        conn.execute(
            "INSERT INTO task (task_type, status, extra_data, retry_count, created_at, updated_at)
             VALUES (?1, ?2, ?3, 0, ?4, ?4)",
            params![kind.as_str(), TASK_UNDO, serde_json::to_string(payload)?, now],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Claim up to `limit` undo tasks for execution. The dispatcher is the
    /// only writer of the undo -> running transition; the guarded UPDATE
    /// keeps a row from being handed to two workers.
    pub fn claim_undo_tasks(&self, limit: usize) -> Result<Vec<TaskRecord>, MetaError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, task_type, status, extra_data, retry_count, created_at, updated_at
             FROM task WHERE status = ?1 ORDER BY id ASC LIMIT ?2",
        )?;
        let mut rows = stmt.query(params![TASK_UNDO, limit as i64])?;
        let mut candidates = Vec::new();
        while let Some(row) = rows.next()? {
            candidates.push(task_from_row(row)?);
        }
        drop(rows);
        drop(stmt);

        let mut claimed = Vec::new();
        for mut task in candidates {
            let updated = conn.execute(
                "UPDATE task SET status = ?2, updated_at = ?3 WHERE id = ?1 AND status = ?4",
                params![task.id, TASK_RUNNING, format_time(Utc::now()), TASK_UNDO],
            )?;
            if updated == 1 {
                task.status = TASK_RUNNING;
                claimed.push(task);
            }
        }
        Ok(claimed)
    }

    pub fn finish_task(&self, id: i64) -> Result<(), MetaError> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE task SET status = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, TASK_FINISH, format_time(Utc::now())],
        )?;
        Ok(())
    }

    /// Record a failed attempt: re-queue with an incremented retry count,
    /// or park in the error state once the compensation budget is spent.
    pub fn fail_task(&self, id: i64, compensation_total: i64) -> Result<(), MetaError> {
        let conn = self.conn.lock();
        let retry_count: i64 = conn.query_row(
            "SELECT retry_count FROM task WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        let next = retry_count + 1;
        let status = if next >= compensation_total {
            TASK_ERROR
        } else {
            TASK_UNDO
        };
        conn.execute(
            "UPDATE task SET status = ?2, retry_count = ?3, updated_at = ?4 WHERE id = ?1",
            params![id, status, next, format_time(Utc::now())],
        )?;
        Ok(())
    }

    pub fn task_by_id(&self, id: i64) -> Result<Option<TaskRecord>, MetaError> {
        let conn = self.conn.lock();
        let rec = conn
            .query_row(
                "SELECT id, task_type, status, extra_data, retry_count, created_at, updated_at
                 FROM task WHERE id = ?1",
                params![id],
                task_from_row,
            )
            .optional()?;
        Ok(rec)
    }

    /// Tasks currently in the given state, oldest first.
    pub fn tasks_by_status(&self, status: i64) -> Result<Vec<TaskRecord>, MetaError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, task_type, status, extra_data, retry_count, created_at, updated_at
             FROM task WHERE status = ?1 ORDER BY id ASC",
        )?;
        let mut rows = stmt.query(params![status])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(task_from_row(row)?);
        }
        Ok(out)
    }
}

fn format_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339()
}

fn parse_time(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn meta_from_row(row: &Row<'_>) -> rusqlite::Result<MetaRecord> {
    Ok(MetaRecord {
        uid: row.get(0)?,
        bucket: row.get(1)?,
        name: row.get(2)?,
        storage_name: row.get(3)?,
        address: row.get(4)?,
        md5: row.get(5)?,
        height: row.get(6)?,
        width: row.get(7)?,
        storage_size: row.get(8)?,
        multi_part: row.get::<_, i64>(9)? != 0,
        part_num: row.get(10)?,
        status: row.get(11)?,
        content_type: row.get(12)?,
        created_at: parse_time(row.get(13)?),
        updated_at: parse_time(row.get(14)?),
    })
}

fn part_from_row(row: &Row<'_>) -> rusqlite::Result<PartRecord> {
    Ok(PartRecord {
        storage_uid: row.get(0)?,
        chunk_num: row.get(1)?,
        bucket: row.get(2)?,
        storage_name: row.get(3)?,
        storage_size: row.get(4)?,
        part_md5: row.get(5)?,
        status: row.get(6)?,
        created_at: parse_time(row.get(7)?),
        updated_at: parse_time(row.get(8)?),
    })
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<TaskRecord> {
    Ok(TaskRecord {
        id: row.get(0)?,
        task_type: row.get(1)?,
        status: row.get(2)?,
        extra_data: row.get(3)?,
        retry_count: row.get(4)?,
        created_at: parse_time(row.get(5)?),
        updated_at: parse_time(row.get(6)?),
    })
}
