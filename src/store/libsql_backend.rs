//! libSQL backend — async `Database` trait implementation.
//!
//! Supports local file and in-memory databases. All timestamps are stored
//! as RFC 3339 text so lexicographic comparison matches chronological order.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{DatabaseError, Error, JobError};
use crate::jobs::state::JobStatus;
use crate::store::migrations;
use crate::store::traits::{
    CacheEntry, Database, Item, Job, MessageRole, NewItem, PushSubscription, StoredMessage, Thread,
};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        Ok(backend)
    }

    /// Get the connection.
    fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Read just a job's current status, for transition validation.
    async fn job_status(&self, id: Uuid) -> Result<JobStatus, Error> {
        let mut rows = self
            .conn()
            .query(
                "SELECT status FROM jobs WHERE id = ?1",
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("job_status: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let status_str: String = row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("job_status row: {e}")))?;
                let status = status_str
                    .parse::<JobStatus>()
                    .map_err(DatabaseError::Serialization)?;
                Ok(status)
            }
            Ok(None) => Err(JobError::NotFound { id }.into()),
            Err(e) => Err(DatabaseError::Query(format!("job_status: {e}")).into()),
        }
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    // Try RFC 3339 first (our canonical write format)
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    // Try SQLite datetime() output with fractional seconds
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    // Try SQLite datetime() output without fractional seconds
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_optional_datetime(s: &Option<String>) -> Option<DateTime<Utc>> {
    s.as_ref().map(|s| parse_datetime(s))
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

/// Convert `Option<String>` to libsql Value.
fn opt_text_owned(s: Option<String>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s),
        None => libsql::Value::Null,
    }
}

/// Convert `Option<i64>` to libsql Value.
fn opt_int(v: Option<i64>) -> libsql::Value {
    match v {
        Some(n) => libsql::Value::Integer(n),
        None => libsql::Value::Null,
    }
}

/// Serialize item IDs into the JSON column format.
fn ids_to_json(ids: &[Uuid]) -> String {
    serde_json::to_string(ids).unwrap_or_else(|_| "[]".to_string())
}

/// Deserialize the JSON item-ID column, dropping anything malformed.
fn ids_from_json(s: &str) -> Vec<Uuid> {
    serde_json::from_str(s).unwrap_or_default()
}

// ── Row mappers ─────────────────────────────────────────────────────

const JOB_COLUMNS: &str =
    "id, session_id, user_id, thread_id, status, prompt, intent, result_item_ids, error, created_at, started_at, completed_at";

const THREAD_COLUMNS: &str = "id, session_id, user_id, created_at, last_message_at";

const MESSAGE_COLUMNS: &str = "id, job_id, thread_id, role, content, created_at";

const ITEM_COLUMNS: &str =
    "id, source, external_id, title, price_cents, currency, url, affiliate_url, image_url, seller, shipping_cents, location, condition, first_seen_at, last_seen_at";

const CACHE_COLUMNS: &str =
    "key, source, query, filters_json, item_ids, meta, created_at, expires_at";

const SUBSCRIPTION_COLUMNS: &str =
    "id, session_id, endpoint, p256dh, auth, user_agent, created_at, updated_at";

/// Map a libsql Row to a Job. Column order matches JOB_COLUMNS.
fn row_to_job(row: &libsql::Row) -> Result<Job, libsql::Error> {
    let id_str: String = row.get(0)?;
    let session_id: String = row.get(1)?;
    let user_id: Option<String> = row.get(2).ok();
    let thread_id_str: Option<String> = row.get(3).ok();
    let status_str: String = row.get(4)?;
    let prompt: String = row.get(5)?;
    let intent: Option<String> = row.get(6).ok();
    let result_str: Option<String> = row.get(7).ok();
    let error: Option<String> = row.get(8).ok();
    let created_str: String = row.get(9)?;
    let started_str: Option<String> = row.get(10).ok();
    let completed_str: Option<String> = row.get(11).ok();

    Ok(Job {
        id: Uuid::parse_str(&id_str).unwrap_or_else(|_| Uuid::nil()),
        session_id,
        user_id,
        thread_id: thread_id_str.and_then(|s| Uuid::parse_str(&s).ok()),
        status: status_str.parse().unwrap_or(JobStatus::Queued),
        prompt,
        intent,
        result_item_ids: result_str.map(|s| ids_from_json(&s)).unwrap_or_default(),
        error,
        created_at: parse_datetime(&created_str),
        started_at: parse_optional_datetime(&started_str),
        completed_at: parse_optional_datetime(&completed_str),
    })
}

fn row_to_thread(row: &libsql::Row) -> Result<Thread, libsql::Error> {
    let id_str: String = row.get(0)?;
    let session_id: String = row.get(1)?;
    let user_id: Option<String> = row.get(2).ok();
    let created_str: String = row.get(3)?;
    let last_str: String = row.get(4)?;

    Ok(Thread {
        id: Uuid::parse_str(&id_str).unwrap_or_else(|_| Uuid::nil()),
        session_id,
        user_id,
        created_at: parse_datetime(&created_str),
        last_message_at: parse_datetime(&last_str),
    })
}

fn row_to_message(row: &libsql::Row) -> Result<StoredMessage, libsql::Error> {
    let id_str: String = row.get(0)?;
    let job_str: String = row.get(1)?;
    let thread_str: String = row.get(2)?;
    let role_str: String = row.get(3)?;
    let content: String = row.get(4)?;
    let created_str: String = row.get(5)?;

    Ok(StoredMessage {
        id: Uuid::parse_str(&id_str).unwrap_or_else(|_| Uuid::nil()),
        job_id: Uuid::parse_str(&job_str).unwrap_or_else(|_| Uuid::nil()),
        thread_id: Uuid::parse_str(&thread_str).unwrap_or_else(|_| Uuid::nil()),
        // Unknown roles degrade to system, which is never replayed to the model.
        role: role_str.parse().unwrap_or(MessageRole::System),
        content,
        created_at: parse_datetime(&created_str),
    })
}

fn row_to_item(row: &libsql::Row) -> Result<Item, libsql::Error> {
    let id_str: String = row.get(0)?;
    let source: String = row.get(1)?;
    let external_id: String = row.get(2)?;
    let title: String = row.get(3)?;
    let price_cents: Option<i64> = row.get(4).ok();
    let currency: String = row.get::<String>(5).unwrap_or_else(|_| "USD".into());
    let url: Option<String> = row.get(6).ok();
    let affiliate_url: Option<String> = row.get(7).ok();
    let image_url: Option<String> = row.get(8).ok();
    let seller: Option<String> = row.get(9).ok();
    let shipping_cents: Option<i64> = row.get(10).ok();
    let location: Option<String> = row.get(11).ok();
    let condition: Option<String> = row.get(12).ok();
    let first_seen_str: String = row.get(13)?;
    let last_seen_str: String = row.get(14)?;

    Ok(Item {
        id: Uuid::parse_str(&id_str).unwrap_or_else(|_| Uuid::nil()),
        source,
        external_id,
        title,
        price_cents,
        currency,
        url,
        affiliate_url,
        image_url,
        seller,
        shipping_cents,
        location,
        condition,
        first_seen_at: parse_datetime(&first_seen_str),
        last_seen_at: parse_datetime(&last_seen_str),
    })
}

fn row_to_cache_entry(row: &libsql::Row) -> Result<CacheEntry, libsql::Error> {
    let key: String = row.get(0)?;
    let source: String = row.get(1)?;
    let query: String = row.get(2)?;
    let filters_json: String = row.get(3)?;
    let item_ids_str: String = row.get(4)?;
    let meta_str: Option<String> = row.get(5).ok();
    let created_str: String = row.get(6)?;
    let expires_str: String = row.get(7)?;

    Ok(CacheEntry {
        key,
        source,
        query,
        filters_json,
        item_ids: ids_from_json(&item_ids_str),
        meta: meta_str.and_then(|s| serde_json::from_str(&s).ok()),
        created_at: parse_datetime(&created_str),
        expires_at: parse_datetime(&expires_str),
    })
}

fn row_to_subscription(row: &libsql::Row) -> Result<PushSubscription, libsql::Error> {
    let id_str: String = row.get(0)?;
    let session_id: String = row.get(1)?;
    let endpoint: String = row.get(2)?;
    let p256dh: String = row.get(3)?;
    let auth: String = row.get(4)?;
    let user_agent: Option<String> = row.get(5).ok();
    let created_str: String = row.get(6)?;
    let updated_str: String = row.get(7)?;

    Ok(PushSubscription {
        id: Uuid::parse_str(&id_str).unwrap_or_else(|_| Uuid::nil()),
        session_id,
        endpoint,
        p256dh,
        auth,
        user_agent,
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Threads & messages ──────────────────────────────────────────

    async fn create_thread(
        &self,
        session_id: &str,
        user_id: Option<&str>,
    ) -> Result<Thread, DatabaseError> {
        let conn = self.conn();
        let now = Utc::now();
        let thread = Thread {
            id: Uuid::new_v4(),
            session_id: session_id.to_string(),
            user_id: user_id.map(String::from),
            created_at: now,
            last_message_at: now,
        };

        conn.execute(
            "INSERT INTO threads (id, session_id, user_id, created_at, last_message_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                thread.id.to_string(),
                session_id,
                opt_text(user_id),
                now.to_rfc3339(),
                now.to_rfc3339(),
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("create_thread: {e}")))?;

        debug!(thread_id = %thread.id, "Thread created");
        Ok(thread)
    }

    async fn get_thread(&self, id: Uuid) -> Result<Option<Thread>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!("SELECT {THREAD_COLUMNS} FROM threads WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_thread: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let thread = row_to_thread(&row)
                    .map_err(|e| DatabaseError::Query(format!("get_thread row parse: {e}")))?;
                Ok(Some(thread))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_thread: {e}"))),
        }
    }

    async fn append_message(
        &self,
        job_id: Uuid,
        thread_id: Uuid,
        role: MessageRole,
        content: &str,
        at: DateTime<Utc>,
    ) -> Result<StoredMessage, DatabaseError> {
        // Message insert and thread recency bump must land together.
        let tx = self
            .conn()
            .transaction()
            .await
            .map_err(|e| DatabaseError::Query(format!("append_message begin: {e}")))?;

        let message = StoredMessage {
            id: Uuid::new_v4(),
            job_id,
            thread_id,
            role,
            content: content.to_string(),
            created_at: at,
        };

        tx.execute(
            "INSERT INTO thread_messages (id, job_id, thread_id, role, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                message.id.to_string(),
                job_id.to_string(),
                thread_id.to_string(),
                role.to_string(),
                content,
                at.to_rfc3339(),
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("append_message insert: {e}")))?;

        // max() keeps last_message_at monotonic even for out-of-order appends
        let updated = tx
            .execute(
                "UPDATE threads SET last_message_at = max(last_message_at, ?1) WHERE id = ?2",
                params![at.to_rfc3339(), thread_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("append_message touch thread: {e}")))?;

        if updated == 0 {
            // Dropping the transaction rolls the insert back.
            return Err(DatabaseError::NotFound {
                entity: "thread".to_string(),
                id: thread_id.to_string(),
            });
        }

        tx.commit()
            .await
            .map_err(|e| DatabaseError::Query(format!("append_message commit: {e}")))?;

        Ok(message)
    }

    async fn list_thread_messages(
        &self,
        thread_id: Uuid,
    ) -> Result<Vec<StoredMessage>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM thread_messages
                     WHERE thread_id = ?1 ORDER BY created_at ASC, rowid ASC"
                ),
                params![thread_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_thread_messages: {e}")))?;

        let mut messages = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_message(&row) {
                Ok(m) => messages.push(m),
                Err(e) => warn!("Skipping malformed message row: {e}"),
            }
        }
        Ok(messages)
    }

    // ── Jobs ────────────────────────────────────────────────────────

    async fn insert_job(&self, job: &Job) -> Result<(), DatabaseError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO jobs (id, session_id, user_id, thread_id, status, prompt, intent, result_item_ids, error, created_at, started_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                job.id.to_string(),
                job.session_id.as_str(),
                opt_text(job.user_id.as_deref()),
                opt_text_owned(job.thread_id.map(|t| t.to_string())),
                job.status.to_string(),
                job.prompt.as_str(),
                opt_text(job.intent.as_deref()),
                if job.result_item_ids.is_empty() {
                    libsql::Value::Null
                } else {
                    libsql::Value::Text(ids_to_json(&job.result_item_ids))
                },
                opt_text(job.error.as_deref()),
                job.created_at.to_rfc3339(),
                opt_text_owned(job.started_at.map(|t| t.to_rfc3339())),
                opt_text_owned(job.completed_at.map(|t| t.to_rfc3339())),
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("insert_job: {e}")))?;

        debug!(job_id = %job.id, session_id = %job.session_id, "Job inserted");
        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_job: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let job = row_to_job(&row)
                    .map_err(|e| DatabaseError::Query(format!("get_job row parse: {e}")))?;
                Ok(Some(job))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_job: {e}"))),
        }
    }

    async fn list_jobs_for_session(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<Job>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {JOB_COLUMNS} FROM jobs
                     WHERE session_id = ?1 ORDER BY created_at DESC LIMIT ?2"
                ),
                params![session_id, limit as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_jobs_for_session: {e}")))?;

        let mut jobs = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_job(&row) {
                Ok(job) => jobs.push(job),
                Err(e) => warn!("Skipping malformed job row: {e}"),
            }
        }
        Ok(jobs)
    }

    async fn mark_job_running(&self, id: Uuid, started_at: DateTime<Utc>) -> Result<Job, Error> {
        let current = self.job_status(id).await?;
        if !current.can_transition_to(JobStatus::Running) {
            return Err(JobError::InvalidTransition {
                id,
                state: current.to_string(),
                target: JobStatus::Running.to_string(),
            }
            .into());
        }

        let updated = self
            .conn()
            .execute(
                "UPDATE jobs SET status = ?1, started_at = ?2 WHERE id = ?3 AND status = ?4",
                params![
                    JobStatus::Running.to_string(),
                    started_at.to_rfc3339(),
                    id.to_string(),
                    current.to_string(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("mark_job_running: {e}")))?;

        if updated == 0 {
            // Status changed underneath us between the read and the write.
            return Err(JobError::InvalidTransition {
                id,
                state: current.to_string(),
                target: JobStatus::Running.to_string(),
            }
            .into());
        }

        debug!(job_id = %id, "Job running");
        match self.get_job(id).await? {
            Some(job) => Ok(job),
            None => Err(JobError::NotFound { id }.into()),
        }
    }

    async fn mark_job_completed(
        &self,
        id: Uuid,
        completed_at: DateTime<Utc>,
        intent: Option<&str>,
        result_item_ids: &[Uuid],
    ) -> Result<Job, Error> {
        let current = self.job_status(id).await?;
        if !current.can_transition_to(JobStatus::Completed) {
            return Err(JobError::InvalidTransition {
                id,
                state: current.to_string(),
                target: JobStatus::Completed.to_string(),
            }
            .into());
        }

        let updated = self
            .conn()
            .execute(
                "UPDATE jobs SET status = ?1, completed_at = ?2, intent = COALESCE(?3, intent),
                 result_item_ids = ?4 WHERE id = ?5 AND status = ?6",
                params![
                    JobStatus::Completed.to_string(),
                    completed_at.to_rfc3339(),
                    opt_text(intent),
                    ids_to_json(result_item_ids),
                    id.to_string(),
                    current.to_string(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("mark_job_completed: {e}")))?;

        if updated == 0 {
            return Err(JobError::InvalidTransition {
                id,
                state: current.to_string(),
                target: JobStatus::Completed.to_string(),
            }
            .into());
        }

        debug!(job_id = %id, items = result_item_ids.len(), "Job completed");
        match self.get_job(id).await? {
            Some(job) => Ok(job),
            None => Err(JobError::NotFound { id }.into()),
        }
    }

    async fn mark_job_failed(
        &self,
        id: Uuid,
        completed_at: DateTime<Utc>,
        error: &str,
    ) -> Result<Job, Error> {
        let current = self.job_status(id).await?;
        if !current.can_transition_to(JobStatus::Failed) {
            return Err(JobError::InvalidTransition {
                id,
                state: current.to_string(),
                target: JobStatus::Failed.to_string(),
            }
            .into());
        }

        let updated = self
            .conn()
            .execute(
                "UPDATE jobs SET status = ?1, completed_at = ?2, error = ?3
                 WHERE id = ?4 AND status = ?5",
                params![
                    JobStatus::Failed.to_string(),
                    completed_at.to_rfc3339(),
                    error,
                    id.to_string(),
                    current.to_string(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("mark_job_failed: {e}")))?;

        if updated == 0 {
            return Err(JobError::InvalidTransition {
                id,
                state: current.to_string(),
                target: JobStatus::Failed.to_string(),
            }
            .into());
        }

        debug!(job_id = %id, error, "Job failed");
        match self.get_job(id).await? {
            Some(job) => Ok(job),
            None => Err(JobError::NotFound { id }.into()),
        }
    }

    // ── Items ───────────────────────────────────────────────────────

    async fn upsert_items(&self, items: &[NewItem]) -> Result<Vec<Uuid>, DatabaseError> {
        let conn = self.conn();
        let now = Utc::now().to_rfc3339();
        let mut ids = Vec::with_capacity(items.len());

        for item in items {
            conn.execute(
                "INSERT INTO items (id, source, external_id, title, price_cents, currency, url, affiliate_url, image_url, seller, shipping_cents, location, condition, first_seen_at, last_seen_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
                 ON CONFLICT (source, external_id) DO UPDATE SET
                    title = excluded.title,
                    price_cents = excluded.price_cents,
                    currency = excluded.currency,
                    url = excluded.url,
                    affiliate_url = excluded.affiliate_url,
                    image_url = excluded.image_url,
                    seller = excluded.seller,
                    shipping_cents = excluded.shipping_cents,
                    location = excluded.location,
                    condition = excluded.condition,
                    last_seen_at = excluded.last_seen_at",
                params![
                    Uuid::new_v4().to_string(),
                    item.source.as_str(),
                    item.external_id.as_str(),
                    item.title.as_str(),
                    opt_int(item.price_cents),
                    item.currency.as_str(),
                    opt_text(item.url.as_deref()),
                    opt_text(item.affiliate_url.as_deref()),
                    opt_text(item.image_url.as_deref()),
                    opt_text(item.seller.as_deref()),
                    opt_int(item.shipping_cents),
                    opt_text(item.location.as_deref()),
                    opt_text(item.condition.as_deref()),
                    now.as_str(),
                    now.as_str(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("upsert_items insert: {e}")))?;

            // A pre-existing row keeps its original id; read back whichever won.
            let mut rows = conn
                .query(
                    "SELECT id FROM items WHERE source = ?1 AND external_id = ?2",
                    params![item.source.as_str(), item.external_id.as_str()],
                )
                .await
                .map_err(|e| DatabaseError::Query(format!("upsert_items resolve id: {e}")))?;

            match rows.next().await {
                Ok(Some(row)) => {
                    let id_str: String = row.get(0).map_err(|e| {
                        DatabaseError::Query(format!("upsert_items id parse: {e}"))
                    })?;
                    ids.push(Uuid::parse_str(&id_str).unwrap_or_else(|_| Uuid::nil()));
                }
                Ok(None) => {
                    return Err(DatabaseError::NotFound {
                        entity: "item".to_string(),
                        id: format!("{}/{}", item.source, item.external_id),
                    });
                }
                Err(e) => {
                    return Err(DatabaseError::Query(format!("upsert_items resolve id: {e}")));
                }
            }
        }

        Ok(ids)
    }

    async fn get_items_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Item>, DatabaseError> {
        let conn = self.conn();
        let mut items = Vec::with_capacity(ids.len());

        for id in ids {
            let mut rows = conn
                .query(
                    &format!("SELECT {ITEM_COLUMNS} FROM items WHERE id = ?1"),
                    params![id.to_string()],
                )
                .await
                .map_err(|e| DatabaseError::Query(format!("get_items_by_ids: {e}")))?;

            if let Ok(Some(row)) = rows.next().await {
                match row_to_item(&row) {
                    Ok(item) => items.push(item),
                    Err(e) => warn!("Skipping malformed item row: {e}"),
                }
            }
        }

        Ok(items)
    }

    // ── Search cache ────────────────────────────────────────────────

    async fn cache_lookup(
        &self,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<CacheEntry>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {CACHE_COLUMNS} FROM search_cache
                     WHERE key = ?1 AND expires_at > ?2"
                ),
                params![key, now.to_rfc3339()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("cache_lookup: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let entry = row_to_cache_entry(&row)
                    .map_err(|e| DatabaseError::Query(format!("cache_lookup row parse: {e}")))?;
                Ok(Some(entry))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("cache_lookup: {e}"))),
        }
    }

    async fn cache_store(&self, entry: &CacheEntry) -> Result<(), DatabaseError> {
        let conn = self.conn();
        let meta_json = entry
            .meta
            .as_ref()
            .and_then(|m| serde_json::to_string(m).ok());

        conn.execute(
            "INSERT INTO search_cache (key, source, query, filters_json, item_ids, meta, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT (key) DO UPDATE SET
                source = excluded.source,
                query = excluded.query,
                filters_json = excluded.filters_json,
                item_ids = excluded.item_ids,
                meta = excluded.meta,
                created_at = excluded.created_at,
                expires_at = excluded.expires_at",
            params![
                entry.key.as_str(),
                entry.source.as_str(),
                entry.query.as_str(),
                entry.filters_json.as_str(),
                ids_to_json(&entry.item_ids),
                opt_text_owned(meta_json),
                entry.created_at.to_rfc3339(),
                entry.expires_at.to_rfc3339(),
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("cache_store: {e}")))?;

        debug!(key = %entry.key, source = %entry.source, "Search cache stored");
        Ok(())
    }

    async fn cache_clear_all(&self) -> Result<u64, DatabaseError> {
        let conn = self.conn();
        let deleted = conn
            .execute("DELETE FROM search_cache", ())
            .await
            .map_err(|e| DatabaseError::Query(format!("cache_clear_all: {e}")))?;

        info!(deleted, "Search cache cleared");
        Ok(deleted)
    }

    // ── Push subscriptions ──────────────────────────────────────────

    async fn upsert_push_subscription(
        &self,
        session_id: &str,
        endpoint: &str,
        p256dh: &str,
        auth: &str,
        user_agent: Option<&str>,
    ) -> Result<PushSubscription, DatabaseError> {
        let conn = self.conn();
        let now = Utc::now().to_rfc3339();

        conn.execute(
            "INSERT INTO push_subscriptions (id, session_id, endpoint, p256dh, auth, user_agent, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT (endpoint) DO UPDATE SET
                session_id = excluded.session_id,
                p256dh = excluded.p256dh,
                auth = excluded.auth,
                user_agent = excluded.user_agent,
                updated_at = excluded.updated_at",
            params![
                Uuid::new_v4().to_string(),
                session_id,
                endpoint,
                p256dh,
                auth,
                opt_text(user_agent),
                now.as_str(),
                now.as_str(),
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("upsert_push_subscription: {e}")))?;

        let mut rows = conn
            .query(
                &format!(
                    "SELECT {SUBSCRIPTION_COLUMNS} FROM push_subscriptions WHERE endpoint = ?1"
                ),
                params![endpoint],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("upsert_push_subscription read: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let sub = row_to_subscription(&row).map_err(|e| {
                    DatabaseError::Query(format!("upsert_push_subscription row parse: {e}"))
                })?;
                debug!(session_id, endpoint, "Push subscription upserted");
                Ok(sub)
            }
            Ok(None) => Err(DatabaseError::NotFound {
                entity: "push_subscription".to_string(),
                id: endpoint.to_string(),
            }),
            Err(e) => Err(DatabaseError::Query(format!(
                "upsert_push_subscription read: {e}"
            ))),
        }
    }

    async fn latest_push_subscription_for_session(
        &self,
        session_id: &str,
    ) -> Result<Option<PushSubscription>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {SUBSCRIPTION_COLUMNS} FROM push_subscriptions
                     WHERE session_id = ?1 ORDER BY updated_at DESC LIMIT 1"
                ),
                params![session_id],
            )
            .await
            .map_err(|e| {
                DatabaseError::Query(format!("latest_push_subscription_for_session: {e}"))
            })?;

        match rows.next().await {
            Ok(Some(row)) => {
                let sub = row_to_subscription(&row).map_err(|e| {
                    DatabaseError::Query(format!("latest_push_subscription row parse: {e}"))
                })?;
                Ok(Some(sub))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!(
                "latest_push_subscription_for_session: {e}"
            ))),
        }
    }

    async fn delete_push_subscription_by_endpoint(
        &self,
        endpoint: &str,
    ) -> Result<bool, DatabaseError> {
        let conn = self.conn();
        let deleted = conn
            .execute(
                "DELETE FROM push_subscriptions WHERE endpoint = ?1",
                params![endpoint],
            )
            .await
            .map_err(|e| {
                DatabaseError::Query(format!("delete_push_subscription_by_endpoint: {e}"))
            })?;

        if deleted > 0 {
            debug!(endpoint, "Push subscription deleted");
        }
        Ok(deleted > 0)
    }
}
