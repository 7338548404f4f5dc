//! Unified `Database` trait — single async interface for all persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{DatabaseError, Error};
use crate::jobs::state::JobStatus;

/// One user request lifecycle through the agent engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: Uuid,
    pub session_id: String,
    pub user_id: Option<String>,
    pub thread_id: Option<Uuid>,
    pub status: JobStatus,
    pub prompt: String,
    /// Short model-derived summary of what the user asked for.
    pub intent: Option<String>,
    /// Ordered, deduplicated item references gathered across the whole run.
    pub result_item_ids: Vec<Uuid>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Build a fresh `queued` job for a session.
    pub fn new(
        session_id: impl Into<String>,
        user_id: Option<String>,
        thread_id: Uuid,
        prompt: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id: session_id.into(),
            user_id,
            thread_id: Some(thread_id),
            status: JobStatus::Queued,
            prompt: prompt.into(),
            intent: None,
            result_item_ids: Vec::new(),
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }
}

/// A conversation grouping one or more jobs from the same session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thread {
    pub id: Uuid,
    pub session_id: String,
    pub user_id: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Advanced on every message append; never moves backwards.
    pub last_message_at: DateTime<Utc>,
}

/// Role of a thread message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    /// Transient progress narration ("Searching eBay for: …").
    /// Shown in the UI but never replayed into model context.
    System,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for MessageRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "system" => Ok(Self::System),
            other => Err(format!("unknown message role: {other}")),
        }
    }
}

/// One turn in a thread. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    pub id: Uuid,
    pub job_id: Uuid,
    pub thread_id: Uuid,
    pub role: MessageRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// A normalized product reference, deduplicated by `(source, external_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: Uuid,
    pub source: String,
    pub external_id: String,
    pub title: String,
    pub price_cents: Option<i64>,
    pub currency: String,
    pub url: Option<String>,
    pub affiliate_url: Option<String>,
    pub image_url: Option<String>,
    pub seller: Option<String>,
    pub shipping_cents: Option<i64>,
    pub location: Option<String>,
    pub condition: Option<String>,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

/// Insert/refresh shape for an item, before storage assigns identity.
#[derive(Debug, Clone, PartialEq)]
pub struct NewItem {
    pub source: String,
    pub external_id: String,
    pub title: String,
    pub price_cents: Option<i64>,
    pub currency: String,
    pub url: Option<String>,
    pub affiliate_url: Option<String>,
    pub image_url: Option<String>,
    pub seller: Option<String>,
    pub shipping_cents: Option<i64>,
    pub location: Option<String>,
    pub condition: Option<String>,
}

/// Paging metadata attached to a cached search page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheMeta {
    pub total: Option<u64>,
    pub next_offset: Option<u64>,
}

/// A memoized page of search results.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Deterministic hex digest identifying this logical request.
    pub key: String,
    pub source: String,
    pub query: String,
    /// Canonical JSON serialization of the filter set.
    pub filters_json: String,
    pub item_ids: Vec<Uuid>,
    pub meta: Option<CacheMeta>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// A push delivery endpoint registered for a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushSubscription {
    pub id: Uuid,
    pub session_id: String,
    pub endpoint: String,
    pub p256dh: String,
    pub auth: String,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Backend-agnostic database trait covering jobs, threads, items, the
/// search cache, and push subscriptions.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Threads & messages ──────────────────────────────────────────

    /// Create a new thread for a session.
    async fn create_thread(
        &self,
        session_id: &str,
        user_id: Option<&str>,
    ) -> Result<Thread, DatabaseError>;

    /// Get a thread by ID.
    async fn get_thread(&self, id: Uuid) -> Result<Option<Thread>, DatabaseError>;

    /// Append a message and advance the thread's `last_message_at` in the
    /// same transaction. Both writes succeed or neither does.
    async fn append_message(
        &self,
        job_id: Uuid,
        thread_id: Uuid,
        role: MessageRole,
        content: &str,
        at: DateTime<Utc>,
    ) -> Result<StoredMessage, DatabaseError>;

    /// List a thread's messages, ascending by creation time.
    async fn list_thread_messages(
        &self,
        thread_id: Uuid,
    ) -> Result<Vec<StoredMessage>, DatabaseError>;

    // ── Jobs ────────────────────────────────────────────────────────

    /// Insert a freshly-created job.
    async fn insert_job(&self, job: &Job) -> Result<(), DatabaseError>;

    /// Get a job by ID.
    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, DatabaseError>;

    /// List a session's jobs, most recent first.
    async fn list_jobs_for_session(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<Job>, DatabaseError>;

    /// Transition a queued job to `running`.
    ///
    /// Fails with `JobError::InvalidTransition` when the job is not in a
    /// state that allows it; a transition attempted on a terminal job is
    /// a double-execution bug, never silently ignored.
    async fn mark_job_running(&self, id: Uuid, started_at: DateTime<Utc>) -> Result<Job, Error>;

    /// Transition a running job to `completed`, recording what was found.
    async fn mark_job_completed(
        &self,
        id: Uuid,
        completed_at: DateTime<Utc>,
        intent: Option<&str>,
        result_item_ids: &[Uuid],
    ) -> Result<Job, Error>;

    /// Transition a running job to `failed` with an error summary.
    async fn mark_job_failed(
        &self,
        id: Uuid,
        completed_at: DateTime<Utc>,
        error: &str,
    ) -> Result<Job, Error>;

    // ── Items ───────────────────────────────────────────────────────

    /// Upsert items by `(source, external_id)`, last writer wins.
    /// Returns the stored item IDs in the same order as the input.
    async fn upsert_items(&self, items: &[NewItem]) -> Result<Vec<Uuid>, DatabaseError>;

    /// Fetch items by ID, preserving the requested order. Unknown IDs are
    /// skipped rather than erroring.
    async fn get_items_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Item>, DatabaseError>;

    // ── Search cache ────────────────────────────────────────────────

    /// Look up a cache entry by key. A row whose `expires_at` is not
    /// after `now` is a miss even though it still physically exists.
    async fn cache_lookup(
        &self,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<CacheEntry>, DatabaseError>;

    /// Upsert a cache entry by key, overwriting any previous row.
    async fn cache_store(&self, entry: &CacheEntry) -> Result<(), DatabaseError>;

    /// Drop every cache row. Returns the number of rows deleted.
    async fn cache_clear_all(&self) -> Result<u64, DatabaseError>;

    // ── Push subscriptions ──────────────────────────────────────────

    /// Register or refresh a subscription, keyed by endpoint URL.
    async fn upsert_push_subscription(
        &self,
        session_id: &str,
        endpoint: &str,
        p256dh: &str,
        auth: &str,
        user_agent: Option<&str>,
    ) -> Result<PushSubscription, DatabaseError>;

    /// Most recently refreshed subscription for a session, if any.
    async fn latest_push_subscription_for_session(
        &self,
        session_id: &str,
    ) -> Result<Option<PushSubscription>, DatabaseError>;

    /// Delete a subscription whose endpoint reported itself gone.
    /// Returns whether a row was actually removed.
    async fn delete_push_subscription_by_endpoint(
        &self,
        endpoint: &str,
    ) -> Result<bool, DatabaseError>;
}
