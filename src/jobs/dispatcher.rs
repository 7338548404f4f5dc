//! Job creation and scheduling.
//!
//! Creation is synchronous and transactional from the caller's view:
//! when `create_job` returns, the queued job, its thread, and the user
//! message all exist. Execution is fire-and-forget, scheduled exactly
//! once here and nowhere else; the orchestrator relies on that.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::agent::Orchestrator;
use crate::error::{Error, JobError};
use crate::store::{Database, Job, MessageRole};

/// Identifiers handed back to the caller for polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreatedJob {
    pub job_id: Uuid,
    pub thread_id: Uuid,
}

pub struct JobDispatcher {
    db: Arc<dyn Database>,
    orchestrator: Arc<Orchestrator>,
}

impl JobDispatcher {
    pub fn new(db: Arc<dyn Database>, orchestrator: Arc<Orchestrator>) -> Self {
        Self { db, orchestrator }
    }

    /// Create a queued job on a new or existing thread, append the prompt
    /// as a user message, and schedule one orchestrator run.
    pub async fn create_job(
        &self,
        prompt: &str,
        session_id: &str,
        user_id: Option<&str>,
        thread_id: Option<Uuid>,
    ) -> Result<CreatedJob, Error> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(JobError::InvalidInput("prompt must not be empty".to_string()).into());
        }
        let session_id = session_id.trim();
        if session_id.is_empty() {
            return Err(
                JobError::InvalidInput("missing session, refresh and retry".to_string()).into(),
            );
        }

        let thread = match thread_id {
            Some(id) => {
                let thread = self.db.get_thread(id).await?.ok_or_else(|| {
                    Error::from(JobError::InvalidInput(format!("unknown thread {id}")))
                })?;
                if thread.session_id != session_id {
                    return Err(JobError::InvalidInput(format!(
                        "thread {id} belongs to another session"
                    ))
                    .into());
                }
                thread
            }
            None => self.db.create_thread(session_id, user_id).await?,
        };

        let job = Job::new(session_id, user_id.map(String::from), thread.id, prompt);
        self.db.insert_job(&job).await?;
        self.db
            .append_message(job.id, thread.id, MessageRole::User, prompt, Utc::now())
            .await?;

        let orchestrator = Arc::clone(&self.orchestrator);
        let job_id = job.id;
        tokio::spawn(async move {
            orchestrator.run(job_id).await;
        });

        info!(%job_id, thread_id = %thread.id, session_id, "Job created and scheduled");
        Ok(CreatedJob {
            job_id,
            thread_id: thread.id,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::EngineConfig;
    use crate::error::LlmError;
    use crate::jobs::state::JobStatus;
    use crate::llm::{ChatMessage, LlmProvider, ToolCompletionResponse, ToolSchema};
    use crate::notify::{Notifier, PushTransport};
    use crate::search::SearchService;
    use crate::store::LibSqlBackend;
    use crate::tools::Toolbox;

    use async_trait::async_trait;

    struct OneLinerLlm;

    #[async_trait]
    impl LlmProvider for OneLinerLlm {
        fn model_name(&self) -> &str {
            "one-liner"
        }

        async fn complete_with_tools(
            &self,
            _messages: &[ChatMessage],
            _tools: &[ToolSchema],
        ) -> Result<ToolCompletionResponse, LlmError> {
            Ok(ToolCompletionResponse {
                content: Some("Done.".to_string()),
                tool_calls: Vec::new(),
            })
        }
    }

    struct NoopTransport;

    #[async_trait]
    impl PushTransport for NoopTransport {
        async fn deliver(
            &self,
            _subscription: &crate::store::PushSubscription,
            _payload: &crate::notify::PushPayload,
        ) -> Result<(), crate::error::NotifyError> {
            Ok(())
        }
    }

    async fn dispatcher() -> (Arc<LibSqlBackend>, JobDispatcher) {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let config = EngineConfig::default();
        let search = SearchService::new(db.clone(), config.search_cache_ttl, config.search_timeout);
        let toolbox = Arc::new(Toolbox::new(Arc::new(search)));
        let notifier = Arc::new(Notifier::new(db.clone(), Arc::new(NoopTransport)));
        let orchestrator = Arc::new(Orchestrator::new(
            db.clone(),
            Arc::new(OneLinerLlm),
            toolbox,
            notifier,
            config,
        ));
        let dispatcher = JobDispatcher::new(db.clone(), orchestrator);
        (db, dispatcher)
    }

    async fn wait_for_terminal(db: &Arc<LibSqlBackend>, job_id: Uuid) -> JobStatus {
        for _ in 0..200 {
            let job = db.get_job(job_id).await.unwrap().unwrap();
            if job.status.is_terminal() {
                return job.status;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("job never reached a terminal state");
    }

    #[tokio::test]
    async fn creates_and_schedules_a_job() {
        let (db, dispatcher) = dispatcher().await;

        let created = dispatcher
            .create_job("find me earbuds", "sess-1", None, None)
            .await
            .unwrap();

        let job = db.get_job(created.job_id).await.unwrap().unwrap();
        assert_eq!(job.session_id, "sess-1");
        assert_eq!(job.prompt, "find me earbuds");
        assert_eq!(job.thread_id, Some(created.thread_id));

        let messages = db.list_thread_messages(created.thread_id).await.unwrap();
        assert_eq!(messages[0].role, MessageRole::User);
        assert_eq!(messages[0].content, "find me earbuds");

        // The scheduled run takes the job to a terminal state on its own.
        assert_eq!(wait_for_terminal(&db, created.job_id).await, JobStatus::Completed);
    }

    #[tokio::test]
    async fn prompt_is_trimmed_before_storage() {
        let (db, dispatcher) = dispatcher().await;

        let created = dispatcher
            .create_job("  earbuds  \n", "sess-1", None, None)
            .await
            .unwrap();

        let job = db.get_job(created.job_id).await.unwrap().unwrap();
        assert_eq!(job.prompt, "earbuds");
    }

    #[tokio::test]
    async fn empty_prompt_is_rejected() {
        let (_db, dispatcher) = dispatcher().await;

        for prompt in ["", "   ", "\n\t"] {
            let err = dispatcher
                .create_job(prompt, "sess-1", None, None)
                .await
                .unwrap_err();
            assert!(matches!(
                err,
                Error::Job(JobError::InvalidInput(ref m)) if m.contains("prompt")
            ));
        }
    }

    #[tokio::test]
    async fn missing_session_is_rejected() {
        let (_db, dispatcher) = dispatcher().await;

        let err = dispatcher
            .create_job("earbuds", "  ", None, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Job(JobError::InvalidInput(ref m)) if m.contains("missing session")
        ));
    }

    #[tokio::test]
    async fn follow_up_reuses_the_thread() {
        let (db, dispatcher) = dispatcher().await;

        let first = dispatcher
            .create_job("find me earbuds", "sess-1", None, None)
            .await
            .unwrap();
        wait_for_terminal(&db, first.job_id).await;

        let second = dispatcher
            .create_job("cheaper ones", "sess-1", None, Some(first.thread_id))
            .await
            .unwrap();
        wait_for_terminal(&db, second.job_id).await;

        assert_eq!(second.thread_id, first.thread_id);
        assert_ne!(second.job_id, first.job_id);

        let messages = db.list_thread_messages(first.thread_id).await.unwrap();
        let user_lines: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == MessageRole::User)
            .map(|m| m.content.as_str())
            .collect();
        assert_eq!(user_lines, vec!["find me earbuds", "cheaper ones"]);
    }

    #[tokio::test]
    async fn unknown_thread_is_rejected() {
        let (_db, dispatcher) = dispatcher().await;

        let err = dispatcher
            .create_job("earbuds", "sess-1", None, Some(Uuid::new_v4()))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Job(JobError::InvalidInput(ref m)) if m.contains("unknown thread")
        ));
    }

    #[tokio::test]
    async fn foreign_thread_is_rejected() {
        let (db, dispatcher) = dispatcher().await;
        let other = db.create_thread("sess-other", None).await.unwrap();

        let err = dispatcher
            .create_job("earbuds", "sess-1", None, Some(other.id))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Job(JobError::InvalidInput(ref m)) if m.contains("another session")
        ));
    }
}
