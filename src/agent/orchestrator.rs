//! The agent orchestrator: drives one job from `queued` to a terminal
//! state through the model/tool loop.
//!
//! One run per job. The dispatcher schedules a run exactly once at job
//! creation, so the orchestrator never defends against concurrent claims
//! of the same job; a transition conflict is a loud bug, not a retry.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::agent::history::build_model_history;
use crate::agent::sanitize::strip_markdown;
use crate::config::{DEFAULT_SYSTEM_PROMPT, EngineConfig};
use crate::error::{Error, JobError};
use crate::llm::{ChatMessage, LlmProvider, ToolCallRequest, ToolSchema};
use crate::notify::Notifier;
use crate::store::{Database, Job, MessageRole};
use crate::tools::toolbox::error_payload;
use crate::tools::{ToolInvocation, Toolbox, tool_schemas};

/// Progress line shown as soon as a job starts running.
const ANALYZING_MESSAGE: &str = "Analyzing your request…";

/// Reply used when the model ends a run without producing final text,
/// either by protocol violation or by burning the whole iteration budget
/// on tool calls.
pub const FALLBACK_REPLY: &str = "Here are a few good options I found.";

/// What a successful run hands back for logging and notification.
struct RunSummary {
    intent: Option<String>,
    result_item_ids: Vec<Uuid>,
}

pub struct Orchestrator {
    db: Arc<dyn Database>,
    llm: Arc<dyn LlmProvider>,
    toolbox: Arc<Toolbox>,
    notifier: Arc<Notifier>,
    config: EngineConfig,
    schemas: Vec<ToolSchema>,
}

impl Orchestrator {
    pub fn new(
        db: Arc<dyn Database>,
        llm: Arc<dyn LlmProvider>,
        toolbox: Arc<Toolbox>,
        notifier: Arc<Notifier>,
        config: EngineConfig,
    ) -> Self {
        Self {
            db,
            llm,
            toolbox,
            notifier,
            config,
            schemas: tool_schemas(),
        }
    }

    /// Run one job to a terminal state. Infallible by design: every error
    /// lands in `failed` plus a user-visible apology, or in a log line
    /// when even that much is impossible.
    pub async fn run(&self, job_id: Uuid) {
        // Claim the job before anything can go wrong, so every later
        // failure is a legal running -> failed transition.
        let job = match self.db.mark_job_running(job_id, Utc::now()).await {
            Ok(job) => job,
            Err(e) => {
                error!(%job_id, "Could not claim job: {e}");
                return;
            }
        };

        let Some(thread_id) = job.thread_id else {
            // Without a thread there is nowhere to apologize; record the
            // failure on the job alone.
            let err = Error::from(JobError::MissingThread { id: job_id });
            warn!(%job_id, "{err}");
            if let Err(e) = self
                .db
                .mark_job_failed(job_id, Utc::now(), &err.to_string())
                .await
            {
                error!(%job_id, "Could not mark job failed: {e}");
            }
            return;
        };

        let outcome = match tokio::time::timeout(
            self.config.job_deadline,
            self.drive(&job, thread_id),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(JobError::DeadlineExceeded {
                id: job_id,
                deadline: self.config.job_deadline,
            }
            .into()),
        };

        match outcome {
            Ok(summary) => {
                info!(
                    %job_id,
                    items = summary.result_item_ids.len(),
                    intent = summary.intent.as_deref().unwrap_or(""),
                    "Job completed"
                );
                // Fire-and-forget: notification failures stay inside the
                // notifier and can never touch the completed job.
                let notifier = Arc::clone(&self.notifier);
                let session_id = job.session_id.clone();
                let query = summary.intent.unwrap_or_else(|| job.prompt.clone());
                tokio::spawn(async move {
                    notifier
                        .notify_results_ready(&session_id, job_id, &query)
                        .await;
                });
            }
            Err(e) => self.fail(&job, thread_id, &e).await,
        }
    }

    /// Everything between claiming the job and its terminal write. Any
    /// error out of here puts the job on the failure path.
    async fn drive(&self, job: &Job, thread_id: Uuid) -> Result<RunSummary, Error> {
        self.db
            .append_message(
                job.id,
                thread_id,
                MessageRole::System,
                ANALYZING_MESSAGE,
                Utc::now(),
            )
            .await?;

        let thread_messages = self.db.list_thread_messages(thread_id).await?;
        let mut context: Vec<ChatMessage> = Vec::with_capacity(thread_messages.len() + 1);
        context.push(ChatMessage::system(DEFAULT_SYSTEM_PROMPT));
        // The dispatcher appended the prompt before scheduling this run,
        // so it arrives as the final user turn of the replay window.
        context.extend(build_model_history(
            &thread_messages,
            self.config.history_turns,
        ));

        let mut intent: Option<String> = None;
        let mut result_item_ids: Vec<Uuid> = Vec::new();
        let mut final_reply: Option<String> = None;

        for iteration in 0..self.config.max_tool_iterations {
            let response = self.llm.complete_with_tools(&context, &self.schemas).await?;

            if !response.tool_calls.is_empty() {
                debug!(
                    job_id = %job.id,
                    iteration,
                    calls = response.tool_calls.len(),
                    "Model requested tool calls"
                );
                context.push(ChatMessage::assistant_tool_calls(
                    response.tool_calls.clone(),
                ));

                // Calls run sequentially in the order the model gave them,
                // so progress messages and result accumulation stay
                // deterministic.
                for call in &response.tool_calls {
                    let result = self
                        .run_tool_call(job, thread_id, call, &mut intent, &mut result_item_ids)
                        .await?;
                    context.push(ChatMessage::tool_result(&call.id, result));
                }
                continue;
            }

            match response.content.filter(|c| !c.trim().is_empty()) {
                Some(content) => {
                    final_reply = Some(strip_markdown(&content));
                }
                None => {
                    // Neither text nor tool calls. Answer with something
                    // rather than keep looping on a confused model.
                    warn!(
                        job_id = %job.id,
                        iteration,
                        "Model returned neither content nor tool calls"
                    );
                    final_reply = Some(FALLBACK_REPLY.to_string());
                }
            }
            break;
        }

        // A run that burned its whole iteration budget on tool calls still
        // completes: partial results beat a hard error here.
        if final_reply.is_none() {
            info!(
                job_id = %job.id,
                items = result_item_ids.len(),
                "Iteration cap reached, completing with gathered results"
            );
        }
        let reply = final_reply.unwrap_or_else(|| FALLBACK_REPLY.to_string());
        self.db
            .append_message(job.id, thread_id, MessageRole::Assistant, &reply, Utc::now())
            .await?;

        self.db
            .mark_job_completed(job.id, Utc::now(), intent.as_deref(), &result_item_ids)
            .await?;

        Ok(RunSummary {
            intent,
            result_item_ids,
        })
    }

    /// One tool call: decode, narrate, execute, accumulate. Returns the
    /// payload string that goes back to the model as the tool turn.
    async fn run_tool_call(
        &self,
        job: &Job,
        thread_id: Uuid,
        call: &ToolCallRequest,
        intent: &mut Option<String>,
        result_item_ids: &mut Vec<Uuid>,
    ) -> Result<String, Error> {
        let invocation = match ToolInvocation::parse(&call.name, call.arguments.clone()) {
            Ok(invocation) => invocation,
            Err(e) => {
                // A bad call goes back to the model as a tool error so it
                // can correct itself on the next turn.
                warn!(job_id = %job.id, tool = %call.name, "Rejected tool call: {e}");
                return Ok(error_payload(&e).to_string());
            }
        };

        self.db
            .append_message(
                job.id,
                thread_id,
                MessageRole::System,
                &invocation.progress_label(),
                Utc::now(),
            )
            .await?;

        // The first search of a run names what the user was after.
        if intent.is_none() {
            if let Some(query) = invocation.search_query() {
                *intent = Some(query.to_string());
            }
        }

        let outcome = self.toolbox.execute(&invocation).await;
        for id in &outcome.item_ids {
            if !result_item_ids.contains(id) {
                result_item_ids.push(*id);
            }
        }
        Ok(outcome.payload.to_string())
    }

    /// The only path to `failed`: apologize in the thread, then record
    /// the error on the job.
    async fn fail(&self, job: &Job, thread_id: Uuid, error: &Error) {
        let message = error.to_string();
        warn!(job_id = %job.id, "Job failed: {message}");

        let apology = format!("Sorry — I couldn't complete that request.\n\nError: {message}");
        if let Err(e) = self
            .db
            .append_message(
                job.id,
                thread_id,
                MessageRole::Assistant,
                &apology,
                Utc::now(),
            )
            .await
        {
            error!(job_id = %job.id, "Could not append apology: {e}");
        }
        if let Err(e) = self.db.mark_job_failed(job.id, Utc::now(), &message).await {
            error!(job_id = %job.id, "Could not mark job failed: {e}");
        }
    }
}
