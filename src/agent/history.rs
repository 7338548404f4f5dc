//! Model context reconstruction from stored thread messages.

use crate::llm::ChatMessage;
use crate::store::{MessageRole, StoredMessage};

/// Replay a thread into model context: `user`/`assistant` turns only,
/// windowed to the last `max_turns` exchanges. System rows are transient
/// progress narration and replaying them teaches the model to imitate
/// them, so they never make it back into context.
pub fn build_model_history(messages: &[StoredMessage], max_turns: usize) -> Vec<ChatMessage> {
    let replayable: Vec<&StoredMessage> = messages
        .iter()
        .filter(|m| matches!(m.role, MessageRole::User | MessageRole::Assistant))
        .collect();

    // Each turn is one user message plus one assistant reply.
    let keep = std::cmp::max(1, max_turns * 2);
    let start = replayable.len().saturating_sub(keep);

    replayable[start..]
        .iter()
        .map(|m| match m.role {
            MessageRole::User => ChatMessage::user(&m.content),
            _ => ChatMessage::assistant(&m.content),
        })
        .collect()
}
