//! Conversation state owned by the caller and lent to the agent for each task.

use uuid::Uuid;

use crate::llm::ChatMessage;
use crate::workspace::WorkspaceContext;

/// One user's conversation with the agent about one workspace.
#[derive(Debug, Clone)]
pub struct AgentSession {
    id: Uuid,
    history: Vec<ChatMessage>,
    manifest: Option<String>,
    file_count: usize,
    context_loaded: bool,
}

impl Default for AgentSession {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4(),
            history: Vec::new(),
            manifest: None,
            file_count: 0,
            context_loaded: false,
        }
    }
}

impl AgentSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Identifies the session in logs. A reset starts a new one.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Completed exchanges, oldest first.
    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    pub fn manifest(&self) -> Option<&str> {
        self.manifest.as_deref()
    }

    pub fn file_count(&self) -> usize {
        self.file_count
    }

    pub fn is_context_loaded(&self) -> bool {
        self.context_loaded
    }

    /// Install the workspace context built on the first task.
    pub fn set_context(&mut self, context: WorkspaceContext) {
        self.manifest = context.manifest;
        self.file_count = context.file_count;
        self.context_loaded = true;
    }

    /// Remember a finished task so later tasks can refer back to it.
    pub fn record_exchange(&mut self, task: &str, answer: &str) {
        self.history.push(ChatMessage::user(task));
        self.history.push(ChatMessage::assistant(answer));
    }

    /// Forget everything: history, manifest and the loaded flag.
    pub fn reset(&mut self) {
        tracing::info!(
            "Resetting agent session {} ({} messages)",
            self.id,
            self.history.len()
        );
        *self = Self::default();
    }
}
