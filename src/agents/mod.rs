//! Agent loop.
//!
//! One task runs as a bounded think-act-observe cycle:
//! - the model sees the system prompt, the live project status, prior exchanges and the task
//! - a reply carrying a tool call is executed and its result appended as an observation
//! - a reply without a tool call either stalls (question, manual steps, refusal) and gets
//!   a correction, or is the final answer
//!
//! Only a backend failure ends a task early. Tool failures come back as observations.

pub mod events;
mod prompt;
mod session;
mod stall;

pub use events::{emit, run_presenter, EventSender, ProgressEvent, StepStatus};
pub use prompt::{ActiveFile, STALL_CORRECTION};
pub use session::AgentSession;
pub use stall::{detect_stall, StallKind};

use std::sync::Arc;

use thiserror::Error;

use crate::config::Config;
use crate::llm::{ChatMessage, LlmError, ModelBackend};
use crate::parser::{parse_tool_call, InvocationError};
use crate::tools::{ApprovalGate, TerminalSink, ToolExecutor, ToolInvocation};
use crate::util::truncate_chars;
use crate::workspace::Workspace;

/// Characters of tool output carried in a progress event.
pub const PREVIEW_CHARS: usize = 500;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Model backend failed: {0}")]
    Backend(#[from] LlmError),
}

/// What a finished task produced.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub answer: String,
    /// Iterations used, 1-based
    pub iterations: usize,
    /// Corrective messages injected after stalls
    pub corrections: usize,
    /// `false` when the iteration ceiling was hit
    pub completed: bool,
    /// Completed tool steps, in order
    pub steps: Vec<ProgressEvent>,
}

/// Drives tasks against one workspace.
pub struct Agent {
    backend: Arc<dyn ModelBackend>,
    config: Config,
    workspace: Arc<Workspace>,
    executor: ToolExecutor,
    events: EventSender,
}

impl Agent {
    pub fn new(
        backend: Arc<dyn ModelBackend>,
        config: Config,
        workspace: Arc<Workspace>,
        approvals: Arc<ApprovalGate>,
        events: EventSender,
        terminal: Option<Arc<dyn TerminalSink>>,
    ) -> Self {
        let executor =
            ToolExecutor::for_workspace(&workspace, &config, approvals, events.clone(), terminal);
        Self {
            backend,
            config,
            workspace,
            executor,
            events,
        }
    }

    /// Build the manifest, graph and index the first time a session touches the workspace.
    async fn load_context(&self, session: &mut AgentSession) {
        emit(
            &self.events,
            ProgressEvent::new(
                "indexing_workspace",
                StepStatus::Running,
                "Building project context...",
            ),
        );
        let context = self.workspace.load().await;
        emit(
            &self.events,
            ProgressEvent::new(
                "indexing_workspace",
                StepStatus::Done,
                format!("Indexed {} files", context.file_count),
            ),
        );
        session.set_context(context);
    }

    /// Run one task to completion or to the iteration ceiling.
    ///
    /// # Errors
    ///
    /// `AgentError::Backend` when a model or embedding call fails.
    pub async fn run_task(
        &self,
        session: &mut AgentSession,
        task: &str,
        active_file: Option<&ActiveFile>,
    ) -> Result<TaskOutcome, AgentError> {
        tracing::info!("Session {}: starting task", session.id());
        if !session.is_context_loaded() {
            self.load_context(session).await;
        }

        let instructions = prompt::system_instructions(
            session.manifest(),
            session.file_count(),
            self.workspace.root(),
            active_file,
        );
        let mut messages = Vec::with_capacity(session.history().len() + 2);
        messages.push(ChatMessage::system(instructions));
        messages.extend(session.history().iter().cloned());
        messages.push(ChatMessage::user(task));

        let max_iterations = self.config.max_iterations;
        let mut steps = Vec::new();
        let mut corrections = 0;
        let mut last_reply = String::new();

        for iteration in 1..=max_iterations {
            tracing::debug!("Agent iteration {}/{}", iteration, max_iterations);

            let reply = self
                .backend
                .call(
                    &messages,
                    self.config.provider,
                    &self.config.provider_config,
                )
                .await
                .map_err(|e| {
                    tracing::error!("Model call failed at iteration {}: {}", iteration, e);
                    AgentError::Backend(e)
                })?;
            last_reply = reply.clone();

            let parsed = match parse_tool_call(&reply) {
                Ok(Some(invocation)) => Ok(invocation),
                Err(e) => Err(e),
                Ok(None) => {
                    if let Some(kind) = detect_stall(&reply) {
                        tracing::warn!("Stalling detected ({:?}), forcing tool usage", kind);
                        messages.push(ChatMessage::assistant(reply));
                        messages.push(ChatMessage::user(STALL_CORRECTION));
                        corrections += 1;
                        continue;
                    }
                    tracing::info!("Agent finished with text response at iteration {}", iteration);
                    session.record_exchange(task, &reply);
                    return Ok(TaskOutcome {
                        answer: reply,
                        iterations: iteration,
                        corrections,
                        completed: true,
                        steps,
                    });
                }
            };

            messages.push(ChatMessage::assistant(reply));
            let (tool, result) = self.dispatch(parsed, iteration, &mut steps).await?;
            let truncated = prompt::truncate_observation(&result, self.config.tool_output_limit);
            messages.push(ChatMessage::user(prompt::observation(&tool, &truncated)));
        }

        tracing::warn!(
            "Max iterations ({}) reached without a final answer",
            max_iterations
        );
        session.record_exchange(task, &last_reply);
        Ok(TaskOutcome {
            answer: last_reply,
            iterations: max_iterations,
            corrections,
            completed: false,
            steps,
        })
    }

    /// Execute one parsed reply and publish its progress. Returns the tool name and result.
    async fn dispatch(
        &self,
        parsed: Result<ToolInvocation, InvocationError>,
        iteration: usize,
        steps: &mut Vec<ProgressEvent>,
    ) -> Result<(String, String), AgentError> {
        let (tool, summary, result) = match parsed {
            Ok(invocation) => {
                let tool = invocation.name().to_string();
                let summary = invocation.summary();
                emit(
                    &self.events,
                    ProgressEvent::new(&tool, StepStatus::Running, &summary)
                        .with_iteration(iteration),
                );
                let result = self.executor.execute(&invocation).await?;
                (tool, summary, result)
            }
            Err(e) => {
                tracing::debug!("Rejected tool call: {}", e);
                let tool = e.tool_name().to_string();
                let result = format!("Tool error ({}): {}", tool, e);
                (tool, "Invalid tool call".to_string(), result)
            }
        };

        let done = ProgressEvent::new(&tool, StepStatus::Done, summary)
            .with_iteration(iteration)
            .with_preview(truncate_chars(&result, PREVIEW_CHARS));
        steps.push(done.clone());
        emit(&self.events, done);
        Ok((tool, result))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::llm::{Provider, ProviderConfig, Role};

    /// Replays canned replies and records every request.
    struct ScriptedBackend {
        replies: Mutex<VecDeque<Result<String, LlmError>>>,
        requests: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl ScriptedBackend {
        fn new(replies: Vec<Result<String, LlmError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn ok(replies: &[&str]) -> Arc<Self> {
            Self::new(replies.iter().map(|r| Ok(r.to_string())).collect())
        }
    }

    #[async_trait]
    impl ModelBackend for ScriptedBackend {
        async fn call(
            &self,
            messages: &[ChatMessage],
            _provider: Provider,
            _config: &ProviderConfig,
        ) -> Result<String, LlmError> {
            self.requests.lock().unwrap().push(messages.to_vec());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok("Nothing left to do.".to_string()))
        }
    }

    fn agent(root: &std::path::Path, backend: Arc<ScriptedBackend>) -> (Agent, tokio::sync::broadcast::Receiver<ProgressEvent>) {
        let mut config = Config::new(root.to_path_buf());
        config.max_iterations = 4;
        config.tool_output_limit = 40;
        let workspace = Arc::new(Workspace::new(root, None));
        let (events, rx) = events::channel();
        let agent = Agent::new(
            backend,
            config,
            workspace,
            Arc::new(ApprovalGate::new()),
            events,
            None,
        );
        (agent, rx)
    }

    #[tokio::test]
    async fn tool_call_then_answer() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("a.ts"), "const a = 1;\n").await.unwrap();
        let backend = ScriptedBackend::ok(&[
            r#"<THOUGHT>look first</THOUGHT> {"tool":"read_file","path":"a.ts"}"#,
            "The constant a is 1.",
        ]);
        let (agent, mut rx) = agent(dir.path(), Arc::clone(&backend));
        let mut session = AgentSession::new();

        let outcome = agent.run_task(&mut session, "what is a", None).await.unwrap();
        assert!(outcome.completed);
        assert_eq!(outcome.iterations, 2);
        assert_eq!(outcome.answer, "The constant a is 1.");
        assert_eq!(outcome.steps.len(), 1);
        assert_eq!(outcome.steps[0].tool, "read_file");

        let requests = backend.requests.lock().unwrap();
        let observation = &requests[1].last().unwrap().content;
        assert!(observation.starts_with("[Tool Result: read_file]\n   1| const a = 1;"));

        assert_eq!(rx.recv().await.unwrap().tool, "indexing_workspace");
        assert_eq!(rx.recv().await.unwrap().summary, "Indexed 1 files");
        let running = rx.recv().await.unwrap();
        assert_eq!(running.status, StepStatus::Running);
        assert_eq!(running.iteration, Some(1));
        assert_eq!(rx.recv().await.unwrap().status, StepStatus::Done);

        assert_eq!(session.history().len(), 2);
    }

    #[tokio::test]
    async fn history_carries_into_the_next_task() {
        let dir = tempfile::tempdir().unwrap();
        let backend = ScriptedBackend::ok(&["First answer.", "Second answer."]);
        let (agent, _rx) = agent(dir.path(), Arc::clone(&backend));
        let mut session = AgentSession::new();

        agent.run_task(&mut session, "one", None).await.unwrap();
        agent.run_task(&mut session, "two", None).await.unwrap();

        let requests = backend.requests.lock().unwrap();
        let second: Vec<(Role, &str)> = requests[1]
            .iter()
            .map(|m| (m.role, m.content.as_str()))
            .skip(1)
            .collect();
        assert_eq!(
            second,
            vec![
                (Role::User, "one"),
                (Role::Assistant, "First answer."),
                (Role::User, "two"),
            ]
        );
        assert!(requests[0][0].content.contains("Project not indexed yet"));
    }

    #[tokio::test]
    async fn invalid_tool_call_is_fed_back() {
        let dir = tempfile::tempdir().unwrap();
        let backend = ScriptedBackend::ok(&[r#"{"tool":"teleport"}"#, "Gave up cleanly."]);
        let (agent, _rx) = agent(dir.path(), Arc::clone(&backend));

        let outcome = agent
            .run_task(&mut AgentSession::new(), "go", None)
            .await
            .unwrap();
        assert_eq!(outcome.steps[0].tool, "teleport");

        let requests = backend.requests.lock().unwrap();
        let observation = &requests[1].last().unwrap().content;
        assert!(observation.contains("Tool error (teleport): Unknown tool"));
    }

    #[tokio::test]
    async fn observations_are_truncated() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("big.txt"), "y".repeat(200)).await.unwrap();
        let backend = ScriptedBackend::ok(&[r#"{"tool":"read_file","path":"big.txt"}"#, "Read it."]);
        let (agent, _rx) = agent(dir.path(), Arc::clone(&backend));
        agent
            .run_task(&mut AgentSession::new(), "read", None)
            .await
            .unwrap();

        let requests = backend.requests.lock().unwrap();
        let observation = &requests[1].last().unwrap().content;
        assert!(observation.contains("... (truncated, 206 chars total)"), "{}", observation);
    }

    #[tokio::test]
    async fn ceiling_returns_last_reply() {
        let dir = tempfile::tempdir().unwrap();
        let call = r#"{"tool":"list_directory"}"#;
        let backend = ScriptedBackend::ok(&[call, call, call, call, call]);
        let (agent, _rx) = agent(dir.path(), backend);

        let outcome = agent
            .run_task(&mut AgentSession::new(), "loop", None)
            .await
            .unwrap();
        assert!(!outcome.completed);
        assert_eq!(outcome.iterations, 4);
        assert_eq!(outcome.answer, call);
        assert_eq!(outcome.steps.len(), 4);
    }

    #[tokio::test]
    async fn backend_failure_ends_the_task() {
        let dir = tempfile::tempdir().unwrap();
        let backend = ScriptedBackend::new(vec![Err(LlmError::network_error(
            "ollama",
            "connection refused",
        ))]);
        let (agent, _rx) = agent(dir.path(), backend);
        let mut session = AgentSession::new();

        let err = agent.run_task(&mut session, "x", None).await.unwrap_err();
        assert!(matches!(err, AgentError::Backend(_)));
        assert!(session.history().is_empty());
    }
}
