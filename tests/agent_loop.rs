//! End-to-end agent runs against a temporary workspace with a scripted model.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use workbench::agents::{self, STALL_CORRECTION};
use workbench::llm::{ChatMessage, LlmError, ModelBackend, Provider, ProviderConfig, Role};
use workbench::tools::ApprovalGate;
use workbench::{Agent, AgentSession, Config, Workspace};

struct ScriptedBackend {
    replies: Mutex<VecDeque<String>>,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedBackend {
    fn new(replies: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn last_request(&self) -> Vec<ChatMessage> {
        self.requests.lock().unwrap().last().cloned().unwrap()
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
        Ok(self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| "Finished.".to_string()))
    }
}

fn agent_for(root: &Path, backend: Arc<ScriptedBackend>) -> Agent {
    let config = Config::new(root.to_path_buf());
    let workspace = Arc::new(Workspace::new(root, None));
    let (events, _rx) = agents::events::channel();
    Agent::new(
        backend,
        config,
        workspace,
        Arc::new(ApprovalGate::new()),
        events,
        None,
    )
}

#[tokio::test]
async fn stall_gets_one_correction_then_terminates() {
    let dir = tempfile::tempdir().unwrap();
    let backend = ScriptedBackend::new(&[
        "Could you paste the contents of App.tsx so I can help?",
        "All requested changes are in place.",
    ]);
    let agent = agent_for(dir.path(), Arc::clone(&backend));

    let outcome = agent
        .run_task(&mut AgentSession::new(), "make the header blue", None)
        .await
        .unwrap();

    assert!(outcome.completed);
    assert_eq!(outcome.iterations, 2);
    assert_eq!(outcome.corrections, 1);
    assert_eq!(outcome.answer, "All requested changes are in place.");

    let corrections = backend
        .last_request()
        .iter()
        .filter(|m| m.role == Role::User && m.content == STALL_CORRECTION)
        .count();
    assert_eq!(corrections, 1);
}

#[tokio::test]
async fn failed_diff_leaves_file_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let original = "export const x = 1;\n";
    tokio::fs::write(dir.path().join("x.ts"), original).await.unwrap();

    let call = r#"{"tool":"apply_diffs","changes":[{"path":"x.ts","diff":"<<<< SEARCH\nconst y = 2;\n====\nconst y = 3;\n>>>> REPLACE"}]}"#;
    let backend = ScriptedBackend::new(&[call, "The search text was not present; nothing changed."]);
    let agent = agent_for(dir.path(), Arc::clone(&backend));

    let outcome = agent
        .run_task(&mut AgentSession::new(), "bump y", None)
        .await
        .unwrap();
    assert_eq!(outcome.steps.len(), 1);

    let observation = backend.last_request().last().unwrap().content.clone();
    assert!(observation.starts_with("[Tool Result: apply_diffs]\nTool error (apply_diffs): Diff transaction failed"));
    assert_eq!(
        tokio::fs::read_to_string(dir.path().join("x.ts")).await.unwrap(),
        original
    );
}

#[tokio::test]
async fn diff_then_blast_radius_through_the_loop() {
    let dir = tempfile::tempdir().unwrap();
    tokio::fs::write(dir.path().join("b.ts"), "export const b = 1;\n").await.unwrap();
    tokio::fs::write(dir.path().join("a.ts"), "import { b } from './b.ts';\nconsole.log(b);\n")
        .await
        .unwrap();

    let backend = ScriptedBackend::new(&[
        r#"{"tool":"get_blast_radius","path":"b.ts","depth":1}"#,
        r#"{"tool":"apply_diffs","changes":[{"path":"b.ts","diff":"<<<< SEARCH\nb = 1\n====\nb = 2\n>>>> REPLACE"}]}"#,
        "Changed b to 2; a.ts is the only dependent.",
    ]);
    let agent = agent_for(dir.path(), Arc::clone(&backend));
    let mut session = AgentSession::new();

    let outcome = agent.run_task(&mut session, "set b to 2", None).await.unwrap();
    assert!(outcome.completed);
    assert_eq!(outcome.iterations, 3);

    let radius = outcome.steps[0].preview.clone().unwrap();
    assert_eq!(radius, "Files affected by changing b.ts:\n- a.ts");
    assert_eq!(
        outcome.steps[1].preview.as_deref(),
        Some("Successfully applied diffs to 1 files.")
    );
    assert_eq!(
        tokio::fs::read_to_string(dir.path().join("b.ts")).await.unwrap(),
        "export const b = 2;\n"
    );

    let system = &backend.last_request()[0].content;
    assert!(system.contains("Project Indexed. Files found: 2"));
}
