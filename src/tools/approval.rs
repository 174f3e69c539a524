//! Human approval for shell commands.
//!
//! At most one approval may be outstanding. The executor registers a request and waits;
//! the presentation layer answers with a single boolean via [`ApprovalGate::resolve`].

use thiserror::Error;
use tokio::sync::{oneshot, Mutex};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ApprovalError {
    #[error("Another command is already awaiting approval: {0}")]
    AlreadyPending(String),
}

struct PendingApproval {
    command: String,
    tx: oneshot::Sender<bool>,
}

/// Single-slot approval rendezvous.
#[derive(Default)]
pub struct ApprovalGate {
    pending: Mutex<Option<PendingApproval>>,
}

impl ApprovalGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request for `command`. Fails if one is already waiting.
    pub async fn register(
        &self,
        command: &str,
    ) -> Result<oneshot::Receiver<bool>, ApprovalError> {
        let mut slot = self.pending.lock().await;
        if let Some(existing) = slot.as_ref() {
            // A receiver dropped without an answer frees the slot.
            if !existing.tx.is_closed() {
                return Err(ApprovalError::AlreadyPending(existing.command.clone()));
            }
        }
        let (tx, rx) = oneshot::channel();
        *slot = Some(PendingApproval {
            command: command.to_string(),
            tx,
        });
        Ok(rx)
    }

    /// Deliver the decision for the outstanding request.
    ///
    /// Returns `false` when nothing was waiting.
    pub async fn resolve(&self, approved: bool) -> bool {
        let Some(pending) = self.pending.lock().await.take() else {
            return false;
        };
        pending.tx.send(approved).is_ok()
    }

    /// Command currently waiting for a decision.
    pub async fn pending_command(&self) -> Option<String> {
        self.pending
            .lock()
            .await
            .as_ref()
            .filter(|p| !p.tx.is_closed())
            .map(|p| p.command.clone())
    }

    /// Register and wait. A gate dropped without an answer counts as denial.
    pub async fn request(&self, command: &str) -> Result<bool, ApprovalError> {
        let rx = self.register(command).await?;
        Ok(rx.await.unwrap_or(false))
    }
}
