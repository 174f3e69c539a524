//! Progress events published while a task runs.
//!
//! Events go out on a broadcast channel. Nobody listening is fine: sends that find no
//! receiver are dropped.

use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};

use crate::tools::ApprovalGate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Running,
    AwaitingPermission,
    Done,
}

/// One step of agent progress.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub tool: String,
    pub status: StepStatus,
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iteration: Option<usize>,
}

impl ProgressEvent {
    pub fn new(tool: impl Into<String>, status: StepStatus, summary: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            status,
            summary: summary.into(),
            preview: None,
            iteration: None,
        }
    }

    pub fn with_preview(mut self, preview: impl Into<String>) -> Self {
        self.preview = Some(preview.into());
        self
    }

    pub fn with_iteration(mut self, iteration: usize) -> Self {
        self.iteration = Some(iteration);
        self
    }
}

pub type EventSender = broadcast::Sender<ProgressEvent>;

/// Capacity used for the engine's progress channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

pub fn channel() -> (EventSender, broadcast::Receiver<ProgressEvent>) {
    broadcast::channel(EVENT_CHANNEL_CAPACITY)
}

/// Publish `event`, ignoring the no-subscriber case.
pub fn emit(events: &EventSender, event: ProgressEvent) {
    tracing::trace!(tool = %event.tool, status = ?event.status, "{}", event.summary);
    let _ = events.send(event);
}

/// Drain progress events until the channel closes, asking `decide` about each command
/// waiting for approval.
///
/// Prompts are driven by the gate rather than by the event: a lagged receiver may have
/// lost the `awaiting_permission` event, so after a lag the gate is checked directly.
pub async fn run_presenter<R, D, Fut>(
    mut rx: broadcast::Receiver<ProgressEvent>,
    approvals: Arc<ApprovalGate>,
    mut render: R,
    mut decide: D,
) where
    R: FnMut(&ProgressEvent),
    D: FnMut(String) -> Fut,
    Fut: Future<Output = bool>,
{
    loop {
        let check_gate = match rx.recv().await {
            Ok(event) => {
                render(&event);
                event.status == StepStatus::AwaitingPermission
            }
            Err(RecvError::Lagged(n)) => {
                tracing::warn!("Presenter lagged, {} progress events skipped", n);
                true
            }
            Err(RecvError::Closed) => break,
        };
        if !check_gate {
            continue;
        }
        if let Some(command) = approvals.pending_command().await {
            let approved = decide(command).await;
            approvals.resolve(approved).await;
        }
    }
}
