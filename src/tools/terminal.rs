//! Shell command execution with human approval.
//!
//! Commands run in the workspace root under `/bin/sh -c`. Every command must be
//! approved through the [`ApprovalGate`](super::ApprovalGate) before it is spawned;
//! a few patterns are refused outright without asking.

use std::process::Stdio;

use tokio::process::Command;

use super::{ToolContext, ToolError};
use crate::agents::events::{emit, ProgressEvent, StepStatus};

/// Output captured per stream before the rest is discarded.
pub const MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

/// Where approved commands and their output are echoed for the user.
pub trait TerminalSink: Send + Sync {
    fn echo(&self, text: &str);
}

/// Echo to the process's stderr.
pub struct StderrTerminal;

impl TerminalSink for StderrTerminal {
    fn echo(&self, text: &str) {
        eprintln!("{}", text);
    }
}

/// Sanitize command output to be safe for LLM consumption.
/// Removes binary garbage while preserving valid text.
fn sanitize_output(bytes: &[u8]) -> String {
    let bytes = &bytes[..bytes.len().min(MAX_OUTPUT_BYTES)];
    let non_printable_count = bytes
        .iter()
        .filter(|&&b| b < 0x20 && b != b'\n' && b != b'\r' && b != b'\t')
        .count();

    // More than 10% control bytes: treat as binary
    if bytes.len() > 100 && non_printable_count > bytes.len() / 10 {
        return format!(
            "[Binary output detected - {} bytes, {}% non-printable.]",
            bytes.len(),
            non_printable_count * 100 / bytes.len()
        );
    }

    String::from_utf8_lossy(bytes)
        .chars()
        .filter(|&c| c == '\n' || c == '\r' || c == '\t' || (c >= ' ' && c != '\u{FFFD}'))
        .collect()
}

/// Patterns refused before approval is even requested.
const DANGEROUS_PATTERNS: &[(&str, &str)] = &[
    ("rm -rf /", "This would destroy the entire system"),
    ("rm -rf /*", "This would destroy the entire system"),
    ("rm -rf ~", "This would delete the home directory"),
    ("find /", "Use a path inside the workspace"),
    ("grep -r /", "Use a path inside the workspace"),
    ("grep -R /", "Use a path inside the workspace"),
    ("ls -laR /", "Use a specific directory path instead of root"),
    ("> /dev/", "Writing to device files is blocked"),
    ("dd if=/dev/", "Direct disk operations are blocked"),
    ("mkfs", "Formatting filesystems is blocked"),
    (":(){", "Fork bombs are blocked"),
];

const COMMAND_PREFIXES: &[&str] = &["sudo ", "time ", "nice ", "nohup "];

fn validate_command(cmd: &str) -> Result<(), String> {
    let trimmed = cmd.trim();
    let unprefixed = COMMAND_PREFIXES
        .iter()
        .find_map(|p| trimmed.strip_prefix(p))
        .unwrap_or(trimmed)
        .trim_start();

    for (pattern, suggestion) in DANGEROUS_PATTERNS {
        if trimmed.starts_with(pattern) || unprefixed.starts_with(pattern) {
            return Err(format!(
                "Blocked dangerous command pattern '{}'. {}",
                pattern, suggestion
            ));
        }
    }
    Ok(())
}

fn combine_output(stdout: &str, stderr: &str) -> String {
    let mut combined = stdout.to_string();
    if !stderr.trim().is_empty() {
        combined.push_str("\nSTDERR: ");
        combined.push_str(stderr);
    }
    combined.trim().to_string()
}

/// Outcome of a finished shell process.
pub(crate) struct ShellOutput {
    pub success: bool,
    pub exit_code: Option<i32>,
    /// stdout and stderr, combined
    pub text: String,
}

/// Run `command` in the workspace with the context's timeout. No approval is asked.
pub(crate) async fn run_shell(ctx: &ToolContext, command: &str) -> Result<ShellOutput, ToolError> {
    let child = Command::new("/bin/sh")
        .arg("-c")
        .arg(command)
        .current_dir(&ctx.root)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();

    let output = match tokio::time::timeout(ctx.command_timeout, child).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            tracing::error!("Command execution failed: {}", e);
            return Err(ToolError::io("execute", command, e));
        }
        Err(_) => {
            tracing::warn!(
                "Command timed out after {} seconds: {}",
                ctx.command_timeout.as_secs(),
                command
            );
            return Err(ToolError::Validation(format!(
                "Command exited with error:\nTimed out after {} seconds",
                ctx.command_timeout.as_secs()
            )));
        }
    };

    let stdout = sanitize_output(&output.stdout);
    let stderr = sanitize_output(&output.stderr);
    tracing::debug!(
        "Command completed: exit={:?}, stdout_len={}, stderr_len={}",
        output.status.code(),
        stdout.len(),
        stderr.len()
    );

    Ok(ShellOutput {
        success: output.status.success(),
        exit_code: output.status.code(),
        text: combine_output(&stdout, &stderr),
    })
}

/// Ask for approval, then run the command and echo it to the terminal sink.
pub async fn run_command(ctx: &ToolContext, command: &str) -> Result<String, ToolError> {
    if let Err(msg) = validate_command(command) {
        tracing::warn!("Blocked dangerous command: {}", command);
        return Err(ToolError::Validation(msg));
    }

    // Register before announcing so an immediate answer cannot be lost.
    let decision = ctx.approvals.register(command).await?;
    emit(
        &ctx.events,
        ProgressEvent::new(
            "run_command",
            StepStatus::AwaitingPermission,
            format!("Execute: {}", command),
        ),
    );
    if !decision.await.unwrap_or(false) {
        tracing::info!("Command denied: {}", command);
        return Ok("Command denied by user.".to_string());
    }

    emit(
        &ctx.events,
        ProgressEvent::new(
            "run_command",
            StepStatus::Running,
            format!("Executing: {}", command),
        ),
    );
    tracing::info!("Executing command in {}: {}", ctx.root.display(), command);
    if let Some(terminal) = &ctx.terminal {
        terminal.echo(&format!("# Executing agent command: {}", command));
    }

    let output = run_shell(ctx, command).await?;
    let rendered = if output.success {
        if output.text.is_empty() {
            "(command completed with no output)".to_string()
        } else {
            output.text
        }
    } else {
        let code = output
            .exit_code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string());
        format!("Command exited with error:\nexit code {}\n{}", code, output.text)
    };

    if let Some(terminal) = &ctx.terminal {
        terminal.echo(&rendered);
    }
    Ok(rendered)
}
