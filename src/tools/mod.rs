//! Tool system for the agent.
//!
//! Tools are the agent's hands: every capability the model can invoke is one variant of
//! [`ToolInvocation`], validated at the parse boundary, and dispatched by
//! [`ToolExecutor`].
//!
//! ## Workspace-First Design
//!
//! Paths resolve **relative to the workspace** by default:
//! - Relative paths (e.g., `src/app.ts`) join the workspace root
//! - Absolute paths (e.g., `/etc/hosts`) are used as-is
//!
//! ## Failure model
//!
//! Tool failures never escape the executor as errors. They come back as observation
//! text so the model can correct itself. The one exception is a backend (embedding)
//! failure, which ends the task.

mod approval;
mod directory;
mod file_ops;
mod project;
mod search;
mod terminal;

pub use approval::{ApprovalError, ApprovalGate};
pub use terminal::{StderrTerminal, TerminalSink};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::agents::events::EventSender;
use crate::config::{Config, ProjectCommands};
use crate::diff::TransactionFailure;
use crate::graph::SharedGraph;
use crate::index::{IndexError, SemanticIndex};
use crate::llm::LlmError;
use crate::util::normalize_path;
use crate::workspace::Workspace;

/// Resolve a path relative to the workspace.
///
/// - Relative paths are joined with `workspace`
/// - Absolute paths are used as-is
///
/// The result is lexically normalised so it can be compared with graph and index keys.
pub fn resolve_path(path_str: &str, workspace: &Path) -> PathBuf {
    let path = Path::new(path_str);
    if path.is_absolute() {
        normalize_path(path)
    } else {
        normalize_path(&workspace.join(path))
    }
}

/// Every tool the model may call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolKind {
    SemanticSearch,
    ApplyDiffs,
    ValidateProject,
    RunTests,
    GetBlastRadius,
    ReadFile,
    ReplaceLines,
    InsertCode,
    WriteFile,
    EditFile,
    ListDirectory,
    SearchFiles,
    CreateDirectory,
    DeleteFile,
    RunCommand,
}

impl ToolKind {
    pub const ALL: [ToolKind; 15] = [
        ToolKind::SemanticSearch,
        ToolKind::ApplyDiffs,
        ToolKind::ValidateProject,
        ToolKind::RunTests,
        ToolKind::GetBlastRadius,
        ToolKind::ReadFile,
        ToolKind::ReplaceLines,
        ToolKind::InsertCode,
        ToolKind::WriteFile,
        ToolKind::EditFile,
        ToolKind::ListDirectory,
        ToolKind::SearchFiles,
        ToolKind::CreateDirectory,
        ToolKind::DeleteFile,
        ToolKind::RunCommand,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ToolKind::SemanticSearch => "semantic_search",
            ToolKind::ApplyDiffs => "apply_diffs",
            ToolKind::ValidateProject => "validate_project",
            ToolKind::RunTests => "run_tests",
            ToolKind::GetBlastRadius => "get_blast_radius",
            ToolKind::ReadFile => "read_file",
            ToolKind::ReplaceLines => "replace_lines",
            ToolKind::InsertCode => "insert_code",
            ToolKind::WriteFile => "write_file",
            ToolKind::EditFile => "edit_file",
            ToolKind::ListDirectory => "list_directory",
            ToolKind::SearchFiles => "search_files",
            ToolKind::CreateDirectory => "create_directory",
            ToolKind::DeleteFile => "delete_file",
            ToolKind::RunCommand => "run_command",
        }
    }

    pub fn names() -> Vec<&'static str> {
        Self::ALL.iter().map(|k| k.name()).collect()
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.name() == name)
    }

    /// Example call shown to the model.
    pub fn usage(&self) -> &'static str {
        match self {
            ToolKind::SemanticSearch => r#"{"tool": "semantic_search", "query": "where is auth handled", "limit": 5}"#,
            ToolKind::ApplyDiffs => r#"{"tool": "apply_diffs", "changes": [{"path": "src/a.ts", "diff": "<<<< SEARCH\nold\n====\nnew\n>>>> REPLACE"}]}"#,
            ToolKind::ValidateProject => r#"{"tool": "validate_project"}"#,
            ToolKind::RunTests => r#"{"tool": "run_tests"}"#,
            ToolKind::GetBlastRadius => r#"{"tool": "get_blast_radius", "path": "src/a.ts", "depth": 3}"#,
            ToolKind::ReadFile => r#"{"tool": "read_file", "path": "src/a.ts"}"#,
            ToolKind::ReplaceLines => r#"{"tool": "replace_lines", "path": "src/a.ts", "start_line": 3, "end_line": 5, "content": "..."}"#,
            ToolKind::InsertCode => r#"{"tool": "insert_code", "path": "src/a.ts", "line": 10, "content": "..."}"#,
            ToolKind::WriteFile => r#"{"tool": "write_file", "path": "src/a.ts", "content": "..."}"#,
            ToolKind::EditFile => r#"{"tool": "edit_file", "path": "src/a.ts", "edits": [{"search": "old", "replace": "new"}]}"#,
            ToolKind::ListDirectory => r#"{"tool": "list_directory", "path": "src"}"#,
            ToolKind::SearchFiles => r#"{"tool": "search_files", "pattern": "useState", "include": "*.tsx"}"#,
            ToolKind::CreateDirectory => r#"{"tool": "create_directory", "path": "src/new"}"#,
            ToolKind::DeleteFile => r#"{"tool": "delete_file", "path": "src/old.ts"}"#,
            ToolKind::RunCommand => r#"{"tool": "run_command", "command": "npm run build"}"#,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ToolKind::SemanticSearch => "Find code by meaning across the indexed workspace.",
            ToolKind::ApplyDiffs => "Apply SEARCH/REPLACE blocks to one or more files atomically. Preferred way to edit.",
            ToolKind::ValidateProject => "Type-check the project. Run after every change.",
            ToolKind::RunTests => "Run the project's test suite.",
            ToolKind::GetBlastRadius => "List files that depend on a file, transitively.",
            ToolKind::ReadFile => "Read a file with line numbers. Optional start_line/end_line.",
            ToolKind::ReplaceLines => "Replace an inclusive 1-based line range.",
            ToolKind::InsertCode => "Insert content after a 1-based line (0 = top of file).",
            ToolKind::WriteFile => "Create or overwrite a file.",
            ToolKind::EditFile => "Exact search/replace edits in one file.",
            ToolKind::ListDirectory => "List one directory level with types and sizes.",
            ToolKind::SearchFiles => "Case-insensitive regex search over file contents.",
            ToolKind::CreateDirectory => "Create a directory and its parents.",
            ToolKind::DeleteFile => "Delete a file.",
            ToolKind::RunCommand => "Run a shell command in the workspace. Requires user approval.",
        }
    }
}

/// One exact search/replace pair for `edit_file`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SearchReplace {
    pub search: String,
    #[serde(alias = "replacement")]
    pub replace: String,
}

/// One file's diff text for `apply_diffs`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DiffRequest {
    pub path: String,
    pub diff: String,
}

/// A validated tool call.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "tool", rename_all = "snake_case")]
pub enum ToolInvocation {
    ReadFile {
        path: String,
        #[serde(default, alias = "startLine")]
        start_line: Option<usize>,
        #[serde(default, alias = "endLine")]
        end_line: Option<usize>,
    },
    WriteFile {
        path: String,
        content: String,
    },
    EditFile {
        path: String,
        edits: Vec<SearchReplace>,
    },
    ReplaceLines {
        path: String,
        #[serde(alias = "startLine")]
        start_line: usize,
        #[serde(alias = "endLine")]
        end_line: usize,
        content: String,
    },
    InsertCode {
        path: String,
        line: usize,
        content: String,
    },
    ListDirectory {
        #[serde(default)]
        path: Option<String>,
    },
    SearchFiles {
        pattern: String,
        #[serde(default)]
        include: Option<String>,
    },
    DeleteFile {
        path: String,
    },
    CreateDirectory {
        path: String,
    },
    RunCommand {
        command: String,
    },
    ValidateProject {},
    RunTests {},
    ApplyDiffs {
        changes: Vec<DiffRequest>,
    },
    GetBlastRadius {
        path: String,
        #[serde(default)]
        depth: Option<usize>,
    },
    SemanticSearch {
        query: String,
        #[serde(default)]
        limit: Option<usize>,
    },
}

impl ToolInvocation {
    pub fn kind(&self) -> ToolKind {
        match self {
            ToolInvocation::ReadFile { .. } => ToolKind::ReadFile,
            ToolInvocation::WriteFile { .. } => ToolKind::WriteFile,
            ToolInvocation::EditFile { .. } => ToolKind::EditFile,
            ToolInvocation::ReplaceLines { .. } => ToolKind::ReplaceLines,
            ToolInvocation::InsertCode { .. } => ToolKind::InsertCode,
            ToolInvocation::ListDirectory { .. } => ToolKind::ListDirectory,
            ToolInvocation::SearchFiles { .. } => ToolKind::SearchFiles,
            ToolInvocation::DeleteFile { .. } => ToolKind::DeleteFile,
            ToolInvocation::CreateDirectory { .. } => ToolKind::CreateDirectory,
            ToolInvocation::RunCommand { .. } => ToolKind::RunCommand,
            ToolInvocation::ValidateProject {} => ToolKind::ValidateProject,
            ToolInvocation::RunTests {} => ToolKind::RunTests,
            ToolInvocation::ApplyDiffs { .. } => ToolKind::ApplyDiffs,
            ToolInvocation::GetBlastRadius { .. } => ToolKind::GetBlastRadius,
            ToolInvocation::SemanticSearch { .. } => ToolKind::SemanticSearch,
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind().name()
    }

    /// Human-readable one-liner for progress events.
    pub fn summary(&self) -> String {
        match self {
            ToolInvocation::ReadFile { path, .. } => format!("Reading {}", path),
            ToolInvocation::WriteFile { path, .. } => format!("Writing {}", path),
            ToolInvocation::EditFile { path, edits } => {
                format!("Editing {} ({} edits)", path, edits.len())
            }
            ToolInvocation::ReplaceLines {
                path,
                start_line,
                end_line,
                ..
            } => format!("Replacing lines {}-{} in {}", start_line, end_line, path),
            ToolInvocation::InsertCode { path, line, .. } => {
                format!("Inserting code after line {} in {}", line, path)
            }
            ToolInvocation::ListDirectory { path } => {
                format!("Listing {}", path.as_deref().unwrap_or("project root"))
            }
            ToolInvocation::SearchFiles { pattern, include } => match include {
                Some(glob) => format!("Searching for \"{}\" in {}", pattern, glob),
                None => format!("Searching for \"{}\"", pattern),
            },
            ToolInvocation::DeleteFile { path } => format!("Deleting {}", path),
            ToolInvocation::CreateDirectory { path } => format!("Creating directory {}", path),
            ToolInvocation::RunCommand { command } => format!("Running: {}", command),
            ToolInvocation::ValidateProject {} => "Performing project-wide validation".to_string(),
            ToolInvocation::RunTests {} => "Running test suite".to_string(),
            ToolInvocation::ApplyDiffs { changes } => {
                format!("Applying diffs to {} files", changes.len())
            }
            ToolInvocation::GetBlastRadius { path, .. } => {
                format!("Calculating blast radius for {}", path)
            }
            ToolInvocation::SemanticSearch { query, .. } => {
                format!("Searching semantically for \"{}\"", query)
            }
        }
    }
}

/// Why a tool did not produce its normal result.
#[derive(Debug, Error)]
pub enum ToolError {
    /// Malformed parameters or unresolvable search text
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{op} failed for {path}: {source}")]
    Io {
        op: &'static str,
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Diff transaction failed: {0}")]
    Transaction(#[from] TransactionFailure),

    #[error("{0} not initialized.")]
    Unavailable(&'static str),

    #[error("{0}")]
    Index(IndexError),

    #[error(transparent)]
    Approval(#[from] ApprovalError),

    /// Model or embedding backend failure; ends the task
    #[error("backend failure: {0}")]
    Backend(LlmError),
}

impl ToolError {
    pub(crate) fn io(op: &'static str, path: &str, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            ToolError::NotFound(format!("{} failed for {}: file or directory not found", op, path))
        } else {
            ToolError::Io {
                op,
                path: path.to_string(),
                source,
            }
        }
    }
}

impl From<IndexError> for ToolError {
    fn from(err: IndexError) -> Self {
        match err {
            IndexError::Backend(e) => ToolError::Backend(e),
            other => ToolError::Index(other),
        }
    }
}

/// Everything a tool may touch.
pub struct ToolContext {
    pub root: PathBuf,
    pub graph: SharedGraph,
    pub index: Option<Arc<SemanticIndex>>,
    pub approvals: Arc<ApprovalGate>,
    pub events: EventSender,
    pub commands: ProjectCommands,
    pub command_timeout: Duration,
    pub terminal: Option<Arc<dyn TerminalSink>>,
}

impl ToolContext {
    pub fn resolve(&self, path: &str) -> PathBuf {
        resolve_path(path, &self.root)
    }
}

/// Dispatches invocations and renders their outcome as observation text.
pub struct ToolExecutor {
    ctx: ToolContext,
}

impl ToolExecutor {
    pub fn new(ctx: ToolContext) -> Self {
        Self { ctx }
    }

    /// Build an executor for `workspace` from the engine configuration.
    pub fn for_workspace(
        workspace: &Workspace,
        config: &Config,
        approvals: Arc<ApprovalGate>,
        events: EventSender,
        terminal: Option<Arc<dyn TerminalSink>>,
    ) -> Self {
        Self::new(ToolContext {
            root: workspace.root().to_path_buf(),
            graph: Arc::clone(workspace.graph()),
            index: workspace.index().cloned(),
            approvals,
            events,
            commands: config.commands.clone(),
            command_timeout: config.command_timeout,
            terminal,
        })
    }

    pub fn context(&self) -> &ToolContext {
        &self.ctx
    }

    #[cfg(test)]
    pub(crate) fn context_mut(&mut self) -> &mut ToolContext {
        &mut self.ctx
    }

    /// Run one invocation.
    ///
    /// Every tool failure is folded into the returned text; only a backend failure is
    /// returned as an error.
    pub async fn execute(&self, invocation: &ToolInvocation) -> Result<String, LlmError> {
        let name = invocation.name();
        tracing::debug!("[TOOL] {}", invocation.summary());
        match self.dispatch(invocation).await {
            Ok(output) => Ok(output),
            Err(ToolError::Backend(e)) => Err(e),
            Err(e) => {
                tracing::debug!("Tool {} failed: {}", name, e);
                Ok(format!("Tool error ({}): {}", name, e))
            }
        }
    }

    async fn dispatch(&self, invocation: &ToolInvocation) -> Result<String, ToolError> {
        let ctx = &self.ctx;
        match invocation {
            ToolInvocation::ReadFile {
                path,
                start_line,
                end_line,
            } => file_ops::read_file(ctx, path, *start_line, *end_line).await,
            ToolInvocation::WriteFile { path, content } => {
                file_ops::write_file(ctx, path, content).await
            }
            ToolInvocation::EditFile { path, edits } => file_ops::edit_file(ctx, path, edits).await,
            ToolInvocation::ReplaceLines {
                path,
                start_line,
                end_line,
                content,
            } => file_ops::replace_lines(ctx, path, *start_line, *end_line, content).await,
            ToolInvocation::InsertCode {
                path,
                line,
                content,
            } => file_ops::insert_code(ctx, path, *line, content).await,
            ToolInvocation::DeleteFile { path } => file_ops::delete_file(ctx, path).await,
            ToolInvocation::CreateDirectory { path } => {
                directory::create_directory(ctx, path).await
            }
            ToolInvocation::ListDirectory { path } => {
                directory::list_directory(ctx, path.as_deref()).await
            }
            ToolInvocation::SearchFiles { pattern, include } => {
                search::search_files(ctx, pattern, include.as_deref()).await
            }
            ToolInvocation::RunCommand { command } => terminal::run_command(ctx, command).await,
            ToolInvocation::ValidateProject {} => project::validate_project(ctx).await,
            ToolInvocation::RunTests {} => project::run_tests(ctx).await,
            ToolInvocation::ApplyDiffs { changes } => project::apply_diffs(ctx, changes).await,
            ToolInvocation::GetBlastRadius { path, depth } => {
                project::blast_radius(ctx, path, *depth).await
            }
            ToolInvocation::SemanticSearch { query, limit } => {
                search::semantic_search(ctx, query, *limit).await
            }
        }
    }
}
