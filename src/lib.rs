//! # workbench
//!
//! Autonomous coding-agent engine. A language model supplies decisions; this crate
//! supplies parsing, dispatch, safety and retrieval over a project workspace.
//!
//! ## Architecture
//!
//! ```text
//!   task ──▶ Agent loop ──▶ ModelBackend ──▶ reply text
//!               ▲                               │
//!               │                          parse_tool_call
//!               │                               ▼
//!          observation ◀── ToolExecutor ◀── ToolInvocation
//!                             │
//!                 ┌───────────┼────────────┐
//!                 ▼           ▼            ▼
//!            diff engine   CodeGraph   SemanticIndex
//! ```
//!
//! ## Modules
//! - `agents`: the think-act-observe loop, session state, progress events
//! - `parser`: tool-call extraction from free-form model output
//! - `tools`: the tool catalogue, executor and approval gate
//! - `diff`: all-or-nothing SEARCH/REPLACE transactions
//! - `graph`: import graph and blast-radius queries
//! - `index`: chunking, incremental embedding, vector search, file watching
//! - `syntax`: the TSX grammar used by `graph` and `index`
//! - `llm`: model provider adapters
//! - `workspace`: workspace bootstrap and manifest
//! - `config`: environment configuration

pub mod agents;
pub mod config;
pub mod diff;
pub mod graph;
pub mod index;
pub mod llm;
pub mod parser;
pub mod syntax;
pub mod tools;
pub mod util;
pub mod workspace;

pub use agents::{Agent, AgentError, AgentSession, TaskOutcome};
pub use config::Config;
pub use workspace::Workspace;
