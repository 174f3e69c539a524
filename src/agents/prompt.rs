//! Prompt text sent to the model.

use std::path::Path;

use serde::Deserialize;

use crate::tools::ToolKind;
use crate::util::truncate_chars;

/// Fixed part of the system prompt. The tool catalogue is appended by [`system_prompt`].
const AGENT_RULES: &str = r#"<IDENTITY>
You are an autonomous software engineering agent with full access to the project workspace.
You act through tools. You do not describe work; you do it.
</IDENTITY>

<RULES>
1. ACT FIRST: when the user asks for a change, your response is a tool call.
2. NO QUESTIONS: never ask the user for code, file contents or permission. Use 'read_file', 'search_files' or 'semantic_search'.
3. NO INSTRUCTIONS: never tell the user what to do.
4. NO EXCUSES: you have tools. Missing content means you have not read it yet.
5. WORKFLOW: PLAN -> READ -> EDIT -> VALIDATE.
</RULES>

<TOOL_HIERARCHY>
- Discovery: 'list_directory', 'search_files', 'semantic_search', 'get_blast_radius'
- Context: 'read_file' (required before every edit)
- Execution: 'apply_diffs' (preferred), 'edit_file', 'replace_lines', 'insert_code', 'write_file', 'run_command'
- Validation: 'validate_project' (required after every change), 'run_tests'
</TOOL_HIERARCHY>

<OUTPUT_FORMAT>
- Thinking: <THOUGHT> plan and intended change </THOUGHT>
- Action: exactly one JSON tool call
- When the task is complete, reply with a short plain-text summary and no tool call.
</OUTPUT_FORMAT>"#;

/// Sent after a reply that talked instead of acting.
pub const STALL_CORRECTION: &str = "[STALLING DETECTED] You are asking a question or explaining why you can't act.\n\
STRICT RULE: If you don't see content, use 'read_file'. If you don't see a file, use 'list_directory'.\n\
DO NOT talk. DO NOT ask the user for anything.\n\
USE TOOLS. ACTION ONLY.";

const ACTION_REMINDER: &str =
    "[MANDATORY: YOUR NEXT TURN MUST BE A TOOL CALL. DO NOT ASK QUESTIONS. DO NOT GIVE INSTRUCTIONS.]";

/// File open in the user's editor when the task was submitted.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ActiveFile {
    pub path: String,
    pub content: String,
}

/// Rules plus one usage line per tool.
pub fn system_prompt() -> String {
    let mut prompt = String::from(AGENT_RULES);
    prompt.push_str("\n\n<TOOLS>\n");
    for kind in ToolKind::ALL {
        prompt.push_str(&format!(
            "- {}: {}\n  {}\n",
            kind.name(),
            kind.description(),
            kind.usage()
        ));
    }
    prompt.push_str("</TOOLS>");
    prompt
}

/// The `<PROJECT_STATUS>` block describing what the agent already knows.
pub fn project_status(
    manifest: Option<&str>,
    file_count: usize,
    root: &Path,
    active_file: Option<&ActiveFile>,
) -> String {
    let mut status = String::from("<PROJECT_STATUS>\n");
    match manifest {
        Some(manifest) => {
            status.push_str(&format!("Project Indexed. Files found: {}\n", file_count));
            status.push_str(manifest);
        }
        None => status.push_str(&format!(
            "Project not indexed yet. Use 'list_directory' to explore.\nRoot: {}\n",
            root.display()
        )),
    }
    if let Some(active) = active_file {
        status.push_str(&format!(
            "\n\n### ACTIVE FILE (CURRENTLY OPEN IN EDITOR):\nPath: {}\nContent:\n{}\n",
            active.path, active.content
        ));
    }
    status.push_str("\n</PROJECT_STATUS>");
    status
}

/// Full system message for one task.
pub fn system_instructions(
    manifest: Option<&str>,
    file_count: usize,
    root: &Path,
    active_file: Option<&ActiveFile>,
) -> String {
    format!(
        "{}\n\n{}\n\n{}",
        system_prompt(),
        project_status(manifest, file_count, root, active_file),
        ACTION_REMINDER
    )
}

/// Tool result as the user turn that follows the call.
pub fn observation(tool: &str, result: &str) -> String {
    format!(
        "[Tool Result: {}]\n{}\n\n[NEXT STEP: Use another tool if task is not complete, otherwise give your final text summary.]",
        tool, result
    )
}

/// Cut `text` to `limit` characters, noting the original length.
pub fn truncate_observation(text: &str, limit: usize) -> String {
    let total = text.chars().count();
    if total <= limit {
        return text.to_string();
    }
    format!(
        "{}\n... (truncated, {} chars total)",
        truncate_chars(text, limit),
        total
    )
}
