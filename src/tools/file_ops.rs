//! File operation tools: read, write, edit, line-level splice, delete.

use super::{SearchReplace, ToolContext, ToolError};
use crate::util::truncate_chars;
use crate::workspace::is_binary_file;

async fn read_text(ctx: &ToolContext, path: &str) -> Result<String, ToolError> {
    tokio::fs::read_to_string(ctx.resolve(path))
        .await
        .map_err(|e| ToolError::io("read", path, e))
}

async fn write_text(ctx: &ToolContext, path: &str, content: &str) -> Result<(), ToolError> {
    tokio::fs::write(ctx.resolve(path), content)
        .await
        .map_err(|e| ToolError::io("write", path, e))
}

/// Read a file with 1-based line numbers, optionally limited to a line range.
pub async fn read_file(
    ctx: &ToolContext,
    path: &str,
    start_line: Option<usize>,
    end_line: Option<usize>,
) -> Result<String, ToolError> {
    let resolved = ctx.resolve(path);
    let binary = is_binary_file(&resolved)
        .await
        .map_err(|e| ToolError::io("read", path, e))?;
    if binary {
        return Err(ToolError::Validation(format!(
            "Cannot read {}: This appears to be a binary file.",
            path
        )));
    }

    let content = read_text(ctx, path).await?;
    let lines: Vec<&str> = content.split('\n').collect();
    let total = lines.len();

    let start = start_line.unwrap_or(1).max(1);
    let end = end_line.unwrap_or(total).min(total);
    if start > total {
        return Ok(format!(
            "File has {} lines, requested start line {} is beyond end of file",
            total, start
        ));
    }
    if end < start {
        return Err(ToolError::Validation(format!(
            "Invalid line range {}-{}",
            start, end
        )));
    }

    let numbered: Vec<String> = lines[start - 1..end]
        .iter()
        .enumerate()
        .map(|(i, line)| format!("{:4}| {}", start + i, line))
        .collect();
    Ok(numbered.join("\n"))
}

/// Create or overwrite a file, creating parent directories.
pub async fn write_file(ctx: &ToolContext, path: &str, content: &str) -> Result<String, ToolError> {
    let resolved = ctx.resolve(path);
    if let Some(parent) = resolved.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| ToolError::io("create directory", path, e))?;
    }
    write_text(ctx, path, content).await?;
    let line_count = content.split('\n').count();
    Ok(format!("Successfully wrote {} lines to {}", line_count, path))
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Apply exact search/replace edits in order. Nothing is written unless every edit matches.
pub async fn edit_file(
    ctx: &ToolContext,
    path: &str,
    edits: &[SearchReplace],
) -> Result<String, ToolError> {
    if edits.is_empty() {
        return Err(ToolError::Validation("No edits supplied".to_string()));
    }
    let mut content = read_text(ctx, path).await?;

    for edit in edits {
        if edit.search.is_empty() {
            return Err(ToolError::Validation(
                "edit_file search text must not be empty".to_string(),
            ));
        }
        if content.contains(&edit.search) {
            content = content.replacen(&edit.search, &edit.replace, 1);
            continue;
        }
        let loose_search = collapse_whitespace(&edit.search);
        if !loose_search.is_empty() && collapse_whitespace(&content).contains(&loose_search) {
            return Err(ToolError::Validation(format!(
                "edit_file failed for {}: The search string exists but whitespace/indentation did not match exactly.\n\
                 Please 'read_file' again to get the EXACT indentation or use 'write_file' to overwrite the file if the edit is complex.\n\
                 Searched for: \"{}...\"",
                path,
                truncate_chars(&edit.search, 50)
            )));
        }
        return Err(ToolError::NotFound(format!(
            "edit_file failed: could not find the following code block in {}:\n\n{}\n\n\
             Make sure you have the latest content via 'read_file'.",
            path, edit.search
        )));
    }

    write_text(ctx, path, &content).await?;
    Ok(format!("Applied {} edit(s) to {}", edits.len(), path))
}

/// Splice `replacement` between `before` lines and the remainder starting at `after`.
fn splice(lines: &[&str], before: usize, after: usize, replacement: &str) -> String {
    let mut out: Vec<&str> = Vec::with_capacity(lines.len() + 1);
    out.extend_from_slice(&lines[..before]);
    out.push(replacement);
    out.extend_from_slice(&lines[after..]);
    out.join("\n")
}

/// Replace the inclusive 1-based range `start_line..=end_line`, clamped to the file.
pub async fn replace_lines(
    ctx: &ToolContext,
    path: &str,
    start_line: usize,
    end_line: usize,
    content: &str,
) -> Result<String, ToolError> {
    if end_line < start_line {
        return Err(ToolError::Validation(format!(
            "Invalid line range {}-{}",
            start_line, end_line
        )));
    }
    let original = read_text(ctx, path).await?;
    let lines: Vec<&str> = original.split('\n').collect();
    let end = end_line.min(lines.len());
    let start = start_line.saturating_sub(1).min(end);

    write_text(ctx, path, &splice(&lines, start, end, content)).await?;
    Ok(format!(
        "Replaced lines {}-{} in {}",
        start_line, end_line, path
    ))
}

/// Insert `content` after 1-based `line` (0 inserts at the top), clamped to the file.
pub async fn insert_code(
    ctx: &ToolContext,
    path: &str,
    line: usize,
    content: &str,
) -> Result<String, ToolError> {
    let original = read_text(ctx, path).await?;
    let lines: Vec<&str> = original.split('\n').collect();
    let at = line.min(lines.len());

    write_text(ctx, path, &splice(&lines, at, at, content)).await?;
    Ok(format!("Inserted code after line {} in {}", line, path))
}

pub async fn delete_file(ctx: &ToolContext, path: &str) -> Result<String, ToolError> {
    tokio::fs::remove_file(ctx.resolve(path))
        .await
        .map_err(|e| ToolError::io("delete", path, e))?;
    Ok(format!("Deleted: {}", path))
}
