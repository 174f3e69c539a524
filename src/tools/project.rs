//! Project-level tools: validation, tests, transactional diffs and blast radius.

use super::terminal::run_shell;
use super::{DiffRequest, ToolContext, ToolError};
use crate::diff::{apply_transaction, parse_diff_blocks, FileChange};
use crate::graph::DEFAULT_BLAST_DEPTH;
use crate::util::display_relative;

const DIFF_FORMAT_HELP: &str = "Failed to parse one or more diff blocks. Ensure you use the exact format:\n\
<<<< SEARCH\n[exact code to find]\n====\n[replacement code]\n>>>> REPLACE";

/// Type-check the project when its marker file exists.
pub async fn validate_project(ctx: &ToolContext) -> Result<String, ToolError> {
    let commands = &ctx.commands;
    if !ctx.root.join(&commands.validate_marker).exists() {
        return Ok(format!(
            "No {} found. Skipping validation.",
            commands.validate_marker
        ));
    }

    let output = run_shell(ctx, &commands.validate_command).await?;
    if output.success {
        Ok(format!(
            "Validation ({}) passed! No type errors found.\n{}",
            commands.validate_command, output.text
        ))
    } else {
        Ok(format!("Validation failed with errors:\n{}", output.text))
    }
}

/// Run the test suite when its marker file exists.
pub async fn run_tests(ctx: &ToolContext) -> Result<String, ToolError> {
    let commands = &ctx.commands;
    if !ctx.root.join(&commands.test_marker).exists() {
        return Ok(format!(
            "No {} found. Skipping tests.",
            commands.test_marker
        ));
    }

    let output = run_shell(ctx, &commands.test_command).await?;
    if output.success {
        Ok(format!("Tests passed!\n{}", output.text))
    } else {
        Ok(format!("Tests failed:\n{}", output.text))
    }
}

/// Apply SEARCH/REPLACE blocks to every listed file, all or nothing.
pub async fn apply_diffs(ctx: &ToolContext, requests: &[DiffRequest]) -> Result<String, ToolError> {
    if requests.is_empty() {
        return Err(ToolError::Validation("No changes supplied".to_string()));
    }

    let mut changes = Vec::with_capacity(requests.len());
    for request in requests {
        let blocks = parse_diff_blocks(&request.diff);
        if blocks.is_empty() {
            return Err(ToolError::Validation(DIFF_FORMAT_HELP.to_string()));
        }
        changes.push(FileChange {
            path: ctx.resolve(&request.path),
            blocks,
        });
    }

    let commit = apply_transaction(&changes).await?;

    let mut graph = ctx.graph.write().await;
    for change in &changes {
        graph.update_file(&change.path).await;
    }

    Ok(format!(
        "Successfully applied diffs to {} files.",
        commit.files_touched
    ))
}

/// Files that transitively import `path`.
pub async fn blast_radius(
    ctx: &ToolContext,
    path: &str,
    depth: Option<usize>,
) -> Result<String, ToolError> {
    let target = ctx.resolve(path);
    let affected = ctx
        .graph
        .read()
        .await
        .blast_radius(&target, depth.unwrap_or(DEFAULT_BLAST_DEPTH));

    if affected.is_empty() {
        return Ok(format!("No external files depend on {}.", path));
    }
    let lines: Vec<String> = affected
        .iter()
        .map(|p| format!("- {}", display_relative(p, &ctx.root)))
        .collect();
    Ok(format!(
        "Files affected by changing {}:\n{}",
        path,
        lines.join("\n")
    ))
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::tools::testing::executor;
    use crate::tools::ToolExecutor;

    async fn write(root: &Path, rel: &str, content: &str) {
        tokio::fs::write(root.join(rel), content).await.unwrap();
    }

    fn diff(path: &str, search: &str, replace: &str) -> DiffRequest {
        DiffRequest {
            path: path.to_string(),
            diff: format!("<<<< SEARCH\n{}\n====\n{}\n>>>> REPLACE", search, replace),
        }
    }

    fn with_commands(executor: &mut ToolExecutor) {
        let commands = &mut executor.context_mut().commands;
        commands.validate_marker = "tsconfig.json".into();
        commands.validate_command = "echo typed".into();
        commands.test_marker = "package.json".into();
        commands.test_command = "echo boom >&2; exit 1".into();
    }

    #[tokio::test]
    async fn validation_and_tests_require_markers() {
        let dir = tempfile::tempdir().unwrap();
        let (mut executor, _rx) = executor(dir.path());
        with_commands(&mut executor);
        let ctx = executor.context();

        assert_eq!(
            validate_project(ctx).await.unwrap(),
            "No tsconfig.json found. Skipping validation."
        );
        assert_eq!(
            run_tests(ctx).await.unwrap(),
            "No package.json found. Skipping tests."
        );
    }

    #[tokio::test]
    async fn validation_and_tests_report_outcome() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "tsconfig.json", "{}").await;
        write(dir.path(), "package.json", "{}").await;
        let (mut executor, _rx) = executor(dir.path());
        with_commands(&mut executor);
        let ctx = executor.context();

        let validation = validate_project(ctx).await.unwrap();
        assert!(validation.starts_with("Validation (echo typed) passed!"));
        assert!(validation.ends_with("typed"));
        assert_eq!(run_tests(ctx).await.unwrap(), "Tests failed:\nSTDERR: boom");
    }

    #[tokio::test]
    async fn diffs_apply_across_files() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.ts", "const a = 1;\n").await;
        write(dir.path(), "b.ts", "const b = 2;\n").await;
        let (executor, _rx) = executor(dir.path());

        let out = apply_diffs(
            executor.context(),
            &[diff("a.ts", "a = 1", "a = 10"), diff("b.ts", "b = 2", "b = 20")],
        )
        .await
        .unwrap();
        assert_eq!(out, "Successfully applied diffs to 2 files.");
        assert_eq!(
            tokio::fs::read_to_string(dir.path().join("b.ts")).await.unwrap(),
            "const b = 20;\n"
        );
    }

    #[tokio::test]
    async fn failed_block_leaves_every_file_untouched() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.ts", "const a = 1;\n").await;
        write(dir.path(), "b.ts", "const b = 2;\n").await;
        let (executor, _rx) = executor(dir.path());

        let err = apply_diffs(
            executor.context(),
            &[diff("a.ts", "a = 1", "a = 10"), diff("b.ts", "missing", "x")],
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ToolError::Transaction(_)));
        assert_eq!(
            tokio::fs::read_to_string(dir.path().join("a.ts")).await.unwrap(),
            "const a = 1;\n"
        );
    }

    #[tokio::test]
    async fn unparseable_diff_is_rejected_with_format_help() {
        let dir = tempfile::tempdir().unwrap();
        let (executor, _rx) = executor(dir.path());
        let err = apply_diffs(
            executor.context(),
            &[DiffRequest {
                path: "a.ts".into(),
                diff: "replace a with b".into(),
            }],
        )
        .await
        .unwrap_err();
        assert!(err.to_string().starts_with("Failed to parse one or more diff blocks"));
    }

    #[tokio::test]
    async fn blast_radius_lists_relative_dependents() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.ts", "export const a = 1;\n").await;
        write(dir.path(), "b.ts", "import { a } from './a';\n").await;
        write(dir.path(), "c.ts", "import './b';\n").await;
        let (executor, _rx) = executor(dir.path());
        let ctx = executor.context();
        ctx.graph.write().await.rebuild().await;

        assert_eq!(
            blast_radius(ctx, "a.ts", None).await.unwrap(),
            "Files affected by changing a.ts:\n- b.ts\n- c.ts"
        );
        assert_eq!(
            blast_radius(ctx, "a.ts", Some(1)).await.unwrap(),
            "Files affected by changing a.ts:\n- b.ts"
        );
        assert_eq!(
            blast_radius(ctx, "c.ts", None).await.unwrap(),
            "No external files depend on c.ts."
        );
    }
}
