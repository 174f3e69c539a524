//! Search tools: regex text search and semantic search.

use std::path::{Path, PathBuf};

use regex::{Regex, RegexBuilder};

use super::{ToolContext, ToolError};
use crate::index::DEFAULT_SEARCH_LIMIT;
use crate::util::display_relative;
use crate::workspace::{has_binary_extension, walk, MAX_TEXT_FILE_BYTES, SKIP_DIRS};

/// Maximum matching lines reported by `search_files`.
pub const MAX_SEARCH_RESULTS: usize = 50;

/// Whether `path` passes an include filter such as `*.tsx` or `index.ts`.
fn matches_include(path: &Path, include: Option<&str>) -> bool {
    let Some(include) = include.map(str::trim).filter(|i| !i.is_empty()) else {
        return true;
    };
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy())
        .unwrap_or_default();
    match include.strip_prefix('*') {
        Some(suffix) => name.ends_with(suffix),
        None => name == include,
    }
}

fn search_tree(root: &Path, regex: &Regex, include: Option<&str>) -> Vec<String> {
    let mut results = Vec::new();
    for entry in walk(root, SKIP_DIRS, true) {
        let path: PathBuf = entry.path().to_path_buf();
        if has_binary_extension(&path) || !matches_include(&path, include) {
            continue;
        }
        let small = entry
            .metadata()
            .map(|m| m.len() <= MAX_TEXT_FILE_BYTES)
            .unwrap_or(false);
        if !small {
            continue;
        }
        let Ok(content) = std::fs::read_to_string(&path) else {
            continue;
        };
        let rel = display_relative(&path, root);
        for (i, line) in content.lines().enumerate() {
            if regex.is_match(line) {
                results.push(format!("{}:{}: {}", rel, i + 1, line.trim()));
                if results.len() >= MAX_SEARCH_RESULTS {
                    return results;
                }
            }
        }
    }
    results
}

/// Case-insensitive regex search over workspace text files.
pub async fn search_files(
    ctx: &ToolContext,
    pattern: &str,
    include: Option<&str>,
) -> Result<String, ToolError> {
    let regex = RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|e| ToolError::Validation(format!("Invalid search pattern: {}", e)))?;

    let root = ctx.root.clone();
    let include = include.map(str::to_string);
    let results = tokio::task::spawn_blocking(move || search_tree(&root, &regex, include.as_deref()))
        .await
        .map_err(|e| ToolError::Io {
            op: "search",
            path: ctx.root.display().to_string(),
            source: std::io::Error::other(e),
        })?;

    if results.is_empty() {
        return Ok(format!("No matches found for \"{}\".", pattern));
    }
    Ok(results.join("\n"))
}

/// Query the semantic index and render the best chunks.
pub async fn semantic_search(
    ctx: &ToolContext,
    query: &str,
    limit: Option<usize>,
) -> Result<String, ToolError> {
    let index = ctx
        .index
        .as_ref()
        .ok_or(ToolError::Unavailable("Semantic index"))?;

    let hits = index
        .search(query, limit.unwrap_or(DEFAULT_SEARCH_LIMIT))
        .await?;
    if hits.is_empty() {
        return Ok("No relevant code found.".to_string());
    }

    let blocks: Vec<String> = hits
        .iter()
        .map(|hit| {
            format!(
                "--- {}:{}-{} (Score: {:.2}) ---\n{}",
                display_relative(&hit.chunk.path, &ctx.root),
                hit.chunk.start_line,
                hit.chunk.end_line,
                hit.score,
                hit.chunk.text
            )
        })
        .collect();
    Ok(blocks.join("\n\n"))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::index::testing::CountingEmbedder;
    use crate::index::{InMemoryChunkStore, SemanticIndex};
    use crate::tools::testing::{executor, executor_with_index};

    async fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        tokio::fs::write(path, content).await.unwrap();
    }

    #[tokio::test]
    async fn search_is_case_insensitive_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "src/App.tsx", "const [x] = useState(0);\n").await;
        write(dir.path(), "src/util.ts", "// USESTATE mentioned\n").await;
        write(dir.path(), "node_modules/r/index.tsx", "useState").await;
        write(dir.path(), ".cache/c.tsx", "useState").await;
        let (executor, _rx) = executor(dir.path());
        let ctx = executor.context();

        assert_eq!(
            search_files(ctx, "usestate", Some("*.tsx")).await.unwrap(),
            "src/App.tsx:1: const [x] = useState(0);"
        );
        let all = search_files(ctx, "useState", None).await.unwrap();
        assert_eq!(all.lines().count(), 2);
        assert!(all.contains("src/util.ts:1: // USESTATE mentioned"));
    }

    #[tokio::test]
    async fn search_reports_no_matches_and_bad_patterns() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.ts", "hello\n").await;
        let (executor, _rx) = executor(dir.path());
        let ctx = executor.context();

        assert_eq!(
            search_files(ctx, "absent", None).await.unwrap(),
            "No matches found for \"absent\"."
        );
        assert!(matches!(
            search_files(ctx, "(unclosed", None).await.unwrap_err(),
            ToolError::Validation(_)
        ));
    }

    #[tokio::test]
    async fn search_caps_result_count() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "many.ts", &"hit\n".repeat(80)).await;
        let (executor, _rx) = executor(dir.path());
        let out = search_files(executor.context(), "hit", None).await.unwrap();
        assert_eq!(out.lines().count(), MAX_SEARCH_RESULTS);
    }

    #[tokio::test]
    async fn semantic_search_renders_relative_locations() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "src/auth.ts",
            "export function login() {\n  return true;\n}\n",
        )
        .await;
        let index = Arc::new(SemanticIndex::new(
            Arc::new(InMemoryChunkStore::new()),
            Arc::new(CountingEmbedder::default()),
        ));
        let (executor, _rx) = executor_with_index(dir.path(), Some(Arc::clone(&index)));
        index
            .index_file(&executor.context().root.join("src/auth.ts"))
            .await
            .unwrap();

        let out = semantic_search(executor.context(), "login", Some(3))
            .await
            .unwrap();
        assert!(out.starts_with("--- src/auth.ts:1-3 (Score: "), "{}", out);
        assert!(out.contains("export function login()"));
    }

    #[tokio::test]
    async fn semantic_search_on_empty_index() {
        let dir = tempfile::tempdir().unwrap();
        let index = Arc::new(SemanticIndex::new(
            Arc::new(InMemoryChunkStore::new()),
            Arc::new(CountingEmbedder::default()),
        ));
        let (executor, _rx) = executor_with_index(dir.path(), Some(index));
        assert_eq!(
            semantic_search(executor.context(), "anything", None)
                .await
                .unwrap(),
            "No relevant code found."
        );
    }
}
