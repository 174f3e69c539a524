//! Directory tools: one-level listing and creation.

use super::{ToolContext, ToolError};

/// List one level of a directory, directories first, each group sorted by name.
pub async fn list_directory(ctx: &ToolContext, path: Option<&str>) -> Result<String, ToolError> {
    let path = path.unwrap_or(".");
    let dir = ctx.resolve(path);

    let mut reader = tokio::fs::read_dir(&dir)
        .await
        .map_err(|e| ToolError::io("list", path, e))?;

    let mut dirs = Vec::new();
    let mut files = Vec::new();
    while let Some(entry) = reader
        .next_entry()
        .await
        .map_err(|e| ToolError::io("list", path, e))?
    {
        let name = entry.file_name().to_string_lossy().to_string();
        let Ok(metadata) = entry.metadata().await else {
            continue;
        };
        if metadata.is_dir() {
            dirs.push(name);
        } else {
            files.push((name, metadata.len()));
        }
    }

    if dirs.is_empty() && files.is_empty() {
        return Ok("(empty directory)".to_string());
    }

    dirs.sort();
    files.sort();
    let lines: Vec<String> = dirs
        .into_iter()
        .map(|name| format!("DIR  {}", name))
        .chain(
            files
                .into_iter()
                .map(|(name, size)| format!("FILE {} ({} bytes)", name, size)),
        )
        .collect();
    Ok(lines.join("\n"))
}

/// Create a directory and any missing parents. Existing directories are fine.
pub async fn create_directory(ctx: &ToolContext, path: &str) -> Result<String, ToolError> {
    tokio::fs::create_dir_all(ctx.resolve(path))
        .await
        .map_err(|e| ToolError::io("create directory", path, e))?;
    Ok(format!("Created directory: {}", path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testing::executor;

    #[tokio::test]
    async fn lists_directories_before_files_with_sizes() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::create_dir(dir.path().join("src")).await.unwrap();
        tokio::fs::write(dir.path().join("b.ts"), "12345").await.unwrap();
        tokio::fs::write(dir.path().join("a.ts"), "").await.unwrap();
        let (executor, _rx) = executor(dir.path());

        let out = list_directory(executor.context(), None).await.unwrap();
        assert_eq!(out, "DIR  src\nFILE a.ts (0 bytes)\nFILE b.ts (5 bytes)");
    }

    #[tokio::test]
    async fn empty_and_missing_directories() {
        let dir = tempfile::tempdir().unwrap();
        let (executor, _rx) = executor(dir.path());
        let ctx = executor.context();

        assert_eq!(
            list_directory(ctx, Some(".")).await.unwrap(),
            "(empty directory)"
        );
        let err = list_directory(ctx, Some("nope")).await.unwrap_err();
        assert!(matches!(err, ToolError::NotFound(_)));
    }

    #[tokio::test]
    async fn create_is_recursive_and_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let (executor, _rx) = executor(dir.path());
        let ctx = executor.context();

        create_directory(ctx, "a/b/c").await.unwrap();
        assert!(dir.path().join("a/b/c").is_dir());
        assert_eq!(
            create_directory(ctx, "a/b/c").await.unwrap(),
            "Created directory: a/b/c"
        );
    }
}
