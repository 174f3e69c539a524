//! Transactional multi-file search/replace.
//!
//! Diff text is a sequence of blocks:
//!
//! ```text
//! <<<< SEARCH
//! original text
//! ====
//! replacement text
//! >>>> REPLACE
//! ```
//!
//! A transaction snapshots every target, applies all blocks in memory, and only then
//! writes. If any block cannot be located nothing is written; if a write fails midway every
//! file already written is restored (or removed, when it did not exist before).

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

// Markers must sit on their own lines. An empty section is the marker directly after the
// previous one, tried first so a lazy capture never runs on into a later block.
static DIFF_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?s)<<<< SEARCH\r?\n(?:====|(.*?)\r?\n====)\r?\n(?:>>>> REPLACE|(.*?)\r?\n>>>> REPLACE)",
    )
    .expect("diff block pattern is valid")
});

/// One search/replace edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffBlock {
    pub search: String,
    pub replacement: String,
}

/// All edits for one file, applied in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    pub path: PathBuf,
    pub blocks: Vec<DiffBlock>,
}

/// Extract every block from diff text. Returns an empty list when nothing matches.
pub fn parse_diff_blocks(text: &str) -> Vec<DiffBlock> {
    DIFF_BLOCK
        .captures_iter(text)
        .map(|caps| DiffBlock {
            search: caps.get(1).map_or("", |m| m.as_str()).to_string(),
            replacement: caps.get(2).map_or("", |m| m.as_str()).to_string(),
        })
        .collect()
}

/// Pre-transaction state of one target path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Snapshot {
    Existing(String),
    /// The file did not exist before the transaction
    Missing,
}

/// Why a transaction did not commit.
#[derive(Debug, Error)]
pub enum DiffError {
    #[error("no diff blocks supplied for {0}")]
    NoBlocks(PathBuf),

    #[error("search block {index} not found in {path}. Ensure exact match including whitespace")]
    BlockNotFound { path: PathBuf, index: usize },

    #[error("{op} failed for {path}: {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// What rollback managed to do.
#[derive(Debug, Default)]
pub struct RollbackReport {
    /// Files written back to their original content
    pub restored: Vec<PathBuf>,
    /// Files created by the transaction and deleted again
    pub removed: Vec<PathBuf>,
    /// Files rollback could not restore
    pub failed: Vec<(PathBuf, String)>,
}

impl RollbackReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

impl std::fmt::Display for RollbackReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_clean() {
            if self.restored.is_empty() && self.removed.is_empty() {
                write!(f, "No changes were saved.")
            } else {
                write!(
                    f,
                    "Rolled back {} restored, {} removed. No changes were saved.",
                    self.restored.len(),
                    self.removed.len()
                )
            }
        } else {
            write!(f, "Rollback incomplete for:")?;
            for (path, err) in &self.failed {
                write!(f, " {} ({});", path.display(), err)?;
            }
            Ok(())
        }
    }
}

/// A failed transaction: the cause plus the rollback outcome.
#[derive(Debug, Error)]
#[error("{cause}. {rollback}")]
pub struct TransactionFailure {
    pub cause: DiffError,
    pub rollback: RollbackReport,
}

/// A committed transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionCommit {
    pub files_touched: usize,
}

/// Path -> pre-transaction snapshot, in first-seen order.
#[derive(Debug, Default)]
pub struct TransactionBackup {
    entries: Vec<(PathBuf, Snapshot)>,
}

impl TransactionBackup {
    /// Snapshot every distinct path in `changes`. A missing file is recorded, not an error.
    pub async fn capture(changes: &[FileChange]) -> Result<Self, DiffError> {
        let mut backup = Self::default();
        for change in changes {
            if backup.get(&change.path).is_some() {
                continue;
            }
            let snapshot = match tokio::fs::read_to_string(&change.path).await {
                Ok(content) => Snapshot::Existing(content),
                Err(e) if e.kind() == ErrorKind::NotFound => Snapshot::Missing,
                Err(source) => {
                    return Err(DiffError::Io {
                        op: "read",
                        path: change.path.clone(),
                        source,
                    })
                }
            };
            backup.entries.push((change.path.clone(), snapshot));
        }
        Ok(backup)
    }

    pub fn get(&self, path: &Path) -> Option<&Snapshot> {
        self.entries
            .iter()
            .find(|(p, _)| p == path)
            .map(|(_, s)| s)
    }

    /// Restore every path in `written` to its snapshot. Best effort per file.
    pub async fn restore(&self, written: &[PathBuf]) -> RollbackReport {
        let mut report = RollbackReport::default();
        for path in written {
            let outcome = match self.get(path) {
                Some(Snapshot::Existing(original)) => tokio::fs::write(path, original)
                    .await
                    .map(|_| report.restored.push(path.clone())),
                Some(Snapshot::Missing) => match tokio::fs::remove_file(path).await {
                    Ok(()) => {
                        report.removed.push(path.clone());
                        Ok(())
                    }
                    Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                    Err(e) => Err(e),
                },
                None => Ok(()),
            };
            if let Err(e) = outcome {
                tracing::error!("Rollback failed for {}: {}", path.display(), e);
                report.failed.push((path.clone(), e.to_string()));
            }
        }
        report
    }
}

/// Apply `blocks` to `content` in order, each replacing the first occurrence.
///
/// Later blocks see the output of earlier ones.
pub fn apply_blocks(path: &Path, content: &str, blocks: &[DiffBlock]) -> Result<String, DiffError> {
    let mut current = content.to_string();
    for (index, block) in blocks.iter().enumerate() {
        if !current.contains(&block.search) {
            return Err(DiffError::BlockNotFound {
                path: path.to_path_buf(),
                index: index + 1,
            });
        }
        current = current.replacen(&block.search, &block.replacement, 1);
    }
    Ok(current)
}

/// Run an all-or-nothing transaction over `changes`.
pub async fn apply_transaction(
    changes: &[FileChange],
) -> Result<TransactionCommit, TransactionFailure> {
    let fail = |cause| TransactionFailure {
        cause,
        rollback: RollbackReport::default(),
    };

    if let Some(empty) = changes.iter().find(|c| c.blocks.is_empty()) {
        return Err(fail(DiffError::NoBlocks(empty.path.clone())));
    }

    let backup = TransactionBackup::capture(changes).await.map_err(fail)?;

    // Patch in memory. A path listed twice continues from its first patch.
    let mut order: Vec<PathBuf> = Vec::new();
    let mut patched: HashMap<PathBuf, String> = HashMap::new();
    for change in changes {
        let base = match patched.get(&change.path) {
            Some(content) => content.clone(),
            None => match backup.get(&change.path) {
                Some(Snapshot::Existing(content)) => content.clone(),
                _ => String::new(),
            },
        };
        let next = apply_blocks(&change.path, &base, &change.blocks).map_err(fail)?;
        if !patched.contains_key(&change.path) {
            order.push(change.path.clone());
        }
        patched.insert(change.path.clone(), next);
    }

    let mut written: Vec<PathBuf> = Vec::new();
    for path in &order {
        let content = patched.get(path).map(String::as_str).unwrap_or_default();
        if let Err(cause) = write_with_parents(path, content).await {
            tracing::warn!("Diff transaction failed, rolling back: {}", cause);
            // The failed write may have truncated the file.
            written.push(path.clone());
            let rollback = backup.restore(&written).await;
            return Err(TransactionFailure { cause, rollback });
        }
        written.push(path.clone());
    }

    tracing::info!("Diff transaction committed ({} files)", order.len());
    Ok(TransactionCommit {
        files_touched: order.len(),
    })
}

async fn write_with_parents(path: &Path, content: &str) -> Result<(), DiffError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| DiffError::Io {
                op: "create directory",
                path: parent.to_path_buf(),
                source,
            })?;
    }
    tokio::fs::write(path, content)
        .await
        .map_err(|source| DiffError::Io {
            op: "write",
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(search: &str, replacement: &str) -> DiffBlock {
        DiffBlock {
            search: search.to_string(),
            replacement: replacement.to_string(),
        }
    }

    #[test]
    fn parses_multiple_blocks() {
        let text = "intro\n<<<< SEARCH\nconst a = 1;\n====\nconst a = 2;\n>>>> REPLACE\n\
                    <<<< SEARCH\nfoo()\nbar()\n====\nbaz()\n>>>> REPLACE\n";
        let blocks = parse_diff_blocks(text);
        assert_eq!(
            blocks,
            vec![
                block("const a = 1;", "const a = 2;"),
                block("foo()\nbar()", "baz()")
            ]
        );
    }

    #[test]
    fn parses_empty_replacement() {
        let blocks = parse_diff_blocks("<<<< SEARCH\nremove me\n====\n>>>> REPLACE");
        assert_eq!(blocks, vec![block("remove me", "")]);
    }

    #[test]
    fn separator_lookalikes_stay_in_search_text() {
        let blocks = parse_diff_blocks(
            "<<<< SEARCH\n// ======\nfoo\n======\n====\nbar\n>>>> REPLACE",
        );
        assert_eq!(blocks, vec![block("// ======\nfoo\n======", "bar")]);
    }

    #[test]
    fn empty_sections_do_not_swallow_the_next_block() {
        let text = "<<<< SEARCH\n====\nheader\n>>>> REPLACE\n\
                    <<<< SEARCH\nold\n====\n>>>> REPLACE\n\
                    <<<< SEARCH\nx\n====\ny\n>>>> REPLACE";
        assert_eq!(
            parse_diff_blocks(text),
            vec![block("", "header"), block("old", ""), block("x", "y")]
        );
    }

    #[test]
    fn crlf_markers_are_accepted() {
        let blocks = parse_diff_blocks("<<<< SEARCH\r\na\r\n====\r\nb\r\n>>>> REPLACE");
        assert_eq!(blocks, vec![block("a", "b")]);
    }

    #[test]
    fn garbage_yields_no_blocks() {
        assert!(parse_diff_blocks("SEARCH foo REPLACE bar").is_empty());
    }

    #[test]
    fn later_blocks_see_patched_content() {
        let out = apply_blocks(
            Path::new("x.ts"),
            "let a = 1;",
            &[block("a = 1", "a = 2"), block("a = 2", "a = 3")],
        )
        .unwrap();
        assert_eq!(out, "let a = 3;");
    }

    #[test]
    fn replaces_first_occurrence_only() {
        let out = apply_blocks(Path::new("x.ts"), "x x x", &[block("x", "y")]).unwrap();
        assert_eq!(out, "y x x");
    }

    #[tokio::test]
    async fn missing_block_leaves_every_file_untouched() {
        let dir = tempfile::tempdir().expect("tempdir");
        let a = dir.path().join("a.ts");
        let x = dir.path().join("x.ts");
        tokio::fs::write(&a, "export const a = 1;\n").await.unwrap();
        tokio::fs::write(&x, "export const x = 1;\n").await.unwrap();

        let changes = vec![
            FileChange {
                path: a.clone(),
                blocks: vec![block("const a = 1", "const a = 2")],
            },
            FileChange {
                path: x.clone(),
                blocks: vec![block("not in the file", "anything")],
            },
        ];
        let failure = apply_transaction(&changes).await.unwrap_err();
        assert!(matches!(failure.cause, DiffError::BlockNotFound { index: 1, .. }));
        assert!(failure.rollback.is_clean());

        assert_eq!(
            tokio::fs::read_to_string(&a).await.unwrap(),
            "export const a = 1;\n"
        );
        assert_eq!(
            tokio::fs::read_to_string(&x).await.unwrap(),
            "export const x = 1;\n"
        );
    }

    #[tokio::test]
    async fn commit_writes_all_files_and_creates_new_ones() {
        let dir = tempfile::tempdir().expect("tempdir");
        let a = dir.path().join("a.ts");
        let created = dir.path().join("nested").join("new.ts");
        tokio::fs::write(&a, "one\ntwo\n").await.unwrap();

        let changes = vec![
            FileChange {
                path: a.clone(),
                blocks: vec![block("one", "uno"), block("two", "dos")],
            },
            FileChange {
                path: created.clone(),
                blocks: vec![block("", "export {};\n")],
            },
        ];
        let commit = apply_transaction(&changes).await.unwrap();
        assert_eq!(commit.files_touched, 2);
        assert_eq!(tokio::fs::read_to_string(&a).await.unwrap(), "uno\ndos\n");
        assert_eq!(
            tokio::fs::read_to_string(&created).await.unwrap(),
            "export {};\n"
        );
    }

    #[tokio::test]
    async fn same_path_twice_chains_patches() {
        let dir = tempfile::tempdir().expect("tempdir");
        let a = dir.path().join("a.ts");
        tokio::fs::write(&a, "v1").await.unwrap();
        let changes = vec![
            FileChange {
                path: a.clone(),
                blocks: vec![block("v1", "v2")],
            },
            FileChange {
                path: a.clone(),
                blocks: vec![block("v2", "v3")],
            },
        ];
        let commit = apply_transaction(&changes).await.unwrap();
        assert_eq!(commit.files_touched, 1);
        assert_eq!(tokio::fs::read_to_string(&a).await.unwrap(), "v3");
    }

    #[tokio::test]
    async fn restore_removes_created_and_restores_existing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let existing = dir.path().join("keep.ts");
        let created = dir.path().join("fresh.ts");
        tokio::fs::write(&existing, "original").await.unwrap();

        let changes = vec![
            FileChange {
                path: existing.clone(),
                blocks: vec![block("original", "patched")],
            },
            FileChange {
                path: created.clone(),
                blocks: vec![block("", "new")],
            },
        ];
        let backup = TransactionBackup::capture(&changes).await.unwrap();
        assert_eq!(backup.get(&created), Some(&Snapshot::Missing));

        tokio::fs::write(&existing, "patched").await.unwrap();
        tokio::fs::write(&created, "new").await.unwrap();

        let report = backup
            .restore(&[existing.clone(), created.clone()])
            .await;
        assert!(report.is_clean());
        assert_eq!(report.restored, vec![existing.clone()]);
        assert_eq!(report.removed, vec![created.clone()]);
        assert_eq!(
            tokio::fs::read_to_string(&existing).await.unwrap(),
            "original"
        );
        assert!(!created.exists());
    }

    #[tokio::test]
    async fn empty_block_list_is_rejected_before_io() {
        let failure = apply_transaction(&[FileChange {
            path: PathBuf::from("/nonexistent/a.ts"),
            blocks: vec![],
        }])
        .await
        .unwrap_err();
        assert!(matches!(failure.cause, DiffError::NoBlocks(_)));
    }
}
