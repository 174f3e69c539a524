//! Workspace file watcher.
//!
//! Change notifications are batched on a fixed interval; each batch re-indexes the
//! touched source files and then refreshes their dependency-graph nodes. Runs on its own
//! task, independent of any agent task.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Event as NotifyEvent, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::SemanticIndex;
use crate::graph::SharedGraph;
use crate::syntax;
use crate::util::normalize_path;
use crate::workspace::is_skipped_source_dir;

/// Interval at which pending notifications are processed.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(300);

/// Notifications buffered between flushes before new ones are dropped.
const WATCH_QUEUE_CAPACITY: usize = 1024;

/// Keeps the watcher alive; dropping it stops watching.
pub struct WatchHandle {
    task: JoinHandle<()>,
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Start watching `root`.
pub fn spawn_watcher(
    root: PathBuf,
    index: Option<Arc<SemanticIndex>>,
    graph: SharedGraph,
    flush_interval: Duration,
) -> anyhow::Result<WatchHandle> {
    let (tx, mut rx) = mpsc::channel::<NotifyEvent>(WATCH_QUEUE_CAPACITY);

    let mut watcher = RecommendedWatcher::new(
        move |res: Result<NotifyEvent, notify::Error>| match res {
            Ok(event) => {
                forward_event(&tx, event);
            }
            Err(e) => warn!("watch error: {}", e),
        },
        notify::Config::default(),
    )?;
    watcher.watch(&root, RecursiveMode::Recursive)?;
    info!(path = %root.display(), "watching workspace");

    let task = tokio::spawn(async move {
        // Moved in so the watcher lives as long as the task.
        let _watcher = watcher;
        let mut pending: Vec<NotifyEvent> = Vec::new();
        let mut flush_tick = tokio::time::interval(flush_interval);
        flush_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                maybe = rx.recv() => match maybe {
                    Some(event) => pending.push(event),
                    None => break,
                },
                _ = flush_tick.tick() => {
                    if pending.is_empty() {
                        continue;
                    }
                    let batch = std::mem::take(&mut pending);
                    process_events(&root, index.as_deref(), &graph, &batch).await;
                }
            }
        }
    });

    Ok(WatchHandle { task })
}

/// Queue a notification for the next batch. Runs on the notify thread, so it never
/// blocks: a full queue drops the event and those paths stay stale until they change again.
fn forward_event(tx: &mpsc::Sender<NotifyEvent>, event: NotifyEvent) -> bool {
    match tx.try_send(event) {
        Ok(()) => true,
        Err(TrySendError::Full(event)) => {
            warn!(paths = ?event.paths, "watch queue full, change notification dropped");
            false
        }
        Err(TrySendError::Closed(_)) => {
            debug!("watcher task stopped, change notification dropped");
            false
        }
    }
}

/// Changed and removed source files in a batch of notifications.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub changed: BTreeSet<PathBuf>,
    pub removed: BTreeSet<PathBuf>,
}

/// Whether a path under `root` is a source file outside dot and ignored directories.
pub fn is_watched(root: &Path, path: &Path) -> bool {
    let Ok(relative) = path.strip_prefix(root) else {
        return false;
    };
    let hidden_or_skipped = relative.components().any(|c| {
        let name = c.as_os_str().to_string_lossy();
        name.starts_with('.') || is_skipped_source_dir(&name)
    });
    !hidden_or_skipped && syntax::is_source_file(path)
}

pub fn collect_changes(root: &Path, events: &[NotifyEvent]) -> ChangeSet {
    let mut set = ChangeSet::default();
    for event in events {
        let removed = match event.kind {
            EventKind::Create(_) | EventKind::Modify(_) => false,
            EventKind::Remove(_) => true,
            _ => continue,
        };
        for path in &event.paths {
            let path = normalize_path(path);
            if !is_watched(root, &path) {
                continue;
            }
            if removed {
                set.changed.remove(&path);
                set.removed.insert(path);
            } else {
                set.removed.remove(&path);
                set.changed.insert(path);
            }
        }
    }
    set
}

/// Apply one batch: re-index, then refresh the graph node.
pub async fn process_events(
    root: &Path,
    index: Option<&SemanticIndex>,
    graph: &SharedGraph,
    events: &[NotifyEvent],
) {
    let changes = collect_changes(root, events);

    for path in &changes.changed {
        debug!("File changed: {}", path.display());
        if let Some(index) = index {
            if let Err(e) = index.index_file(path).await {
                warn!("Re-index of {} failed: {}", path.display(), e);
            }
        }
        graph.write().await.update_file(path).await;
    }

    for path in &changes.removed {
        debug!("File removed: {}", path.display());
        if let Some(index) = index {
            if let Err(e) = index.remove_file(path).await {
                warn!("Index cleanup of {} failed: {}", path.display(), e);
            }
        }
        graph.write().await.remove_file(path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::CodeGraph;
    use crate::index::testing::CountingEmbedder;
    use crate::index::InMemoryChunkStore;
    use notify::event::{CreateKind, ModifyKind, RemoveKind};
    use tokio::sync::RwLock;

    fn event(kind: EventKind, path: &Path) -> NotifyEvent {
        NotifyEvent::new(kind).add_path(path.to_path_buf())
    }

    #[test]
    fn full_queue_drops_notifications_without_blocking() {
        let (tx, mut rx) = mpsc::channel(1);
        let modified = || event(EventKind::Modify(ModifyKind::Any), Path::new("/ws/a.ts"));

        assert!(forward_event(&tx, modified()));
        assert!(!forward_event(&tx, modified()));
        assert_eq!(rx.try_recv().unwrap().paths, vec![PathBuf::from("/ws/a.ts")]);
        assert!(rx.try_recv().is_err());

        drop(rx);
        assert!(!forward_event(&tx, modified()));
    }

    #[test]
    fn ignores_dot_dirs_skip_dirs_and_non_source() {
        let root = Path::new("/ws");
        assert!(is_watched(root, Path::new("/ws/src/a.ts")));
        assert!(!is_watched(root, Path::new("/ws/.workbench/index.db")));
        assert!(!is_watched(root, Path::new("/ws/.git/HEAD")));
        assert!(!is_watched(root, Path::new("/ws/node_modules/x/index.js")));
        assert!(!is_watched(root, Path::new("/ws/dist/a.js")));
        assert!(is_watched(root, Path::new("/ws/src/bin/cli.ts")));
        assert!(!is_watched(root, Path::new("/ws/README.md")));
        assert!(!is_watched(root, Path::new("/elsewhere/a.ts")));
    }

    #[test]
    fn later_events_win_per_path() {
        let root = Path::new("/ws");
        let a = Path::new("/ws/a.ts");
        let b = Path::new("/ws/b.ts");
        let events = vec![
            event(EventKind::Create(CreateKind::File), a),
            event(EventKind::Remove(RemoveKind::File), a),
            event(EventKind::Remove(RemoveKind::File), b),
            event(EventKind::Modify(ModifyKind::Any), b),
            event(EventKind::Access(notify::event::AccessKind::Any), Path::new("/ws/c.ts")),
        ];
        let set = collect_changes(root, &events);
        assert_eq!(set.changed, BTreeSet::from([b.to_path_buf()]));
        assert_eq!(set.removed, BTreeSet::from([a.to_path_buf()]));
    }

    #[tokio::test]
    async fn batch_reindexes_then_refreshes_graph() {
        let dir = tempfile::tempdir().unwrap();
        let root = normalize_path(dir.path());
        let a = root.join("a.ts");
        let b = root.join("b.ts");
        tokio::fs::write(&a, "export function a() {\n  return 1;\n}\n")
            .await
            .unwrap();
        tokio::fs::write(&b, "export const b = () => 2;\n").await.unwrap();

        let graph: SharedGraph = Arc::new(RwLock::new(CodeGraph::build(&root).await));
        let embedder = Arc::new(CountingEmbedder::default());
        let index = SemanticIndex::new(Arc::new(InMemoryChunkStore::new()), embedder.clone());
        assert!(graph.read().await.blast_radius(&b, 1).is_empty());

        tokio::fs::write(&a, "import { b } from './b';\nexport function a() {\n  return b();\n}\n")
            .await
            .unwrap();
        let events = vec![event(EventKind::Modify(ModifyKind::Any), &a)];
        process_events(&root, Some(&index), &graph, &events).await;

        assert_eq!(graph.read().await.blast_radius(&b, 1), vec![a.clone()]);
        assert_eq!(embedder.texts_embedded(), 1);
        assert_eq!(index.store().len().await.unwrap(), 1);
    }
}
