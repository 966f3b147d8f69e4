//! Filesystem watcher feeding the debouncer

use anyhow::Result;
use notify::event::{EventKind, ModifyKind};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use sett_indexer::scanner::{self, IGNORED_DIRS};
use sett_indexer::FileFilter;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::debounce::ChangeKind;

/// A relevant change under the watched root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathEvent {
    pub path: PathBuf,
    pub kind: ChangeKind,
}

impl PathEvent {
    pub fn new(path: impl Into<PathBuf>, kind: ChangeKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }
}

/// Recursive watch on a workspace root. Events are filtered to paths the
/// indexer would accept, plus removals that may be whole directories.
/// Dropping the watcher closes the event channel.
pub struct FileWatcher {
    watcher: RecommendedWatcher,
    root: PathBuf,
}

impl FileWatcher {
    pub fn start(
        root: impl AsRef<Path>,
        filter: FileFilter,
    ) -> Result<(Self, mpsc::UnboundedReceiver<PathEvent>)> {
        let root = root.as_ref().to_path_buf();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let callback_root = root.clone();
        let mut watcher =
            notify::recommended_watcher(move |res: notify::Result<notify::Event>| match res {
                Ok(event) => {
                    debug!("File system event: {:?}", event);
                    for ev in translate(&callback_root, &filter, event) {
                        if event_tx.send(ev).is_err() {
                            warn!("Watch event dropped: receiver closed");
                            return;
                        }
                    }
                }
                Err(e) => error!("File system watch error: {}", e),
            })?;

        watcher.watch(&root, RecursiveMode::Recursive)?;
        info!("Watching directory: {}", root.display());
        Ok((Self { watcher, root }, event_rx))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn stop(mut self) -> Result<()> {
        self.watcher.unwatch(&self.root)?;
        info!("Stopped watching {}", self.root.display());
        Ok(())
    }
}

/// Map one notify event onto zero or more path events.
fn translate(root: &Path, filter: &FileFilter, event: notify::Event) -> Vec<PathEvent> {
    let rename = matches!(event.kind, EventKind::Modify(ModifyKind::Name(_)));
    let base = match event.kind {
        EventKind::Create(_) => ChangeKind::Created,
        EventKind::Modify(_) => ChangeKind::Modified,
        EventKind::Remove(_) => ChangeKind::Deleted,
        _ => return Vec::new(),
    };

    event
        .paths
        .into_iter()
        .filter_map(|path| {
            // Renames report both ends; the side that still exists is new
            let kind = if rename {
                if path.exists() {
                    ChangeKind::Created
                } else {
                    ChangeKind::Deleted
                }
            } else {
                base
            };
            relevant(root, filter, &path, kind).then(|| PathEvent::new(path, kind))
        })
        .collect()
}

fn relevant(root: &Path, filter: &FileFilter, path: &Path, kind: ChangeKind) -> bool {
    let Some(rel) = scanner::relativize(root, path) else {
        return false;
    };
    if filter.accepts(&rel) {
        return true;
    }
    // A vanished directory can't be told apart from a vanished file by
    // extension, so removals outside ignored trees pass through
    kind == ChangeKind::Deleted && !should_ignore_path(&rel)
}

fn should_ignore_path(rel: &str) -> bool {
    rel.split('/').any(|part| IGNORED_DIRS.contains(&part))
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, RemoveKind, RenameMode};
    use sett_indexer::SettConfig;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    fn filter() -> FileFilter {
        FileFilter::new(&SettConfig::default()).unwrap()
    }

    fn event(kind: EventKind, paths: &[PathBuf]) -> notify::Event {
        let mut ev = notify::Event::new(kind);
        for p in paths {
            ev = ev.add_path(p.clone());
        }
        ev
    }

    #[test]
    fn translate_keeps_indexable_paths_only() {
        let root = Path::new("/repo");
        let ev = event(
            EventKind::Modify(ModifyKind::Data(DataChange::Content)),
            &[
                root.join("src/a.c"),
                root.join("notes.txt"),
                root.join("target/gen.c"),
                PathBuf::from("/elsewhere/b.c"),
            ],
        );
        let out = translate(root, &filter(), ev);
        assert_eq!(out, vec![PathEvent::new(root.join("src/a.c"), ChangeKind::Modified)]);
    }

    #[test]
    fn removals_pass_through_for_directories() {
        let root = Path::new("/repo");
        let ev = event(
            EventKind::Remove(RemoveKind::Folder),
            &[root.join("src/legacy"), root.join(".git/objects")],
        );
        let out = translate(root, &filter(), ev);
        assert_eq!(out, vec![PathEvent::new(root.join("src/legacy"), ChangeKind::Deleted)]);
    }

    #[test]
    fn rename_maps_each_side_by_existence() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::write(root.join("new.py"), "X = 1\n").unwrap();
        let ev = event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &[root.join("old.py"), root.join("new.py")],
        );
        let out = translate(root, &filter(), ev);
        assert_eq!(
            out,
            vec![
                PathEvent::new(root.join("old.py"), ChangeKind::Deleted),
                PathEvent::new(root.join("new.py"), ChangeKind::Created),
            ]
        );
    }

    #[test]
    fn access_events_are_ignored() {
        let root = Path::new("/repo");
        let ev = event(
            EventKind::Access(notify::event::AccessKind::Any),
            &[root.join("a.c")],
        );
        assert!(translate(root, &filter(), ev).is_empty());
        let ev = event(EventKind::Create(CreateKind::File), &[root.join("a.c")]);
        assert_eq!(translate(root, &filter(), ev).len(), 1);
    }

    #[tokio::test]
    async fn watcher_reports_file_writes() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().canonicalize().unwrap();
        let (watcher, mut rx) = FileWatcher::start(&root, filter()).unwrap();

        fs::write(root.join("main.c"), "int main(void) { return 0; }\n").unwrap();
        let ev = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no event within timeout")
            .unwrap();
        assert_eq!(ev.path, root.join("main.c"));

        watcher.stop().unwrap();
    }
}
