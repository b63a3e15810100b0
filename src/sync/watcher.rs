//! Filesystem notifications
//!
//! Wraps a `notify` recursive watcher and flattens its platform-specific
//! event kinds into [`FsEvent`]s on a tokio channel. Renames are reported as
//! separate from/to halves; a directory renamed into the tree is expanded so
//! that every file inside it is reported as added.

use notify::event::{CreateKind, MetadataKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Event as NotifyEvent, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// A single filesystem change, with absolute paths
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsEvent {
    Added(PathBuf),
    Changed(PathBuf),
    Removed(PathBuf),
    RenamedFrom(PathBuf),
    RenamedTo(PathBuf),
    DirAdded(PathBuf),
    DirRemoved(PathBuf),
    WatchError(String),
    /// All files present at startup have been reported
    Ready,
}

/// Live recursive watch; dropping it stops notifications
pub struct FsWatcher {
    _watcher: RecommendedWatcher,
}

impl FsWatcher {
    /// Watch `root` recursively, sending translated events to `tx`.
    ///
    /// `root` should be canonical so reported paths share its prefix.
    pub fn start(root: &Path, tx: mpsc::Sender<FsEvent>) -> notify::Result<Self> {
        let mut translator = Translator::new(root.to_path_buf(), known_dirs(root));

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<NotifyEvent>| {
            for event in translator.translate(res) {
                // Receiver gone means the engine stopped
                if tx.blocking_send(event).is_err() {
                    return;
                }
            }
        })?;
        watcher.watch(root, RecursiveMode::Recursive)?;

        debug!(root = %root.display(), "Watching");
        Ok(Self { _watcher: watcher })
    }
}

/// Every file and directory under `root` as `Added`/`DirAdded`, parents first.
/// Unreadable subdirectories are reported as `WatchError`.
pub fn scan_tree(root: &Path) -> Vec<FsEvent> {
    let mut events = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                events.push(FsEvent::WatchError(format!(
                    "cannot read {}: {}",
                    dir.display(),
                    e
                )));
                continue;
            }
        };

        let mut children: Vec<_> = entries.filter_map(|e| e.ok()).collect();
        children.sort_by_key(|e| e.file_name());

        for child in children {
            let path = child.path();
            match child.file_type() {
                Ok(t) if t.is_dir() => {
                    events.push(FsEvent::DirAdded(path.clone()));
                    pending.push(path);
                }
                Ok(t) if t.is_file() => events.push(FsEvent::Added(path)),
                // Symlinks and specials are resolved the same way the ingest read does
                Ok(_) => {
                    if path.is_file() {
                        events.push(FsEvent::Added(path));
                    }
                }
                Err(e) => {
                    events.push(FsEvent::WatchError(format!(
                        "cannot stat {}: {}",
                        path.display(),
                        e
                    )))
                }
            }
        }
    }

    events
}

fn known_dirs(root: &Path) -> Arc<Mutex<HashSet<PathBuf>>> {
    let dirs = scan_tree(root)
        .into_iter()
        .filter_map(|event| match event {
            FsEvent::DirAdded(path) => Some(path),
            _ => None,
        })
        .collect();
    Arc::new(Mutex::new(dirs))
}

/// Maps raw `notify` events to [`FsEvent`]s.
///
/// Tracks which paths are directories so that removals and renames reported
/// without a kind (common on some backends) can still be classified.
pub(crate) struct Translator {
    root: PathBuf,
    dirs: Arc<Mutex<HashSet<PathBuf>>>,
    /// Target of the last `To` half, so a trailing paired event is not
    /// reported twice
    last_renamed_to: Option<PathBuf>,
}

impl Translator {
    pub(crate) fn new(root: PathBuf, dirs: Arc<Mutex<HashSet<PathBuf>>>) -> Self {
        Self {
            root,
            dirs,
            last_renamed_to: None,
        }
    }

    pub(crate) fn translate(&mut self, res: notify::Result<NotifyEvent>) -> Vec<FsEvent> {
        let event = match res {
            Ok(event) => event,
            Err(e) => return vec![FsEvent::WatchError(e.to_string())],
        };
        trace!(?event, "notify");

        let mut out = Vec::new();
        match event.kind {
            EventKind::Create(CreateKind::File) => {
                // inotify reports fifos and sockets as files too
                out.extend(
                    event
                        .paths
                        .into_iter()
                        .filter(|path| path.is_file())
                        .map(FsEvent::Added),
                );
            }
            EventKind::Create(CreateKind::Folder) => {
                for path in event.paths {
                    self.remember_dir(&path);
                    out.push(FsEvent::DirAdded(path));
                }
            }
            EventKind::Create(_) => {
                for path in event.paths {
                    if path.is_dir() {
                        self.remember_dir(&path);
                        out.push(FsEvent::DirAdded(path));
                    } else if path.is_file() {
                        out.push(FsEvent::Added(path));
                    }
                }
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
                for path in event.paths {
                    self.moved_out(path, &mut out);
                }
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
                for path in event.paths {
                    self.last_renamed_to = Some(path.clone());
                    self.moved_in(path, &mut out);
                }
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
                let mut paths = event.paths.into_iter();
                let (Some(from), Some(to)) = (paths.next(), paths.next()) else {
                    return out;
                };
                // inotify sends From and To before the paired event
                if self.last_renamed_to.take().as_ref() != Some(&to) {
                    self.moved_out(from, &mut out);
                    self.moved_in(to, &mut out);
                }
            }
            EventKind::Modify(ModifyKind::Name(_)) => {
                for path in event.paths {
                    if path.exists() {
                        self.moved_in(path, &mut out);
                    } else {
                        self.moved_out(path, &mut out);
                    }
                }
            }
            EventKind::Modify(ModifyKind::Data(_))
            | EventKind::Modify(ModifyKind::Any)
            | EventKind::Modify(ModifyKind::Metadata(MetadataKind::Any))
            | EventKind::Modify(ModifyKind::Metadata(MetadataKind::WriteTime)) => {
                out.extend(
                    event
                        .paths
                        .into_iter()
                        .filter(|p| p.is_file())
                        .map(FsEvent::Changed),
                );
            }
            EventKind::Remove(RemoveKind::File) => {
                for path in event.paths {
                    self.removed(path, false, &mut out);
                }
            }
            EventKind::Remove(RemoveKind::Folder) => {
                for path in event.paths {
                    self.removed(path, true, &mut out);
                }
            }
            EventKind::Remove(_) => {
                for path in event.paths {
                    let is_dir = self.is_known_dir(&path);
                    self.removed(path, is_dir, &mut out);
                }
            }
            EventKind::Modify(_) | EventKind::Access(_) | EventKind::Any | EventKind::Other => {}
        }
        out
    }

    fn removed(&mut self, path: PathBuf, is_dir: bool, out: &mut Vec<FsEvent>) {
        if path == self.root {
            out.push(FsEvent::WatchError(format!(
                "watch root {} was removed",
                path.display()
            )));
        } else if is_dir {
            self.forget_dir(&path);
            out.push(FsEvent::DirRemoved(path));
        } else {
            out.push(FsEvent::Removed(path));
        }
    }

    fn moved_out(&mut self, path: PathBuf, out: &mut Vec<FsEvent>) {
        if path == self.root {
            out.push(FsEvent::WatchError(format!(
                "watch root {} was moved",
                path.display()
            )));
        } else if self.is_known_dir(&path) {
            self.forget_dir(&path);
            out.push(FsEvent::DirRemoved(path));
        } else {
            out.push(FsEvent::RenamedFrom(path));
        }
    }

    fn moved_in(&mut self, path: PathBuf, out: &mut Vec<FsEvent>) {
        if path.is_dir() {
            self.remember_dir(&path);
            out.push(FsEvent::DirAdded(path.clone()));
            // Nothing inside a moved directory gets its own create event
            for event in scan_tree(&path) {
                if let FsEvent::DirAdded(dir) = &event {
                    self.remember_dir(dir);
                }
                out.push(event);
            }
        } else if path.is_file() {
            out.push(FsEvent::RenamedTo(path));
        }
    }

    fn is_known_dir(&self, path: &Path) -> bool {
        self.dirs
            .lock()
            .map(|dirs| dirs.contains(path))
            .unwrap_or(false)
    }

    fn remember_dir(&self, path: &Path) {
        if let Ok(mut dirs) = self.dirs.lock() {
            dirs.insert(path.to_path_buf());
        }
    }

    fn forget_dir(&self, path: &Path) {
        if let Ok(mut dirs) = self.dirs.lock() {
            dirs.retain(|d| !d.starts_with(path));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn translator(root: &Path) -> Translator {
        Translator::new(root.to_path_buf(), Arc::new(Mutex::new(HashSet::new())))
    }

    fn notify_event(kind: EventKind, paths: Vec<PathBuf>) -> notify::Result<NotifyEvent> {
        let mut event = NotifyEvent::new(kind);
        event.paths = paths;
        Ok(event)
    }

    #[test]
    fn test_scan_tree_reports_nested_files() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("docs")).unwrap();
        std::fs::write(dir.path().join("a.txt"), b"a").unwrap();
        std::fs::write(dir.path().join("docs/b.txt"), b"b").unwrap();

        let events = scan_tree(dir.path());
        assert!(events.contains(&FsEvent::Added(dir.path().join("a.txt"))));
        assert!(events.contains(&FsEvent::DirAdded(dir.path().join("docs"))));
        assert!(events.contains(&FsEvent::Added(dir.path().join("docs/b.txt"))));
        assert_eq!(events.len(), 3);
    }

    #[test]
    fn test_rename_both_splits_into_halves() {
        let dir = TempDir::new().unwrap();
        let to = dir.path().join("b.txt");
        std::fs::write(&to, b"x").unwrap();
        let from = dir.path().join("a.txt");

        let mut t = translator(dir.path());
        let out = t.translate(notify_event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            vec![from.clone(), to.clone()],
        ));
        assert_eq!(out, vec![FsEvent::RenamedFrom(from), FsEvent::RenamedTo(to)]);
    }

    #[test]
    fn test_paired_rename_after_halves_is_not_repeated() {
        let dir = TempDir::new().unwrap();
        let from = dir.path().join("a.txt");
        let to = dir.path().join("b.txt");
        std::fs::write(&to, b"x").unwrap();

        let mut t = translator(dir.path());
        let rename = |mode| EventKind::Modify(ModifyKind::Name(mode));
        let mut out = t.translate(notify_event(rename(RenameMode::From), vec![from.clone()]));
        out.extend(t.translate(notify_event(rename(RenameMode::To), vec![to.clone()])));
        out.extend(t.translate(notify_event(
            rename(RenameMode::Both),
            vec![from.clone(), to.clone()],
        )));
        assert_eq!(out, vec![FsEvent::RenamedFrom(from), FsEvent::RenamedTo(to)]);
    }

    #[test]
    fn test_directory_moved_in_reports_contents() {
        let dir = TempDir::new().unwrap();
        let moved = dir.path().join("incoming");
        std::fs::create_dir(&moved).unwrap();
        std::fs::write(moved.join("c.txt"), b"c").unwrap();

        let mut t = translator(dir.path());
        let out = t.translate(notify_event(
            EventKind::Modify(ModifyKind::Name(RenameMode::To)),
            vec![moved.clone()],
        ));
        assert_eq!(
            out,
            vec![
                FsEvent::DirAdded(moved.clone()),
                FsEvent::Added(moved.join("c.txt")),
            ]
        );

        // Later removal without a kind is still classified as a directory
        std::fs::remove_dir_all(&moved).unwrap();
        let out = t.translate(notify_event(
            EventKind::Remove(RemoveKind::Any),
            vec![moved.clone()],
        ));
        assert_eq!(out, vec![FsEvent::DirRemoved(moved)]);
    }

    #[test]
    fn test_root_removal_is_a_watch_error() {
        let dir = TempDir::new().unwrap();
        let mut t = translator(dir.path());
        let out = t.translate(notify_event(
            EventKind::Remove(RemoveKind::Folder),
            vec![dir.path().to_path_buf()],
        ));
        assert!(matches!(out.as_slice(), [FsEvent::WatchError(_)]));
    }

    #[test]
    fn test_access_events_ignored() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, b"x").unwrap();

        let mut t = translator(dir.path());
        let out = t.translate(notify_event(
            EventKind::Access(notify::event::AccessKind::Read),
            vec![file.clone()],
        ));
        assert!(out.is_empty());

        let out = t.translate(notify_event(
            EventKind::Modify(ModifyKind::Metadata(MetadataKind::WriteTime)),
            vec![file.clone()],
        ));
        assert_eq!(out, vec![FsEvent::Changed(file)]);
    }

    #[cfg(unix)]
    #[test]
    fn test_created_fifo_is_not_reported() {
        let dir = TempDir::new().unwrap();
        let pipe = dir.path().join("pipe");
        let status = std::process::Command::new("mkfifo").arg(&pipe).status().unwrap();
        assert!(status.success());
        let file = dir.path().join("a.txt");
        std::fs::write(&file, b"x").unwrap();

        let mut t = translator(dir.path());
        let out = t.translate(notify_event(
            EventKind::Create(CreateKind::File),
            vec![pipe.clone(), file.clone()],
        ));
        assert_eq!(out, vec![FsEvent::Added(file)]);

        let out = t.translate(notify_event(EventKind::Create(CreateKind::Any), vec![pipe]));
        assert!(out.is_empty());
        assert_eq!(
            scan_tree(dir.path()),
            vec![FsEvent::Added(dir.path().join("a.txt"))]
        );
    }
}
