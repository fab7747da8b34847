//! Reading and watching the shared host file.

use std::path::{Path, PathBuf};

use hl_protocol::{parse_host_file, HostRecord};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

/// Result of one read of the host file.
#[derive(Debug)]
pub enum HostFileRead {
    Parsed(Vec<HostRecord>),
    /// No file yet: no candidates.
    Missing,
    /// Hosts rewrite the file wholesale, so a reader can catch it half
    /// written.  Callers keep what they had and try again next change.
    Unparsable(String),
}

pub fn read_host_file(path: &Path) -> HostFileRead {
    match std::fs::read_to_string(path) {
        Ok(raw) => match parse_host_file(&raw) {
            Ok(records) => HostFileRead::Parsed(records),
            Err(e) => HostFileRead::Unparsable(e.to_string()),
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => HostFileRead::Missing,
        Err(e) => HostFileRead::Unparsable(e.to_string()),
    }
}

/// Watch the directory holding `path` and signal `tx` whenever an entry
/// with that file name is created, modified or removed.  The returned
/// watcher stops when dropped.
pub fn watch_host_file(path: &Path, tx: mpsc::Sender<()>) -> notify::Result<RecommendedWatcher> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    std::fs::create_dir_all(&dir).map_err(notify::Error::io)?;

    let file_name = path.file_name().map(|n| n.to_os_string());
    let mut watcher = RecommendedWatcher::new(
        move |res: Result<notify::Event, notify::Error>| match res {
            Ok(event) => {
                let relevant = matches!(
                    event.kind,
                    EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)
                ) && event
                    .paths
                    .iter()
                    .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name);
                if relevant {
                    let _ = tx.try_send(());
                }
            }
            Err(err) => {
                tracing::warn!(%err, "host file watcher error");
            }
        },
        notify::Config::default(),
    )?;
    watcher.watch(&dir, RecursiveMode::NonRecursive)?;
    tracing::debug!(directory = %dir.display(), "watching host file directory");
    Ok(watcher)
}
