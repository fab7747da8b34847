//! Shared host registry file, host side.
//!
//! Every running host upserts its own [`HostRecord`] (keyed by `hostPath`)
//! on registration and removes it on shutdown.  Several host processes
//! share the file, so every read-modify-write holds an `fs2` exclusive lock
//! on a sidecar `<file>.lock`.  The list is rewritten through a uniquely
//! named temp file + rename so readers rarely observe a torn write; readers
//! must tolerate one anyway.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use hl_protocol::{parse_host_file, HostRecord};
use tempfile::NamedTempFile;

pub struct HostFile {
    path: PathBuf,
}

impl HostFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current records.  Missing or unparsable files read as empty.
    pub fn read(&self) -> Vec<HostRecord> {
        match fs::read_to_string(&self.path) {
            Ok(raw) => parse_host_file(&raw).unwrap_or_else(|e| {
                tracing::warn!(path = %self.path.display(), error = %e, "ignoring unparsable host file");
                Vec::new()
            }),
            Err(_) => Vec::new(),
        }
    }

    /// Insert or replace the record for `record.host_path`.
    pub fn upsert(&self, record: HostRecord) -> hl_domain::Result<()> {
        let _lock = self.lock()?;
        let mut records = self.read();
        records.retain(|r| r.host_path != record.host_path);
        tracing::debug!(path = %self.path.display(), host_path = %record.host_path, "publishing host record");
        records.push(record);
        self.write(&records)
    }

    /// Drop the record for `host_path`.  Returns whether one was present.
    pub fn remove(&self, host_path: &str) -> hl_domain::Result<bool> {
        let _lock = self.lock()?;
        let mut records = self.read();
        let before = records.len();
        records.retain(|r| r.host_path != host_path);
        if records.len() == before {
            return Ok(false);
        }
        self.write(&records)?;
        Ok(true)
    }

    /// Exclusive lock shared with every other writer of this file.
    /// Released when the returned handle drops.
    fn lock(&self) -> hl_domain::Result<File> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut lock_name = self.path.as_os_str().to_owned();
        lock_name.push(".lock");
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(PathBuf::from(lock_name))?;
        file.lock_exclusive()?;
        Ok(file)
    }

    fn write(&self, records: &[HostRecord]) -> hl_domain::Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let json = serde_json::to_string_pretty(records)?;
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(json.as_bytes())?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}
