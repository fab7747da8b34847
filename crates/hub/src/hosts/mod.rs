//! Host Registry: candidate hosts from the shared host file, with live
//! reachability and an active selection.
//!
//! The file is the source of truth for *which* hosts exist.  Status is an
//! overlay computed here from health probes and is never read from disk.
//!
//! Probing runs on two clocks:
//! - a periodic sweep (`health_interval`) over every entry in `Sweep` mode
//! - per-entry backoff after a connected entry drops: re-probes 1s, 2s, 4s,
//!   8s, 16s apart, then the entry is parked until the file changes or
//!   [`HostRegistry::retry`] is called

pub mod discovery;
pub mod health;
pub mod selection;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use hl_domain::config::RegistryConfig;
use hl_domain::identity::host_identity_hash;
use hl_protocol::HostRecord;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{mpsc, Notify};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use discovery::{read_host_file, watch_host_file, HostFileRead};
use health::HealthProbe;

/// File events closer together than this collapse into one reload.
const RELOAD_DEBOUNCE: Duration = Duration::from_millis(200);

/// Delay before the first re-probe of a dropped entry.  Doubles per failure.
const REPROBE_BASE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HostStatus {
    Connected,
    Disconnected,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Retry {
    /// Probed on every sweep.
    Sweep,
    /// Dropped after being connected; probed at `next_at`.
    Backoff { failures: u32, next_at: Instant },
    /// Gave up; waits for a file change or an explicit retry.
    Parked,
}

/// A candidate host plus its live overlay.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HostEntry {
    #[serde(flatten)]
    pub record: HostRecord,
    pub identity_hash: String,
    pub status: HostStatus,
    /// Unreachable for at least `stale_after`.
    pub stale: bool,
    #[serde(skip)]
    unreachable_since: Option<Instant>,
    #[serde(skip)]
    retry: Retry,
}

impl HostEntry {
    pub fn new(record: HostRecord) -> Self {
        Self {
            identity_hash: host_identity_hash(&record.host_path),
            record,
            status: HostStatus::Unknown,
            stale: false,
            unreachable_since: None,
            retry: Retry::Sweep,
        }
    }

    /// Whether the entry exhausted its re-probes.
    pub fn parked(&self) -> bool {
        self.retry == Retry::Parked
    }
}

#[derive(Debug, Clone)]
pub struct RegistrySettings {
    pub health_interval: Duration,
    pub stale_after: Duration,
    pub retry_max_attempts: u32,
}

impl RegistrySettings {
    pub fn from_config(config: &RegistryConfig) -> Self {
        Self {
            health_interval: config.health_interval(),
            stale_after: config.stale_after(),
            retry_max_attempts: config.retry_max_attempts,
        }
    }
}

/// Entries in file order plus the active host path.
#[derive(Debug, Clone, Serialize)]
pub struct RegistrySnapshot {
    pub entries: Vec<HostEntry>,
    pub active: Option<String>,
}

#[derive(Default)]
struct RegistryState {
    entries: Vec<HostEntry>,
    active: Option<String>,
}

pub struct HostRegistry {
    path: PathBuf,
    settings: RegistrySettings,
    probe: Arc<dyn HealthProbe>,
    state: RwLock<RegistryState>,
    /// Poked by `retry` so the run loop re-evaluates backoff deadlines.
    wake: Notify,
}

impl HostRegistry {
    pub fn new(path: PathBuf, settings: RegistrySettings, probe: Arc<dyn HealthProbe>) -> Self {
        Self {
            path,
            settings,
            probe,
            state: RwLock::new(RegistryState::default()),
            wake: Notify::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn list(&self) -> Vec<HostEntry> {
        self.state.read().entries.clone()
    }

    pub fn active(&self) -> Option<HostEntry> {
        let state = self.state.read();
        let active = state.active.as_deref()?;
        state
            .entries
            .iter()
            .find(|e| e.record.host_path == active)
            .cloned()
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        let state = self.state.read();
        RegistrySnapshot {
            entries: state.entries.clone(),
            active: state.active.clone(),
        }
    }

    pub fn find(&self, host_path: &str) -> Option<HostEntry> {
        self.state
            .read()
            .entries
            .iter()
            .find(|e| e.record.host_path == host_path)
            .cloned()
    }

    // ── Candidates ───────────────────────────────────────────────────

    /// Re-read the host file.  Returns `false` when the content could not
    /// be parsed and the previous candidates were kept.
    pub fn reload(&self) -> bool {
        match read_host_file(&self.path) {
            HostFileRead::Parsed(records) => {
                self.replace_candidates(records);
                true
            }
            HostFileRead::Missing => {
                self.replace_candidates(Vec::new());
                true
            }
            HostFileRead::Unparsable(reason) => {
                tracing::warn!(
                    path = %self.path.display(),
                    reason = %reason,
                    "host file unparsable, keeping previous entries"
                );
                false
            }
        }
    }

    /// Replace the candidate list, keeping the live overlay of entries that
    /// are still listed.  Parked entries get another chance.
    pub fn replace_candidates(&self, records: Vec<HostRecord>) {
        let mut state = self.state.write();
        let mut previous = std::mem::take(&mut state.entries);

        let mut entries = Vec::with_capacity(records.len());
        for record in records {
            if entries
                .iter()
                .any(|e: &HostEntry| e.record.host_path == record.host_path)
            {
                continue;
            }
            let entry = match previous
                .iter()
                .position(|e| e.record.host_path == record.host_path)
            {
                Some(idx) => {
                    let mut kept = previous.swap_remove(idx);
                    kept.record = record;
                    if kept.retry == Retry::Parked {
                        kept.retry = Retry::Sweep;
                    }
                    kept
                }
                None => HostEntry::new(record),
            };
            entries.push(entry);
        }

        for gone in &previous {
            tracing::debug!(host_path = %gone.record.host_path, "host left the registry");
        }
        tracing::debug!(count = entries.len(), "host candidates loaded");
        state.entries = entries;
        reselect(&mut state);
    }

    // ── Probing ──────────────────────────────────────────────────────

    /// Records to probe now.  `sweep` includes every entry in sweep mode;
    /// backoff entries are included once their deadline passes.
    fn due_probes(&self, now: Instant, sweep: bool) -> Vec<HostRecord> {
        self.state
            .read()
            .entries
            .iter()
            .filter(|e| match e.retry {
                Retry::Sweep => sweep,
                Retry::Backoff { next_at, .. } => next_at <= now,
                Retry::Parked => false,
            })
            .map(|e| e.record.clone())
            .collect()
    }

    fn next_backoff_at(&self) -> Option<Instant> {
        self.state
            .read()
            .entries
            .iter()
            .filter_map(|e| match e.retry {
                Retry::Backoff { next_at, .. } => Some(next_at),
                _ => None,
            })
            .min()
    }

    /// Fold one probe outcome into the overlay and re-run selection.
    pub fn apply_probe(&self, host_path: &str, reachable: bool, now: Instant) {
        let mut state = self.state.write();
        let Some(entry) = state
            .entries
            .iter_mut()
            .find(|e| e.record.host_path == host_path)
        else {
            return;
        };

        if reachable {
            if entry.status != HostStatus::Connected {
                tracing::info!(host_path = %host_path, "host reachable");
            }
            entry.status = HostStatus::Connected;
            entry.stale = false;
            entry.unreachable_since = None;
            entry.retry = Retry::Sweep;
        } else {
            let since = *entry.unreachable_since.get_or_insert(now);
            entry.stale = now.duration_since(since) >= self.settings.stale_after;

            entry.retry = match entry.retry {
                Retry::Sweep if entry.status == HostStatus::Connected => {
                    tracing::warn!(host_path = %host_path, "host became unreachable");
                    Retry::Backoff {
                        failures: 0,
                        next_at: now + REPROBE_BASE,
                    }
                }
                Retry::Backoff { failures, .. } => {
                    let failures = failures + 1;
                    if failures >= self.settings.retry_max_attempts {
                        tracing::warn!(
                            host_path = %host_path,
                            attempts = failures,
                            "host still unreachable, giving up until the host file changes"
                        );
                        Retry::Parked
                    } else {
                        Retry::Backoff {
                            failures,
                            next_at: now + reprobe_delay(failures),
                        }
                    }
                }
                other => other,
            };
            entry.status = HostStatus::Disconnected;
        }

        reselect(&mut state);
    }

    /// Probe everything due, concurrently.
    pub async fn probe_round(&self, sweep: bool) {
        let due = self.due_probes(Instant::now(), sweep);
        if due.is_empty() {
            return;
        }
        let probe = self.probe.clone();
        let results = join_all(due.iter().map(|record| {
            let probe = probe.clone();
            async move { (record.host_path.clone(), probe.probe(record).await) }
        }))
        .await;

        let now = Instant::now();
        for (host_path, reachable) in results {
            self.apply_probe(&host_path, reachable, now);
        }
    }

    /// Put an entry back on the re-probe schedule immediately.  Returns
    /// `false` for unknown paths.
    pub fn retry(&self, host_path: &str) -> bool {
        {
            let mut state = self.state.write();
            let Some(entry) = state
                .entries
                .iter_mut()
                .find(|e| e.record.host_path == host_path)
            else {
                return false;
            };
            entry.retry = Retry::Backoff {
                failures: 0,
                next_at: Instant::now(),
            };
        }
        tracing::info!(host_path = %host_path, "host retry requested");
        self.wake.notify_one();
        true
    }

    // ── Background loop ──────────────────────────────────────────────

    /// Watch the host file and probe until `shutdown` fires.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        self.reload();

        let (event_tx, mut event_rx) = mpsc::channel::<()>(16);
        let _watcher = match watch_host_file(&self.path, event_tx) {
            Ok(w) => Some(w),
            Err(err) => {
                tracing::error!(
                    path = %self.path.display(),
                    %err,
                    "failed to watch host file, changes will not be picked up"
                );
                None
            }
        };

        let mut sweep = tokio::time::interval(self.settings.health_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_reload = Instant::now() - RELOAD_DEBOUNCE;

        loop {
            let next_backoff = self.next_backoff_at();
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = sweep.tick() => self.probe_round(true).await,
                Some(()) = event_rx.recv() => {
                    let elapsed = last_reload.elapsed();
                    if elapsed < RELOAD_DEBOUNCE {
                        tokio::time::sleep(RELOAD_DEBOUNCE - elapsed).await;
                    }
                    while event_rx.try_recv().is_ok() {}
                    last_reload = Instant::now();
                    if self.reload() {
                        self.probe_round(true).await;
                    }
                }
                _ = sleep_until_opt(next_backoff) => self.probe_round(false).await,
                _ = self.wake.notified() => self.probe_round(false).await,
            }
        }
        tracing::debug!("host registry stopped");
    }
}

fn reprobe_delay(failures: u32) -> Duration {
    REPROBE_BASE * 2u32.saturating_pow(failures.min(16))
}

async fn sleep_until_opt(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

fn reselect(state: &mut RegistryState) {
    let next = selection::select_active(&state.entries, state.active.as_deref());
    if next != state.active {
        tracing::info!(
            from = ?state.active,
            to = ?next,
            "active host changed"
        );
        state.active = next;
    }
}
