//! Append-only audit log of authorization decisions.
//!
//! Entries land in a bounded in-memory ring and are flushed periodically
//! (and at shutdown) to a line-delimited JSON file. Queries page over the
//! ring first and fall back to the file for older entries.

use std::{
    collections::VecDeque,
    io::Write,
    path::PathBuf,
    sync::{Arc, Mutex},
    time::Duration,
};

use {
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    tracing::{debug, warn},
};

use torbo_common::AccessLevel;

/// Ring capacity; older entries live only in the file.
const RING_CAPACITY: usize = 10_000;

/// Flush interval for the background task.
pub const FLUSH_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub client_ip: String,
    pub method: String,
    pub path: String,
    pub required_level: AccessLevel,
    pub granted: bool,
    #[serde(default)]
    pub device_id: Option<String>,
    /// Free-form context, e.g. a provider failover hop.
    #[serde(default)]
    pub detail: Option<String>,
}

impl AuditEntry {
    pub fn new(
        client_ip: impl Into<String>,
        method: impl Into<String>,
        path: impl Into<String>,
        required_level: AccessLevel,
        granted: bool,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            client_ip: client_ip.into(),
            method: method.into(),
            path: path.into(),
            required_level,
            granted,
            device_id: None,
            detail: None,
        }
    }

    pub fn with_device(mut self, device_id: Option<String>) -> Self {
        self.device_id = device_id;
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

struct AuditState {
    ring: VecDeque<AuditEntry>,
    pending: Vec<AuditEntry>,
}

pub struct AuditLog {
    state: Mutex<AuditState>,
    file: PathBuf,
}

impl AuditLog {
    pub fn new(file: impl Into<PathBuf>) -> Self {
        Self {
            state: Mutex::new(AuditState {
                ring: VecDeque::with_capacity(1024),
                pending: Vec::new(),
            }),
            file: file.into(),
        }
    }

    /// Record an authorization decision.
    pub fn record(&self, entry: AuditEntry) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        if state.ring.len() >= RING_CAPACITY {
            state.ring.pop_front();
        }
        state.ring.push_back(entry.clone());
        state.pending.push(entry);
    }

    /// Drain pending entries to the file. The drained batch leaves the lock
    /// before any I/O happens.
    pub fn flush(&self) {
        let batch: Vec<AuditEntry> = {
            let Ok(mut state) = self.state.lock() else {
                return;
            };
            if state.pending.is_empty() {
                return;
            }
            state.pending.drain(..).collect()
        };

        if let Err(e) = self.append_lines(&batch) {
            warn!(path = %self.file.display(), error = %e, "audit flush failed");
        } else {
            debug!(entries = batch.len(), "audit entries flushed");
        }
    }

    fn append_lines(&self, batch: &[AuditEntry]) -> std::io::Result<()> {
        if let Some(parent) = self.file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file)?;
        for entry in batch {
            let line = serde_json::to_string(entry)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            writeln!(file, "{line}")?;
        }
        Ok(())
    }

    /// Page over entries newest-first: the ring, then older entries from
    /// the file.
    pub fn query(
        &self,
        limit: usize,
        offset: usize,
        path_filter: Option<&str>,
        granted_only: bool,
    ) -> Vec<AuditEntry> {
        let matches = |e: &AuditEntry| {
            (!granted_only || e.granted)
                && path_filter.map(|f| e.path.contains(f)).unwrap_or(true)
        };

        let (ring_matches, oldest_in_ring) = {
            let Ok(state) = self.state.lock() else {
                return Vec::new();
            };
            let oldest = state.ring.front().map(|e| e.timestamp);
            let filtered: Vec<AuditEntry> = state
                .ring
                .iter()
                .rev()
                .filter(|e| matches(e))
                .cloned()
                .collect();
            (filtered, oldest)
        };

        let mut out: Vec<AuditEntry> = ring_matches
            .iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect();

        if out.len() < limit {
            let consumed = offset.saturating_sub(ring_matches.len());
            let older = self.read_file_older_than(oldest_in_ring, &matches);
            out.extend(older.into_iter().skip(consumed).take(limit - out.len()));
        }
        out
    }

    /// Entries from the file strictly older than the ring's oldest entry,
    /// newest-first. Unparseable lines are skipped.
    fn read_file_older_than(
        &self,
        cutoff: Option<DateTime<Utc>>,
        matches: &dyn Fn(&AuditEntry) -> bool,
    ) -> Vec<AuditEntry> {
        let Ok(raw) = std::fs::read_to_string(&self.file) else {
            return Vec::new();
        };
        let mut entries: Vec<AuditEntry> = raw
            .lines()
            .filter_map(|line| serde_json::from_str::<AuditEntry>(line).ok())
            .filter(|e| cutoff.map(|c| e.timestamp < c).unwrap_or(true))
            .filter(|e| matches(e))
            .collect();
        entries.reverse();
        entries
    }

    /// Spawn the periodic flusher. The handle is aborted at shutdown after
    /// a final flush.
    pub fn spawn_flusher(log: Arc<AuditLog>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(FLUSH_INTERVAL);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tick.tick().await;
                log.flush();
            }
        })
    }
}
