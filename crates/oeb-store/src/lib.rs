// SPDX-License-Identifier: MIT OR Apache-2.0
//! Bounded ring buffer of [`Envelope`]s with an optional durable JSONL
//! journal.
//!
//! The ring buffer is the in-memory source of truth for `GET /events` and
//! `/health`. The journal is best-effort: a write or rotation failure is
//! counted but never propagated back to the producer.

use oeb_core::Envelope;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;
use tracing::warn;

/// Default ring buffer capacity.
pub const DEFAULT_CAPACITY: usize = 1000;

/// Journal rotates once the active file reaches this size.
const ROTATE_THRESHOLD_BYTES: u64 = 10 * 1024 * 1024;

/// Number of rotated files kept alongside the active journal.
const MAX_ROTATIONS: u32 = 5;

/// Minimum interval between rate-limited persistence-failure log lines.
const WARN_INTERVAL: std::time::Duration = std::time::Duration::from_secs(30);

/// Filter parameters for [`EventStore::query`].
#[derive(Debug, Clone, Default)]
pub struct QueryParams {
    /// Restrict to envelopes whose `type` matches exactly.
    pub event_type: Option<String>,
    /// Restrict to envelopes with `timestamp` strictly greater than this.
    pub since: Option<chrono::DateTime<chrono::Utc>>,
    /// Keep only the newest `limit` entries after filtering. `Some(0)` or
    /// negative-equivalent (never expressible in `usize`, so `Some(0)`)
    /// yields an empty result.
    pub limit: Option<usize>,
}

/// Errors raised by journal I/O. These never reach a producer: [`EventStore`]
/// absorbs them, counts them, and logs at most one line per [`WARN_INTERVAL`].
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to open journal at {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write journal entry: {0}")]
    Write(#[source] std::io::Error),
    #[error("failed to rotate journal: {0}")]
    Rotate(#[source] std::io::Error),
    #[error("failed to serialize envelope: {0}")]
    Serialize(#[source] serde_json::Error),
}

struct RingBuffer {
    slots: Vec<Option<Envelope>>,
    cursor: usize,
    len: usize,
}

impl RingBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity.max(1)],
            cursor: 0,
            len: 0,
        }
    }

    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn push(&mut self, envelope: Envelope) {
        let cap = self.capacity();
        self.slots[self.cursor] = Some(envelope);
        self.cursor = (self.cursor + 1) % cap;
        if self.len < cap {
            self.len += 1;
        }
    }

    /// Iterate stored envelopes oldest-to-newest.
    fn iter_chronological(&self) -> impl Iterator<Item = &Envelope> {
        let cap = self.capacity();
        let start = if self.len < cap { 0 } else { self.cursor };
        (0..self.len).map(move |i| {
            self.slots[(start + i) % cap]
                .as_ref()
                .expect("slot within len must be populated")
        })
    }
}

struct JournalState {
    path: PathBuf,
    file: File,
}

/// Bounded ring buffer with an optional append-only journal.
pub struct EventStore {
    capacity: usize,
    buffer: Mutex<RingBuffer>,
    journal: Option<Mutex<JournalState>>,
    persist_errors: AtomicU64,
    last_warn: Mutex<Option<Instant>>,
}

impl EventStore {
    /// Construct a store with the given capacity and optional journal path.
    pub fn new(capacity: usize, persist_path: Option<PathBuf>) -> Result<Self, StoreError> {
        let capacity = capacity.max(1);
        let journal = match persist_path {
            Some(path) => Some(Mutex::new(open_active(&path)?)),
            None => None,
        };
        Ok(Self {
            capacity,
            buffer: Mutex::new(RingBuffer::new(capacity)),
            journal,
            persist_errors: AtomicU64::new(0),
            last_warn: Mutex::new(None),
        })
    }

    /// Insert `envelope`, evicting the oldest entry if at capacity, and
    /// append it to the journal (if configured). Persistence failures are
    /// counted, never raised.
    pub fn push(&self, envelope: Envelope) {
        {
            let mut buf = self.buffer.lock().expect("ring buffer mutex poisoned");
            buf.push(envelope.clone());
        }

        if let Some(journal) = &self.journal {
            if let Err(err) = append(journal, &envelope) {
                self.persist_errors.fetch_add(1, Ordering::Relaxed);
                self.maybe_warn(&err);
            }
        }
    }

    fn maybe_warn(&self, err: &StoreError) {
        let mut last = self.last_warn.lock().expect("warn-gate mutex poisoned");
        let now = Instant::now();
        let should_warn = match *last {
            Some(prev) => now.duration_since(prev) >= WARN_INTERVAL,
            None => true,
        };
        if should_warn {
            warn!(error = %err, "journal persistence failed");
            *last = Some(now);
        }
    }

    /// Query stored envelopes, composing filters in order: `type`, then
    /// `since` (strict), then `limit` (keep the newest `limit`).
    pub fn query(&self, params: &QueryParams) -> Vec<Envelope> {
        let buf = self.buffer.lock().expect("ring buffer mutex poisoned");
        let mut out: Vec<Envelope> = buf
            .iter_chronological()
            .filter(|e| {
                params
                    .event_type
                    .as_ref()
                    .is_none_or(|t| &e.event_type == t)
            })
            .filter(|e| params.since.is_none_or(|since| e.timestamp > since))
            .cloned()
            .collect();

        if let Some(limit) = params.limit {
            if limit == 0 {
                return Vec::new();
            }
            if out.len() > limit {
                out = out.split_off(out.len() - limit);
            }
        }
        out
    }

    /// Return the newest `n` envelopes in chronological order.
    pub fn last(&self, n: usize) -> Vec<Envelope> {
        self.query(&QueryParams {
            event_type: None,
            since: None,
            limit: Some(n),
        })
    }

    /// Number of envelopes currently retained.
    pub fn size(&self) -> usize {
        self.buffer.lock().expect("ring buffer mutex poisoned").len
    }

    /// Configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Per-type counts across the retained window. Always sums to [`size`](Self::size).
    pub fn type_counts(&self) -> BTreeMap<String, usize> {
        let buf = self.buffer.lock().expect("ring buffer mutex poisoned");
        let mut counts = BTreeMap::new();
        for envelope in buf.iter_chronological() {
            *counts.entry(envelope.event_type.clone()).or_insert(0) += 1;
        }
        counts
    }

    /// Total persistence failures observed so far.
    pub fn persist_errors(&self) -> u64 {
        self.persist_errors.load(Ordering::Relaxed)
    }
}

fn open_active(path: &Path) -> Result<JournalState, StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| StoreError::Open {
            path: path.to_path_buf(),
            source,
        })?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| StoreError::Open {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(JournalState {
        path: path.to_path_buf(),
        file,
    })
}

fn append(journal: &Mutex<JournalState>, envelope: &Envelope) -> Result<(), StoreError> {
    let mut state = journal.lock().expect("journal mutex poisoned");

    let needs_rotation = state
        .file
        .metadata()
        .map(|m| m.len() >= ROTATE_THRESHOLD_BYTES)
        .unwrap_or(false);
    if needs_rotation {
        rotate(&mut state)?;
    }

    let mut line = serde_json::to_vec(envelope).map_err(StoreError::Serialize)?;
    line.push(b'\n');
    state.file.write_all(&line).map_err(StoreError::Write)?;
    Ok(())
}

/// Shift `.4 -> .5`, ..., `.1 -> .2`, active -> `.1`, then reopen active
/// empty. Keeps at most [`MAX_ROTATIONS`] rotated files. Rotation failures
/// are absorbed by the caller; this function only needs to not panic.
fn rotate(state: &mut JournalState) -> Result<(), StoreError> {
    let oldest = state.path.with_extension(format!("{MAX_ROTATIONS}"));
    let _ = fs::remove_file(&oldest);

    for gen in (1..MAX_ROTATIONS).rev() {
        let from = rotated_path(&state.path, gen);
        let to = rotated_path(&state.path, gen + 1);
        if from.exists() {
            let _ = fs::rename(&from, &to);
        }
    }

    let first_rotated = rotated_path(&state.path, 1);
    fs::rename(&state.path, &first_rotated).map_err(StoreError::Rotate)?;

    state.file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&state.path)
        .map_err(|source| StoreError::Open {
            path: state.path.clone(),
            source,
        })?;
    Ok(())
}

fn rotated_path(active: &Path, generation: u32) -> PathBuf {
    let mut name = active
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".{generation}"));
    active.with_file_name(name)
}
