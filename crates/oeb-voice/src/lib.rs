// SPDX-License-Identifier: MIT OR Apache-2.0
//! Single-consumer playback queue for cached voice notification clips.
//!
//! Overlapping audio is unintelligible, so exactly one external player
//! process runs at a time. Depth and age caps keep a burst from building
//! an unbounded backlog; the per-item wall-clock cap keeps a stuck player
//! from stalling the queue forever.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, mpsc};
use tracing::warn;

/// Tunables for a [`PlaybackQueue`].
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Items beyond this depth are silently dropped.
    pub max_depth: usize,
    /// Items older than this at dequeue time are discarded unplayed.
    pub max_age: Duration,
    /// Wall-clock cap on a single item's playback; the player is killed at
    /// this deadline.
    pub max_play: Duration,
    /// External command invoked as `<player_command> <file_path>`.
    pub player_command: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_depth: 10,
            max_age: Duration::from_millis(30_000),
            max_play: Duration::from_millis(15_000),
            player_command: default_player_command(),
        }
    }
}

#[cfg(target_os = "macos")]
fn default_player_command() -> String {
    "afplay".to_string()
}

#[cfg(not(target_os = "macos"))]
fn default_player_command() -> String {
    "aplay".to_string()
}

/// A single cached clip waiting to be played.
#[derive(Debug, Clone)]
pub struct QueueItem {
    /// Path to the cached audio clip.
    pub file_path: PathBuf,
    /// Human-readable label surfaced on `/health`-style observers.
    pub label: String,
    /// When this item was enqueued, used only for age eviction.
    pub enqueued_at: Instant,
}

impl QueueItem {
    /// Construct an item enqueued "now".
    pub fn new(file_path: PathBuf, label: impl Into<String>) -> Self {
        Self {
            file_path,
            label: label.into(),
            enqueued_at: Instant::now(),
        }
    }
}

struct Shared {
    config: QueueConfig,
    items: Mutex<VecDeque<QueueItem>>,
    playing: AtomicBool,
    stopped: AtomicBool,
    current_child: Mutex<Option<Child>>,
}

/// Bounded, age-aware, single-consumer playback queue.
///
/// Cloning shares the same underlying queue and drain task (it's a cheap
/// `Arc` clone), mirroring how [`oeb_emitter::Emitter`]-style clients are
/// shared across the server's handlers.
#[derive(Clone)]
pub struct PlaybackQueue {
    shared: Arc<Shared>,
    wake: mpsc::Sender<()>,
}

impl PlaybackQueue {
    /// Build the queue and spawn its single background drain task.
    pub fn spawn(config: QueueConfig) -> Self {
        let shared = Arc::new(Shared {
            config,
            items: Mutex::new(VecDeque::new()),
            playing: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            current_child: Mutex::new(None),
        });
        let (wake_tx, wake_rx) = mpsc::channel(1);

        tokio::spawn(drain_loop(Arc::clone(&shared), wake_rx));

        Self {
            shared,
            wake: wake_tx,
        }
    }

    /// Enqueue `item`. Returns `false` (and drops the item) if the queue
    /// is already at [`QueueConfig::max_depth`].
    pub async fn enqueue(&self, item: QueueItem) -> bool {
        {
            let mut items = self.shared.items.lock().await;
            if items.len() >= self.shared.config.max_depth {
                return false;
            }
            items.push_back(item);
        }
        // Best-effort wake; a full channel means the drain loop is already
        // about to check the queue again.
        let _ = self.wake.try_send(());
        true
    }

    /// Stop playback: clear pending items and kill any in-flight player.
    /// Used during graceful shutdown.
    pub async fn stop(&self) {
        self.shared.stopped.store(true, Ordering::SeqCst);
        self.shared.items.lock().await.clear();
        if let Some(mut child) = self.shared.current_child.lock().await.take() {
            let _ = child.kill().await;
        }
    }

    /// Clear pending items only; does not interrupt current playback.
    pub async fn clear(&self) {
        self.shared.items.lock().await.clear();
    }

    /// Number of items currently pending (excludes the one playing, if any).
    pub async fn depth(&self) -> usize {
        self.shared.items.lock().await.len()
    }

    /// Whether a player process is currently running.
    pub fn is_playing(&self) -> bool {
        self.shared.playing.load(Ordering::SeqCst)
    }
}

async fn drain_loop(shared: Arc<Shared>, mut wake_rx: mpsc::Receiver<()>) {
    while wake_rx.recv().await.is_some() {
        if shared.stopped.load(Ordering::SeqCst) {
            break;
        }
        loop {
            if shared.stopped.load(Ordering::SeqCst) {
                break;
            }
            let item = {
                let mut items = shared.items.lock().await;
                items.pop_front()
            };
            let Some(item) = item else { break };

            if item.enqueued_at.elapsed() > shared.config.max_age {
                continue;
            }

            play_one(&shared, item).await;
        }
    }
}

async fn play_one(shared: &Shared, item: QueueItem) {
    shared.playing.store(true, Ordering::SeqCst);

    let spawned = Command::new(&shared.config.player_command)
        .arg(&item.file_path)
        .kill_on_drop(true)
        .spawn();

    match spawned {
        Ok(child) => {
            *shared.current_child.lock().await = Some(child);
            let outcome = run_with_deadline(shared, shared.config.max_play).await;
            if let Err(err) = outcome {
                warn!(label = %item.label, error = %err, "audio playback failed");
            }
            *shared.current_child.lock().await = None;
        }
        Err(err) => {
            warn!(label = %item.label, error = %err, "failed to spawn audio player");
        }
    }

    shared.playing.store(false, Ordering::SeqCst);
}

async fn run_with_deadline(shared: &Shared, deadline: Duration) -> std::io::Result<()> {
    tokio::select! {
        status = wait_current(shared) => status.map(|_| ()),
        _ = tokio::time::sleep(deadline) => {
            if let Some(mut child) = shared.current_child.lock().await.take() {
                warn!("audio player exceeded max play duration, killing");
                let _ = child.kill().await;
            }
            Ok(())
        }
    }
}

async fn wait_current(shared: &Shared) -> std::io::Result<std::process::ExitStatus> {
    let mut guard = shared.current_child.lock().await;
    match guard.as_mut() {
        Some(child) => child.wait().await,
        None => Ok(std::process::ExitStatus::default()),
    }
}
