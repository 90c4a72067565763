// SPDX-License-Identifier: MIT OR Apache-2.0
//! Process discovery: a well-known per-user directory holding a port/pid/
//! nonce triple that lets emitter clients and dashboards find a running
//! server without guessing, and that enforces single-instance startup.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;

const PORT_FILE: &str = "port";
const PID_FILE: &str = "pid";
const NONCE_FILE: &str = "nonce";
/// The pid lock file doubles as the fs2 exclusive-lock target; writing the
/// pid into it happens only after the lock is held, so a crashed owner's
/// stale pid is never mistaken for a live lock.
const LOCK_FILE: &str = "daemon.lock";

/// Errors raised while reading or writing the discovery directory.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("could not determine a per-user cache directory")]
    NoCacheDir,
    #[error("failed to create discovery directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("another instance is already running (lock held)")]
    LockFailed(#[source] std::io::Error),
    #[error("io error writing discovery files: {0}")]
    Io(#[from] std::io::Error),
}

/// Handle onto the well-known discovery directory for one product
/// namespace (e.g. `observability-event-bus`).
#[derive(Debug, Clone)]
pub struct Registry {
    dir: PathBuf,
}

impl Registry {
    /// Use an explicit directory (tests, or an operator override).
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Resolve the platform's per-user cache directory and namespace it
    /// under `namespace`.
    pub fn for_namespace(namespace: &str) -> Result<Self, DiscoveryError> {
        let base = dirs::cache_dir().ok_or(DiscoveryError::NoCacheDir)?;
        Ok(Self::new(base.join(namespace)))
    }

    /// Directory backing this registry.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Read the advertised port, verifying the owning pid is still alive.
    ///
    /// Returns `None` (after best-effort cleanup) if the files are
    /// missing, unparseable, or the pid is no longer alive.
    pub fn read_port(&self) -> Option<u16> {
        let port_text = fs::read_to_string(self.dir.join(PORT_FILE)).ok()?;
        let pid_text = fs::read_to_string(self.dir.join(PID_FILE)).ok()?;

        let port: u16 = port_text.trim().parse().ok()?;
        let pid: u32 = pid_text.trim().parse().ok()?;

        if port == 0 || pid == 0 {
            self.clear();
            return None;
        }

        if !is_process_alive(pid) {
            warn!(pid, "stale discovery triple found, removing");
            self.clear();
            return None;
        }

        Some(port)
    }

    /// Acquire the single-instance lock and write the discovery triple.
    ///
    /// Call this *after* binding the listening socket so the written port
    /// is guaranteed correct. Fails if another live instance holds the
    /// lock.
    pub fn acquire(&self, port: u16) -> Result<OwnedInstance, DiscoveryError> {
        fs::create_dir_all(&self.dir).map_err(|source| DiscoveryError::CreateDir {
            path: self.dir.clone(),
            source,
        })?;

        // Open (without truncating) before locking so a crash between
        // open and lock never clobbers a live owner's pid.
        let lock_file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.dir.join(LOCK_FILE))?;
        fs2::FileExt::try_lock_exclusive(&lock_file).map_err(DiscoveryError::LockFailed)?;

        let pid = std::process::id();
        let nonce = fresh_nonce();

        write_atomic(&lock_file, pid)?;
        fs::write(self.dir.join(PORT_FILE), port.to_string())?;
        fs::write(self.dir.join(PID_FILE), pid.to_string())?;
        fs::write(self.dir.join(NONCE_FILE), &nonce)?;

        Ok(OwnedInstance {
            registry: self.clone(),
            _lock_file: lock_file,
            nonce,
        })
    }

    /// Best-effort removal of the discovery triple. Never fails loudly.
    pub fn clear(&self) {
        for name in [PORT_FILE, PID_FILE, NONCE_FILE] {
            let _ = fs::remove_file(self.dir.join(name));
        }
    }
}

fn write_atomic(mut lock_file: &File, pid: u32) -> std::io::Result<()> {
    lock_file.set_len(0)?;
    writeln!(lock_file, "{pid}")
}

/// An acquired, live discovery registration. Dropping this releases the
/// exclusive lock (the kernel releases it when the fd closes); it does
/// *not* remove the triple files — call [`Registry::clear`] explicitly
/// during graceful shutdown.
pub struct OwnedInstance {
    registry: Registry,
    _lock_file: File,
    nonce: String,
}

impl OwnedInstance {
    /// The nonce minted for this instance's lifetime.
    pub fn nonce(&self) -> &str {
        &self.nonce
    }

    /// Remove the discovery triple. Call on graceful shutdown.
    pub fn clear(&self) {
        self.registry.clear();
    }
}

fn fresh_nonce() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    let pid = std::process::id() as u64;
    format!("{:x}", nanos.wrapping_mul(0x9E37_79B9_7F4A_7C15).wrapping_add(pid))
}

/// Liveness probe via `kill(pid, 0)` — sends no signal, just checks whether
/// the pid exists and is reachable.
#[cfg(unix)]
fn is_process_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    kill(Pid::from_raw(pid as i32), None).is_ok()
}

#[cfg(not(unix))]
fn is_process_alive(_pid: u32) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_port_is_none_when_files_absent() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::new(dir.path().join("ns"));
        assert_eq!(registry.read_port(), None);
    }

    #[test]
    fn acquire_then_read_port_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::new(dir.path().join("ns"));
        let instance = registry.acquire(4123).unwrap();
        assert_eq!(registry.read_port(), Some(4123));
        assert!(!instance.nonce().is_empty());
    }

    #[test]
    fn second_acquire_fails_while_first_is_live() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::new(dir.path().join("ns"));
        let _first = registry.acquire(4123).unwrap();
        let second = Registry::new(dir.path().join("ns")).acquire(4124);
        assert!(matches!(second, Err(DiscoveryError::LockFailed(_))));
    }

    #[test]
    fn clear_removes_the_triple() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::new(dir.path().join("ns"));
        let instance = registry.acquire(4123).unwrap();
        instance.clear();
        assert!(!dir.path().join("ns").join(PORT_FILE).exists());
        assert!(!dir.path().join("ns").join(PID_FILE).exists());
        assert!(!dir.path().join("ns").join(NONCE_FILE).exists());
    }

    #[test]
    fn stale_pid_is_cleared_on_read() {
        let dir = tempfile::tempdir().unwrap();
        let ns_dir = dir.path().join("ns");
        fs::create_dir_all(&ns_dir).unwrap();
        fs::write(ns_dir.join(PORT_FILE), "4123").unwrap();
        // pid 999999 is extremely unlikely to be alive in any test sandbox.
        fs::write(ns_dir.join(PID_FILE), "999999").unwrap();
        let registry = Registry::new(ns_dir.clone());
        assert_eq!(registry.read_port(), None);
        assert!(!ns_dir.join(PORT_FILE).exists());
    }
}
