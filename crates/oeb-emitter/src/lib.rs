// SPDX-License-Identifier: MIT OR Apache-2.0
//! Fire-and-forget emitter client used by hook/CLI producers.
//!
//! Producers are dev tools: they must never be slowed down or broken by
//! observability. Every public entry point here absorbs its own failures
//! and never returns a caller-visible error.

use oeb_core::{EventContext, create_event};
use oeb_discovery::Registry;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::warn;

/// Hard deadline for a single emit attempt.
const EMIT_TIMEOUT: Duration = Duration::from_millis(500);

/// Minimum interval between rate-limited failure log lines.
const WARN_INTERVAL: Duration = Duration::from_secs(30);

/// Emits envelopes to a locally running server, discovered via
/// [`oeb_discovery::Registry`]. Never panics, never propagates network
/// errors to the caller.
pub struct Emitter {
    client: reqwest::Client,
    registry: Registry,
    failure_count: AtomicU64,
    last_warn: Mutex<Option<Instant>>,
}

impl Emitter {
    /// Build an emitter that discovers the server through `registry`.
    pub fn new(registry: Registry) -> Self {
        Self {
            client: reqwest::Client::new(),
            registry,
            failure_count: AtomicU64::new(0),
            last_warn: Mutex::new(None),
        }
    }

    /// Check whether a server is currently advertised. Typically resolves
    /// in a few milliseconds (a couple of small file reads).
    pub fn is_server_running(&self) -> Option<u16> {
        self.registry.read_port()
    }

    /// POST `envelope` to the server listening on `port`. Always returns;
    /// never panics or propagates an error. Resets the failure counter on
    /// success; on failure, increments it and rate-limits the stderr line.
    pub async fn emit(&self, envelope: &oeb_core::Envelope, port: u16) -> bool {
        let url = format!("http://127.0.0.1:{port}/events");
        let attempt = self.client.post(&url).json(envelope).send();

        match tokio::time::timeout(EMIT_TIMEOUT, attempt).await {
            Ok(Ok(resp)) if resp.status().is_success() => {
                self.failure_count.store(0, Ordering::Relaxed);
                true
            }
            Ok(Ok(resp)) => {
                self.record_failure(&format!("non-2xx response: {}", resp.status()));
                false
            }
            Ok(Err(err)) => {
                self.record_failure(&err.to_string());
                false
            }
            Err(_) => {
                self.record_failure("emit timed out after 500ms");
                false
            }
        }
    }

    /// Convenience used by CLI producers: skip entirely if no server is
    /// advertised, otherwise stamp `data` into an envelope and emit it.
    pub async fn emit_cli(
        &self,
        event_type: &str,
        data: serde_json::Value,
        context: &EventContext,
    ) -> bool {
        let Some(port) = self.is_server_running() else {
            return false;
        };
        let envelope = match create_event(event_type, data, context) {
            Ok(e) => e,
            Err(err) => {
                self.record_failure(&format!("failed to construct envelope: {err}"));
                return false;
            }
        };
        self.emit(&envelope, port).await
    }

    fn record_failure(&self, message: &str) {
        let count = self.failure_count.fetch_add(1, Ordering::Relaxed) + 1;
        let mut last = self.last_warn.lock().expect("warn-gate mutex poisoned");
        let now = Instant::now();
        let should_warn = match *last {
            Some(prev) => now.duration_since(prev) >= WARN_INTERVAL,
            None => true,
        };
        if should_warn {
            warn!(failure_count = count, error = message, "emit failed");
            *last = Some(now);
        }
    }

    /// Current failure streak, reset on any successful emit.
    pub fn failure_count(&self) -> u64 {
        self.failure_count.load(Ordering::Relaxed)
    }
}
