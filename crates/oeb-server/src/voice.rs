// SPDX-License-Identifier: MIT OR Apache-2.0
//! Resolution of `POST /voice/notify` requests against a catalog of
//! pre-synthesized clips. Synthesis itself is an offline batch step
//! (out of scope here); this only consumes its cached output.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Request body for `POST /voice/notify`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceNotifyRequest {
    pub agent_type: String,
    pub phase: VoicePhase,
}

/// Lifecycle phase a notification clip corresponds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoicePhase {
    Start,
    Stop,
}

impl VoicePhase {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
        }
    }
}

/// Why a `/voice/notify` request was not queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VoiceSkipReason {
    VoiceDisabled,
    UnknownAgent,
    NotCached,
}

/// Outcome of resolving a [`VoiceNotifyRequest`] against the catalog.
#[derive(Debug, Clone)]
pub enum VoiceResolution {
    Queued {
        label: String,
        text: String,
        file_path: PathBuf,
    },
    Skipped(VoiceSkipReason),
}

struct CatalogEntry {
    agent_type: &'static str,
    phase: VoicePhase,
    label: &'static str,
    text: &'static str,
    file_name: &'static str,
}

/// Known `(agentType, phase)` pairs and their notification copy. The clip
/// referenced by `file_name` is produced offline; this table only knows
/// how to name and describe it.
const CATALOG: &[CatalogEntry] = &[
    CatalogEntry {
        agent_type: "claude",
        phase: VoicePhase::Start,
        label: "Claude started",
        text: "Claude has started working on your task.",
        file_name: "claude-start.wav",
    },
    CatalogEntry {
        agent_type: "claude",
        phase: VoicePhase::Stop,
        label: "Claude finished",
        text: "Claude has finished working on your task.",
        file_name: "claude-stop.wav",
    },
    CatalogEntry {
        agent_type: "codex",
        phase: VoicePhase::Start,
        label: "Codex started",
        text: "Codex has started working on your task.",
        file_name: "codex-start.wav",
    },
    CatalogEntry {
        agent_type: "codex",
        phase: VoicePhase::Stop,
        label: "Codex finished",
        text: "Codex has finished working on your task.",
        file_name: "codex-stop.wav",
    },
];

/// Resolves agent/phase pairs against [`CATALOG`] and a clip cache
/// directory on disk.
#[derive(Debug, Clone)]
pub struct VoiceCatalog {
    clip_dir: PathBuf,
}

impl VoiceCatalog {
    /// `clip_dir` is the directory under which synthesized clips are
    /// expected to already exist.
    pub fn new(clip_dir: PathBuf) -> Self {
        Self { clip_dir }
    }

    /// Resolve a request. `voice_enabled` gates everything else: when
    /// `false` every request is skipped with [`VoiceSkipReason::VoiceDisabled`].
    pub fn resolve(&self, request: &VoiceNotifyRequest, voice_enabled: bool) -> VoiceResolution {
        if !voice_enabled {
            return VoiceResolution::Skipped(VoiceSkipReason::VoiceDisabled);
        }

        let Some(entry) = CATALOG
            .iter()
            .find(|e| e.agent_type == request.agent_type && e.phase == request.phase)
        else {
            return VoiceResolution::Skipped(VoiceSkipReason::UnknownAgent);
        };

        let file_path = self.clip_dir.join(entry.file_name);
        if !clip_exists(&file_path) {
            return VoiceResolution::Skipped(VoiceSkipReason::NotCached);
        }

        VoiceResolution::Queued {
            label: entry.label.to_string(),
            text: entry.text.to_string(),
            file_path,
        }
    }
}

fn clip_exists(path: &Path) -> bool {
    path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(agent_type: &str, phase: VoicePhase) -> VoiceNotifyRequest {
        VoiceNotifyRequest {
            agent_type: agent_type.to_string(),
            phase,
        }
    }

    #[test]
    fn voice_disabled_skips_regardless_of_agent() {
        let catalog = VoiceCatalog::new(PathBuf::from("/nonexistent"));
        let resolution = catalog.resolve(&request("claude", VoicePhase::Start), false);
        assert!(matches!(
            resolution,
            VoiceResolution::Skipped(VoiceSkipReason::VoiceDisabled)
        ));
    }

    #[test]
    fn unknown_agent_is_skipped() {
        let catalog = VoiceCatalog::new(PathBuf::from("/nonexistent"));
        let resolution = catalog.resolve(&request("unknown-agent", VoicePhase::Start), true);
        assert!(matches!(
            resolution,
            VoiceResolution::Skipped(VoiceSkipReason::UnknownAgent)
        ));
    }

    #[test]
    fn known_agent_without_cached_clip_is_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = VoiceCatalog::new(dir.path().to_path_buf());
        let resolution = catalog.resolve(&request("claude", VoicePhase::Start), true);
        assert!(matches!(
            resolution,
            VoiceResolution::Skipped(VoiceSkipReason::NotCached)
        ));
    }

    #[test]
    fn known_agent_with_cached_clip_queues() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("claude-start.wav"), b"fake-audio").unwrap();
        let catalog = VoiceCatalog::new(dir.path().to_path_buf());
        let resolution = catalog.resolve(&request("claude", VoicePhase::Start), true);
        match resolution {
            VoiceResolution::Queued { label, file_path, .. } => {
                assert_eq!(label, "Claude started");
                assert!(file_path.ends_with("claude-start.wav"));
            }
            other => panic!("expected Queued, got {other:?}"),
        }
    }

    #[test]
    fn phase_serializes_as_snake_case() {
        assert_eq!(
            serde_json::to_string(&VoicePhase::Start).unwrap(),
            "\"start\""
        );
    }
}
