//! Checkpoint persistence.
//!
//! Each playthrough owns a directory of JSON checkpoint files, one per
//! checkpoint. Writes go to a hidden temp file that is renamed into place,
//! so `list` and `restore` never see a partial checkpoint.

use crate::state::{NodeId, PlayerState};
use crate::story::StoryNode;
use crate::timer::TimePressureTracker;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Current checkpoint file version.
const CHECKPOINT_VERSION: u32 = 1;

const TEMP_SUFFIX: &str = "tmp";

/// Errors from checkpoint operations.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// Storage could not be written or read. Gameplay continues without it.
    #[error("Persistence error: {0}")]
    Persistence(#[from] std::io::Error),

    #[error("Encoding error: {0}")]
    Encode(#[from] serde_json::Error),

    /// Absent, corrupted, or from an incompatible version.
    #[error("Checkpoint not found: {0}")]
    NotFound(CheckpointId),
}

/// Unique checkpoint id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CheckpointId(pub Uuid);

impl CheckpointId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }
}

impl Default for CheckpointId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CheckpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a checkpoint came to be.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CheckpointOrigin {
    /// Taken on entering a checkpoint node.
    Auto { node: NodeId },
    /// Requested by the player.
    Manual,
}

/// Listing entry, readable without loading the full state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointSummary {
    pub id: CheckpointId,
    pub label: String,
    pub created_at: DateTime<Utc>,
    pub origin: CheckpointOrigin,
    pub node_id: NodeId,
    pub turn: u32,
    pub health: i32,
}

/// An immutable point-in-time snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    version: u32,
    summary: CheckpointSummary,
    state: PlayerState,
    timer: TimePressureTracker,
}

impl Checkpoint {
    fn capture(
        label: String,
        origin: CheckpointOrigin,
        state: &PlayerState,
        timer: &TimePressureTracker,
    ) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            summary: CheckpointSummary {
                id: CheckpointId::new(),
                label,
                created_at: Utc::now(),
                origin,
                node_id: state.current_node.clone(),
                turn: state.turn,
                health: state.vitals.health,
            },
            state: state.clone(),
            timer: timer.clone(),
        }
    }

    pub fn id(&self) -> CheckpointId {
        self.summary.id
    }

    pub fn label(&self) -> &str {
        &self.summary.label
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.summary.created_at
    }

    pub fn origin(&self) -> &CheckpointOrigin {
        &self.summary.origin
    }

    pub fn node_id(&self) -> &NodeId {
        &self.summary.node_id
    }

    pub fn state(&self) -> &PlayerState {
        &self.state
    }

    pub fn timer(&self) -> &TimePressureTracker {
        &self.timer
    }

    pub fn summary(&self) -> &CheckpointSummary {
        &self.summary
    }
}

/// Saves, lists, restores, and deletes checkpoints in one directory.
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    dir: PathBuf,
}

impl CheckpointManager {
    /// A manager for the namespace `root/namespace`.
    pub fn new(root: impl AsRef<Path>, namespace: &str) -> Self {
        let sanitized: String = namespace
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        Self {
            dir: root.as_ref().join(sanitized),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: CheckpointId) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    fn temp_path_for(&self, id: CheckpointId) -> PathBuf {
        self.dir.join(format!(".{id}.json.{TEMP_SUFFIX}"))
    }

    /// Persist a snapshot of `state` and `timer`.
    pub async fn save(
        &self,
        state: &PlayerState,
        timer: &TimePressureTracker,
        label: Option<&str>,
    ) -> Result<Checkpoint, CheckpointError> {
        let label = label
            .map(str::to_string)
            .unwrap_or_else(|| format!("Turn {} at {}", state.turn, state.current_node));
        let checkpoint = Checkpoint::capture(label, CheckpointOrigin::Manual, state, timer);
        self.write(&checkpoint).await?;
        info!(id = %checkpoint.id(), label = %checkpoint.label(), "Checkpoint saved");
        Ok(checkpoint)
    }

    /// Save when `node` is a checkpoint node. Older auto checkpoints for the
    /// same node are replaced.
    pub async fn auto_save_if_flagged(
        &self,
        node: &StoryNode,
        state: &PlayerState,
        timer: &TimePressureTracker,
    ) -> Result<Option<Checkpoint>, CheckpointError> {
        if !node.is_checkpoint {
            return Ok(None);
        }
        let origin = CheckpointOrigin::Auto {
            node: node.id.clone(),
        };
        let previous: Vec<CheckpointId> = self
            .list()
            .await?
            .into_iter()
            .filter(|s| s.origin == origin)
            .map(|s| s.id)
            .collect();

        let checkpoint = Checkpoint::capture(format!("Reached {}", node.id), origin, state, timer);
        self.write(&checkpoint).await?;
        for id in previous {
            if let Err(e) = self.delete(id).await {
                warn!(id = %id, error = %e, "Could not remove superseded auto checkpoint");
            }
        }
        info!(id = %checkpoint.id(), node = %node.id, "Auto checkpoint saved");
        Ok(Some(checkpoint))
    }

    async fn write(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        fs::create_dir_all(&self.dir).await?;
        let content = serde_json::to_string_pretty(checkpoint)?;
        let temp = self.temp_path_for(checkpoint.id());
        let result = async {
            fs::write(&temp, content).await?;
            fs::rename(&temp, self.path_for(checkpoint.id())).await
        }
        .await;
        if let Err(e) = result {
            let _ = fs::remove_file(&temp).await;
            warn!(error = %e, "Checkpoint write failed");
            return Err(e.into());
        }
        Ok(())
    }

    /// All readable checkpoints, most recent first. Corrupted files are skipped.
    pub async fn list(&self) -> Result<Vec<CheckpointSummary>, CheckpointError> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut summaries = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_json = path.extension().map(|e| e == "json").unwrap_or(false);
            let hidden = path
                .file_name()
                .map(|n| n.to_string_lossy().starts_with('.'))
                .unwrap_or(true);
            if !is_json || hidden {
                continue;
            }
            match peek_summary(&path).await {
                Ok(summary) => summaries.push(summary),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable checkpoint"),
            }
        }

        summaries.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.turn.cmp(&a.turn))
        });
        Ok(summaries)
    }

    /// The newest checkpoint, if any.
    pub async fn most_recent(&self) -> Result<Option<CheckpointSummary>, CheckpointError> {
        Ok(self.list().await?.into_iter().next())
    }

    /// Load a checkpoint exactly as saved.
    pub async fn restore(&self, id: CheckpointId) -> Result<Checkpoint, CheckpointError> {
        let path = self.path_for(id);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CheckpointError::NotFound(id))
            }
            Err(e) => return Err(e.into()),
        };
        let checkpoint: Checkpoint = match serde_json::from_str(&content) {
            Ok(checkpoint) => checkpoint,
            Err(e) => {
                warn!(id = %id, error = %e, "Corrupted checkpoint");
                return Err(CheckpointError::NotFound(id));
            }
        };
        if checkpoint.version != CHECKPOINT_VERSION || checkpoint.id() != id {
            warn!(id = %id, version = checkpoint.version, "Incompatible checkpoint");
            return Err(CheckpointError::NotFound(id));
        }
        debug!(id = %id, node = %checkpoint.node_id(), "Checkpoint restored");
        Ok(checkpoint)
    }

    /// Remove a checkpoint.
    pub async fn delete(&self, id: CheckpointId) -> Result<(), CheckpointError> {
        match fs::remove_file(self.path_for(id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(CheckpointError::NotFound(id)),
            Err(e) => Err(e.into()),
        }
    }
}

async fn peek_summary(path: &Path) -> Result<CheckpointSummary, CheckpointError> {
    let content = fs::read_to_string(path).await?;

    #[derive(Deserialize)]
    struct Partial {
        version: u32,
        summary: CheckpointSummary,
    }

    let partial: Partial = serde_json::from_str(&content)?;
    if partial.version != CHECKPOINT_VERSION {
        return Err(CheckpointError::NotFound(partial.summary.id));
    }
    Ok(partial.summary)
}
