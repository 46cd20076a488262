//! File-backed state store.
//!
//! Layout under the store root:
//!
//! ```text
//! state.json                      current state
//! state.json.bak                  previous state, refreshed on every save
//! checkpoints/<id>.state.json     snapshot, created exclusively
//! checkpoints/<id>.json           sidecar {id, description, timestamp, ref}
//! ```
//!
//! All writes go through one writer lock. Files are replaced with
//! write-to-temp then rename so readers never see a partial document.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::refs::{DetachedRefRecorder, RefRecorder};
use super::{CheckpointId, State};
use crate::error::{CheckpointError, StateError};
use crate::util::blocking;

const STATE_FILE: &str = "state.json";
const CHECKPOINT_DIR: &str = "checkpoints";
const SNAPSHOT_SUFFIX: &str = ".state.json";
/// Suffix attempts per timestamp before giving up.
const MAX_ID_ATTEMPTS: u32 = 1000;

/// Sidecar describing one checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: CheckpointId,
    pub description: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "ref")]
    pub reference: String,
}

#[derive(Debug, Clone)]
pub struct StateStore {
    root: PathBuf,
    refs: Arc<dyn RefRecorder>,
    writer: Arc<Mutex<()>>,
}

impl StateStore {
    /// A store rooted at `root` that records detached checkpoint refs.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            refs: Arc::new(DetachedRefRecorder),
            writer: Arc::new(Mutex::new(())),
        }
    }

    pub fn with_refs(mut self, refs: Arc<dyn RefRecorder>) -> Self {
        self.refs = refs;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn state_path(&self) -> PathBuf {
        self.root.join(STATE_FILE)
    }

    pub fn checkpoints_dir(&self) -> PathBuf {
        self.root.join(CHECKPOINT_DIR)
    }

    /// Load the current state. A store that was never written loads empty.
    pub async fn load(&self) -> Result<State, StateError> {
        let path = self.state_path();
        blocking(move || read_state(&path)).await
    }

    pub async fn save(&self, state: &State) -> Result<(), StateError> {
        debug!(
            tasks = state.tasks.len(),
            messages = state.messages.len(),
            "Saving state"
        );
        let contents = serde_json::to_string_pretty(state)?;
        let root = self.root.clone();
        let _guard = self.writer.lock().await;
        blocking(move || write_state(&root, &contents)).await
    }

    /// Snapshot the persisted state under a new checkpoint id.
    ///
    /// The current state's `last_checkpoint` is updated to the new id; the
    /// snapshot itself holds the state as it was before that update.
    pub async fn checkpoint(&self, description: &str) -> Result<CheckpointId, CheckpointError> {
        let root = self.root.clone();
        let refs = self.refs.clone();
        let description = description.to_string();
        let _guard = self.writer.lock().await;

        let checkpoint =
            blocking(move || create_checkpoint(&root, refs.as_ref(), description)).await?;
        info!(
            id = %checkpoint.id,
            reference = %checkpoint.reference,
            description = %checkpoint.description,
            "Checkpoint created"
        );
        Ok(checkpoint.id)
    }

    /// Make the snapshot of `id` the current state and return it.
    ///
    /// The checkpoint files are only read.
    pub async fn restore(&self, id: &CheckpointId) -> Result<State, CheckpointError> {
        let dir = self.checkpoints_dir();
        let target = id.clone();
        let (checkpoint, state) = blocking(move || {
            let checkpoint = read_sidecar(&dir, &target)?;
            let contents = read_existing(&snapshot_path(&dir, &target), &target)?;
            let state: State = serde_json::from_str(&contents)?;
            Ok::<_, CheckpointError>((checkpoint, state))
        })
        .await?;

        self.save(&state).await?;
        info!(id = %checkpoint.id, description = %checkpoint.description, "Checkpoint restored");
        Ok(state)
    }

    /// Every checkpoint sidecar, sorted by id.
    pub async fn list_checkpoints(&self) -> Result<Vec<Checkpoint>, CheckpointError> {
        let dir = self.checkpoints_dir();
        blocking(move || {
            if !dir.exists() {
                return Ok(Vec::new());
            }
            let mut checkpoints = Vec::new();
            for entry in fs::read_dir(&dir)? {
                let path = entry?.path();
                let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                if !name.ends_with(".json") || name.ends_with(SNAPSHOT_SUFFIX) {
                    continue;
                }
                let checkpoint: Checkpoint = serde_json::from_str(&fs::read_to_string(&path)?)?;
                checkpoints.push(checkpoint);
            }
            checkpoints.sort_by(|a, b| a.id.cmp(&b.id));
            Ok(checkpoints)
        })
        .await
    }

    pub async fn checkpoint_info(&self, id: &CheckpointId) -> Result<Checkpoint, CheckpointError> {
        let dir = self.checkpoints_dir();
        let id = id.clone();
        blocking(move || read_sidecar(&dir, &id)).await
    }
}

fn read_state(path: &Path) -> Result<State, StateError> {
    if !path.exists() {
        debug!(path = %path.display(), "State file not found, returning empty state");
        return Ok(State::new());
    }
    let state: State = serde_json::from_str(&fs::read_to_string(path)?)?;
    debug!(tasks = state.tasks.len(), "State loaded");
    Ok(state)
}

fn write_state(root: &Path, contents: &str) -> Result<(), StateError> {
    fs::create_dir_all(root)?;
    let state_path = root.join(STATE_FILE);
    if state_path.exists() {
        fs::copy(&state_path, state_path.with_extension("json.bak"))?;
    }
    write_atomic(&state_path, contents)?;
    debug!(path = %state_path.display(), "State saved");
    Ok(())
}

fn write_atomic(path: &Path, contents: &str) -> std::io::Result<()> {
    let temp_path = path.with_extension("json.tmp");
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&temp_path)?;
    file.write_all(contents.as_bytes())?;
    // Contents must be on disk before the rename makes them visible.
    file.sync_all()?;
    drop(file);
    fs::rename(&temp_path, path)
}

fn snapshot_path(dir: &Path, id: &CheckpointId) -> PathBuf {
    dir.join(format!("{}{}", id, SNAPSHOT_SUFFIX))
}

fn sidecar_path(dir: &Path, id: &CheckpointId) -> PathBuf {
    dir.join(format!("{}.json", id))
}

fn read_existing(path: &Path, id: &CheckpointId) -> Result<String, CheckpointError> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(contents),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            Err(CheckpointError::NotFound(id.to_string()))
        }
        Err(e) => Err(e.into()),
    }
}

fn read_sidecar(dir: &Path, id: &CheckpointId) -> Result<Checkpoint, CheckpointError> {
    let contents = read_existing(&sidecar_path(dir, id), id)?;
    Ok(serde_json::from_str(&contents)?)
}

/// Claim a fresh id by creating its snapshot file exclusively.
fn reserve_snapshot(
    dir: &Path,
    now: DateTime<Utc>,
    contents: &str,
) -> Result<CheckpointId, CheckpointError> {
    let stamp = now.format("%Y%m%dT%H%M%S%6fZ");
    for attempt in 0..MAX_ID_ATTEMPTS {
        let id = CheckpointId::new(format!("{}-{:03}", stamp, attempt))?;
        let opened = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(snapshot_path(dir, &id));
        match opened {
            Ok(mut file) => {
                file.write_all(contents.as_bytes())?;
                file.sync_all()?;
                return Ok(id);
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Err(CheckpointError::Exists(stamp.to_string()))
}

fn create_checkpoint(
    root: &Path,
    refs: &dyn RefRecorder,
    description: String,
) -> Result<Checkpoint, CheckpointError> {
    let dir = root.join(CHECKPOINT_DIR);
    fs::create_dir_all(&dir)?;

    let mut state = read_state(&root.join(STATE_FILE))?;
    let snapshot = serde_json::to_string_pretty(&state)?;
    let timestamp = Utc::now();
    let id = reserve_snapshot(&dir, timestamp, &snapshot)?;

    let reference = match refs.record(&id) {
        Ok(reference) => reference,
        Err(e) => {
            // Release the id so a failed checkpoint leaves nothing behind.
            let _ = fs::remove_file(snapshot_path(&dir, &id));
            return Err(e);
        }
    };

    let checkpoint = Checkpoint {
        id: id.clone(),
        description,
        timestamp,
        reference,
    };
    write_atomic(
        &sidecar_path(&dir, &id),
        &serde_json::to_string_pretty(&checkpoint)?,
    )?;

    state.last_checkpoint = Some(id);
    write_state(root, &serde_json::to_string_pretty(&state)?)?;
    Ok(checkpoint)
}
