//! Agent persistence - Store session and run-state snapshots on disk
//!
//! Directory structure:
//! ```text
//! {data_dir}/
//!   agents/
//!     {agent_id}/
//!       session.json   # AgentSession snapshot
//!       state.json     # {state, totalTokens, totalCost, savedAt}
//! ```
//!
//! Each file is replaced atomically: full content goes to a uniquely named
//! temp file in the same directory, which is then renamed over the
//! canonical path. The two files are written independently.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use hub_core::agent::{is_valid_agent_id, validate_agent_id, AgentSession};
use hub_core::run::RunState;

use crate::error::{Result, RunnerError};

const SESSION_FILE: &str = "session.json";
const STATE_FILE: &str = "state.json";

/// Run-state snapshot written alongside the session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    pub state: RunState,
    pub total_tokens: u64,
    pub total_cost: f64,
    pub saved_at: DateTime<Utc>,
}

impl StateSnapshot {
    pub fn new(state: RunState, total_tokens: u64, total_cost: f64) -> Self {
        Self {
            state,
            total_tokens,
            total_cost,
            saved_at: Utc::now(),
        }
    }
}

/// The on-disk pair for one agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredAgentRecord {
    pub session: AgentSession,
    pub state: StateSnapshot,
}

/// Listing entry for a stored agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredAgentSummary {
    pub agent_id: String,
    pub state: RunState,
    pub total_tokens: u64,
    pub total_cost: f64,
    pub saved_at: DateTime<Utc>,
}

/// Agent store rooted at one directory
#[derive(Debug, Clone)]
pub struct AgentStore {
    base_dir: PathBuf,
}

impl AgentStore {
    /// Create a store under `{data_dir}/agents`
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self::at(data_dir.as_ref().join("agents"))
    }

    /// Create a store rooted exactly at `base_dir`
    pub fn at(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Directory for a validated agent id
    fn agent_dir(&self, agent_id: &str) -> Result<PathBuf> {
        let agent_id = validate_agent_id(agent_id)?;
        Ok(self.base_dir.join(agent_id))
    }

    /// Persist both snapshots
    pub async fn save(
        &self,
        agent_id: &str,
        session: &AgentSession,
        state: &StateSnapshot,
    ) -> Result<()> {
        let dir = self.agent_dir(agent_id)?;
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| RunnerError::store_io(&dir, e))?;

        let session_json = serde_json::to_vec_pretty(session)?;
        let state_json = serde_json::to_vec_pretty(state)?;

        write_atomic(&dir.join(SESSION_FILE), &session_json).await?;
        write_atomic(&dir.join(STATE_FILE), &state_json).await?;

        debug!(agent_id, state = %state.state, "Saved agent snapshot");
        Ok(())
    }

    /// Load both snapshots. `Ok(None)` when the agent has no session file.
    pub async fn load(&self, agent_id: &str) -> Result<Option<StoredAgentRecord>> {
        let dir = self.agent_dir(agent_id)?;

        let session_path = dir.join(SESSION_FILE);
        let session_bytes = match tokio::fs::read(&session_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(RunnerError::store_io(session_path, e)),
        };
        let session: AgentSession = serde_json::from_slice(&session_bytes)?;

        let state = read_state(&dir.join(STATE_FILE)).await?;

        Ok(Some(StoredAgentRecord { session, state }))
    }

    /// Remove the agent's directory. Absent is fine.
    pub async fn delete(&self, agent_id: &str) -> Result<()> {
        let dir = self.agent_dir(agent_id)?;
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {
                info!(agent_id, "Deleted agent snapshot");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(RunnerError::store_io(dir, e)),
        }
    }

    /// Enumerate stored agents, newest first. Entries with invalid names or
    /// unreadable state are skipped.
    pub async fn list(&self) -> Result<Vec<StoredAgentSummary>> {
        let mut entries = match tokio::fs::read_dir(&self.base_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(RunnerError::store_io(&self.base_dir, e)),
        };

        let mut agents = Vec::new();
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!("Failed to read store directory entry: {}", e);
                    continue;
                }
            };

            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if !is_valid_agent_id(&name) {
                continue;
            }
            match entry.file_type().await {
                Ok(file_type) if file_type.is_dir() => {}
                _ => continue,
            }

            match read_state(&entry.path().join(STATE_FILE)).await {
                Ok(state) => agents.push(StoredAgentSummary {
                    agent_id: name,
                    state: state.state,
                    total_tokens: state.total_tokens,
                    total_cost: state.total_cost,
                    saved_at: state.saved_at,
                }),
                Err(e) => {
                    warn!(agent_id = %name, "Skipping agent with unreadable state: {}", e);
                }
            }
        }

        agents.sort_by(|a, b| b.saved_at.cmp(&a.saved_at));
        Ok(agents)
    }
}

async fn read_state(path: &Path) -> Result<StateSnapshot> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| RunnerError::store_io(path, e))?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Write `content` to a temp file next to `path`, then rename it into place
async fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let temp_path = parent.join(format!(".{}.tmp", Uuid::new_v4().as_hyphenated()));

    if let Err(e) = write_and_sync(&temp_path, content).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(RunnerError::store_io(&temp_path, e));
    }

    if let Err(e) = tokio::fs::rename(&temp_path, path).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(RunnerError::store_io(path, e));
    }

    // the rename itself is only durable once the directory entry is flushed
    sync_dir(parent)
        .await
        .map_err(|e| RunnerError::store_io(parent, e))
}

#[cfg(unix)]
async fn sync_dir(dir: &Path) -> std::io::Result<()> {
    tokio::fs::File::open(dir).await?.sync_all().await
}

#[cfg(not(unix))]
async fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

async fn write_and_sync(path: &Path, content: &[u8]) -> std::io::Result<()> {
    use tokio::io::AsyncWriteExt;

    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(content).await?;
    file.sync_all().await
}
