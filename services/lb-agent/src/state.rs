//! Status file - a snapshot of the last completed cycle
//!
//! Written for operators; overwritten every cycle and never read back.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use crate::types::BinId;

/// Writes `state/now.json` under the status directory
pub struct StatusWriter {
    state_dir: PathBuf,
}

/// Last completed cycle (state/now.json)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NowState {
    pub timestamp: String,
    pub mode: String,
    pub cycle: u64,
    pub state: String,
    pub active_bin: Option<BinId>,
    pub position_bins: Vec<BinId>,
    pub last_action: Option<String>,
    pub last_error: Option<String>,
}

impl StatusWriter {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            state_dir: base_dir.as_ref().join("state"),
        }
    }

    pub async fn init(&self) -> anyhow::Result<()> {
        fs::create_dir_all(&self.state_dir).await?;
        Ok(())
    }

    pub fn now_path(&self) -> PathBuf {
        self.state_dir.join("now.json")
    }

    /// Replace now.json via a temp file so readers never see a torn write
    pub async fn write_now(&self, state: &NowState) -> anyhow::Result<()> {
        let path = self.now_path();
        let tmp = self.state_dir.join("now.json.tmp");
        let json = serde_json::to_string_pretty(state)?;
        fs::write(&tmp, json).await?;
        fs::rename(&tmp, &path).await?;
        debug!("Wrote state/now.json (cycle {})", state.cycle);
        Ok(())
    }
}
