//! Geolocation corrections kept on disk between runs.

use hoptrace_core::{GeoFix, TraceError, TraceResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use tracing::debug;

const STORE_FILE: &str = "geo_fixes.json";

#[derive(Debug, Serialize, Deserialize)]
struct StoredFix {
    ip: IpAddr,
    #[serde(flatten)]
    fix: GeoFix,
}

/// A JSON file of corrections, one entry per address.
#[derive(Debug, Clone)]
pub struct FixStore {
    path: PathBuf,
}

impl FixStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `$XDG_DATA_HOME/hoptrace/geo_fixes.json`, falling back to
    /// `$HOME/.local/share`. None when neither is set.
    pub fn default_location() -> Option<Self> {
        let base = std::env::var_os("XDG_DATA_HOME")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".local/share"))
            })?;
        Some(Self::new(base.join("hoptrace").join(STORE_FILE)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn error(&self, reason: impl ToString) -> TraceError {
        TraceError::FixStore {
            path: self.path.display().to_string(),
            reason: reason.to_string(),
        }
    }

    /// Reads every stored correction. A missing file is an empty store.
    pub async fn load(&self) -> TraceResult<HashMap<IpAddr, GeoFix>> {
        let data = match tokio::fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => return Err(self.error(e)),
        };
        let entries: Vec<StoredFix> = serde_json::from_slice(&data).map_err(|e| self.error(e))?;
        debug!(path = %self.path.display(), count = entries.len(), "Loaded geo corrections");
        Ok(entries.into_iter().map(|e| (e.ip, e.fix)).collect())
    }

    /// Replaces the file with `fixes`, sorted by address.
    pub async fn save(&self, fixes: &HashMap<IpAddr, GeoFix>) -> TraceResult<()> {
        let mut entries: Vec<StoredFix> = fixes
            .iter()
            .map(|(ip, fix)| StoredFix {
                ip: *ip,
                fix: fix.clone(),
            })
            .collect();
        entries.sort_by_key(|e| e.ip);
        let json = serde_json::to_vec_pretty(&entries).map_err(|e| self.error(e))?;

        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| self.error(e))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| self.error(e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| self.error(e))
    }
}
