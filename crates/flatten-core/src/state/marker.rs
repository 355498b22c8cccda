// # Liveness Marker
//
// The only state the flattener persists: a small file rewritten after
// every fully successful pass. External monitors poll its modification
// time (or its `last_success` field) to detect a stalled job.
//
// ## Crash Safety
//
// - Atomic writes: new content goes to a temporary file, then is renamed
//   over the marker, so a monitor never reads a half-written file
// - A failed write leaves the previous marker in place
//
// ## File Format
//
// ```json
// {
//   "version": "1.0",
//   "last_success": "2025-01-09T12:00:00Z",
//   "cname": "myapp.herokuapp.com",
//   "domain": "example.com",
//   "addresses": ["192.0.2.1", "192.0.2.2"]
// }
// ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::engine::ReconciliationReport;
use crate::Error;

/// Marker file format version
const MARKER_FILE_VERSION: &str = "1.0";

/// Serializable marker file format
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkerContents {
    pub version: String,
    pub last_success: DateTime<Utc>,
    pub cname: String,
    pub domain: String,
    pub addresses: Vec<Ipv4Addr>,
}

/// File touched after each successful pass
#[derive(Debug, Clone)]
pub struct LivenessMarker {
    path: PathBuf,
}

impl LivenessMarker {
    /// Create a marker at `path`; nothing is written until [`touch`](Self::touch)
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Path of the marker file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record a successful pass
    pub async fn touch(&self, report: &ReconciliationReport) -> Result<(), Error> {
        let contents = MarkerContents {
            version: MARKER_FILE_VERSION.to_string(),
            last_success: Utc::now(),
            cname: report.cname.clone(),
            domain: report.domain.clone(),
            addresses: report.desired.iter().copied().collect(),
        };

        let json = serde_json::to_string_pretty(&contents)?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            fs::create_dir_all(parent).await.map_err(|e| {
                Error::Other(format!(
                    "Failed to create marker directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        // Write to temporary file first
        let temp_path = self.temp_path();
        {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(json.as_bytes()).await?;
            file.flush().await?;
        }

        fs::rename(&temp_path, &self.path).await.map_err(|e| {
            Error::Other(format!(
                "Failed to rename {} to {}: {}",
                temp_path.display(),
                self.path.display(),
                e
            ))
        })?;

        tracing::debug!("Liveness marker updated: {}", self.path.display());
        Ok(())
    }

    /// Read the last recorded success, if the marker exists
    pub async fn last_success(&self) -> Result<Option<MarkerContents>, Error> {
        if !self.path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&self.path).await?;
        let contents: MarkerContents = serde_json::from_str(&content)?;

        if contents.version != MARKER_FILE_VERSION {
            tracing::warn!(
                "Marker file version mismatch: expected {}, got {}",
                MARKER_FILE_VERSION,
                contents.version
            );
        }

        Ok(Some(contents))
    }

    /// Get path to temporary file for atomic writes
    fn temp_path(&self) -> PathBuf {
        let mut temp = self.path.clone().into_os_string();
        temp.push(".tmp");
        PathBuf::from(temp)
    }
}
