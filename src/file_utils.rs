// File utilities for the Whisper-AT API
//
// Each request gets a private workspace folder under the temp directory,
// holding the normalized audio for the job's lifetime. Workspaces are
// removed once the response is delivered, whatever the outcome.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, error};
use uuid::Uuid;

/// A per-job scratch folder
#[derive(Debug, Clone)]
pub struct JobWorkspace {
    /// Job ID; also the folder name
    pub id: Uuid,
    /// Absolute path of the workspace folder
    pub folder: PathBuf,
}

/// Create a uniquely named workspace folder under `base_dir`
pub fn create_job_workspace(base_dir: &str) -> io::Result<JobWorkspace> {
    let id = Uuid::new_v4();
    let folder = Path::new(base_dir).join(id.to_string());
    fs::create_dir_all(&folder)?;
    Ok(JobWorkspace { id, folder })
}

/// Remove a workspace folder and its contents. Failures are logged, not
/// returned; cleanup must never mask the request's real outcome.
pub fn cleanup_workspace(folder: &Path) {
    if let Err(e) = fs::remove_dir_all(folder) {
        error!("Failed to clean up workspace {}: {}", folder.display(), e);
    } else {
        debug!("Cleaned up workspace: {}", folder.display());
    }
}
