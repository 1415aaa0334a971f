//! Generated input files.

use std::path::Path;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::{ProvisionError, Result};

/// Mode of generated input files.
pub const PRIVATE_FILE_MODE: u32 = 0o600;

/// Writes `content` to `path` atomically, readable by the owner only.
///
/// # Errors
///
/// Returns [`ProvisionError::InputFiles`] if any step fails.
pub async fn write_private_file(path: &Path, content: &[u8]) -> Result<()> {
    let fail = |message: String| ProvisionError::input_file(path, message);

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| fail(format!("Failed to create directory: {e}")))?;
    }

    let temp_path = path.with_extension("tmp");

    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(PRIVATE_FILE_MODE);

    let mut file = options
        .open(&temp_path)
        .await
        .map_err(|e| fail(format!("Failed to create temp file: {e}")))?;

    file.write_all(content)
        .await
        .map_err(|e| fail(format!("Failed to write file: {e}")))?;
    file.sync_all()
        .await
        .map_err(|e| fail(format!("Failed to sync file: {e}")))?;
    drop(file);

    // A stale temp file keeps its old mode.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&temp_path, std::fs::Permissions::from_mode(PRIVATE_FILE_MODE))
            .await
            .map_err(|e| fail(format!("Failed to set permissions: {e}")))?;
    }

    fs::rename(&temp_path, path)
        .await
        .map_err(|e| fail(format!("Failed to rename file: {e}")))?;

    debug!("Wrote {}", path.display());
    Ok(())
}

/// Removes a generated file if it exists.
///
/// # Errors
///
/// Returns [`ProvisionError::InputFiles`] if the file exists and cannot be removed.
pub async fn remove_file_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => {
            debug!("Removed {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(ProvisionError::input_file(path, format!("Failed to remove file: {e}")).into()),
    }
}
