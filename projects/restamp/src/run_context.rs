use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub const CONTAINER_EXTENSION: &str = "ivf";

/// All containers under `root`, in file-name order, skipping `output_dir`.
pub fn list_containers(root: &Path, output_dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.path() != output_dir)
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.path()
                .extension()
                .and_then(|s| s.to_str())
                .map(|s| s.to_lowercase() == CONTAINER_EXTENSION)
                .unwrap_or(false)
        })
        .map(|e| e.path().to_path_buf())
        .collect()
}

/// Deletes a repaired container once it is no longer needed.
pub async fn remove_intermediate(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::debug!("Removed intermediate {:?}", path),
        Err(e) => tracing::warn!("Failed to remove intermediate {:?}: {}", path, e),
    }
}
