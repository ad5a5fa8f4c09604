use std::path::{Path, PathBuf};

/// Resolve the run workspace directory: an explicit `--workspace` wins,
/// otherwise walk up from the current directory looking for a
/// `manifest.yaml`, falling back to the current directory itself.
pub fn resolve_workspace(explicit: Option<PathBuf>) -> PathBuf {
    if let Some(ws) = explicit {
        return ws;
    }
    let start = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let mut dir: &Path = &start;
    loop {
        if dir.join(qaflow_core::paths::MANIFEST_FILE).exists() {
            return dir.to_path_buf();
        }
        match dir.parent() {
            Some(parent) => dir = parent,
            None => return start,
        }
    }
}
