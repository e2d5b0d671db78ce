//! Best-effort VCS state probe. Failures are silent: a capture without
//! git metadata is still a capture.

use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::debug;

/// HEAD commit hash and current branch for the project, when the path
/// resolves inside an accessible repository.
pub async fn probe(project_path: &str, workspace_root: &str) -> (Option<String>, Option<String>) {
    let dir = resolve_project_dir(project_path, workspace_root);
    let Some(dir) = dir else {
        return (None, None);
    };

    let hash = git_output(&dir, &["rev-parse", "HEAD"]).await;
    let branch = git_output(&dir, &["rev-parse", "--abbrev-ref", "HEAD"]).await;
    (hash, branch)
}

/// Absolute paths are used as-is; relative ones resolve under the
/// workspace root.
fn resolve_project_dir(project_path: &str, workspace_root: &str) -> Option<PathBuf> {
    let candidate = if Path::new(project_path).is_absolute() {
        PathBuf::from(project_path)
    } else {
        Path::new(workspace_root).join(project_path)
    };
    if candidate.is_dir() {
        Some(candidate)
    } else {
        debug!(path = %candidate.display(), "project path not accessible, skipping VCS probe");
        None
    }
}

async fn git_output(dir: &Path, args: &[&str]) -> Option<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}
