//! Per-run scratch directories
//!
//! Materializes a run workspace from the deployed template tree plus the
//! generated file overlay, and tears it down when the run reaches a terminal
//! state. Overlay paths are untrusted model output and are validated before
//! any write.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Errors from workspace operations
#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("Unsafe path in generated files: {0}")]
    UnsafePath(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type WorkspaceResult<T> = Result<T, WorkspaceError>;

/// Manages run workspaces under a configured base directory
pub struct WorkspaceManager {
    base: PathBuf,
    template_dir: PathBuf,
}

impl WorkspaceManager {
    pub fn new(base: PathBuf, template_dir: PathBuf) -> Self {
        Self { base, template_dir }
    }

    /// Root directory of a run's workspace
    pub fn root(&self, run_id: &str) -> PathBuf {
        self.base.join(run_id)
    }

    /// Whether a run's workspace currently exists
    pub fn exists(&self, run_id: &str) -> bool {
        self.root(run_id).is_dir()
    }

    /// Create the workspace: template tree first, generated files on top.
    ///
    /// The overlay wins on conflict. Parent directories are created as
    /// needed. Returns the workspace root.
    pub async fn materialize(
        &self,
        run_id: &str,
        files: &HashMap<String, String>,
    ) -> WorkspaceResult<PathBuf> {
        let root = self.root(run_id);

        // Validate the whole overlay before touching the filesystem, so a
        // rejected run leaves no partial tree behind.
        let mut overlay = Vec::with_capacity(files.len());
        for (path, content) in files {
            overlay.push((sanitize(path)?, content));
        }

        tokio::fs::create_dir_all(&root).await?;

        if self.template_dir.is_dir() {
            copy_template(&self.template_dir, &root).await?;
        } else {
            warn!(
                "Template directory {} missing, materializing overlay only",
                self.template_dir.display()
            );
        }

        for (relative, content) in overlay {
            let target = root.join(&relative);

            if let Some(parent) = target.parent() {
                ensure_no_symlink(&root, parent)?;
                tokio::fs::create_dir_all(parent).await?;
            }

            tokio::fs::write(&target, content).await?;
        }

        debug!("Materialized workspace for run {} at {}", run_id, root.display());
        Ok(root)
    }

    /// Delete a run's workspace recursively; idempotent
    pub async fn remove(&self, run_id: &str) -> WorkspaceResult<()> {
        let root = self.root(run_id);

        match tokio::fs::remove_dir_all(&root).await {
            Ok(()) => {
                debug!("Removed workspace for run {}", run_id);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Validate a relative overlay path.
///
/// Rejects absolute prefixes, `..`, and empty paths rather than cleaning
/// them: a traversal attempt in generated output is a failed run, not a
/// repairable one.
fn sanitize(path: &str) -> WorkspaceResult<PathBuf> {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return Err(WorkspaceError::UnsafePath(path.to_string()));
    }

    let mut result = PathBuf::new();

    for component in Path::new(trimmed).components() {
        match component {
            Component::Normal(c) => result.push(c),
            Component::CurDir => {}
            Component::ParentDir | Component::Prefix(_) | Component::RootDir => {
                return Err(WorkspaceError::UnsafePath(path.to_string()));
            }
        }
    }

    if result.as_os_str().is_empty() {
        return Err(WorkspaceError::UnsafePath(path.to_string()));
    }

    Ok(result)
}

/// Refuse to write through a symlinked directory inside the workspace
fn ensure_no_symlink(root: &Path, target: &Path) -> WorkspaceResult<()> {
    let mut current = target;

    loop {
        if current == root {
            return Ok(());
        }

        if let Ok(meta) = std::fs::symlink_metadata(current) {
            if meta.file_type().is_symlink() {
                return Err(WorkspaceError::UnsafePath(
                    current.to_string_lossy().to_string(),
                ));
            }
        }

        match current.parent() {
            Some(parent) => current = parent,
            None => return Ok(()),
        }
    }
}

/// Copy the template tree into the workspace root
async fn copy_template(template: &Path, root: &Path) -> WorkspaceResult<()> {
    for entry in WalkDir::new(template).follow_links(false) {
        let entry = entry.map_err(|e| {
            WorkspaceError::Io(e.into_io_error().unwrap_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::Other, "walkdir error")
            }))
        })?;

        let relative = entry
            .path()
            .strip_prefix(template)
            .expect("walkdir yields descendants of its root");
        if relative.as_os_str().is_empty() {
            continue;
        }

        let target = root.join(relative);

        if entry.file_type().is_dir() {
            tokio::fs::create_dir_all(&target).await?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::copy(entry.path(), &target).await?;
        }
        // Symlinks in the template are skipped; the workspace is bind-mounted
        // into containers and must not point outside itself.
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manager(temp: &TempDir) -> WorkspaceManager {
        WorkspaceManager::new(
            temp.path().join("workspaces"),
            temp.path().join("template"),
        )
    }

    fn files(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_sanitize_rejects_escapes() {
        assert!(sanitize("../etc/passwd").is_err());
        assert!(sanitize("foo/../../etc/passwd").is_err());
        assert!(sanitize("/etc/passwd").is_err());
        assert!(sanitize("").is_err());
        assert!(sanitize("./").is_err());

        assert_eq!(sanitize("app/page.tsx").unwrap(), PathBuf::from("app/page.tsx"));
        assert_eq!(sanitize("./package.json").unwrap(), PathBuf::from("package.json"));
    }

    #[tokio::test]
    async fn test_materialize_overlays_template() {
        let temp = TempDir::new().unwrap();
        let manager = manager(&temp);

        std::fs::create_dir_all(temp.path().join("template/app")).unwrap();
        std::fs::write(temp.path().join("template/package.json"), "{}").unwrap();
        std::fs::write(temp.path().join("template/app/layout.tsx"), "layout").unwrap();

        let root = manager
            .materialize(
                "run-1",
                &files(&[
                    ("package.json", r#"{"name":"overlay"}"#),
                    ("app/page.tsx", "page"),
                ]),
            )
            .await
            .unwrap();

        // Overlay wins on conflict, template survives elsewhere
        assert_eq!(
            std::fs::read_to_string(root.join("package.json")).unwrap(),
            r#"{"name":"overlay"}"#
        );
        assert_eq!(
            std::fs::read_to_string(root.join("app/layout.tsx")).unwrap(),
            "layout"
        );
        assert_eq!(std::fs::read_to_string(root.join("app/page.tsx")).unwrap(), "page");
    }

    #[tokio::test]
    async fn test_materialize_without_template() {
        let temp = TempDir::new().unwrap();
        let manager = manager(&temp);

        let root = manager
            .materialize("run-2", &files(&[("index.js", "ok")]))
            .await
            .unwrap();

        assert_eq!(std::fs::read_to_string(root.join("index.js")).unwrap(), "ok");
    }

    #[tokio::test]
    async fn test_materialize_rejects_traversal_without_writing() {
        let temp = TempDir::new().unwrap();
        let manager = manager(&temp);

        let result = manager
            .materialize(
                "run-3",
                &files(&[("ok.txt", "fine"), ("../escape.txt", "bad")]),
            )
            .await;

        assert!(matches!(result, Err(WorkspaceError::UnsafePath(_))));
        assert!(!manager.exists("run-3"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_materialize_rejects_symlink_parent() {
        let temp = TempDir::new().unwrap();
        let manager = manager(&temp);

        // First materialization plants a symlinked directory
        manager.materialize("run-4", &files(&[("a.txt", "a")])).await.unwrap();
        let root = manager.root("run-4");
        std::os::unix::fs::symlink(temp.path(), root.join("link")).unwrap();

        let result = manager
            .materialize("run-4", &files(&[("link/inner.txt", "bad")]))
            .await;

        assert!(matches!(result, Err(WorkspaceError::UnsafePath(_))));
    }

    #[tokio::test]
    async fn test_remove_leaves_no_trace_and_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let manager = manager(&temp);

        manager
            .materialize("run-5", &files(&[("deep/nested/file.txt", "x")]))
            .await
            .unwrap();
        assert!(manager.exists("run-5"));

        manager.remove("run-5").await.unwrap();
        assert!(!manager.exists("run-5"));

        // Idempotent
        manager.remove("run-5").await.unwrap();

        // No trace under the base path
        let leftovers: Vec<_> = std::fs::read_dir(temp.path().join("workspaces"))
            .unwrap()
            .collect();
        assert!(leftovers.is_empty());
    }
}
