use std::path::{Component, Path, PathBuf};

use uuid::Uuid;

use crate::config::WorkspaceConfig;
use crate::error::{AppError, Result};
use crate::pipeline::state::ArtifactSet;

/// Entries that survive restaging: provider plugins, the lock file, and state.
const PRESERVED_ENTRIES: &[&str] = &[
    ".terraform",
    ".terraform.lock.hcl",
    "terraform.tfstate",
    "terraform.tfstate.backup",
];

/// Manages per-run working directories for the Terraform tools.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    base_dir: PathBuf,
}

/// A directory owned by exactly one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunWorkspace {
    pub run_id: Uuid,
    pub path: PathBuf,
}

impl WorkspaceManager {
    pub fn new(config: &WorkspaceConfig) -> Self {
        Self {
            base_dir: config.base_dir.clone(),
        }
    }

    /// Create a fresh, empty directory for a run.
    pub async fn create(&self, run_id: Uuid) -> Result<RunWorkspace> {
        let path = self.workspace_path(run_id);

        if path.exists() {
            tokio::fs::remove_dir_all(&path)
                .await
                .map_err(|e| AppError::Workspace(format!("Failed to clean workspace: {e}")))?;
        }
        tokio::fs::create_dir_all(&path)
            .await
            .map_err(|e| AppError::Workspace(format!("Failed to create workspace dir: {e}")))?;

        Ok(RunWorkspace { run_id, path })
    }

    /// Remove a run directory.
    pub async fn cleanup(&self, workspace: &RunWorkspace) -> Result<()> {
        if workspace.path.exists() {
            tokio::fs::remove_dir_all(&workspace.path)
                .await
                .map_err(|e| AppError::Workspace(format!("Failed to cleanup workspace: {e}")))?;
        }
        Ok(())
    }

    pub fn workspace_path(&self, run_id: Uuid) -> PathBuf {
        self.base_dir.join(format!("run-{run_id}"))
    }
}

impl RunWorkspace {
    /// Replace the staged artifact set with `files`.
    ///
    /// Files from a previous attempt are removed first so a changed file list
    /// never leaves stale code behind.
    pub async fn stage(&self, files: &ArtifactSet) -> Result<()> {
        let mut entries = tokio::fs::read_dir(&self.path)
            .await
            .map_err(|e| AppError::Workspace(format!("Failed to read workspace: {e}")))?;

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if name
                .to_str()
                .is_some_and(|n| PRESERVED_ENTRIES.contains(&n))
            {
                continue;
            }
            let path = entry.path();
            if entry.file_type().await?.is_dir() {
                tokio::fs::remove_dir_all(&path).await?;
            } else {
                tokio::fs::remove_file(&path).await?;
            }
        }

        for (name, content) in files {
            let full_path = verify_path(&self.path, name)?;
            if let Some(parent) = full_path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&full_path, content).await.map_err(|e| {
                AppError::Workspace(format!("Failed to write {name}: {e}"))
            })?;
        }

        Ok(())
    }

    /// Read back the named files, e.g. after a formatter rewrote them.
    pub async fn read_files<'a, I>(&self, names: I) -> Result<ArtifactSet>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut files = ArtifactSet::new();
        for name in names {
            let full_path = verify_path(&self.path, name)?;
            let content = tokio::fs::read_to_string(&full_path)
                .await
                .map_err(|e| AppError::Workspace(format!("Failed to read {name}: {e}")))?;
            files.insert(name.clone(), content);
        }
        Ok(files)
    }

    pub fn is_initialized(&self) -> bool {
        self.path.join(".terraform").is_dir()
    }

    pub fn state_file(&self) -> PathBuf {
        self.path.join("terraform.tfstate")
    }
}

/// Resolve a generated filename inside the workspace, rejecting anything
/// that could land outside it.
pub fn verify_path(root: &Path, name: &str) -> Result<PathBuf> {
    let requested = Path::new(name);

    if name.trim().is_empty() {
        return Err(AppError::Workspace("Empty file name".to_string()));
    }

    let escapes = requested.components().any(|c| {
        matches!(
            c,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    });
    if escapes {
        return Err(AppError::Workspace(format!(
            "Path traversal detected: {name} is outside workspace"
        )));
    }

    if PRESERVED_ENTRIES
        .iter()
        .any(|p| requested.starts_with(p))
    {
        return Err(AppError::Workspace(format!(
            "Refusing to overwrite tool-managed file: {name}"
        )));
    }

    Ok(root.join(requested))
}

/// Copy a finished artifact set into `output_dir/<run-id>/` and return the
/// directory.
pub async fn save_project(
    output_dir: &Path,
    run_id: Uuid,
    files: &ArtifactSet,
    manifest: &str,
) -> Result<PathBuf> {
    let project = output_dir.join(run_id.to_string());
    tokio::fs::create_dir_all(&project)
        .await
        .map_err(|e| AppError::Workspace(format!("Failed to create project dir: {e}")))?;

    for (name, content) in files {
        let full_path = verify_path(&project, name)?;
        if let Some(parent) = full_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&full_path, content).await?;
    }
    tokio::fs::write(project.join(MANIFEST_FILE), manifest).await?;

    Ok(project)
}

pub const MANIFEST_FILE: &str = "canopy-run.toml";

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(base: &Path) -> WorkspaceManager {
        WorkspaceManager::new(&WorkspaceConfig {
            base_dir: base.to_path_buf(),
            output_dir: None,
        })
    }

    fn files(entries: &[(&str, &str)]) -> ArtifactSet {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_verify_path_rejects_traversal() {
        let root = Path::new("/tmp/ws");
        assert!(verify_path(root, "../evil.tf").is_err());
        assert!(verify_path(root, "/etc/passwd").is_err());
        assert!(verify_path(root, "modules/../../x.tf").is_err());
        assert!(verify_path(root, "").is_err());
        assert!(verify_path(root, "terraform.tfstate").is_err());
    }

    #[test]
    fn test_verify_path_accepts_nested() {
        let root = Path::new("/tmp/ws");
        assert_eq!(
            verify_path(root, "modules/vpc/main.tf").unwrap(),
            PathBuf::from("/tmp/ws/modules/vpc/main.tf")
        );
    }

    #[tokio::test]
    async fn test_runs_get_separate_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let mgr = manager(tmp.path());
        let a = mgr.create(Uuid::new_v4()).await.unwrap();
        let b = mgr.create(Uuid::new_v4()).await.unwrap();
        assert_ne!(a.path, b.path);
        assert!(a.path.is_dir() && b.path.is_dir());
    }

    #[tokio::test]
    async fn test_restage_drops_stale_files_keeps_state() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = manager(tmp.path()).create(Uuid::new_v4()).await.unwrap();

        ws.stage(&files(&[("provider.tf", "p"), ("extra.tf", "x")]))
            .await
            .unwrap();
        std::fs::create_dir_all(ws.path.join(".terraform")).unwrap();
        std::fs::write(ws.state_file(), "{}").unwrap();

        ws.stage(&files(&[("provider.tf", "p2"), ("main.tf", "m")]))
            .await
            .unwrap();

        assert!(!ws.path.join("extra.tf").exists());
        assert_eq!(std::fs::read_to_string(ws.path.join("provider.tf")).unwrap(), "p2");
        assert!(ws.is_initialized());
        assert!(ws.state_file().exists());

        let names = vec!["provider.tf".to_string(), "main.tf".to_string()];
        let read = ws.read_files(&names).await.unwrap();
        assert_eq!(read.keys().collect::<Vec<_>>(), vec!["provider.tf", "main.tf"]);
    }

    #[tokio::test]
    async fn test_cleanup_removes_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let mgr = manager(tmp.path());
        let ws = mgr.create(Uuid::new_v4()).await.unwrap();
        mgr.cleanup(&ws).await.unwrap();
        assert!(!ws.path.exists());
        // Cleaning twice is fine
        mgr.cleanup(&ws).await.unwrap();
    }

    #[tokio::test]
    async fn test_save_project_writes_files_and_manifest() {
        let tmp = tempfile::tempdir().unwrap();
        let run_id = Uuid::new_v4();
        let dir = save_project(
            tmp.path(),
            run_id,
            &files(&[("main.tf", "resource")]),
            "outcome = \"deployed\"\n",
        )
        .await
        .unwrap();

        assert_eq!(dir, tmp.path().join(run_id.to_string()));
        assert_eq!(std::fs::read_to_string(dir.join("main.tf")).unwrap(), "resource");
        assert!(dir.join(MANIFEST_FILE).exists());
    }
}
