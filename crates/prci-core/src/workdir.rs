//! Per-task working directories: no shared on-disk state across workers
//! (spec.md §5). Each task gets its own directory named by a fresh UUID,
//! the way `gator-core::isolation` names a worktree per task.

use std::path::{Path, PathBuf};

use uuid::Uuid;

/// Create a fresh working directory for a task under `jobs_root`.
pub fn create_workdir(jobs_root: &Path) -> std::io::Result<PathBuf> {
    let dir = jobs_root.join(Uuid::new_v4().to_string());
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Remove a task's working directory. Tolerates it already being gone.
pub fn remove_workdir(dir: &Path) -> std::io::Result<()> {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_workdir_makes_a_unique_directory() {
        let root = tempfile::tempdir().unwrap();
        let a = create_workdir(root.path()).unwrap();
        let b = create_workdir(root.path()).unwrap();
        assert!(a.exists());
        assert!(b.exists());
        assert_ne!(a, b);
    }

    #[test]
    fn remove_workdir_tolerates_missing_directory() {
        let root = tempfile::tempdir().unwrap();
        let missing = root.path().join("does-not-exist");
        assert!(remove_workdir(&missing).is_ok());
    }

    #[test]
    fn remove_workdir_deletes_contents() {
        let root = tempfile::tempdir().unwrap();
        let dir = create_workdir(root.path()).unwrap();
        std::fs::write(dir.join("file.txt"), b"data").unwrap();
        remove_workdir(&dir).unwrap();
        assert!(!dir.exists());
    }
}
