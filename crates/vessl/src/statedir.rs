//! Per-container on-disk state directories.
//!
//! Each container owns one directory under a shared state root:
//!
//! ```text
//! <root>/<container-id>/processes/<process-id>/
//! ```
//!
//! Creation is atomic from the outside: either the container directory and
//! its `processes` subdirectory both exist afterwards, or neither does.
//! All operations are synchronous filesystem calls; callers that mutate the
//! same container id concurrently must serialize (the service layer does).

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{EngineError, EngineResult};

/// Name of the nested directory holding per-process state.
const PROCESSES_DIR: &str = "processes";

/// Handle to one container's state directory.
#[derive(Debug, Clone)]
pub struct StateDir {
    path: PathBuf,
}

impl StateDir {
    /// Create `root/id` and its `processes` subdirectory, creating `root`
    /// itself if needed.
    ///
    /// Fails with [`EngineError::ContainerExists`] if `root/id` is already
    /// present. If the nested directory cannot be created, the container
    /// directory is removed again before the error is returned.
    pub fn create(root: &Path, id: &str) -> EngineResult<Self> {
        fs::create_dir_all(root).map_err(|err| EngineError::fs("creating state root", root, err))?;
        let path = root.join(id);
        match fs::create_dir(&path) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                return Err(EngineError::ContainerExists(id.to_string()));
            }
            Err(err) => return Err(EngineError::fs("creating container dir", path, err)),
        }
        let processes = path.join(PROCESSES_DIR);
        if let Err(err) = fs::create_dir(&processes) {
            // rollback partial creation
            let _ = fs::remove_dir_all(&path);
            return Err(EngineError::fs("creating processes dir", processes, err));
        }
        Ok(Self { path })
    }

    /// Open the state directory of an existing container.
    ///
    /// Fails with [`EngineError::ContainerNotFound`] if `root/id` does not
    /// exist. Creates nothing.
    pub fn load(root: &Path, id: &str) -> EngineResult<Self> {
        let path = root.join(id);
        if !path.is_dir() {
            return Err(EngineError::ContainerNotFound(id.to_string()));
        }
        Ok(Self { path })
    }

    /// The container directory this handle manages.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the state directory for one process and return its path.
    pub fn new_process(&self, process_id: &str) -> EngineResult<PathBuf> {
        let dir = self.process_dir(process_id);
        fs::create_dir(&dir).map_err(|err| EngineError::fs("creating process dir", &dir, err))?;
        Ok(dir)
    }

    /// Path of one process's state directory. Pure computation, no I/O.
    pub fn process_dir(&self, process_id: &str) -> PathBuf {
        self.path.join(PROCESSES_DIR).join(process_id)
    }

    /// Remove one process's state directory recursively.
    pub fn delete_process(&self, process_id: &str) -> EngineResult<()> {
        let dir = self.process_dir(process_id);
        fs::remove_dir_all(&dir).map_err(|err| EngineError::fs("removing process dir", dir, err))
    }

    /// Full paths of all per-process state directories.
    pub fn processes(&self) -> EngineResult<Vec<PathBuf>> {
        let dir = self.path.join(PROCESSES_DIR);
        let read = || -> io::Result<Vec<PathBuf>> {
            let mut dirs = Vec::new();
            for entry in fs::read_dir(&dir)? {
                let entry = entry?;
                if entry.file_type()?.is_dir() {
                    dirs.push(entry.path());
                }
            }
            Ok(dirs)
        };
        read().map_err(|err| EngineError::fs("reading processes dir", &dir, err))
    }

    /// Remove the whole container directory recursively.
    pub fn delete(&self) -> EngineResult<()> {
        fs::remove_dir_all(&self.path)
            .map_err(|err| EngineError::fs("removing container dir", &self.path, err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_create_and_load() {
        let root = TempDir::new().unwrap();
        let dir = StateDir::create(root.path(), "c1").unwrap();
        assert!(dir.path().is_dir());
        assert!(dir.path().join(PROCESSES_DIR).is_dir());

        let loaded = StateDir::load(root.path(), "c1").unwrap();
        assert_eq!(loaded.path(), dir.path());
    }

    #[test]
    fn test_create_rejects_existing_id() {
        let root = TempDir::new().unwrap();
        let first = StateDir::create(root.path(), "c1").unwrap();
        first.new_process("init").unwrap();

        let err = StateDir::create(root.path(), "c1").unwrap_err();
        assert!(matches!(err, EngineError::ContainerExists(id) if id == "c1"));
        // the first container's state is untouched
        assert!(first.process_dir("init").is_dir());
    }

    #[test]
    fn test_load_missing_id_fails() {
        let root = TempDir::new().unwrap();
        let err = StateDir::load(root.path(), "nope").unwrap_err();
        assert!(matches!(err, EngineError::ContainerNotFound(id) if id == "nope"));
    }

    #[test]
    fn test_create_rolls_back_when_nested_dir_fails() {
        // Grow the root path to just under PATH_MAX so that creating the
        // container directory succeeds but the nested processes directory
        // pushes past the limit and fails.
        let tmp = TempDir::new().unwrap();
        let mut root = tmp.path().to_path_buf();
        loop {
            let remaining = 4087usize.saturating_sub(root.as_os_str().len());
            if remaining < 2 {
                break;
            }
            root.push("d".repeat((remaining - 1).min(200)));
        }
        fs::create_dir_all(&root).unwrap();

        let err = StateDir::create(&root, "c1").unwrap_err();
        assert!(matches!(
            err,
            EngineError::Fs {
                op: "creating processes dir",
                ..
            }
        ));
        assert!(!root.join("c1").exists());
        assert!(StateDir::load(&root, "c1").is_err());
    }

    #[test]
    fn test_fs_errors_carry_operation_and_path() {
        let root = TempDir::new().unwrap();
        let dir = StateDir::create(root.path(), "c1").unwrap();

        let rendered = dir.delete_process("ghost").unwrap_err().to_string();
        assert!(rendered.contains("removing process dir"));
        assert!(rendered.contains("ghost"));

        // a handle whose tree vanished reports which directory it was reading
        fs::remove_dir_all(dir.path()).unwrap();
        let err = dir.processes().unwrap_err();
        assert!(matches!(
            err,
            EngineError::Fs {
                op: "reading processes dir",
                ..
            }
        ));
        assert!(err.to_string().contains("c1"));
    }

    #[test]
    fn test_process_dirs() {
        let root = TempDir::new().unwrap();
        let dir = StateDir::create(root.path(), "c1").unwrap();

        let init = dir.new_process("init").unwrap();
        assert_eq!(init, dir.process_dir("init"));
        assert!(init.is_dir());

        let listed = dir.processes().unwrap();
        assert_eq!(listed, vec![init.clone()]);

        dir.delete_process("init").unwrap();
        assert!(!init.exists());
        assert!(dir.processes().unwrap().is_empty());
    }

    #[test]
    fn test_delete_removes_tree() {
        let root = TempDir::new().unwrap();
        let dir = StateDir::create(root.path(), "c1").unwrap();
        dir.new_process("init").unwrap();

        dir.delete().unwrap();
        assert!(!dir.path().exists());
        assert!(StateDir::load(root.path(), "c1").is_err());
    }
}
