use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use file_guard::{FileGuard, Lock};

/// A lock file that keeps two instances of a pinsync program from running
/// at once.
///
/// Acquiring stamps the caller's pid into the file so an operator can see
/// who holds it. The lock is advisory and is released when the value is
/// dropped or the process exits.
pub struct ProgramLock {
    path: PathBuf,
    _guard: FileGuard<Box<File>>,
}

impl ProgramLock {
    /// Acquire the lock for the named program under the pinsync home
    /// directory. Fails if another process already holds it.
    pub fn acquire(prog_name: &str) -> Result<Self> {
        let path = crate::pinsync_home_path(&format!("{prog_name}.lock"))
            .ok_or_else(|| anyhow!("no home directory"))?;
        Self::acquire_path(path)
            .with_context(|| format!("is another {prog_name} already running?"))
    }

    /// Acquire the lock backed by the file at `path`.
    pub fn acquire_path(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&path)?;
        let guard = file_guard::try_lock(Box::new(file), Lock::Exclusive, 0, 1)?;

        // stamp our pid through the held handle; opening a second handle
        // would release the record lock when it closes
        let mut handle: &File = &guard;
        handle.set_len(0)?;
        handle.write_all(format!("{}\n", std::process::id()).as_bytes())?;

        Ok(Self { path, _guard: guard })
    }

    /// The file backing this lock.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    use nix::sys::wait::waitpid;
    use nix::unistd::{fork, ForkResult};

    // Lock conflicts only show up across processes, so the contender has to
    // be forked. The child reports through a file; an assert!() failure in a
    // forked child is invisible to the test harness.
    #[test]
    fn test_second_process_is_locked_out() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join("pinsyncd.lock");
        let report = dir.path().join("report");

        let held = ProgramLock::acquire_path(lock_path.clone()).unwrap();
        assert_eq!(held.path(), lock_path);

        match unsafe { fork() }.unwrap() {
            ForkResult::Child => {
                let verdict = match ProgramLock::acquire_path(lock_path) {
                    Ok(_) => "acquired",
                    Err(_) => "locked out",
                };
                std::fs::write(&report, verdict).unwrap();
                std::process::exit(0);
            }
            ForkResult::Parent { child } => {
                waitpid(child, None).unwrap();
                assert_eq!(std::fs::read_to_string(&report).unwrap(), "locked out");
            }
        }

        // released on drop; a new acquisition goes through
        drop(held);
        ProgramLock::acquire_path(dir.path().join("pinsyncd.lock")).unwrap();
    }

    #[test]
    fn test_lock_file_carries_pid() {
        let dir = tempfile::tempdir().unwrap();
        let lock = ProgramLock::acquire_path(dir.path().join("pinsyncd.lock")).unwrap();
        let stamped = std::fs::read_to_string(lock.path()).unwrap();
        assert_eq!(stamped.trim(), std::process::id().to_string());
    }
}
