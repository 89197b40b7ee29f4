//! Single-instance guard
//!
//! The DataManager accepts one Modbus session; a second bridge on the same
//! host would steal it every few seconds. The guard writes our pid into a
//! file and refuses to start while that file names a live process.

use std::fs;
use std::path::{Path, PathBuf};

use errors::{BridgeError, BridgeResult};
use sysinfo::{Pid, System};
use tracing::{debug, info, warn};

/// Holds the pid file for the lifetime of the process
#[derive(Debug)]
pub struct PidGuard {
    path: PathBuf,
    pid: u32,
}

impl PidGuard {
    /// Acquire `path`
    ///
    /// A file naming a dead process, or our own pid, is taken over silently.
    /// A live foreign pid fails with [`BridgeError::AlreadyRunning`] unless
    /// `force` is set, in which case the file is replaced.
    pub fn acquire(path: impl AsRef<Path>, force: bool) -> BridgeResult<Self> {
        let path = path.as_ref().to_path_buf();
        let own_pid = std::process::id();

        if let Some(existing) = read_pid(&path) {
            if existing != own_pid && process_alive(existing) {
                if !force {
                    return Err(BridgeError::AlreadyRunning {
                        pid: existing,
                        path: path.display().to_string(),
                    });
                }
                warn!(
                    "Overriding pid file {} held by running pid {}",
                    path.display(),
                    existing
                );
            } else {
                debug!("Removing stale pid file {} (pid {})", path.display(), existing);
            }
        }

        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        fs::write(&path, format!("{own_pid}\n"))?;
        info!("Pid file {} written (pid {})", path.display(), own_pid);

        Ok(Self { path, pid: own_pid })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }
}

impl Drop for PidGuard {
    fn drop(&mut self) {
        // Only remove the file if it still names us
        if read_pid(&self.path) == Some(self.pid) {
            if let Err(e) = fs::remove_file(&self.path) {
                warn!("Failed to remove pid file {}: {}", self.path.display(), e);
            }
        }
    }
}

fn read_pid(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// Whether a process with `pid` currently exists
pub fn process_alive(pid: u32) -> bool {
    let pid = Pid::from_u32(pid);
    let mut sys = System::new();
    sys.refresh_processes_specifics(
        sysinfo::ProcessesToUpdate::Some(&[pid]),
        true,
        sysinfo::ProcessRefreshKind::new(),
    );
    sys.process(pid).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_and_release() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("run/fronsrv.pid");
        {
            let guard = PidGuard::acquire(&path, false).expect("acquire");
            assert_eq!(guard.pid(), std::process::id());
            assert_eq!(read_pid(&path), Some(std::process::id()));
        }
        assert!(!path.exists());
    }

    #[test]
    fn test_stale_pid_taken_over() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("fronsrv.pid");
        // Above the default pid_max on Linux
        fs::write(&path, "4194305\n").expect("write");
        let guard = PidGuard::acquire(&path, false).expect("stale file replaced");
        assert_eq!(read_pid(guard.path()), Some(std::process::id()));
    }

    #[test]
    fn test_garbage_pid_file_replaced() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("fronsrv.pid");
        fs::write(&path, "not a pid").expect("write");
        assert!(PidGuard::acquire(&path, false).is_ok());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_live_foreign_pid_refused_unless_forced() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("fronsrv.pid");
        fs::write(&path, "1\n").expect("write");

        let err = PidGuard::acquire(&path, false).expect_err("pid 1 is alive");
        assert!(matches!(err, BridgeError::AlreadyRunning { pid: 1, .. }));

        let guard = PidGuard::acquire(&path, true).expect("forced");
        assert_eq!(read_pid(guard.path()), Some(std::process::id()));
    }
}
