//! Advisory file locking with stale-lock reclamation
//!
//! A lock is a sibling file (`<target>.lock`) whose presence denotes the
//! held state. Acquisition uses exclusive-create semantics and polls on
//! conflict; a lock whose mtime is older than the stale threshold is
//! assumed to belong to a crashed holder and is reclaimed best-effort.
//!
//! This is not a distributed lock: it assumes a local filesystem with
//! atomic create. Fairness between waiters is not guaranteed.

use crate::error::{Result, TeamsError};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Tuning knobs for [`with_lock`].
#[derive(Debug, Clone)]
pub struct LockOptions {
    /// Total time to wait for acquisition before failing with `LockTimeout`.
    pub timeout: Duration,
    /// Poll interval while the lock is held by someone else.
    pub poll: Duration,
    /// Locks with an mtime older than this are treated as abandoned.
    pub stale: Duration,
    /// Optional diagnostic label written into the lock file.
    pub label: Option<String>,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            poll: Duration::from_millis(25),
            stale: Duration::from_secs(60),
            label: None,
        }
    }
}

impl LockOptions {
    pub fn with_label(label: impl Into<String>) -> Self {
        Self {
            label: Some(label.into()),
            ..Self::default()
        }
    }
}

/// Guard that removes the lock file on drop, so the lock is released on
/// every exit path including early returns and panics inside the critical
/// section.
struct LockGuard {
    path: PathBuf,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        // Tolerate races: the file may already have been reclaimed.
        let _ = fs::remove_file(&self.path);
    }
}

fn acquire(path: &Path, opts: &LockOptions) -> Result<LockGuard> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| TeamsError::Io {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }

    let deadline = Instant::now() + opts.timeout;
    loop {
        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(mut file) => {
                // Contents are purely diagnostic.
                let label = opts.label.as_deref().unwrap_or("");
                let _ = writeln!(file, "{} {}", std::process::id(), label);
                return Ok(LockGuard {
                    path: path.to_path_buf(),
                });
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                if is_stale(path, opts.stale) {
                    // Best-effort reclamation of a crashed holder's lock.
                    let _ = fs::remove_file(path);
                    continue;
                }
                if Instant::now() >= deadline {
                    return Err(TeamsError::LockTimeout {
                        path: path.to_path_buf(),
                    });
                }
                std::thread::sleep(opts.poll);
            }
            Err(e) => {
                return Err(TeamsError::Io {
                    path: path.to_path_buf(),
                    source: e,
                });
            }
        }
    }
}

fn is_stale(path: &Path, stale: Duration) -> bool {
    let Ok(meta) = fs::metadata(path) else {
        // Lock vanished between the create attempt and the stat; retry.
        return false;
    };
    let Ok(mtime) = meta.modified() else {
        return false;
    };
    match mtime.elapsed() {
        Ok(age) => age > stale,
        // mtime in the future (clock skew): not stale.
        Err(_) => false,
    }
}

/// Run `f` while holding an exclusive advisory lock at `path`.
///
/// The lock is released on all exit paths; if `f` fails the error is
/// propagated after release. Acquisition failures surface as
/// [`TeamsError::LockTimeout`] (message prefix `"Timeout acquiring lock:"`)
/// or [`TeamsError::Io`].
pub fn with_lock<T, F>(path: &Path, opts: &LockOptions, f: F) -> Result<T>
where
    F: FnOnce() -> Result<T>,
{
    let guard = acquire(path, opts)?;
    let result = f();
    drop(guard);
    result
}
