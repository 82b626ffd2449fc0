//! Process-level mutual exclusion
//!
//! An exclusive `flock(2)` on `<dir>/<name>.lock`. The kernel arbitrates, so
//! two processes starting at the same instant cannot both win, and the lock
//! disappears with its owner however that owner exits. The file also holds
//! the owner's pid, which is only used for messages and `KillOwner`.

use crate::error::LockError;
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// How often a waiting acquire retries
pub const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Time a killed owner gets between SIGTERM and SIGKILL
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(1);

/// What to do when another process holds the lock
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ConflictPolicy {
    #[default]
    FailFast,
    /// Poll until the holder lets go or the timeout passes
    Wait(Duration),
    /// SIGTERM the recorded owner, SIGKILL it after `grace`, then take over
    KillOwner { grace: Duration },
}

pub struct ProcessLock {
    path: PathBuf,
}

impl ProcessLock {
    pub fn new(dir: impl AsRef<Path>, name: &str) -> Self {
        Self {
            path: dir.as_ref().join(format!("{}.lock", name)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> LockError {
        LockError::Io {
            path: self.path.clone(),
            source,
        }
    }

    /// Pid recorded by the current (or last) holder
    pub fn owner(&self) -> Option<i32> {
        let mut raw = String::new();
        File::open(&self.path).ok()?.read_to_string(&mut raw).ok()?;
        raw.trim().parse().ok().filter(|pid| *pid > 0)
    }

    /// One non-blocking attempt. `Ok(None)` means someone else holds it.
    fn try_lock(&self) -> Result<Option<Flock<File>>, LockError> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|e| self.io_error(e))?;
        }

        // No truncate: the file may still name the current holder
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
            .map_err(|e| self.io_error(e))?;

        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(mut locked) => {
                let pid = std::process::id();
                locked
                    .set_len(0)
                    .and_then(|_| locked.seek(SeekFrom::Start(0)))
                    .and_then(|_| writeln!(locked, "{}", pid))
                    .and_then(|_| locked.flush())
                    .map_err(|e| self.io_error(e))?;
                Ok(Some(locked))
            },
            Err((_, Errno::EWOULDBLOCK)) => Ok(None),
            Err((_, errno)) => Err(self.io_error(std::io::Error::from(errno))),
        }
    }

    /// Take the lock, resolving a conflict per `policy`
    pub async fn acquire(&self, policy: &ConflictPolicy) -> Result<LockGuard, LockError> {
        if let Some(lock) = self.try_lock()? {
            return Ok(self.guard(lock));
        }

        match policy {
            ConflictPolicy::FailFast => Err(LockError::Held {
                path: self.path.clone(),
                owner: self.owner(),
            }),
            ConflictPolicy::Wait(timeout) => self.wait(*timeout).await,
            ConflictPolicy::KillOwner { grace } => self.take_over(*grace).await,
        }
    }

    fn guard(&self, lock: Flock<File>) -> LockGuard {
        info!(path = %self.path.display(), pid = std::process::id(), "Process lock acquired");
        LockGuard {
            path: self.path.clone(),
            lock: Some(lock),
        }
    }

    async fn poll_until(&self, deadline: Instant, interval: Duration) -> Result<Option<LockGuard>, LockError> {
        while Instant::now() < deadline {
            let remaining = deadline.saturating_duration_since(Instant::now());
            tokio::time::sleep(interval.min(remaining)).await;
            if let Some(lock) = self.try_lock()? {
                return Ok(Some(self.guard(lock)));
            }
        }
        Ok(None)
    }

    async fn wait(&self, timeout: Duration) -> Result<LockGuard, LockError> {
        info!(
            "Lock {} is held by {:?}, waiting up to {}s",
            self.path.display(),
            self.owner(),
            timeout.as_secs()
        );

        let deadline = Instant::now() + timeout;
        if let Some(guard) = self.poll_until(deadline, LOCK_POLL_INTERVAL).await? {
            return Ok(guard);
        }

        Err(LockError::Timeout {
            path: self.path.clone(),
            waited_secs: timeout.as_secs(),
            owner: self.owner(),
        })
    }

    async fn take_over(&self, grace: Duration) -> Result<LockGuard, LockError> {
        let held = || LockError::Held {
            path: self.path.clone(),
            owner: self.owner(),
        };

        let Some(pid) = self.owner() else {
            warn!("Lock {} is held but records no owner pid", self.path.display());
            return Err(held());
        };
        if u32::try_from(pid).ok() == Some(std::process::id()) {
            return Err(held());
        }

        let target = Pid::from_raw(pid);
        warn!("Lock held by pid {}, sending SIGTERM", pid);
        signal(target, Signal::SIGTERM)?;

        let poll = Duration::from_millis(100);
        if let Some(guard) = self.poll_until(Instant::now() + grace, poll).await? {
            return Ok(guard);
        }

        if kill(target, None).is_ok() {
            warn!("Pid {} survived SIGTERM, sending SIGKILL", pid);
            signal(target, Signal::SIGKILL)?;
        }

        if let Some(guard) = self.poll_until(Instant::now() + grace, poll).await? {
            return Ok(guard);
        }
        Err(held())
    }
}

/// A vanished target is not an error: it was about to exit anyway
fn signal(pid: Pid, sig: Signal) -> Result<(), LockError> {
    match kill(pid, sig) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(source) => Err(LockError::Signal {
            pid: pid.as_raw(),
            source,
        }),
    }
}

/// Held lock. Released on [`LockGuard::release`] or drop. The file stays.
pub struct LockGuard {
    path: PathBuf,
    lock: Option<Flock<File>>,
}

impl LockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_held(&self) -> bool {
        self.lock.is_some()
    }

    /// Idempotent
    pub fn release(&mut self) {
        let Some(lock) = self.lock.take() else {
            return;
        };
        match lock.unlock() {
            Ok(_) => debug!(path = %self.path.display(), "Process lock released"),
            // Dropping the handle closes the descriptor, which releases it too
            Err((_, errno)) => warn!("Explicit unlock of {} failed: {}", self.path.display(), errno),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.release();
    }
}
