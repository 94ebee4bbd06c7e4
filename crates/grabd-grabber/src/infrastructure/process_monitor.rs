//! The Process-Liveness Monitor.
//!
//! Watches one peer pid and delivers exactly one [`PeerExit`] into the
//! owner's mailbox when that process terminates.  On Linux the wait is a
//! `pidfd` registered with the Tokio reactor, so no thread or timer is spent
//! on it.  Where `pidfd_open` is missing or fails, the monitor polls
//! `kill(pid, 0)` instead.
//!
//! Dropping or stopping the monitor cancels the wait; a notification that was
//! already queued still carries the generation it was started with.

use std::io;
use std::time::Duration;

use grabd_ipc::ChannelId;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, warn};

use crate::application::arbitrator::{PeerExit, PeerWatch};

pub struct ProcessMonitor {
    pid: i32,
    task: Option<JoinHandle<()>>,
}

impl ProcessMonitor {
    /// Starts watching `pid`.  Must be called from within a Tokio runtime.
    pub fn start<E>(
        pid: i32,
        generation: ChannelId,
        poll_interval: Duration,
        events: mpsc::Sender<E>,
    ) -> Self
    where
        E: From<PeerExit> + Send + 'static,
    {
        let task = tokio::spawn(async move {
            wait_for_exit(pid, poll_interval).await;
            debug!(pid, %generation, "watched process exited");
            let _ = events.send(E::from(PeerExit { generation, pid })).await;
        });
        Self {
            pid,
            task: Some(task),
        }
    }

    pub fn pid(&self) -> i32 {
        self.pid
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Cancels the wait.  Idempotent.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for ProcessMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

impl PeerWatch for ProcessMonitor {
    fn stop(&mut self) {
        ProcessMonitor::stop(self);
    }
}

async fn wait_for_exit(pid: i32, poll_interval: Duration) {
    if pid <= 0 {
        return;
    }

    #[cfg(target_os = "linux")]
    {
        match pidfd::wait(pid).await {
            Ok(()) => return,
            Err(e) if e.raw_os_error() == Some(libc::ESRCH) => return,
            Err(e) => debug!(pid, error = %e, "pidfd unavailable; polling"),
        }
    }

    let mut ticker = time::interval(poll_interval);
    loop {
        ticker.tick().await;
        match is_alive(pid) {
            Ok(true) => {}
            Ok(false) => return,
            Err(e) => {
                warn!(pid, error = %e, "cannot probe process; treating as exited");
                return;
            }
        }
    }
}

/// `kill(pid, 0)`: `EPERM` still means the process exists.
fn is_alive(pid: i32) -> io::Result<bool> {
    // SAFETY: signal 0 performs only the existence and permission check.
    if unsafe { libc::kill(pid, 0) } == 0 {
        return Ok(true);
    }
    let err = io::Error::last_os_error();
    match err.raw_os_error() {
        Some(libc::ESRCH) => Ok(false),
        Some(libc::EPERM) => Ok(true),
        _ => Err(err),
    }
}

#[cfg(target_os = "linux")]
mod pidfd {
    use std::io;
    use std::os::fd::{FromRawFd, OwnedFd, RawFd};

    use tokio::io::unix::AsyncFd;
    use tokio::io::Interest;

    /// Resolves once `pid` has exited.
    pub(super) async fn wait(pid: i32) -> io::Result<()> {
        let fd = open(pid)?;
        let fd = AsyncFd::with_interest(fd, Interest::READABLE)?;
        let _guard = fd.readable().await?;
        Ok(())
    }

    fn open(pid: i32) -> io::Result<OwnedFd> {
        // SAFETY: pidfd_open takes a pid and flags and returns a new fd or -1.
        let raw = unsafe { libc::syscall(libc::SYS_pidfd_open, pid, 0) };
        if raw < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: the syscall returned a fresh descriptor that nothing else owns.
        Ok(unsafe { OwnedFd::from_raw_fd(raw as RawFd) })
    }
}
