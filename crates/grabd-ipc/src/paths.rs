//! Socket locations and ownership.
//!
//! The grabber listens on one well-known path.  Each per-user session binds a
//! path derived from its numeric user id.  Both are removed before binding and
//! restricted to their owner right after; the window between `bind` and the
//! permission fix is kept short, not closed.

use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

const APP_NAME: &str = "grabd";

/// Default directory of the grabber's socket.
pub const SYSTEM_RUNTIME_DIR: &str = "/run/grabd";

/// File name of the grabber's socket inside its runtime directory.
pub const GRABBER_SOCKET_FILE: &str = "grabber.sock";

/// Owner-only read/write.
pub const SOCKET_MODE: u32 = 0o600;

/// Location: `/run/grabd/grabber.sock`
pub fn grabber_socket_path() -> PathBuf {
    PathBuf::from(SYSTEM_RUNTIME_DIR).join(GRABBER_SOCKET_FILE)
}

/// Per-user endpoint of the session agent.
///
/// Location: `$XDG_RUNTIME_DIR/grabd/session-$UID.sock` or
/// `/tmp/grabd-$UID/session-$UID.sock`
pub fn session_socket_path(uid: u32) -> PathBuf {
    let dir = match std::env::var_os("XDG_RUNTIME_DIR") {
        Some(xdg_runtime) if !xdg_runtime.is_empty() => PathBuf::from(xdg_runtime).join(APP_NAME),
        _ => PathBuf::from(format!("/tmp/{APP_NAME}-{uid}")),
    };
    dir.join(format!("session-{uid}.sock"))
}

/// Effective user id of this process.
pub fn current_uid() -> u32 {
    // SAFETY: geteuid() has no preconditions and cannot fail.
    unsafe { libc::geteuid() }
}

/// Creates the directory that will hold `socket_path`.
pub fn ensure_socket_dir(socket_path: &Path) -> io::Result<()> {
    match socket_path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => fs::create_dir_all(dir),
        _ => Ok(()),
    }
}

/// Removes a leftover socket file.  A missing file is not an error.
pub fn remove_stale_socket(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// `chmod 0600` and, when `owner` is given, `chown owner` on a bound socket.
pub fn restrict_to_owner(path: &Path, owner: Option<u32>) -> io::Result<()> {
    fs::set_permissions(path, fs::Permissions::from_mode(SOCKET_MODE))?;
    if owner.is_some() {
        std::os::unix::fs::chown(path, owner, None)?;
    }
    Ok(())
}
