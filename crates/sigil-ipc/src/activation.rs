//! Listening-socket acquisition: adopt a descriptor inherited from the init
//! system when one is offered, otherwise bind the configured path.

use std::fs::{self, Permissions};
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::io::FromRawFd;
use std::os::unix::net::UnixListener;
use std::path::Path;

use tracing::info;

/// First inherited descriptor under the sd_listen_fds convention.
const LISTEN_FDS_START: i32 = 3;

/// A pre-bound listener inherited from the init system, if the environment
/// advertises one for this process. Only the first descriptor is adopted.
pub fn inherited_listener() -> Option<UnixListener> {
    let pid: u32 = std::env::var("LISTEN_PID").ok()?.parse().ok()?;
    let fds: i32 = std::env::var("LISTEN_FDS").ok()?.parse().ok()?;
    if pid != std::process::id() || fds < 1 {
        return None;
    }
    info!(fd = LISTEN_FDS_START, "adopting inherited listener");
    // The init system opened this fd for us and nothing else owns it.
    Some(unsafe { UnixListener::from_raw_fd(LISTEN_FDS_START) })
}

/// Bind `path`, replacing a stale socket left by a previous run.
pub fn bind_path(path: &Path) -> io::Result<UnixListener> {
    if path.exists() {
        fs::remove_file(path)?;
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let listener = UnixListener::bind(path)?;
    fs::set_permissions(path, Permissions::from_mode(0o660))?;
    info!(path = %path.display(), "listening");
    Ok(listener)
}

pub fn inherited_or_bind(path: &Path) -> io::Result<UnixListener> {
    match inherited_listener() {
        Some(listener) => Ok(listener),
        None => bind_path(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // One test owns the LISTEN_* variables; splitting it would race the
    // process-global environment across test threads.
    #[test]
    fn inherited_listener_env_gating() {
        std::env::remove_var("LISTEN_PID");
        std::env::remove_var("LISTEN_FDS");
        assert!(inherited_listener().is_none());

        std::env::set_var("LISTEN_PID", "1");
        std::env::set_var("LISTEN_FDS", "1");
        assert!(inherited_listener().is_none());

        std::env::set_var("LISTEN_PID", std::process::id().to_string());
        std::env::set_var("LISTEN_FDS", "0");
        assert!(inherited_listener().is_none());

        std::env::remove_var("LISTEN_PID");
        std::env::remove_var("LISTEN_FDS");
    }

    #[test]
    fn bind_replaces_stale_socket() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("run").join("test.sock");
        let first = bind_path(&path).unwrap();
        drop(first);
        // The stale inode is still on disk; a rebind must succeed.
        let second = bind_path(&path).unwrap();
        assert!(path.exists());
        drop(second);
    }
}
