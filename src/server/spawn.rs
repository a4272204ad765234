//! PTY allocation and shell fork/exec for one pane (§4.E "Pane creation").
//!
//! Grounded on the teacher's `pty/spawn.rs` double-fork/PTY-open sequence,
//! narrowed to the single-fork-per-pane contract §1 carves out as the only
//! in-scope slice of "shell launching mechanics": obtain `(master_fd, pid)`.

use std::ffi::CString;
use std::os::unix::io::RawFd;

use nix::unistd::{close, dup2, execvp, fork, setsid, ForkResult, Pid};

use crate::error::{MuxError, Result};

/// Open a PTY pair, returning `(master_fd, slave_fd)`. The slave is opened
/// once on the server side so its window size can be set before the child
/// inherits it (§4.E).
fn open_pty() -> Result<(RawFd, RawFd)> {
    unsafe {
        let master_fd = libc::posix_openpt(libc::O_RDWR | libc::O_NOCTTY);
        if master_fd < 0 {
            return Err(MuxError::Pty("posix_openpt failed".into()));
        }
        if libc::grantpt(master_fd) < 0 {
            libc::close(master_fd);
            return Err(MuxError::Pty("grantpt failed".into()));
        }
        if libc::unlockpt(master_fd) < 0 {
            libc::close(master_fd);
            return Err(MuxError::Pty("unlockpt failed".into()));
        }
        let slave_name = libc::ptsname(master_fd);
        if slave_name.is_null() {
            libc::close(master_fd);
            return Err(MuxError::Pty("ptsname failed".into()));
        }
        let slave_cstr = std::ffi::CStr::from_ptr(slave_name);
        let slave_fd = libc::open(slave_cstr.as_ptr(), libc::O_RDWR);
        if slave_fd < 0 {
            libc::close(master_fd);
            return Err(MuxError::Pty("open(slave) failed".into()));
        }
        Ok((master_fd, slave_fd))
    }
}

fn set_winsize(fd: RawFd, cols: u16, rows: u16) {
    let ws = libc::winsize {
        ws_row: rows,
        ws_col: cols,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    unsafe {
        libc::ioctl(fd, libc::TIOCSWINSZ, &ws);
    }
}

/// Resolve the login shell: `$SHELL`, else the passwd-database shell, else
/// `/bin/sh` (§6 "Environment").
fn login_shell() -> String {
    if let Ok(shell) = std::env::var("SHELL") {
        if !shell.is_empty() {
            return shell;
        }
    }
    unsafe {
        let pw = libc::getpwuid(libc::getuid());
        if !pw.is_null() {
            let shell_ptr = (*pw).pw_shell;
            if !shell_ptr.is_null() {
                if let Ok(s) = std::ffi::CStr::from_ptr(shell_ptr).to_str() {
                    if !s.is_empty() {
                        return s.to_string();
                    }
                }
            }
        }
    }
    "/bin/sh".to_string()
}

/// True if the server is itself already running inside a `muxkit` or `tmux`
/// session (§6 "Environment": refuse to nest).
pub fn already_nested() -> Option<String> {
    if std::env::var("MUXKIT").map(|v| !v.is_empty()).unwrap_or(false) {
        return Some("muxkit".into());
    }
    if std::env::var("TMUX").map(|v| !v.is_empty()).unwrap_or(false) {
        return Some("tmux".into());
    }
    None
}

/// Open a PTY, set its initial size, and fork the shell onto the slave.
/// Returns `(master_fd, child_pid)` to the caller; the slave fd is closed in
/// the parent so the master sees EOF once the shell exits (§4.E).
pub fn spawn_shell(cols: u16, rows: u16) -> Result<(RawFd, i32)> {
    let (master_fd, slave_fd) = open_pty()?;
    set_winsize(slave_fd, cols, rows);

    match unsafe { fork() }.map_err(|e| MuxError::Fork(e.to_string()))? {
        ForkResult::Parent { child } => {
            let _ = close(slave_fd);
            Ok((master_fd, child.as_raw()))
        }
        ForkResult::Child => {
            let _ = close(master_fd);
            exec_shell_in_child(slave_fd);
        }
    }
}

/// Runs entirely in the forked child: new session, controlling terminal,
/// stdio redirection, then `execvp`. Never returns.
fn exec_shell_in_child(slave_fd: RawFd) -> ! {
    let _ = setsid();
    unsafe {
        if libc::ioctl(slave_fd, libc::TIOCSCTTY as u64, 0) < 0 {
            std::process::exit(1);
        }
    }
    if dup2(slave_fd, 0).is_err() || dup2(slave_fd, 1).is_err() || dup2(slave_fd, 2).is_err() {
        std::process::exit(1);
    }
    if slave_fd > 2 {
        let _ = close(slave_fd);
    }

    std::env::set_var("TERM", "xterm-256color");
    std::env::set_var("MUXKIT", std::process::id().to_string());

    let shell = login_shell();
    let shell_cstr = match CString::new(shell) {
        Ok(c) => c,
        Err(_) => std::process::exit(1),
    };
    let _ = execvp(&shell_cstr, &[shell_cstr.clone()]);
    std::process::exit(1);
}

/// Reap every exited child without blocking, returning their pids.
pub fn reap_children() -> Vec<Pid> {
    use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
    let mut reaped = Vec::new();
    loop {
        match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::Exited(pid, _)) | Ok(WaitStatus::Signaled(pid, _, _)) => {
                reaped.push(pid);
            }
            Ok(WaitStatus::StillAlive) => break,
            Ok(_) => continue,
            Err(_) => break,
        }
    }
    reaped
}
