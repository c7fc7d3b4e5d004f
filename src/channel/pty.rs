//! Pseudo-terminal helpers shared by [`Channel`](crate::channel::Channel)
//! and the command spawn path.

use std::os::fd::{AsFd, OwnedFd};
use std::path::PathBuf;

use nix::fcntl::{fcntl, FcntlArg, FdFlag, OFlag};
use nix::pty::{openpty, Winsize};
use nix::sys::termios::{self, SetArg, Termios};
use nix::unistd::ttyname;

use crate::error::SetupError;

/// A freshly opened pseudo-terminal pair.
///
/// `hub` is the master side used by the supervisor to relay bytes; `held` is
/// the slave side the supervisor keeps open so terminal state survives
/// external opens and closes; `path` is the slave device path that gets
/// published.
pub struct PtyPair {
    /// Master descriptor, already in non-blocking mode.
    pub hub: OwnedFd,
    /// Slave descriptor held open by the supervisor.
    pub held: OwnedFd,
    /// Device path of the slave side.
    pub path: PathBuf,
}

/// Opens a pty pair, puts the hub side into non-blocking mode and optionally
/// switches the held side to raw mode. Both descriptors are close-on-exec;
/// a spawned command re-opens the slave path itself and must not inherit
/// anybody's endpoints.
pub fn open_pair(raw: bool) -> Result<PtyPair, SetupError> {
    let pty = openpty(None::<&Winsize>, None::<&Termios>).map_err(SetupError::OpenPty)?;
    let hub = pty.master;
    let held = pty.slave;

    set_nonblocking(&hub).map_err(SetupError::OpenPty)?;
    set_cloexec(&hub).map_err(SetupError::OpenPty)?;
    set_cloexec(&held).map_err(SetupError::OpenPty)?;
    let path = ttyname(held.as_fd()).map_err(SetupError::OpenPty)?;

    if raw {
        set_raw(&held).map_err(SetupError::Terminal)?;
    }

    Ok(PtyPair { hub, held, path })
}

/// Adds `O_NONBLOCK` to the descriptor's file status flags.
pub fn set_nonblocking(fd: &impl AsFd) -> nix::Result<()> {
    let flags = fcntl(fd.as_fd(), FcntlArg::F_GETFL)?;
    let flags = OFlag::from_bits_retain(flags) | OFlag::O_NONBLOCK;
    fcntl(fd.as_fd(), FcntlArg::F_SETFL(flags))?;
    Ok(())
}

/// Marks the descriptor close-on-exec.
pub fn set_cloexec(fd: &impl AsFd) -> nix::Result<()> {
    fcntl(fd.as_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))?;
    Ok(())
}

/// Switches the terminal into raw (uncooked) mode.
pub fn set_raw(fd: &impl AsFd) -> nix::Result<()> {
    let mut attrs = termios::tcgetattr(fd.as_fd())?;
    termios::cfmakeraw(&mut attrs);
    termios::tcsetattr(fd.as_fd(), SetArg::TCSANOW, &attrs)?;
    Ok(())
}

