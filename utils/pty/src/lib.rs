//! Spawn a child process with its stdin and stderr attached to a
//! pseudo-terminal while stdout stays wherever the caller pointed it.
//!
//! Interactive permission prompts require a terminal-like channel, but the
//! child's primary output must stay separate from its diagnostics, so only
//! two of the three standard streams go through the PTY. Unix only.

use std::fs::File;
use std::io;
use std::io::Read;
use std::io::Write;
use std::os::fd::AsRawFd;
use std::os::fd::FromRawFd;
use std::os::fd::OwnedFd;
use std::process::Stdio;

use tokio::process::Child;
use tokio::process::Command;

/// A child process attached to a PTY, plus the master side of that PTY.
#[derive(Debug)]
pub struct PtySession {
    pub child: Child,
    pub master: PtyMaster,
}

/// Master side of the PTY. Reads yield whatever the child writes to its
/// stderr (and the terminal echo of anything written back); writes land on
/// the child's stdin.
#[derive(Debug)]
pub struct PtyMaster {
    file: File,
}

impl PtyMaster {
    pub fn reader(&self) -> io::Result<MasterReader> {
        Ok(MasterReader {
            file: self.file.try_clone()?,
        })
    }

    pub fn writer(&self) -> io::Result<MasterWriter> {
        Ok(MasterWriter {
            file: self.file.try_clone()?,
        })
    }
}

/// Blocking reader over the PTY master. Linux reports `EIO` on the master
/// once every slave handle is closed; that is this reader's end of stream.
#[derive(Debug)]
pub struct MasterReader {
    file: File,
}

impl Read for MasterReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match self.file.read(buf) {
                Ok(n) => return Ok(n),
                Err(err) if err.raw_os_error() == Some(libc::EIO) => return Ok(0),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
    }
}

/// Blocking writer over the PTY master.
#[derive(Debug)]
pub struct MasterWriter {
    file: File,
}

impl Write for MasterWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// Spawn `command` with stdin and stderr attached to a fresh PTY.
///
/// The caller configures stdout (typically `Stdio::piped()`). The child is
/// killed when the session is dropped before it has exited, which ties its
/// lifetime to whatever future owns the session.
pub fn spawn_with_pty(mut command: Command) -> io::Result<PtySession> {
    let (master, slave) = openpty()?;

    command.stdin(Stdio::from(slave.try_clone()?));
    command.stderr(Stdio::from(slave));
    command.kill_on_drop(true);

    let child = command.spawn()?;

    Ok(PtySession {
        child,
        master: PtyMaster {
            file: File::from(master),
        },
    })
}

fn openpty() -> io::Result<(OwnedFd, OwnedFd)> {
    let mut master: libc::c_int = -1;
    let mut slave: libc::c_int = -1;
    // SAFETY: openpty fills both fds on success and touches nothing else
    // because the name/termios/winsize out-parameters are null.
    let rc = unsafe {
        libc::openpty(
            &mut master,
            &mut slave,
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            std::ptr::null_mut(),
        )
    };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: on success both fds are valid and owned by us.
    let master = unsafe { OwnedFd::from_raw_fd(master) };
    // SAFETY: same as above.
    let slave = unsafe { OwnedFd::from_raw_fd(slave) };

    // The master must not leak into the child, or the master side would
    // never observe end of stream after the child exits.
    set_cloexec(&master)?;

    Ok((master, slave))
}

fn set_cloexec(fd: &OwnedFd) -> io::Result<()> {
    // SAFETY: fd is a valid open descriptor for the lifetime of the call.
    let rc = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_SETFD, libc::FD_CLOEXEC) };
    if rc == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
