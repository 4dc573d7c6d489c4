//! Unix PTY implementation
//!
//! Allocates the pty pair with POSIX APIs and forks the recorded command onto
//! the slave side.

use std::ffi::{CStr, CString, OsStr};
use std::fs::{File, OpenOptions};
use std::os::fd::{FromRawFd, IntoRawFd, OwnedFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::process;
use std::thread;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::libc::{self, STDERR_FILENO, STDIN_FILENO, STDOUT_FILENO};
use nix::pty::{grantpt, posix_openpt, ptsname, unlockpt};
use nix::sys::signal::{kill, signal, SigHandler, Signal};
use nix::sys::termios::{self, SetArg, Termios};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{close, dup2, execv, execvp, fork, setsid, ForkResult, Pid};

use super::{set_window_size, ChildCommand, WindowSize};
use crate::error::{Error, Result};
use crate::terminal;

/// How the slave side is initialised before the child starts
#[derive(Debug, Clone, Default)]
pub struct PtyOptions {
    /// Attributes of the real terminal, copied onto the slave
    pub attrs: Option<Termios>,
    /// Window size of the real terminal, copied onto the slave
    pub size: Option<WindowSize>,
    /// Put the line discipline into raw mode (no translation at all)
    pub raw: bool,
}

/// Open a new pty pair, returning `(master, slave)`
pub fn open_pair() -> Result<(File, File)> {
    let master = posix_openpt(OFlag::O_RDWR | OFlag::O_NOCTTY | OFlag::O_CLOEXEC)
        .map_err(Error::PtyAllocation)?;
    grantpt(&master).map_err(Error::PtyAllocation)?;
    unlockpt(&master).map_err(Error::PtyAllocation)?;

    // SAFETY: ptsname is not thread-safe; the recorder is single-threaded
    // and the name is copied out immediately
    let slave_path = unsafe { ptsname(&master) }.map_err(Error::PtyAllocation)?;

    // SAFETY: into_raw_fd hands over sole ownership of a valid descriptor
    let master = File::from(unsafe { OwnedFd::from_raw_fd(master.into_raw_fd()) });

    let slave = OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_NOCTTY)
        .open(&slave_path)
        .map_err(|source| Error::OpenSlave {
            path: slave_path.clone(),
            source,
        })?;

    tracing::debug!(slave = %slave_path, "allocated pty pair");
    Ok((master, slave))
}

/// Interval between reap attempts while a hung-up child winds down
const REAP_POLL: Duration = Duration::from_millis(20);

/// A pty master with the recorded command running on its slave
pub struct PtySession {
    /// The PTY master, held until the session hangs up
    master: Option<File>,
    /// Child process ID
    child_pid: Pid,
    /// Whether the child has been waited for
    reaped: bool,
}

impl PtySession {
    /// Allocate a pty and fork `command` onto its slave side
    ///
    /// `script_path` is exported to the child as `SCRIPT`. The parent's copy
    /// of the slave is closed before this returns.
    pub fn spawn(
        command: &ChildCommand,
        options: &PtyOptions,
        script_path: &OsStr,
    ) -> Result<Self> {
        let (program, argv) = command.to_exec_args()?;
        let search_path = command.searches_path();

        let (master, slave) = open_pair()?;

        if let Some(attrs) = &options.attrs {
            termios::tcsetattr(&slave, SetArg::TCSANOW, attrs).map_err(Error::Termios)?;
        }
        if let Some(size) = options.size {
            set_window_size(&slave, size).map_err(Error::WindowSize)?;
        }
        if options.raw {
            terminal::make_raw(&master)?;
        }

        // SAFETY: the recorder is single-threaded, and the child only calls
        // async-signal-safe functions before exec
        match unsafe { fork() }.map_err(Error::Fork)? {
            ForkResult::Child => {
                drop(master);
                exec_child(slave, &program, &argv, search_path, script_path)
            },
            ForkResult::Parent { child } => {
                drop(slave);
                tracing::debug!(pid = child.as_raw(), program = command.program(), "child spawned");
                Ok(Self {
                    master: Some(master),
                    child_pid: child,
                    reaped: false,
                })
            },
        }
    }

    /// The PTY master, `None` once the session has hung up
    pub fn master(&self) -> Option<&File> {
        self.master.as_ref()
    }

    /// Get the child process ID
    pub fn child_pid(&self) -> Pid {
        self.child_pid
    }

    /// Send a signal to the child process
    pub fn signal(&self, signal: Signal) -> Result<()> {
        kill(self.child_pid, signal).map_err(Error::Wait)
    }

    /// Block until the child terminates
    pub fn wait(&mut self) -> Result<WaitStatus> {
        loop {
            match waitpid(self.child_pid, None) {
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(Error::Wait(e)),
                Ok(status @ (WaitStatus::Exited(..) | WaitStatus::Signaled(..))) => {
                    self.reaped = true;
                    return Ok(status);
                },
                Ok(status) => return Ok(status),
            }
        }
    }

    /// Close the master, SIGHUP the child and reap it
    ///
    /// A child still running after `grace` is killed with SIGKILL, so this
    /// never blocks for longer than `grace` plus the final reap.
    pub fn hang_up(&mut self, grace: Duration) -> Result<WaitStatus> {
        drop(self.master.take());
        let _ = kill(self.child_pid, Signal::SIGHUP);

        let deadline = Instant::now() + grace;
        loop {
            match waitpid(self.child_pid, Some(WaitPidFlag::WNOHANG)) {
                Ok(status @ (WaitStatus::Exited(..) | WaitStatus::Signaled(..))) => {
                    self.reaped = true;
                    return Ok(status);
                },
                Ok(_) | Err(Errno::EINTR) => {},
                Err(e) => return Err(Error::Wait(e)),
            }
            if Instant::now() >= deadline {
                break;
            }
            thread::sleep(REAP_POLL);
        }

        tracing::debug!(pid = self.child_pid.as_raw(), "child ignored hang-up, killing");
        let _ = kill(self.child_pid, Signal::SIGKILL);
        self.wait()
    }
}

impl Drop for PtySession {
    fn drop(&mut self) {
        if !self.reaped {
            let _ = kill(self.child_pid, Signal::SIGHUP);
            let _ = waitpid(self.child_pid, Some(WaitPidFlag::WNOHANG));
        }
    }
}

/// Child side of the fork: make the slave the controlling terminal and exec
fn exec_child(
    slave: File,
    program: &CStr,
    argv: &[CString],
    search_path: bool,
    script_path: &OsStr,
) -> ! {
    if let Err(e) = attach_controlling_terminal(slave) {
        tracing::warn!("{}: {}", program.to_string_lossy(), e);
        process::exit(1);
    }

    std::env::set_var("SCRIPT", script_path);

    // The Rust runtime ignores SIGPIPE and exec would pass that on
    // SAFETY: no handler is installed, only the default disposition
    let _ = unsafe { signal(Signal::SIGPIPE, SigHandler::SigDfl) };

    let result = if search_path {
        execvp(program, argv)
    } else {
        execv(program, argv)
    };
    let err = match result {
        Ok(never) => match never {},
        Err(e) => e,
    };

    // The only place a child-side failure is reported
    tracing::warn!("{}: {}", program.to_string_lossy(), err.desc());
    process::exit(1);
}

/// New session with `slave` as controlling terminal and standard streams
fn attach_controlling_terminal(slave: File) -> nix::Result<()> {
    setsid()?;

    let fd: RawFd = slave.into_raw_fd();

    // SAFETY: TIOCSCTTY takes an int argument and fd is a valid terminal
    if unsafe { libc::ioctl(fd, libc::TIOCSCTTY as _, 0) } < 0 {
        return Err(Errno::last());
    }

    dup2(fd, STDIN_FILENO)?;
    dup2(fd, STDOUT_FILENO)?;
    dup2(fd, STDERR_FILENO)?;

    if fd > STDERR_FILENO {
        close(fd)?;
    }
    Ok(())
}
