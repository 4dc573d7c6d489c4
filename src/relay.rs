//! Relay loop
//!
//! Moves bytes between the real input, the pty master and the real output,
//! duplicating one side into the transcript. The loop blocks in exactly one
//! place, the readiness wait, and that is where signals are noticed.
//!
//! ```text
//!   BothOpen ──(input EOF)──> StdinDrained ──(1s re-arm, tty only)──> BothOpen
//!      │                           │
//!      └──(pty closed / error / cancel)──> Terminated
//! ```

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::AsFd;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::libc;
use nix::poll::{poll, PollFd, PollFlags};

use crate::pty::{get_window_size, set_window_size};
use crate::signals::SignalFlags;
use crate::terminal;
use crate::transcript::{Direction, Transcript};

/// Bytes moved per read, in each direction
pub const BUF_SIZE: usize = 8192;

/// How long a drained terminal input stays unpolled
const STDIN_REARM: Duration = Duration::from_secs(1);

/// Relay state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    /// Reading from both the input and the pty master
    BothOpen,
    /// Input reported end-of-file; only the pty master is read
    StdinDrained,
    Terminated,
}

/// Why the relay stopped
#[derive(Debug)]
pub enum RelayExit {
    /// The child side of the pty went away
    PtyClosed,
    /// A terminating signal arrived
    Cancelled,
    /// The readiness wait failed
    Poll(Errno),
    Input(io::Error),
    Output(io::Error),
    /// Reading or writing the pty master failed
    Pty(io::Error),
    Transcript(io::Error),
}

impl RelayExit {
    /// Whether the session ended the ordinary way
    pub fn is_clean(&self) -> bool {
        matches!(self, Self::PtyClosed)
    }
}

/// Relay behaviour switches
#[derive(Debug, Clone, Copy, Default)]
pub struct RelayOptions {
    /// Flush the transcript after every iteration
    pub force_flush: bool,
    /// The input is a terminal: re-arm it after EOF and follow its size
    pub input_is_tty: bool,
}

/// One session's relay between input, output and the pty master
pub struct Relay<'a, I, O, W: Write> {
    input: I,
    output: O,
    master: &'a File,
    transcript: &'a mut Transcript<W>,
    signals: &'a SignalFlags,
    options: RelayOptions,
    state: RelayState,
    /// EOF characters written to the pty
    eof_forwarded: usize,
}

impl<'a, I, O, W> Relay<'a, I, O, W>
where
    I: Read + AsFd,
    O: Write,
    W: Write,
{
    pub fn new(
        input: I,
        output: O,
        master: &'a File,
        transcript: &'a mut Transcript<W>,
        signals: &'a SignalFlags,
        options: RelayOptions,
    ) -> Self {
        Self {
            input,
            output,
            master,
            transcript,
            signals,
            options,
            state: RelayState::BothOpen,
            eof_forwarded: 0,
        }
    }

    pub fn state(&self) -> RelayState {
        self.state
    }

    pub fn eof_forwarded(&self) -> usize {
        self.eof_forwarded
    }

    /// Give back the output endpoint
    pub fn into_output(self) -> O {
        self.output
    }

    /// Relay until either side closes, an error occurs or a signal cancels
    pub fn run(&mut self) -> RelayExit {
        let exit = self.relay();
        self.state = RelayState::Terminated;
        tracing::debug!(?exit, eof_forwarded = self.eof_forwarded, "relay terminated");
        exit
    }

    fn relay(&mut self) -> RelayExit {
        let mut ibuf = [0u8; BUF_SIZE];
        let mut obuf = [0u8; BUF_SIZE];

        loop {
            if self.signals.cancel_requested() {
                return RelayExit::Cancelled;
            }
            if self.signals.take_resize() {
                self.propagate_resize();
            }

            let watch_input = self.state == RelayState::BothOpen;
            let rearm = self.state == RelayState::StdinDrained && self.options.input_is_tty;
            let timeout = if rearm {
                Some(STDIN_REARM)
            } else {
                self.transcript.until_next_flush(Instant::now())
            };

            let ready = self.wait_ready(watch_input, timeout);
            if rearm {
                self.state = RelayState::BothOpen;
            }
            let (input_ready, master_ready) = match ready {
                Ok(ready) => ready,
                Err(Errno::EINTR) => continue,
                Err(e) => return RelayExit::Poll(e),
            };

            if input_ready {
                match self.input.read(&mut ibuf) {
                    Ok(0) => {
                        if let Err(e) = self.forward_eof() {
                            return RelayExit::Pty(e);
                        }
                        self.state = RelayState::StdinDrained;
                        tracing::debug!("input drained");
                    },
                    Ok(n) => {
                        let chunk = &ibuf[..n];
                        let mut master = self.master;
                        if let Err(e) = master.write_all(chunk) {
                            return RelayExit::Pty(e);
                        }
                        if let Err(e) = self.transcript.record(Direction::Input, chunk) {
                            return RelayExit::Transcript(e);
                        }
                    },
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => {},
                    Err(e) => return RelayExit::Input(e),
                }
            }

            if master_ready {
                let mut master = self.master;
                match master.read(&mut obuf) {
                    Ok(0) => return RelayExit::PtyClosed,
                    Ok(n) => {
                        let chunk = &obuf[..n];
                        let written = self
                            .output
                            .write_all(chunk)
                            .and_then(|_| self.output.flush());
                        if let Err(e) = written {
                            return RelayExit::Output(e);
                        }
                        if let Err(e) = self.transcript.record(Direction::Output, chunk) {
                            return RelayExit::Transcript(e);
                        }
                    },
                    // Linux reports a hung-up slave as EIO
                    Err(e) if e.raw_os_error() == Some(libc::EIO) => return RelayExit::PtyClosed,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => {},
                    Err(e) => return RelayExit::Pty(e),
                }
            }

            if let Err(e) = self
                .transcript
                .maybe_flush(Instant::now(), self.options.force_flush)
            {
                return RelayExit::Transcript(e);
            }
        }
    }

    /// Wait until the master (and, if watched, the input) is readable
    ///
    /// Returns `(input_ready, master_ready)`.
    fn wait_ready(
        &self,
        watch_input: bool,
        timeout: Option<Duration>,
    ) -> nix::Result<(bool, bool)> {
        let mut fds = vec![PollFd::new(self.master, PollFlags::POLLIN)];
        if watch_input {
            fds.push(PollFd::new(&self.input, PollFlags::POLLIN));
        }

        let n = poll(&mut fds, poll_timeout(timeout))?;
        if n == 0 {
            return Ok((false, false));
        }
        let input_ready = watch_input && is_readable(&fds[1]);
        Ok((input_ready, is_readable(&fds[0])))
    }

    /// Pass end-of-input on to a canonical-mode pty exactly once
    fn forward_eof(&mut self) -> io::Result<()> {
        if let Some(eof) = terminal::canonical_eof(self.master) {
            let mut master = self.master;
            master.write_all(&[eof])?;
            self.eof_forwarded += 1;
        }
        Ok(())
    }

    fn propagate_resize(&self) {
        if !self.options.input_is_tty {
            return;
        }
        match get_window_size(&self.input).and_then(|size| set_window_size(self.master, size)) {
            Ok(()) => tracing::debug!("window size propagated"),
            Err(e) => tracing::warn!("failed to propagate window size: {}", e),
        }
    }
}

/// Hang-ups and errors count as readable: the read reports them
fn is_readable(fd: &PollFd) -> bool {
    let readable =
        PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR | PollFlags::POLLNVAL;
    fd.revents().is_some_and(|r| r.intersects(readable))
}

/// Milliseconds for poll(2), rounded up; -1 blocks indefinitely
fn poll_timeout(timeout: Option<Duration>) -> i32 {
    match timeout {
        None => -1,
        Some(d) => {
            let ms = d.as_micros().div_ceil(1000);
            i32::try_from(ms).unwrap_or(i32::MAX)
        },
    }
}
