//! Session lifecycle
//!
//! A [`Session`] owns everything one recording needs: the saved terminal
//! state, the pty and its child, the transcript and the signal flags. It is
//! built once by [`Session::start`] and torn down once by
//! [`Session::terminate`], whatever ended the relay.

use std::fs::File;
use std::io::{self, BufWriter, Stdin, Write};
use std::os::fd::AsFd;
use std::time::Duration;

use nix::sys::wait::WaitStatus;

use crate::config::Config;
use crate::error::Result;
use crate::pty::{ChildCommand, PtyOptions, PtySession};
use crate::relay::{Relay, RelayExit, RelayOptions};
use crate::signals::SignalFlags;
use crate::terminal::TerminalMode;
use crate::transcript::{CaptureMode, Transcript, TranscriptOptions};

/// How long a hung-up child gets to exit before it is killed
pub const HANG_UP_GRACE: Duration = Duration::from_secs(1);

/// A running recording session
pub struct Session {
    config: Config,
    terminal: TerminalMode<Stdin>,
    transcript: Transcript<BufWriter<File>>,
    pty: PtySession,
    signals: SignalFlags,
}

impl Session {
    /// Open the transcript, spawn the command and put the terminal in raw mode
    ///
    /// Anything acquired before a failure is released on the way out; in
    /// particular the terminal is never left raw.
    pub fn start(config: Config) -> Result<Self> {
        config.validate()?;

        let mut transcript = Transcript::open(
            &config.output_path,
            config.append,
            TranscriptOptions::from(&config),
        )?;

        let mut terminal = TerminalMode::save(io::stdin())?;
        let size = terminal.window_size()?;
        let command = ChildCommand::resolve(&config.command, config.shell.as_deref());
        let signals = SignalFlags::install()?;

        if !config.quiet {
            let path = config.output_path.display();
            writeln!(io::stdout(), "Script started, output file is {}", path)?;
        }
        transcript.write_start_banner(command.command_line())?;

        let options = PtyOptions {
            attrs: terminal.saved().cloned(),
            size,
            raw: !terminal.is_terminal() && config.capture_mode() == CaptureMode::Input,
        };

        terminal.enter_raw()?;
        // The child must not inherit unflushed console output
        io::stdout().flush()?;

        let pty = PtySession::spawn(&command, &options, config.output_path.as_os_str())?;
        tracing::debug!(
            tty = terminal.is_terminal(),
            capture = ?config.capture_mode(),
            "session started"
        );

        Ok(Self {
            config,
            terminal,
            transcript,
            pty,
            signals,
        })
    }

    /// Relay between the real terminal and the pty until the session ends
    pub fn relay(&mut self) -> RelayExit {
        let Some(master) = self.pty.master() else {
            return RelayExit::PtyClosed;
        };
        let (input, output) = match real_endpoints() {
            Ok(endpoints) => endpoints,
            Err(e) => return RelayExit::Input(e),
        };
        let options = RelayOptions {
            force_flush: self.config.force_flush,
            input_is_tty: self.terminal.is_terminal(),
        };

        Relay::new(
            input,
            output,
            master,
            &mut self.transcript,
            &self.signals,
            options,
        )
        .run()
    }

    /// Reap the child and turn its status into the session's exit code
    ///
    /// After an abnormal relay exit the child may never finish on its own:
    /// the terminal is restored first, then the pty is hung up and the child
    /// is given [`HANG_UP_GRACE`] before being killed.
    pub fn finish(&mut self, exit: &RelayExit) -> i32 {
        let status = if exit.is_clean() {
            self.pty.wait()
        } else {
            tracing::debug!(?exit, "relay ended early");
            if let Err(e) = self.terminal.restore() {
                tracing::warn!("{}", e);
            }
            self.pty.hang_up(HANG_UP_GRACE)
        };

        match status {
            Ok(status) => exit_code(status),
            Err(e) => {
                tracing::warn!("{}", e);
                1
            },
        }
    }

    /// Restore the terminal, finalise the transcript and release the pty
    ///
    /// Returns `code` for the caller to exit with.
    pub fn terminate(self, code: i32) -> i32 {
        let Self {
            config,
            mut terminal,
            mut transcript,
            pty,
            signals,
        } = self;

        if let Err(e) = terminal.restore() {
            tracing::warn!("{}", e);
        }
        if let Err(e) = transcript
            .write_end_banner(code)
            .and_then(|_| transcript.close())
        {
            tracing::warn!("{}: {}", config.output_path.display(), e);
        }
        drop(transcript);

        if !config.quiet {
            // stdout may be the broken pipe that ended the relay
            let _ = writeln!(
                io::stdout(),
                "\nScript done, output file is {}",
                config.output_path.display()
            );
        }

        drop(pty);
        drop(signals);
        tracing::debug!(code, "session terminated");
        code
    }
}

/// Run one recording session from start to teardown
///
/// Setup failures are returned as errors; everything after the child is
/// running ends in an exit code.
pub fn run(config: Config) -> Result<i32> {
    let mut session = Session::start(config)?;
    let exit = session.relay();
    let code = session.finish(&exit);
    Ok(session.terminate(code))
}

/// Map a wait status onto the recorder's exit code
///
/// A normal exit passes its code through, a fatal signal reports the signal
/// number, anything else is 1.
pub fn exit_code(status: WaitStatus) -> i32 {
    match status {
        WaitStatus::Exited(_, code) => code,
        WaitStatus::Signaled(_, signal, _) => signal as i32,
        _ => 1,
    }
}

/// Unbuffered handles on the real stdin and stdout
fn real_endpoints() -> io::Result<(File, File)> {
    let input = File::from(io::stdin().as_fd().try_clone_to_owned()?);
    let output = File::from(io::stdout().as_fd().try_clone_to_owned()?);
    Ok((input, output))
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::signal::Signal;
    use nix::unistd::Pid;

    #[test]
    fn test_exit_code_mapping() {
        let pid = Pid::from_raw(1234);
        assert_eq!(exit_code(WaitStatus::Exited(pid, 0)), 0);
        assert_eq!(exit_code(WaitStatus::Exited(pid, 42)), 42);
        assert_eq!(exit_code(WaitStatus::Signaled(pid, Signal::SIGTERM, false)), 15);
        assert_eq!(exit_code(WaitStatus::Signaled(pid, Signal::SIGKILL, true)), 9);
        assert_eq!(exit_code(WaitStatus::Stopped(pid, Signal::SIGSTOP)), 1);
        assert_eq!(exit_code(WaitStatus::StillAlive), 1);
    }
}
