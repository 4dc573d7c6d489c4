//! Terminal-mode control
//!
//! Saves the attributes of the real terminal, switches it to raw mode for the
//! duration of the session and puts them back afterwards.

use std::io::IsTerminal;
use std::os::fd::AsFd;

use nix::sys::termios::{self, LocalFlags, SetArg, SpecialCharacterIndices, Termios};

use crate::error::{Error, Result};
use crate::pty::{get_window_size, WindowSize};

/// Saved state of a (possibly non-) terminal descriptor
///
/// Restores the saved attributes on drop, so an early return between
/// [`enter_raw`](Self::enter_raw) and teardown cannot leave the terminal raw.
pub struct TerminalMode<F: AsFd> {
    fd: F,
    /// Attributes captured by `save`, `None` if `fd` is not a terminal
    saved: Option<Termios>,
    /// Whether raw mode is currently applied
    raw: bool,
}

impl<F: AsFd> TerminalMode<F> {
    /// Capture the current attributes of `fd` if it is a terminal
    pub fn save(fd: F) -> Result<Self> {
        let saved = if fd.as_fd().is_terminal() {
            Some(termios::tcgetattr(fd.as_fd()).map_err(Error::Termios)?)
        } else {
            None
        };
        Ok(Self {
            fd,
            saved,
            raw: false,
        })
    }

    /// Whether `save` found a terminal
    pub fn is_terminal(&self) -> bool {
        self.saved.is_some()
    }

    /// The attributes captured by `save`
    pub fn saved(&self) -> Option<&Termios> {
        self.saved.as_ref()
    }

    /// Whether raw mode is currently applied
    pub fn is_raw(&self) -> bool {
        self.raw
    }

    /// Current window size of the terminal, if it is one
    pub fn window_size(&self) -> Result<Option<WindowSize>> {
        if !self.is_terminal() {
            return Ok(None);
        }
        get_window_size(self.fd.as_fd())
            .map(Some)
            .map_err(Error::WindowSize)
    }

    /// Switch the terminal to raw mode
    ///
    /// No-op when `save` did not find a terminal.
    pub fn enter_raw(&mut self) -> Result<()> {
        let Some(saved) = &self.saved else {
            return Ok(());
        };
        let mut raw = saved.clone();
        termios::cfmakeraw(&mut raw);
        raw.local_flags.remove(LocalFlags::ECHO);
        termios::tcsetattr(self.fd.as_fd(), SetArg::TCSAFLUSH, &raw).map_err(Error::Termios)?;
        self.raw = true;
        tracing::debug!("terminal switched to raw mode");
        Ok(())
    }

    /// Put the saved attributes back
    ///
    /// Idempotent: only the first call after `enter_raw` touches the terminal.
    pub fn restore(&mut self) -> Result<()> {
        if !self.raw {
            return Ok(());
        }
        self.raw = false;
        if let Some(saved) = &self.saved {
            termios::tcsetattr(self.fd.as_fd(), SetArg::TCSAFLUSH, saved)
                .map_err(Error::Termios)?;
            tracing::debug!("terminal attributes restored");
        }
        Ok(())
    }
}

impl<F: AsFd> Drop for TerminalMode<F> {
    fn drop(&mut self) {
        let _ = self.restore();
    }
}

/// Put a pty's line discipline into raw mode
///
/// Used on the master when input is not a terminal but keystrokes are
/// recorded, so nothing gets translated on the way to the child.
pub fn make_raw(fd: impl AsFd) -> Result<()> {
    let mut attrs = termios::tcgetattr(fd.as_fd()).map_err(Error::Termios)?;
    termios::cfmakeraw(&mut attrs);
    termios::tcsetattr(fd.as_fd(), SetArg::TCSANOW, &attrs).map_err(Error::Termios)
}

/// The configured end-of-file character, if the line discipline is canonical
///
/// Returns `None` when attributes cannot be read or ICANON is off.
pub fn canonical_eof(fd: impl AsFd) -> Option<u8> {
    let attrs = termios::tcgetattr(fd.as_fd()).ok()?;
    if attrs.local_flags.contains(LocalFlags::ICANON) {
        Some(attrs.control_chars[SpecialCharacterIndices::VEOF as usize])
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pty::open_pair;

    #[test]
    fn test_save_non_terminal() {
        let file = tempfile::tempfile().unwrap();
        let mut mode = TerminalMode::save(&file).unwrap();
        assert!(!mode.is_terminal());
        assert!(mode.saved().is_none());
        assert!(mode.window_size().unwrap().is_none());

        // raw/restore are no-ops without a terminal
        mode.enter_raw().unwrap();
        assert!(!mode.is_raw());
        mode.restore().unwrap();
    }

    #[test]
    fn test_raw_and_restore() {
        let (_master, slave) = open_pair().unwrap();
        let before = termios::tcgetattr(&slave).unwrap();

        let mut mode = TerminalMode::save(&slave).unwrap();
        assert!(mode.is_terminal());

        mode.enter_raw().unwrap();
        let raw = termios::tcgetattr(&slave).unwrap();
        assert!(!raw.local_flags.contains(LocalFlags::ICANON));
        assert!(!raw.local_flags.contains(LocalFlags::ECHO));
        assert!(!raw.local_flags.contains(LocalFlags::ISIG));

        mode.restore().unwrap();
        mode.restore().unwrap();
        let after = termios::tcgetattr(&slave).unwrap();
        assert_eq!(before.local_flags, after.local_flags);
        assert_eq!(before.input_flags, after.input_flags);
        assert_eq!(before.output_flags, after.output_flags);
    }

    #[test]
    fn test_drop_restores() {
        let (_master, slave) = open_pair().unwrap();
        let before = termios::tcgetattr(&slave).unwrap();
        {
            let mut mode = TerminalMode::save(&slave).unwrap();
            mode.enter_raw().unwrap();
        }
        let after = termios::tcgetattr(&slave).unwrap();
        assert_eq!(before.local_flags, after.local_flags);
    }

    #[test]
    fn test_canonical_eof() {
        let (master, _slave) = open_pair().unwrap();
        // Fresh ptys start out canonical with ^D as EOF
        assert_eq!(canonical_eof(&master), Some(0x04));

        make_raw(&master).unwrap();
        assert_eq!(canonical_eof(&master), None);
    }
}
