//! PTY (Pseudoterminal) handling
//!
//! Allocating the pty pair, spawning the recorded command on its slave side
//! and keeping the window size in sync with the real terminal.

mod command;
mod unix;

use std::io;
use std::os::fd::{AsFd, AsRawFd};

use nix::libc;

pub use command::{default_shell, ChildCommand};
pub use unix::{open_pair, PtyOptions, PtySession};

/// Window size for PTY
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSize {
    pub rows: u16,
    pub cols: u16,
    pub pixel_width: u16,
    pub pixel_height: u16,
}

impl WindowSize {
    /// Create a new window size with just rows and columns
    pub fn new(cols: u16, rows: u16) -> Self {
        Self {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        }
    }
}

impl Default for WindowSize {
    fn default() -> Self {
        Self::new(80, 24)
    }
}

impl From<WindowSize> for libc::winsize {
    fn from(ws: WindowSize) -> Self {
        libc::winsize {
            ws_row: ws.rows,
            ws_col: ws.cols,
            ws_xpixel: ws.pixel_width,
            ws_ypixel: ws.pixel_height,
        }
    }
}

impl From<libc::winsize> for WindowSize {
    fn from(ws: libc::winsize) -> Self {
        Self {
            rows: ws.ws_row,
            cols: ws.ws_col,
            pixel_width: ws.ws_xpixel,
            pixel_height: ws.ws_ypixel,
        }
    }
}

/// Get the window size of a terminal descriptor
pub fn get_window_size(fd: impl AsFd) -> io::Result<WindowSize> {
    let mut ws = libc::winsize {
        ws_row: 0,
        ws_col: 0,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };

    // SAFETY: TIOCGWINSZ writes a winsize into the pointed-to struct
    let result = unsafe { libc::ioctl(fd.as_fd().as_raw_fd(), libc::TIOCGWINSZ, &mut ws) };

    if result < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ws.into())
    }
}

/// Set the window size of a terminal descriptor
pub fn set_window_size(fd: impl AsFd, size: WindowSize) -> io::Result<()> {
    let ws: libc::winsize = size.into();

    // SAFETY: TIOCSWINSZ only reads the pointed-to winsize
    let result = unsafe { libc::ioctl(fd.as_fd().as_raw_fd(), libc::TIOCSWINSZ, &ws) };

    if result < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}
