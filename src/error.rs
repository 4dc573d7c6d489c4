//! Error types for session setup
//!
//! Everything here is fatal: the recorder reports it and exits with status 1.
//! Failures inside the relay loop are not errors, see [`crate::relay::RelayExit`].

use std::ffi::NulError;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::config::ConfigError;

/// Session setup error
#[derive(Error, Debug)]
pub enum Error {
    /// The transcript file could not be opened
    #[error("{}: {source}", path.display())]
    FileOpen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The OS could not provide a pty pair
    #[error("Failed to allocate PTY: {0}")]
    PtyAllocation(#[source] nix::Error),

    /// The slave side of a freshly allocated pty could not be opened
    #[error("Failed to open PTY slave {path}: {source}")]
    OpenSlave {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to fork: {0}")]
    Fork(#[source] nix::Error),

    /// tcgetattr/tcsetattr failed on the real terminal or the pty
    #[error("Failed to access terminal attributes: {0}")]
    Termios(#[source] nix::Error),

    #[error("Failed to access window size: {0}")]
    WindowSize(#[source] io::Error),

    /// A command argument or path contained an interior NUL byte
    #[error("Invalid argument: {0}")]
    InvalidArgument(#[from] NulError),

    #[error("Failed to wait for child: {0}")]
    Wait(#[source] nix::Error),

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result type for session setup
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_open_message_names_path() {
        let err = Error::FileOpen {
            path: PathBuf::from("/nonexistent/typescript"),
            source: io::Error::from(io::ErrorKind::NotFound),
        };
        let msg = err.to_string();
        assert!(msg.starts_with("/nonexistent/typescript: "), "got: {}", msg);
    }

    #[test]
    fn test_nul_error_converts() {
        let nul = std::ffi::CString::new("a\0b").unwrap_err();
        let err: Error = nul.into();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }
}
