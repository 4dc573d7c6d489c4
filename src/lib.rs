//! Scripter - terminal session recorder
//!
//! Runs a shell or command on a fresh pseudoterminal, relays everything
//! between it and the real terminal, and keeps a transcript of the session.
//!
//! - `terminal`: saving, raw-mode switching and restoring of the real terminal
//! - `pty`: pty allocation and spawning the child on its slave side
//! - `transcript`: the output file, its banners and flush schedule
//! - `relay`: the loop moving bytes between terminal, pty and transcript
//! - `session`: ties the pieces together and tears them down exactly once

pub mod config;
pub mod error;
pub mod pty;
pub mod relay;
pub mod session;
pub mod signals;
pub mod terminal;
pub mod transcript;

pub use config::Config;
pub use error::{Error, Result};
pub use session::{run, Session};
