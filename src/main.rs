//! Scripter
//!
//! Make a typescript of a terminal session.

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use scripter::config::ConfigError;
use scripter::Config;

/// Make a typescript of everything printed on the terminal
#[derive(Parser, Debug)]
#[command(name = "scripter", version)]
struct Cli {
    /// Append to the output file instead of truncating it
    #[arg(short = 'a')]
    append: bool,

    /// Flush the output file after every write
    #[arg(short = 'F')]
    force_flush: bool,

    /// Record keystrokes instead of output, without banners
    #[arg(short = 'i')]
    raw_capture: bool,

    /// Quiet: no banners and no start/done messages
    #[arg(short = 'q')]
    quiet: bool,

    /// Write a binary log with a timestamp before every chunk
    #[arg(short = 'r')]
    record: bool,

    /// Seconds between flushes of the output file (0 = every write)
    #[arg(short = 't', value_name = "TIME")]
    flush_interval: Option<u64>,

    /// Read defaults from this JSON file
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Output file [default: typescript]
    file: Option<PathBuf>,

    /// Command to run instead of the shell
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

impl Cli {
    /// Layer the command line over the defaults file
    fn into_config(self) -> Result<Config, ConfigError> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::load_or_default(),
        };

        config.append |= self.append;
        config.force_flush |= self.force_flush;
        config.raw_capture |= self.raw_capture;
        config.quiet |= self.quiet;
        config.timestamped |= self.record;
        if let Some(interval) = self.flush_interval {
            config.flush_interval = interval;
        }
        if let Some(file) = self.file {
            config.output_path = file;
        }
        if !self.command.is_empty() {
            config.command = self.command;
        }

        config.validate()?;
        Ok(config)
    }
}

fn main() -> ExitCode {
    // Logs go to stderr; stdout carries the session
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let cli = Cli::parse();
    let config = match cli.into_config() {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        },
    };

    match scripter::run(config) {
        Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        },
    }
}
