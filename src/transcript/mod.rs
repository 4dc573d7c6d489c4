//! Transcript writer
//!
//! Owns the output file: banners at start and end, the captured byte stream
//! in between, and the flush schedule that bounds how much is lost if the
//! recorder dies.

mod stamp;

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};

pub use stamp::{frames, Direction, Frames, Stamp, STAMP_LEN};

use crate::config::Config;
use crate::error::{Error, Result};

/// Which stream goes into the transcript
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureMode {
    /// Output of the child (the classic typescript)
    #[default]
    Output,
    /// Keystrokes sent to the child, no banners
    Input,
    /// Both directions, each chunk behind a binary [`Stamp`]
    Stamped,
}

impl CaptureMode {
    /// Whether chunks travelling in `direction` are recorded
    pub fn records(self, direction: Direction) -> bool {
        match self {
            Self::Output => direction == Direction::Output,
            Self::Input => direction == Direction::Input,
            Self::Stamped => true,
        }
    }
}

/// Settings that shape what the transcript contains
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranscriptOptions {
    pub capture: CaptureMode,
    /// No banners
    pub quiet: bool,
    /// Zero means flush on every call to `maybe_flush`
    pub flush_interval: Duration,
}

impl Default for TranscriptOptions {
    fn default() -> Self {
        Self {
            capture: CaptureMode::Output,
            quiet: false,
            flush_interval: Duration::from_secs(crate::config::DEFAULT_FLUSH_INTERVAL),
        }
    }
}

impl From<&Config> for TranscriptOptions {
    fn from(config: &Config) -> Self {
        Self {
            capture: config.capture_mode(),
            quiet: config.quiet,
            flush_interval: config.flush_period(),
        }
    }
}

/// The session transcript
pub struct Transcript<W: Write> {
    out: W,
    options: TranscriptOptions,
    /// A command line was recorded, so an exit status line is owed
    show_exit: bool,
    /// Anchor of the flush interval
    last_flush: Instant,
    closed: bool,
}

impl Transcript<BufWriter<File>> {
    /// Open (append or truncate) the transcript file
    pub fn open(path: &Path, append: bool, options: TranscriptOptions) -> Result<Self> {
        let mut open = OpenOptions::new();
        if append {
            open.append(true);
        } else {
            open.write(true).truncate(true);
        }
        let file = open
            .create(true)
            .open(path)
            .map_err(|source| Error::FileOpen {
                path: path.to_path_buf(),
                source,
            })?;
        tracing::debug!(path = %path.display(), append, "transcript opened");
        Ok(Self::new(BufWriter::new(file), options))
    }
}

impl<W: Write> Transcript<W> {
    /// Wrap an already open writer
    pub fn new(out: W, options: TranscriptOptions) -> Self {
        Self {
            out,
            options,
            show_exit: false,
            last_flush: Instant::now(),
            closed: false,
        }
    }

    /// Write the "Script started" header
    ///
    /// `command` is the explicit command line, if any; recording it means an
    /// exit status line is written at the end.
    pub fn write_start_banner(&mut self, command: Option<&[String]>) -> io::Result<()> {
        match self.options.capture {
            CaptureMode::Stamped => self.write_stamp(Direction::Start, &[])?,
            CaptureMode::Output if !self.options.quiet => {
                write!(self.out, "Script started on {}", ctime(Local::now()))?;
                if let Some(argv) = command.filter(|argv| !argv.is_empty()) {
                    self.show_exit = true;
                    writeln!(self.out, "Command: {}", argv.join(" "))?;
                }
            },
            _ => return Ok(()),
        }
        self.flush(Instant::now())
    }

    /// Record a chunk if the capture mode wants this direction
    pub fn record(&mut self, direction: Direction, bytes: &[u8]) -> io::Result<()> {
        if !self.options.capture.records(direction) {
            return Ok(());
        }
        if self.options.capture == CaptureMode::Stamped {
            self.write_stamp(direction, bytes)
        } else {
            self.write_chunk(bytes)
        }
    }

    /// Append bytes exactly as given
    pub fn write_chunk(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.out.write_all(bytes)
    }

    /// Flush if forced, if the interval is zero, or if it has elapsed
    ///
    /// Returns whether a flush happened.
    pub fn maybe_flush(&mut self, now: Instant, force: bool) -> io::Result<bool> {
        let due = now.saturating_duration_since(self.last_flush) >= self.options.flush_interval;
        if force || due {
            self.flush(now)?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Time left until the next scheduled flush, `None` if there is no schedule
    pub fn until_next_flush(&self, now: Instant) -> Option<Duration> {
        if self.options.flush_interval.is_zero() {
            return None;
        }
        let elapsed = now.saturating_duration_since(self.last_flush);
        Some(self.options.flush_interval.saturating_sub(elapsed))
    }

    /// Write the exit status and "Script done" trailer
    pub fn write_end_banner(&mut self, exit_code: i32) -> io::Result<()> {
        match self.options.capture {
            CaptureMode::Stamped => self.write_stamp(Direction::End, &[]),
            CaptureMode::Output if !self.options.quiet => {
                if self.show_exit {
                    write!(self.out, "\nCommand exit status: {}", exit_code)?;
                }
                write!(self.out, "\nScript done on {}", ctime(Local::now()))
            },
            _ => Ok(()),
        }
    }

    /// Flush for the last time; later calls do nothing
    pub fn close(&mut self) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.out.flush()
    }

    /// Flush and give back the underlying writer
    pub fn into_inner(mut self) -> W {
        let _ = self.close();
        self.out
    }

    fn flush(&mut self, now: Instant) -> io::Result<()> {
        self.out.flush()?;
        self.last_flush = now;
        Ok(())
    }

    fn write_stamp(&mut self, direction: Direction, payload: &[u8]) -> io::Result<()> {
        self.out
            .write_all(&Stamp::now(direction, payload.len()).encode())?;
        self.out.write_all(payload)
    }
}

/// Format like ctime(3): `Thu Oct 16 09:05:00 2026\n`
fn ctime(time: DateTime<Local>) -> String {
    time.format("%a %b %e %H:%M:%S %Y\n").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn transcript(capture: CaptureMode, quiet: bool) -> Transcript<Vec<u8>> {
        Transcript::new(
            Vec::new(),
            TranscriptOptions {
                capture,
                quiet,
                flush_interval: Duration::from_secs(30),
            },
        )
    }

    fn text(t: Transcript<Vec<u8>>) -> String {
        String::from_utf8(t.into_inner()).unwrap()
    }

    #[test]
    fn test_banners_with_command() {
        let mut t = transcript(CaptureMode::Output, false);
        let argv = vec!["sh".to_string(), "-c".to_string(), "exit 3".to_string()];
        t.write_start_banner(Some(&argv)).unwrap();
        t.record(Direction::Output, b"out\r\n").unwrap();
        t.write_end_banner(3).unwrap();

        let s = text(t);
        assert!(s.starts_with("Script started on "), "got: {:?}", s);
        let mut lines = s.lines();
        lines.next();
        assert_eq!(lines.next(), Some("Command: sh -c exit 3"));
        assert!(s.contains("out\r\n\nCommand exit status: 3\nScript done on "));
        assert!(s.ends_with('\n'));
    }

    #[test]
    fn test_banners_without_command() {
        let mut t = transcript(CaptureMode::Output, false);
        t.write_start_banner(None).unwrap();
        t.write_end_banner(0).unwrap();

        let s = text(t);
        assert!(!s.contains("Command:"));
        assert!(!s.contains("exit status"));
        assert!(s.contains("\nScript done on "));
    }

    #[test]
    fn test_quiet_has_no_banners() {
        let mut t = transcript(CaptureMode::Output, true);
        t.write_start_banner(Some(&["echo".to_string()])).unwrap();
        t.record(Direction::Output, b"hello\r\n").unwrap();
        t.write_end_banner(0).unwrap();
        assert_eq!(text(t), "hello\r\n");
    }

    #[test]
    fn test_input_capture_has_no_banners() {
        let mut t = transcript(CaptureMode::Input, false);
        t.write_start_banner(Some(&["cat".to_string()])).unwrap();
        t.record(Direction::Input, b"abc").unwrap();
        t.record(Direction::Output, b"abc").unwrap();
        t.write_end_banner(0).unwrap();
        assert_eq!(text(t), "abc");
    }

    #[test]
    fn test_stamped_framing() {
        let mut t = transcript(CaptureMode::Stamped, true);
        t.write_start_banner(None).unwrap();
        t.record(Direction::Input, b"ls\r").unwrap();
        t.record(Direction::Output, b"file\r\n").unwrap();
        t.write_end_banner(0).unwrap();

        let data = t.into_inner();
        let records: Vec<_> = frames(&data).map(|(s, p)| (s.direction, p.to_vec())).collect();
        assert_eq!(
            records,
            vec![
                (Direction::Start, vec![]),
                (Direction::Input, b"ls\r".to_vec()),
                (Direction::Output, b"file\r\n".to_vec()),
                (Direction::End, vec![]),
            ]
        );
    }

    #[test]
    fn test_flush_schedule() {
        let mut t = transcript(CaptureMode::Output, true);
        let start = t.last_flush;

        assert!(!t.maybe_flush(start + Duration::from_secs(10), false).unwrap());
        assert_eq!(
            t.until_next_flush(start + Duration::from_secs(10)),
            Some(Duration::from_secs(20))
        );

        assert!(t.maybe_flush(start + Duration::from_secs(30), false).unwrap());
        // The anchor moved with the flush
        assert_eq!(
            t.until_next_flush(start + Duration::from_secs(35)),
            Some(Duration::from_secs(25))
        );

        assert!(t.maybe_flush(start + Duration::from_secs(36), true).unwrap());
    }

    #[test]
    fn test_zero_interval_always_flushes() {
        let mut t = Transcript::new(
            Vec::new(),
            TranscriptOptions {
                flush_interval: Duration::ZERO,
                ..TranscriptOptions::default()
            },
        );
        assert_eq!(t.until_next_flush(Instant::now()), None);
        assert!(t.maybe_flush(Instant::now(), false).unwrap());
    }

    #[test]
    fn test_open_truncate_and_append() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("typescript");
        let quiet = TranscriptOptions {
            quiet: true,
            ..TranscriptOptions::default()
        };

        let mut t = Transcript::open(&path, false, quiet).unwrap();
        t.write_chunk(b"first").unwrap();
        t.close().unwrap();
        t.close().unwrap();
        drop(t);

        let mut t = Transcript::open(&path, true, quiet).unwrap();
        t.write_chunk(b" second").unwrap();
        drop(t);
        assert_eq!(std::fs::read(&path).unwrap(), b"first second");

        let t = Transcript::open(&path, false, quiet).unwrap();
        drop(t);
        assert_eq!(std::fs::read(&path).unwrap(), b"");
    }

    #[test]
    fn test_open_missing_directory() {
        let err = Transcript::open(
            Path::new("/nonexistent/dir/typescript"),
            false,
            TranscriptOptions::default(),
        )
        .err()
        .unwrap();
        assert!(matches!(err, Error::FileOpen { .. }));
    }

    #[test]
    fn test_ctime_format() {
        use chrono::TimeZone;
        let t = Local.with_ymd_and_hms(2026, 10, 6, 9, 5, 0).unwrap();
        assert_eq!(ctime(t), "Tue Oct  6 09:05:00 2026\n");
    }

    proptest! {
        #[test]
        fn prop_output_capture_is_exact(
            chunks in prop::collection::vec(
                (any::<bool>(), prop::collection::vec(any::<u8>(), 0..64)),
                0..32,
            )
        ) {
            let mut t = transcript(CaptureMode::Output, true);
            let mut expected = Vec::new();
            for (is_output, bytes) in &chunks {
                let direction = if *is_output { Direction::Output } else { Direction::Input };
                t.record(direction, bytes).unwrap();
                if *is_output {
                    expected.extend_from_slice(bytes);
                }
            }
            prop_assert_eq!(t.into_inner(), expected);
        }

        #[test]
        fn prop_stamp_length_matches_payload(
            chunks in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 0..16)
        ) {
            let mut t = transcript(CaptureMode::Stamped, true);
            for bytes in &chunks {
                t.record(Direction::Output, bytes).unwrap();
            }
            let data = t.into_inner();
            let payloads: Vec<Vec<u8>> = frames(&data).map(|(s, p)| {
                assert_eq!(s.len as usize, p.len());
                p.to_vec()
            }).collect();
            prop_assert_eq!(payloads, chunks);
        }
    }
}
