//! Binary timestamped record
//!
//! Each captured chunk is preceded by a fixed 24-byte header laid out like
//! the C struct
//!
//! ```text
//! struct stamp {
//!     uint64_t scr_len;       /* bytes of payload that follow */
//!     uint64_t scr_sec;       /* arrival time, seconds */
//!     uint32_t scr_usec;      /* ...and microseconds */
//!     uint32_t scr_direction; /* 'i', 'o', 's' or 'e' */
//! };
//! ```
//!
//! in native byte order. The direction tag is a small ASCII value, so a
//! reader can tell the byte order from where its non-zero byte sits.

use std::time::{SystemTime, UNIX_EPOCH};

/// Size of an encoded stamp header
pub const STAMP_LEN: usize = 24;

/// Which way a chunk travelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Keystrokes forwarded to the pty
    Input,
    /// Output read from the pty
    Output,
    /// Session start marker (no payload)
    Start,
    /// Session end marker (no payload)
    End,
}

impl Direction {
    /// The on-disk tag
    pub fn tag(self) -> u32 {
        let c = match self {
            Self::Input => b'i',
            Self::Output => b'o',
            Self::Start => b's',
            Self::End => b'e',
        };
        c as u32
    }

    /// Parse an on-disk tag
    pub fn from_tag(tag: u32) -> Option<Self> {
        match u8::try_from(tag).ok()? {
            b'i' => Some(Self::Input),
            b'o' => Some(Self::Output),
            b's' => Some(Self::Start),
            b'e' => Some(Self::End),
            _ => None,
        }
    }
}

/// Header written before every chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stamp {
    /// Payload length in bytes
    pub len: u64,
    pub sec: u64,
    pub usec: u32,
    pub direction: Direction,
}

impl Stamp {
    /// A stamp for `len` bytes arriving now
    pub fn now(direction: Direction, len: usize) -> Self {
        let elapsed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self {
            len: len as u64,
            sec: elapsed.as_secs(),
            usec: elapsed.subsec_micros(),
            direction,
        }
    }

    /// Encode in native byte order
    pub fn encode(&self) -> [u8; STAMP_LEN] {
        let mut out = [0u8; STAMP_LEN];
        out[0..8].copy_from_slice(&self.len.to_ne_bytes());
        out[8..16].copy_from_slice(&self.sec.to_ne_bytes());
        out[16..20].copy_from_slice(&self.usec.to_ne_bytes());
        out[20..24].copy_from_slice(&self.direction.tag().to_ne_bytes());
        out
    }

    /// Decode a header written on a machine of either byte order
    pub fn decode(bytes: &[u8; STAMP_LEN]) -> Option<Self> {
        let u64_at = |i: usize| {
            let mut b = [0u8; 8];
            b.copy_from_slice(&bytes[i..i + 8]);
            b
        };
        let u32_at = |i: usize| {
            let mut b = [0u8; 4];
            b.copy_from_slice(&bytes[i..i + 4]);
            b
        };

        if let Some(direction) = Direction::from_tag(u32::from_ne_bytes(u32_at(20))) {
            return Some(Self {
                len: u64::from_ne_bytes(u64_at(0)),
                sec: u64::from_ne_bytes(u64_at(8)),
                usec: u32::from_ne_bytes(u32_at(16)),
                direction,
            });
        }

        let direction = Direction::from_tag(u32::from_ne_bytes(u32_at(20)).swap_bytes())?;
        Some(Self {
            len: u64::from_ne_bytes(u64_at(0)).swap_bytes(),
            sec: u64::from_ne_bytes(u64_at(8)).swap_bytes(),
            usec: u32::from_ne_bytes(u32_at(16)).swap_bytes(),
            direction,
        })
    }
}

/// Walk the records of a stamped transcript
///
/// Stops at the first truncated or unrecognised header.
pub fn frames(data: &[u8]) -> Frames<'_> {
    Frames { data }
}

/// Iterator returned by [`frames`]
pub struct Frames<'a> {
    data: &'a [u8],
}

impl<'a> Iterator for Frames<'a> {
    type Item = (Stamp, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        let header: &[u8; STAMP_LEN] = self.data.get(..STAMP_LEN)?.try_into().ok()?;
        let stamp = Stamp::decode(header)?;
        let end = STAMP_LEN.checked_add(usize::try_from(stamp.len).ok()?)?;
        let payload = self.data.get(STAMP_LEN..end)?;
        self.data = &self.data[end..];
        Some((stamp, payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let stamp = Stamp {
            len: 5,
            sec: 1_700_000_000,
            usec: 250_000,
            direction: Direction::Output,
        };
        let bytes = stamp.encode();
        assert_eq!(&bytes[0..8], &5u64.to_ne_bytes());
        assert_eq!(&bytes[20..24], &(b'o' as u32).to_ne_bytes());
        assert_eq!(Stamp::decode(&bytes), Some(stamp));
    }

    #[test]
    fn test_decode_foreign_byte_order() {
        let mut bytes = [0u8; STAMP_LEN];
        bytes[0..8].copy_from_slice(&3u64.swap_bytes().to_ne_bytes());
        bytes[8..16].copy_from_slice(&42u64.swap_bytes().to_ne_bytes());
        bytes[16..20].copy_from_slice(&7u32.swap_bytes().to_ne_bytes());
        bytes[20..24].copy_from_slice(&(b'i' as u32).swap_bytes().to_ne_bytes());

        let stamp = Stamp::decode(&bytes).unwrap();
        assert_eq!(stamp.len, 3);
        assert_eq!(stamp.sec, 42);
        assert_eq!(stamp.usec, 7);
        assert_eq!(stamp.direction, Direction::Input);
    }

    #[test]
    fn test_unknown_tag() {
        let mut bytes = Stamp::now(Direction::Input, 0).encode();
        bytes[20..24].copy_from_slice(&(b'x' as u32).to_ne_bytes());
        assert!(Stamp::decode(&bytes).is_none());
    }

    #[test]
    fn test_frames_stop_at_truncation() {
        let mut data = Vec::new();
        data.extend_from_slice(&Stamp::now(Direction::Output, 2).encode());
        data.extend_from_slice(b"hi");
        data.extend_from_slice(&Stamp::now(Direction::Input, 10).encode());
        data.extend_from_slice(b"short");

        let collected: Vec<_> = frames(&data).collect();
        assert_eq!(collected.len(), 1);
        assert_eq!(collected[0].1, b"hi");
    }
}
