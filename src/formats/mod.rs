//! Format signatures, the shared reader capability trait and timestamp
//! conversion.

use crate::archive::{FileEntry, Summary};
use crate::error::Result;
use std::path::Path;

/// Archive wire formats this crate can walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// RAR 1.5 to 4.x.
    Rar15,
    /// RAR 5.0+.
    Rar50,
    /// SRR: scene release metadata wrapping RAR headers.
    Srr,
}

impl Format {
    pub const RAR15_MARKER: &'static [u8; 7] = b"Rar!\x1a\x07\x00";
    pub const RAR50_MARKER: &'static [u8; 8] = b"Rar!\x1a\x07\x01\x00";
    /// The SRR header block's own leading bytes (declared CRC 0x6969
    /// plus type 0x69); SRR has no separate marker block.
    pub const SRR_MARKER: &'static [u8; 3] = &[0x69, 0x69, 0x69];

    /// Marker length in bytes.
    pub fn marker_len(&self) -> u64 {
        match self {
            Self::Rar15 => 7,
            Self::Rar50 => 8,
            Self::Srr => 3,
        }
    }

    /// Detects the format from bytes at a candidate marker position.
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.starts_with(Self::RAR50_MARKER) {
            Some(Self::Rar50)
        } else if data.starts_with(Self::RAR15_MARKER) {
            Some(Self::Rar15)
        } else if data.starts_with(Self::SRR_MARKER) {
            Some(Self::Srr)
        } else {
            None
        }
    }
}

/// Capability interface shared by all container readers.
///
/// The simpler formats (ZIP, PAR2, SFV) are collaborators implementing
/// this same contract; only the RAR/SRR reader lives in this crate.
pub trait FormatReader {
    /// Binds to a file and analyzes it.
    fn open(path: &Path, is_fragment: bool) -> Result<Self>
    where
        Self: Sized;

    /// Re-runs the analysis over the bound source, discarding prior
    /// state. `open` analyzes implicitly; this exists for explicit
    /// resets.
    fn analyze(&mut self) -> Result<()>;

    /// The reconstructed file listing.
    fn file_list(&self, skip_dirs: bool) -> Vec<FileEntry>;

    /// Archive-level summary, optionally carrying the full listing.
    fn summary(&self, full: bool, skip_dirs: bool) -> Summary;
}

/// Timestamp as Unix nanoseconds, converted from the DOS-format field
/// legacy file headers carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RawTimestamp {
    pub nanos: i64,
}

impl RawTimestamp {
    pub fn from_dos(dos_time: u32) -> Self {
        let second = i64::from((dos_time & 0x1f) * 2);
        let minute = i64::from((dos_time >> 5) & 0x3f);
        let hour = i64::from((dos_time >> 11) & 0x1f);
        let day = i64::from((dos_time >> 16) & 0x1f);
        let month = i64::from((dos_time >> 21) & 0x0f);
        let year = i64::from((dos_time >> 25) + 1980);

        let mut days: i64 = 0;
        for y in 1970..year {
            days += if y % 4 == 0 && (y % 100 != 0 || y % 400 == 0) {
                366
            } else {
                365
            };
        }
        let is_leap = year % 4 == 0 && (year % 100 != 0 || year % 400 == 0);
        let month_days = [
            31,
            if is_leap { 29 } else { 28 },
            31,
            30,
            31,
            30,
            31,
            31,
            30,
            31,
            30,
            31,
        ];
        for m in 0..(month - 1).clamp(0, 11) as usize {
            days += i64::from(month_days[m]);
        }
        days += day - 1;

        let secs = days * 86400 + hour * 3600 + minute * 60 + second;
        Self {
            nanos: secs * 1_000_000_000,
        }
    }
}
