//! Header parsing: the block model plus the legacy, RAR5 and filename
//! decoders.
//!
//! Every header in the stream decodes to one [`Block`] — a tagged record
//! with the stream bookkeeping all callers need (offset, sizes, where
//! the next block starts) and a [`BlockPayload`] sum type holding the
//! type-specific fields, matched exhaustively by consumers.

pub mod legacy;
pub mod rar5;
pub mod unicode;

pub use legacy::{BlockDecoder, FileBlock, OldAuthBlock, SubBlock};
pub use rar5::{QuickOpenEntry, Rar5CompressionInfo};

/// Store method value in legacy headers: the entry is uncompressed.
pub const METHOD_STORE: u8 = 0x30;

/// One decoded header record.
#[derive(Debug, Clone)]
pub struct Block {
    /// Offset of the header, relative to the analysis window start.
    pub offset: u64,
    /// Raw type byte (legacy/SRR) or RAR5 type code.
    pub raw_type: u8,
    /// Raw flag bits as they appeared on the wire.
    pub flags: u64,
    /// Size of the header itself, including any extra size fields.
    pub header_size: u64,
    /// Size of the opaque body following the header (0 for header-only
    /// block types).
    pub body_size: u64,
    /// Window-relative offset of the next block. Strictly greater than
    /// `offset` for every successfully decoded block; a violation is the
    /// analyzer's stuck condition.
    pub next_offset: u64,
    /// CRC declared in the header (low 16 bits meaningful for legacy).
    pub crc_declared: u32,
    pub payload: BlockPayload,
}

impl Block {
    /// Window-relative inclusive byte range of the body, when one exists.
    pub fn body_range(&self) -> Option<(u64, u64)> {
        if self.body_size == 0 {
            return None;
        }
        let lo = self.offset + self.header_size;
        Some((lo, lo + self.body_size - 1))
    }
}

/// Type-specific decoded fields, one variant per block kind.
#[derive(Debug, Clone)]
pub enum BlockPayload {
    /// Fixed signature bytes at the start of a valid stream.
    Marker,
    /// Legacy archive (main) header.
    Archive(ArchiveBlock),
    /// Legacy file header.
    File(FileBlock),
    /// Legacy new-style subblock (same tail layout as a file header).
    Sub(SubBlock),
    /// Old-style authenticity-verification block. Two of its fields are
    /// preserved but semantically unverified.
    OldAuth(OldAuthBlock),
    /// Legacy end-of-archive header.
    End { more_volumes: bool },
    /// SRR application header (doubles as the SRR marker).
    SrrHeader { app_name: Option<String> },
    /// SRR stored file; the body holds the stored bytes verbatim.
    SrrStoredFile { name: String },
    /// SRR RAR-volume announcement; the RAR headers that follow carry no
    /// file bodies.
    SrrRarFile { name: String },
    /// RAR5 main archive header.
    Rar5Main(rar5::Rar5MainBlock),
    /// RAR5 file or service header.
    Rar5File(rar5::Rar5FileBlock),
    /// RAR5 archive encryption header; everything after it is opaque.
    Rar5Crypt { version: u8 },
    /// RAR5 end-of-archive header.
    Rar5End { more_volumes: bool },
    /// RAR5 quick-open block: a cached file summary decoded without
    /// touching the main block stream.
    Rar5QuickOpen { entries: Vec<QuickOpenEntry> },
    /// Recognized but uninterpreted block type; skipped by size.
    Unknown,
}

/// Legacy archive header flag bits translated to properties.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArchiveBlock {
    pub is_volume: bool,
    pub has_comment: bool,
    pub is_locked: bool,
    pub is_solid: bool,
    pub new_numbering: bool,
    pub has_auth: bool,
    pub has_recovery: bool,
    pub is_encrypted: bool,
    pub is_first_volume: bool,
}
