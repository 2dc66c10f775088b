//! Legacy (RAR 1.5–4.x) and SRR block decoding.
//!
//! Every legacy block starts with the same 7-byte header: declared CRC
//! (u16), type byte, flags (u16) and header size (u16), all
//! little-endian. Long blocks append a u32 with the size of the opaque
//! body that follows the header. SRR files reuse this exact framing with
//! their own type bytes below 0x72, so one decoder covers both.

use crate::error::Result;
use crate::parsing::{unicode, ArchiveBlock, Block, BlockPayload};
use crate::source::RangeSource;
use log::warn;

// Block type bytes. Legacy RAR uses 0x72..=0x7B, SRR claims 0x69..=0x71.
pub const SRR_HEADER: u8 = 0x69;
pub const SRR_STORED_FILE: u8 = 0x6A;
pub const SRR_RAR_FILE: u8 = 0x71;
pub const MARKER: u8 = 0x72;
pub const ARCHIVE: u8 = 0x73;
pub const FILE: u8 = 0x74;
pub const OLD_COMMENT: u8 = 0x75;
pub const OLD_AUTH: u8 = 0x76;
pub const OLD_SUB: u8 = 0x77;
pub const OLD_RECOVERY: u8 = 0x78;
pub const OLD_AUTH2: u8 = 0x79;
pub const NEW_SUB: u8 = 0x7A;
pub const END: u8 = 0x7B;

// Flags shared by every block type.
pub const FLAG_SKIP_IF_UNKNOWN: u16 = 0x4000;
pub const FLAG_LONG_BLOCK: u16 = 0x8000;

// Archive header flags.
const MHD_VOLUME: u16 = 0x0001;
const MHD_COMMENT: u16 = 0x0002;
const MHD_LOCK: u16 = 0x0004;
const MHD_SOLID: u16 = 0x0008;
const MHD_NEW_NUMBERING: u16 = 0x0010;
const MHD_AV: u16 = 0x0020;
const MHD_PROTECT: u16 = 0x0040;
const MHD_PASSWORD: u16 = 0x0080;
const MHD_FIRST_VOLUME: u16 = 0x0100;

// File header flags.
pub const LHD_SPLIT_BEFORE: u16 = 0x0001;
pub const LHD_SPLIT_AFTER: u16 = 0x0002;
pub const LHD_PASSWORD: u16 = 0x0004;
pub const LHD_WINDOW_MASK: u16 = 0x00E0;
/// Reserved dictionary-size pattern that marks a directory entry.
pub const LHD_DIRECTORY: u16 = 0x00E0;
pub const LHD_LARGE: u16 = 0x0100;
pub const LHD_UNICODE: u16 = 0x0200;
pub const LHD_SALT: u16 = 0x0400;
pub const LHD_EXT_TIME: u16 = 0x1000;

// End header flags.
const EARC_NEXT_VOLUME: u16 = 0x0001;

// SRR header flags.
const SRR_APP_NAME_PRESENT: u16 = 0x0001;

/// Decoded legacy file header fields.
#[derive(Debug, Clone)]
pub struct FileBlock {
    /// Name bytes exactly as stored (both halves for unicode names).
    pub name_raw: Vec<u8>,
    /// Decoded name: the unicode-codec result when the unicode flag was
    /// set and decoding succeeded, the legacy half otherwise.
    pub name: String,
    pub unpacked_size: u64,
    pub packed_size: u64,
    pub host_os: u8,
    pub crc32: u32,
    /// DOS-format modification timestamp.
    pub dos_time: u32,
    pub version: u8,
    pub method: u8,
    pub attributes: u32,
    /// Dictionary size class from the masked window bits.
    pub dict_class: u8,
    pub is_directory: bool,
    pub split_before: bool,
    pub split_after: bool,
    pub has_password: bool,
    pub has_salt: bool,
    pub salt: Option<[u8; 8]>,
    /// Extended-time data follows in the header; its sub-fields are not
    /// decoded here.
    pub has_ext_time: bool,
}

impl FileBlock {
    /// Whether the entry's payload is stored rather than compressed.
    pub fn is_stored(&self) -> bool {
        self.method == super::METHOD_STORE
    }
}

/// New-style subblock: a file-header tail whose name field is a short
/// type string such as `AV`, `CMT` or `RR`.
#[derive(Debug, Clone)]
pub struct SubBlock {
    pub kind: String,
    pub file: FileBlock,
}

/// Old-style authenticity-verification block.
///
/// The two size fields are decoded upstream only by inference; they are
/// preserved byte-for-byte but carry no trusted meaning here.
#[derive(Debug, Clone)]
pub struct OldAuthBlock {
    pub unverified_a: u16,
    pub unverified_b: u16,
    pub creator: Vec<u8>,
}

fn u16le(b: &[u8]) -> u16 {
    u16::from_le_bytes([b[0], b[1]])
}

fn u32le(b: &[u8]) -> u32 {
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

/// Decodes one legacy or SRR block at the source's current offset.
///
/// The decoder is configured once per walk; `header_only` is the SRR
/// mode in which RAR file headers carry no bodies, so the declared body
/// size must not contribute to the next-block offset.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlockDecoder {
    header_only: bool,
}

impl BlockDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks file-block bodies as absent from the stream (SRR framing).
    pub fn header_only(mut self, yes: bool) -> Self {
        self.header_only = yes;
        self
    }

    /// Reads the common header plus the type-specific tail, leaving the
    /// source positioned at the end of the header. Returns the block;
    /// the caller seeks to `next_offset`.
    pub fn decode(&self, src: &mut RangeSource) -> Result<Block> {
        let offset = src.position() - src.start();
        let head = src.read(7)?;
        let crc_declared = u32::from(u16le(&head[0..2]));
        let raw_type = head[2];
        let flags = u16le(&head[3..5]);
        let header_size = u64::from(u16le(&head[5..7]));
        let mut consumed = 7u64;

        let mut body_size = 0u64;
        let mut body_in_stream = true;

        let payload = match raw_type {
            FILE | NEW_SUB => {
                let (size, file) = self.file_tail(src, flags, &mut consumed)?;
                body_size = size;
                body_in_stream = !self.header_only;
                if raw_type == NEW_SUB {
                    BlockPayload::Sub(SubBlock {
                        kind: file.name.clone(),
                        file,
                    })
                } else {
                    BlockPayload::File(file)
                }
            }
            _ => {
                if flags & FLAG_LONG_BLOCK != 0 {
                    let add = src.read(4)?;
                    body_size = u64::from(u32le(&add));
                    consumed += 4;
                }
                match raw_type {
                    MARKER => BlockPayload::Marker,
                    ARCHIVE => {
                        // reserved1 (u16) + reserved2 (u32)
                        src.read(6)?;
                        consumed += 6;
                        BlockPayload::Archive(archive_properties(flags))
                    }
                    END => BlockPayload::End {
                        more_volumes: flags & EARC_NEXT_VOLUME != 0,
                    },
                    OLD_AUTH | OLD_AUTH2 => {
                        let tail = src.read(4)?;
                        consumed += 4;
                        let rest = header_size.saturating_sub(consumed) as usize;
                        let creator = src.read(rest)?;
                        consumed += rest as u64;
                        BlockPayload::OldAuth(OldAuthBlock {
                            unverified_a: u16le(&tail[0..2]),
                            unverified_b: u16le(&tail[2..4]),
                            creator,
                        })
                    }
                    SRR_HEADER => {
                        let app_name = if flags & SRR_APP_NAME_PRESENT != 0 {
                            let len = u16le(&src.read(2)?) as usize;
                            consumed += 2;
                            let raw = src.read(len)?;
                            consumed += len as u64;
                            Some(String::from_utf8_lossy(&raw).into_owned())
                        } else {
                            None
                        };
                        BlockPayload::SrrHeader { app_name }
                    }
                    SRR_STORED_FILE | SRR_RAR_FILE => {
                        let len = u16le(&src.read(2)?) as usize;
                        consumed += 2;
                        let raw = src.read(len)?;
                        consumed += len as u64;
                        let name = String::from_utf8_lossy(&raw).into_owned();
                        if raw_type == SRR_STORED_FILE {
                            BlockPayload::SrrStoredFile { name }
                        } else {
                            BlockPayload::SrrRarFile { name }
                        }
                    }
                    _ => BlockPayload::Unknown,
                }
            }
        };

        // Undecoded header remainder (comments, extended time fields).
        if header_size > consumed {
            src.read((header_size - consumed) as usize)?;
        }

        let next_offset = offset + header_size + if body_in_stream { body_size } else { 0 };
        Ok(Block {
            offset,
            raw_type,
            flags: u64::from(flags),
            header_size,
            body_size,
            next_offset,
            crc_declared,
            payload,
        })
    }

    /// The 25-byte file/subblock tail, plus large-size halves, name and
    /// salt. Returns the packed (body) size and the decoded fields.
    fn file_tail(
        &self,
        src: &mut RangeSource,
        flags: u16,
        consumed: &mut u64,
    ) -> Result<(u64, FileBlock)> {
        let tail = src.read(25)?;
        *consumed += 25;

        let mut packed_size = u64::from(u32le(&tail[0..4]));
        let mut unpacked_size = u64::from(u32le(&tail[4..8]));
        let host_os = tail[8];
        let crc32 = u32le(&tail[9..13]);
        let dos_time = u32le(&tail[13..17]);
        let version = tail[17];
        let method = tail[18];
        let name_size = u16le(&tail[19..21]) as usize;
        let attributes = u32le(&tail[21..25]);

        if flags & LHD_LARGE != 0 {
            let high = src.read(8)?;
            *consumed += 8;
            // low + high * 2^32, exact in u64
            packed_size += u64::from(u32le(&high[0..4])) << 32;
            unpacked_size += u64::from(u32le(&high[4..8])) << 32;
        }

        let name_raw = src.read(name_size)?;
        *consumed += name_size as u64;
        let name = decode_name(&name_raw, flags & LHD_UNICODE != 0);

        let salt = if flags & LHD_SALT != 0 {
            let raw = src.read(8)?;
            *consumed += 8;
            let mut s = [0u8; 8];
            s.copy_from_slice(&raw);
            Some(s)
        } else {
            None
        };

        Ok((
            packed_size,
            FileBlock {
                name_raw,
                name,
                unpacked_size,
                packed_size,
                host_os,
                crc32,
                dos_time,
                version,
                method,
                attributes,
                dict_class: ((flags & LHD_WINDOW_MASK) >> 5) as u8,
                is_directory: flags & LHD_WINDOW_MASK == LHD_DIRECTORY,
                split_before: flags & LHD_SPLIT_BEFORE != 0,
                split_after: flags & LHD_SPLIT_AFTER != 0,
                has_password: flags & LHD_PASSWORD != 0,
                has_salt: salt.is_some(),
                salt,
                has_ext_time: flags & LHD_EXT_TIME != 0,
            },
        ))
    }
}

/// Splits a unicode name field at its embedded NUL and decompresses the
/// supplemental half, falling back to the legacy half verbatim.
fn decode_name(raw: &[u8], unicode: bool) -> String {
    if unicode {
        if let Some(nul) = raw.iter().position(|&b| b == 0) {
            let (standard, supplemental) = (&raw[..nul], &raw[nul + 1..]);
            match unicode::decode_filename(standard, supplemental) {
                Some(name) => return name,
                None => {
                    warn!("unicode filename decode failed, keeping legacy name");
                    return String::from_utf8_lossy(standard).into_owned();
                }
            }
        }
    }
    String::from_utf8_lossy(raw).into_owned()
}

fn archive_properties(flags: u16) -> ArchiveBlock {
    ArchiveBlock {
        is_volume: flags & MHD_VOLUME != 0,
        has_comment: flags & MHD_COMMENT != 0,
        is_locked: flags & MHD_LOCK != 0,
        is_solid: flags & MHD_SOLID != 0,
        new_numbering: flags & MHD_NEW_NUMBERING != 0,
        has_auth: flags & MHD_AV != 0,
        has_recovery: flags & MHD_PROTECT != 0,
        is_encrypted: flags & MHD_PASSWORD != 0,
        is_first_volume: flags & MHD_FIRST_VOLUME != 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use crate::parsing::BlockPayload;

    fn decode_one(bytes: &[u8]) -> Block {
        let mut src = RangeSource::bind(bytes.to_vec(), false, None).unwrap();
        BlockDecoder::new().decode(&mut src).unwrap()
    }

    #[test]
    fn file_block_fields() {
        let bytes = fixtures::file_block("test.txt", b"hello", 0, 0x30);
        let block = decode_one(&bytes);
        assert_eq!(block.raw_type, FILE);
        let BlockPayload::File(f) = &block.payload else {
            panic!("expected file payload");
        };
        assert_eq!(f.name, "test.txt");
        assert_eq!(f.packed_size, 5);
        assert_eq!(f.unpacked_size, 5);
        assert!(f.is_stored());
        assert!(!f.is_directory);
        assert_eq!(block.body_size, 5);
        assert_eq!(block.next_offset, block.header_size + 5);
    }

    #[test]
    fn large_sizes_assemble_exactly() {
        // low = 0xFFFF_FFFF, high = 1 must give 0x1_FFFF_FFFF with no loss
        let bytes = fixtures::file_block_large("big.bin", 0xFFFF_FFFF, 1, 0xFFFF_FFFF, 1);
        let block = decode_one(&bytes);
        let BlockPayload::File(f) = &block.payload else {
            panic!("expected file payload");
        };
        assert_eq!(f.packed_size, 0x1_FFFF_FFFF);
        assert_eq!(f.unpacked_size, 0x1_FFFF_FFFF);
    }

    #[test]
    fn directory_pattern_from_window_mask() {
        let bytes = fixtures::file_block("docs", b"", LHD_DIRECTORY, 0x30);
        let block = decode_one(&bytes);
        let BlockPayload::File(f) = &block.payload else {
            panic!("expected file payload");
        };
        assert!(f.is_directory);
    }

    #[test]
    fn split_flags_translate() {
        let bytes = fixtures::file_block("part.bin", b"xy", LHD_SPLIT_AFTER, 0x30);
        let block = decode_one(&bytes);
        let BlockPayload::File(f) = &block.payload else {
            panic!("expected file payload");
        };
        assert!(f.split_after);
        assert!(!f.split_before);
    }

    #[test]
    fn header_only_mode_excludes_body_from_next_offset() {
        let bytes = fixtures::file_block("a.bin", b"abcdef", 0, 0x30);
        let mut src = RangeSource::bind(bytes[..bytes.len() - 6].to_vec(), false, None).unwrap();
        let block = BlockDecoder::new().header_only(true).decode(&mut src).unwrap();
        assert_eq!(block.body_size, 6);
        assert_eq!(block.next_offset, block.header_size);
    }

    #[test]
    fn archive_header_flag_translation() {
        let bytes = fixtures::archive_block(MHD_VOLUME | MHD_PROTECT | MHD_FIRST_VOLUME);
        let block = decode_one(&bytes);
        let BlockPayload::Archive(a) = &block.payload else {
            panic!("expected archive payload");
        };
        assert!(a.is_volume);
        assert!(a.has_recovery);
        assert!(a.is_first_volume);
        assert!(!a.has_auth);
    }

    #[test]
    fn end_block_more_volumes() {
        let bytes = fixtures::end_block(true);
        let block = decode_one(&bytes);
        assert!(matches!(
            block.payload,
            BlockPayload::End { more_volumes: true }
        ));
    }

    #[test]
    fn unicode_name_falls_back_on_bad_supplemental() {
        // standard half "abc", NUL, then a supplemental stream that runs
        // out of bytes mid-opcode
        let mut raw = b"abc\x00".to_vec();
        raw.push(0x00); // high default
        raw.push(0b1000_0000); // opcode 2 wants two operand bytes
        raw.push(b'x'); // only one is there
        let bytes = fixtures::file_block_raw_name(&raw, LHD_UNICODE);
        let block = decode_one(&bytes);
        let BlockPayload::File(f) = &block.payload else {
            panic!("expected file payload");
        };
        assert_eq!(f.name, "abc");
    }

    #[test]
    fn truncated_header_reports_truncated() {
        let bytes = fixtures::file_block("test.txt", b"", 0, 0x30);
        let mut src = RangeSource::bind(bytes[..10].to_vec(), false, None).unwrap();
        assert!(matches!(
            BlockDecoder::new().decode(&mut src),
            Err(crate::error::Error::Truncated { .. })
        ));
    }

    #[test]
    fn srr_stored_file_block() {
        let bytes = fixtures::srr_stored_file_block("tracked.sfv", b"data");
        let mut src = RangeSource::bind(bytes, false, None).unwrap();
        let block = BlockDecoder::new().header_only(true).decode(&mut src).unwrap();
        let BlockPayload::SrrStoredFile { name } = &block.payload else {
            panic!("expected stored file payload");
        };
        assert_eq!(name, "tracked.sfv");
        // stored-file bodies are always present, even in SRR mode
        assert_eq!(block.next_offset, block.header_size + 4);
    }
}
