//! RAR 5.0 block decoding.
//!
//! RAR5 keeps the same stream shape as the legacy format — a walkable
//! sequence of headers, each followed by an optional opaque data area —
//! but encodes every size and flag word as a variable-length integer
//! and renumbers the block types. Each byte of a vint contributes 7
//! data bits, low bits first; the high bit means more bytes follow.

use crate::error::{Error, Result};
use crate::parsing::{Block, BlockPayload};
use crate::source::RangeSource;
use log::warn;

// RAR5 header type codes.
pub const MAIN: u64 = 1;
pub const FILE: u64 = 2;
pub const SERVICE: u64 = 3;
pub const CRYPT: u64 = 4;
pub const END: u64 = 5;

/// Extra-area field type carrying file encryption parameters.
const EXTRA_CRYPT: u64 = 0x01;

/// Service header name of the quick-open cache.
const QUICK_OPEN_NAME: &str = "QO";

/// Reads a vint from a byte slice, returning the value and the number
/// of bytes consumed. `None` when the slice ends mid-vint or the vint
/// would overflow a u64.
#[inline]
pub fn read_vint(data: &[u8]) -> Option<(u64, usize)> {
    let mut result = 0u64;
    let mut shift = 0;
    for (i, &byte) in data.iter().enumerate() {
        if i >= 10 {
            return None;
        }
        result |= u64::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            return Some((result, i + 1));
        }
        shift += 7;
    }
    None
}

/// Cursor over a header's content bytes.
struct VintReader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> VintReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    fn read(&mut self) -> Option<u64> {
        let (value, consumed) = read_vint(&self.data[self.offset..])?;
        self.offset += consumed;
        Some(value)
    }

    fn read_bytes(&mut self, count: usize) -> Option<&'a [u8]> {
        if self.offset + count > self.data.len() {
            return None;
        }
        let slice = &self.data[self.offset..self.offset + count];
        self.offset += count;
        Some(slice)
    }

    fn read_u32_le(&mut self) -> Option<u32> {
        let b = self.read_bytes(4)?;
        Some(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn remaining(&self) -> &'a [u8] {
        &self.data[self.offset..]
    }
}

/// Common header flags shared by all RAR5 block types.
#[derive(Debug, Clone, Copy, Default)]
pub struct Rar5HeaderFlags {
    pub has_extra_area: bool,
    pub has_data_area: bool,
    pub skip_if_unknown: bool,
    pub split_before: bool,
    pub split_after: bool,
}

impl From<u64> for Rar5HeaderFlags {
    fn from(flags: u64) -> Self {
        Self {
            has_extra_area: flags & 0x0001 != 0,
            has_data_area: flags & 0x0002 != 0,
            skip_if_unknown: flags & 0x0004 != 0,
            split_before: flags & 0x0008 != 0,
            split_after: flags & 0x0010 != 0,
        }
    }
}

/// Main archive header properties.
#[derive(Debug, Clone, Copy, Default)]
pub struct Rar5MainBlock {
    pub is_volume: bool,
    pub is_solid: bool,
    pub has_recovery: bool,
    pub is_locked: bool,
    pub volume_number: Option<u64>,
}

/// Compression information word from a file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rar5CompressionInfo {
    pub version: u8,
    pub is_solid: bool,
    /// 0 = store, 1-5 = compression levels.
    pub method: u8,
    /// Dictionary size as a power of two (minimum 17 = 128 KiB).
    pub dict_size_log: u8,
}

impl From<u64> for Rar5CompressionInfo {
    fn from(info: u64) -> Self {
        Self {
            version: (info & 0x3F) as u8,
            is_solid: (info >> 6) & 1 != 0,
            method: ((info >> 7) & 0x07) as u8,
            dict_size_log: ((info >> 10) & 0x0F) as u8 + 17,
        }
    }
}

impl Rar5CompressionInfo {
    pub fn is_stored(&self) -> bool {
        self.method == 0
    }
}

/// File or service header fields.
#[derive(Debug, Clone)]
pub struct Rar5FileBlock {
    pub name_raw: Vec<u8>,
    pub name: String,
    pub unpacked_size: u64,
    pub packed_size: u64,
    pub attributes: u64,
    pub mtime: Option<u32>,
    pub crc32: Option<u32>,
    pub compression: Rar5CompressionInfo,
    pub host_os: u8,
    pub is_service: bool,
    pub is_directory: bool,
    pub split_before: bool,
    pub split_after: bool,
    /// A crypt field was present in the extra area.
    pub is_encrypted: bool,
}

/// One entry of the quick-open cache: enough to list a file without
/// walking to its real header.
#[derive(Debug, Clone)]
pub struct QuickOpenEntry {
    pub name: String,
    pub unpacked_size: u64,
    pub is_directory: bool,
}

/// Decodes one RAR5 block at the source's current offset.
///
/// Layout: CRC32 (4 bytes) over everything that follows, a size vint
/// counting the content bytes after itself, then the content. An
/// optional data area of `data_size` bytes follows the header.
pub fn decode(src: &mut RangeSource) -> Result<Block> {
    let offset = src.position() - src.start();
    let truncated = || Error::Truncated { offset };

    let crc_bytes = src.read(4)?;
    let crc_declared = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);

    // Size vint, read byte by byte so a short window reports cleanly.
    let mut size_bytes = Vec::with_capacity(3);
    let header_size = loop {
        let b = src.read(1)?[0];
        size_bytes.push(b);
        if b & 0x80 == 0 {
            match read_vint(&size_bytes) {
                Some((value, _)) => break value,
                None => return Err(truncated()),
            }
        }
        if size_bytes.len() >= 10 {
            return Err(truncated());
        }
    };

    let content = src.read(header_size as usize)?;

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&size_bytes);
    hasher.update(&content);
    if hasher.finalize() != crc_declared {
        warn!("RAR5 header CRC mismatch at offset {offset}");
    }

    let mut r = VintReader::new(&content);
    let header_type = r.read().ok_or_else(truncated)?;
    let flags_raw = r.read().ok_or_else(truncated)?;
    let flags = Rar5HeaderFlags::from(flags_raw);
    let extra_size = if flags.has_extra_area {
        r.read().ok_or_else(truncated)?
    } else {
        0
    };
    let data_size = if flags.has_data_area {
        r.read().ok_or_else(truncated)?
    } else {
        0
    };

    let full_header_size = 4 + size_bytes.len() as u64 + header_size;

    let payload = match header_type {
        MAIN => {
            let archive_flags = r.read().ok_or_else(truncated)?;
            let volume_number = if archive_flags & 0x0002 != 0 {
                Some(r.read().ok_or_else(truncated)?)
            } else {
                None
            };
            BlockPayload::Rar5Main(Rar5MainBlock {
                is_volume: archive_flags & 0x0001 != 0,
                is_solid: archive_flags & 0x0004 != 0,
                has_recovery: archive_flags & 0x0008 != 0,
                is_locked: archive_flags & 0x0010 != 0,
                volume_number,
            })
        }
        FILE | SERVICE => {
            let file =
                file_from_reader(&mut r, flags, extra_size, data_size, header_type == SERVICE)
                    .ok_or_else(truncated)?;
            if file.is_service && file.name == QUICK_OPEN_NAME && data_size > 0 {
                // Quick-open path: the data area holds cached copies of
                // file headers; decode the summary without touching the
                // main walk.
                let data = src.read(data_size as usize)?;
                BlockPayload::Rar5QuickOpen {
                    entries: parse_quick_open(&data),
                }
            } else {
                BlockPayload::Rar5File(file)
            }
        }
        CRYPT => {
            let version = r.read().ok_or_else(truncated)? as u8;
            BlockPayload::Rar5Crypt { version }
        }
        END => {
            let end_flags = r.read().ok_or_else(truncated)?;
            BlockPayload::Rar5End {
                more_volumes: end_flags & 0x0001 != 0,
            }
        }
        _ => BlockPayload::Unknown,
    };

    Ok(Block {
        offset,
        raw_type: header_type as u8,
        flags: flags_raw,
        header_size: full_header_size,
        body_size: data_size,
        next_offset: offset + full_header_size + data_size,
        crc_declared,
        payload,
    })
}

/// File/service tail shared by the main walk and the quick-open cache.
fn file_from_reader(
    r: &mut VintReader<'_>,
    flags: Rar5HeaderFlags,
    extra_size: u64,
    data_size: u64,
    is_service: bool,
) -> Option<Rar5FileBlock> {
    let file_flags = r.read()?;
    let unpacked_size = r.read()?;
    let attributes = r.read()?;
    let mtime = if file_flags & 0x0002 != 0 {
        Some(r.read_u32_le()?)
    } else {
        None
    };
    let crc32 = if file_flags & 0x0004 != 0 {
        Some(r.read_u32_le()?)
    } else {
        None
    };
    let compression = Rar5CompressionInfo::from(r.read()?);
    let host_os = r.read()? as u8;
    let name_len = usize::try_from(r.read()?).ok()?;
    let name_raw = r.read_bytes(name_len)?.to_vec();
    let name = String::from_utf8_lossy(&name_raw).into_owned();

    let is_encrypted = extra_size > 0 && has_crypt_field(r.remaining());

    Some(Rar5FileBlock {
        name_raw,
        name,
        unpacked_size,
        packed_size: data_size,
        attributes,
        mtime,
        crc32,
        compression,
        host_os,
        is_service,
        is_directory: file_flags & 0x0001 != 0,
        split_before: flags.split_before,
        split_after: flags.split_after,
        is_encrypted,
    })
}

/// Scans an extra area for a crypt field. Each field is a size vint
/// (counting type + data), a type vint, then data.
fn has_crypt_field(extra: &[u8]) -> bool {
    let mut pos = 0;
    while pos < extra.len() {
        let Some((size, size_len)) = read_vint(&extra[pos..]) else {
            return false;
        };
        let Some((ftype, _)) = read_vint(&extra[pos + size_len..]) else {
            return false;
        };
        if ftype == EXTRA_CRYPT {
            return true;
        }
        let Some(advance) = (size as usize).checked_add(size_len) else {
            return false;
        };
        if advance == 0 {
            return false;
        }
        pos += advance;
    }
    false
}

/// Decodes the quick-open data area: a sequence of cached header
/// records, each framed like a regular header (CRC32, size vint,
/// content). Undecodable records end the summary early.
fn parse_quick_open(data: &[u8]) -> Vec<QuickOpenEntry> {
    let mut entries = Vec::new();
    let mut pos = 0usize;
    while pos + 5 <= data.len() {
        let Some((size, size_len)) = read_vint(&data[pos + 4..]) else {
            break;
        };
        let content_start = pos + 4 + size_len;
        let Some(content_end) = content_start.checked_add(size as usize) else {
            break;
        };
        if content_end > data.len() || content_end <= content_start {
            break;
        }
        let mut r = VintReader::new(&data[content_start..content_end]);
        let cached = (|| {
            let header_type = r.read()?;
            if header_type != FILE && header_type != SERVICE {
                return None;
            }
            let flags = Rar5HeaderFlags::from(r.read()?);
            let extra_size = if flags.has_extra_area { r.read()? } else { 0 };
            let data_size = if flags.has_data_area { r.read()? } else { 0 };
            file_from_reader(&mut r, flags, extra_size, data_size, header_type == SERVICE)
        })();
        if let Some(file) = cached {
            if !file.is_service {
                entries.push(QuickOpenEntry {
                    name: file.name,
                    unpacked_size: file.unpacked_size,
                    is_directory: file.is_directory,
                });
            }
        }
        pos = content_end;
    }
    entries
}
