//! The archive walk: marker search, fragment recovery and the block
//! loop.
//!
//! The walk is a small state machine: seek the marker (or recover a
//! header in a fragment), then decode blocks forward until the window
//! is exhausted. Running out of bytes mid-walk is expected input —
//! everything decoded so far is kept. A block that fails to advance the
//! offset is the one fatal structural guard; it is what keeps malformed
//! input from looping the walk forever.

use crate::error::{Error, Result};
use crate::formats::Format;
use crate::parsing::rar5;
use crate::parsing::{legacy, Block, BlockDecoder, BlockPayload};
use crate::source::RangeSource;
use log::{debug, warn};
use memchr::{memchr_iter, memmem};

/// Chunk size for marker and fragment scanning.
const SCAN_CHUNK: u64 = 64 * 1024;

/// Everything one analysis produced. Owned by a single invocation;
/// never shared.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub format: Format,
    /// Blocks in strictly increasing offset order, relative to the
    /// analysis window.
    pub blocks: Vec<Block>,
    pub is_volume: bool,
    pub has_auth: bool,
    pub has_recovery: bool,
    pub is_encrypted: bool,
}

impl Analysis {
    fn new(format: Format) -> Self {
        Self {
            format,
            blocks: Vec::new(),
            is_volume: false,
            has_auth: false,
            has_recovery: false,
            is_encrypted: false,
        }
    }

    fn absorb(&mut self, block: &Block) {
        match &block.payload {
            BlockPayload::Archive(a) => {
                self.is_volume |= a.is_volume;
                self.has_auth |= a.has_auth;
                self.has_recovery |= a.has_recovery;
                self.is_encrypted |= a.is_encrypted;
            }
            BlockPayload::File(f) => self.is_encrypted |= f.has_password,
            BlockPayload::Sub(s) => match s.kind.as_str() {
                "AV" => self.has_auth = true,
                "RR" => self.has_recovery = true,
                _ => {}
            },
            BlockPayload::OldAuth(_) => self.has_auth = true,
            BlockPayload::End { more_volumes } | BlockPayload::Rar5End { more_volumes } => {
                self.is_volume |= more_volumes;
            }
            BlockPayload::Rar5Main(m) => {
                self.is_volume |= m.is_volume;
                self.has_recovery |= m.has_recovery;
            }
            BlockPayload::Rar5File(f) => self.is_encrypted |= f.is_encrypted,
            BlockPayload::Rar5Crypt { .. } => self.is_encrypted = true,
            _ => {}
        }
    }
}

/// Walks the bound window and returns the accumulated block list plus
/// archive-level properties. One-shot: a fresh call (over a fresh or
/// re-seeked source) is required per analysis.
pub fn analyze(src: &mut RangeSource) -> Result<Analysis> {
    // SeekMarker state.
    let start = src.start();
    let (walk_from, format, recovered) = match find_marker(src)? {
        Some((offset, format)) => (offset, format, false),
        None if src.is_fragment() => match recover_fragment(src)? {
            Some(offset) => {
                debug!("fragment recovery matched a file header at offset {offset}");
                (offset, Format::Rar15, true)
            }
            None => {
                return Err(Error::InvalidFormat(
                    "no marker and no recoverable file header in fragment".into(),
                ))
            }
        },
        None => return Err(Error::InvalidFormat("no marker signature found".into())),
    };

    let mut analysis = Analysis::new(format);

    // The marker is the first block of the result. SRR has no separate
    // marker block (its header block at the marker offset plays both
    // roles), and a recovered fragment has no marker at all: the walk
    // begins right on the recovered file header.
    let first_walk_offset = if recovered {
        walk_from
    } else {
        match format {
            Format::Rar15 => {
                analysis.blocks.push(marker_block(walk_from, 7, 0x1A21, 0x6152));
                walk_from + format.marker_len()
            }
            Format::Rar50 => {
                analysis.blocks.push(marker_block(walk_from, 8, 0, 0));
                walk_from + format.marker_len()
            }
            Format::Srr => walk_from,
        }
    };
    src.seek(start + first_walk_offset)?;

    // WalkBlocks state.
    let decoder = BlockDecoder::new().header_only(format == Format::Srr);
    let window_end = start + src.window_len();
    loop {
        if src.remaining() == 0 {
            break;
        }
        let decoded = match format {
            Format::Rar50 => rar5::decode(src),
            Format::Rar15 | Format::Srr => decoder.decode(src),
        };
        match decoded {
            Ok(block) => {
                if block.next_offset <= block.offset {
                    return Err(Error::Stuck {
                        offset: block.offset,
                    });
                }
                debug!(
                    "block type {:#04x} at {} (header {}, body {})",
                    block.raw_type, block.offset, block.header_size, block.body_size
                );
                analysis.absorb(&block);
                let stop = matches!(block.payload, BlockPayload::Rar5Crypt { .. });
                let next_abs = start + block.next_offset;
                analysis.blocks.push(block);
                if stop {
                    // Headers after the crypt block are ciphertext.
                    break;
                }
                if next_abs >= window_end {
                    break;
                }
                src.seek(next_abs)?;
            }
            Err(Error::Truncated { offset }) => {
                // Ran out of bytes before the bound end: expected for
                // deliberate fragments, keep what was decoded.
                if analysis.blocks.is_empty() {
                    return Err(Error::Truncated { offset });
                }
                warn!("walk stopped early: truncated block at offset {offset}");
                break;
            }
            Err(e) => return Err(e),
        }
    }

    // Done.
    Ok(analysis)
}

fn marker_block(offset: u64, len: u64, flags: u64, crc: u32) -> Block {
    Block {
        offset,
        raw_type: legacy::MARKER,
        flags,
        header_size: len,
        body_size: 0,
        next_offset: offset + len,
        crc_declared: crc,
        payload: BlockPayload::Marker,
    }
}

/// Scans the bound window for a format marker. Returns the marker's
/// window-relative offset and the detected format.
fn find_marker(src: &mut RangeSource) -> Result<Option<(u64, Format)>> {
    let start = src.start();
    let len = src.window_len();

    // SRR's marker is its own first block; only valid at the window
    // start (0x69 is too weak a signature to trust mid-stream).
    if len >= 3 {
        let head = src.get_range(start, start + 2)?;
        if head == Format::SRR_MARKER {
            return Ok(Some((0, Format::Srr)));
        }
    }

    // Both RAR markers share a 6-byte prefix; the tail disambiguates.
    let finder = memmem::Finder::new(&Format::RAR15_MARKER[..6]);
    let overlap = Format::RAR50_MARKER.len() as u64 - 1;
    let mut pos = 0u64;
    loop {
        if len.saturating_sub(pos) < 7 {
            return Ok(None);
        }
        let take = (len - pos).min(SCAN_CHUNK);
        let chunk = src.get_range(start + pos, start + pos + take - 1)?;
        let mut at = 0usize;
        while let Some(i) = finder.find(&chunk[at..]) {
            let hit = at + i;
            if let Some(format) = Format::from_bytes(&chunk[hit..]) {
                return Ok(Some((pos + hit as u64, format)));
            }
            at = hit + 1;
        }
        if pos + take >= len {
            return Ok(None);
        }
        pos += take - overlap;
    }
}

/// Fragment recovery: scans for a plausible file-block type byte and
/// accepts the position only when the CRC32 over the declared header
/// (minus the CRC field itself) matches the header's declared CRC.
fn recover_fragment(src: &mut RangeSource) -> Result<Option<u64>> {
    let start = src.start();
    let len = src.window_len();
    let overlap = 6u64;
    let mut pos = 0u64;
    loop {
        if len.saturating_sub(pos) < 7 {
            return Ok(None);
        }
        let take = (len - pos).min(SCAN_CHUNK);
        let chunk = src.get_range(start + pos, start + pos + take - 1)?;
        // The type byte sits two bytes into the header.
        for hit in memchr_iter(legacy::FILE, &chunk) {
            let candidate = pos + hit as u64;
            if candidate < 2 {
                continue;
            }
            let header_at = candidate - 2;
            if let Some(confirmed) = confirm_header(src, header_at)? {
                return Ok(Some(confirmed));
            }
        }
        if pos + take >= len {
            return Ok(None);
        }
        pos += take - overlap;
    }
}

/// Tentatively decodes the common header at `offset` (window-relative)
/// and checks its CRC over the full declared header size.
fn confirm_header(src: &mut RangeSource, offset: u64) -> Result<Option<u64>> {
    let start = src.start();
    let len = src.window_len();
    if offset + 7 > len {
        return Ok(None);
    }
    let head = src.get_range(start + offset, start + offset + 6)?;
    let declared = u16::from_le_bytes([head[0], head[1]]);
    let header_size = u64::from(u16::from_le_bytes([head[5], head[6]]));
    if header_size < 7 || offset + header_size > len {
        return Ok(None);
    }
    let full = src.get_range(start + offset, start + offset + header_size - 1)?;
    let computed = crc32fast::hash(&full[2..]) & 0xFFFF;
    Ok((computed == u32::from(declared)).then_some(offset))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    fn bind(bytes: Vec<u8>, fragment: bool) -> RangeSource {
        RangeSource::bind(bytes, fragment, None).unwrap()
    }

    #[test]
    fn walks_simple_archive() {
        let bytes = fixtures::legacy_archive(&[("a.txt", b"aaaa"), ("b.txt", b"bb")]);
        let mut src = bind(bytes, false);
        let analysis = analyze(&mut src).unwrap();
        // marker, archive header, two files, end
        assert_eq!(analysis.blocks.len(), 5);
        assert_eq!(analysis.format, Format::Rar15);
        assert!(!analysis.is_encrypted);
        let offsets: Vec<u64> = analysis.blocks.iter().map(|b| b.offset).collect();
        let mut sorted = offsets.clone();
        sorted.sort_unstable();
        assert_eq!(offsets, sorted);
    }

    #[test]
    fn garbage_prefix_marker_found_at_relative_offset() {
        let mut bytes = vec![0xAB; 100];
        bytes.extend(fixtures::legacy_archive(&[("x", b"y")]));
        let mut src = bind(bytes, false);
        let analysis = analyze(&mut src).unwrap();
        assert_eq!(analysis.blocks[0].offset, 100);
    }

    #[test]
    fn no_marker_is_invalid_format() {
        let mut src = bind(vec![0u8; 256], false);
        assert!(matches!(
            analyze(&mut src),
            Err(Error::InvalidFormat(_))
        ));
    }

    #[test]
    fn stuck_offset_is_fatal_not_a_loop() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(Format::RAR15_MARKER);
        // type 0x75 with a declared header size of zero cannot advance
        bytes.extend_from_slice(&[0x00, 0x00, 0x75, 0x00, 0x00, 0x00, 0x00]);
        let mut src = bind(bytes, false);
        assert!(matches!(analyze(&mut src), Err(Error::Stuck { offset: 7 })));
    }

    #[test]
    fn truncated_body_keeps_decoded_blocks() {
        let bytes = fixtures::legacy_archive(&[("a.txt", b"aaaa")]);
        // Slice into the middle of the end block's header.
        let mut src = bind(bytes[..bytes.len() - 3].to_vec(), false);
        let analysis = analyze(&mut src).unwrap();
        // marker, archive header, file survive; the end block is lost
        assert_eq!(analysis.blocks.len(), 3);
    }

    #[test]
    fn fragment_recovery_finds_surviving_file_header() {
        let payload = vec![0x55u8; 700];
        let named: &[(&str, &[u8])] = &[("first.bin", &payload), ("second.bin", b"tail")];
        let bytes = fixtures::legacy_archive(named);
        // Drop the first 500 bytes: marker, archive header and the
        // first file header are gone, its body remains as noise.
        let header_at = fixtures::find_file_header(&bytes, "second.bin") as u64 - 500;
        let mut src = bind(bytes[500..].to_vec(), true);
        let analysis = analyze(&mut src).unwrap();
        // no marker block is synthesized; the walk starts on the
        // recovered header itself
        assert!(!analysis
            .blocks
            .iter()
            .any(|b| matches!(b.payload, BlockPayload::Marker)));
        assert_eq!(analysis.blocks[0].offset, header_at);
        let names: Vec<&str> = analysis
            .blocks
            .iter()
            .filter_map(|b| match &b.payload {
                BlockPayload::File(f) => Some(f.name.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(names, vec!["second.bin"]);
    }

    #[test]
    fn fragment_recovery_rejects_corrupted_header() {
        let payload = vec![0x55u8; 700];
        let named: &[(&str, &[u8])] = &[("first.bin", &payload), ("second.bin", b"tail")];
        let mut bytes = fixtures::legacy_archive(named);
        let second_header = fixtures::find_file_header(&bytes, "second.bin");
        bytes[second_header + 10] ^= 0xFF;
        let mut src = bind(bytes[500..].to_vec(), true);
        assert!(matches!(analyze(&mut src), Err(Error::InvalidFormat(_))));
    }

    #[test]
    fn fragment_flag_required_for_recovery() {
        let payload = vec![0x55u8; 700];
        let named: &[(&str, &[u8])] = &[("first.bin", &payload)];
        let bytes = fixtures::legacy_archive(named);
        let mut src = bind(bytes[500..].to_vec(), false);
        assert!(matches!(analyze(&mut src), Err(Error::InvalidFormat(_))));
    }

    #[test]
    fn rar5_archive_walk() {
        let bytes = fixtures::rar5_archive(&[("data.bin", b"12345678")]);
        let mut src = bind(bytes, false);
        let analysis = analyze(&mut src).unwrap();
        assert_eq!(analysis.format, Format::Rar50);
        assert!(analysis
            .blocks
            .iter()
            .any(|b| matches!(&b.payload, BlockPayload::Rar5File(f) if f.name == "data.bin")));
    }

    #[test]
    fn rar5_crypt_block_stops_walk_and_flags_encryption() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(Format::RAR50_MARKER);
        bytes.extend(fixtures::rar5_block(&[0x04, 0x00, 0x00], &[]));
        bytes.extend(vec![0xEE; 64]); // encrypted headers, opaque
        let mut src = bind(bytes, false);
        let analysis = analyze(&mut src).unwrap();
        assert!(analysis.is_encrypted);
        assert_eq!(analysis.blocks.len(), 2);
    }

    #[test]
    fn srr_walk_decodes_wrapped_rar_headers_without_bodies() {
        let bytes = fixtures::srr_file("pyReScene 1.0", "vol.rar", &[("inner.txt", 9000)]);
        let mut src = bind(bytes, false);
        let analysis = analyze(&mut src).unwrap();
        assert_eq!(analysis.format, Format::Srr);
        assert!(matches!(
            analysis.blocks[0].payload,
            BlockPayload::SrrHeader { .. }
        ));
        // The wrapped file header has a declared body that is absent.
        let file = analysis
            .blocks
            .iter()
            .find_map(|b| match &b.payload {
                BlockPayload::File(f) => Some((b, f)),
                _ => None,
            })
            .unwrap();
        assert_eq!(file.1.packed_size, 9000);
        assert_eq!(file.0.next_offset, file.0.offset + file.0.header_size);
    }
}
