//! Hand-built archive bytes for tests. Headers carry real CRCs so the
//! fixtures also exercise the CRC-gated recovery path.

use crate::formats::Format;
use memchr::memmem;

const DOS_TIME: u32 = (46 << 25) | (8 << 21) | (30 << 16) | (12 << 11);

/// Legacy header CRC: CRC32 over everything after the CRC field, low
/// 16 bits.
fn seal_legacy(header: &mut [u8]) {
    let crc = (crc32fast::hash(&header[2..]) & 0xFFFF) as u16;
    header[0..2].copy_from_slice(&crc.to_le_bytes());
}

fn legacy_file_header(
    name: &str,
    packed: u32,
    unpacked: u32,
    flags: u16,
    method: u8,
    data_crc: u32,
) -> Vec<u8> {
    let header_size = (32 + name.len()) as u16;
    let mut h = Vec::with_capacity(header_size as usize);
    h.extend_from_slice(&[0, 0, 0x74]);
    h.extend_from_slice(&flags.to_le_bytes());
    h.extend_from_slice(&header_size.to_le_bytes());
    h.extend_from_slice(&packed.to_le_bytes());
    h.extend_from_slice(&unpacked.to_le_bytes());
    h.push(2); // host: windows
    h.extend_from_slice(&data_crc.to_le_bytes());
    h.extend_from_slice(&DOS_TIME.to_le_bytes());
    h.push(20); // version
    h.push(method);
    h.extend_from_slice(&(name.len() as u16).to_le_bytes());
    h.extend_from_slice(&0u32.to_le_bytes()); // attributes
    h.extend_from_slice(name.as_bytes());
    seal_legacy(&mut h);
    h
}

/// A legacy file block (header plus stored body).
pub fn file_block(name: &str, data: &[u8], extra_flags: u16, method: u8) -> Vec<u8> {
    let mut out = legacy_file_header(
        name,
        data.len() as u32,
        data.len() as u32,
        extra_flags,
        method,
        crc32fast::hash(data),
    );
    out.extend_from_slice(data);
    out
}

/// A legacy file header with the LARGE flag and explicit 64-bit size
/// halves. Header only.
pub fn file_block_large(
    name: &str,
    packed_lo: u32,
    packed_hi: u32,
    unp_lo: u32,
    unp_hi: u32,
) -> Vec<u8> {
    let header_size = (32 + 8 + name.len()) as u16;
    let mut h = Vec::with_capacity(header_size as usize);
    h.extend_from_slice(&[0, 0, 0x74]);
    h.extend_from_slice(&crate::parsing::legacy::LHD_LARGE.to_le_bytes());
    h.extend_from_slice(&header_size.to_le_bytes());
    h.extend_from_slice(&packed_lo.to_le_bytes());
    h.extend_from_slice(&unp_lo.to_le_bytes());
    h.push(2);
    h.extend_from_slice(&0u32.to_le_bytes());
    h.extend_from_slice(&DOS_TIME.to_le_bytes());
    h.push(20);
    h.push(0x30);
    h.extend_from_slice(&(name.len() as u16).to_le_bytes());
    h.extend_from_slice(&0u32.to_le_bytes());
    h.extend_from_slice(&packed_hi.to_le_bytes());
    h.extend_from_slice(&unp_hi.to_le_bytes());
    h.extend_from_slice(name.as_bytes());
    seal_legacy(&mut h);
    h
}

/// A legacy file header whose name bytes are given verbatim (for
/// unicode name fields). Header only.
pub fn file_block_raw_name(raw: &[u8], extra_flags: u16) -> Vec<u8> {
    let header_size = (32 + raw.len()) as u16;
    let mut h = Vec::with_capacity(header_size as usize);
    h.extend_from_slice(&[0, 0, 0x74]);
    h.extend_from_slice(&extra_flags.to_le_bytes());
    h.extend_from_slice(&header_size.to_le_bytes());
    h.extend_from_slice(&0u32.to_le_bytes());
    h.extend_from_slice(&0u32.to_le_bytes());
    h.push(2);
    h.extend_from_slice(&0u32.to_le_bytes());
    h.extend_from_slice(&DOS_TIME.to_le_bytes());
    h.push(20);
    h.push(0x30);
    h.extend_from_slice(&(raw.len() as u16).to_le_bytes());
    h.extend_from_slice(&0u32.to_le_bytes());
    h.extend_from_slice(raw);
    seal_legacy(&mut h);
    h
}

/// A legacy archive (main) header.
pub fn archive_block(flags: u16) -> Vec<u8> {
    let mut h = vec![0, 0, 0x73];
    h.extend_from_slice(&flags.to_le_bytes());
    h.extend_from_slice(&13u16.to_le_bytes());
    h.extend_from_slice(&[0; 6]); // reserved
    seal_legacy(&mut h);
    h
}

/// A legacy end-of-archive header.
pub fn end_block(more: bool) -> Vec<u8> {
    let flags: u16 = if more { 0x0001 } else { 0 };
    let mut h = vec![0, 0, 0x7B];
    h.extend_from_slice(&flags.to_le_bytes());
    h.extend_from_slice(&7u16.to_le_bytes());
    seal_legacy(&mut h);
    h
}

/// A complete legacy archive storing the given entries.
pub fn legacy_archive(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut out = Format::RAR15_MARKER.to_vec();
    out.extend(archive_block(0));
    for (name, data) in entries {
        out.extend(file_block(name, data, 0, 0x30));
    }
    out.extend(end_block(false));
    out
}

/// Offset of the named entry's file header inside built archive bytes.
pub fn find_file_header(bytes: &[u8], name: &str) -> usize {
    // name bytes sit 32 bytes into a plain file header
    memmem::find(bytes, name.as_bytes()).map_or(0, |pos| pos - 32)
}

/// An SRR stored-file block (header plus stored body).
pub fn srr_stored_file_block(name: &str, data: &[u8]) -> Vec<u8> {
    let header_size = (13 + name.len()) as u16;
    let mut out = vec![0x6A, 0x6A, 0x6A];
    out.extend_from_slice(&0x8000u16.to_le_bytes()); // long block
    out.extend_from_slice(&header_size.to_le_bytes());
    out.extend_from_slice(&(data.len() as u32).to_le_bytes());
    out.extend_from_slice(&(name.len() as u16).to_le_bytes());
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(data);
    out
}

/// An SRR file: application header, a RAR-volume announcement and the
/// wrapped (body-less) file headers with their declared packed sizes.
pub fn srr_file(app_name: &str, rar_name: &str, entries: &[(&str, u64)]) -> Vec<u8> {
    let mut out = vec![0x69, 0x69, 0x69];
    out.extend_from_slice(&0x0001u16.to_le_bytes());
    out.extend_from_slice(&((9 + app_name.len()) as u16).to_le_bytes());
    out.extend_from_slice(&(app_name.len() as u16).to_le_bytes());
    out.extend_from_slice(app_name.as_bytes());

    out.extend_from_slice(&[0x71, 0x71, 0x71]);
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&((9 + rar_name.len()) as u16).to_le_bytes());
    out.extend_from_slice(&(rar_name.len() as u16).to_le_bytes());
    out.extend_from_slice(rar_name.as_bytes());

    for (name, packed) in entries {
        out.extend(legacy_file_header(
            name,
            *packed as u32,
            *packed as u32,
            0,
            0x30,
            0,
        ));
    }
    out
}

fn vint(mut v: u64) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        let byte = (v & 0x7F) as u8;
        v >>= 7;
        if v == 0 {
            out.push(byte);
            return out;
        }
        out.push(byte | 0x80);
    }
}

/// Frames RAR5 header content with its size vint and CRC32, then
/// appends the data area.
pub fn rar5_block(content: &[u8], data: &[u8]) -> Vec<u8> {
    let size = vint(content.len() as u64);
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&size);
    hasher.update(content);
    let mut out = hasher.finalize().to_le_bytes().to_vec();
    out.extend(size);
    out.extend_from_slice(content);
    out.extend_from_slice(data);
    out
}

/// RAR5 file-header content declaring a data area of `size` bytes.
pub fn rar5_file_content(name: &str, size: u64, method: u64, directory: bool) -> Vec<u8> {
    let mut c = vec![0x02];
    if size > 0 {
        c.extend(vint(0x0002)); // header flags: data area follows
        c.extend(vint(size));
    } else {
        c.extend(vint(0));
    }
    c.extend(vint(u64::from(directory))); // file flags
    c.extend(vint(size)); // unpacked
    c.extend(vint(0)); // attributes
    c.extend(vint((method & 0x07) << 7)); // compression info
    c.extend(vint(0)); // host
    c.extend(vint(name.len() as u64));
    c.extend_from_slice(name.as_bytes());
    c
}

/// RAR5 service-header content declaring a data area of `data_len`
/// bytes.
pub fn rar5_service_content(name: &str, data_len: u64) -> Vec<u8> {
    let mut c = vec![0x03];
    c.extend(vint(0x0002));
    c.extend(vint(data_len));
    c.extend(vint(0)); // file flags
    c.extend(vint(0)); // unpacked
    c.extend(vint(0)); // attributes
    c.extend(vint(0)); // compression info
    c.extend(vint(0)); // host
    c.extend(vint(name.len() as u64));
    c.extend_from_slice(name.as_bytes());
    c
}

/// A complete RAR5 archive storing the given entries.
pub fn rar5_archive(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut out = Format::RAR50_MARKER.to_vec();
    out.extend(rar5_block(&[0x01, 0x00, 0x00], &[]));
    for (name, data) in entries {
        out.extend(rar5_block(
            &rar5_file_content(name, data.len() as u64, 0, false),
            data,
        ));
    }
    out.extend(rar5_block(&[0x05, 0x00, 0x00], &[]));
    out
}
