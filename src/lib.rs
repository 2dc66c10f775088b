//! Byte-level inspection of RAR, RAR5 and SRR streams.
//!
//! This crate walks archive header structures without decompressing
//! anything: it lists declared files, reads stored (uncompressed)
//! payloads in place, recovers listings from deliberately truncated
//! fragments, and recursively opens archives stored inside archives by
//! carving byte windows instead of extracting. Payload decompression
//! and decryption are delegated to a configurable external client.
//!
//! ```no_run
//! use rar_inspect::RarArchive;
//!
//! # fn main() -> rar_inspect::Result<()> {
//! let mut archive = RarArchive::open("release.rar", false)?;
//! for entry in archive.file_entries(true) {
//!     println!("{} ({} bytes)", entry.name, entry.unpacked_size);
//! }
//! let bytes = archive.file_data("checksums.sfv")?;
//! # let _ = bytes;
//! # Ok(())
//! # }
//! ```

pub mod analyzer;
pub mod archive;
pub mod error;
mod extract;
pub mod formats;
pub mod nested;
pub mod parsing;
pub mod source;

#[cfg(test)]
mod fixtures;

pub use analyzer::Analysis;
pub use archive::{FileEntry, RarArchive, Summary};
pub use error::{Error, Result};
pub use formats::{Format, FormatReader, RawTimestamp};
pub use nested::FlatEntry;
pub use parsing::{Block, BlockPayload};
pub use source::{PipeSource, RangeSource};
