//! The public archive surface: open, walk, list, summarize and fetch
//! stored bytes.

use crate::analyzer::{self, Analysis};
use crate::error::{Error, Result};
use crate::extract::ExternalClient;
use crate::formats::{Format, FormatReader, RawTimestamp};
use crate::nested::ChildSlot;
use crate::parsing::{Block, BlockPayload};
use crate::source::RangeSource;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One file the archive declares, derived from its header block.
///
/// Offsets are relative to the archive's analysis window; `body` is the
/// inclusive byte range of the packed payload when it is present in the
/// stream (SRR-wrapped headers declare sizes but carry no bodies).
#[derive(Debug, Clone)]
pub struct FileEntry {
    pub name: String,
    pub unpacked_size: u64,
    pub packed_size: u64,
    pub is_directory: bool,
    pub is_stored: bool,
    pub has_password: bool,
    pub split_before: bool,
    pub split_after: bool,
    pub crc32: Option<u32>,
    pub timestamp: Option<RawTimestamp>,
    pub offset: u64,
    pub header_size: u64,
    pub next_offset: u64,
    pub body: Option<(u64, u64)>,
}

/// Archive-level rollup, optionally carrying the full listing.
#[derive(Debug, Clone)]
pub struct Summary {
    /// Bound file path, when the archive came from disk.
    pub path: Option<PathBuf>,
    /// Size in bytes of the analyzed window.
    pub size: u64,
    pub format: Format,
    pub block_count: usize,
    pub file_count: usize,
    pub total_unpacked: u64,
    pub is_volume: bool,
    pub has_auth: bool,
    pub has_recovery: bool,
    pub is_encrypted: bool,
    /// Populated only when a full summary was requested.
    pub files: Option<Vec<FileEntry>>,
}

/// An opened and analyzed RAR, RAR5 or SRR stream.
pub struct RarArchive {
    pub(crate) src: RangeSource,
    pub(crate) analysis: Analysis,
    pub(crate) client: Option<ExternalClient>,
    /// Nested archives opened so far, by entry name. Failures are cached
    /// too so repeated listing does not re-walk broken children.
    pub(crate) children: HashMap<String, ChildSlot>,
}

impl RarArchive {
    /// Opens a file and walks it.
    pub fn open(path: impl AsRef<Path>, is_fragment: bool) -> Result<Self> {
        Self::open_range(path, is_fragment, None)
    }

    /// Opens a file restricted to the inclusive absolute byte range
    /// `(start, end)`. Block offsets in the result are relative to
    /// `start`.
    pub fn open_range(
        path: impl AsRef<Path>,
        is_fragment: bool,
        range: Option<(u64, u64)>,
    ) -> Result<Self> {
        Self::from_source(RangeSource::open(path, is_fragment, range)?)
    }

    /// Binds to an in-memory buffer and walks it.
    pub fn from_bytes(data: impl Into<Arc<[u8]>>, is_fragment: bool) -> Result<Self> {
        Self::from_source(RangeSource::bind(data, is_fragment, None)?)
    }

    pub(crate) fn from_source(mut src: RangeSource) -> Result<Self> {
        let analysis = analyzer::analyze(&mut src)?;
        Ok(Self {
            src,
            analysis,
            client: None,
            children: HashMap::new(),
        })
    }

    pub fn format(&self) -> Format {
        self.analysis.format
    }

    /// Every decoded block, in offset order.
    pub fn blocks(&self) -> &[Block] {
        &self.analysis.blocks
    }

    /// The declared file entries, derived from file headers on demand.
    /// Service records (quick-open caches, subblocks) are not files and
    /// never appear here.
    pub fn file_entries(&self, skip_dirs: bool) -> Vec<FileEntry> {
        self.analysis
            .blocks
            .iter()
            .filter_map(entry_from_block)
            .filter(|e| !(skip_dirs && e.is_directory))
            .collect()
    }

    /// Reads the packed bytes of a stored entry straight out of the
    /// stream. Compressed or passworded entries need the external
    /// client; directories and SRR-wrapped headers have no bytes.
    pub fn file_data(&mut self, name: &str) -> Result<Vec<u8>> {
        if let Some(block) = self.stored_file_block(name) {
            let (lo, hi) = block
                .body_range()
                .ok_or_else(|| Error::NotFound(format!("{name} has no stored bytes")))?;
            let start = self.src.start();
            return self.src.get_range(start + lo, start + hi);
        }
        let entry = self
            .file_entries(false)
            .into_iter()
            .find(|e| e.name == name)
            .ok_or_else(|| Error::NotFound(name.to_string()))?;
        if entry.has_password {
            return Err(Error::Unsupported(format!(
                "{name} is password protected; use the external client"
            )));
        }
        if !entry.is_stored {
            return Err(Error::Unsupported(format!(
                "{name} is compressed; use the external client"
            )));
        }
        let (lo, hi) = entry
            .body
            .ok_or_else(|| Error::NotFound(format!("{name} has no stored bytes")))?;
        let start = self.src.start();
        self.src.get_range(start + lo, start + hi)
    }

    /// Names of files an SRR stream stores verbatim (SFV, NFO and the
    /// like).
    pub fn stored_file_names(&self) -> Vec<String> {
        self.analysis
            .blocks
            .iter()
            .filter_map(|b| match &b.payload {
                BlockPayload::SrrStoredFile { name } => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    fn stored_file_block(&self, name: &str) -> Option<&Block> {
        self.analysis.blocks.iter().find(
            |b| matches!(&b.payload, BlockPayload::SrrStoredFile { name: n } if n == name),
        )
    }

    /// Quick-open cache entries, when the RAR5 stream carried one. Kept
    /// separate from the walked listing so the two can be compared.
    pub fn quick_open_entries(&self) -> Option<&[crate::parsing::QuickOpenEntry]> {
        self.analysis.blocks.iter().find_map(|b| match &b.payload {
            BlockPayload::Rar5QuickOpen { entries } => Some(entries.as_slice()),
            _ => None,
        })
    }

    /// Configures the external decompression client used for entries
    /// this crate cannot read directly.
    pub fn set_external_client(&mut self, program: impl Into<PathBuf>) {
        self.client = Some(ExternalClient::new(program));
    }

    /// Extracts one entry through the configured external client,
    /// returning its unpacked bytes.
    pub fn extract_file(&mut self, name: &str, password: Option<&str>) -> Result<Vec<u8>> {
        if !self.file_entries(false).iter().any(|e| e.name == name) {
            return Err(Error::NotFound(name.to_string()));
        }
        let client = self.client.as_ref().ok_or(Error::ExternalToolUnavailable)?;
        client.extract(&mut self.src, name, password)
    }

    /// Archive-level rollup; the full form carries the listing too.
    pub fn summary(&self, full: bool, skip_dirs: bool) -> Summary {
        let files = self.file_entries(skip_dirs);
        Summary {
            path: self.src.path().map(Path::to_path_buf),
            size: self.src.window_len(),
            format: self.analysis.format,
            block_count: self.analysis.blocks.len(),
            file_count: files.len(),
            total_unpacked: files.iter().map(|e| e.unpacked_size).sum(),
            is_volume: self.analysis.is_volume,
            has_auth: self.analysis.has_auth,
            has_recovery: self.analysis.has_recovery,
            is_encrypted: self.analysis.is_encrypted,
            files: full.then_some(files),
        }
    }
}

impl fmt::Debug for RarArchive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RarArchive")
            .field("format", &self.analysis.format)
            .field("blocks", &self.analysis.blocks.len())
            .field("path", &self.src.path())
            .finish_non_exhaustive()
    }
}

impl FormatReader for RarArchive {
    fn open(path: &Path, is_fragment: bool) -> Result<Self> {
        Self::open(path, is_fragment)
    }

    fn analyze(&mut self) -> Result<()> {
        self.src.seek(self.src.start())?;
        self.analysis = analyzer::analyze(&mut self.src)?;
        self.children.clear();
        Ok(())
    }

    fn file_list(&self, skip_dirs: bool) -> Vec<FileEntry> {
        self.file_entries(skip_dirs)
    }

    fn summary(&self, full: bool, skip_dirs: bool) -> Summary {
        Self::summary(self, full, skip_dirs)
    }
}

fn entry_from_block(block: &Block) -> Option<FileEntry> {
    match &block.payload {
        BlockPayload::File(f) => Some(FileEntry {
            name: f.name.clone(),
            unpacked_size: f.unpacked_size,
            packed_size: f.packed_size,
            is_directory: f.is_directory,
            is_stored: f.is_stored(),
            has_password: f.has_password,
            split_before: f.split_before,
            split_after: f.split_after,
            crc32: Some(f.crc32),
            timestamp: Some(RawTimestamp::from_dos(f.dos_time)),
            offset: block.offset,
            header_size: block.header_size,
            next_offset: block.next_offset,
            body: body_in_stream(block),
        }),
        BlockPayload::Rar5File(f) if !f.is_service => Some(FileEntry {
            name: f.name.clone(),
            unpacked_size: f.unpacked_size,
            packed_size: f.packed_size,
            is_directory: f.is_directory,
            is_stored: f.compression.is_stored(),
            has_password: f.is_encrypted,
            split_before: f.split_before,
            split_after: f.split_after,
            crc32: f.crc32,
            timestamp: f.mtime.map(|secs| RawTimestamp {
                nanos: i64::from(secs) * 1_000_000_000,
            }),
            offset: block.offset,
            header_size: block.header_size,
            next_offset: block.next_offset,
            body: body_in_stream(block),
        }),
        _ => None,
    }
}

/// A declared body counts only when the stream actually contains it,
/// i.e. when it contributed to the next-block offset.
fn body_in_stream(block: &Block) -> Option<(u64, u64)> {
    if block.next_offset > block.offset + block.header_size {
        block.body_range()
    } else {
        None
    }
}
