//! Byte-range-addressable data sources.
//!
//! A [`RangeSource`] owns a window `[start, end]` over an underlying
//! medium (a file on disk or an in-memory buffer) plus the current read
//! cursor. All block decoding goes through it, so the "current position"
//! is never a free-floating global: every decode takes the source by
//! exclusive reference for its duration.
//!
//! [`PipeSource`] wraps the stdout of a spawned process for the external
//! extraction path, where the total length is not known up front.

use crate::error::{Error, Result};
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, ExitStatus};
use std::sync::Arc;
use std::thread;
use tempfile::NamedTempFile;

/// The underlying medium a [`RangeSource`] reads from.
///
/// Memory buffers are reference-counted so that carving a nested window
/// for recursive analysis clones cheaply instead of copying bytes.
enum Medium {
    File {
        path: PathBuf,
        file: File,
        len: u64,
    },
    Memory(Arc<[u8]>),
}

impl Medium {
    fn len(&self) -> u64 {
        match self {
            Self::File { len, .. } => *len,
            Self::Memory(buf) => buf.len() as u64,
        }
    }

    /// Read exactly `buf.len()` bytes at the absolute position `at`.
    fn read_at(&mut self, at: u64, buf: &mut [u8]) -> Result<()> {
        match self {
            Self::File { file, .. } => {
                file.seek(SeekFrom::Start(at))?;
                file.read_exact(buf)?;
                Ok(())
            }
            Self::Memory(data) => {
                let lo = at as usize;
                buf.copy_from_slice(&data[lo..lo + buf.len()]);
                Ok(())
            }
        }
    }
}

/// A bounded, cursor-owning view over a file or memory buffer.
///
/// Invariants:
/// - `start <= offset <= end + 1` at all times (`end` inclusive);
/// - `read(n)` returns exactly `n` bytes and advances the cursor, or
///   fails without moving it;
/// - `seek` clamps to the window, except positions beyond the true
///   medium size, which are a hard error so callers can tell "end of
///   window" from "corrupt offset".
pub struct RangeSource {
    medium: Medium,
    /// Absolute inclusive lower bound of the analysis window.
    start: u64,
    /// Absolute exclusive upper bound (`end + 1`).
    stop: u64,
    /// Absolute read cursor, always in `[start, stop]`.
    offset: u64,
    fragment: bool,
    /// Materialized copy of the window, deleted when the source drops.
    temp: Option<NamedTempFile>,
}

impl RangeSource {
    /// Binds to a file on disk.
    ///
    /// `range` is an inclusive `(start, end)` pair absolute to the file;
    /// omitted it covers the whole file. A reversed range or one
    /// extending past the file is [`Error::RangeInvalid`].
    pub fn open(path: impl AsRef<Path>, fragment: bool, range: Option<(u64, u64)>) -> Result<Self> {
        let path = path.as_ref();
        let meta = std::fs::metadata(path)
            .map_err(|_| Error::NotFound(path.display().to_string()))?;
        let file = File::open(path).map_err(|_| Error::NotFound(path.display().to_string()))?;
        let medium = Medium::File {
            path: path.to_path_buf(),
            file,
            len: meta.len(),
        };
        Self::with_medium(medium, fragment, range)
    }

    /// Binds to an in-memory buffer.
    pub fn bind(data: impl Into<Arc<[u8]>>, fragment: bool, range: Option<(u64, u64)>) -> Result<Self> {
        Self::with_medium(Medium::Memory(data.into()), fragment, range)
    }

    fn with_medium(medium: Medium, fragment: bool, range: Option<(u64, u64)>) -> Result<Self> {
        let len = medium.len();
        let (start, stop) = match range {
            None => (0, len),
            Some((lo, hi)) => {
                if lo > hi {
                    return Err(Error::RangeInvalid(format!(
                        "start {lo} is past end {hi}"
                    )));
                }
                if hi >= len {
                    return Err(Error::RangeInvalid(format!(
                        "range end {hi} exceeds medium size {len}"
                    )));
                }
                (lo, hi + 1)
            }
        };
        Ok(Self {
            medium,
            start,
            stop,
            offset: start,
            fragment,
            temp: None,
        })
    }

    /// Absolute start of the analysis window.
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Number of bytes in the analysis window.
    pub fn window_len(&self) -> u64 {
        self.stop - self.start
    }

    /// Total size of the underlying medium, independent of the window.
    pub fn medium_len(&self) -> u64 {
        self.medium.len()
    }

    /// Absolute position of the read cursor.
    pub fn position(&self) -> u64 {
        self.offset
    }

    /// Bytes left between the cursor and the window end.
    pub fn remaining(&self) -> u64 {
        self.stop - self.offset
    }

    /// Whether this window is a known slice of a larger archive.
    pub fn is_fragment(&self) -> bool {
        self.fragment
    }

    /// The bound file path, when the medium is a file.
    pub fn path(&self) -> Option<&Path> {
        match &self.medium {
            Medium::File { path, .. } => Some(path),
            Medium::Memory(_) => None,
        }
    }

    /// Reads exactly `n` bytes at the cursor and advances it.
    ///
    /// Fails with [`Error::Truncated`] (cursor untouched) when fewer than
    /// `n` bytes remain before the window end.
    pub fn read(&mut self, n: usize) -> Result<Vec<u8>> {
        if (n as u64) > self.remaining() {
            return Err(Error::Truncated {
                offset: self.offset - self.start,
            });
        }
        let mut buf = vec![0u8; n];
        self.medium.read_at(self.offset, &mut buf)?;
        self.offset += n as u64;
        Ok(buf)
    }

    /// Moves the cursor to the absolute position `pos`.
    ///
    /// Positions outside the window clamp silently to `start`/`end + 1`,
    /// except positions beyond the medium itself, which are a hard
    /// [`Error::RangeInvalid`].
    pub fn seek(&mut self, pos: u64) -> Result<u64> {
        if pos > self.medium.len() {
            return Err(Error::RangeInvalid(format!(
                "seek to {pos} exceeds medium size {}",
                self.medium.len()
            )));
        }
        self.offset = pos.clamp(self.start, self.stop);
        Ok(self.offset)
    }

    /// Fetches the inclusive absolute range `[lo, hi]`, ignoring the
    /// analysis window. The cursor is not moved.
    pub fn get_range(&mut self, lo: u64, hi: u64) -> Result<Vec<u8>> {
        if lo > hi {
            return Err(Error::RangeInvalid(format!("start {lo} is past end {hi}")));
        }
        if hi >= self.medium.len() {
            return Err(Error::RangeInvalid(format!(
                "range end {hi} exceeds medium size {}",
                self.medium.len()
            )));
        }
        let mut buf = vec![0u8; (hi - lo + 1) as usize];
        self.medium.read_at(lo, &mut buf)?;
        Ok(buf)
    }

    /// Creates a child window `[lo, hi]` (absolute, inclusive) over the
    /// same medium. The child owns its own cursor and handle; nothing is
    /// shared mutably with the parent.
    pub fn carve(&self, lo: u64, hi: u64, fragment: bool) -> Result<RangeSource> {
        let medium = match &self.medium {
            Medium::File { path, len, .. } => Medium::File {
                path: path.clone(),
                file: File::open(path)?,
                len: *len,
            },
            Medium::Memory(buf) => Medium::Memory(Arc::clone(buf)),
        };
        Self::with_medium(medium, fragment, Some((lo, hi)))
    }

    /// Copies the bound window to a freshly named temporary file and
    /// returns its path. The file is owned by this source and deleted
    /// when the source is dropped, on every exit path.
    pub fn create_temp_file(&mut self) -> Result<&Path> {
        let tmp = match self.temp.take() {
            Some(tmp) => tmp,
            None => {
                let mut tmp = NamedTempFile::new()?;
                let mut pos = self.start;
                let mut chunk = [0u8; 64 * 1024];
                while pos < self.stop {
                    let n = ((self.stop - pos) as usize).min(chunk.len());
                    self.medium.read_at(pos, &mut chunk[..n])?;
                    tmp.write_all(&chunk[..n])?;
                    pos += n as u64;
                }
                tmp.flush()?;
                tmp
            }
        };
        Ok(self.temp.insert(tmp).path())
    }
}

/// Output stream of a spawned external process.
///
/// Unlike [`RangeSource`] there is no known total length: reads run
/// until the pipe is exhausted. Used only by the external extraction
/// collaborator, never by the block decoder.
pub struct PipeSource {
    child: Child,
    stdout: BufReader<ChildStdout>,
    stderr: Option<thread::JoinHandle<Option<String>>>,
}

impl PipeSource {
    /// Takes ownership of a spawned child and its piped stdout/stderr.
    ///
    /// Stderr is drained on its own thread from the start: a tool that
    /// floods stderr before writing stdout would otherwise fill the
    /// pipe buffer and deadlock both processes. The drain keeps the
    /// first line as the diagnostic and discards the rest.
    pub fn from_child(mut child: Child) -> Result<Self> {
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::ExternalToolFailed("stdout was not piped".into()))?;
        let stderr = child.stderr.take().map(|err| {
            thread::spawn(move || {
                let mut reader = BufReader::new(err);
                let mut line = String::new();
                reader.read_line(&mut line).ok();
                io::copy(&mut reader, &mut io::sink()).ok();
                let line = line.trim_end().to_string();
                (!line.is_empty()).then_some(line)
            })
        });
        Ok(Self {
            child,
            stdout: BufReader::new(stdout),
            stderr,
        })
    }

    /// Reads exactly `n` bytes.
    pub fn read(&mut self, n: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; n];
        self.stdout.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Reads until the pipe is exhausted.
    pub fn read_to_end(&mut self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.stdout.read_to_end(&mut buf)?;
        Ok(buf)
    }

    /// Reads a single line, stopping at the first line terminator.
    /// The terminator is included in the returned bytes.
    pub fn read_line(&mut self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.stdout.read_until(b'\n', &mut buf)?;
        Ok(buf)
    }

    /// Waits for the process and returns its exit status plus the first
    /// line of stderr, if any was produced.
    pub fn finish(mut self) -> Result<(ExitStatus, Option<String>)> {
        let diagnostic = self
            .stderr
            .take()
            .and_then(|drain| drain.join().ok())
            .flatten();
        let status = self.child.wait()?;
        Ok((status, diagnostic))
    }
}
