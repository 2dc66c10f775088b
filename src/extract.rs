//! The external extraction boundary.
//!
//! Payload decompression and decryption live outside this crate: a
//! configured unrar-compatible executable is spawned with the bound
//! archive path and the entry bytes are read back over its stdout.
//! Memory-bound sources are materialized to a temp file first; the
//! source owns that file and removes it when dropped.

use crate::error::{Error, Result};
use crate::source::{PipeSource, RangeSource};
use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::{Command, Stdio};

pub(crate) struct ExternalClient {
    program: PathBuf,
}

impl ExternalClient {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Extracts `entry_name` from the source's archive, returning the
    /// unpacked bytes. The client is invoked in print-to-stdout mode;
    /// a missing executable maps to [`Error::ExternalToolUnavailable`]
    /// and a nonzero exit to [`Error::ExternalToolFailed`] carrying the
    /// tool's first stderr line.
    pub fn extract(
        &self,
        src: &mut RangeSource,
        entry_name: &str,
        password: Option<&str>,
    ) -> Result<Vec<u8>> {
        let archive_path = match src.path() {
            Some(path) => path.to_path_buf(),
            None => src.create_temp_file()?.to_path_buf(),
        };

        let mut cmd = Command::new(&self.program);
        cmd.arg("p").arg("-inul");
        match password {
            Some(pw) => cmd.arg(format!("-p{pw}")),
            None => cmd.arg("-p-"),
        };
        cmd.arg(&archive_path)
            .arg(entry_name)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let child = cmd.spawn().map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                Error::ExternalToolUnavailable
            } else {
                Error::Io(e)
            }
        })?;

        let mut pipe = PipeSource::from_child(child)?;
        let data = pipe.read_to_end()?;
        let (status, diagnostic) = pipe.finish()?;
        if !status.success() {
            return Err(Error::ExternalToolFailed(
                diagnostic.unwrap_or_else(|| format!("exit status {status}")),
            ));
        }
        Ok(data)
    }
}
