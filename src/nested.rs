//! Recursive composition: archives stored inside archives.
//!
//! A stored nested archive is opened by carving a child window over the
//! parent's medium, so no bytes are copied and no payload is decoded.
//! Compressed or passworded children cannot be carved; opening them is
//! refused with a message that survives into the flattened listing, so
//! a recursive walk never silently drops an unreadable branch.

use crate::archive::{FileEntry, RarArchive};
use crate::error::{Error, Result};

/// Cached outcome of opening one nested archive.
pub(crate) enum ChildSlot {
    Open(Box<RarArchive>),
    Failed(String),
}

/// One line of a flattened recursive listing.
///
/// `source` is the breadcrumb of containing archives, `main` being the
/// root (e.g. `main > a.rar > b.rar`). Unreadable nested archives
/// appear as entries with `error` set and no `entry`.
#[derive(Debug, Clone)]
pub struct FlatEntry {
    pub source: String,
    pub name: String,
    pub entry: Option<FileEntry>,
    pub error: Option<String>,
}

/// Root label in flattened listings.
const ROOT_SOURCE: &str = "main";

/// Whether an entry name looks like a RAR volume (`.rar` or the
/// old-style numbered `.rNN`/`.sNN` continuations).
fn looks_like_archive(name: &str) -> bool {
    let Some((_, ext)) = name.rsplit_once('.') else {
        return false;
    };
    if ext.eq_ignore_ascii_case("rar") {
        return true;
    }
    let mut chars = ext.chars();
    matches!(chars.next(), Some('r' | 'R' | 's' | 'S'))
        && ext.len() == 3
        && chars.all(|c| c.is_ascii_digit())
}

impl RarArchive {
    /// Entries whose names mark them as nested archives.
    pub fn archive_entries(&self) -> Vec<FileEntry> {
        self.file_entries(true)
            .into_iter()
            .filter(|e| looks_like_archive(&e.name))
            .collect()
    }

    pub fn contains_archive(&self) -> bool {
        !self.archive_entries().is_empty()
    }

    /// Names of the nested archives, in stream order.
    pub fn archive_list(&self) -> Vec<String> {
        self.archive_entries().into_iter().map(|e| e.name).collect()
    }

    /// Opens every nested archive and pairs its name with a summary,
    /// `None` for the ones that could not be opened.
    pub fn archive_summaries(&mut self) -> Vec<(String, Option<crate::archive::Summary>)> {
        self.archive_list()
            .into_iter()
            .map(|name| {
                let summary = self
                    .archive(&name)
                    .ok()
                    .map(|child| child.summary(false, false));
                (name, summary)
            })
            .collect()
    }

    /// Opens (and caches) the nested archive stored under `name`.
    /// Idempotent: repeated calls return the same child, and a child
    /// that failed to open keeps failing with the same message instead
    /// of being re-walked.
    pub fn archive(&mut self, name: &str) -> Result<&mut RarArchive> {
        if !self.children.contains_key(name) {
            let slot = match self.open_child(name) {
                Ok(child) => ChildSlot::Open(Box::new(child)),
                Err(e) => ChildSlot::Failed(e.to_string()),
            };
            self.children.insert(name.to_string(), slot);
        }
        match self.children.get_mut(name) {
            Some(ChildSlot::Open(child)) => Ok(child),
            Some(ChildSlot::Failed(message)) => Err(Error::Unsupported(message.clone())),
            None => Err(Error::NotFound(name.to_string())),
        }
    }

    fn open_child(&mut self, name: &str) -> Result<RarArchive> {
        let entry = self
            .archive_entries()
            .into_iter()
            .find(|e| e.name == name)
            .ok_or_else(|| Error::NotFound(name.to_string()))?;
        if entry.has_password {
            return Err(Error::Unsupported(format!(
                "nested archive {name} is password protected and cannot be read in place"
            )));
        }
        if !entry.is_stored {
            return Err(Error::Unsupported(format!(
                "nested archive {name} is compressed and cannot be read in place"
            )));
        }
        let (lo, hi) = entry
            .body
            .ok_or_else(|| Error::NotFound(format!("{name} has no stored bytes")))?;
        let start = self.src.start();
        let parent_end = start + self.src.window_len() - 1;
        let child_src = self
            .src
            .carve(start + lo, (start + hi).min(parent_end), true)?;
        RarArchive::from_source(child_src)
    }

    /// Flattens the archive tree into one listing with breadcrumbed
    /// provenance. `recurse` descends past direct children;
    /// `merge_all` includes the root archive's own entries.
    pub fn archive_file_list(&mut self, recurse: bool, merge_all: bool) -> Vec<FlatEntry> {
        let mut out = Vec::new();
        if merge_all {
            self.push_own_entries(ROOT_SOURCE, &mut out);
        }
        self.push_children(ROOT_SOURCE, recurse, &mut out);
        out
    }

    fn push_own_entries(&self, source: &str, out: &mut Vec<FlatEntry>) {
        for entry in self.file_entries(false) {
            out.push(FlatEntry {
                source: source.to_string(),
                name: entry.name.clone(),
                entry: Some(entry),
                error: None,
            });
        }
    }

    fn push_children(&mut self, source: &str, recurse: bool, out: &mut Vec<FlatEntry>) {
        for name in self.archive_list() {
            let crumb = format!("{source} > {name}");
            match self.archive(&name) {
                Ok(child) => {
                    let before = out.len();
                    child.push_own_entries(&crumb, out);
                    if recurse {
                        child.push_children(&crumb, true, out);
                    }
                    // an empty child still leaves a trace
                    if out.len() == before {
                        out.push(FlatEntry {
                            source: crumb.clone(),
                            name,
                            entry: None,
                            error: None,
                        });
                    }
                }
                Err(e) => out.push(FlatEntry {
                    source: crumb,
                    name,
                    entry: None,
                    error: Some(e.to_string()),
                }),
            }
        }
    }
}
