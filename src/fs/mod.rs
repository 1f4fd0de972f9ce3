//! Files and directories of a share.
//!
//! Entities are built from listing rows and keep that snapshot of their
//! metadata; operations go through the [`Share`] they were reached from.

mod dir;
mod file;
mod share;

pub use dir::Directory;
pub use file::File;
pub use share::Share;

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::{flags::FileFlags, listing::Entry, path::VirtualPath, utils};

/// Attributes of an entity as listed by the server
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    pub size: u64,
    /// Unix timestamp
    pub mtime: i64,
    pub flags: FileFlags,
}

impl Metadata {
    pub fn from_entry(entry: &Entry) -> Self {
        Self {
            size: entry.size,
            mtime: entry.mtime,
            flags: entry.file_flags(),
        }
    }

    #[must_use]
    pub fn len(&self) -> u64 {
        self.size
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn modified(&self) -> Option<DateTime<Utc>> {
        utils::from_unix(self.mtime)
    }

    pub fn is_dir(&self) -> bool {
        self.flags.is_dir()
    }

    pub fn is_hidden(&self) -> bool {
        self.flags.is_hidden()
    }

    pub fn is_readonly(&self) -> bool {
        self.flags.is_readonly()
    }

    /// `Win32FileAttributes` value, eight hex digits
    pub fn win32_attributes(&self) -> String {
        self.flags.to_win32_mask()
    }

    /// smbclient does not report content types
    pub fn content_type(&self) -> Option<&str> {
        None
    }
}

/// Anything a path inside a share can resolve to
pub enum Node {
    File(File),
    Directory(Directory),
}

impl Node {
    pub(crate) fn from_entry(share: &Arc<Share>, dir: &VirtualPath, entry: &Entry) -> Self {
        let metadata = Metadata::from_entry(entry);

        if metadata.is_dir() {
            Self::Directory(Directory::new(share.clone(), dir.join(&entry.name), metadata))
        } else {
            Self::File(File::new(share.clone(), dir.clone(), entry.name.clone(), metadata))
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::File(file) => file.name(),
            Self::Directory(dir) => dir.name(),
        }
    }

    pub fn metadata(&self) -> &Metadata {
        match self {
            Self::File(file) => file.metadata(),
            Self::Directory(dir) => dir.metadata(),
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, Self::Directory(_))
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File(file) => f.debug_tuple("File").field(&file.path()).finish(),
            Self::Directory(dir) => f.debug_tuple("Directory").field(dir.path()).finish(),
        }
    }
}
