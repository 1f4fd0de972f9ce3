//! WebDAV property updates that map onto file attributes.

use crate::flags::{FileFlags, Flag};

const MS_NS: &str = "{urn:schemas-microsoft-com:}";
const DAV_NS: &str = "{DAV:}";

/// A property key `set_attributes` understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Property {
    CreationTime,
    LastAccessTime,
    LastModifiedTime,
    FileAttributes,
    IsHidden,
    IsReadonly,
}

impl Property {
    pub fn from_key(key: &str) -> Option<Self> {
        if let Some(name) = key.strip_prefix(MS_NS) {
            match name {
                "Win32CreationTime" => Some(Self::CreationTime),
                "Win32LastAccessTime" => Some(Self::LastAccessTime),
                "Win32LastModifiedTime" => Some(Self::LastModifiedTime),
                "Win32FileAttributes" => Some(Self::FileAttributes),
                _ => None,
            }
        } else if let Some(name) = key.strip_prefix(DAV_NS) {
            match name {
                "ishidden" => Some(Self::IsHidden),
                "isreadonly" => Some(Self::IsReadonly),
                _ => None,
            }
        } else {
            None
        }
    }
}

pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}

/// Computes the attributes `mutations` ask for, starting from `flags`.
///
/// Timestamps cannot be set through smbclient and are skipped, as are
/// unknown keys and values that do not parse. Later mutations win.
pub fn apply(flags: &FileFlags, mutations: &[(&str, &str)]) -> FileFlags {
    let mut target = flags.clone();

    for (key, value) in mutations {
        let Some(property) = Property::from_key(key) else {
            debug!("ignoring unknown property {}", key);
            continue;
        };

        let updated = match property {
            Property::CreationTime | Property::LastAccessTime | Property::LastModifiedTime => {
                debug!("ignoring {}: timestamps cannot be set", key);
                None
            }
            Property::FileAttributes => target.with_win32_mask(value),
            Property::IsHidden => parse_bool(value).map(|on| target.set(Flag::Hidden, on)),
            Property::IsReadonly => parse_bool(value).map(|on| target.set(Flag::Readonly, on)),
        };

        match updated {
            Some(flags) => target = flags,
            None => debug!("ignoring {} = {:?}", key, value),
        }
    }

    target
}
