//! Parsing of smbclient `ls` output.
//!
//! A listing row looks like
//!
//! ```text
//!   report.doc                          A     2048  Sun Sep  9 01:46:40 2001
//! ```
//!
//! followed by a free-space trailer that carries no entries.

use chrono::NaiveDateTime;
use regex::Regex;
use std::sync::LazyLock;

use crate::flags::FileFlags;

/// One raw row of a directory listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub name: String,
    pub flags: String,
    pub size: u64,
    /// Unix timestamp
    pub mtime: i64,
}

impl Entry {
    pub fn new<N: Into<String>, F: Into<String>>(name: N, flags: F, size: u64, mtime: i64) -> Self {
        Self {
            name: name.into(),
            flags: flags.into(),
            size,
            mtime,
        }
    }

    pub fn file_flags(&self) -> FileFlags {
        FileFlags::from_smb_str(&self.flags)
    }

    pub fn is_dir(&self) -> bool {
        self.file_flags().is_dir()
    }
}

static ROW: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s+(?P<name>.+?)\s+(?P<flags>[A-Z]*)\s+(?P<size>\d+)\s+(?P<date>[A-Z][a-z]{2}\s+[A-Z][a-z]{2}\s+\d{1,2}\s+\d{2}:\d{2}:\d{2}\s+\d{4})\s*$",
    )
    .expect("listing pattern is valid")
});

/// Prompts smbclient echoes in front of output when stdin is not a tty
static PROMPT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(smb: [^>]*> ?)+").expect("prompt pattern is valid"));

/// `line` without the prompts in front of it
pub(crate) fn strip_prompt(line: &str) -> &str {
    PROMPT.find(line).map_or(line, |prompt| &line[prompt.end()..])
}

/// smbclient prints listing times without a zone; they are read as UTC.
fn parse_time(date: &str) -> Option<i64> {
    let date = date.split_whitespace().collect::<Vec<_>>().join(" ");
    NaiveDateTime::parse_from_str(&date, "%a %b %d %H:%M:%S %Y")
        .ok()
        .map(|time| time.and_utc().timestamp())
}

/// Parses one line, `None` for anything that is not an entry row.
pub fn parse_line(line: &str) -> Option<Entry> {
    let line = PROMPT.replace(line, "  ");
    let caps = ROW.captures(&line)?;

    let name = &caps["name"];
    if name == "." || name == ".." {
        return None;
    }

    Some(Entry {
        name: name.to_owned(),
        flags: caps["flags"].to_owned(),
        size: caps["size"].parse().ok()?,
        mtime: parse_time(&caps["date"])?,
    })
}

/// Parses a whole listing, keeping the server's order.
pub fn parse<S: AsRef<str>>(lines: &[S]) -> Vec<Entry> {
    lines
        .iter()
        .filter_map(|line| parse_line(line.as_ref()))
        .collect()
}
