use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Tunables of the smbclient bridge.
///
/// Deserializable so that whatever loads the process configuration can
/// fill it; every missing field takes its default.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Program spawned for every session
    pub smbclient: PathBuf,
    /// Extra arguments, e.g. `["-m", "SMB3"]`
    pub extra_args: Vec<String>,
    /// Files larger than this (bytes) get no etag
    pub etag_size_limit: u64,
    /// Lifetime of a cached listing, in seconds
    pub cache_max_age: u64,
    /// Sweeps only run in seconds divisible by this
    pub sweep_period: u64,
    /// ... and then only one time in this many
    pub sweep_chance: u32,
    /// Command whose "not found" echo marks the end of a response
    pub sentinel: String,
    /// Local file smbclient reads uploads from
    pub stdin_path: String,
    /// Local file smbclient writes downloads to
    pub stdout_path: String,
    /// Streaming chunk size in bytes
    pub chunk_size: usize,
}

impl Config {
    pub fn cache_max_age(&self) -> Duration {
        Duration::from_secs(self.cache_max_age)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            smbclient: PathBuf::from("smbclient"),
            extra_args: Vec::new(),
            etag_size_limit: 20_000_000,
            cache_max_age: 60,
            sweep_period: 5,
            sweep_chance: 10,
            sentinel: "__smbdav_end__".to_owned(),
            stdin_path: "/dev/stdin".to_owned(),
            stdout_path: "/dev/stdout".to_owned(),
            chunk_size: 64 * 1024,
        }
    }
}
