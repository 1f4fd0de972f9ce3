//! SMB/CIFS shares as file and directory entities, driven through the
//! `smbclient` command line tool.
//!
//! A [`fs::Share`] bundles one share, one set of credentials and the
//! control session used for metadata commands. Entities reached from it
//! read, write, rename, delete and change attributes of what they stand
//! for; file content is streamed through sessions of its own.

#[macro_use]
extern crate log;
#[macro_use]
extern crate bitflags;
#[macro_use]
extern crate async_trait;

/// Listing cache
pub mod cache;
/// smbclient processes and the commands they run
pub mod client;
pub mod config;
mod error;
/// Attribute flags
pub mod flags;
/// Files and directories
pub mod fs;
pub mod listing;
pub mod path;
pub mod props;
pub mod status;
mod utils;

#[cfg(test)]
mod testing;

pub use error::{Error, SmbResult};
