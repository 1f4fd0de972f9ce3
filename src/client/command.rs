use std::fmt;

use crate::{config::Config, flags::ModeToken, path::VirtualPath, status::StatusKind};

/// One smbclient command. Paths are absolute within the share.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// List a directory
    List(VirtualPath),
    /// Download a file to the data channel
    Get(VirtualPath),
    /// Upload a file from the data channel
    Put(VirtualPath),
    Remove(VirtualPath),
    Rename(VirtualPath, VirtualPath),
    SetMode(VirtualPath, ModeToken),
    MkDir(VirtualPath),
    RmDir(VirtualPath),
}

fn quoted(path: &VirtualPath) -> String {
    format!("\"{}\"", path.to_smb())
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Self::List(_) => "ls",
            Self::Get(_) => "get",
            Self::Put(_) => "put",
            Self::Remove(_) => "rm",
            Self::Rename(..) => "rename",
            Self::SetMode(..) => "setmode",
            Self::MkDir(_) => "mkdir",
            Self::RmDir(_) => "rmdir",
        }
    }

    /// Commands that move file content over the data channel and need a
    /// session of their own
    pub fn is_transfer(&self) -> bool {
        matches!(self, Self::Get(_) | Self::Put(_))
    }

    fn paths(&self) -> Vec<&VirtualPath> {
        match self {
            Self::List(path)
            | Self::Get(path)
            | Self::Put(path)
            | Self::Remove(path)
            | Self::SetMode(path, _)
            | Self::MkDir(path)
            | Self::RmDir(path) => vec![path],
            Self::Rename(from, to) => vec![from, to],
        }
    }

    /// Whether every path survives smbclient's quoting.
    ///
    /// Double quotes cannot be escaped, wildcards would turn `rm` into a
    /// mask, and the `-c` argument of transfers is split on `;`.
    pub fn is_expressible(&self) -> bool {
        let transfer = self.is_transfer();
        self.paths().iter().all(|path| {
            !path.as_str().chars().any(|c| {
                matches!(c, '"' | '*' | '?') || c.is_control() || (transfer && c == ';')
            })
        })
    }

    /// Whether smbclient can meaningfully answer this command with `kind`
    pub fn reachable(&self, kind: StatusKind) -> bool {
        match kind {
            StatusKind::NotEmpty => matches!(self, Self::RmDir(_)),
            StatusKind::Ok
            | StatusKind::NotFound
            | StatusKind::Unauthenticated
            | StatusKind::InvalidName
            | StatusKind::TransportError => true,
        }
    }

    /// The command line as smbclient reads it
    pub fn render(&self, config: &Config) -> String {
        match self {
            Self::List(dir) => {
                let mut mask = dir.to_smb();
                if !mask.ends_with('\\') {
                    mask.push('\\');
                }
                format!("ls \"{mask}*\"")
            }
            Self::Get(path) => format!("get {} {}", quoted(path), config.stdout_path),
            Self::Put(path) => format!("put {} {}", config.stdin_path, quoted(path)),
            Self::Remove(path) => format!("rm {}", quoted(path)),
            Self::Rename(from, to) => format!("rename {} {}", quoted(from), quoted(to)),
            Self::SetMode(path, token) => format!("setmode {} {}", quoted(path), token),
            Self::MkDir(path) => format!("mkdir {}", quoted(path)),
            Self::RmDir(path) => format!("rmdir {}", quoted(path)),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(&Config::default()))
    }
}
