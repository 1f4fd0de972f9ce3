use thiserror::Error;

/// Failures surfaced by every entity operation.
///
/// Each variant carries the human-readable path of the resource
/// (`//server/share/dir/file`) it happened on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The remote object does not exist
    #[error("Not found: \"{0}\"")]
    NotFound(String),
    /// The credentials were rejected for this resource
    #[error("\"{user}\" not authenticated for \"{resource}\"")]
    Unauthenticated { user: String, resource: String },
    /// The path or file name cannot be expressed on the share
    #[error("Forbidden: invalid pathname or filename")]
    InvalidName(String),
    /// A directory still has children and cannot be removed
    #[error("Directory not empty: \"{0}\"")]
    NotEmpty(String),
    /// The external SMB client reported an error
    #[error("\"{0}\": smbclient error")]
    Transport(String),
    /// The operation is impossible through smbclient
    #[error("{0} not available due to limitations of smbclient")]
    Unsupported(&'static str),
}

impl Error {
    /// Short name of the failure kind, used in log events.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not found",
            Self::Unauthenticated { .. } => "unauthenticated",
            Self::InvalidName(_) => "invalid name",
            Self::NotEmpty(_) => "not empty",
            Self::Transport(_) => "transport error",
            Self::Unsupported(_) => "unsupported",
        }
    }
}

pub type SmbResult<T> = Result<T, Error>;
