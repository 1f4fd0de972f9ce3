//! Classification of smbclient output.
//!
//! smbclient has no structured replies: success is the absence of an error
//! line, failures are `NT_STATUS_*` markers somewhere in its output.

use std::fmt;

/// Outcome of one smbclient invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status<T = ()> {
    Ok(T),
    NotFound,
    Unauthenticated,
    InvalidName,
    NotEmpty,
    TransportError,
}

/// Payload-free view of a [`Status`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusKind {
    Ok,
    NotFound,
    Unauthenticated,
    InvalidName,
    NotEmpty,
    TransportError,
}

impl fmt::Display for StatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ok => "ok",
            Self::NotFound => "not found",
            Self::Unauthenticated => "unauthenticated",
            Self::InvalidName => "invalid name",
            Self::NotEmpty => "not empty",
            Self::TransportError => "transport error",
        })
    }
}

/// How the command (or the process running it) came to an end
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The end-of-response marker was seen, or the process exited cleanly
    Completed,
    /// Non-zero exit, output closed before the marker, or a broken pipe
    Abnormal,
}

impl<T> Status<T> {
    pub fn kind(&self) -> StatusKind {
        match self {
            Self::Ok(_) => StatusKind::Ok,
            Self::NotFound => StatusKind::NotFound,
            Self::Unauthenticated => StatusKind::Unauthenticated,
            Self::InvalidName => StatusKind::InvalidName,
            Self::NotEmpty => StatusKind::NotEmpty,
            Self::TransportError => StatusKind::TransportError,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }

    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Status<U> {
        match self {
            Self::Ok(value) => Status::Ok(f(value)),
            Self::NotFound => Status::NotFound,
            Self::Unauthenticated => Status::Unauthenticated,
            Self::InvalidName => Status::InvalidName,
            Self::NotEmpty => Status::NotEmpty,
            Self::TransportError => Status::TransportError,
        }
    }

    /// Replaces the payload of a successful status
    pub fn with<U>(self, value: U) -> Status<U> {
        self.map(|_| value)
    }

    /// Separates the payload from a failure, which keeps its kind under
    /// any payload type
    pub fn split<U>(self) -> Result<T, Status<U>> {
        match self {
            Self::Ok(value) => Ok(value),
            Self::NotFound => Err(Status::NotFound),
            Self::Unauthenticated => Err(Status::Unauthenticated),
            Self::InvalidName => Err(Status::InvalidName),
            Self::NotEmpty => Err(Status::NotEmpty),
            Self::TransportError => Err(Status::TransportError),
        }
    }

    /// Folds every kind the caller cannot meaningfully receive into
    /// [`Status::TransportError`].
    pub fn restrict<F: Fn(StatusKind) -> bool>(self, reachable: F) -> Self {
        if reachable(self.kind()) {
            self
        } else {
            Self::TransportError
        }
    }
}

const UNAUTHENTICATED: &[&str] = &[
    "NT_STATUS_LOGON_FAILURE",
    "NT_STATUS_ACCESS_DENIED",
    "NT_STATUS_WRONG_PASSWORD",
    "NT_STATUS_ACCOUNT_DISABLED",
    "NT_STATUS_ACCOUNT_LOCKED_OUT",
    "NT_STATUS_PASSWORD_EXPIRED",
    "NT_STATUS_PASSWORD_MUST_CHANGE",
];

const NOT_FOUND: &[&str] = &[
    "NT_STATUS_OBJECT_NAME_NOT_FOUND",
    "NT_STATUS_OBJECT_PATH_NOT_FOUND",
    "NT_STATUS_NO_SUCH_FILE",
    "NT_STATUS_NOT_FOUND",
    "NT_STATUS_BAD_NETWORK_NAME",
];

const INVALID_NAME: &[&str] = &[
    "NT_STATUS_OBJECT_NAME_INVALID",
    "NT_STATUS_OBJECT_PATH_INVALID",
    "NT_STATUS_OBJECT_PATH_SYNTAX_BAD",
    "NT_STATUS_OBJECT_NAME_COLLISION",
];

const NOT_EMPTY: &[&str] = &["NT_STATUS_DIRECTORY_NOT_EMPTY"];

const TRANSPORT: &[&str] = &["session setup failed", "tree connect failed"];

fn contains_marker(line: &str, markers: &[&str]) -> bool {
    markers.iter().any(|marker| line.contains(marker))
}

/// Classifies a single output line, `None` when it carries no marker.
pub fn classify_line(line: &str) -> Option<StatusKind> {
    // Order matters: the specific NT_STATUS codes before the catch-all.
    if contains_marker(line, UNAUTHENTICATED) {
        Some(StatusKind::Unauthenticated)
    } else if contains_marker(line, NOT_FOUND) {
        Some(StatusKind::NotFound)
    } else if contains_marker(line, INVALID_NAME) {
        Some(StatusKind::InvalidName)
    } else if contains_marker(line, NOT_EMPTY) {
        Some(StatusKind::NotEmpty)
    } else if contains_marker(line, TRANSPORT)
        || is_connection_failure(line)
        || has_unknown_nt_status(line)
    {
        Some(StatusKind::TransportError)
    } else {
        None
    }
}

fn is_connection_failure(line: &str) -> bool {
    line.starts_with("Connection to ") && line.contains(" failed")
}

fn has_unknown_nt_status(line: &str) -> bool {
    line.match_indices("NT_STATUS_")
        .any(|(at, _)| !line[at..].starts_with("NT_STATUS_OK"))
}

/// Classifies the complete output of one command.
///
/// The first line with a recognised marker decides. Without any marker the
/// outcome depends on how the command ended.
pub fn classify<S: AsRef<str>>(lines: &[S], termination: Termination) -> Status {
    let marker = lines
        .iter()
        .find_map(|line| classify_line(line.as_ref()));

    match (marker, termination) {
        (Some(StatusKind::Ok), _) | (None, Termination::Completed) => Status::Ok(()),
        (Some(StatusKind::NotFound), _) => Status::NotFound,
        (Some(StatusKind::Unauthenticated), _) => Status::Unauthenticated,
        (Some(StatusKind::InvalidName), _) => Status::InvalidName,
        (Some(StatusKind::NotEmpty), _) => Status::NotEmpty,
        (Some(StatusKind::TransportError), _) | (None, Termination::Abnormal) => {
            Status::TransportError
        }
    }
}
