use std::fmt;

/// Directory path inside a share, always absolute and `/`-separated.
/// The share root is `/`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VirtualPath(String);

impl VirtualPath {
    pub fn root() -> Self {
        Self("/".to_owned())
    }

    /// Normalises separators and drops empty, `.` and `..` components.
    pub fn new(path: &str) -> Self {
        let parts: Vec<&str> = path
            .split(['/', '\\'])
            .filter(|part| !part.is_empty() && *part != "." && *part != "..")
            .collect();

        Self(format!("/{}", parts.join("/")))
    }

    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn join(&self, name: &str) -> Self {
        Self::new(&format!("{}/{}", self.0, name))
    }

    /// The containing directory, `None` for the root
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }

        let cut = self.0.rfind('/').unwrap_or(0);
        Some(Self::new(&self.0[..cut]))
    }

    /// Last component, empty for the root
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or("")
    }

    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|part| !part.is_empty())
    }

    /// Path as smbclient expects it, e.g. `\docs\report.doc`
    pub fn to_smb(&self) -> String {
        self.0.replace('/', "\\")
    }
}

impl Default for VirtualPath {
    fn default() -> Self {
        Self::root()
    }
}

impl fmt::Display for VirtualPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A share on a server
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Target {
    pub server: String,
    pub share: String,
}

impl Target {
    pub fn new<S: Into<String>, T: Into<String>>(server: S, share: T) -> Self {
        Self {
            server: server.into(),
            share: share.into(),
        }
    }

    /// Splits a UNC path like `\\server\share\some\dir` into the share and
    /// the path inside it. Forward slashes are accepted too.
    pub fn from_unc(unc: &str) -> Option<(Self, VirtualPath)> {
        let rest = unc
            .strip_prefix("\\\\")
            .or_else(|| unc.strip_prefix("//"))?;

        let mut parts = rest.splitn(3, ['/', '\\']);
        let server = parts.next().filter(|s| !s.is_empty())?;
        let share = parts.next().filter(|s| !s.is_empty())?;
        let path = VirtualPath::new(parts.next().unwrap_or(""));

        Some((Self::new(server, share), path))
    }

    /// Service name passed to smbclient
    pub fn service(&self) -> String {
        format!("//{}/{}", self.server, self.share)
    }

    /// Human-readable location of `path` on this share, without doubled
    /// slashes: `//server/share/dir/file`
    pub fn pretty(&self, path: &VirtualPath) -> String {
        if path.is_root() {
            self.service()
        } else {
            format!("{}{}", self.service(), path)
        }
    }
}
