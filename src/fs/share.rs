use std::sync::Arc;
use tokio::sync::Mutex;

use super::{Directory, Node};
use crate::{
    cache::{CacheKey, ListingCache},
    client::{Command, Credentials, Endpoint, Session, SmbClient},
    config::Config,
    error::{Error, SmbResult},
    flags::FileFlags,
    listing::{self, Entry},
    path::{Target, VirtualPath},
    status::{Status, StatusKind},
};

/// One share as seen by one user for the length of a request.
///
/// Entities reached from it share its control session, which is opened on
/// first use and replaced after a transport failure.
pub struct Share {
    endpoint: Endpoint,
    cache: Arc<ListingCache>,
    session: Mutex<Option<Session>>,
}

impl Share {
    pub fn new(endpoint: Endpoint, cache: Arc<ListingCache>) -> Arc<Self> {
        Arc::new(Self {
            endpoint,
            cache,
            session: Mutex::new(None),
        })
    }

    /// A share reached through the real smbclient
    pub fn connect(
        config: Arc<Config>,
        target: Target,
        credentials: Credentials,
        cache: Arc<ListingCache>,
    ) -> Arc<Self> {
        let connector = Arc::new(SmbClient::new(config.clone()));
        Self::new(Endpoint::new(connector, target, credentials, config), cache)
    }

    pub fn root(self: &Arc<Self>) -> Directory {
        Directory::root(self.clone())
    }

    /// A directory entity for `path` without checking that it exists
    pub fn directory(self: &Arc<Self>, path: VirtualPath) -> Directory {
        Directory::unlisted(self.clone(), path)
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn config(&self) -> &Config {
        self.endpoint.config()
    }

    pub fn cache(&self) -> &Arc<ListingCache> {
        &self.cache
    }

    /// `//server/share/path`, for logs and errors
    pub fn pretty(&self, path: &VirtualPath) -> String {
        self.endpoint.target().pretty(path)
    }

    fn user(&self) -> &str {
        self.endpoint.credentials().username().unwrap_or("anonymous")
    }

    /// Runs `command` on the control session, opening it if needed.
    pub(crate) async fn execute(&self, command: &Command) -> Status<Vec<String>> {
        if !command.is_expressible() {
            return Status::InvalidName;
        }

        let mut guard = self.session.lock().await;

        if guard.is_none() {
            match self.endpoint.open().await.split() {
                Ok(session) => *guard = Some(session),
                Err(failure) => return failure,
            }
        }

        let Some(session) = guard.as_mut() else {
            return Status::TransportError;
        };

        let status = session.execute(command, self.config()).await;

        if status.kind() == StatusKind::TransportError {
            if let Some(mut session) = guard.take() {
                debug!("discarding smbclient session for {}", self.endpoint.target().service());
                session.close().await;
            }
        }

        status
    }

    /// Runs a command about `path` and turns a failure into an [`Error`].
    pub(crate) async fn run(&self, command: Command, path: &VirtualPath) -> SmbResult<Vec<String>> {
        debug!("{} \"{}\"", command.name(), self.pretty(path));

        self.execute(&command)
            .await
            .split::<()>()
            .map_err(|failure| self.fail(command.name(), path, failure.kind()))
    }

    pub(crate) fn cache_key(&self, path: &VirtualPath) -> CacheKey {
        CacheKey::new(
            self.endpoint.credentials().username(),
            self.endpoint.target(),
            path,
        )
    }

    /// Listing of `dir`, from the cache when it is fresh.
    pub(crate) async fn listing(&self, dir: &VirtualPath) -> SmbResult<Arc<[Entry]>> {
        self.fetch_listing(dir)
            .await
            .split::<()>()
            .map_err(|failure| self.fail("ls", dir, failure.kind()))
    }

    /// Like [`listing`](Self::listing), but leaves reporting a failure to
    /// the caller.
    pub(crate) async fn fetch_listing(&self, dir: &VirtualPath) -> Status<Arc<[Entry]>> {
        self.cache.maybe_sweep();

        let key = self.cache_key(dir);
        if let Some(entries) = self.cache.get(&key) {
            trace!("listing cache hit for {}", dir);
            return Status::Ok(entries);
        }

        debug!("ls \"{}\"", self.pretty(dir));
        self.execute(&Command::List(dir.clone()))
            .await
            .map(|lines| self.cache.put(key, listing::parse(&lines)))
    }

    pub(crate) fn invalidate(&self, dir: &VirtualPath) {
        self.cache.invalidate(&self.cache_key(dir));
    }

    /// Builds the error for a failed `op` on `path` and logs it.
    pub(crate) fn fail(&self, op: &str, path: &VirtualPath, kind: StatusKind) -> Error {
        warn!("{} \"{}\": {}", op, self.pretty(path), kind);
        self.error(path, kind)
    }

    /// The error for a failure on `path` that was already logged
    pub(crate) fn error(&self, path: &VirtualPath, kind: StatusKind) -> Error {
        let pretty = self.pretty(path);

        match kind {
            StatusKind::NotFound => Error::NotFound(pretty),
            StatusKind::Unauthenticated => Error::Unauthenticated {
                user: self.user().to_owned(),
                resource: pretty,
            },
            StatusKind::InvalidName => Error::InvalidName(pretty),
            StatusKind::NotEmpty => Error::NotEmpty(pretty),
            StatusKind::TransportError | StatusKind::Ok => Error::Transport(pretty),
        }
    }

    pub(crate) fn unsupported(&self, op: &'static str, path: &VirtualPath) -> Error {
        warn!("{} \"{}\": unsupported", op, self.pretty(path));
        Error::Unsupported(op)
    }

    /// Rejects names that would not stay a single child of `dir`.
    pub(crate) fn check_name(&self, op: &str, dir: &VirtualPath, name: &str) -> SmbResult<()> {
        if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
            return Err(self.fail(op, &dir.join(name), StatusKind::InvalidName));
        }
        Ok(())
    }

    /// Brings the attributes of `path` from `flags` to `target`.
    ///
    /// Stops at the first failing `setmode`. `flags` follows every token
    /// that was applied, and the listing `path` appears in is invalidated
    /// as soon as anything was changed.
    pub(crate) async fn set_attributes(
        &self,
        path: &VirtualPath,
        flags: &mut FileFlags,
        target: &FileFlags,
    ) -> SmbResult<()> {
        let mut result = Ok(());
        let mut applied = false;

        for token in flags.diff(target) {
            debug!("setmode {} \"{}\"", token, self.pretty(path));

            if let Err(failure) = self
                .execute(&Command::SetMode(path.clone(), token))
                .await
                .split::<()>()
            {
                result = Err(self.fail(&format!("setmode {token}"), path, failure.kind()));
                break;
            }
            *flags = flags.apply(&token);
            applied = true;
        }

        if applied {
            if let Some(dir) = path.parent() {
                self.invalidate(&dir);
            }
        }
        result
    }

    /// Looks up the entity at `path` by walking down from the root.
    pub async fn resolve(self: &Arc<Self>, path: &VirtualPath) -> SmbResult<Node> {
        let mut dir = self.root();
        let mut components = path.components().peekable();

        while let Some(name) = components.next() {
            let node = dir.child(name).await?;

            if components.peek().is_none() {
                return Ok(node);
            }

            match node {
                Node::Directory(next) => dir = next,
                Node::File(_) => return Err(self.fail("resolve", path, StatusKind::NotFound)),
            }
        }

        Ok(Node::Directory(dir))
    }

    /// Closes the control session, if one is open
    pub async fn close(&self) {
        if let Some(mut session) = self.session.lock().await.take() {
            session.close().await;
        }
    }
}

#[cfg(test)]
mod test_share {
    use super::*;
    use crate::testing::{FakeSmb, DOCS_LISTING, LS_DOCS};

    #[tokio::test]
    async fn test_session_is_reused() {
        let fake = FakeSmb::new();
        fake.reply(LS_DOCS, DOCS_LISTING);
        let share = fake.share();

        share.directory(VirtualPath::new("/docs")).children().await.unwrap();
        share
            .directory(VirtualPath::new("/docs/archive"))
            .children()
            .await
            .unwrap();

        assert_eq!(fake.connects(), 1);
        assert_eq!(fake.commands().len(), 2);
    }

    #[tokio::test]
    async fn test_transport_error_discards_session() {
        let fake = FakeSmb::new();
        fake.reply(LS_DOCS, DOCS_LISTING);
        fake.reply(r#"ls "\broken\*""#, &["NT_STATUS_IO_TIMEOUT listing \\broken\\*"]);
        let share = fake.share();

        let err = share
            .directory(VirtualPath::new("/broken"))
            .children()
            .await
            .unwrap_err();
        assert_eq!(err, Error::Transport("//fs01/projects/broken".to_owned()));
        assert_eq!(fake.closed(), [1]);

        share.directory(VirtualPath::new("/docs")).children().await.unwrap();
        assert_eq!(fake.connects(), 2);
    }

    #[tokio::test]
    async fn test_refused_login() {
        let fake = FakeSmb::new();
        fake.refuse_login(&["session setup failed: NT_STATUS_LOGON_FAILURE"]);

        let err = fake
            .share()
            .directory(VirtualPath::new("/docs"))
            .children()
            .await
            .unwrap_err();

        assert_eq!(
            err,
            Error::Unauthenticated {
                user: "alice".to_owned(),
                resource: "//fs01/projects/docs".to_owned(),
            }
        );
        assert_eq!(err.to_string(), "\"alice\" not authenticated for \"//fs01/projects/docs\"");
    }

    #[tokio::test]
    async fn test_unreachable_server() {
        let fake = FakeSmb::new();
        fake.refuse_login(&["Connection to fs01 failed (Error NT_STATUS_HOST_UNREACHABLE)"]);

        let err = fake.share().root().children().await.unwrap_err();
        assert_eq!(err, Error::Transport("//fs01/projects".to_owned()));
    }

    #[tokio::test]
    async fn test_resolve() -> anyhow::Result<()> {
        let fake = FakeSmb::new();
        fake.reply(
            r#"ls "\*""#,
            &["  docs                                D        0  Sun Sep  9 01:46:39 2001"],
        );
        fake.reply(LS_DOCS, DOCS_LISTING);
        let share = fake.share();

        assert!(share.resolve(&VirtualPath::root()).await?.is_dir());
        assert!(share.resolve(&VirtualPath::new("/docs/archive")).await?.is_dir());

        let node = share.resolve(&VirtualPath::new("/docs/report.doc")).await?;
        assert_eq!(node.name(), "report.doc");
        assert_eq!(node.metadata().len(), 2048);

        let err = share
            .resolve(&VirtualPath::new("/docs/report.doc/inner"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        Ok(())
    }

    #[tokio::test]
    async fn test_close() {
        let fake = FakeSmb::new();
        let share = fake.share();
        share.root().children().await.unwrap();

        share.close().await;
        share.close().await;
        assert_eq!(fake.closed(), [1]);
    }

    #[tokio::test]
    async fn test_users_get_separate_listings() {
        let fake = FakeSmb::new();
        fake.reply(LS_DOCS, DOCS_LISTING);
        let share = fake.share();
        share.directory(VirtualPath::new("/docs")).children().await.unwrap();

        let anonymous = Endpoint::new(
            Arc::new(fake.clone()),
            Target::new("fs01", "projects"),
            Credentials::Anonymous,
            Arc::new(Config::default()),
        );
        let other = Share::new(anonymous, share.cache().clone());
        other.directory(VirtualPath::new("/docs")).children().await.unwrap();

        assert_eq!(fake.count(LS_DOCS), 2);
    }
}
