use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::{io, sync::Arc};
use tokio::io::{AsyncRead, AsyncReadExt};

use super::{Metadata, Share};
use crate::{
    client::{Command, ReadStream, SessionHandle},
    error::SmbResult,
    path::VirtualPath,
    props,
    status::StatusKind,
    utils,
};

/// A remote file.
///
/// Metadata is the listing row the entity was built from and is not
/// refreshed; after [`set_attributes`](File::set_attributes) the flags
/// reflect what was requested and [`flags_stale`](File::flags_stale) is set.
pub struct File {
    share: Arc<Share>,
    dir: VirtualPath,
    name: String,
    metadata: Metadata,
    flags_stale: bool,
    in_flight: Option<SessionHandle>,
}

impl File {
    pub(crate) fn new(share: Arc<Share>, dir: VirtualPath, name: String, metadata: Metadata) -> Self {
        Self {
            share,
            dir,
            name,
            metadata,
            flags_stale: false,
            in_flight: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> VirtualPath {
        self.dir.join(&self.name)
    }

    /// Directory holding this file
    pub fn parent(&self) -> &VirtualPath {
        &self.dir
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn flags_stale(&self) -> bool {
        self.flags_stale
    }

    pub fn len(&self) -> u64 {
        self.metadata.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metadata.is_empty()
    }

    pub fn modified(&self) -> Option<DateTime<Utc>> {
        self.metadata.modified()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.metadata.content_type()
    }

    pub fn is_hidden(&self) -> bool {
        self.metadata.is_hidden()
    }

    pub fn is_readonly(&self) -> bool {
        self.metadata.is_readonly()
    }

    pub fn win32_attributes(&self) -> String {
        self.metadata.win32_attributes()
    }

    async fn close_in_flight(&mut self) {
        if let Some(session) = self.in_flight.take() {
            session.lock().await.close().await;
        }
    }

    /// Streams the content of the file.
    ///
    /// A read still running from an earlier call is cancelled first.
    pub async fn read(&mut self) -> SmbResult<ReadStream> {
        self.close_in_flight().await;

        let path = self.path();
        debug!("get \"{}\"", self.share.pretty(&path));

        let stream = self
            .share
            .endpoint()
            .get(&path)
            .await
            .split::<()>()
            .map_err(|failure| self.share.fail("get", &path, failure.kind()))?;

        self.in_flight = Some(stream.handle());
        Ok(stream)
    }

    /// Replaces the content of the file with everything `reader` yields.
    ///
    /// Returns the new etag unless the upload was too large to get one.
    pub async fn write<R>(&mut self, reader: R) -> SmbResult<Option<String>>
    where
        R: AsyncRead + Unpin + Send,
    {
        let path = self.path();
        debug!("put \"{}\"", self.share.pretty(&path));

        let upload = self
            .share
            .endpoint()
            .put(&path, reader)
            .await
            .split::<()>()
            .map_err(|failure| self.share.fail("put", &path, failure.kind()))?;

        self.share.invalidate(&self.dir);

        if upload.size > self.share.config().etag_size_limit {
            Ok(None)
        } else {
            Ok(Some(upload.digest))
        }
    }

    /// Quoted SHA-256 of the content, `None` for files over the etag limit.
    pub async fn etag(&self) -> SmbResult<Option<String>> {
        if self.metadata.size > self.share.config().etag_size_limit {
            return Ok(None);
        }

        let path = self.path();
        debug!("etag \"{}\"", self.share.pretty(&path));

        let mut stream = self
            .share
            .endpoint()
            .get(&path)
            .await
            .split::<()>()
            .map_err(|failure| self.share.fail("get", &path, failure.kind()))?;

        let mut hasher = Sha256::new();
        let mut buf = vec![0; self.share.config().chunk_size.max(1)];

        let result = loop {
            match stream.read(&mut buf).await {
                Ok(0) => break Ok(()),
                Ok(len) => hasher.update(&buf[..len]),
                Err(err) => break Err(err),
            }
        };

        stream.close().await;

        match result {
            Ok(()) => Ok(Some(utils::quoted_digest(&hasher.finalize()))),
            Err(err) if err.kind() == io::ErrorKind::ConnectionAborted => {
                debug!("reading \"{}\": {}", self.share.pretty(&path), err);
                Err(self.share.fail("get", &path, StatusKind::TransportError))
            }
            // the stream logged the failure
            Err(_) => Err(self.share.error(&path, StatusKind::TransportError)),
        }
    }

    /// Renames the file within its directory. The name only changes when
    /// the server accepted it.
    pub async fn rename(&mut self, new_name: &str) -> SmbResult<()> {
        self.share.check_name("rename", &self.dir, new_name)?;

        let from = self.path();
        let to = self.dir.join(new_name);
        self.share.run(Command::Rename(from.clone(), to), &from).await?;

        self.share.invalidate(&self.dir);
        self.name = new_name.to_owned();
        Ok(())
    }

    /// Applies WebDAV property updates that map onto file attributes.
    pub async fn set_attributes(&mut self, mutations: &[(&str, &str)]) -> SmbResult<()> {
        let target = props::apply(&self.metadata.flags, mutations);
        let before = self.metadata.flags.clone();

        let result = self
            .share
            .set_attributes(&self.path(), &mut self.metadata.flags, &target)
            .await;

        if self.metadata.flags != before {
            self.flags_stale = true;
        }
        result
    }

    pub async fn delete(&mut self) -> SmbResult<()> {
        self.close_in_flight().await;

        let path = self.path();
        self.share.run(Command::Remove(path.clone()), &path).await?;

        self.share.invalidate(&self.dir);
        Ok(())
    }

    /// smbclient can only replace whole files
    pub async fn write_range<R>(&mut self, _offset: u64, _reader: R) -> SmbResult<()>
    where
        R: AsyncRead + Unpin + Send,
    {
        Err(self.share.unsupported("partial write", &self.path()))
    }

    /// Cancels a running read, if any. Dropping the entity leaves the
    /// stream alone.
    pub async fn close(&mut self) {
        self.close_in_flight().await;
    }
}

impl std::fmt::Debug for File {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("File")
            .field("path", &self.path())
            .field("metadata", &self.metadata)
            .field("flags_stale", &self.flags_stale)
            .field("reading", &self.in_flight.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod test_file {
    use super::*;
    use crate::{
        error::Error,
        testing::{report, row, Event, FakeSmb, DOCS_LISTING, LS_DOCS},
    };
    use tokio::io::AsyncReadExt;

    const GET_REPORT: &str = r#"get "\docs\report.doc" /dev/stdout"#;
    const HELLO_ETAG: &str = "\"2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824\"";

    fn docs() -> VirtualPath {
        VirtualPath::new("/docs")
    }

    #[tokio::test]
    async fn test_metadata_from_listing() {
        let fake = FakeSmb::new();
        fake.reply(LS_DOCS, DOCS_LISTING);

        let file = report(&fake.share()).await;
        assert_eq!(file.name(), "report.doc");
        assert_eq!(file.len(), 2048);
        assert!(!file.is_hidden());
        assert!(!file.is_readonly());
        assert_eq!(file.win32_attributes(), "00000020");
        assert_eq!(file.content_type(), None);
        assert_eq!(file.modified().map(|t| t.timestamp()), Some(1_000_000_000));
        assert!(!file.flags_stale());
    }

    #[tokio::test]
    async fn test_write_invalidates_parent_only() {
        let fake = FakeSmb::new();
        fake.reply(LS_DOCS, DOCS_LISTING);
        let share = fake.share();

        let mut file = report(&share).await;
        let archive = share.directory(VirtualPath::new("/docs/archive"));
        archive.children().await.unwrap();

        let etag = file.write(&b"hello"[..]).await.unwrap();
        assert_eq!(etag.as_deref(), Some(HELLO_ETAG));
        assert_eq!(fake.uploads(), [b"hello".to_vec()]);

        assert!(share.cache().get(&share.cache_key(&docs())).is_none());
        assert!(share
            .cache()
            .get(&share.cache_key(&VirtualPath::new("/docs/archive")))
            .is_some());

        share.directory(docs()).children().await.unwrap();
        assert_eq!(fake.count(LS_DOCS), 2);
    }

    #[tokio::test]
    async fn test_write_over_etag_limit_has_no_etag() {
        let fake = FakeSmb::new();
        fake.reply(LS_DOCS, DOCS_LISTING);
        let share = fake.share();
        let mut file = report(&share).await;

        let content = vec![b'x'; 20_000_001];
        assert_eq!(file.write(&content[..]).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_etag_hashes_content() {
        let fake = FakeSmb::new();
        fake.reply(LS_DOCS, DOCS_LISTING);
        fake.reply_data(GET_REPORT, b"hello", &[]);

        let file = report(&fake.share()).await;
        assert_eq!(file.etag().await.unwrap().as_deref(), Some(HELLO_ETAG));
        assert_eq!(fake.closed(), [2]);
    }

    #[tokio::test]
    async fn test_etag_over_limit_spawns_nothing() {
        let fake = FakeSmb::new();
        let listing = row("report.doc", "A", 30_000_000);
        fake.reply(LS_DOCS, &[listing.as_str()]);

        let file = report(&fake.share()).await;
        assert_eq!(file.etag().await.unwrap(), None);
        assert_eq!(fake.connects(), 1);
        assert_eq!(fake.count(GET_REPORT), 0);
    }

    #[tokio::test]
    async fn test_read_streams_content() {
        let fake = FakeSmb::new();
        fake.reply(LS_DOCS, DOCS_LISTING);
        fake.reply_data(GET_REPORT, b"quarterly figures", &[]);

        let mut file = report(&fake.share()).await;
        let mut stream = file.read().await.unwrap();

        let mut content = String::new();
        stream.read_to_string(&mut content).await.unwrap();
        assert_eq!(content, "quarterly figures");
        assert_eq!(fake.closed(), [2]);
    }

    #[tokio::test]
    async fn test_second_read_cancels_first() {
        let fake = FakeSmb::new();
        fake.reply(LS_DOCS, DOCS_LISTING);
        fake.reply_data(GET_REPORT, b"hello", &[]);

        let mut file = report(&fake.share()).await;
        let mut first = file.read().await.unwrap();
        let mut second = file.read().await.unwrap();

        let events = fake.events();
        let closed = events.iter().position(|e| *e == Event::Closed(2)).unwrap();
        let reconnect = events
            .iter()
            .position(|e| matches!(e, Event::Connect { id: 3, .. }))
            .unwrap();
        assert!(closed < reconnect);

        let mut content = Vec::new();
        assert!(first.read_to_end(&mut content).await.is_err());

        second.read_to_end(&mut content).await.unwrap();
        assert_eq!(content, b"hello");
    }

    #[tokio::test]
    async fn test_read_missing_file() {
        let fake = FakeSmb::new();
        fake.reply(LS_DOCS, DOCS_LISTING);
        fake.fail(
            GET_REPORT,
            &["NT_STATUS_OBJECT_NAME_NOT_FOUND opening remote file \\docs\\report.doc"],
        );

        let mut file = report(&fake.share()).await;
        let err = file.read().await.err().unwrap();
        assert_eq!(err, Error::NotFound("//fs01/projects/docs/report.doc".to_owned()));
        assert_eq!(fake.closed(), [2]);
    }

    #[tokio::test]
    async fn test_set_attributes_hides() {
        let fake = FakeSmb::new();
        fake.reply(LS_DOCS, DOCS_LISTING);
        let share = fake.share();
        let mut file = report(&share).await;

        file.set_attributes(&[("{DAV:}ishidden", "1")]).await.unwrap();

        assert_eq!(fake.commands(), [LS_DOCS, r#"setmode "\docs\report.doc" +h"#]);
        assert!(file.is_hidden());
        assert!(file.flags_stale());
        assert!(share.cache().get(&share.cache_key(&docs())).is_none());
    }

    #[tokio::test]
    async fn test_set_attributes_without_change_runs_nothing() {
        let fake = FakeSmb::new();
        fake.reply(LS_DOCS, DOCS_LISTING);
        let share = fake.share();
        let mut file = report(&share).await;

        file.set_attributes(&[("{DAV:}ishidden", "0")]).await.unwrap();

        assert_eq!(fake.commands(), [LS_DOCS]);
        assert!(!file.flags_stale());
        assert!(share.cache().get(&share.cache_key(&docs())).is_some());
    }

    #[tokio::test]
    async fn test_set_attributes_stops_at_first_failure() {
        let fake = FakeSmb::new();
        let listing = row("report.doc", "AR", 2048);
        fake.reply(LS_DOCS, &[listing.as_str()]);
        fake.reply(
            r#"setmode "\docs\report.doc" -r"#,
            &["NT_STATUS_ACCESS_DENIED setmode \\docs\\report.doc"],
        );
        let share = fake.share();
        let mut file = report(&share).await;

        let err = file
            .set_attributes(&[("{DAV:}ishidden", "yes"), ("{DAV:}isreadonly", "no")])
            .await
            .unwrap_err();

        assert_eq!(
            err,
            Error::Unauthenticated {
                user: "alice".to_owned(),
                resource: "//fs01/projects/docs/report.doc".to_owned(),
            }
        );
        assert_eq!(
            fake.commands(),
            [
                LS_DOCS,
                r#"setmode "\docs\report.doc" +h"#,
                r#"setmode "\docs\report.doc" -r"#
            ]
        );
        assert!(file.flags_stale());
        assert!(file.is_hidden());
        assert!(file.is_readonly());
        assert!(share.cache().get(&share.cache_key(&docs())).is_none());
    }

    #[tokio::test]
    async fn test_set_attributes_refused_outright() {
        let fake = FakeSmb::new();
        fake.reply(LS_DOCS, DOCS_LISTING);
        fake.reply(
            r#"setmode "\docs\report.doc" +h"#,
            &["NT_STATUS_ACCESS_DENIED setmode \\docs\\report.doc"],
        );
        let share = fake.share();
        let mut file = report(&share).await;

        assert!(file.set_attributes(&[("{DAV:}ishidden", "1")]).await.is_err());

        assert!(!file.is_hidden());
        assert!(!file.flags_stale());
        assert!(share.cache().get(&share.cache_key(&docs())).is_some());
    }

    #[tokio::test]
    async fn test_rename() {
        let fake = FakeSmb::new();
        fake.reply(LS_DOCS, DOCS_LISTING);
        let share = fake.share();
        let mut file = report(&share).await;

        file.rename("final.doc").await.unwrap();

        assert_eq!(file.name(), "final.doc");
        assert_eq!(fake.count(r#"rename "\docs\report.doc" "\docs\final.doc""#), 1);
        assert!(share.cache().get(&share.cache_key(&docs())).is_none());
    }

    #[tokio::test]
    async fn test_failed_rename_keeps_name() {
        let fake = FakeSmb::new();
        fake.reply(LS_DOCS, DOCS_LISTING);
        fake.reply(
            r#"rename "\docs\report.doc" "\docs\final.doc""#,
            &["NT_STATUS_OBJECT_NAME_NOT_FOUND renaming files \\docs\\report.doc -> \\docs\\final.doc"],
        );
        let mut file = report(&fake.share()).await;

        let err = file.rename("final.doc").await.unwrap_err();
        assert_eq!(err, Error::NotFound("//fs01/projects/docs/report.doc".to_owned()));
        assert_eq!(file.name(), "report.doc");
    }

    #[tokio::test]
    async fn test_rename_rejects_paths() {
        let fake = FakeSmb::new();
        fake.reply(LS_DOCS, DOCS_LISTING);
        let mut file = report(&fake.share()).await;

        let err = file.rename("../escape.doc").await.unwrap_err();
        assert!(matches!(err, Error::InvalidName(_)));
        assert_eq!(fake.commands(), [LS_DOCS]);
    }

    #[tokio::test]
    async fn test_delete() {
        let fake = FakeSmb::new();
        fake.reply(LS_DOCS, DOCS_LISTING);
        let share = fake.share();
        let mut file = report(&share).await;

        file.delete().await.unwrap();

        assert_eq!(fake.count(r#"rm "\docs\report.doc""#), 1);
        assert!(share.cache().get(&share.cache_key(&docs())).is_none());
    }

    #[tokio::test]
    async fn test_partial_write_is_unsupported() {
        let fake = FakeSmb::new();
        fake.reply(LS_DOCS, DOCS_LISTING);
        let mut file = report(&fake.share()).await;

        let err = file.write_range(10, &b"patch"[..]).await.unwrap_err();
        assert_eq!(err, Error::Unsupported("partial write"));
        assert_eq!(
            err.to_string(),
            "partial write not available due to limitations of smbclient"
        );
    }
}
