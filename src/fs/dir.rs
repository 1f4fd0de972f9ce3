use std::sync::Arc;
use tokio::io::AsyncRead;

use super::{File, Metadata, Node, Share};
use crate::{
    client::Command,
    error::SmbResult,
    flags::FileFlags,
    path::{Target, VirtualPath},
    props,
    status::{Status, StatusKind},
    utils,
};

/// A remote directory
pub struct Directory {
    share: Arc<Share>,
    path: VirtualPath,
    metadata: Metadata,
    flags_stale: bool,
    userhome: Option<(Target, VirtualPath)>,
}

fn directory_metadata() -> Metadata {
    Metadata {
        size: 0,
        mtime: utils::unix_now(),
        flags: FileFlags::from_smb_str("D"),
    }
}

impl Directory {
    pub(crate) fn new(share: Arc<Share>, path: VirtualPath, metadata: Metadata) -> Self {
        Self {
            share,
            path,
            metadata,
            flags_stale: false,
            userhome: None,
        }
    }

    pub(crate) fn root(share: Arc<Share>) -> Self {
        Self::unlisted(share, VirtualPath::root())
    }

    /// A directory that was not reached through a listing
    pub(crate) fn unlisted(share: Arc<Share>, path: VirtualPath) -> Self {
        Self::new(share, path, directory_metadata())
    }

    /// Directory name, empty for the share root
    pub fn name(&self) -> &str {
        self.path.file_name()
    }

    pub fn path(&self) -> &VirtualPath {
        &self.path
    }

    pub fn is_root(&self) -> bool {
        self.path.is_root()
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn flags_stale(&self) -> bool {
        self.flags_stale
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

    /// Entries of the directory in server order, served from the listing
    /// cache while it is fresh.
    pub async fn children(&self) -> SmbResult<Vec<(String, Node)>> {
        let entries = self.share.listing(&self.path).await?;

        Ok(entries
            .iter()
            .map(|entry| {
                (
                    entry.name.clone(),
                    Node::from_entry(&self.share, &self.path, entry),
                )
            })
            .collect())
    }

    /// The child called `name`. An exact match wins over one that only
    /// differs in case.
    pub async fn child(&self, name: &str) -> SmbResult<Node> {
        let mut children = self.children().await?;

        let found = children
            .iter()
            .position(|(child, _)| child == name)
            .or_else(|| {
                children
                    .iter()
                    .position(|(child, _)| child.eq_ignore_ascii_case(name))
            });

        match found {
            Some(at) => Ok(children.swap_remove(at).1),
            None => Err(self
                .share
                .fail("lookup", &self.path.join(name), StatusKind::NotFound)),
        }
    }

    /// Uploads a new file called `name`.
    pub async fn create_file<R>(&self, name: &str, reader: R) -> SmbResult<File>
    where
        R: AsyncRead + Unpin + Send,
    {
        self.share.check_name("put", &self.path, name)?;

        let path = self.path.join(name);
        debug!("put \"{}\"", self.share.pretty(&path));

        let upload = self
            .share
            .endpoint()
            .put(&path, reader)
            .await
            .split::<()>()
            .map_err(|failure| self.share.fail("put", &path, failure.kind()))?;

        self.share.invalidate(&self.path);

        let listed = match self.share.fetch_listing(&self.path).await {
            Status::Ok(entries) => entries
                .iter()
                .find(|entry| entry.name == name && !entry.is_dir())
                .map(Metadata::from_entry),
            failure => {
                debug!(
                    "listing after upload to \"{}\" failed: {}",
                    self.share.pretty(&path),
                    failure.kind()
                );
                None
            }
        };

        let metadata = listed.unwrap_or_else(|| Metadata {
            size: upload.size,
            mtime: utils::unix_now(),
            flags: FileFlags::from_smb_str("A"),
        });

        Ok(File::new(
            self.share.clone(),
            self.path.clone(),
            name.to_owned(),
            metadata,
        ))
    }

    pub async fn create_directory(&self, name: &str) -> SmbResult<Directory> {
        self.share.check_name("mkdir", &self.path, name)?;

        let path = self.path.join(name);
        self.share.run(Command::MkDir(path.clone()), &path).await?;

        self.share.invalidate(&self.path);
        Ok(Self::unlisted(self.share.clone(), path))
    }

    /// Removes the directory, which must be empty.
    pub async fn delete(&mut self) -> SmbResult<()> {
        let Some(parent) = self.path.parent() else {
            return Err(self.share.unsupported("deleting the share root", &self.path));
        };

        self.share
            .run(Command::RmDir(self.path.clone()), &self.path)
            .await?;

        self.share.invalidate(&parent);
        self.share.invalidate(&self.path);
        Ok(())
    }

    pub async fn rename(&mut self, new_name: &str) -> SmbResult<()> {
        let Some(parent) = self.path.parent() else {
            return Err(self.share.unsupported("renaming the share root", &self.path));
        };

        self.share.check_name("rename", &parent, new_name)?;

        let to = parent.join(new_name);
        self.share
            .run(Command::Rename(self.path.clone(), to.clone()), &self.path)
            .await?;

        self.share.invalidate(&parent);
        self.share.invalidate(&self.path);
        self.path = to;
        Ok(())
    }

    /// Applies WebDAV property updates that map onto file attributes.
    pub async fn set_attributes(&mut self, mutations: &[(&str, &str)]) -> SmbResult<()> {
        let target = props::apply(&self.metadata.flags, mutations);
        let before = self.metadata.flags.clone();

        let result = self
            .share
            .set_attributes(&self.path, &mut self.metadata.flags, &target)
            .await;

        if self.metadata.flags != before {
            self.flags_stale = true;
        }
        result
    }

    /// Sets the home directory override from a UNC path such as
    /// `\\server\homes\alice`. Only the share root carries one; returns
    /// whether it was taken.
    pub fn set_userhome(&mut self, unc: &str) -> bool {
        if !self.is_root() {
            debug!("ignoring home directory on {}", self.share.pretty(&self.path));
            return false;
        }

        match Target::from_unc(unc) {
            Some(home) => {
                self.userhome = Some(home);
                true
            }
            None => {
                debug!("ignoring malformed home directory {:?}", unc);
                false
            }
        }
    }

    pub fn userhome(&self) -> Option<(&Target, &VirtualPath)> {
        self.userhome.as_ref().map(|(target, path)| (target, path))
    }
}

impl std::fmt::Debug for Directory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Directory")
            .field("path", &self.path)
            .field("metadata", &self.metadata)
            .field("flags_stale", &self.flags_stale)
            .finish_non_exhaustive()
    }
}
