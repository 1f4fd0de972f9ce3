pub mod command;
mod session;
mod stream;

pub use command::Command;
pub use session::{Process, Session};
pub use stream::{ReadStream, SessionHandle};

pub(crate) use session::Reader;

use sha2::{Digest, Sha256};
use std::{fmt, io, process::Stdio, sync::Arc};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader},
    process::Command as ProcessCommand,
    sync::mpsc,
};

use crate::{config::Config, path::Target, path::VirtualPath, status::Status, utils};

/// How a spawned client is driven
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    /// Commands on stdin, replies on stdout and stderr
    Interactive,
    /// A single `get` or `put`; file content flows over stdout or stdin
    Transfer(Command),
}

/// Who the client logs in as
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    Anonymous,
    User { user: String, password: String },
}

impl Credentials {
    /// Builds user credentials. A `DOMAIN\user` login keeps only the user.
    pub fn user<U: AsRef<str>, P: Into<String>>(user: U, password: P) -> Self {
        let user = user.as_ref();
        let user = user.rsplit_once('\\').map_or(user, |(_, name)| name);

        Self::User {
            user: user.to_owned(),
            password: password.into(),
        }
    }

    pub fn username(&self) -> Option<&str> {
        match self {
            Self::Anonymous => None,
            Self::User { user, .. } => Some(user),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Anonymous => f.write_str("Anonymous"),
            Self::User { user, .. } => f
                .debug_struct("User")
                .field("user", user)
                .field("password", &"<hidden>")
                .finish(),
        }
    }
}

/// Spawns client processes
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        target: &Target,
        credentials: &Credentials,
        mode: Mode,
    ) -> io::Result<Session>;
}

/// Forwards every line of `stream` to `tx` until the stream ends.
pub(crate) fn pump<R>(stream: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();

        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim_end_matches(['\r', '\n']);
                    trace!("smbclient > {}", line);

                    if tx.send(line.to_owned()).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    debug!("reading smbclient output: {}", err);
                    break;
                }
            }
        }

        debug!("smbclient output stream ended");
    });
}

/// The real smbclient
pub struct SmbClient {
    config: Arc<Config>,
}

impl SmbClient {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }
}

fn missing_pipe(name: &str) -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, format!("smbclient {name} is not piped"))
}

#[async_trait]
impl Connector for SmbClient {
    async fn connect(
        &self,
        target: &Target,
        credentials: &Credentials,
        mode: Mode,
    ) -> io::Result<Session> {
        let mut cmd = ProcessCommand::new(&self.config.smbclient);
        cmd.arg(target.service());

        match credentials {
            Credentials::Anonymous => {
                cmd.arg("-N");
            }
            Credentials::User { user, password } => {
                cmd.arg("-U").arg(user).env("PASSWD", password);
            }
        }

        cmd.args(&self.config.extra_args);

        let download = match &mode {
            Mode::Interactive => false,
            Mode::Transfer(command) => {
                cmd.arg("-E").arg("-c").arg(command.render(&self.config));
                matches!(command, Command::Get(_))
            }
        };

        cmd.env("LC_ALL", "C")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!("spawning smbclient for {} ({:?})", target.service(), credentials);
        let mut child = cmd.spawn()?;

        let stdin = child.stdin.take().ok_or_else(|| missing_pipe("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing_pipe("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing_pipe("stderr"))?;

        let (tx, rx) = mpsc::unbounded_channel();
        pump(stderr, tx.clone());

        let data: Option<Reader> = if download {
            Some(Box::new(stdout))
        } else {
            pump(stdout, tx);
            None
        };

        Ok(Session::new(
            Box::new(child),
            Box::new(stdin),
            data,
            rx,
            self.config.sentinel.clone(),
        ))
    }
}

/// Outcome of a finished upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    pub size: u64,
    /// Quoted SHA-256 of the uploaded bytes
    pub digest: String,
}

/// Everything needed to reach one share as one user
#[derive(Clone)]
pub struct Endpoint {
    connector: Arc<dyn Connector>,
    target: Target,
    credentials: Credentials,
    config: Arc<Config>,
}

impl Endpoint {
    pub fn new(
        connector: Arc<dyn Connector>,
        target: Target,
        credentials: Credentials,
        config: Arc<Config>,
    ) -> Self {
        Self {
            connector,
            target,
            credentials,
            config,
        }
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Opens an interactive session
    pub async fn open(&self) -> Status<Session> {
        Session::open(self.connector.as_ref(), &self.target, &self.credentials).await
    }

    async fn transfer(&self, command: Command) -> Status<Session> {
        if !command.is_expressible() {
            return Status::InvalidName;
        }

        trace!("smbclient -c {}", command.render(&self.config));
        match self
            .connector
            .connect(&self.target, &self.credentials, Mode::Transfer(command))
            .await
        {
            Ok(session) => Status::Ok(session),
            Err(err) => {
                debug!("cannot start smbclient for {}: {}", self.target.service(), err);
                Status::TransportError
            }
        }
    }

    /// Starts downloading `path`.
    ///
    /// Returns once the first byte arrived or smbclient reported an error,
    /// so a missing file is a failed status rather than a failing stream.
    pub async fn get(&self, path: &VirtualPath) -> Status<ReadStream> {
        let command = Command::Get(path.clone());
        let mut session = match self.transfer(command.clone()).await.split() {
            Ok(session) => session,
            Err(failure) => return failure,
        };

        let status = session.await_data().await;
        match status.restrict(|kind| command.reachable(kind)).split() {
            Ok(()) => Status::Ok(ReadStream::new(
                session,
                self.config.chunk_size,
                self.target.pretty(path),
            )),
            Err(failure) => {
                session.close().await;
                failure
            }
        }
    }

    /// Uploads everything `reader` yields to `path`.
    pub async fn put<R>(&self, path: &VirtualPath, mut reader: R) -> Status<Upload>
    where
        R: AsyncRead + Unpin + Send,
    {
        let command = Command::Put(path.clone());
        let mut session = match self.transfer(command.clone()).await.split() {
            Ok(session) => session,
            Err(failure) => return failure,
        };

        let mut hasher = Sha256::new();
        let mut size = 0u64;
        let mut buf = vec![0; self.config.chunk_size.max(1)];
        let mut broken = false;

        loop {
            let len = match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(len) => len,
                Err(err) => {
                    debug!("reading upload for {}: {}", self.target.pretty(path), err);
                    session.close().await;
                    return Status::TransportError;
                }
            };

            hasher.update(&buf[..len]);
            size += len as u64;

            if let Err(err) = session.write_data(&buf[..len]).await {
                // smbclient gave up; its reason is in the status lines
                debug!("smbclient stopped reading the upload: {}", err);
                broken = true;
                break;
            }
        }

        let status = session
            .finish()
            .await
            .restrict(|kind| command.reachable(kind));
        session.close().await;

        match status {
            Status::Ok(()) if broken => Status::TransportError,
            status => status.with(Upload {
                size,
                digest: utils::quoted_digest(&hasher.finalize()),
            }),
        }
    }
}
