use std::io;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    sync::mpsc,
};

use super::{command::Command, Connector, Credentials, Mode};
use crate::{
    config::Config,
    listing,
    path::Target,
    status::{classify, classify_line, Status, StatusKind, Termination},
};

pub(crate) type Reader = Box<dyn AsyncRead + Send + Unpin>;
pub(crate) type Writer = Box<dyn AsyncWrite + Send + Unpin>;

/// The process behind a [`Session`]
#[async_trait]
pub trait Process: Send {
    /// Asks the process to go away. Must be harmless when it already did.
    fn terminate(&mut self);

    /// Waits for the process to exit; `true` on a clean exit
    async fn reap(&mut self) -> io::Result<bool>;
}

#[async_trait]
impl Process for tokio::process::Child {
    fn terminate(&mut self) {
        let _ = self.start_kill();
    }

    async fn reap(&mut self) -> io::Result<bool> {
        Ok(self.wait().await?.success())
    }
}

/// A live smbclient process.
///
/// Interactive sessions take one command at a time on stdin and answer
/// with text lines. Transfer sessions run a single `get` or `put` and
/// carry file content over a separate data channel.
pub struct Session {
    process: Box<dyn Process>,
    stdin: Option<Writer>,
    data: Option<BufReader<Reader>>,
    lines: mpsc::UnboundedReceiver<String>,
    pending: Vec<String>,
    sentinel: String,
    /// What smbclient answers to the sentinel
    echo: String,
    closed: bool,
}

impl Session {
    pub fn new(
        process: Box<dyn Process>,
        stdin: Writer,
        data: Option<Reader>,
        lines: mpsc::UnboundedReceiver<String>,
        sentinel: String,
    ) -> Self {
        Self {
            process,
            stdin: Some(stdin),
            data: data.map(BufReader::new),
            lines,
            pending: Vec::new(),
            echo: format!("{sentinel}: command not found"),
            sentinel,
            closed: false,
        }
    }

    /// Starts an interactive session on `target` and waits until it is
    /// logged in. A failed session is closed before returning.
    pub async fn open(
        connector: &dyn Connector,
        target: &Target,
        credentials: &Credentials,
    ) -> Status<Session> {
        let mut session = match connector.connect(target, credentials, Mode::Interactive).await {
            Ok(session) => session,
            Err(err) => {
                debug!("cannot start smbclient for {}: {}", target.service(), err);
                return Status::TransportError;
            }
        };

        let status = session.handshake().await;
        if !status.is_ok() {
            session.close().await;
        }
        status.with(session)
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    async fn send(&mut self, text: &str) -> io::Result<()> {
        match self.stdin.as_mut() {
            Some(stdin) => {
                stdin.write_all(text.as_bytes()).await?;
                stdin.flush().await
            }
            None => Err(io::Error::new(io::ErrorKind::BrokenPipe, "stdin closed")),
        }
    }

    fn is_echo(&self, line: &str) -> bool {
        listing::strip_prompt(line).trim() == self.echo
    }

    /// Reads lines up to the sentinel echo. Output that merely mentions the
    /// sentinel, such as a file named after it, is part of the response.
    async fn read_response(&mut self) -> (Vec<String>, Termination) {
        let mut lines = Vec::new();

        while let Some(line) = self.lines.recv().await {
            if self.is_echo(&line) {
                return (lines, Termination::Completed);
            }
            lines.push(line);
        }

        (lines, Termination::Abnormal)
    }

    /// Waits until the freshly spawned client has connected to the share.
    async fn handshake(&mut self) -> Status {
        let sentinel = format!("{}\n", self.sentinel);
        if let Err(err) = self.send(&sentinel).await {
            debug!("smbclient went away before the handshake: {}", err);
        }

        let (lines, termination) = self.read_response().await;
        classify(&lines, termination).restrict(|kind| {
            !matches!(kind, StatusKind::InvalidName | StatusKind::NotEmpty)
        })
    }

    /// Runs one command and returns its output lines.
    pub async fn execute(&mut self, command: &Command, config: &Config) -> Status<Vec<String>> {
        if !command.is_expressible() {
            return Status::InvalidName;
        }

        if self.closed {
            return Status::TransportError;
        }

        let line = command.render(config);
        trace!("smbclient < {}", line);

        if let Err(err) = self.send(&format!("{line}\n{}\n", self.sentinel)).await {
            debug!("{}: cannot write to smbclient: {}", command.name(), err);
            return Status::TransportError;
        }

        let (lines, termination) = self.read_response().await;
        classify(&lines, termination)
            .restrict(|kind| command.reachable(kind))
            .with(lines)
    }

    /// Waits for either the first byte of a download or an error report.
    pub(crate) async fn await_data(&mut self) -> Status {
        let Some(data) = self.data.as_mut() else {
            return Status::TransportError;
        };
        let lines = &mut self.lines;
        let pending = &mut self.pending;
        let mut lines_open = true;

        loop {
            tokio::select! {
                line = lines.recv(), if lines_open => match line {
                    Some(line) => {
                        let failed = classify_line(&line).is_some();
                        pending.push(line);
                        if failed {
                            return classify(pending.as_slice(), Termination::Completed);
                        }
                    }
                    None => lines_open = false,
                },
                ready = data.fill_buf() => match ready {
                    Ok(buf) if !buf.is_empty() => return Status::Ok(()),
                    Ok(_) => break,
                    Err(err) => {
                        debug!("reading from smbclient: {}", err);
                        return Status::TransportError;
                    }
                },
            }
        }

        self.finish().await
    }

    /// Detaches the data channel so it can be read without holding the
    /// session.
    pub(crate) fn take_data(&mut self) -> Option<BufReader<Reader>> {
        self.data.take()
    }

    pub(crate) fn restore_data(&mut self, data: BufReader<Reader>) {
        if !self.closed {
            self.data = Some(data);
        }
    }

    pub(crate) async fn write_data(&mut self, buf: &[u8]) -> io::Result<()> {
        match self.stdin.as_mut() {
            Some(stdin) => stdin.write_all(buf).await,
            None => Err(io::Error::new(io::ErrorKind::BrokenPipe, "stdin closed")),
        }
    }

    /// Ends a transfer: closes stdin, collects the remaining output and
    /// the exit status, and classifies everything that was said.
    pub(crate) async fn finish(&mut self) -> Status {
        if let Some(mut stdin) = self.stdin.take() {
            let _ = stdin.shutdown().await;
        }

        while let Some(line) = self.lines.recv().await {
            self.pending.push(line);
        }

        let termination = match self.process.reap().await {
            Ok(true) => Termination::Completed,
            Ok(false) => Termination::Abnormal,
            Err(err) => {
                debug!("waiting for smbclient: {}", err);
                Termination::Abnormal
            }
        };

        classify(&self.pending, termination)
    }

    /// Terminates the process and releases its pipes. Calling it again,
    /// or after the process exited on its own, does nothing harmful.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        self.stdin = None;
        self.data = None;
        self.lines.close();
        self.process.terminate();

        if let Err(err) = self.process.reap().await {
            debug!("reaping smbclient: {}", err);
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.closed {
            self.process.terminate();
        }
    }
}
