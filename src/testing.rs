//! Scripted stand-in for smbclient.
//!
//! Replies are looked up by the exact command line smbclient would have
//! received; anything without a scripted reply succeeds silently.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::{
    io::{duplex, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, DuplexStream},
    sync::mpsc,
    task::AbortHandle,
};

use crate::{
    cache::ListingCache,
    client::{pump, Command, Connector, Credentials, Endpoint, Mode, Process, Reader, Session},
    config::Config,
    fs::{File, Node, Share},
    path::{Target, VirtualPath},
};

const PIPE: usize = 64 * 1024;

pub const LS_DOCS: &str = r#"ls "\docs\*""#;

/// A listing of `\docs` as smbclient prints it
pub const DOCS_LISTING: &[&str] = &[
    "  .                                   D        0  Sun Sep  9 01:46:39 2001",
    "  ..                                  D        0  Sun Sep  9 01:46:39 2001",
    "  report.doc                          A     2048  Sun Sep  9 01:46:40 2001",
    "  archive                             D        0  Sun Sep  9 01:46:39 2001",
    "",
    "\t\t48827 blocks of size 2097152. 3207 blocks available",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Connect { id: usize, mode: Mode },
    Command { id: usize, line: String },
    Upload { id: usize, data: Vec<u8> },
    Closed(usize),
}

#[derive(Debug, Clone, Default)]
struct Reply {
    lines: Vec<String>,
    data: Vec<u8>,
    failed: bool,
}

impl Reply {
    fn new(lines: &[&str], data: &[u8], failed: bool) -> Self {
        Self {
            lines: lines.iter().map(|line| (*line).to_owned()).collect(),
            data: data.to_vec(),
            failed,
        }
    }
}

#[derive(Default)]
struct FakeState {
    next_id: usize,
    events: Vec<Event>,
    replies: HashMap<String, Reply>,
    login: Option<Vec<String>>,
}

#[derive(Clone, Default)]
pub struct FakeSmb {
    state: Arc<Mutex<FakeState>>,
    config: Arc<Config>,
}

impl FakeSmb {
    pub fn new() -> Self {
        init_logging();
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    fn record(&self, event: Event) {
        self.state().events.push(event);
    }

    fn reply_for(&self, line: &str) -> Reply {
        self.state().replies.get(line).cloned().unwrap_or_default()
    }

    /// Answers `command` with `lines`
    pub fn reply(&self, command: &str, lines: &[&str]) -> &Self {
        self.state()
            .replies
            .insert(command.to_owned(), Reply::new(lines, &[], false));
        self
    }

    /// Answers a `get` with file content followed by `lines`
    pub fn reply_data(&self, command: &str, data: &[u8], lines: &[&str]) -> &Self {
        self.state()
            .replies
            .insert(command.to_owned(), Reply::new(lines, data, false));
        self
    }

    /// Answers a transfer with `lines` and a non-zero exit
    pub fn fail(&self, command: &str, lines: &[&str]) -> &Self {
        self.state()
            .replies
            .insert(command.to_owned(), Reply::new(lines, &[], true));
        self
    }

    /// Answers a `get` with some content, then exits non-zero
    pub fn fail_data(&self, command: &str, data: &[u8], lines: &[&str]) -> &Self {
        self.state()
            .replies
            .insert(command.to_owned(), Reply::new(lines, data, true));
        self
    }

    /// Makes every interactive login print `lines` and exit
    pub fn refuse_login(&self, lines: &[&str]) -> &Self {
        self.state().login = Some(lines.iter().map(|line| (*line).to_owned()).collect());
        self
    }

    pub fn events(&self) -> Vec<Event> {
        self.state().events.clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Command { line, .. } => Some(line),
                _ => None,
            })
            .collect()
    }

    /// How many times `command` was run
    pub fn count(&self, command: &str) -> usize {
        self.commands().iter().filter(|line| *line == command).count()
    }

    pub fn connects(&self) -> usize {
        self.events()
            .iter()
            .filter(|event| matches!(event, Event::Connect { .. }))
            .count()
    }

    pub fn closed(&self) -> Vec<usize> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Closed(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    pub fn uploads(&self) -> Vec<Vec<u8>> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Upload { data, .. } => Some(data),
                _ => None,
            })
            .collect()
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(
            Arc::new(self.clone()),
            Target::new("fs01", "projects"),
            Credentials::user("CORP\\alice", "secret"),
            self.config.clone(),
        )
    }

    /// A share of `//fs01/projects` as `alice`, with a cache of its own
    pub fn share(&self) -> Arc<Share> {
        let cache = Arc::new(ListingCache::new(Duration::from_secs(60)));
        Share::new(self.endpoint(), cache)
    }

    async fn interactive(self, id: usize, stdin: DuplexStream, mut out: DuplexStream) {
        let login = self.state().login.clone();
        if let Some(lines) = login {
            write_lines(&mut out, &lines).await;
            return;
        }

        let mut commands = BufReader::new(stdin).lines();
        while let Ok(Some(line)) = commands.next_line().await {
            if line == self.config.sentinel {
                let echo = format!("{}: command not found", self.config.sentinel);
                write_lines(&mut out, &[echo]).await;
                continue;
            }

            self.record(Event::Command {
                id,
                line: line.clone(),
            });
            write_lines(&mut out, &self.reply_for(&line).lines).await;
        }
    }

    async fn transfer(
        self,
        id: usize,
        line: String,
        mut stdin: DuplexStream,
        mut out: DuplexStream,
        data: Option<DuplexStream>,
    ) {
        self.record(Event::Command {
            id,
            line: line.clone(),
        });
        let reply = self.reply_for(&line);

        if let Some(mut data) = data {
            let _ = data.write_all(&reply.data).await;
        } else if !reply.failed {
            let mut upload = Vec::new();
            let _ = stdin.read_to_end(&mut upload).await;
            self.record(Event::Upload { id, data: upload });
        }

        write_lines(&mut out, &reply.lines).await;
    }
}

async fn write_lines<S: AsRef<str>>(out: &mut DuplexStream, lines: &[S]) {
    for line in lines {
        let _ = out.write_all(format!("{}\n", line.as_ref()).as_bytes()).await;
    }
}

struct FakeProcess {
    id: usize,
    fake: FakeSmb,
    task: AbortHandle,
    success: bool,
    killed: bool,
}

#[async_trait]
impl Process for FakeProcess {
    fn terminate(&mut self) {
        if !self.killed {
            self.killed = true;
            self.task.abort();
            self.fake.record(Event::Closed(self.id));
        }
    }

    async fn reap(&mut self) -> std::io::Result<bool> {
        Ok(self.success && !self.killed)
    }
}

#[async_trait]
impl Connector for FakeSmb {
    async fn connect(
        &self,
        _target: &Target,
        _credentials: &Credentials,
        mode: Mode,
    ) -> std::io::Result<Session> {
        let id = {
            let mut state = self.state();
            state.next_id += 1;
            let id = state.next_id;
            state.events.push(Event::Connect {
                id,
                mode: mode.clone(),
            });
            id
        };

        let (client_stdin, fake_stdin) = duplex(PIPE);
        let (fake_out, client_out) = duplex(PIPE);
        let (tx, rx) = mpsc::unbounded_channel();
        pump(client_out, tx);

        let fake = self.clone();
        let (task, success, data): (_, bool, Option<Reader>) = match &mode {
            Mode::Interactive => {
                let success = self.state().login.is_none();
                let task = tokio::spawn(async move {
                    fake.interactive(id, fake_stdin, fake_out).await;
                });
                (task, success, None)
            }
            Mode::Transfer(command) => {
                let line = command.render(&self.config);
                let success = !self.reply_for(&line).failed;

                let (fake_data, client_data) = duplex(PIPE);
                let download = matches!(command, Command::Get(_));
                let data: Option<Reader> = if download {
                    Some(Box::new(client_data))
                } else {
                    None
                };
                let fake_data = download.then_some(fake_data);

                let task = tokio::spawn(async move {
                    fake.transfer(id, line, fake_stdin, fake_out, fake_data).await;
                });
                (task, success, data)
            }
        };

        let process = FakeProcess {
            id,
            fake: self.clone(),
            task: task.abort_handle(),
            success,
            killed: false,
        };

        Ok(Session::new(
            Box::new(process),
            Box::new(client_stdin),
            data,
            rx,
            self.config.sentinel.clone(),
        ))
    }
}

/// A listing row for `name` as smbclient prints it
pub fn row(name: &str, flags: &str, size: u64) -> String {
    format!("  {name:<34}{flags:>4}{size:>9}  Sun Sep  9 01:46:40 2001")
}

/// The `report.doc` entity of `\docs`
pub async fn report(share: &Arc<Share>) -> File {
    let docs = share.directory(VirtualPath::new("/docs"));
    match docs.child("report.doc").await.unwrap() {
        Node::File(file) => file,
        node => panic!("unexpected {node:?}"),
    }
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
