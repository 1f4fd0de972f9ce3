use bytes::{Buf, Bytes};
use std::{
    future::Future,
    io,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, ReadBuf},
    runtime::Handle,
    sync::Mutex,
};

use super::Session;
use crate::status::{Status, StatusKind};

/// Session of a running transfer, shared between the stream reading it and
/// whoever may need to cancel it.
pub type SessionHandle = Arc<Mutex<Session>>;

type StateFn<T> = Option<Pin<Box<dyn Future<Output = io::Result<T>> + Send + 'static>>>;

fn aborted() -> io::Error {
    io::Error::new(io::ErrorKind::ConnectionAborted, "transfer session was closed")
}

/// Content of a remote file as it comes out of smbclient.
///
/// The stream owns its transfer session and closes it when the content
/// ends, on [`close`](ReadStream::close), or when dropped. Another holder
/// of the [`SessionHandle`] may close it earlier; reads then fail with
/// [`io::ErrorKind::ConnectionAborted`].
pub struct ReadStream {
    session: SessionHandle,
    /// Pretty name of the remote file, for logs
    resource: Arc<str>,
    f_read: StateFn<Option<Bytes>>,
    leftover: Bytes,
    chunk_size: usize,
    done: bool,
}

impl ReadStream {
    pub(crate) fn new(session: Session, chunk_size: usize, resource: String) -> Self {
        Self {
            session: Arc::new(Mutex::new(session)),
            resource: resource.into(),
            f_read: None,
            leftover: Bytes::new(),
            chunk_size: chunk_size.max(1),
            done: false,
        }
    }

    pub fn handle(&self) -> SessionHandle {
        self.session.clone()
    }

    /// Stops the transfer and closes its session
    pub async fn close(&mut self) {
        self.f_read = None;
        self.done = true;
        self.session.lock().await.close().await;
    }
}

async fn next_chunk(
    session: SessionHandle,
    len: usize,
    resource: Arc<str>,
) -> io::Result<Option<Bytes>> {
    let Some(mut data) = session.lock().await.take_data() else {
        return Err(aborted());
    };

    // The lock is not held while waiting on the pipe, so the transfer can
    // be closed from elsewhere in the meantime.
    let read = match data.fill_buf().await {
        Ok(buf) => {
            let chunk = Bytes::copy_from_slice(&buf[..buf.len().min(len)]);
            data.consume(chunk.len());
            Ok(chunk)
        }
        Err(err) => Err(err),
    };

    let mut session = session.lock().await;
    if session.is_closed() {
        return Err(aborted());
    }

    match read {
        Ok(chunk) if !chunk.is_empty() => {
            session.restore_data(data);
            Ok(Some(chunk))
        }
        Ok(_) => {
            let status = session.finish().await;
            session.close().await;
            match status {
                Status::Ok(()) => Ok(None),
                failure => {
                    warn!("get \"{}\": {}", resource, failure.kind());
                    Err(io::Error::other(format!(
                        "smbclient transfer failed: {}",
                        failure.kind()
                    )))
                }
            }
        }
        Err(err) => {
            warn!("get \"{}\": {} ({})", resource, StatusKind::TransportError, err);
            session.close().await;
            Err(err)
        }
    }
}

impl AsyncRead for ReadStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if !self.leftover.is_empty() {
            let len = self.leftover.len().min(buf.remaining());
            buf.put_slice(&self.leftover[..len]);
            self.leftover.advance(len);
            return Poll::Ready(Ok(()));
        }

        if self.done {
            return Poll::Ready(Ok(()));
        }

        if self.f_read.is_none() {
            let session = self.session.clone();
            let len = self.chunk_size;
            let resource = self.resource.clone();
            self.f_read = Some(Box::pin(next_chunk(session, len, resource)));
        }

        let poll = match self.f_read.as_mut() {
            Some(f) => f.as_mut().poll(cx),
            None => return Poll::Ready(Ok(())),
        };

        if poll.is_ready() {
            self.f_read = None;
        }

        match poll {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Err(e)) => {
                self.done = true;
                Poll::Ready(Err(e))
            }
            Poll::Ready(Ok(None)) => {
                self.done = true;
                Poll::Ready(Ok(()))
            }
            Poll::Ready(Ok(Some(mut data))) => {
                let len = data.len().min(buf.remaining());
                buf.put_slice(&data[..len]);
                data.advance(len);
                self.leftover = data;
                Poll::Ready(Ok(()))
            }
        }
    }
}

impl Drop for ReadStream {
    fn drop(&mut self) {
        if self.done {
            return;
        }

        if let Ok(handle) = Handle::try_current() {
            let session = self.session.clone();

            handle.spawn(async move {
                session.lock().await.close().await;
            });
        }
    }
}
