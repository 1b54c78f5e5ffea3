use crate::{
    limits::{ConnLimits, ServerLimits},
    StatusCode,
};
use crossbeam::channel::Sender;
use memchr::memmem;
use std::{io, mem, net::SocketAddr, sync::Arc};
use tokio::{net::TcpStream, sync::oneshot, time::timeout};
use tracing::{debug, warn};

/// One unit of work for the worker pool.
///
/// The raw bytes are a finished snapshot of the connection's accumulation
/// buffer. The write half of the socket travels with the task and comes
/// back through `reply` if the connection stays open.
pub(crate) struct Task {
    pub(crate) raw: Vec<u8>,
    /// Status decided before parsing, e.g. `413` for an oversized request.
    pub(crate) error: Option<StatusCode>,
    pub(crate) writer: std::net::TcpStream,
    pub(crate) peer: SocketAddr,
    pub(crate) reply: oneshot::Sender<Verdict>,
}

/// Worker's decision after writing a response.
#[derive(Debug)]
pub(crate) enum Verdict {
    KeepAlive(std::net::TcpStream),
    Close,
}

/// Everything a connection needs from the server, shared by all of them.
pub(crate) struct ConnContext {
    pub(crate) limits: ConnLimits,
    pub(crate) server_limits: ServerLimits,
    pub(crate) queue: Sender<Task>,
}

/// Serves one accepted socket until it is closed.
pub(crate) async fn serve(stream: TcpStream, peer: SocketAddr, ctx: Arc<ConnContext>) {
    let mut conn = match Connection::new(stream, peer, ctx) {
        Ok(conn) => conn,
        Err(e) => {
            warn!(%peer, error = %e, "failed to split connection");
            return;
        }
    };

    match conn.run().await {
        Ok(()) => debug!(%peer, "connection closed"),
        Err(e) => warn!(%peer, error = %e, "connection read failed"),
    }
}

struct Connection {
    reader: TcpStream,
    writer: Option<std::net::TcpStream>,
    peer: SocketAddr,

    transfer: Box<[u8]>,
    buffer: Vec<u8>,

    ctx: Arc<ConnContext>,
}

impl Connection {
    /// Duplicates the socket: the tokio half stays here for readiness and
    /// reads, the std half is handed to workers for writes.
    fn new(stream: TcpStream, peer: SocketAddr, ctx: Arc<ConnContext>) -> io::Result<Self> {
        let stream = stream.into_std()?;
        let writer = stream.try_clone()?;
        let reader = TcpStream::from_std(stream)?;

        Ok(Self {
            reader,
            writer: Some(writer),
            peer,
            transfer: vec![0; ctx.limits.read_buffer_size.max(1)].into_boxed_slice(),
            buffer: Vec::new(),
            ctx,
        })
    }

    async fn run(&mut self) -> io::Result<()> {
        loop {
            match self.ctx.limits.idle_timeout {
                Some(idle) => match timeout(idle, self.reader.readable()).await {
                    Ok(ready) => ready?,
                    Err(_) => {
                        debug!(peer = %self.peer, "idle connection reaped");
                        return Ok(());
                    }
                },
                None => self.reader.readable().await?,
            }

            if !self.drain()? {
                // Peer closed, partial bytes are dropped
                return Ok(());
            }

            let error = match self.ctx.server_limits.exceeds_request_size(self.buffer.len()) {
                true => Some(StatusCode::PayloadTooLarge),
                false if is_complete(&self.buffer) => None,
                false => continue,
            };

            let raw = mem::take(&mut self.buffer);
            if !self.dispatch(raw, error).await {
                return Ok(());
            }
        }
    }

    /// Reads until the socket has nothing more for now.
    ///
    /// Returns `false` on end of stream. Stops early once the request size
    /// limit is passed.
    fn drain(&mut self) -> io::Result<bool> {
        loop {
            match self.reader.try_read(&mut self.transfer) {
                Ok(0) => return Ok(false),
                Ok(n) => {
                    self.buffer.extend_from_slice(&self.transfer[..n]);

                    if self.ctx.server_limits.exceeds_request_size(self.buffer.len()) {
                        return Ok(true);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(true),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Hands a request to the worker pool and waits for the verdict.
    ///
    /// Returns whether the connection stays open.
    async fn dispatch(&mut self, raw: Vec<u8>, error: Option<StatusCode>) -> bool {
        let Some(writer) = self.writer.take() else {
            return false;
        };
        let (reply, verdict) = oneshot::channel();

        let task = Task {
            raw,
            error,
            writer,
            peer: self.peer,
            reply,
        };
        if self.ctx.queue.send(task).is_err() {
            // Worker pool is gone, the server is stopping
            return false;
        }

        match verdict.await {
            Ok(Verdict::KeepAlive(writer)) => {
                self.writer = Some(writer);
                true
            }
            Ok(Verdict::Close) | Err(_) => false,
        }
    }
}

/// Whether `buffer` holds a complete request: the header terminator has
/// arrived and, if `Content-Length` is present and valid, that many body
/// bytes follow it.
pub(crate) fn is_complete(buffer: &[u8]) -> bool {
    let Some(head_end) = memmem::find(buffer, b"\r\n\r\n") else {
        return false;
    };

    match content_length(&buffer[..head_end]) {
        Some(length) => buffer.len() - (head_end + 4) >= length,
        None => true,
    }
}

fn content_length(head: &[u8]) -> Option<usize> {
    head.split(|&b| b == b'\n').skip(1).find_map(|line| {
        let colon = memchr::memchr(b':', line)?;
        let (name, value) = (&line[..colon], &line[colon + 1..]);

        if !name.eq_ignore_ascii_case(b"content-length") {
            return None;
        }
        simdutf8::basic::from_utf8(value).ok()?.trim().parse().ok()
    })
}

pub(crate) mod writer {
    use crate::limits::WaitStrategy;
    use std::{
        io::{self, Write},
        net::TcpStream,
        time::{Duration, Instant},
    };

    /// Writes all of `data` to a non-blocking socket.
    ///
    /// While the send buffer is full the caller waits with `wait` and
    /// retries. Fails with `TimedOut` once `limit` has passed.
    pub(crate) fn write_bytes(
        stream: &mut TcpStream,
        mut data: &[u8],
        limit: Duration,
        wait: &WaitStrategy,
    ) -> io::Result<()> {
        let deadline = Instant::now() + limit;

        while !data.is_empty() {
            match stream.write(data) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => data = &data[n..],
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        return Err(io::Error::new(
                            io::ErrorKind::TimedOut,
                            "socket write timed out",
                        ));
                    }
                    wait.wait();
                }
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }
}
