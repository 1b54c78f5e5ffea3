//! Server configuration: worker pool, connection and response buffer limits.
//!
//! Every limits struct has public fields and a [`Default`] implementation.
//! Change only what you need and fill in the rest with
//! `..Default::default()`:
//!
//! ```no_run
//! use relay_web::{Server, limits::{ConnLimits, ServerLimits}};
//! use std::time::Duration;
//!
//! fn main() -> relay_web::Result<()> {
//!     Server::builder()
//!         .server_limits(ServerLimits {
//!             worker_threads: 8,
//!             json_errors: true,
//!             ..ServerLimits::default()
//!         })
//!         .connection_limits(ConnLimits {
//!             idle_timeout: Some(Duration::from_secs(30)),
//!             ..ConnLimits::default()
//!         })
//!         .get("/", |_, resp| {
//!             resp.text("Hello");
//!             Ok(())
//!         })?
//!         .build()
//!         .listen("127.0.0.1:8080")
//! }
//! ```

use std::time::Duration;

/// Worker pool and request admission settings.
///
/// # Request flow
/// ```text
///                 [------------------]
///                 [ Multiplexer loop ]  accept + non-blocking reads
///                 [------------------]
///                          ||
///                          || raw bytes (or a precomputed 413)
///                          \/
///                    [------------]
///                    [ Task queue ]
///                    [------------]
///                          ||
///         /================/\================\
///         V                                  V
///   [----------]                       [----------]
///   [ Worker 0 ]  . . . . . . . . . .  [ Worker N ]
///   [----------]                       [----------]
///   parse > route > middleware > handler > serialize > write
/// ```
#[derive(Debug, Clone)]
pub struct ServerLimits {
    /// Number of worker threads (default: `4`, at least `1` is always started).
    ///
    /// Each worker runs handlers synchronously, so a slow handler occupies
    /// exactly one worker while the others and the I/O loop keep going.
    pub worker_threads: usize,

    /// Largest accepted request in bytes, head and body together
    /// (default: `10 MiB`).
    ///
    /// A connection whose accumulated bytes pass this size is answered with
    /// [413](crate::StatusCode::PayloadTooLarge) and closed. `0` disables the
    /// limit.
    pub max_request_size: usize,

    /// Format of generated error bodies (default: `false`)
    ///
    /// # Examples
    /// If `false`, errors are sent as a small HTML page:
    /// ```text
    /// HTTP/1.1 404 Not Found\r
    /// Content-Type: text/html\r
    /// Connection: close\r
    /// ...
    /// \r
    /// <html><head><title>404 Not Found</title></head><body>...
    /// ```
    /// If `true`, then on error the server will return:
    /// ```text
    /// HTTP/1.1 404 Not Found\r
    /// Connection: close\r
    /// Content-Type: application/json\r
    /// ...
    /// \r
    /// {"code":404,"error":"Not Found"}
    /// ```
    pub json_errors: bool,

    /// How a worker waits while a client is not draining its socket
    /// (default: `Sleep(50μs)`).
    pub wait_strategy: WaitStrategy,

    /// Value of the `Server` header and the footer of error pages
    /// (default: `relay_web/<version>`).
    pub server_name: String,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ServerLimits {
    fn default() -> Self {
        Self {
            worker_threads: 4,
            max_request_size: 10 * 1024 * 1024,
            json_errors: false,
            wait_strategy: WaitStrategy::Sleep(Duration::from_micros(50)),
            server_name: concat!("relay_web/", env!("CARGO_PKG_VERSION")).to_string(),

            _priv: (),
        }
    }
}

impl ServerLimits {
    #[inline(always)]
    pub(crate) fn exceeds_request_size(&self, len: usize) -> bool {
        self.max_request_size != 0 && len > self.max_request_size
    }
}

/// Strategy for a worker waiting on a full socket send buffer.
///
/// Responses are written from worker threads onto non-blocking sockets. When
/// the kernel buffer is full the write returns `WouldBlock`, and the worker
/// waits with this strategy before retrying, up to
/// [`socket_write_timeout`](ConnLimits::socket_write_timeout).
#[derive(Debug, Clone, PartialEq)]
pub enum WaitStrategy {
    /// While waiting, uses [`std::thread::yield_now()`]
    ///
    /// # Note
    /// Keeps the worker spinning at full CPU while a client is slow.
    ///
    /// ```
    /// # let mut chunks = vec![1, 2, 3];
    /// let chunk = loop {
    ///     if let Some(chunk) = chunks.pop() {
    ///         break chunk;
    ///     }
    ///
    ///     std::thread::yield_now();
    /// };
    /// ```
    Yield,

    /// While waiting, uses [`std::thread::sleep()`]
    ///
    /// ```
    /// # let mut chunks = vec![1, 2, 3];
    /// # let time = std::time::Duration::from_micros(50);
    /// let chunk = loop {
    ///     if let Some(chunk) = chunks.pop() {
    ///         break chunk;
    ///     }
    ///
    ///     std::thread::sleep(time);
    /// };
    /// ```
    Sleep(Duration),
}

impl WaitStrategy {
    #[inline(always)]
    pub(crate) fn wait(&self) {
        match self {
            WaitStrategy::Yield => std::thread::yield_now(),
            WaitStrategy::Sleep(time) => std::thread::sleep(*time),
        }
    }
}

/// Per-connection I/O settings.
#[derive(Debug, Clone)]
pub struct ConnLimits {
    /// Size of the transfer buffer used for each non-blocking read
    /// (default: `8192 B`).
    ///
    /// Bytes are copied from it into the connection's accumulation buffer
    /// until the socket reports no more data.
    pub read_buffer_size: usize,

    /// Maximum duration of one response write (default: `3 seconds`)
    ///
    /// If the client does not accept the whole response in time, the
    /// connection is closed.
    pub socket_write_timeout: Duration,

    /// Close connections that send nothing for this long (default: `None`)
    ///
    /// When `None`, a connection stays open until the client disconnects,
    /// a response closes it or the server stops.
    pub idle_timeout: Option<Duration>,

    /// Sets `TCP_NODELAY` on accepted sockets (default: `true`)
    pub nodelay: bool,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ConnLimits {
    #[inline(always)]
    fn default() -> Self {
        Self {
            read_buffer_size: 8 * 1024,
            socket_write_timeout: Duration::from_secs(3),
            idle_timeout: None,
            nodelay: true,

            _priv: (),
        }
    }
}

/// Configuration of the per-worker serialization buffer.
///
/// # Buffer Management
///
/// After every task the worker's buffer is reset as follows:
/// ```rust
/// # use relay_web::limits::RespLimits;
/// # let limits = RespLimits::default();
/// # let mut buffer: Vec<u8> = Vec::with_capacity(limits.default_capacity);
/// #
/// if buffer.capacity() > limits.max_capacity {
///     buffer = Vec::with_capacity(limits.default_capacity);
/// } else {
///     buffer.clear();
/// }
/// ```
///
/// When a worker starts, its buffer is created with a capacity equal to
/// `default_capacity`.
#[derive(Debug, Clone)]
pub struct RespLimits {
    /// Initial buffer capacity (default: `1024 B`)
    pub default_capacity: usize,
    /// Capacity above which the buffer is reallocated (default: `8192 B`)
    pub max_capacity: usize,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for RespLimits {
    fn default() -> Self {
        Self {
            default_capacity: 1024,
            max_capacity: 8 * 1024,

            _priv: (),
        }
    }
}

impl RespLimits {
    #[inline]
    pub(crate) fn reset(&self, buffer: &mut Vec<u8>) {
        if buffer.capacity() > self.max_capacity {
            *buffer = Vec::with_capacity(self.default_capacity);
        } else {
            buffer.clear();
        }
    }
}
