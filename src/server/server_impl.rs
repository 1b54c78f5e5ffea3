use crate::{
    errors::{Error, HandlerError, Result},
    limits::{ConnLimits, RespLimits, ServerLimits},
    router::{Handler, Router},
    server::{
        connection::ConnContext,
        multiplexer,
        worker::{WorkerContext, WorkerPool},
    },
    Method, Request, Response,
};
use socket2::{Domain, Protocol, Socket, Type};
use std::{
    fmt, io,
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use tokio::{net::TcpListener, sync::Notify};
use tracing::info;

const LISTEN_BACKLOG: i32 = 1024;

/// An HTTP/1.1 server: a route table, a middleware chain and its limits.
///
/// Created with [`Server::builder()`]. Serving starts with
/// [`listen`](Server::listen), or with [`bind`](Server::bind) followed by
/// [`Listening::run`] when the bound address or a [`StopHandle`] is needed
/// first.
///
/// # Examples
///
/// ```no_run
/// use relay_web::{Server, StatusCode};
///
/// fn main() -> relay_web::Result<()> {
///     Server::builder()
///         .get("/", |_, resp| {
///             resp.text("Hello world!");
///             Ok(())
///         })?
///         .post("/users", |req, resp| {
///             let name = req.body().form().and_then(|f| f.get("name")).unwrap_or("anonymous");
///             resp.status(StatusCode::Created).text(format!("created {name}"));
///             Ok(())
///         })?
///         .build()
///         .listen("127.0.0.1:8080")
/// }
/// ```
pub struct Server {
    router: Router,
    server_limits: ServerLimits,
    conn_limits: ConnLimits,
    resp_limits: RespLimits,
}

impl Server {
    /// Creates a new builder for configuring the server instance.
    #[inline]
    pub fn builder() -> ServerBuilder {
        ServerBuilder {
            router: Router::new(),

            server_limits: None,
            connection_limits: None,
            response_limits: None,
        }
    }

    /// Opens the listening socket without serving yet.
    ///
    /// Accepted address forms:
    /// - `host:port`, e.g. `127.0.0.1:8080` or `localhost:8080`
    /// - `:port`, all IPv4 interfaces
    /// - `[v6]:port`, e.g. `[::1]:8080`
    ///
    /// The port must be a number in `0..=65535`; port `0` lets the OS pick
    /// one, see [`Listening::local_addr`].
    ///
    /// # Errors
    /// [`Error::InvalidAddress`] if `addr` cannot be parsed or resolved (no
    /// socket is opened in that case), [`Error::Io`] if the socket cannot be
    /// bound.
    pub fn bind(self, addr: &str) -> Result<Listening> {
        let addr = resolve_address(addr)?;
        let listener = open_listener(addr)?;
        let local_addr = listener.local_addr()?;

        Ok(Listening {
            listener,
            local_addr,
            server: self,
            stop: StopHandle::new(),
        })
    }

    /// Binds to `addr` and serves on the calling thread until stopped.
    ///
    /// Shorthand for `server.bind(addr)?.run()`.
    pub fn listen(self, addr: &str) -> Result<()> {
        self.bind(addr)?.run()
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("router", &self.router)
            .field("server_limits", &self.server_limits)
            .field("conn_limits", &self.conn_limits)
            .field("resp_limits", &self.resp_limits)
            .finish()
    }
}

/// A bound server, ready to [`run`](Listening::run).
pub struct Listening {
    listener: std::net::TcpListener,
    local_addr: SocketAddr,
    server: Server,
    stop: StopHandle,
}

impl Listening {
    /// Address the listener is bound to, with the real port when `0` was
    /// requested.
    #[inline]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Handle that stops [`run`](Listening::run) from any thread.
    #[inline]
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Serves until [`StopHandle::stop`] is called.
    ///
    /// Starts the worker pool, then runs the connection loop on the calling
    /// thread. When stopped, the listener and every open connection are
    /// closed, the task queue is dropped and the workers are joined before
    /// this returns.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use relay_web::Server;
    /// use std::{thread, time::Duration};
    ///
    /// # fn main() -> relay_web::Result<()> {
    /// let listening = Server::builder()
    ///     .get("/", |_, resp| {
    ///         resp.text("ok");
    ///         Ok(())
    ///     })?
    ///     .build()
    ///     .bind("127.0.0.1:0")?;
    ///
    /// println!("listening on {}", listening.local_addr());
    ///
    /// let stop = listening.stop_handle();
    /// thread::spawn(move || {
    ///     thread::sleep(Duration::from_secs(60));
    ///     stop.stop();
    /// });
    ///
    /// listening.run()
    /// # }
    /// ```
    pub fn run(self) -> Result<()> {
        let Listening {
            listener,
            local_addr,
            server,
            stop,
        } = self;
        let Server {
            router,
            server_limits,
            conn_limits,
            resp_limits,
        } = server;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_io()
            .enable_time()
            .build()?;

        let routes = router.route_count();
        let (queue, tasks) = crossbeam::channel::unbounded();
        let pool = WorkerPool::spawn(
            Arc::new(WorkerContext {
                router,
                server_limits: server_limits.clone(),
                conn_limits: conn_limits.clone(),
                resp_limits,
            }),
            tasks,
        )?;

        let ctx = Arc::new(ConnContext {
            limits: conn_limits,
            server_limits,
            queue,
        });

        info!(address = %local_addr, workers = pool.len(), routes, "server listening");

        let served = runtime.block_on(async {
            let listener = TcpListener::from_std(listener)?;
            multiplexer::run(listener, ctx, &stop).await;
            Ok::<_, io::Error>(())
        });

        // Connection tasks own queue senders; the workers exit once they are gone
        drop(runtime);
        stop.stop();
        pool.join();

        info!(address = %local_addr, "server stopped");
        served.map_err(Error::from)
    }
}

impl fmt::Debug for Listening {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listening")
            .field("local_addr", &self.local_addr)
            .field("server", &self.server)
            .finish()
    }
}

/// Stops a running server.
///
/// Cheap to clone and safe to use from any thread. Stopping is idempotent:
/// only the first call has an effect. A handle stopped before
/// [`Listening::run`] starts makes `run` return right away.
#[derive(Debug, Clone)]
pub struct StopHandle {
    inner: Arc<StopState>,
}

#[derive(Debug)]
struct StopState {
    stopped: AtomicBool,
    notify: Notify,
}

impl StopHandle {
    fn new() -> Self {
        Self {
            inner: Arc::new(StopState {
                stopped: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// Signals the server to stop. Does not wait for it.
    pub fn stop(&self) {
        if !self.inner.stopped.swap(true, Ordering::AcqRel) {
            // Stores a permit if the loop is not waiting yet
            self.inner.notify.notify_one();
        }
    }

    #[inline]
    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) async fn notified(&self) {
        self.inner.notify.notified().await
    }
}

/// Builder for configuring and creating [`Server`] instances.
///
/// Route registration returns `Result` because a `(method, path)` pair can
/// only be registered once:
///
/// ```
/// use relay_web::{Error, Server};
///
/// let result = Server::builder()
///     .get("/", |_, _| Ok(()))
///     .and_then(|b| b.get("/", |_, _| Ok(())));
///
/// assert!(matches!(result, Err(Error::DuplicateRoute { .. })));
/// ```
pub struct ServerBuilder {
    router: Router,

    server_limits: Option<ServerLimits>,
    connection_limits: Option<ConnLimits>,
    response_limits: Option<RespLimits>,
}

macro_rules! method_shortcuts {
    ($($method:ident => $name:ident),+ $(,)?) => { $(
        #[doc = concat!("Registers a handler for `", stringify!($method), "` requests to `path`.")]
        ///
        /// See [`route`](Self::route).
        #[inline(always)]
        pub fn $name<F>(self, path: impl Into<String>, handler: F) -> Result<Self>
        where
            F: Fn(&mut Request, &mut Response) -> std::result::Result<(), HandlerError>
                + Send
                + Sync
                + 'static,
        {
            self.route(Method::$method, path, handler)
        }
    )+ };
}

impl ServerBuilder {
    method_shortcuts! {
        Get => get,
        Post => post,
        Put => put,
        Delete => delete,
        Patch => patch,
        Head => head,
        Options => options,
    }

    /// Registers `handler` for `method` and the exact, case-sensitive `path`.
    ///
    /// # Errors
    /// [`Error::DuplicateRoute`] if the pair is already registered.
    ///
    /// # Examples
    ///
    /// ```
    /// use relay_web::{Handler, HandlerError, Method, Request, Response, Server};
    ///
    /// struct Health;
    ///
    /// impl Handler for Health {
    ///     fn handle(&self, _: &mut Request, resp: &mut Response) -> Result<(), HandlerError> {
    ///         resp.json(&["ok"])?;
    ///         Ok(())
    ///     }
    /// }
    ///
    /// # fn main() -> relay_web::Result<()> {
    /// let server = Server::builder()
    ///     .route(Method::Get, "/health", Health)?
    ///     .route(Method::Head, "/health", Health)?
    ///     .build();
    /// # Ok(())
    /// # }
    /// ```
    pub fn route<H: Handler>(
        mut self,
        method: Method,
        path: impl Into<String>,
        handler: H,
    ) -> Result<Self> {
        self.router.register(method, path, Arc::new(handler))?;
        Ok(self)
    }

    /// Adds a middleware, run before the route handler for every routed
    /// request.
    ///
    /// Lower `priority` values run first; equal priorities run in the order
    /// they were added. Middleware shares the request and response with the
    /// handler, so it can set headers or store [locals](Request::insert_local).
    /// Returning `Err` skips the rest of the chain and answers `500`.
    ///
    /// # Examples
    ///
    /// ```
    /// use relay_web::Server;
    ///
    /// let builder = Server::builder()
    ///     .middleware(|req, _| {
    ///         let token = req.header("Authorization").unwrap_or_default().to_string();
    ///         req.insert_local("token", token);
    ///         Ok(())
    ///     }, 0)
    ///     .middleware(|_, resp| {
    ///         resp.header("X-Frame-Options", "DENY");
    ///         Ok(())
    ///     }, 10);
    /// ```
    #[inline(always)]
    pub fn middleware<F>(mut self, handler: F, priority: i32) -> Self
    where
        F: Fn(&mut Request, &mut Response) -> std::result::Result<(), HandlerError>
            + Send
            + Sync
            + 'static,
    {
        self.router.add_middleware(Arc::new(handler), priority);
        self
    }

    /// Configures the worker pool and request admission.
    ///
    /// # Examples
    ///
    /// ```
    /// use relay_web::{Server, limits::ServerLimits};
    ///
    /// let server = Server::builder()
    ///     .server_limits(ServerLimits {
    ///         // Your changes
    ///         worker_threads: 16,
    ///         json_errors: true,
    ///         ..ServerLimits::default() // Required line
    ///     })
    ///     .build();
    /// ```
    #[inline(always)]
    pub fn server_limits(mut self, limits: ServerLimits) -> Self {
        self.server_limits = Some(limits);
        self
    }

    /// Configures per-connection I/O.
    ///
    /// # Examples
    ///
    /// ```
    /// use relay_web::{Server, limits::ConnLimits};
    /// use std::time::Duration;
    ///
    /// let server = Server::builder()
    ///     .connection_limits(ConnLimits {
    ///         socket_write_timeout: Duration::from_secs(10),
    ///         idle_timeout: Some(Duration::from_secs(60)),
    ///         ..ConnLimits::default()
    ///     })
    ///     .build();
    /// ```
    #[inline(always)]
    pub fn connection_limits(mut self, limits: ConnLimits) -> Self {
        self.connection_limits = Some(limits);
        self
    }

    /// Configures the workers' serialization buffers.
    #[inline(always)]
    pub fn response_limits(mut self, limits: RespLimits) -> Self {
        self.response_limits = Some(limits);
        self
    }

    /// Sets the number of worker threads.
    ///
    /// Shortcut for [`ServerLimits::worker_threads`].
    #[inline(always)]
    pub fn threads(mut self, count: usize) -> Self {
        self.server_limits
            .get_or_insert_with(ServerLimits::default)
            .worker_threads = count;
        self
    }

    /// Sets the largest accepted request in bytes, `0` for no limit.
    ///
    /// Shortcut for [`ServerLimits::max_request_size`].
    #[inline(always)]
    pub fn max_request_size(mut self, bytes: usize) -> Self {
        self.server_limits
            .get_or_insert_with(ServerLimits::default)
            .max_request_size = bytes;
        self
    }

    /// Finalizes the builder and constructs a [`Server`] instance.
    #[inline]
    pub fn build(self) -> Server {
        Server {
            router: self.router,
            server_limits: self.server_limits.unwrap_or_default(),
            conn_limits: self.connection_limits.unwrap_or_default(),
            resp_limits: self.response_limits.unwrap_or_default(),
        }
    }
}

impl fmt::Debug for ServerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerBuilder")
            .field("router", &self.router)
            .finish_non_exhaustive()
    }
}

/// Parses `host:port`, `:port` and `[v6]:port`, resolving host names.
pub(crate) fn resolve_address(addr: &str) -> Result<SocketAddr> {
    let invalid = || Error::InvalidAddress(addr.to_string());

    let (host, port) = addr.rsplit_once(':').ok_or_else(invalid)?;
    let port: u16 = port.parse().map_err(|_| invalid())?;

    if host.is_empty() {
        return Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port));
    }

    if let Some(inner) = host.strip_prefix('[') {
        let ip: Ipv6Addr = inner
            .strip_suffix(']')
            .and_then(|ip| ip.parse().ok())
            .ok_or_else(invalid)?;
        return Ok(SocketAddr::new(IpAddr::V6(ip), port));
    }

    // Bare IPv6 needs brackets
    if host.contains(':') || host.contains(char::is_whitespace) {
        return Err(invalid());
    }

    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }

    (host, port)
        .to_socket_addrs()
        .ok()
        .and_then(|mut addrs| addrs.next())
        .ok_or_else(invalid)
}

fn open_listener(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;

    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;
    socket.set_nonblocking(true)?;

    Ok(socket.into())
}
