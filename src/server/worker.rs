use crate::{
    errors::HandlerError,
    limits::{ConnLimits, RespLimits, ServerLimits},
    router::{Lookup, Router},
    server::connection::{writer::write_bytes, Task, Verdict},
    Request, Response, StatusCode,
};
use crossbeam::channel::Receiver;
use std::{
    any::Any,
    io,
    net::Shutdown,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    thread::{self, JoinHandle},
    time::SystemTime,
};
use tracing::{debug, error, warn};

/// Read-only state shared by all workers.
pub(crate) struct WorkerContext {
    pub(crate) router: Router,
    pub(crate) server_limits: ServerLimits,
    pub(crate) conn_limits: ConnLimits,
    pub(crate) resp_limits: RespLimits,
}

/// Fixed set of worker threads fed from one queue.
pub(crate) struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Starts `worker_threads` workers (at least one).
    ///
    /// Workers run until every sender of the queue is dropped.
    pub(crate) fn spawn(ctx: Arc<WorkerContext>, queue: Receiver<Task>) -> io::Result<Self> {
        let count = ctx.server_limits.worker_threads.max(1);
        let mut handles = Vec::with_capacity(count);

        for id in 0..count {
            let mut worker = Worker::new(ctx.clone());
            let queue = queue.clone();

            let handle = thread::Builder::new()
                .name(format!("relay-worker-{id}"))
                .spawn(move || {
                    for task in queue.iter() {
                        worker.process(task);
                    }
                })?;
            handles.push(handle);
        }

        Ok(Self { handles })
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.handles.len()
    }

    pub(crate) fn join(self) {
        for handle in self.handles {
            if handle.join().is_err() {
                warn!("worker thread terminated abnormally");
            }
        }
    }
}

/// One worker with its own serialization buffer.
pub(crate) struct Worker {
    ctx: Arc<WorkerContext>,
    buffer: Vec<u8>,
}

impl Worker {
    pub(crate) fn new(ctx: Arc<WorkerContext>) -> Self {
        Self {
            buffer: Vec::with_capacity(ctx.resp_limits.default_capacity),
            ctx,
        }
    }

    /// Answers one task and reports back to the connection.
    pub(crate) fn process(&mut self, task: Task) {
        let Task {
            raw,
            error,
            mut writer,
            peer,
            reply,
        } = task;

        let mut response = match error {
            Some(status) => self.error(status),
            None => self.respond(&raw),
        };

        self.ctx.resp_limits.reset(&mut self.buffer);
        response.serialize_into(
            &mut self.buffer,
            &self.ctx.server_limits.server_name,
            SystemTime::now(),
        );

        let written = write_bytes(
            &mut writer,
            &self.buffer,
            self.ctx.conn_limits.socket_write_timeout,
            &self.ctx.server_limits.wait_strategy,
        );

        let verdict = match written {
            Ok(()) if !response.will_close() => Verdict::KeepAlive(writer),
            Ok(()) => {
                let _ = writer.shutdown(Shutdown::Both);
                Verdict::Close
            }
            Err(e) => {
                warn!(%peer, error = %e, "response write failed");
                let _ = writer.shutdown(Shutdown::Both);
                Verdict::Close
            }
        };

        // The connection may already be gone
        let _ = reply.send(verdict);
    }

    /// Runs the request pipeline: parse, route, middleware, handler.
    pub(crate) fn respond(&self, raw: &[u8]) -> Response {
        let mut request = match Request::parse(raw) {
            Ok(request) => request,
            Err(e) => {
                debug!(error = %e, "rejecting malformed request");
                return self.error(e.status());
            }
        };

        if !request.method().is_supported() {
            return self.error(StatusCode::NotImplemented);
        }

        let router = &self.ctx.router;
        let handler = match router.find(request.method(), request.path()) {
            Lookup::Found(handler) => handler,
            Lookup::MethodNotAllowed => return self.error(StatusCode::MethodNotAllowed),
            Lookup::NotFound => return self.error(StatusCode::NotFound),
        };

        let mut response = Response::new();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| -> Result<(), HandlerError> {
            for entry in router.middleware() {
                entry.handler.handle(&mut request, &mut response)?;
            }
            handler.handle(&mut request, &mut response)
        }));

        match outcome {
            Ok(Ok(())) => {
                if request.wants_close() {
                    response.close();
                }
                response
            }
            Ok(Err(e)) => {
                error!(
                    method = %request.method(),
                    path = request.path(),
                    error = %e,
                    "request handler failed"
                );
                self.error(StatusCode::InternalServerError)
            }
            Err(payload) => {
                error!(
                    method = %request.method(),
                    path = request.path(),
                    panic = panic_message(payload.as_ref()),
                    "request handler panicked"
                );
                self.error(StatusCode::InternalServerError)
            }
        }
    }

    #[inline]
    fn error(&self, status: StatusCode) -> Response {
        let limits = &self.ctx.server_limits;
        Response::error(status, &limits.server_name, limits.json_errors)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}
