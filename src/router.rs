//! Route table and priority-ordered middleware chain.

use crate::{
    errors::{Error, HandlerError},
    Method, Request, Response,
};
use std::{collections::HashMap, fmt, sync::Arc};

/// Request handler and middleware capability.
///
/// Implemented for every `Fn(&mut Request, &mut Response) -> Result<(), HandlerError>`
/// closure, so most handlers are plain closures or functions. Returning `Err`
/// (or panicking) makes the server answer `500 Internal Server Error` and
/// close the connection.
///
/// # Examples
///
/// Closure handler:
/// ```
/// use relay_web::{Handler, HandlerError, Request, Response};
///
/// fn hello(req: &mut Request, resp: &mut Response) -> Result<(), HandlerError> {
///     let name = req.param("name").unwrap_or("world");
///     resp.text(format!("Hello, {name}!"));
///     Ok(())
/// }
///
/// fn assert_handler<H: Handler>(_: H) {}
/// assert_handler(hello);
/// ```
/// Handler with shared state:
/// ```
/// use relay_web::{Handler, HandlerError, Request, Response};
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// struct Counter(AtomicUsize);
///
/// impl Handler for Counter {
///     fn handle(&self, _: &mut Request, resp: &mut Response) -> Result<(), HandlerError> {
///         let count = self.0.fetch_add(1, Ordering::Relaxed) + 1;
///         resp.body(count);
///         Ok(())
///     }
/// }
/// ```
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, request: &mut Request, response: &mut Response) -> Result<(), HandlerError>;
}

impl<F> Handler for F
where
    F: Fn(&mut Request, &mut Response) -> Result<(), HandlerError> + Send + Sync + 'static,
{
    #[inline(always)]
    fn handle(&self, request: &mut Request, response: &mut Response) -> Result<(), HandlerError> {
        self(request, response)
    }
}

pub(crate) type SharedHandler = Arc<dyn Handler>;

pub(crate) struct RouteEntry {
    method: Method,
    handler: SharedHandler,
}

#[derive(Clone)]
pub(crate) struct MiddlewareEntry {
    pub(crate) handler: SharedHandler,
    priority: i32,
}

/// Outcome of a route lookup.
pub(crate) enum Lookup<'a> {
    Found(&'a dyn Handler),
    /// The path is registered, but not for this method.
    MethodNotAllowed,
    NotFound,
}

/// Routes keyed by exact, case-sensitive path, plus the middleware chain.
///
/// Populated by the builder and read-only while serving.
pub(crate) struct Router {
    routes: HashMap<String, Vec<RouteEntry>>,
    middleware: Arc<[MiddlewareEntry]>,
}

impl Router {
    pub(crate) fn new() -> Self {
        Self {
            routes: HashMap::new(),
            middleware: Arc::from(Vec::new()),
        }
    }

    /// Registers `handler` for `method` and `path`.
    ///
    /// Fails with [`Error::DuplicateRoute`] if the pair is already taken.
    /// The same path may be registered under different methods.
    pub(crate) fn register(
        &mut self,
        method: Method,
        path: impl Into<String>,
        handler: SharedHandler,
    ) -> Result<(), Error> {
        let path = path.into();
        let entries = self.routes.entry(path.clone()).or_default();

        if entries.iter().any(|entry| entry.method == method) {
            return Err(Error::DuplicateRoute { method, path });
        }

        entries.push(RouteEntry { method, handler });
        Ok(())
    }

    pub(crate) fn find(&self, method: Method, path: &str) -> Lookup<'_> {
        let Some(entries) = self.routes.get(path) else {
            return Lookup::NotFound;
        };

        match entries.iter().find(|entry| entry.method == method) {
            Some(entry) => Lookup::Found(entry.handler.as_ref()),
            None => Lookup::MethodNotAllowed,
        }
    }

    /// Adds a middleware. Lower priorities run first, equal priorities run
    /// in registration order.
    ///
    /// The active list is rebuilt and swapped, never mutated in place.
    pub(crate) fn add_middleware(&mut self, handler: SharedHandler, priority: i32) {
        let mut chain = self.middleware.to_vec();
        chain.push(MiddlewareEntry { handler, priority });
        // `sort_by_key` is stable
        chain.sort_by_key(|entry| entry.priority);

        self.middleware = chain.into();
    }

    #[inline]
    pub(crate) fn middleware(&self) -> &[MiddlewareEntry] {
        &self.middleware
    }

    pub(crate) fn route_count(&self) -> usize {
        self.routes.values().map(Vec::len).sum()
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let routes: Vec<_> = self
            .routes
            .iter()
            .flat_map(|(path, entries)| entries.iter().map(move |e| format!("{} {path}", e.method)))
            .collect();

        f.debug_struct("Router")
            .field("routes", &routes)
            .field("middleware", &self.middleware.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn text(value: &'static str) -> SharedHandler {
        Arc::new(move |_: &mut Request, resp: &mut Response| -> Result<(), HandlerError> {
            resp.text(value);
            Ok(())
        })
    }

    fn run(lookup: Lookup<'_>) -> Option<Vec<u8>> {
        let Lookup::Found(handler) = lookup else {
            return None;
        };

        let mut req = Request::parse(b"GET / HTTP/1.1\r\n\r\n").unwrap();
        let mut resp = Response::new();
        handler.handle(&mut req, &mut resp).unwrap();
        Some(resp.content().to_vec())
    }

    #[test]
    fn duplicate_routes() {
        let mut router = Router::new();

        assert!(router.register(Method::Get, "/users", text("list")).is_ok());
        assert!(router.register(Method::Post, "/users", text("create")).is_ok());

        let err = router.register(Method::Get, "/users", text("again")).unwrap_err();
        assert!(matches!(
            err,
            Error::DuplicateRoute { method: Method::Get, ref path } if path == "/users"
        ));
        assert_eq!(err.to_string(), "route GET /users is already registered");
        assert_eq!(router.route_count(), 2);

        // The first registration is kept
        assert_eq!(run(router.find(Method::Get, "/users")), Some(b"list".to_vec()));
    }

    #[test]
    fn lookup() {
        let mut router = Router::new();
        router.register(Method::Get, "/users", text("list")).unwrap();
        router.register(Method::Delete, "/users/1", text("delete")).unwrap();

        #[rustfmt::skip]
        let cases = [
            (Method::Get, "/users", Some(&b"list"[..])),
            (Method::Delete, "/users/1", Some(&b"delete"[..])),
            (Method::Post, "/users", None),
            (Method::Get, "/users/1", None),
            (Method::Get, "/Users", None),
            (Method::Get, "/users/", None),
            (Method::Get, "/missing", None),
        ];

        for (method, path, expected) in cases {
            assert_eq!(
                run(router.find(method, path)).as_deref(),
                expected,
                "{method} {path}"
            );
        }

        assert!(matches!(router.find(Method::Post, "/users"), Lookup::MethodNotAllowed));
        assert!(matches!(router.find(Method::Get, "/users/1"), Lookup::MethodNotAllowed));
        assert!(matches!(router.find(Method::Get, "/Users"), Lookup::NotFound));
        assert!(matches!(router.find(Method::Get, "/missing"), Lookup::NotFound));
    }

    #[test]
    fn middleware_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut router = Router::new();

        for (name, priority) in [("c", 10), ("a", -5), ("d", 10), ("b", 0), ("e", 10)] {
            let order = order.clone();
            router.add_middleware(
                Arc::new(move |_: &mut Request, _: &mut Response| -> Result<(), HandlerError> {
                    order.lock().unwrap().push(name);
                    Ok(())
                }),
                priority,
            );
        }

        let mut req = Request::parse(b"GET / HTTP/1.1\r\n\r\n").unwrap();
        let mut resp = Response::new();
        for entry in router.middleware() {
            entry.handler.handle(&mut req, &mut resp).unwrap();
        }

        assert_eq!(*order.lock().unwrap(), ["a", "b", "c", "d", "e"]);
    }

    #[test]
    fn chain_is_replaced() {
        let mut router = Router::new();
        router.add_middleware(text("first"), 1);

        let before = router.middleware.clone();
        router.add_middleware(text("second"), 0);

        assert_eq!(before.len(), 1);
        assert_eq!(router.middleware().len(), 2);
        assert!(!Arc::ptr_eq(&before, &router.middleware));
    }
}
