//! relay_web - Embeddable HTTP/1.1 server engine
//!
//! A small server library that multiplexes many keep-alive connections over
//! one readiness-driven I/O thread and runs request handling on a fixed pool
//! of worker threads.
//!
//! # Architecture
//!
//! - **Multiplexer** - a single-threaded loop accepts connections and reads
//!   every socket without blocking, collecting bytes until a full request
//!   (head plus `Content-Length` body) has arrived.
//! - **Worker pool** - each complete request is handed over as an immutable
//!   byte snapshot. A worker parses it, looks up the route, runs the
//!   middleware chain and the handler, then serializes and writes the
//!   response with its own reusable buffer.
//! - **Lifecycle** - connections stay open by default. They close when the
//!   client sends `Connection: close`, on any error response, or when the
//!   request exceeds [`max_request_size`](limits::ServerLimits::max_request_size)
//!   (answered with `413`).
//!
//! # Protocol Support
//!
//! - `HTTP/1.1` only; other versions are answered with `505`
//! - `GET`, `HEAD`, `POST`, `PUT`, `DELETE`, `PATCH`, `OPTIONS`;
//!   `CONNECT` and `TRACE` are recognized and answered with `501`
//! - Bodies framed by `Content-Length`; no chunked transfer-encoding
//! - `application/x-www-form-urlencoded` and `multipart/form-data` bodies
//!   are decoded automatically, see [`Body`]
//!
//! # Examples
//!
//! Quick start:
//! ```no_run
//! use relay_web::Server;
//!
//! fn main() -> relay_web::Result<()> {
//!     Server::builder()
//!         .get("/", |_, resp| {
//!             resp.text("Hello World!");
//!             Ok(())
//!         })?
//!         .build()
//!         .listen("127.0.0.1:8080")
//! }
//! ```
//! Something in between :) :
//! ```no_run
//! use relay_web::{Body, Server, StatusCode};
//!
//! fn main() -> relay_web::Result<()> {
//!     Server::builder()
//!         .threads(8)
//!         .middleware(|req, resp| {
//!             resp.header("X-Served-By", "relay_web");
//!             req.insert_local("started", std::time::Instant::now());
//!             Ok(())
//!         }, 0)
//!         .get("/api/user", |req, resp| {
//!             match req.param("name") {
//!                 Some(name) => resp.json(&[("name", name)])?,
//!                 None => resp.status(StatusCode::BadRequest).text("missing name"),
//!             };
//!             Ok(())
//!         })?
//!         .post("/api/upload", |req, resp| {
//!             let Body::Multipart(parts) = req.body() else {
//!                 resp.status(StatusCode::UnsupportedMediaType);
//!                 return Ok(());
//!             };
//!             resp.text(format!("{} parts", parts.len()));
//!             Ok(())
//!         })?
//!         .get("/old", |_, resp| {
//!             resp.redirect("/api/user", StatusCode::MovedPermanently)?;
//!             Ok(())
//!         })?
//!         .build()
//!         .listen(":8080")
//! }
//! ```
//! Advanced configuration:
//! ```no_run
//! use relay_web::{Server, limits::{ConnLimits, RespLimits, ServerLimits}};
//! use std::time::Duration;
//!
//! fn main() -> relay_web::Result<()> {
//!     Server::builder()
//!         .server_limits(ServerLimits {
//!             worker_threads: 16,
//!             max_request_size: 64 * 1024 * 1024, // Large uploads
//!             json_errors: true,
//!             ..ServerLimits::default()
//!         })
//!         .connection_limits(ConnLimits {
//!             idle_timeout: Some(Duration::from_secs(30)),
//!             ..ConnLimits::default()
//!         })
//!         .response_limits(RespLimits {
//!             max_capacity: 64 * 1024,
//!             ..RespLimits::default()
//!         })
//!         .get("/", |_, resp| {
//!             resp.html("<h1>Hello</h1>");
//!             Ok(())
//!         })?
//!         .build()
//!         .listen("[::1]:8080")
//! }
//! ```
//!
//! # Logging
//!
//! The crate logs through [`tracing`] and never installs a subscriber.
//! Handler failures and panics are reported at `error` level with the
//! request method and path; transport problems at `warn`; connection
//! open/close at `debug`.

pub(crate) mod http {
    pub(crate) mod headers;
    pub(crate) mod multipart;
    pub mod query;
    pub(crate) mod request;
    pub(crate) mod response;
    pub(crate) mod types;
}
pub(crate) mod server {
    pub(crate) mod connection;
    pub(crate) mod multiplexer;
    pub(crate) mod server_impl;
    pub(crate) mod worker;
}
pub(crate) mod errors;
pub mod limits;
pub(crate) mod router;

pub use crate::{
    errors::{Error, HandlerError, ParseError, Result},
    http::{
        headers::FieldMap,
        multipart::{MultipartEntry, MultipartError},
        query,
        request::{Body, Request},
        response::{
            write::{BodyWriter, WriteBuffer},
            Response,
        },
        types::{Method, StatusClass, StatusCode},
    },
    router::Handler,
    server::server_impl::{Listening, Server, ServerBuilder, StopHandle},
};
