//! Echoes decoded form fields and uploaded files.
//!
//! ```text
//! curl -d 'name=Ann&city=Oslo' http://127.0.0.1:8080/form
//! curl -F note=hi -F file=@Cargo.toml http://127.0.0.1:8080/upload
//! ```

use relay_web::{Body, Server, StatusCode};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Serialize)]
struct Part<'a> {
    name: &'a str,
    filename: Option<&'a str>,
    content_type: Option<&'a str>,
    size: usize,
}

fn main() -> relay_web::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relay_web=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Server::builder()
        .max_request_size(32 * 1024 * 1024)
        .post("/form", |req, resp| {
            let Some(form) = req.body().form() else {
                resp.status(StatusCode::UnsupportedMediaType)
                    .text("expected application/x-www-form-urlencoded");
                return Ok(());
            };

            let fields: Vec<_> = form.iter().collect();
            resp.json(&fields)?;
            Ok(())
        })?
        .post("/upload", |req, resp| {
            let Body::Multipart(entries) = req.body() else {
                resp.status(StatusCode::UnsupportedMediaType)
                    .text("expected multipart/form-data");
                return Ok(());
            };

            let parts: Vec<_> = entries
                .values()
                .map(|entry| Part {
                    name: entry.name(),
                    filename: entry.filename(),
                    content_type: entry.content_type(),
                    size: entry.content().len(),
                })
                .collect();
            resp.status(StatusCode::Created).json(&parts)?;
            Ok(())
        })?
        .get("/source", |_, resp| {
            resp.file("demos/upload.rs")?;
            Ok(())
        })?
        .build()
        .listen(":8080")
}
