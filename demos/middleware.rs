//! Middleware chain passing data to handlers through request locals.

use relay_web::{Server, StatusCode};
use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Instant,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

static REQUEST_ID: AtomicU64 = AtomicU64::new(1);

struct User(String);

fn main() -> relay_web::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relay_web=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let listening = Server::builder()
        .threads(2)
        // Runs first
        .middleware(
            |req, resp| {
                let id = REQUEST_ID.fetch_add(1, Ordering::Relaxed);
                req.insert_local("started", Instant::now());
                resp.header("X-Request-Id", id);
                Ok(())
            },
            -10,
        )
        .middleware(
            |req, _| {
                if let Some(name) = req.header("X-User") {
                    let user = User(name.to_string());
                    req.insert_local("user", user);
                }
                Ok(())
            },
            0,
        )
        .get("/me", |req, resp| {
            match req.local::<User>("user") {
                Some(User(name)) => resp.text(format!("signed in as {name}")),
                None => resp.status(StatusCode::Unauthorized).text("send an X-User header"),
            };
            Ok(())
        })?
        .get("/slow", |req, resp| {
            std::thread::sleep(std::time::Duration::from_millis(250));
            let elapsed = req
                .local::<Instant>("started")
                .map(|started| started.elapsed().as_millis())
                .unwrap_or_default();
            resp.text(format!("took {elapsed} ms"));
            Ok(())
        })?
        .get("/fail", |_, _| {
            let value: u32 = "not a number".parse()?;
            println!("unreachable: {value}");
            Ok(())
        })?
        .build()
        .bind("127.0.0.1:8080")?;

    let stop = listening.stop_handle();
    std::thread::spawn(move || {
        // Stop after one hour
        std::thread::sleep(std::time::Duration::from_secs(3600));
        stop.stop();
    });

    tracing::info!(address = %listening.local_addr(), "try GET /me with X-User");
    listening.run()
}
