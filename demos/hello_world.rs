use relay_web::{Server, StatusCode};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> relay_web::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relay_web=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Server::builder()
        .get("/", |_, resp| {
            resp.text("Hello, world!");
            Ok(())
        })?
        .get("/greet", |req, resp| {
            let name = req.param("name").unwrap_or("stranger");
            resp.status(StatusCode::Ok)
                .html(format!("<h1>Hello, {name}!</h1>"));
            Ok(())
        })?
        .build()
        .listen("127.0.0.1:8080")
}
