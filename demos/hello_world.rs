use tracing_subscriber::EnvFilter;
use wirehttp::{HttpServer, StatusCode};

#[tokio::main]
async fn main() -> wirehttp::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    HttpServer::builder()
        .bind("127.0.0.1:8080")
        .get("/", |_, resp| {
            resp.content_type("text/plain").body("Hello, world!");
            Ok(())
        })
        .get("/hello/:name", |req, resp| {
            let name = req.path_param("name").unwrap_or("stranger");
            resp.content_type("text/plain").body(format!("Hello, {name}!"));
            Ok(())
        })
        .post("/echo", |req, resp| {
            resp.content_type("application/octet-stream").body(req.body().to_vec());
            Ok(())
        })
        .fallback(|req, resp| {
            resp.status(StatusCode::NotFound)
                .content_type("application/json")
                .body(format!(r#"{{"error": "no route", "path": {:?}}}"#, req.path()));
            Ok(())
        })
        .build()?
        .launch()
        .await
}
