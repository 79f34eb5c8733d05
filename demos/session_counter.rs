use std::{sync::Arc, time::Duration};
use tracing_subscriber::EnvFilter;
use wirehttp::{HttpServer, MemorySessionStorage, SessionConfig, SessionManager};

#[tokio::main]
async fn main() -> wirehttp::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let sessions = Arc::new(SessionManager::new(
        Box::new(MemorySessionStorage::new()),
        SessionConfig {
            ttl: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(30),
            ..SessionConfig::default()
        },
    ));

    let counter = sessions.clone();
    let logout = sessions.clone();

    HttpServer::builder()
        .bind("127.0.0.1:8080")
        .session_manager(sessions)
        .get("/", move |req, resp| {
            let mut session = counter.get_session(req, resp);

            let visits = session
                .get("visits")
                .and_then(|value| value.parse::<u64>().ok())
                .unwrap_or(0)
                + 1;
            session.set("visits", visits.to_string());
            counter.update_session(&session);

            resp.content_type("text/plain")
                .body(format!("Visit #{visits} in session {}", session.id()));
            Ok(())
        })
        .post("/logout", move |req, resp| {
            let session = logout.get_session(req, resp);
            logout.destroy_session(session.id());

            resp.content_type("text/plain").body("Bye!");
            Ok(())
        })
        .build()?
        .launch()
        .await
}
