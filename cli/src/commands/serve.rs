use docindex_server::{AppState, router};
use tracing::info;

use super::build_coordinator;
use crate::config::AppConfig;

pub async fn handle_serve(
    config: &AppConfig,
    bind: Option<String>,
    rebuild_on_start: bool,
) -> Result<(), String> {
    let bind = bind.unwrap_or_else(|| config.bind.clone());
    let coordinator = build_coordinator(config);
    let broadcaster = coordinator.broadcaster().clone();

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .map_err(|e| format!("Failed to bind {}: {}", bind, e))?;

    info!(bind = %bind, root = %config.root.display(), "docindex server listening");
    println!("docindex server started");
    println!("Document root: {}", config.root.display());
    println!("Events: http://{bind}/v1/events");

    if rebuild_on_start {
        let session = coordinator
            .start_rebuild()
            .map_err(|e| format!("Failed to start rebuild: {}", e))?;
        println!("Rebuild {} started", session.id());
    }

    let app = router(AppState::new(coordinator));

    tokio::select! {
        result = axum::serve(listener, app) => {
            broadcaster.close();
            if let Err(error) = result {
                return Err(format!("Server error: {error}"));
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested");
            broadcaster.close();
        }
    }

    Ok(())
}
