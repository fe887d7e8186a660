use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use axum::http::{HeaderValue, Method};
use axum::routing::{get, post};
use libcoderoom::{Orchestrator, SessionRegistry};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{debug, info};

use crate::config::ServerConfig;
use crate::{api, connection};

const MIN_SWEEP_PERIOD: Duration = Duration::from_secs(1);
const MAX_SWEEP_PERIOD: Duration = Duration::from_secs(300);

/// Shared application state.
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub orchestrator: Orchestrator,
}

impl AppState {
    pub fn from_config(config: &ServerConfig) -> Result<Self> {
        Ok(Self {
            registry: Arc::new(SessionRegistry::new(config.registry_config())),
            orchestrator: Orchestrator::new(config.exec_config()?),
        })
    }
}

pub fn router(state: Arc<AppState>, allow_origins: &[String]) -> Result<Router> {
    Ok(Router::new()
        .route("/api/health", get(api::health))
        .route("/api/sessions", post(api::create_session))
        .route("/api/sessions/{id}", get(api::session_info))
        .route("/api/execute", post(api::execute))
        .route("/ws", get(connection::ws_handler))
        .layer(build_cors(allow_origins)?)
        .with_state(state))
}

pub fn build_cors(origins: &[String]) -> Result<CorsLayer> {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);
    if origins.iter().any(|o| o == "*") {
        return Ok(cors.allow_origin(Any));
    }

    let mut headers = Vec::with_capacity(origins.len());
    for origin in origins {
        headers.push(
            HeaderValue::from_str(origin)
                .with_context(|| format!("invalid allowed origin: {origin}"))?,
        );
    }
    Ok(cors.allow_origin(AllowOrigin::list(headers)))
}

/// Serve `app` on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, app: Router, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("http server failed")
}

/// Periodically drop sessions that were created but never joined.
pub fn spawn_session_sweeper(registry: Arc<SessionRegistry>, ttl: Duration) -> JoinHandle<()> {
    let period = (ttl / 4).clamp(MIN_SWEEP_PERIOD, MAX_SWEEP_PERIOD);
    debug!(ttl_secs = ttl.as_secs(), period_secs = period.as_secs(), "session sweeper started");
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            registry.sweep_unjoined(ttl).await;
        }
    })
}

pub async fn run(config: ServerConfig) -> Result<()> {
    let state = Arc::new(AppState::from_config(&config)?);
    if let Some(ttl) = config.idle_ttl() {
        spawn_session_sweeper(Arc::clone(&state.registry), ttl);
    }
    let app = router(state, &config.allow_origins)?;

    let listener = TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("failed to bind {}", config.listen))?;
    info!(
        "coderoom-server listening on http://{} (exec timeout {}s, origins {:?})",
        listener.local_addr()?,
        config.execution.timeout_secs,
        config.allow_origins
    );

    serve(listener, app, async {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown requested");
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sweeper_expires_unjoined_sessions() {
        let registry = Arc::new(SessionRegistry::default());
        let abandoned = registry.create_session();
        let joined = registry.create_session();
        let _member = registry.join(&joined, "a").await.expect("join session");

        let sweeper = spawn_session_sweeper(Arc::clone(&registry), Duration::from_secs(1));
        let mut expired = false;
        for _ in 0..40 {
            if !registry.session_exists(&abandoned) {
                expired = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        sweeper.abort();

        assert!(expired, "unjoined session outlived its ttl");
        assert!(registry.session_exists(&joined));
    }

    #[test]
    fn cors_rejects_malformed_origin() {
        assert!(build_cors(&["http://ok.example".to_string()]).is_ok());
        assert!(build_cors(&["bad\norigin".to_string()]).is_err());
    }
}
