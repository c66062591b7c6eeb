use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use axum::body::Body;
use axum::response::IntoResponse;
use http::{HeaderValue, StatusCode};
use tower_governor::governor::GovernorConfigBuilder;
use tower_governor::key_extractor::SmartIpKeyExtractor;
use tower_governor::{GovernorError, GovernorLayer};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod db;
mod error;
mod middleware;
mod realtime;
mod routes;
mod services;
#[cfg(test)]
mod test_support;

use config::{Config, Environment};
use error::AppError;
use realtime::{fanout::redact_redis_url, Broadcaster, RedisFanout, RoomHub};
use services::init;

pub struct AppState {
    pub db: sqlx::SqlitePool,
    pub config: Config,
    /// Room-scoped publisher; the Redis fan-out in production.
    pub broadcaster: Arc<dyn Broadcaster>,
    /// Connections attached to this process.
    pub hub: Arc<RoomHub>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "ethiosafeguard=debug,tower_http=debug".into());
    if config.server.environment == Environment::Production {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    tracing::info!("Starting EthioSafeguard backend");

    let pool = init::init_db(&config).await?;
    init::bootstrap_admin(&pool, &config).await?;

    // Shutdown notifier for the fan-out subscriber and std threads
    let (shutdown_tx, _shutdown_rx) = tokio::sync::broadcast::channel::<()>(1);
    let thread_shutdown = Arc::new(AtomicBool::new(false));

    // The broker must be reachable before the listener is bound.
    let hub = Arc::new(RoomHub::new());
    tracing::info!("Connecting to broker: {}", redact_redis_url(&config.broker.url));
    let (fanout, mut subscriber) =
        RedisFanout::connect(&config.broker.url, hub.clone(), shutdown_tx.subscribe())
            .await
            .map_err(|e| anyhow::anyhow!("Failed to connect to Redis: {}", e))?;

    let app_state = Arc::new(AppState {
        db: pool,
        config: config.clone(),
        broadcaster: Arc::new(fanout),
        hub,
    });

    // Per-IP limiter for the public auth endpoints
    let mut auth_builder = GovernorConfigBuilder::default();
    auth_builder.per_second(config.rate_limit.auth_per_second.into());
    auth_builder.burst_size(config.rate_limit.auth_burst);
    auth_builder.key_extractor(SmartIpKeyExtractor);
    auth_builder.error_handler(|error: GovernorError| -> http::Response<Body> {
        match error {
            GovernorError::TooManyRequests { wait_time, headers } => {
                let mut resp = AppError::RateLimited.into_response();
                if let Some(hmap) = headers {
                    for (name, value) in hmap.iter() {
                        resp.headers_mut().append(name.clone(), value.clone());
                    }
                }
                resp.headers_mut()
                    .insert(http::header::RETRY_AFTER, HeaderValue::from(wait_time));
                resp
            }
            GovernorError::UnableToExtractKey => {
                let body = serde_json::json!({
                    "error": {
                        "code": "BAD_REQUEST",
                        "message": "Unable to determine client IP for rate limiting"
                    }
                })
                .to_string();

                let mut resp = http::Response::new(Body::from(body));
                *resp.status_mut() = StatusCode::BAD_REQUEST;
                resp.headers_mut().insert(
                    http::header::CONTENT_TYPE,
                    HeaderValue::from_static("application/json"),
                );
                resp
            }
            GovernorError::Other { code, msg, headers } => {
                let body = msg.unwrap_or_else(|| "Rate limiting error".to_string());
                let mut resp = http::Response::new(Body::from(body));
                *resp.status_mut() = StatusCode::from_u16(code.as_u16())
                    .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                if let Some(hmap) = headers {
                    for (name, value) in hmap.iter() {
                        resp.headers_mut().append(name.clone(), value.clone());
                    }
                }
                resp
            }
        }
    });

    let auth_gov_conf = Arc::new(
        auth_builder
            .finish()
            .ok_or_else(|| anyhow::anyhow!("Failed to build auth governor config"))?,
    );

    // Background cleanup for auth limiter storage
    let auth_cleaner = {
        let limiter = auth_gov_conf.limiter().clone();
        let interval = Duration::from_secs(60);
        let flag = thread_shutdown.clone();
        std::thread::spawn(move || {
            let tick = Duration::from_secs(1);
            loop {
                for _ in 0..interval.as_secs() {
                    if flag.load(Ordering::SeqCst) {
                        tracing::info!("Auth rate limiter cleanup thread exiting");
                        return;
                    }
                    std::thread::sleep(tick);
                }
                tracing::debug!("auth rate limiter size: {}", limiter.len());
                limiter.retain_recent();
            }
        })
    };

    let auth_rate_layer = GovernorLayer {
        config: auth_gov_conf.clone(),
    };

    let cors_origin = config
        .server
        .cors_origin
        .parse::<HeaderValue>()
        .map_err(|_| anyhow::anyhow!("Invalid CORS_ORIGIN: {}", config.server.cors_origin))?;

    let app = routes::router(
        app_state.clone(),
        routes::auth::router().layer(auth_rate_layer),
    )
    .layer(axum::middleware::from_fn(
        middleware::security_headers::security_headers,
    ))
    .layer(TraceLayer::new_for_http())
    .layer(
        CorsLayer::new()
            .allow_origin(cors_origin)
            .allow_methods([
                http::Method::GET,
                http::Method::POST,
                http::Method::PUT,
                http::Method::PATCH,
                http::Method::DELETE,
                http::Method::OPTIONS,
            ])
            .allow_headers([
                http::header::CONTENT_TYPE,
                http::header::AUTHORIZATION,
                http::header::ACCEPT,
            ])
            .allow_credentials(true),
    );

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    let server_fut = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    );

    let mut outcome = Ok(());
    tokio::select! {
        res = server_fut => {
            if let Err(e) = res {
                tracing::error!("Server error: {}", e);
                outcome = Err(e.into());
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("Shutdown signal received; no longer accepting connections");
        }
        res = &mut subscriber => {
            tracing::error!("Fan-out subscriber stopped: {:?}", res);
            outcome = Err(anyhow::anyhow!("Lost the Redis fan-out subscription"));
        }
    }

    let _ = shutdown_tx.send(());
    thread_shutdown.store(true, Ordering::SeqCst);

    let shutdown_wait = Duration::from_secs(15);
    tracing::info!(
        "Waiting up to {}s for background tasks to exit",
        shutdown_wait.as_secs()
    );
    if !subscriber.is_finished() {
        let _ = tokio::time::timeout(shutdown_wait, &mut subscriber).await;
    }

    if let Err(e) = auth_cleaner.join() {
        tracing::warn!("Auth cleanup thread join failed: {:?}", e);
    }

    tracing::info!("Shutdown complete");
    outcome
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to bind SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
