use scc_auth::{
    config::AuthConfig,
    db, handlers,
    services::{create_email_service, spawn_prune_worker, EmailService, EtLabClient},
    AppState,
};

use axum::http::header;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const CHALLENGE_PRUNE_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "scc_auth=debug,tower_http=debug,axum::rejection=trace".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AuthConfig::from_env()?;
    tracing::debug!("Loaded configuration: {:?}", config);

    // Database connection
    let pool = db::create_pool().await?;

    // Run migrations
    sqlx::migrate!("./migrations").run(&pool).await?;

    let email_service: Arc<dyn EmailService> =
        Arc::from(create_email_service(&config.frontend_url));
    let etlab_client = Arc::new(EtLabClient::new(&config.etlab)?);

    let photo_dir = config.photos.dir.clone();
    tokio::fs::create_dir_all(&photo_dir).await?;

    let app_state = AppState::new(pool, config, email_service, etlab_client)?;
    spawn_prune_worker(app_state.challenges.clone(), CHALLENGE_PRUNE_INTERVAL);

    let cors_layer = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::ACCEPT,
        ])
        .max_age(Duration::from_secs(3600));

    let app = handlers::auth_router(app_state)
        .nest_service("/photos", ServeDir::new(photo_dir))
        .layer(cors_layer)
        .layer(TraceLayer::new_for_http());

    // Start server
    let host = std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port = std::env::var("PORT")
        .unwrap_or_else(|_| "8787".to_string())
        .parse::<u16>()?;

    let addr = SocketAddr::from((host.parse::<std::net::IpAddr>()?, port));

    tracing::info!("Server running on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
