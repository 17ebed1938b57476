use std::sync::Arc;

use campus_notify::api::jwt::JwtService;
use campus_notify::api::{ApiServer, AppState};
use campus_notify::config::AppConfig;
use campus_notify::notification::{EventSources, NotificationService};
use campus_notify::{database, logging};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env_or_default();
    let (logging_config, _log_guard) = logging::init_logging(&config.log_dir)?;

    let pool = database::init_pool(&config.database_url).await?;
    database::run_migrations(&pool).await?;

    let service = Arc::new(NotificationService::new(
        EventSources::sqlite(pool.clone()),
        config.notifications.clone(),
    ));

    let mut state = AppState::new()
        .with_notification_service(service)
        .with_logging_config(logging_config.clone());
    match JwtService::from_env() {
        Some(jwt) => state = state.with_jwt_service(Arc::new(jwt)),
        None => warn!("JWT_SECRET is not set; authenticated routes will answer 503"),
    }

    let server = ApiServer::with_state(config.api.clone(), state);
    let cancel_token = server.cancel_token();
    logging_config.start_retention_cleanup(cancel_token.clone());

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down");
            cancel_token.cancel();
        }
    });

    info!(
        database = %config.database_url,
        source_timeout_ms = config.notifications.aggregator.source_timeout_ms,
        "campus-notify initialized"
    );
    server.run().await?;

    pool.close().await;
    Ok(())
}
