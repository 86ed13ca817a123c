/// Tempchat Server - ephemeral password-protected group chat
///
/// Main server entry point. Handles:
/// - Command-line argument parsing
/// - Database initialization
/// - Periodic garbage collection
/// - HTTP and WebSocket server startup
use std::fs;
use std::process;
use std::time::Duration;
use tempchat_server::config::Config;
use tempchat_server::db;
use tempchat_server::server::{self, AppState};
use tempchat_server::tokens::TokenService;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::Builder::from_default_env()
        .format_timestamp_millis()
        .init();

    let config = Config::from_args();

    log::info!("Starting tempchat server");
    log::info!("Database: {:?}", config.database);
    log::info!("Bind address: {}", config.bind_addr());

    // Write PID file if specified
    if let Some(pidfile) = &config.pidfile {
        fs::write(pidfile, process::id().to_string())?;
        log::info!("PID file written to: {:?}", pidfile);
    }

    let database = config.database.to_string_lossy();
    let pool = db::create_pool(&database)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
    log::info!("Database initialized");

    let ttl = chrono::Duration::days(config.token_ttl_days);
    let tokens = match &config.token_secret {
        Some(secret) => TokenService::new(secret.as_bytes(), ttl),
        None => {
            log::warn!("No token secret configured; tokens will not survive a restart");
            TokenService::with_random_secret(ttl)
        }
    };

    let state = AppState::new(pool, tokens, config.server_config());
    server::spawn_garbage_collector(&state, Duration::from_secs(config.gc_interval_secs.max(1)));

    log::info!("Starting HTTP server on {}", config.bind_addr());
    server::create_http_server(state, &config.bind_addr())?.await
}
