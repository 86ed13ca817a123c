/// Configuration management for the tempchat server.
/// Handles command-line argument parsing and config structure.
use crate::handlers::{ServerConfig, DEFAULT_MAX_FRAME_BYTES};
use crate::tokens::DEFAULT_TOKEN_TTL_DAYS;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "tempchat-server")]
#[command(about = "Ephemeral password-protected group chat server", long_about = None)]
pub struct Config {
    /// Server port (default: 4000)
    #[arg(long, env = "TEMPCHAT_PORT", default_value = "4000")]
    pub port: u16,

    /// Address to bind to
    #[arg(long, default_value = "127.0.0.1")]
    pub bind: String,

    /// SQLite database file path (default: tempchat.db)
    #[arg(long, env = "TEMPCHAT_DATABASE", default_value = "tempchat.db")]
    pub database: PathBuf,

    /// PID file path (optional) - write server PID to this file on startup
    #[arg(long)]
    pub pidfile: Option<PathBuf>,

    /// Secret used to sign membership tokens. Random per process when unset,
    /// which invalidates outstanding tokens on restart.
    #[arg(long, env = "TEMPCHAT_TOKEN_SECRET", hide_env_values = true)]
    pub token_secret: Option<String>,

    /// Membership token lifetime in days
    #[arg(long, default_value_t = DEFAULT_TOKEN_TTL_DAYS)]
    pub token_ttl_days: i64,

    /// Seconds between garbage collection passes
    #[arg(long, default_value_t = 3600)]
    pub gc_interval_secs: u64,

    /// Maximum WebSocket frame size in bytes
    #[arg(long, default_value_t = DEFAULT_MAX_FRAME_BYTES)]
    pub max_frame_bytes: usize,

    /// Public origin used in QR join links, e.g. https://chat.example
    #[arg(long, env = "TEMPCHAT_PUBLIC_ORIGIN")]
    pub public_origin: Option<String>,
}

impl Config {
    /// Parse command-line arguments into Config
    pub fn from_args() -> Self {
        Config::parse()
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            max_frame_bytes: self.max_frame_bytes,
            public_origin: self.public_origin.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::parse_from(["tempchat-server"]);
        assert_eq!(config.port, 4000);
        assert_eq!(config.bind_addr(), "127.0.0.1:4000");
        assert_eq!(config.token_ttl_days, 30);
        assert_eq!(config.gc_interval_secs, 3600);
        assert_eq!(config.max_frame_bytes, 64 * 1024 * 1024);
    }

    #[test]
    fn test_custom_values() {
        let config = Config::parse_from([
            "tempchat-server",
            "--port",
            "8080",
            "--bind",
            "0.0.0.0",
            "--database",
            "/tmp/custom.db",
            "--public-origin",
            "https://chat.example",
            "--token-secret",
            "s3cret",
        ]);
        assert_eq!(config.bind_addr(), "0.0.0.0:8080");
        assert_eq!(config.database.to_str().unwrap(), "/tmp/custom.db");
        assert_eq!(config.token_secret.as_deref(), Some("s3cret"));

        let server_config = config.server_config();
        assert_eq!(
            server_config.public_origin.as_deref(),
            Some("https://chat.example")
        );
    }
}
