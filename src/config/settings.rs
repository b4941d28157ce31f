//! Application settings and configuration structures.

use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Root configuration structure containing all application settings.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Server configuration (host, port, shutdown grace)
    pub server: ServerSettings,

    /// Database configuration (PostgreSQL)
    pub database: DatabaseSettings,

    /// Redis configuration
    pub redis: RedisSettings,

    /// JWT and cookie session settings
    pub jwt: JwtSettings,

    /// Per-address admission limits
    pub rate_limit: RateLimitSettings,

    /// Chat connection and hub tuning
    pub chat: ChatSettings,

    /// Cross-instance message bus
    pub bus: BusSettings,

    /// CORS configuration
    pub cors: CorsSettings,

    /// Current environment (development, staging, production)
    pub environment: String,
}

/// Server binding configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    /// Host address to bind to (e.g., "0.0.0.0")
    pub host: String,

    /// Port number to listen on
    pub port: u16,

    /// Seconds allowed for in-flight work to drain on shutdown
    pub shutdown_grace_secs: u64,
}

/// PostgreSQL database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    /// Database connection URL
    pub url: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Minimum number of connections to maintain
    pub min_connections: u32,

    /// Connection acquire timeout in seconds
    pub acquire_timeout: u64,

    /// Apply embedded migrations at startup
    pub run_migrations: bool,
}

/// Redis configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RedisSettings {
    /// Redis connection URL
    pub url: String,
}

/// JWT authentication configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct JwtSettings {
    /// Secret key for signing tokens
    pub secret: String,

    /// `iss` claim written into and required from access tokens
    pub issuer: String,

    /// Access token expiry in minutes
    pub access_token_expiry_minutes: i64,

    /// Refresh token expiry in days
    pub refresh_token_expiry_days: i64,

    /// Mark session cookies `Secure`
    pub secure_cookies: bool,
}

/// Per-IP admission filter configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitSettings {
    /// Requests allowed per window for a single address
    pub ip_requests: u32,

    /// Window length in seconds
    pub ip_window_secs: u64,

    /// Idle time after which an address entry is evicted
    pub ip_ttl_secs: u64,

    /// How often the eviction sweep runs
    pub ip_sweep_interval_secs: u64,

    /// Take the client address from the last `X-Forwarded-For` hop
    pub trust_forwarded_for: bool,
}

/// Chat connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatSettings {
    pub message_burst: u32,
    pub message_window_secs: u64,
    pub typing_burst: u32,
    pub typing_window_secs: u64,

    /// Window during which repeated message-limit violations are not re-notified
    pub penalty_secs: u64,

    /// Per-connection outbound queue capacity
    pub outbound_capacity: usize,

    /// Hub submit queue capacity
    pub inbound_capacity: usize,

    pub write_timeout_secs: u64,

    /// Read deadline; pings are sent at 9/10 of this
    pub pong_wait_secs: u64,

    /// Maximum rows returned by the history endpoint
    pub history_limit: i64,

    /// Maximum accepted message length in characters
    pub max_content_len: usize,
}

/// Redis Streams bus configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct BusSettings {
    pub enabled: bool,
    pub stream: String,
    pub subject: String,
    pub consumer_group: String,
    pub max_deliver: u64,
    pub ack_wait_secs: u64,
    pub poll_interval_ms: u64,
    pub dedup_ttl_secs: u64,
}

/// CORS configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CorsSettings {
    /// Allowed origins (comma-separated in env)
    pub allowed_origins: Vec<String>,
}

/// Minimum required length for JWT secret (256 bits = 32 bytes)
pub const MIN_JWT_SECRET_LENGTH: usize = 32;

impl Settings {
    /// Load settings from environment variables and configuration files.
    ///
    /// The loading order is:
    /// 1. config/default.toml (base configuration)
    /// 2. config/{RUN_ENV}.toml (environment-specific overrides)
    /// 3. Environment variables (highest priority)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if configuration cannot be loaded or parsed,
    /// or if JWT secret is too short.
    pub fn load() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let environment = std::env::var("RUN_ENV").unwrap_or_else(|_| "development".into());

        Config::builder()
            .set_default("environment", environment.clone())?
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 3000)?
            .set_default("server.shutdown_grace_secs", 10)?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 2)?
            .set_default("database.acquire_timeout", 30)?
            .set_default("database.run_migrations", true)?
            .set_default("redis.url", "redis://127.0.0.1:6379")?
            .set_default("jwt.issuer", "chatter")?
            .set_default("jwt.access_token_expiry_minutes", 5)?
            .set_default("jwt.refresh_token_expiry_days", 7)?
            .set_default("jwt.secure_cookies", true)?
            .set_default("rate_limit.ip_requests", 20)?
            .set_default("rate_limit.ip_window_secs", 60)?
            .set_default("rate_limit.ip_ttl_secs", 180)?
            .set_default("rate_limit.ip_sweep_interval_secs", 60)?
            .set_default("rate_limit.trust_forwarded_for", false)?
            .set_default("chat.message_burst", 30)?
            .set_default("chat.message_window_secs", 60)?
            .set_default("chat.typing_burst", 20)?
            .set_default("chat.typing_window_secs", 10)?
            .set_default("chat.penalty_secs", 10)?
            .set_default("chat.outbound_capacity", 64)?
            .set_default("chat.inbound_capacity", 1024)?
            .set_default("chat.write_timeout_secs", 10)?
            .set_default("chat.pong_wait_secs", 60)?
            .set_default("chat.history_limit", 50)?
            .set_default("chat.max_content_len", 2000)?
            .set_default("bus.enabled", false)?
            .set_default("bus.stream", "MESSAGES")?
            .set_default("bus.subject", "MESSAGES.room.global")?
            .set_default("bus.consumer_group", "chat_consumer")?
            .set_default("bus.max_deliver", 3)?
            .set_default("bus.ack_wait_secs", 30)?
            .set_default("bus.poll_interval_ms", 250)?
            .set_default("bus.dedup_ttl_secs", 120)?
            .set_default("cors.allowed_origins", vec!["http://localhost:3000"])?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", environment)).required(false))
            // APP__CHAT__MESSAGE_BURST=10 -> chat.message_burst = 10
            .add_source(
                Environment::default()
                    .prefix("APP")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("cors.allowed_origins"),
            )
            .set_override_option("server.port", std::env::var("SERVER_PORT").ok())?
            .set_override_option("database.url", std::env::var("DATABASE_URL").ok())?
            .set_override_option("redis.url", std::env::var("REDIS_URL").ok())?
            .set_override_option("jwt.secret", std::env::var("JWT_SECRET").ok())?
            .set_override_option("jwt.issuer", std::env::var("JWT_ISSUER").ok())?
            .build()?
            .try_deserialize()
            .and_then(|settings: Self| {
                settings.validate()?;
                Ok(settings)
            })
    }

    /// Reject configurations the server cannot run safely with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt.secret.len() < MIN_JWT_SECRET_LENGTH {
            return Err(ConfigError::Message(format!(
                "JWT secret must be at least {} characters for security. Current length: {}",
                MIN_JWT_SECRET_LENGTH,
                self.jwt.secret.len()
            )));
        }
        if self.chat.outbound_capacity == 0 || self.chat.inbound_capacity == 0 {
            return Err(ConfigError::Message(
                "chat queue capacities must be non-zero".into(),
            ));
        }
        if self.chat.pong_wait_secs == 0 {
            return Err(ConfigError::Message("chat.pong_wait_secs must be non-zero".into()));
        }
        Ok(())
    }

    /// Get the full server address as a string.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl ServerSettings {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl ChatSettings {
    pub fn message_window(&self) -> Duration {
        Duration::from_secs(self.message_window_secs)
    }

    pub fn typing_window(&self) -> Duration {
        Duration::from_secs(self.typing_window_secs)
    }

    pub fn penalty(&self) -> Duration {
        Duration::from_secs(self.penalty_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    pub fn pong_wait(&self) -> Duration {
        Duration::from_secs(self.pong_wait_secs)
    }

    /// Ping period, kept shorter than the peer's read deadline.
    pub fn ping_period(&self) -> Duration {
        self.pong_wait() * 9 / 10
    }
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            message_burst: 30,
            message_window_secs: 60,
            typing_burst: 20,
            typing_window_secs: 10,
            penalty_secs: 10,
            outbound_capacity: 64,
            inbound_capacity: 1024,
            write_timeout_secs: 10,
            pong_wait_secs: 60,
            history_limit: 50,
            max_content_len: 2000,
        }
    }
}

impl RateLimitSettings {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.ip_window_secs)
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ip_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.ip_sweep_interval_secs.max(1))
    }
}

impl BusSettings {
    pub fn ack_wait(&self) -> Duration {
        Duration::from_secs(self.ack_wait_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}
