use std::time::Duration;

use serde::Deserialize;

/// Top-level server configuration, loaded from `crumble.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    /// Shared store endpoint. None runs in-memory single-replica mode.
    pub redis_url: Option<String>,
    /// HMAC secret for socket bearer tokens.
    pub jwt_secret: String,
    pub game: GameConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            redis_url: None,
            jwt_secret: String::new(),
            game: GameConfig::default(),
        }
    }
}

/// Match timing and coordination knobs. Defaults are the production
/// values; integration tests shrink them.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    pub countdown_secs: u64,
    pub match_duration_secs: i64,
    pub bonus_interval_min_secs: u64,
    pub bonus_interval_max_secs: u64,
    pub bonus_duration_secs: i64,
    pub queue_ttl_secs: i64,
    pub match_lock_ttl_secs: u64,
    pub room_ttl_secs: u64,
    pub cleanup_delay_secs: u64,
    pub match_loop_interval_ms: u64,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            countdown_secs: 5,
            match_duration_secs: 60,
            bonus_interval_min_secs: 5,
            bonus_interval_max_secs: 10,
            bonus_duration_secs: 3,
            queue_ttl_secs: 30,
            match_lock_ttl_secs: 2,
            room_ttl_secs: 600,
            cleanup_delay_secs: 30,
            match_loop_interval_ms: 500,
        }
    }
}

impl GameConfig {
    pub fn countdown(&self) -> Duration {
        Duration::from_secs(self.countdown_secs)
    }

    pub fn match_lock_ttl(&self) -> Duration {
        Duration::from_secs(self.match_lock_ttl_secs)
    }

    pub fn room_ttl(&self) -> Duration {
        Duration::from_secs(self.room_ttl_secs)
    }

    pub fn cleanup_delay(&self) -> Duration {
        Duration::from_secs(self.cleanup_delay_secs)
    }

    pub fn match_loop_interval(&self) -> Duration {
        Duration::from_millis(self.match_loop_interval_ms)
    }
}

impl ServerConfig {
    /// Validate configuration, exiting on fatal issues.
    pub fn validate(&self) {
        if self.listen_addr.parse::<std::net::SocketAddr>().is_err() {
            tracing::error!(
                addr = %self.listen_addr,
                "listen_addr is not a valid socket address"
            );
            std::process::exit(1);
        }

        if self.jwt_secret.is_empty() {
            tracing::error!(
                "jwt_secret is not configured — set CRUMBLE_JWT_SECRET or [jwt_secret] in crumble.toml"
            );
            std::process::exit(1);
        }

        if self.game.match_duration_secs <= 0 {
            tracing::error!("match_duration_secs must be > 0");
            std::process::exit(1);
        }

        if self.game.bonus_interval_min_secs >= self.game.bonus_interval_max_secs {
            tracing::error!(
                min = self.game.bonus_interval_min_secs,
                max = self.game.bonus_interval_max_secs,
                "bonus interval bounds must satisfy min < max"
            );
            std::process::exit(1);
        }
    }

    /// Load config from `crumble.toml` if it exists, then apply env var overrides.
    pub fn load() -> Self {
        let mut config = match std::fs::read_to_string("crumble.toml") {
            Ok(content) => match toml::from_str::<ServerConfig>(&content) {
                Ok(cfg) => {
                    tracing::info!("Loaded configuration from crumble.toml");
                    cfg
                },
                Err(e) => {
                    tracing::warn!("Failed to parse crumble.toml: {e}, using defaults");
                    ServerConfig::default()
                },
            },
            Err(_) => {
                tracing::info!("No crumble.toml found, using defaults");
                ServerConfig::default()
            },
        };

        // Environment variable overrides
        if let Ok(addr) = std::env::var("CRUMBLE_LISTEN_ADDR")
            && !addr.is_empty()
        {
            config.listen_addr = addr;
        }
        if let Ok(url) = std::env::var("CRUMBLE_REDIS_URL")
            && !url.is_empty()
        {
            config.redis_url = Some(url);
        }
        if let Ok(secret) = std::env::var("CRUMBLE_JWT_SECRET")
            && !secret.is_empty()
        {
            config.jwt_secret = secret;
        }

        config
    }
}
