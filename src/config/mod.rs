use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    pub redis_url: String,
    pub nats_url: String,
    pub jwt_secret: String,
    pub server_host: String,
    pub server_port: u16,
    pub api_base_uri: String,
    /// 连接不活跃多久后失效（存活兜底，秒）
    pub presence_ttl_secs: u64,
    pub store_timeout_ms: u64,
    pub store_retry_attempts: u32,
    pub store_retry_delay_ms: u64,
    pub max_search_radius: f64,
    pub rate_limit_window_secs: u64,
    pub rate_limit_requests: u32,
    /// 单连接限流窗口（秒），按消息类型分别计数
    pub ws_rate_window_secs: u64,
    pub location_updates_per_window: u32,
    pub viewport_queries_per_window: u32,
    pub relay_workers: usize,
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Result<Self, env::VarError> {
        dotenv::dotenv().ok();

        Ok(Config {
            redis_url: env::var("REDIS_URL")?,
            nats_url: env::var("NATS_URL")?,
            jwt_secret: env::var("JWT_SECRET")?,
            server_host: env::var("SERVER_HOST")?,
            server_port: env::var("SERVER_PORT")?.parse().unwrap_or(3000),
            api_base_uri: env::var("API_BASE_URI").unwrap_or_else(|_| "/api/v1".into()),
            presence_ttl_secs: env_parse("PRESENCE_TTL_SECS", 600),
            store_timeout_ms: env_parse("STORE_TIMEOUT_MS", 2000),
            store_retry_attempts: env_parse("STORE_RETRY_ATTEMPTS", 3),
            store_retry_delay_ms: env_parse("STORE_RETRY_DELAY_MS", 100),
            max_search_radius: env_parse("MAX_SEARCH_RADIUS", 5000.0),
            rate_limit_window_secs: env_parse("RATE_LIMIT_WINDOW", 60),
            rate_limit_requests: env_parse("RATE_LIMIT_REQUESTS", 100),
            ws_rate_window_secs: env_parse("WS_RATE_WINDOW_SECS", 10),
            location_updates_per_window: env_parse("LOCATION_UPDATES_PER_WINDOW", 50),
            viewport_queries_per_window: env_parse("VIEWPORT_QUERIES_PER_WINDOW", 10),
            relay_workers: env_parse("RELAY_WORKERS", 4),
        })
    }

    pub fn presence_ttl(&self) -> Duration {
        Duration::from_secs(self.presence_ttl_secs)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn store_retry_delay(&self) -> Duration {
        Duration::from_millis(self.store_retry_delay_ms)
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }

    pub fn ws_rate_window(&self) -> Duration {
        Duration::from_secs(self.ws_rate_window_secs)
    }
}
