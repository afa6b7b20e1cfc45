use clap::Parser;
use std::fmt::Debug;
use std::time::Duration;

#[derive(Debug, Clone, Parser)]
#[command(
    author,
    version,
    about = "A social bot that answers \"does X follow Y\" mentions"
)]
pub struct AppSettings {
    /// Base URL of the social-graph API
    #[arg(long, env = "FOLLOWBOT_API_URL", default_value = "https://api.twitter.com")]
    pub api_url: String,

    /// Bearer token attached to every API request
    #[arg(long, env = "FOLLOWBOT_API_TOKEN")]
    pub api_token: String,

    /// Numeric account id of the bot, used to read its mentions timeline
    #[arg(long, env = "FOLLOWBOT_BOT_USER_ID")]
    pub bot_user_id: String,

    /// Bot handle (without @); removed from every parsed query
    #[arg(long, env = "FOLLOWBOT_BOT_HANDLE")]
    pub bot_handle: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "FOLLOWBOT_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// How often to poll for new mentions (in seconds)
    #[arg(long, env = "FOLLOWBOT_POLL_INTERVAL_SECONDS", default_value_t = 120)]
    pub poll_interval_seconds: u64,

    /// How often the relationship cache is purged (in seconds)
    #[arg(long, env = "FOLLOWBOT_CACHE_PURGE_INTERVAL_SECONDS", default_value_t = 14400)]
    pub cache_purge_interval_seconds: u64,

    /// Maximum number of (subject, target) verdicts kept in memory
    #[arg(long, env = "FOLLOWBOT_CACHE_CAPACITY", default_value_t = 2000)]
    pub cache_capacity: usize,

    /// Log replies instead of posting them
    #[arg(long, env = "FOLLOWBOT_DRY_RUN", default_value_t = false)]
    pub dry_run: bool,

    /// Per-request timeout for API calls (in seconds)
    #[arg(long, env = "FOLLOWBOT_REQUEST_TIMEOUT_SECONDS", default_value_t = 30)]
    pub request_timeout_seconds: u64,

    /// Where rate-limit state lives: "memory" or "shared"
    #[arg(long, env = "FOLLOWBOT_RATE_LIMIT_BACKEND", default_value = "memory", value_parser = validate_backend)]
    pub rate_limit_backend: String,

    /// Grace window a task waits before re-checking an active rate limit (in milliseconds)
    #[arg(long, env = "FOLLOWBOT_RATE_LIMIT_GRACE_MS", default_value_t = 1000)]
    pub rate_limit_grace_ms: u64,

    /// TTL of the lock taken before clearing the rate-limit flag (in milliseconds)
    #[arg(long, env = "FOLLOWBOT_RATE_LIMIT_LOCK_TTL_MS", default_value_t = 5000)]
    pub rate_limit_lock_ttl_ms: u64,

    /// How many times a throttled call is retried before the task gives up (1..=20)
    #[arg(long, env = "FOLLOWBOT_MAX_THROTTLE_RETRIES", default_value_t = 5)]
    pub max_throttle_retries: u32,

    /// Where the high-water mark lives: "file" or "shared"
    #[arg(long, env = "FOLLOWBOT_HIGH_WATER_MARK_BACKEND", default_value = "file", value_parser = validate_high_water_mark_backend)]
    pub high_water_mark_backend: String,

    /// File holding the id of the newest processed mention
    #[arg(long, env = "FOLLOWBOT_HIGH_WATER_MARK_PATH", default_value = "last_mention_id")]
    pub high_water_mark_path: String,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            api_url: "https://api.twitter.com".to_string(),
            api_token: String::new(),
            bot_user_id: String::new(),
            bot_handle: String::new(),
            log_level: "info".to_string(),
            poll_interval_seconds: 120,
            cache_purge_interval_seconds: 14400,
            cache_capacity: 2000,
            dry_run: false,
            request_timeout_seconds: 30,
            rate_limit_backend: "memory".to_string(),
            rate_limit_grace_ms: 1000,
            rate_limit_lock_ttl_ms: 5000,
            max_throttle_retries: 5,
            high_water_mark_backend: "file".to_string(),
            high_water_mark_path: "last_mention_id".to_string(),
        }
    }
}

impl AppSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn rate_limit_grace(&self) -> Duration {
        Duration::from_millis(self.rate_limit_grace_ms)
    }

    pub fn rate_limit_lock_ttl(&self) -> Duration {
        Duration::from_millis(self.rate_limit_lock_ttl_ms)
    }
}

/// Validate that rate_limit_backend is a known backend
fn validate_backend(value: &str) -> Result<String, String> {
    match value {
        "memory" | "shared" => Ok(value.to_string()),
        _ => Err(format!(
            "rate_limit_backend must be either 'memory' or 'shared', got '{}'",
            value
        )),
    }
}

fn validate_high_water_mark_backend(value: &str) -> Result<String, String> {
    match value {
        "file" | "shared" => Ok(value.to_string()),
        _ => Err(format!(
            "high_water_mark_backend must be either 'file' or 'shared', got '{}'",
            value
        )),
    }
}

/// Validate that max_throttle_retries is within reasonable bounds
fn validate_max_throttle_retries(value: u32) -> Result<u32, String> {
    const MIN_RETRIES: u32 = 1;
    const MAX_RETRIES: u32 = 20;

    if value < MIN_RETRIES {
        Err(format!(
            "max_throttle_retries must be at least {MIN_RETRIES}, got {value}"
        ))
    } else if value > MAX_RETRIES {
        Err(format!(
            "max_throttle_retries must be at most {MAX_RETRIES}, got {value}"
        ))
    } else {
        Ok(value)
    }
}

pub fn load_config() -> anyhow::Result<AppSettings> {
    let mut app_settings = AppSettings::parse();

    app_settings.bot_handle = app_settings.bot_handle.trim_start_matches('@').to_string();

    app_settings.max_throttle_retries = validate_max_throttle_retries(
        app_settings.max_throttle_retries,
    )
    .map_err(|e| anyhow::anyhow!(e))?;

    if app_settings.cache_capacity == 0 {
        anyhow::bail!("cache_capacity must be at least 1");
    }

    Ok(app_settings)
}
