use chrono::NaiveTime;
use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub kis: KisConfig,
    pub database: DatabaseConfig,
    pub trading: TradingConfig,
    pub market: MarketHoursConfig,
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Brokerage (KIS OpenAPI) credentials and endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct KisConfig {
    /// REST base URL (paper endpoint by default)
    pub base_url: String,
    pub app_key: String,
    pub app_secret: String,
    /// Account number in "CANO-PRDT" form, e.g. "12345678-01"
    pub account_number: String,
    /// Real account vs paper-trading account (selects order tr_id)
    #[serde(default)]
    pub real_account: bool,
    /// Treat a shared token as expired this long before its true expiry
    #[serde(default = "default_token_margin_secs")]
    pub token_safety_margin_secs: u64,
}

fn default_token_margin_secs() -> u64 {
    300
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct TradingConfig {
    /// Fixed budget per position in won; order quantity = budget / price
    pub budget_per_position: i64,
    /// Unrealized profit rate (percent) that triggers a take-profit sell
    pub take_profit_pct: Decimal,
    /// Loss rate (percent, positive number) that triggers a stop-loss sell
    pub stop_loss_pct: Decimal,
    /// Lifecycle loop interval in seconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Minimum upstream probability (0-100) to open a position
    #[serde(default = "default_min_probability")]
    pub min_probability: u8,
}

fn default_poll_interval() -> u64 {
    60
}

fn default_min_probability() -> u8 {
    70
}

/// Local-time trading session bounds
#[derive(Debug, Clone, Deserialize)]
pub struct MarketHoursConfig {
    #[serde(deserialize_with = "de_hhmm")]
    pub open: NaiveTime,
    #[serde(deserialize_with = "de_hhmm")]
    pub close: NaiveTime,
    /// Daily cutoff at which every open position is liquidated
    #[serde(deserialize_with = "de_hhmm")]
    pub force_close: NaiveTime,
}

fn de_hhmm<'de, D>(deserializer: D) -> std::result::Result<NaiveTime, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    NaiveTime::parse_from_str(&raw, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(&raw, "%H:%M:%S"))
        .map_err(|e| serde::de::Error::custom(format!("invalid time of day {raw:?}: {e}")))
}

#[derive(Debug, Clone, Deserialize)]
pub struct CoordinatorConfig {
    /// Minimum spacing between consecutive brokerage calls
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
    /// Quote cache time-to-live
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    /// How long a caller waits on a queued call before giving up
    #[serde(default = "default_wait_timeout_secs")]
    pub wait_timeout_secs: u64,
}

fn default_min_interval_ms() -> u64 {
    200
}

fn default_cache_ttl_secs() -> u64 {
    60
}

fn default_wait_timeout_secs() -> u64 {
    30
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: default_min_interval_ms(),
            cache_ttl_secs: default_cache_ttl_secs(),
            wait_timeout_secs: default_wait_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    #[serde(default)]
    pub chat_id: String,
}

impl TelegramConfig {
    pub fn enabled(&self) -> bool {
        !self.bot_token.is_empty() && !self.chat_id.is_empty()
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .set_default("database.max_connections", 5)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g. config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("SCOOP_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (SCOOP_KIS__APP_KEY, etc.)
            .add_source(
                Environment::with_prefix("SCOOP")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn market_from_toml(raw: &str) -> Result<MarketHoursConfig, ConfigError> {
        Config::builder()
            .add_source(config::File::from_str(raw, config::FileFormat::Toml))
            .build()?
            .try_deserialize()
    }

    #[test]
    fn parses_hhmm_times() {
        let market =
            market_from_toml("open = \"09:00\"\nclose = \"15:30\"\nforce_close = \"15:20\"\n")
                .expect("parse");
        assert_eq!(market.open, NaiveTime::from_hms_opt(9, 0, 0).unwrap());
        assert_eq!(market.close, NaiveTime::from_hms_opt(15, 30, 0).unwrap());
        assert_eq!(market.force_close, NaiveTime::from_hms_opt(15, 20, 0).unwrap());
    }

    #[test]
    fn rejects_garbage_time() {
        assert!(market_from_toml("open = \"9am\"\nclose = \"15:30\"\nforce_close = \"15:20\"\n")
            .is_err());
    }

    #[test]
    fn default_config_file_loads() {
        let cfg = AppConfig::load_from(concat!(env!("CARGO_MANIFEST_DIR"), "/config"))
            .expect("default.toml should deserialize");
        assert_eq!(cfg.trading.budget_per_position, 1_000_000);
        assert_eq!(cfg.trading.take_profit_pct, dec!(2.0));
        assert_eq!(cfg.trading.stop_loss_pct, dec!(1.0));
        assert_eq!(cfg.coordinator.min_interval_ms, 200);
        assert!(!cfg.telegram.enabled());
    }
}
