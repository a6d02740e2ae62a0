// src/config.rs
use crate::domain::errors::{AppError, AppResult};
use crate::domain::models::TrailingMethod;
use chrono::NaiveTime;
use dotenv::dotenv;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Which reference basket votes on market direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BasketMode {
    Sector,
    MegaCap,
}

/// How the initial stop is placed at fill time. `TrailingSeed` defers to the
/// configured trailing method's own seed rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopLossMethod {
    TrailingSeed,
    FixedPercent,
    AtrMultiple,
}

/// Trading bot configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Signal and lifecycle tuning
    pub strategy: StrategyConfig,

    /// Session clock boundaries and trade windows
    pub session: SessionConfig,

    /// Broker call budget (timeouts, retry policy)
    pub broker: BrokerConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Strategy configuration. Defaults are strategy-tuned constants and are
/// preserved as-is rather than re-derived.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Watchlist symbols evaluated for entries
    pub tickers: Vec<String>,

    /// Candle timeframe driving the cascade (e.g., "5m")
    pub timeframe: String,

    /// Reference basket mode
    pub basket_mode: BasketMode,

    /// Sector ETF weights in percent (sector mode)
    pub sector_weights: HashMap<String, f64>,

    /// Mega-cap watch list (mega-cap mode)
    pub megacap_symbols: Vec<String>,

    /// Combined-weight threshold in percent (sector mode)
    pub alignment_threshold: f64,

    /// Aligned-count threshold in percent (mega-cap mode)
    pub megacap_threshold: f64,

    /// Fractional deviation from the 5-period mean that flips a basket
    /// member bullish/bearish (0.002 = 0.2%)
    pub member_delta: f64,

    /// Percent move between quote ticks that flips a member's live status
    pub quote_change_delta_pct: f64,

    /// Rolling window for the compression signals
    pub compression_window: usize,

    /// How many of the three compression signals must fire
    pub compression_quorum: u8,

    pub bb_width_threshold: f64,
    pub donchian_threshold: f64,
    pub volume_squeeze_threshold: f64,

    pub stoch_k_period: usize,
    pub stoch_d_period: usize,
    pub stoch_smooth: usize,
    pub stoch_bullish_threshold: f64,
    pub stoch_bearish_threshold: f64,
    pub stoch_exit_overbought: f64,
    pub stoch_exit_oversold: f64,

    /// Trend EMA period
    pub ema_period: usize,

    /// EMA period used by the EMA trailing stop
    pub ema_trail_period: usize,

    pub ha_wick_tolerance: f64,

    /// Candle lookback for the Heiken-Ashi trailing stop (1..=3)
    pub ha_trail_lookback: usize,

    /// Optional ADX trend-strength entry filter
    pub adx_filter: bool,
    pub adx_minimum: f64,
    pub adx_period: usize,

    pub atr_period: usize,
    pub atr_multiple: f64,

    /// Percent distance for the percent trailing stop
    pub trail_pct: f64,

    /// Point distance for the fixed-point trailing stop
    pub fixed_trail_points: f64,

    /// Trailing-stop algorithm used in live mode
    pub trailing_method: TrailingMethod,

    pub stop_loss_method: StopLossMethod,

    /// Percent distance for the fixed-percentage initial stop
    pub fixed_stop_pct: f64,

    /// Minimum percent profit before a Heiken-Ashi reversal may exit
    pub min_profit_before_exit_pct: f64,

    /// Percent loss beyond which the reversal exit re-arms (whipsaw guard)
    pub loss_guard_pct: f64,

    /// Hard time limit on any open trade, in minutes
    pub failsafe_minutes: i64,

    pub contracts_per_trade: u32,

    /// Maximum bars a backtest simulation holds a trade
    pub max_hold_bars: usize,

    /// Candles skipped at the start of a backtest before signals count
    pub warmup_candles: usize,

    /// Positions untouched for this long are swept closed
    pub stale_position_hours: i64,
}

/// Session clock configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Session open (exchange-local time of day)
    pub open: NaiveTime,

    /// Session close
    pub close: NaiveTime,

    /// No new entries for this many minutes after the open
    pub no_trade_window_minutes: i64,

    /// No new entries after this time of day
    pub cutoff_time: NaiveTime,

    /// Force-close everything this many minutes before the close
    pub auto_close_minutes: i64,
}

/// Broker call budget
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Per-call timeout in milliseconds
    pub call_timeout_ms: u64,

    /// Retry attempts for retryable failures (entry orders never retry)
    pub max_retries: u32,

    /// Base delay of the exponential backoff, in milliseconds
    pub retry_base_delay_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (e.g., "info", "debug", "warn", "error")
    pub level: String,

    /// Log to file
    pub to_file: bool,

    /// Log file path
    pub file_path: Option<String>,
}

impl Config {
    /// Load configuration from environment variables, falling back to the
    /// built-in defaults for anything unset.
    pub fn from_env() -> AppResult<Self> {
        // Load .env file if it exists
        dotenv().ok();

        let mut config = Config::default();

        if let Ok(tickers) = env::var("TICKERS") {
            config.strategy.tickers = tickers
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        if let Ok(mode) = env::var("BASKET_MODE") {
            config.strategy.basket_mode = match mode.to_lowercase().as_str() {
                "megacap" => BasketMode::MegaCap,
                "sector" => BasketMode::Sector,
                other => {
                    return Err(AppError::Config(format!("Unknown basket mode: {}", other)))
                }
            };
        }

        if let Ok(threshold) = env::var("ALIGNMENT_THRESHOLD") {
            config.strategy.alignment_threshold = threshold
                .parse()
                .unwrap_or(config.strategy.alignment_threshold);
        }

        if let Ok(method) = env::var("TRAILING_METHOD") {
            config.strategy.trailing_method = match method.to_lowercase().as_str() {
                "heiken_ashi" => TrailingMethod::HeikenAshi,
                "ema" => TrailingMethod::Ema,
                "percent" => TrailingMethod::Percent,
                "atr" => TrailingMethod::Atr,
                "fixed_points" => TrailingMethod::FixedPoints,
                other => {
                    return Err(AppError::Config(format!(
                        "Unknown trailing method: {}",
                        other
                    )))
                }
            };
        }

        if let Ok(contracts) = env::var("CONTRACTS_PER_TRADE") {
            config.strategy.contracts_per_trade = contracts
                .parse()
                .unwrap_or(config.strategy.contracts_per_trade);
        }

        if let Ok(level) = env::var("LOG_LEVEL") {
            config.logging.level = level;
        }
        config.logging.to_file = env::var("LOG_TO_FILE")
            .unwrap_or_else(|_| "false".to_string())
            .parse()
            .unwrap_or(false);
        config.logging.file_path = env::var("LOG_FILE_PATH").ok();

        Ok(config)
    }

    /// Load configuration from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let mut file = File::open(path)
            .map_err(|e| AppError::Config(format!("Failed to open config file: {}", e)))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| AppError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = serde_json::from_str(&contents)
            .map_err(|e| AppError::Config(format!("Failed to parse config file: {}", e)))?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> AppResult<()> {
        let contents = serde_json::to_string_pretty(self)
            .map_err(|e| AppError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, contents)
            .map_err(|e| AppError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Initialize logging based on configuration
    pub fn init_logging(&self) -> AppResult<()> {
        let mut builder = env_logger::Builder::new();

        let log_level = match self.logging.level.to_lowercase().as_str() {
            "trace" => log::LevelFilter::Trace,
            "debug" => log::LevelFilter::Debug,
            "info" => log::LevelFilter::Info,
            "warn" => log::LevelFilter::Warn,
            "error" => log::LevelFilter::Error,
            _ => log::LevelFilter::Info,
        };

        builder.filter_level(log_level);

        if self.logging.to_file {
            if let Some(file_path) = &self.logging.file_path {
                let file = File::create(file_path)
                    .map_err(|e| AppError::Config(format!("Failed to create log file: {}", e)))?;

                builder.target(env_logger::Target::Pipe(Box::new(file)));
            }
        }

        builder.init();

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            strategy: StrategyConfig::default(),
            session: SessionConfig::default(),
            broker: BrokerConfig::default(),
            logging: LoggingConfig {
                level: "info".to_string(),
                to_file: false,
                file_path: None,
            },
        }
    }
}

impl Default for StrategyConfig {
    fn default() -> Self {
        let mut sector_weights = HashMap::new();
        sector_weights.insert("XLK".to_string(), 32.0);
        sector_weights.insert("XLF".to_string(), 14.0);
        sector_weights.insert("XLV".to_string(), 11.0);
        sector_weights.insert("XLY".to_string(), 11.0);

        Self {
            tickers: vec!["SPY".to_string(), "QQQ".to_string()],
            timeframe: "5m".to_string(),
            basket_mode: BasketMode::Sector,
            sector_weights,
            megacap_symbols: vec![
                "AAPL".to_string(),
                "MSFT".to_string(),
                "AMZN".to_string(),
                "NVDA".to_string(),
                "GOOG".to_string(),
                "TSLA".to_string(),
                "META".to_string(),
            ],
            alignment_threshold: 43.0,
            megacap_threshold: 60.0,
            member_delta: 0.002,
            quote_change_delta_pct: 0.1,
            compression_window: 20,
            compression_quorum: 2,
            bb_width_threshold: 0.05,
            donchian_threshold: 0.6,
            volume_squeeze_threshold: 0.3,
            stoch_k_period: 5,
            stoch_d_period: 3,
            stoch_smooth: 2,
            stoch_bullish_threshold: 20.0,
            stoch_bearish_threshold: 80.0,
            stoch_exit_overbought: 80.0,
            stoch_exit_oversold: 20.0,
            ema_period: 15,
            ema_trail_period: 9,
            ha_wick_tolerance: 0.1,
            ha_trail_lookback: 3,
            adx_filter: false,
            adx_minimum: 20.0,
            adx_period: 14,
            atr_period: 14,
            atr_multiple: 1.5,
            trail_pct: 1.5,
            fixed_trail_points: 1.0,
            trailing_method: TrailingMethod::HeikenAshi,
            stop_loss_method: StopLossMethod::TrailingSeed,
            fixed_stop_pct: 1.0,
            min_profit_before_exit_pct: 0.5,
            loss_guard_pct: 0.1,
            failsafe_minutes: 20,
            contracts_per_trade: 1,
            max_hold_bars: 30,
            warmup_candles: 30,
            stale_position_hours: 24,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            open: NaiveTime::from_hms_opt(9, 30, 0).expect("valid session open"),
            close: NaiveTime::from_hms_opt(16, 0, 0).expect("valid session close"),
            no_trade_window_minutes: 3,
            cutoff_time: NaiveTime::from_hms_opt(15, 15, 0).expect("valid cutoff"),
            auto_close_minutes: 15,
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: 5_000,
            max_retries: 3,
            retry_base_delay_ms: 250,
        }
    }
}
