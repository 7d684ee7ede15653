use crate::TradingMode;

/// Process-level configuration loaded from environment variables at startup.
/// Missing required variables cause an immediate panic with a clear message,
/// before any worker starts.
#[derive(Debug, Clone)]
pub struct Config {
    // Exchange credentials (unused in dry-run but still loaded when present)
    pub bybit_api_key: String,
    pub bybit_secret: String,

    // Trading
    pub trading_mode: TradingMode,

    /// Seconds between starting successive workers, to avoid a request
    /// burst against the exchange rate limiter.
    pub stagger_secs: u64,

    // Asset config file path
    pub asset_config_path: String,
}

impl Config {
    /// Load all configuration from environment variables.
    /// Loads `.env` if present. Panics on any missing required variable.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv(); // ignore error if .env not present

        let trading_mode = match required_env("TRADING_MODE").to_lowercase().as_str() {
            "dry-run" | "dryrun" => TradingMode::DryRun,
            "live" => TradingMode::Live,
            other => panic!("ERROR: TRADING_MODE must be 'live' or 'dry-run', got: '{other}'"),
        };

        // Credentials are only required when actually trading live.
        let (bybit_api_key, bybit_secret) = match trading_mode {
            TradingMode::Live => (required_env("BYBIT_API_KEY"), required_env("BYBIT_SECRET")),
            TradingMode::DryRun => (
                optional_env("BYBIT_API_KEY").unwrap_or_default(),
                optional_env("BYBIT_SECRET").unwrap_or_default(),
            ),
        };

        Config {
            bybit_api_key,
            bybit_secret,
            trading_mode,
            stagger_secs: optional_env("WORKER_STAGGER_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
            asset_config_path: optional_env("ASSET_CONFIG_PATH")
                .unwrap_or_else(|| "config/assets.toml".to_string()),
        }
    }
}

fn required_env(key: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| {
        panic!("Required environment variable '{key}' is not set. Check your .env file.")
    })
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}
