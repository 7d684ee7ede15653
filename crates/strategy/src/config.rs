use serde::{Deserialize, Serialize};

/// Top-level asset config file (TOML).
///
/// Example `config/assets.toml`:
/// ```toml
/// [[asset]]
/// symbol = "BTCUSDT"
/// short_timeframe = "3"
/// long_timeframe = "240"
/// mode = "structural"
/// poll_interval_secs = 180
///
/// [asset.strategy]
/// ema_len = 20
/// rsi_len = 14
/// rsi_entry_level = 70.0
/// atr_len = 14
/// sl_atr_mult = 1.5
/// tp_atr_mult = 2.0
///
/// [asset.risk]
/// trade_amount_usd = 100.0
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AssetFileConfig {
    #[serde(rename = "asset")]
    pub assets: Vec<AssetConfig>,
}

impl AssetFileConfig {
    /// Load from a TOML file. Exits process on error — a bad config must
    /// never bring up a partial fleet.
    pub fn load(path: &str) -> Self {
        let content = std::fs::read_to_string(path)
            .unwrap_or_else(|e| panic!("Failed to read asset config at '{path}': {e}"));
        toml::from_str(&content)
            .unwrap_or_else(|e| panic!("Failed to parse asset config at '{path}': {e}"))
    }
}

/// Everything one worker needs to trade one instrument. Immutable after
/// load; the orchestrator shares it read-only with the worker.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AssetConfig {
    /// Instrument symbol, e.g. "BTCUSDT".
    pub symbol: String,
    /// Trigger timeframe (exchange interval string, e.g. "3" = 3 minutes).
    pub short_timeframe: String,
    /// Trend-filter timeframe, only fetched in structural mode.
    #[serde(default = "default_long_timeframe")]
    pub long_timeframe: String,
    #[serde(default)]
    pub mode: StrategyMode,
    /// Seconds to sleep between ticks.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Candles fetched per snapshot.
    #[serde(default = "default_lookback")]
    pub lookback: usize,
    #[serde(default, rename = "strategy")]
    pub strategy: StrategyParams,
    #[serde(default, rename = "risk")]
    pub risk: RiskParams,
}

/// Which confirmation the entry rule requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyMode {
    /// Short-timeframe trigger gated by a long-timeframe trend filter.
    Structural,
    /// Short-timeframe trigger only.
    #[default]
    Reactive,
}

/// Indicator lengths and entry/exit thresholds.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StrategyParams {
    pub ema_len: usize,
    pub rsi_len: usize,
    /// RSI level whose upward cross (with price above EMA) triggers a long.
    /// Shorts mirror at `100 - rsi_entry_level`.
    pub rsi_entry_level: f64,
    pub atr_len: usize,
    /// Stop distance in ATR multiples.
    pub sl_atr_mult: f64,
    /// Target distance in ATR multiples.
    pub tp_atr_mult: f64,
    /// EMA length for the long-timeframe trend filter (structural mode).
    #[serde(default = "default_trend_ema_len")]
    pub trend_ema_len: usize,
    #[serde(default = "default_macd_fast")]
    pub macd_fast: usize,
    #[serde(default = "default_macd_slow")]
    pub macd_slow: usize,
    #[serde(default = "default_macd_signal")]
    pub macd_signal: usize,
}

impl Default for StrategyParams {
    fn default() -> Self {
        Self {
            ema_len: 20,
            rsi_len: 14,
            rsi_entry_level: 70.0,
            atr_len: 14,
            sl_atr_mult: 1.5,
            tp_atr_mult: 2.0,
            trend_ema_len: default_trend_ema_len(),
            macd_fast: default_macd_fast(),
            macd_slow: default_macd_slow(),
            macd_signal: default_macd_signal(),
        }
    }
}

/// Sizing parameters.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RiskParams {
    /// USD notional per trade; quantity = notional / reference price.
    pub trade_amount_usd: f64,
}

impl Default for RiskParams {
    fn default() -> Self {
        Self {
            trade_amount_usd: 100.0,
        }
    }
}

fn default_long_timeframe() -> String {
    "240".to_string()
}

fn default_poll_interval() -> u64 {
    180
}

fn default_lookback() -> usize {
    100
}

fn default_trend_ema_len() -> usize {
    50
}

fn default_macd_fast() -> usize {
    12
}

fn default_macd_slow() -> usize {
    26
}

fn default_macd_signal() -> usize {
    9
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_asset_entry_with_defaults() {
        let toml_src = r#"
            [[asset]]
            symbol = "BTCUSDT"
            short_timeframe = "3"

            [asset.strategy]
            ema_len = 20
            rsi_len = 7
            rsi_entry_level = 60.0
            atr_len = 14
            sl_atr_mult = 1.5
            tp_atr_mult = 2.0

            [asset.risk]
            trade_amount_usd = 50.0
        "#;
        let cfg: AssetFileConfig = toml::from_str(toml_src).unwrap();
        assert_eq!(cfg.assets.len(), 1);
        let asset = &cfg.assets[0];
        assert_eq!(asset.symbol, "BTCUSDT");
        assert_eq!(asset.mode, StrategyMode::Reactive);
        assert_eq!(asset.poll_interval_secs, 180);
        assert_eq!(asset.lookback, 100);
        assert_eq!(asset.strategy.trend_ema_len, 50);
        assert!((asset.risk.trade_amount_usd - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn parses_structural_mode() {
        let toml_src = r#"
            [[asset]]
            symbol = "ETHUSDT"
            short_timeframe = "15"
            long_timeframe = "240"
            mode = "structural"

            [asset.strategy]
            ema_len = 20
            rsi_len = 14
            rsi_entry_level = 70.0
            atr_len = 14
            sl_atr_mult = 1.0
            tp_atr_mult = 3.0

            [asset.risk]
            trade_amount_usd = 200.0
        "#;
        let cfg: AssetFileConfig = toml::from_str(toml_src).unwrap();
        assert_eq!(cfg.assets[0].mode, StrategyMode::Structural);
        assert_eq!(cfg.assets[0].long_timeframe, "240");
    }
}
