use common::{Side, Signal};
use tracing::trace;

use crate::config::{AssetConfig, StrategyMode};
use crate::snapshot::MarketSnapshot;

/// Long-timeframe trend filter verdict (structural mode).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trend {
    Up,
    Down,
    /// No directional agreement between price/EMA and MACD — blocks entries.
    Flat,
}

/// Evaluate entry conditions against a fresh snapshot pair.
///
/// Pure: no I/O, no side effects. All decisions read the second-to-last
/// candle of each snapshot (and the one before it for the RSI crossover);
/// the last, in-progress candle is never consulted. Any indicator still
/// warming up yields `None` rather than an error.
pub fn evaluate(
    short: &MarketSnapshot,
    long: Option<&MarketSnapshot>,
    cfg: &AssetConfig,
) -> Option<Signal> {
    let trend = match cfg.mode {
        StrategyMode::Reactive => None,
        StrategyMode::Structural => Some(trend_direction(long?)?),
    };

    let signal = entry_signal(short, &cfg.strategy)?;

    // Structural mode: the long-timeframe trend must agree with the trigger.
    match (trend, signal.direction) {
        (None, _) => Some(signal),
        (Some(Trend::Up), Side::Long) | (Some(Trend::Down), Side::Short) => Some(signal),
        (Some(t), dir) => {
            trace!(?t, %dir, "trigger rejected by trend filter");
            None
        }
    }
}

/// Short-timeframe trigger: price relative to EMA plus an RSI threshold
/// crossover on the decision candle.
fn entry_signal(
    short: &MarketSnapshot,
    params: &crate::config::StrategyParams,
) -> Option<Signal> {
    let i = short.decision_index()?;
    if i == 0 {
        return None; // crossover needs the candle before the decision one
    }

    let close = short.candles[i].close;
    let ema = short.ema[i]?;
    let rsi_now = short.rsi[i]?;
    let rsi_prev = short.rsi[i - 1]?;
    let atr = short.atr[i]?;

    let level = params.rsi_entry_level;
    let long_trigger = close > ema && rsi_now > level && rsi_prev <= level;
    let short_trigger =
        close < ema && rsi_now < (100.0 - level) && rsi_prev >= (100.0 - level);

    if long_trigger {
        Some(Signal {
            direction: Side::Long,
            reference_price: close,
            invalidation_price: close - params.sl_atr_mult * atr,
        })
    } else if short_trigger {
        Some(Signal {
            direction: Side::Short,
            reference_price: close,
            invalidation_price: close + params.sl_atr_mult * atr,
        })
    } else {
        None
    }
}

/// Direction of the higher timeframe on its decision candle: price against
/// the trend EMA, confirmed by the MACD line vs its signal line.
fn trend_direction(long: &MarketSnapshot) -> Option<Trend> {
    let i = long.decision_index()?;
    let close = long.candles[i].close;
    let trend_ema = long.trend_ema[i]?;
    let macd_line = long.macd.line[i]?;
    let macd_signal = long.macd.signal[i]?;

    if close > trend_ema && macd_line >= macd_signal {
        Some(Trend::Up)
    } else if close < trend_ema && macd_line <= macd_signal {
        Some(Trend::Down)
    } else {
        Some(Trend::Flat)
    }
}
