use common::Candle;

use crate::config::StrategyParams;
use crate::indicators::{atr, ema, macd, rsi, MacdSeries};

/// One timeframe's candles plus the derived indicator series, all aligned
/// by index, time ascending, newest last.
///
/// A snapshot is built wholesale from a fresh candle fetch every tick and
/// never mutated — there is no partially-updated state to race on.
#[derive(Debug, Clone)]
pub struct MarketSnapshot {
    pub candles: Vec<Candle>,
    pub ema: Vec<Option<f64>>,
    pub rsi: Vec<Option<f64>>,
    pub atr: Vec<Option<f64>>,
    pub trend_ema: Vec<Option<f64>>,
    pub macd: MacdSeries,
}

impl MarketSnapshot {
    pub fn from_candles(candles: Vec<Candle>, params: &StrategyParams) -> Self {
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        Self {
            ema: ema(&closes, params.ema_len),
            rsi: rsi(&closes, params.rsi_len),
            atr: atr(&candles, params.atr_len),
            trend_ema: ema(&closes, params.trend_ema_len),
            macd: macd(&closes, params.macd_fast, params.macd_slow, params.macd_signal),
            candles,
        }
    }

    /// Index of the decision candle: the second-to-last. The last candle is
    /// still in progress and can repaint, so it never drives decisions.
    pub fn decision_index(&self) -> Option<usize> {
        self.candles.len().checked_sub(2)
    }
}
