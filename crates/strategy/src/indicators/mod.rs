//! Indicator series functions.
//!
//! Every function maps an input series to an output series of the same
//! length, with leading `None`s while the indicator is still warming up.
//! Keeping the output aligned with the input lets the evaluator index all
//! indicators by candle position without bookkeeping.

mod atr;
mod ema;
mod macd;
mod rsi;

pub use atr::atr;
pub use ema::ema;
pub use macd::{macd, MacdSeries};
pub use rsi::rsi;
