use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One closed (or in-progress, if last in a series) OHLCV interval.
///
/// Series are always ordered by `open_time` ascending, newest last, with no
/// duplicate open times.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Direction of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// The side that flattens a position opened on `self`.
    pub fn opposite(self) -> Side {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Long => write!(f, "LONG"),
            Side::Short => write!(f, "SHORT"),
        }
    }
}

/// Protective order flavor: stop below/above entry, or profit target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtectiveKind {
    Stop,
    Target,
}

impl std::fmt::Display for ProtectiveKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtectiveKind::Stop => write!(f, "STOP"),
            ProtectiveKind::Target => write!(f, "TARGET"),
        }
    }
}

/// Entry signal produced by the evaluator, consumed once by the worker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Signal {
    pub direction: Side,
    /// Close of the decision candle; order sizing and target derivation
    /// use this price.
    pub reference_price: f64,
    /// Price at which the trade thesis is wrong. Stop orders are placed
    /// here and the worker exits if a closed candle crosses it.
    pub invalidation_price: f64,
}

/// An open position. Owned exclusively by one worker, at most one at a
/// time, replaced wholesale on every transition — never field-patched.
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub side: Side,
    pub entry_price: f64,
    pub quantity: f64,
    pub invalidation_level: f64,
    /// Profit target; the resting take-profit order sits here. A closed
    /// candle beyond this level means that order has likely filled.
    pub target_level: f64,
    /// Exchange order id of the entry fill, when the venue reports one.
    pub order_id: Option<String>,
    /// Ids of the resting stop/target orders, cancelled when the worker
    /// closes the position itself.
    pub protective_order_ids: Vec<String>,
}

/// Confirmation of a filled market order.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderFill {
    pub order_id: String,
    pub fill_price: f64,
    pub quantity: f64,
}

/// Instrument metadata, checked once per worker at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentInfo {
    pub symbol: String,
    pub contract_type: ContractType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractType {
    /// USDT-margined perpetual swap — the only type this system trades.
    LinearPerpetual,
    Other,
}

/// Whether the fleet runs against the real exchange or the simulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradingMode {
    Live,
    DryRun,
}

impl std::fmt::Display for TradingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradingMode::Live => write!(f, "live"),
            TradingMode::DryRun => write!(f, "dry-run"),
        }
    }
}
