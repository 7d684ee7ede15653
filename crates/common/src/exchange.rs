use async_trait::async_trait;

use crate::{Candle, InstrumentInfo, OrderFill, ProtectiveKind, Result, Side};

/// Abstraction over the exchange connection.
///
/// `BybitClient` implements this for live trading.
/// `SimClient` implements this for dry-run and tests.
///
/// Implementations must be safe for concurrent invocation: one shared
/// instance serves every worker in the fleet. Errors must be classified
/// here, at the boundary — `Error::Transient` for anything worth retrying,
/// `Error::Fatal` for auth/instrument problems that retrying cannot fix.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    /// Fetch up to `limit` recent candles for `symbol` at `timeframe`,
    /// ordered by open time ascending, newest last. The last candle may
    /// still be in progress.
    async fn fetch_candles(&self, symbol: &str, timeframe: &str, limit: usize)
        -> Result<Vec<Candle>>;

    /// Instrument metadata. Called once per worker at startup to assert
    /// the symbol is a linear perpetual.
    async fn instrument_info(&self, symbol: &str) -> Result<InstrumentInfo>;

    /// Submit a market order and return the fill confirmation.
    async fn place_market_order(&self, symbol: &str, side: Side, quantity: f64)
        -> Result<OrderFill>;

    /// Submit a reduce-only conditional order (stop-loss or take-profit)
    /// that closes the position when `trigger_price` is reached. `side` is
    /// the side of the open position being protected; the closing order is
    /// placed in the opposite direction. Returns the exchange order id.
    async fn place_protective_order(
        &self,
        symbol: &str,
        side: Side,
        quantity: f64,
        trigger_price: f64,
        kind: ProtectiveKind,
    ) -> Result<String>;

    /// Submit a reduce-only market order closing a position opened on
    /// `side`; the order trades in the opposite direction. Returns `None`
    /// when the venue reports nothing left to reduce — the position was
    /// already closed, typically by a protective order filling. Being
    /// reduce-only, this can never open a position.
    async fn close_position(
        &self,
        symbol: &str,
        side: Side,
        quantity: f64,
    ) -> Result<Option<OrderFill>>;

    /// Cancel a resting order by exchange id. Succeeds quietly when the
    /// order is already gone (filled or cancelled).
    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<()>;
}
