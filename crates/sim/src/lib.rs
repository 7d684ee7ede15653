use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info};

use common::{
    Candle, ContractType, Error, ExchangeClient, InstrumentInfo, OrderFill, ProtectiveKind,
    Result, Side,
};

/// A record of every order the simulator was asked to place. Tests assert
/// against this to prove the worker's order flow without a live venue.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedOrder {
    Market {
        symbol: String,
        side: Side,
        quantity: f64,
        fill_price: f64,
    },
    Protective {
        symbol: String,
        side: Side,
        quantity: f64,
        trigger_price: f64,
        kind: ProtectiveKind,
    },
    /// Reduce-only market close. `side` is the direction the closing order
    /// traded, i.e. opposite to the position it closed.
    Close {
        symbol: String,
        side: Side,
        quantity: f64,
        fill_price: f64,
    },
}

/// Deterministic in-memory exchange for dry-run and tests.
///
/// Performs no network I/O. Candles are whatever was seeded per
/// (symbol, timeframe) — empty by default, so an unseeded dry-run worker
/// simply skips every tick. Market orders fill at the close of the last
/// seeded candle for the symbol. Failures can be scripted per symbol to
/// exercise the worker's error paths.
#[derive(Default)]
pub struct SimClient {
    candles: RwLock<HashMap<(String, String), Vec<Candle>>>,
    orders: RwLock<Vec<RecordedOrder>>,
    /// Last seeded close per symbol, used as the fill price.
    last_close: RwLock<HashMap<String, f64>>,
    /// Scripted error per symbol: popped queue of results for fetch_candles.
    scripted_fetch_errors: RwLock<HashMap<String, Vec<Error>>>,
    /// Symbols whose instrument_info reports a non-perpetual contract.
    non_perpetual: RwLock<Vec<String>>,
    /// When set, the next market order fails with this error.
    next_market_order_error: RwLock<Option<Error>>,
    /// When set, the next protective order fails with this error.
    next_protective_order_error: RwLock<Option<Error>>,
    /// When set, the next close order fails with this error.
    next_close_error: RwLock<Option<Error>>,
    /// Symbols whose next close order finds nothing to reduce, as if a
    /// protective order had already flattened the position at the venue.
    already_flat: RwLock<Vec<String>>,
    /// Order ids passed to `cancel_order`, oldest first.
    cancelled: RwLock<Vec<String>>,
}

impl SimClient {
    pub fn new() -> Self {
        info!("SimClient initialized — no orders will reach the exchange");
        Self::default()
    }

    /// Seed the candle series returned for (symbol, timeframe).
    pub async fn seed_candles(&self, symbol: &str, timeframe: &str, candles: Vec<Candle>) {
        if let Some(last) = candles.last() {
            self.last_close
                .write()
                .await
                .insert(symbol.to_string(), last.close);
        }
        self.candles
            .write()
            .await
            .insert((symbol.to_string(), timeframe.to_string()), candles);
    }

    /// Script errors for upcoming `fetch_candles` calls on `symbol`,
    /// consumed in order before seeded data is served again.
    pub async fn script_fetch_errors(&self, symbol: &str, errors: Vec<Error>) {
        self.scripted_fetch_errors
            .write()
            .await
            .insert(symbol.to_string(), errors);
    }

    /// Make `instrument_info` report `symbol` as a non-perpetual contract.
    pub async fn mark_non_perpetual(&self, symbol: &str) {
        self.non_perpetual.write().await.push(symbol.to_string());
    }

    pub async fn fail_next_market_order(&self, error: Error) {
        *self.next_market_order_error.write().await = Some(error);
    }

    pub async fn fail_next_protective_order(&self, error: Error) {
        *self.next_protective_order_error.write().await = Some(error);
    }

    pub async fn fail_next_close(&self, error: Error) {
        *self.next_close_error.write().await = Some(error);
    }

    /// Make the next close order on `symbol` find nothing to reduce —
    /// as if a resting protective order already flattened the position.
    pub async fn mark_already_flat(&self, symbol: &str) {
        self.already_flat.write().await.push(symbol.to_string());
    }

    /// Every order requested so far, oldest first.
    pub async fn recorded_orders(&self) -> Vec<RecordedOrder> {
        self.orders.read().await.clone()
    }

    /// Every order id cancelled so far, oldest first.
    pub async fn cancelled_orders(&self) -> Vec<String> {
        self.cancelled.read().await.clone()
    }
}

#[async_trait]
impl ExchangeClient for SimClient {
    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        if let Some(queue) = self.scripted_fetch_errors.write().await.get_mut(symbol) {
            if !queue.is_empty() {
                return Err(queue.remove(0));
            }
        }

        let candles = self.candles.read().await;
        let series = candles
            .get(&(symbol.to_string(), timeframe.to_string()))
            .cloned()
            .unwrap_or_default();
        let start = series.len().saturating_sub(limit);
        Ok(series[start..].to_vec())
    }

    async fn instrument_info(&self, symbol: &str) -> Result<InstrumentInfo> {
        let contract_type = if self.non_perpetual.read().await.iter().any(|s| s == symbol) {
            ContractType::Other
        } else {
            ContractType::LinearPerpetual
        };
        Ok(InstrumentInfo {
            symbol: symbol.to_string(),
            contract_type,
        })
    }

    async fn place_market_order(
        &self,
        symbol: &str,
        side: Side,
        quantity: f64,
    ) -> Result<OrderFill> {
        if let Some(err) = self.next_market_order_error.write().await.take() {
            return Err(err);
        }

        let fill_price = self
            .last_close
            .read()
            .await
            .get(symbol)
            .copied()
            .ok_or_else(|| {
                Error::Transient(format!("SimClient has no seeded price for '{symbol}'"))
            })?;

        debug!(%symbol, %side, qty = quantity, fill = fill_price, "sim market fill");
        self.orders.write().await.push(RecordedOrder::Market {
            symbol: symbol.to_string(),
            side,
            quantity,
            fill_price,
        });

        Ok(OrderFill {
            order_id: uuid::Uuid::new_v4().to_string(),
            fill_price,
            quantity,
        })
    }

    async fn place_protective_order(
        &self,
        symbol: &str,
        side: Side,
        quantity: f64,
        trigger_price: f64,
        kind: ProtectiveKind,
    ) -> Result<String> {
        if let Some(err) = self.next_protective_order_error.write().await.take() {
            return Err(err);
        }

        debug!(%symbol, %side, %kind, trigger = trigger_price, "sim protective order");
        self.orders.write().await.push(RecordedOrder::Protective {
            symbol: symbol.to_string(),
            side,
            quantity,
            trigger_price,
            kind,
        });

        Ok(uuid::Uuid::new_v4().to_string())
    }

    async fn close_position(
        &self,
        symbol: &str,
        side: Side,
        quantity: f64,
    ) -> Result<Option<OrderFill>> {
        if let Some(err) = self.next_close_error.write().await.take() {
            return Err(err);
        }

        {
            let mut flat = self.already_flat.write().await;
            if let Some(i) = flat.iter().position(|s| s == symbol) {
                flat.remove(i);
                debug!(%symbol, "sim close: nothing to reduce");
                return Ok(None);
            }
        }

        let fill_price = self
            .last_close
            .read()
            .await
            .get(symbol)
            .copied()
            .ok_or_else(|| {
                Error::Transient(format!("SimClient has no seeded price for '{symbol}'"))
            })?;

        debug!(%symbol, %side, qty = quantity, fill = fill_price, "sim close fill");
        self.orders.write().await.push(RecordedOrder::Close {
            symbol: symbol.to_string(),
            side: side.opposite(),
            quantity,
            fill_price,
        });

        Ok(Some(OrderFill {
            order_id: uuid::Uuid::new_v4().to_string(),
            fill_price,
            quantity,
        }))
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<()> {
        debug!(%symbol, order_id, "sim cancel");
        self.cancelled.write().await.push(order_id.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn candle(i: usize, close: f64) -> Candle {
        Candle {
            open_time: Utc.timestamp_opt(i as i64 * 180, 0).unwrap(),
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 1.0,
        }
    }

    #[tokio::test]
    async fn unseeded_symbol_returns_empty_series() {
        let client = SimClient::new();
        let candles = client.fetch_candles("BTCUSDT", "3", 100).await.unwrap();
        assert!(candles.is_empty());
    }

    #[tokio::test]
    async fn fetch_respects_limit_newest_last() {
        let client = SimClient::new();
        let series: Vec<Candle> = (0..10).map(|i| candle(i, 100.0 + i as f64)).collect();
        client.seed_candles("BTCUSDT", "3", series).await;

        let out = client.fetch_candles("BTCUSDT", "3", 4).await.unwrap();
        assert_eq!(out.len(), 4);
        assert!((out.last().unwrap().close - 109.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn market_order_fills_at_last_seeded_close() {
        let client = SimClient::new();
        client
            .seed_candles("ETHUSDT", "15", vec![candle(0, 500.0), candle(1, 510.0)])
            .await;

        let fill = client
            .place_market_order("ETHUSDT", Side::Long, 0.2)
            .await
            .unwrap();
        assert!((fill.fill_price - 510.0).abs() < 1e-9);

        let orders = client.recorded_orders().await;
        assert_eq!(orders.len(), 1);
        assert!(matches!(orders[0], RecordedOrder::Market { .. }));
    }

    #[tokio::test]
    async fn scripted_fetch_errors_are_consumed_in_order() {
        let client = SimClient::new();
        client.seed_candles("BTCUSDT", "3", vec![candle(0, 100.0)]).await;
        client
            .script_fetch_errors(
                "BTCUSDT",
                vec![
                    Error::Transient("rate limited".into()),
                    Error::Transient("timeout".into()),
                ],
            )
            .await;

        assert!(client.fetch_candles("BTCUSDT", "3", 10).await.is_err());
        assert!(client.fetch_candles("BTCUSDT", "3", 10).await.is_err());
        // Queue drained — seeded data flows again
        assert_eq!(client.fetch_candles("BTCUSDT", "3", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn close_fills_opposite_unless_venue_is_already_flat() {
        let client = SimClient::new();
        client.seed_candles("ETHUSDT", "15", vec![candle(0, 500.0)]).await;

        let fill = client
            .close_position("ETHUSDT", Side::Long, 0.2)
            .await
            .unwrap()
            .expect("seeded venue should fill the close");
        assert!((fill.fill_price - 500.0).abs() < 1e-9);

        let orders = client.recorded_orders().await;
        assert!(
            matches!(&orders[0], RecordedOrder::Close { side: Side::Short, .. }),
            "closing a long trades short: {orders:?}"
        );

        // Marked flat: the next close finds nothing to reduce and records
        // no order.
        client.mark_already_flat("ETHUSDT").await;
        let fill = client.close_position("ETHUSDT", Side::Long, 0.2).await.unwrap();
        assert!(fill.is_none());
        assert_eq!(client.recorded_orders().await.len(), 1);
    }

    #[tokio::test]
    async fn cancelled_order_ids_are_recorded() {
        let client = SimClient::new();
        client.cancel_order("BTCUSDT", "abc-123").await.unwrap();
        assert_eq!(client.cancelled_orders().await, vec!["abc-123".to_string()]);
    }

    #[tokio::test]
    async fn instrument_info_defaults_to_linear_perpetual() {
        let client = SimClient::new();
        let info = client.instrument_info("BTCUSDT").await.unwrap();
        assert_eq!(info.contract_type, ContractType::LinearPerpetual);

        client.mark_non_perpetual("SPOTCOIN").await;
        let info = client.instrument_info("SPOTCOIN").await.unwrap();
        assert_eq!(info.contract_type, ContractType::Other);
    }
}
