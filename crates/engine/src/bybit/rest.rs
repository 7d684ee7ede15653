use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use hmac::{Hmac, Mac};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;
use tracing::debug;

use common::{
    Candle, ContractType, Error, ExchangeClient, InstrumentInfo, OrderFill, ProtectiveKind,
    Result, Side,
};

const BASE_URL: &str = "https://api.bybit.com";
const RECV_WINDOW: &str = "5000";

// Ret codes that carry order-state meaning beyond pass/fail.
// 110017: reduce-only rule not satisfied — nothing left to reduce.
const RET_NOTHING_TO_REDUCE: i64 = 110017;
// 110001: order does not exist or is too late to cancel.
const RET_ORDER_GONE: i64 = 110001;

/// REST client for Bybit v5, linear perpetuals only.
///
/// This is the single place where remote failures are classified into the
/// Transient/Fatal taxonomy; nothing downstream inspects HTTP statuses or
/// venue return codes.
pub struct BybitClient {
    api_key: String,
    secret: String,
    http: Client,
}

impl BybitClient {
    pub fn new(api_key: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            secret: secret.into(),
            http: Client::builder()
                .use_rustls_tls()
                .build()
                .expect("Failed to build HTTP client"),
        }
    }

    fn timestamp_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before epoch")
            .as_millis() as u64
    }

    /// Bybit v5 signature: HMAC-SHA256 over
    /// `timestamp + api_key + recv_window + payload`.
    fn sign(&self, timestamp: u64, payload: &str) -> String {
        type HmacSha256 = Hmac<Sha256>;
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .expect("HMAC accepts any key length");
        mac.update(format!("{timestamp}{}{RECV_WINDOW}{payload}", self.api_key).as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    async fn public_get(&self, path: &str, query: &str) -> Result<String> {
        let url = format!("{BASE_URL}{path}?{query}");
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Transient(format!("request failed: {e}")))?;
        Self::read_body(resp).await
    }

    async fn signed_post(&self, path: &str, body: &serde_json::Value) -> Result<String> {
        let payload = body.to_string();
        let ts = Self::timestamp_ms();
        let signature = self.sign(ts, &payload);

        let resp = self
            .http
            .post(format!("{BASE_URL}{path}"))
            .header("X-BAPI-API-KEY", &self.api_key)
            .header("X-BAPI-TIMESTAMP", ts.to_string())
            .header("X-BAPI-RECV-WINDOW", RECV_WINDOW)
            .header("X-BAPI-SIGN", signature)
            .header("Content-Type", "application/json")
            .body(payload)
            .send()
            .await
            .map_err(|e| Error::Transient(format!("request failed: {e}")))?;
        Self::read_body(resp).await
    }

    /// HTTP-level classification: auth statuses are fatal, rate limiting
    /// and server errors are transient.
    async fn read_body(resp: reqwest::Response) -> Result<String> {
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| Error::Transient(format!("failed to read response: {e}")))?;

        match status {
            s if s.is_success() => Ok(body),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(Error::Fatal(format!("HTTP {status}: {body}")))
            }
            _ => Err(Error::Transient(format!("HTTP {status}: {body}"))),
        }
    }

    /// Venue-level classification of the v5 envelope ret code.
    fn check_ret_code(envelope: &ApiEnvelope) -> Result<()> {
        match envelope.ret_code {
            0 => Ok(()),
            // 10003/10004/10005: invalid key / signature / permissions
            10003..=10005 => Err(Error::Fatal(format!(
                "auth error {}: {}",
                envelope.ret_code, envelope.ret_msg
            ))),
            // 10001: request parameter error (bad symbol, bad interval)
            10001 => Err(Error::Fatal(format!(
                "invalid request {}: {}",
                envelope.ret_code, envelope.ret_msg
            ))),
            // 10006: rate limit; 10016: server error — and anything unknown
            // is assumed recoverable rather than killing the worker
            code => Err(Error::Transient(format!(
                "exchange error {code}: {}",
                envelope.ret_msg
            ))),
        }
    }

    /// Like `check_ret_code`, but a reduce-only order rejected because the
    /// position is already flat is a confirmation, not a failure. Returns
    /// whether the order was actually placed.
    fn check_close_ret_code(envelope: &ApiEnvelope) -> Result<bool> {
        if envelope.ret_code == RET_NOTHING_TO_REDUCE {
            return Ok(false);
        }
        Self::check_ret_code(envelope)?;
        Ok(true)
    }

    /// Cancelling an order that already filled or was already cancelled is
    /// the desired end state, not an error.
    fn check_cancel_ret_code(envelope: &ApiEnvelope) -> Result<()> {
        if envelope.ret_code == RET_ORDER_GONE {
            return Ok(());
        }
        Self::check_ret_code(envelope)
    }

    fn parse<T: for<'de> Deserialize<'de>>(body: &str) -> Result<ApiEnvelope<T>> {
        let envelope: ApiEnvelope<T> = serde_json::from_str(body)
            .map_err(|e| Error::Transient(format!("malformed exchange response: {e}")))?;
        Ok(envelope)
    }

    async fn last_price(&self, symbol: &str) -> Result<f64> {
        let body = self
            .public_get(
                "/v5/market/tickers",
                &format!("category=linear&symbol={symbol}"),
            )
            .await?;
        let envelope = Self::parse::<TickerResult>(&body)?;
        Self::check_ret_code(&envelope.erase())?;
        let ticker = envelope
            .result
            .and_then(|r| r.list.into_iter().next())
            .ok_or_else(|| Error::Transient(format!("no ticker returned for {symbol}")))?;
        ticker
            .last_price
            .parse::<f64>()
            .map_err(|e| Error::Transient(format!("bad ticker price: {e}")))
    }
}

#[async_trait]
impl ExchangeClient for BybitClient {
    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        let query =
            format!("category=linear&symbol={symbol}&interval={timeframe}&limit={limit}");
        let body = self.public_get("/v5/market/kline", &query).await?;
        let envelope = Self::parse::<KlineResult>(&body)?;
        Self::check_ret_code(&envelope.erase())?;

        let rows = envelope.result.map(|r| r.list).unwrap_or_default();

        // Bybit returns klines newest first; callers want time ascending.
        let mut candles = rows
            .iter()
            .map(|row| parse_kline_row(row))
            .collect::<Result<Vec<Candle>>>()?;
        candles.reverse();

        debug!(%symbol, %timeframe, count = candles.len(), "fetched candles");
        Ok(candles)
    }

    async fn instrument_info(&self, symbol: &str) -> Result<InstrumentInfo> {
        let body = self
            .public_get(
                "/v5/market/instruments-info",
                &format!("category=linear&symbol={symbol}"),
            )
            .await?;
        let envelope = Self::parse::<InstrumentResult>(&body)?;
        Self::check_ret_code(&envelope.erase())?;

        let entry = envelope
            .result
            .and_then(|r| r.list.into_iter().next())
            .ok_or_else(|| Error::Fatal(format!("unknown instrument: {symbol}")))?;

        let contract_type = if entry.contract_type == "LinearPerpetual" {
            ContractType::LinearPerpetual
        } else {
            ContractType::Other
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
        let body = json!({
            "category": "linear",
            "symbol": symbol,
            "side": order_side(side),
            "orderType": "Market",
            "qty": format!("{quantity}"),
            "orderLinkId": uuid::Uuid::new_v4().to_string(),
        });

        debug!(%symbol, %side, qty = quantity, "submitting market order");
        let text = self.signed_post("/v5/order/create", &body).await?;
        let envelope = Self::parse::<OrderResult>(&text)?;
        Self::check_ret_code(&envelope.erase())?;

        let order_id = envelope
            .result
            .map(|r| r.order_id)
            .ok_or_else(|| Error::Transient("order accepted without an id".into()))?;

        // The create endpoint does not echo the fill; approximate with the
        // latest traded price.
        let fill_price = self.last_price(symbol).await?;

        Ok(OrderFill {
            order_id,
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
        // The protective order closes the position, so it trades opposite
        // to the position side and is reduce-only.
        let trigger_direction = match (side, kind) {
            // Long positions: stop fires on a falling price, target rising
            (Side::Long, ProtectiveKind::Stop) | (Side::Short, ProtectiveKind::Target) => 2,
            (Side::Long, ProtectiveKind::Target) | (Side::Short, ProtectiveKind::Stop) => 1,
        };

        let body = json!({
            "category": "linear",
            "symbol": symbol,
            "side": order_side(side.opposite()),
            "orderType": "Market",
            "qty": format!("{quantity}"),
            "triggerPrice": format!("{trigger_price}"),
            "triggerDirection": trigger_direction,
            "reduceOnly": true,
            "orderLinkId": uuid::Uuid::new_v4().to_string(),
        });

        debug!(%symbol, %side, %kind, trigger = trigger_price, "submitting protective order");
        let text = self.signed_post("/v5/order/create", &body).await?;
        let envelope = Self::parse::<OrderResult>(&text)?;
        Self::check_ret_code(&envelope.erase())?;

        envelope
            .result
            .map(|r| r.order_id)
            .ok_or_else(|| Error::Transient("order accepted without an id".into()))
    }

    async fn close_position(
        &self,
        symbol: &str,
        side: Side,
        quantity: f64,
    ) -> Result<Option<OrderFill>> {
        let body = json!({
            "category": "linear",
            "symbol": symbol,
            "side": order_side(side.opposite()),
            "orderType": "Market",
            "qty": format!("{quantity}"),
            "reduceOnly": true,
            "orderLinkId": uuid::Uuid::new_v4().to_string(),
        });

        debug!(%symbol, %side, qty = quantity, "submitting close order");
        let text = self.signed_post("/v5/order/create", &body).await?;
        let envelope = Self::parse::<OrderResult>(&text)?;
        if !Self::check_close_ret_code(&envelope.erase())? {
            debug!(%symbol, "nothing to reduce — position already closed");
            return Ok(None);
        }

        let order_id = envelope
            .result
            .map(|r| r.order_id)
            .ok_or_else(|| Error::Transient("order accepted without an id".into()))?;
        let fill_price = self.last_price(symbol).await?;

        Ok(Some(OrderFill {
            order_id,
            fill_price,
            quantity,
        }))
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<()> {
        let body = json!({
            "category": "linear",
            "symbol": symbol,
            "orderId": order_id,
        });

        debug!(%symbol, order_id, "cancelling order");
        let text = self.signed_post("/v5/order/cancel", &body).await?;
        let envelope = Self::parse::<OrderResult>(&text)?;
        Self::check_cancel_ret_code(&envelope.erase())
    }
}

fn order_side(side: Side) -> &'static str {
    match side {
        Side::Long => "Buy",
        Side::Short => "Sell",
    }
}

/// Kline row: [startTimeMs, open, high, low, close, volume, turnover].
fn parse_kline_row(row: &[String]) -> Result<Candle> {
    if row.len() < 6 {
        return Err(Error::Transient(format!(
            "kline row has {} fields, expected at least 6",
            row.len()
        )));
    }
    let field = |i: usize| -> Result<f64> {
        row[i]
            .parse::<f64>()
            .map_err(|e| Error::Transient(format!("bad kline field {i}: {e}")))
    };
    let millis = row[0]
        .parse::<i64>()
        .map_err(|e| Error::Transient(format!("bad kline timestamp: {e}")))?;
    let open_time = Utc
        .timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| Error::Transient(format!("out-of-range kline timestamp: {millis}")))?;

    Ok(Candle {
        open_time,
        open: field(1)?,
        high: field(2)?,
        low: field(3)?,
        close: field(4)?,
        volume: field(5)?,
    })
}

// ─── Response types ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct ApiEnvelope<T = ()> {
    #[serde(rename = "retCode")]
    ret_code: i64,
    #[serde(rename = "retMsg", default)]
    ret_msg: String,
    #[serde(default)]
    result: Option<T>,
}

impl<T> ApiEnvelope<T> {
    /// Drop the payload so `check_ret_code` works over any response type.
    fn erase(&self) -> ApiEnvelope<()> {
        ApiEnvelope {
            ret_code: self.ret_code,
            ret_msg: self.ret_msg.clone(),
            result: None,
        }
    }
}

#[derive(Deserialize)]
struct KlineResult {
    #[serde(default)]
    list: Vec<Vec<String>>,
}

#[derive(Deserialize)]
struct InstrumentResult {
    #[serde(default)]
    list: Vec<InstrumentEntry>,
}

#[derive(Deserialize)]
struct InstrumentEntry {
    #[serde(rename = "contractType", default)]
    contract_type: String,
}

#[derive(Deserialize)]
struct OrderResult {
    #[serde(rename = "orderId", default)]
    order_id: String,
}

#[derive(Deserialize)]
struct TickerResult {
    #[serde(default)]
    list: Vec<TickerEntry>,
}

#[derive(Deserialize)]
struct TickerEntry {
    #[serde(rename = "lastPrice", default)]
    last_price: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kline_rows_parse_and_reject_short_rows() {
        let row: Vec<String> = ["1700000000000", "100.5", "101.0", "99.5", "100.8", "12.3"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let candle = parse_kline_row(&row).unwrap();
        assert!((candle.close - 100.8).abs() < 1e-9);
        assert_eq!(candle.open_time.timestamp_millis(), 1_700_000_000_000);

        let short_row = vec!["1700000000000".to_string()];
        assert!(parse_kline_row(&short_row).is_err());
    }

    #[test]
    fn envelope_classification_splits_fatal_from_transient() {
        let fatal = ApiEnvelope::<()> {
            ret_code: 10003,
            ret_msg: "invalid api key".into(),
            result: None,
        };
        assert!(matches!(
            BybitClient::check_ret_code(&fatal),
            Err(Error::Fatal(_))
        ));

        let rate_limited = ApiEnvelope::<()> {
            ret_code: 10006,
            ret_msg: "too many visits".into(),
            result: None,
        };
        assert!(matches!(
            BybitClient::check_ret_code(&rate_limited),
            Err(Error::Transient(_))
        ));

        let ok = ApiEnvelope::<()> {
            ret_code: 0,
            ret_msg: "OK".into(),
            result: None,
        };
        assert!(BybitClient::check_ret_code(&ok).is_ok());
    }

    #[test]
    fn close_rejected_for_empty_position_counts_as_closed() {
        let already_flat = ApiEnvelope::<()> {
            ret_code: RET_NOTHING_TO_REDUCE,
            ret_msg: "reduce-only rule not satisfied".into(),
            result: None,
        };
        assert!(!BybitClient::check_close_ret_code(&already_flat).unwrap());

        let placed = ApiEnvelope::<()> {
            ret_code: 0,
            ret_msg: "OK".into(),
            result: None,
        };
        assert!(BybitClient::check_close_ret_code(&placed).unwrap());

        let auth = ApiEnvelope::<()> {
            ret_code: 10004,
            ret_msg: "invalid signature".into(),
            result: None,
        };
        assert!(matches!(
            BybitClient::check_close_ret_code(&auth),
            Err(Error::Fatal(_))
        ));
    }

    #[test]
    fn cancelling_a_gone_order_is_not_an_error() {
        let gone = ApiEnvelope::<()> {
            ret_code: RET_ORDER_GONE,
            ret_msg: "order not exists or too late to cancel".into(),
            result: None,
        };
        assert!(BybitClient::check_cancel_ret_code(&gone).is_ok());

        let rate_limited = ApiEnvelope::<()> {
            ret_code: 10006,
            ret_msg: "too many visits".into(),
            result: None,
        };
        assert!(matches!(
            BybitClient::check_cancel_ret_code(&rate_limited),
            Err(Error::Transient(_))
        ));
    }
}
