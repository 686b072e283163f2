//! Binance Exchange API client
//!
//! HTTP client for the Binance spot REST API with HMAC-SHA256 request
//! signing. Every call goes through a bounded retry with exponential
//! backoff; exhaustion surfaces `ExchangeError::Transient` so the engine
//! can skip the cycle instead of stalling on a flaky network.

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::StatusCode;
use serde::Deserialize;
use sha2::Sha256;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::exchange::ExchangeClient;
use crate::types::{Balance, ExchangeError, OrderStatus, OrderUpdate, Side, SymbolFilters};

type HmacSha256 = Hmac<Sha256>;

const API_BASE_URL: &str = "https://api.binance.com";
const TESTNET_BASE_URL: &str = "https://testnet.binance.vision";

/// Binance error code for canceling an order that no longer exists
const ERR_UNKNOWN_ORDER: i64 = -2011;

#[derive(Debug, Clone)]
pub struct BinanceClient {
    api_key: String,
    api_secret: String,
    base_url: String,
    client: reqwest::Client,
    retry_attempts: u32,
    retry_backoff: Duration,
}

impl BinanceClient {
    pub fn new(
        api_key: String,
        api_secret: String,
        testnet: bool,
        retry_attempts: u32,
        retry_backoff: Duration,
    ) -> Self {
        let base_url = if testnet {
            TESTNET_BASE_URL.to_string()
        } else {
            API_BASE_URL.to_string()
        };
        BinanceClient {
            api_key,
            api_secret,
            base_url,
            client: reqwest::Client::new(),
            retry_attempts,
            retry_backoff,
        }
    }

    fn sign(&self, query: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn signed_url(&self, path: &str, query: &str) -> String {
        let query = if query.is_empty() {
            format!("timestamp={}", Utc::now().timestamp_millis())
        } else {
            format!("{}&timestamp={}", query, Utc::now().timestamp_millis())
        };
        let signature = self.sign(&query);
        format!("{}{}?{}&signature={}", self.base_url, path, query, signature)
    }

    /// Run `op` with bounded retries on transient failures
    async fn with_retry<T, F, Fut>(&self, mut op: F) -> Result<T, ExchangeError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ExchangeError>>,
    {
        let mut backoff = self.retry_backoff;
        let mut last_err = None;
        for attempt in 0..self.retry_attempts {
            match op().await {
                Ok(value) => return Ok(value),
                Err(ExchangeError::Transient(msg)) => {
                    warn!(
                        "Transient exchange error (attempt {}/{}): {}",
                        attempt + 1,
                        self.retry_attempts,
                        msg
                    );
                    last_err = Some(ExchangeError::Transient(msg));
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                Err(other) => return Err(other),
            }
        }
        Err(last_err
            .unwrap_or_else(|| ExchangeError::Transient("retry attempts exhausted".to_string())))
    }

    /// Map a response to JSON, classifying HTTP failures
    async fn read_json<T: for<'de> Deserialize<'de>>(
        response: reqwest::Response,
    ) -> Result<T, ExchangeError> {
        let status = response.status();
        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|e| ExchangeError::BadResponse(e.to_string()));
        }

        let body = response.text().await.unwrap_or_default();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ExchangeError::Transient(format!("HTTP {}: {}", status, body)));
        }
        Err(ExchangeError::OrderRejected(format!(
            "HTTP {}: {}",
            status, body
        )))
    }

    fn transient(e: reqwest::Error) -> ExchangeError {
        ExchangeError::Transient(e.to_string())
    }

    async fn price_once(&self, symbol: &str) -> Result<f64, ExchangeError> {
        let url = format!("{}/api/v3/ticker/price?symbol={}", self.base_url, symbol);
        let response = self.client.get(&url).send().await.map_err(Self::transient)?;
        let ticker: TickerResponse = Self::read_json(response).await?;
        ticker
            .price
            .parse::<f64>()
            .map_err(|e| ExchangeError::BadResponse(format!("bad price: {}", e)))
    }

    async fn filters_once(&self, symbol: &str) -> Result<SymbolFilters, ExchangeError> {
        let url = format!("{}/api/v3/exchangeInfo?symbol={}", self.base_url, symbol);
        let response = self.client.get(&url).send().await.map_err(Self::transient)?;
        let info: ExchangeInfoResponse = Self::read_json(response).await?;

        let sym = info
            .symbols
            .into_iter()
            .next()
            .ok_or_else(|| ExchangeError::BadResponse(format!("symbol {} not found", symbol)))?;

        let mut step_size = 0.0;
        let mut min_qty = 0.0;
        let mut min_notional = 0.0;
        for filter in &sym.filters {
            match filter.filter_type.as_str() {
                "LOT_SIZE" => {
                    step_size = parse_field(&filter.step_size)?;
                    min_qty = parse_field(&filter.min_qty)?;
                }
                "NOTIONAL" | "MIN_NOTIONAL" => {
                    min_notional = parse_field(&filter.min_notional)?;
                }
                _ => {}
            }
        }

        Ok(SymbolFilters {
            base_asset: sym.base_asset,
            quote_asset: sym.quote_asset,
            step_size,
            min_qty,
            min_notional,
        })
    }

    async fn place_once(
        &self,
        symbol: &str,
        side: Side,
        order_type: &str,
        price: Option<f64>,
        qty: f64,
    ) -> Result<String, ExchangeError> {
        let mut query = format!(
            "symbol={}&side={}&type={}&quantity={:.8}",
            symbol,
            side.as_str(),
            order_type,
            qty
        );
        if let Some(price) = price {
            query.push_str(&format!("&timeInForce=GTC&price={:.2}", price));
        }

        let url = self.signed_url("/api/v3/order", &query);
        let response = self
            .client
            .post(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(Self::transient)?;

        let order: OrderAck = Self::read_json(response).await?;
        Ok(order.order_id.to_string())
    }

    async fn cancel_once(&self, symbol: &str, order_id: &str) -> Result<(), ExchangeError> {
        let query = format!("symbol={}&orderId={}", symbol, order_id);
        let url = self.signed_url("/api/v3/order", &query);
        let response = self
            .client
            .delete(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(Self::transient)?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        if cancel_is_noop(&body) {
            return Ok(());
        }
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ExchangeError::Transient(format!("HTTP {}: {}", status, body)));
        }
        Err(ExchangeError::OrderRejected(format!(
            "HTTP {}: {}",
            status, body
        )))
    }

    async fn order_status_once(
        &self,
        symbol: &str,
        order_id: &str,
    ) -> Result<OrderUpdate, ExchangeError> {
        let query = format!("symbol={}&orderId={}", symbol, order_id);
        let url = self.signed_url("/api/v3/order", &query);
        let response = self
            .client
            .get(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(Self::transient)?;

        let order: OrderDetail = Self::read_json(response).await?;
        Ok(OrderUpdate {
            order_id: order.order_id.to_string(),
            status: OrderStatus::parse(&order.status),
            executed_qty: parse_field(&order.executed_qty)?,
        })
    }

    async fn open_orders_once(&self, symbol: &str) -> Result<Vec<String>, ExchangeError> {
        let query = format!("symbol={}", symbol);
        let url = self.signed_url("/api/v3/openOrders", &query);
        let response = self
            .client
            .get(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(Self::transient)?;

        let orders: Vec<OrderDetail> = Self::read_json(response).await?;
        Ok(orders.into_iter().map(|o| o.order_id.to_string()).collect())
    }

    async fn balances_once(&self) -> Result<HashMap<String, Balance>, ExchangeError> {
        let url = self.signed_url("/api/v3/account", "");
        let response = self
            .client
            .get(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(Self::transient)?;

        let account: AccountResponse = Self::read_json(response).await?;
        let mut balances = HashMap::new();
        for b in account.balances {
            balances.insert(
                b.asset,
                Balance {
                    free: parse_field(&b.free)?,
                    locked: parse_field(&b.locked)?,
                },
            );
        }
        Ok(balances)
    }
}

fn parse_field(s: &str) -> Result<f64, ExchangeError> {
    s.parse::<f64>()
        .map_err(|e| ExchangeError::BadResponse(format!("bad numeric field '{}': {}", s, e)))
}

/// Whether a failed cancel reports an order the exchange already closed.
/// Such cancels are successful no-ops: the resting order is gone either way.
fn cancel_is_noop(body: &str) -> bool {
    serde_json::from_str::<ApiError>(body)
        .map(|e| e.code == ERR_UNKNOWN_ORDER)
        .unwrap_or(false)
}

#[async_trait]
impl ExchangeClient for BinanceClient {
    async fn price(&self, symbol: &str) -> Result<f64, ExchangeError> {
        self.with_retry(|| self.price_once(symbol)).await
    }

    async fn filters(&self, symbol: &str) -> Result<SymbolFilters, ExchangeError> {
        self.with_retry(|| self.filters_once(symbol)).await
    }

    async fn place_limit(
        &self,
        symbol: &str,
        side: Side,
        price: f64,
        qty: f64,
    ) -> Result<String, ExchangeError> {
        self.with_retry(|| self.place_once(symbol, side, "LIMIT", Some(price), qty))
            .await
    }

    async fn market_sell(&self, symbol: &str, qty: f64) -> Result<(), ExchangeError> {
        self.with_retry(|| self.place_once(symbol, Side::Sell, "MARKET", None, qty))
            .await
            .map(|_| ())
    }

    async fn cancel(&self, symbol: &str, order_id: &str) -> Result<(), ExchangeError> {
        self.with_retry(|| self.cancel_once(symbol, order_id)).await
    }

    async fn order_status(
        &self,
        symbol: &str,
        order_id: &str,
    ) -> Result<OrderUpdate, ExchangeError> {
        self.with_retry(|| self.order_status_once(symbol, order_id))
            .await
    }

    async fn open_orders(&self, symbol: &str) -> Result<Vec<String>, ExchangeError> {
        self.with_retry(|| self.open_orders_once(symbol)).await
    }

    async fn balances(&self) -> Result<HashMap<String, Balance>, ExchangeError> {
        self.with_retry(|| self.balances_once()).await
    }
}

// =============================================================================
// Response types
// =============================================================================

#[derive(Debug, Deserialize)]
struct TickerResponse {
    price: String,
}

#[derive(Debug, Deserialize)]
struct ExchangeInfoResponse {
    symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SymbolInfo {
    base_asset: String,
    quote_asset: String,
    filters: Vec<FilterInfo>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct FilterInfo {
    filter_type: String,
    step_size: String,
    min_qty: String,
    min_notional: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderAck {
    order_id: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderDetail {
    order_id: i64,
    status: String,
    executed_qty: String,
}

#[derive(Debug, Deserialize)]
struct AccountResponse {
    balances: Vec<AssetBalance>,
}

#[derive(Debug, Deserialize)]
struct AssetBalance {
    asset: String,
    free: String,
    locked: String,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_of_dead_order_is_noop() {
        // Binance reports -2011 when the order already filled or canceled
        assert!(cancel_is_noop(r#"{"code":-2011,"msg":"Unknown order sent."}"#));
    }

    #[test]
    fn test_other_cancel_failures_are_not_noops() {
        assert!(!cancel_is_noop(r#"{"code":-1013,"msg":"Filter failure"}"#));
        assert!(!cancel_is_noop("not json"));
        assert!(!cancel_is_noop(""));
    }
}
