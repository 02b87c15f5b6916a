// Kraken-flavoured exchange adapter: WebSocket streams for market data and
// user trades, REST for order entry and queries.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, error, info, warn};

use crate::core::types::{OrderSide, OrderStatus};
use crate::error::{TradingError, TradingResult};

use super::{
    Depth, DepthLevel, ExchangeAdapter, FillEvent, MarketInfo, OpenOrderInfo, OrderAck,
    StreamEvent,
};

type HmacSha256 = Hmac<Sha256>;

type WsSink = futures_util::stream::SplitSink<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;

#[derive(Debug, Clone)]
pub struct Credentials {
    pub api_key: String,
    pub api_secret: String,
}

pub struct KrakenAdapter {
    ws_url: String,
    rest_url: String,
    credentials: Credentials,
    http: reqwest::Client,
    ws_sender: Mutex<Option<WsSink>>,
}

impl KrakenAdapter {
    pub fn new(ws_url: String, rest_url: String, credentials: Credentials) -> Self {
        Self {
            ws_url,
            rest_url,
            credentials,
            http: reqwest::Client::new(),
            ws_sender: Mutex::new(None),
        }
    }

    /// Request signature: HMAC-SHA256 over path + nonce + form body
    fn sign(&self, path: &str, nonce: u64, postdata: &str) -> String {
        let payload = format!("{}{}{}", path, nonce, postdata);
        let mut mac = HmacSha256::new_from_slice(self.credentials.api_secret.as_bytes())
            .expect("HMAC accepts any key length");
        mac.update(payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    async fn private_post(&self, path: &str, mut form: Vec<(String, String)>) -> TradingResult<Value> {
        let nonce = chrono::Utc::now().timestamp_millis() as u64;
        form.push(("nonce".to_string(), nonce.to_string()));

        let postdata = form
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");
        let signature = self.sign(path, nonce, &postdata);

        let url = format!("{}{}", self.rest_url, path);
        let response = self
            .http
            .post(&url)
            .header("API-Key", &self.credentials.api_key)
            .header("API-Sign", signature)
            .form(&form)
            .send()
            .await?;

        let body: Value = response.json().await?;

        if let Some(errors) = body.get("error").and_then(|e| e.as_array()) {
            if let Some(first) = errors.first().and_then(|e| e.as_str()) {
                if first.contains("Insufficient") {
                    return Err(TradingError::InsufficientFunds(0.0, 0.0));
                }
                if first.contains("Rate limit") {
                    return Err(TradingError::ApiRateLimit(first.to_string()));
                }
                if first.contains("Invalid key") || first.contains("Permission denied") {
                    return Err(TradingError::ApiAuthentication(first.to_string()));
                }
                return Err(TradingError::ApiResponse(first.to_string()));
            }
        }

        body.get("result")
            .cloned()
            .ok_or_else(|| TradingError::ApiResponse("missing result field".to_string()))
    }

    async fn send_ws(&self, message: Value) -> TradingResult<()> {
        let mut guard = self.ws_sender.lock().await;
        let sender = guard
            .as_mut()
            .ok_or_else(|| TradingError::ApiConnection("stream not connected".to_string()))?;
        sender
            .send(Message::Text(message.to_string()))
            .await
            .map_err(|e| TradingError::ApiConnection(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl ExchangeAdapter for KrakenAdapter {
    async fn connect_stream(
        &self,
        events: mpsc::UnboundedSender<StreamEvent>,
    ) -> TradingResult<()> {
        let (ws_stream, _) = connect_async(&self.ws_url)
            .await
            .map_err(|e| TradingError::ApiConnection(e.to_string()))?;
        info!("✅ Connected to exchange WebSocket");

        let (ws_sender, mut ws_receiver) = ws_stream.split();
        *self.ws_sender.lock().await = Some(ws_sender);

        tokio::spawn(async move {
            while let Some(message) = ws_receiver.next().await {
                match message {
                    Ok(Message::Text(text)) => {
                        if let Ok(data) = serde_json::from_str::<Value>(&text) {
                            if let Some((symbol, depth)) = parse_book_message(&data) {
                                if events.send(StreamEvent::Book { symbol, depth }).is_err() {
                                    break;
                                }
                            } else if let Some(fills) = parse_order_updates(&data) {
                                for fill in fills {
                                    if events.send(StreamEvent::Fill(fill)).is_err() {
                                        return;
                                    }
                                }
                            } else {
                                handle_stream_event(&data);
                            }
                        }
                    }
                    Ok(Message::Close(_)) => {
                        warn!("WebSocket connection closed by exchange");
                        break;
                    }
                    Err(e) => {
                        error!("WebSocket error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
        });

        Ok(())
    }

    async fn subscribe_orderbook(&self, symbols: &[String]) -> TradingResult<()> {
        self.send_ws(json!({
            "event": "subscribe",
            "pair": symbols,
            "subscription": { "name": "book", "depth": 10 }
        }))
        .await?;
        info!("📖 Subscribed to order book for {} symbol(s)", symbols.len());
        Ok(())
    }

    async fn subscribe_user_trades(&self, symbols: &[String]) -> TradingResult<()> {
        self.send_ws(json!({
            "event": "subscribe",
            "pair": symbols,
            "subscription": { "name": "openOrders", "token": self.credentials.api_key }
        }))
        .await?;
        info!("📡 Subscribed to user trade updates");
        Ok(())
    }

    async fn get_depth(&self, symbol: &str) -> TradingResult<Depth> {
        let url = format!("{}/0/public/Depth?pair={}&count=10", self.rest_url, symbol);
        let body: Value = self.http.get(&url).send().await?.json().await?;

        let result = body
            .get("result")
            .and_then(|r| r.as_object())
            .and_then(|r| r.values().next())
            .ok_or_else(|| TradingError::ApiResponse("missing depth result".to_string()))?;

        Ok(Depth {
            bids: parse_depth_levels(result.get("bids")),
            asks: parse_depth_levels(result.get("asks")),
        })
    }

    async fn get_market_info(&self, symbol: &str) -> TradingResult<MarketInfo> {
        let url = format!("{}/0/public/AssetPairs?pair={}", self.rest_url, symbol);
        let body: Value = self.http.get(&url).send().await?.json().await?;

        let result = body
            .get("result")
            .and_then(|r| r.as_object())
            .and_then(|r| r.values().next())
            .ok_or_else(|| TradingError::ApiResponse("missing pair info".to_string()))?;

        let price_decimals = result.get("pair_decimals").and_then(|v| v.as_u64()).unwrap_or(4);
        let qty_decimals = result.get("lot_decimals").and_then(|v| v.as_u64()).unwrap_or(8);
        let min_qty = result
            .get("ordermin")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<f64>().ok())
            .unwrap_or(0.0);

        Ok(MarketInfo {
            price_decimals: price_decimals as u32,
            qty_decimals: qty_decimals as u32,
            min_qty,
            step_size: 10f64.powi(-(qty_decimals as i32)),
        })
    }

    async fn place_order(
        &self,
        symbol: &str,
        side: OrderSide,
        price: Option<f64>,
        quantity: f64,
    ) -> TradingResult<OrderAck> {
        let mut form = vec![
            ("pair".to_string(), symbol.to_string()),
            (
                "type".to_string(),
                match side {
                    OrderSide::Buy => "buy".to_string(),
                    OrderSide::Sell => "sell".to_string(),
                },
            ),
            ("volume".to_string(), quantity.to_string()),
            // Idempotency key: a resent request cannot double-place
            ("cl_ord_id".to_string(), uuid::Uuid::new_v4().to_string()),
        ];

        match price {
            Some(p) => {
                form.push(("ordertype".to_string(), "limit".to_string()));
                form.push(("price".to_string(), p.to_string()));
            }
            None => {
                form.push(("ordertype".to_string(), "market".to_string()));
                form.push(("timeinforce".to_string(), "IOC".to_string()));
            }
        }

        let result = self.private_post("/0/private/AddOrder", form).await?;

        let id = result
            .get("txid")
            .and_then(|t| t.get(0))
            .and_then(|t| t.as_str())
            .ok_or_else(|| TradingError::OrderFailed("no order id in response".to_string()))?;

        debug!("📝 Placed {} {} order: {}", side.as_str(), symbol, id);
        Ok(OrderAck { id: id.to_string() })
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> TradingResult<()> {
        let form = vec![
            ("pair".to_string(), symbol.to_string()),
            ("txid".to_string(), order_id.to_string()),
        ];
        self.private_post("/0/private/CancelOrder", form).await?;
        debug!("🗑️  Canceled order {} on {}", order_id, symbol);
        Ok(())
    }

    async fn cancel_all_open_orders(&self, symbol: &str) -> TradingResult<()> {
        let form = vec![("pair".to_string(), symbol.to_string())];
        self.private_post("/0/private/CancelAll", form).await?;
        Ok(())
    }

    async fn get_open_order(
        &self,
        _symbol: &str,
        order_id: &str,
    ) -> TradingResult<Option<OrderStatus>> {
        let form = vec![("txid".to_string(), order_id.to_string())];
        let result = self.private_post("/0/private/QueryOrders", form).await?;

        let status = result
            .get(order_id)
            .and_then(|o| o.get("status"))
            .and_then(|s| s.as_str());

        Ok(status.and_then(map_rest_status))
    }

    async fn list_open_orders(&self, symbol: &str) -> TradingResult<Vec<OpenOrderInfo>> {
        let result = self.private_post("/0/private/OpenOrders", vec![]).await?;
        let now = chrono::Utc::now().timestamp() as f64;

        let mut orders = Vec::new();
        if let Some(open) = result.get("open").and_then(|o| o.as_object()) {
            for (id, order) in open {
                let descr = order.get("descr");
                let pair = descr
                    .and_then(|d| d.get("pair"))
                    .and_then(|p| p.as_str())
                    .unwrap_or_default();
                if pair != symbol {
                    continue;
                }

                let side = descr
                    .and_then(|d| d.get("type"))
                    .and_then(|t| t.as_str())
                    .map(|t| if t == "sell" { OrderSide::Sell } else { OrderSide::Buy })
                    .unwrap_or(OrderSide::Buy);
                let price = descr
                    .and_then(|d| d.get("price"))
                    .and_then(|p| p.as_str())
                    .and_then(|p| p.parse::<f64>().ok())
                    .unwrap_or(0.0);
                let quantity = order
                    .get("vol")
                    .and_then(|v| v.as_str())
                    .and_then(|v| v.parse::<f64>().ok())
                    .unwrap_or(0.0);
                let opened = order.get("opentm").and_then(|t| t.as_f64()).unwrap_or(now);

                orders.push(OpenOrderInfo {
                    order_id: id.clone(),
                    side,
                    price,
                    quantity,
                    age_secs: (now - opened).max(0.0),
                });
            }
        }

        Ok(orders)
    }
}

fn parse_depth_levels(levels: Option<&Value>) -> Vec<DepthLevel> {
    let mut parsed = Vec::new();
    if let Some(array) = levels.and_then(|l| l.as_array()) {
        for level in array {
            if let Some(entry) = level.as_array() {
                let price = entry
                    .first()
                    .and_then(|p| p.as_str())
                    .and_then(|p| p.parse::<f64>().ok());
                let volume = entry
                    .get(1)
                    .and_then(|v| v.as_str())
                    .and_then(|v| v.parse::<f64>().ok());
                if let (Some(price), Some(volume)) = (price, volume) {
                    parsed.push(DepthLevel { price, volume });
                }
            }
        }
    }
    parsed
}

/// Parse a streaming book snapshot/update: [channelID, {"bs"/"b": [...], "as"/"a": [...]}, "book-10", "PAIR"]
pub fn parse_book_message(data: &Value) -> Option<(String, Depth)> {
    let channel = data.get(2).and_then(|v| v.as_str())?;
    if !channel.starts_with("book") {
        return None;
    }

    let symbol = data.get(3).and_then(|p| p.as_str())?.to_string();
    let book = data.get(1)?;

    let bids = parse_stream_levels(book.get("bs").or_else(|| book.get("b")));
    let asks = parse_stream_levels(book.get("as").or_else(|| book.get("a")));

    if bids.is_empty() && asks.is_empty() {
        return None;
    }

    Some((symbol, Depth { bids, asks }))
}

fn parse_stream_levels(levels: Option<&Value>) -> Vec<DepthLevel> {
    let mut parsed = Vec::new();
    if let Some(array) = levels.and_then(|l| l.as_array()) {
        for level in array {
            if let Some(entry) = level.as_array() {
                let price = entry
                    .first()
                    .and_then(|p| p.as_str())
                    .and_then(|p| p.parse::<f64>().ok());
                let volume = entry
                    .get(1)
                    .and_then(|v| v.as_str())
                    .and_then(|v| v.parse::<f64>().ok());
                if let (Some(price), Some(volume)) = (price, volume) {
                    if volume > 0.0 {
                        parsed.push(DepthLevel { price, volume });
                    }
                }
            }
        }
    }
    parsed
}

/// Parse an order-status stream message:
/// [[{"TXID": {"status": "...", "descr": {...}, "vol_exec": "...", "avg_price": "..."}}], "openOrders", {...}]
pub fn parse_order_updates(data: &Value) -> Option<Vec<FillEvent>> {
    let channel = data.get(1).and_then(|v| v.as_str())?;
    if channel != "openOrders" {
        return None;
    }

    let updates = data.get(0)?.as_array()?;
    let mut fills = Vec::new();

    for update in updates {
        let map = update.as_object()?;
        for (order_id, body) in map {
            let status = body.get("status").and_then(|s| s.as_str()).and_then(map_rest_status);
            let Some(status) = status else { continue };

            let descr = body.get("descr");
            let symbol = descr
                .and_then(|d| d.get("pair"))
                .and_then(|p| p.as_str())
                .unwrap_or_default()
                .to_string();
            let side = descr
                .and_then(|d| d.get("type"))
                .and_then(|t| t.as_str())
                .map(|t| if t == "sell" { OrderSide::Sell } else { OrderSide::Buy })
                .unwrap_or(OrderSide::Buy);
            let price = body
                .get("avg_price")
                .or_else(|| descr.and_then(|d| d.get("price")))
                .and_then(|p| p.as_str())
                .and_then(|p| p.parse::<f64>().ok())
                .unwrap_or(0.0);
            let quantity = body
                .get("vol_exec")
                .or_else(|| body.get("vol"))
                .and_then(|v| v.as_str())
                .and_then(|v| v.parse::<f64>().ok())
                .unwrap_or(0.0);

            fills.push(FillEvent {
                order_id: order_id.clone(),
                symbol,
                status,
                side,
                price,
                quantity,
            });
        }
    }

    if fills.is_empty() {
        None
    } else {
        Some(fills)
    }
}

fn map_rest_status(status: &str) -> Option<OrderStatus> {
    match status {
        "pending" | "open" => Some(OrderStatus::New),
        "partially_filled" => Some(OrderStatus::PartiallyFilled),
        "closed" => Some(OrderStatus::Filled),
        "canceled" | "expired" => Some(OrderStatus::Canceled),
        "rejected" => Some(OrderStatus::Rejected),
        _ => None,
    }
}

fn handle_stream_event(data: &Value) {
    if let Some(event) = data.get("event").and_then(|e| e.as_str()) {
        match event {
            "subscriptionStatus" => {
                if let Some(status) = data.get("status").and_then(|s| s.as_str()) {
                    debug!("📊 Subscription status: {}", status);
                }
            }
            "systemStatus" => {
                if let Some(status) = data.get("status").and_then(|s| s.as_str()) {
                    debug!("🔧 System status: {}", status);
                }
            }
            _ => {}
        }
    }
}
