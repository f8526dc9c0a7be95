//! The boundary to the brokerage client library. The transport (socket
//! framing, message codec) lives behind [`Gateway`]; the session only sees
//! typed outbound calls and the [`GatewayEvent`] stream.

pub mod sim;

use crate::error::SessionError;
use crate::market::types::{Bar, BarSize, QuoteKind, Security};
use crate::trading::types::OrderPayload;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedReceiver;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TickStreamKind {
    BidAsk,
    TradePrints,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoricalBarsRequest {
    pub request_id: i64,
    pub security: Security,
    /// End anchor for the window; `None` means "now".
    pub anchor: Option<NaiveDate>,
    pub duration_days: u32,
    pub bar_size: BarSize,
    /// When set the gateway keeps streaming updates for the open bar after
    /// the historical burst.
    pub keep_updated: bool,
}

/// Inbound callbacks from the transport's message queue. One enum instead of
/// the original's dozens of per-callback stubs; the pump dispatches on it
/// with a default no-op branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum GatewayEvent {
    ConnectionAck,
    ConnectionClosed,
    #[serde(rename_all = "camelCase")]
    Error {
        request_id: i64,
        code: i32,
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    Bar { request_id: i64, bar: Bar },
    #[serde(rename_all = "camelCase")]
    BarStreamEnd { request_id: i64 },
    #[serde(rename_all = "camelCase")]
    Tick {
        request_id: i64,
        kind: QuoteKind,
        timestamp: i64,
        price: f64,
        size: f64,
    },
    #[serde(rename_all = "camelCase")]
    OrderStatus {
        order_id: i64,
        status: String,
        filled: f64,
        remaining: f64,
        avg_fill_price: f64,
        last_fill_price: f64,
    },
    #[serde(rename_all = "camelCase")]
    NextValidOrderId { order_id: i64 },
    #[serde(rename_all = "camelCase")]
    AccountValue {
        account_id: String,
        key: String,
        value: String,
    },
    #[serde(rename_all = "camelCase")]
    PositionChanged {
        account_id: String,
        security: Security,
        quantity: f64,
        avg_cost: f64,
    },
    #[serde(rename_all = "camelCase")]
    AccountList { accounts: Vec<String> },
}

/// Outbound call surface of the brokerage client library. Requests are
/// fire-and-forget: a `Ok(())` means the call was queued, never that the
/// gateway answered. Cancellations are best-effort by contract and so do not
/// return a result.
pub trait Gateway: Send + Sync {
    /// Open the duplex channel. Returns the event stream for this
    /// connectivity session once the gateway acknowledged the handshake.
    fn connect(&self) -> Result<UnboundedReceiver<GatewayEvent>, SessionError>;

    fn disconnect(&self);

    fn request_historical_bars(&self, request: HistoricalBarsRequest) -> Result<(), SessionError>;

    fn request_tick_stream(
        &self,
        request_id: i64,
        security: &Security,
        kind: TickStreamKind,
    ) -> Result<(), SessionError>;

    fn cancel_tick_stream(&self, request_id: i64);

    fn cancel_historical(&self, request_id: i64);

    fn cancel_market_data(&self, request_id: i64);

    fn place_order(
        &self,
        order_id: i64,
        security: &Security,
        payload: &OrderPayload,
    ) -> Result<(), SessionError>;

    fn request_account_updates(&self, subscribe: bool, account_id: &str);
}
