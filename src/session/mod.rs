//! Connection/session lifecycle. One [`TerminalSession`] owns the duplex
//! channel, a single background pump draining the gateway's event queue, and
//! the shared tables every flow correlates through. The session object is
//! constructed explicitly and passed by reference; its lifetime belongs to
//! the composing application layer.

pub mod accounts;

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::gateway::{Gateway, GatewayEvent};
use crate::market::ingest::{BarApplyOutcome, MarketBook, TickSeries};
use crate::market::subscription::ActiveSubscription;
use crate::market::types::{QuoteKind, Security};
use crate::requests::{decode, BlockOwner, MarketSlot, RequestLedger};
use crate::session::accounts::{AccountCache, AccountSnapshot, PositionSnapshot};
use crate::trading::approval::ApprovalDesk;
use crate::trading::orders::{OrderTracker, SubmittedBracket, TradeStatusUpdate};
use crate::trading::types::TradeTicket;
use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Gateway codes that are chatter, not failures: 162 historical data
/// cancelled, 2104/2106 data-farm connectivity notices.
pub const BENIGN_GATEWAY_CODES: [i32; 3] = [162, 2_104, 2_106];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Sentinel-identified notification; logged, never surfaced.
    Informational,
    /// Known benign code; ignored.
    Benign,
    /// Everything else; surfaced to observers as a trading error.
    Trading,
}

pub fn classify_gateway_error(request_id: i64, code: i32) -> ErrorClass {
    if request_id < 0 {
        return ErrorClass::Informational;
    }
    if BENIGN_GATEWAY_CODES.contains(&code) {
        return ErrorClass::Benign;
    }
    ErrorClass::Trading
}

/// Events re-published to UI/persistence observers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TerminalEvent {
    #[serde(rename_all = "camelCase")]
    ConnectivityChanged { connected: bool },
    #[serde(rename_all = "camelCase")]
    LiveQuote {
        security: Security,
        kind: QuoteKind,
        timestamp: i64,
        price: f64,
        size: f64,
    },
    #[serde(rename_all = "camelCase")]
    BackfillComplete { security: Security },
    #[serde(rename_all = "camelCase")]
    AccountUpdated { account: AccountSnapshot },
    #[serde(rename_all = "camelCase")]
    PositionUpdated { position: PositionSnapshot },
    #[serde(rename_all = "camelCase")]
    TradeStatusUpdated { update: TradeStatusUpdate },
    #[serde(rename_all = "camelCase")]
    AccountList { accounts: Vec<String> },
    #[serde(rename_all = "camelCase")]
    TradingError {
        request_id: Option<i64>,
        code: Option<i32>,
        message: String,
    },
}

enum PumpFlow {
    Continue,
    Shutdown,
}

pub struct TerminalSession {
    gateway: Arc<dyn Gateway>,
    pub(crate) config: SessionConfig,
    state: Mutex<ConnectionState>,
    pump_generation: AtomicU64,
    connectivity: Mutex<Option<bool>>,
    pub(crate) requests: Mutex<RequestLedger>,
    pub(crate) active: tokio::sync::Mutex<Option<ActiveSubscription>>,
    pub(crate) book: Mutex<MarketBook>,
    orders: Mutex<OrderTracker>,
    approvals: Mutex<ApprovalDesk>,
    accounts: Mutex<AccountCache>,
    events: broadcast::Sender<TerminalEvent>,
    pub(crate) cancel: CancellationToken,
}

impl TerminalSession {
    pub fn new(gateway: Arc<dyn Gateway>, config: SessionConfig) -> Arc<Self> {
        let (events, _) = broadcast::channel(config.event_buffer);
        Arc::new(Self {
            gateway,
            config,
            state: Mutex::new(ConnectionState::Disconnected),
            pump_generation: AtomicU64::new(0),
            connectivity: Mutex::new(None),
            requests: Mutex::new(RequestLedger::default()),
            active: tokio::sync::Mutex::new(None),
            book: Mutex::new(MarketBook::default()),
            orders: Mutex::new(OrderTracker::default()),
            approvals: Mutex::new(ApprovalDesk::default()),
            accounts: Mutex::new(AccountCache::default()),
            events,
            cancel: CancellationToken::new(),
        })
    }

    pub fn events(&self) -> broadcast::Receiver<TerminalEvent> {
        self.events.subscribe()
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state.lock()
    }

    pub(crate) fn gateway(&self) -> &dyn Gateway {
        self.gateway.as_ref()
    }

    /// Open the gateway channel and start this connection's pump. A call
    /// while already connected (or mid-connect) is a no-op. Each pump is
    /// tagged with a generation; a stale pump still draining its closed
    /// stream when a reconnect lands cannot reset the newer connection.
    pub fn connect(self: &Arc<Self>) -> Result<(), SessionError> {
        {
            let mut state = self.state.lock();
            if *state != ConnectionState::Disconnected {
                return Ok(());
            }
            *state = ConnectionState::Connecting;
        }

        let inbound = match self.gateway.connect() {
            Ok(inbound) => inbound,
            Err(err) => {
                *self.state.lock() = ConnectionState::Disconnected;
                return Err(err);
            }
        };
        *self.state.lock() = ConnectionState::Connected;

        let generation = self.pump_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let session = Arc::clone(self);
        tokio::spawn(async move { run_pump(session, inbound, generation).await });
        Ok(())
    }

    /// Close the transport if connected; otherwise a no-op. The pump exits
    /// on its own once the gateway reports the closed stream and is not
    /// restarted; reconnection is caller-initiated.
    pub fn disconnect(&self) {
        {
            let mut state = self.state.lock();
            if *state != ConnectionState::Connected {
                return;
            }
            *state = ConnectionState::Disconnected;
        }
        self.gateway.disconnect();
    }

    /// Stop the pump and the sweep, then close the transport.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        self.disconnect();
    }

    pub fn request_account_updates(&self, subscribe: bool) {
        self.gateway
            .request_account_updates(subscribe, &self.config.account_id);
    }

    /// Snapshot of a security's running series, including the
    /// backfill-complete flag.
    pub fn series(&self, security: &Security) -> Option<TickSeries> {
        self.book.lock().series(security).cloned()
    }

    pub fn account(&self, account_id: &str) -> Option<AccountSnapshot> {
        self.accounts.lock().account(account_id).cloned()
    }

    pub fn positions(&self) -> Vec<PositionSnapshot> {
        self.accounts.lock().positions().cloned().collect()
    }

    pub fn portfolio(&self) -> Vec<TradeTicket> {
        self.approvals.lock().portfolio().to_vec()
    }

    /// Risk-check a trade (or bracket pair) against the account cache; on
    /// pass the returned tickets carry their approval codes.
    pub fn approve_trade(
        &self,
        entry: &TradeTicket,
        stop: Option<&TradeTicket>,
    ) -> Result<(TradeTicket, Option<TradeTicket>), SessionError> {
        let budget = self
            .accounts
            .lock()
            .primary(&self.config.account_id)
            .and_then(AccountSnapshot::risk_budget);
        let mark_price = self.book.lock().mark_price(&entry.security);
        self.approvals
            .lock()
            .approve(entry, stop, budget, mark_price)
    }

    /// Execute an approved trade. Refused unless every leg's token is live;
    /// on success the legs are submitted, appended to the portfolio, and the
    /// tokens consumed.
    pub fn execute_trade(
        &self,
        entry: &TradeTicket,
        stop: Option<&TradeTicket>,
    ) -> Result<SubmittedBracket, SessionError> {
        if self.connection_state() != ConnectionState::Connected {
            return Err(SessionError::NotConnected);
        }
        if let Err(err) = self.approvals.lock().verify(entry, stop) {
            self.emit_local_error(&err);
            return Err(err);
        }

        let submitted = {
            let mut ledger = self.requests.lock();
            let mut orders = self.orders.lock();
            orders.submit(&mut ledger, self.gateway.as_ref(), entry, stop)
        };
        match submitted {
            Ok(bracket) => {
                self.approvals.lock().settle(entry, stop);
                Ok(bracket)
            }
            Err(err) => {
                self.emit_local_error(&err);
                Err(err)
            }
        }
    }

    /// Withdraw a pair's approval without executing.
    pub fn cancel_approval(&self, entry: &TradeTicket, stop: Option<&TradeTicket>) {
        self.approvals.lock().cancel(entry, stop);
    }

    /// Cancel stale, incomplete market-data backfills; driven by the
    /// periodic sweep, not by the core handlers.
    pub(crate) fn sweep_stale_requests(&self) -> Vec<i64> {
        let timeout = std::time::Duration::from_millis(self.config.stale_request_timeout_ms);
        let stale = {
            let mut ledger = self.requests.lock();
            let bases = ledger.stale_bases(timeout);
            for base in &bases {
                ledger.mark_complete(*base);
            }
            bases
        };
        for base in &stale {
            self.gateway
                .cancel_historical(base + MarketSlot::IntradayBackfill.offset());
        }
        stale
    }

    fn emit(&self, event: TerminalEvent) {
        let _ = self.events.send(event);
    }

    fn emit_local_error(&self, err: &SessionError) {
        warn!(%err, "trading error");
        self.emit(TerminalEvent::TradingError {
            request_id: None,
            code: None,
            message: err.to_string(),
        });
    }

    /// Record the transport's connectivity and notify observers.
    /// Re-asserting the same value does not re-fire the notification, and a
    /// loss is only announced after a gain was; a session torn down before
    /// the gateway ever acknowledged stays silent.
    fn set_connected(&self, connected: bool) {
        {
            let mut last = self.connectivity.lock();
            if *last == Some(connected) {
                return;
            }
            if !connected && last.is_none() {
                return;
            }
            *last = Some(connected);
        }
        self.emit(TerminalEvent::ConnectivityChanged { connected });
    }

    fn dispatch(&self, event: GatewayEvent) -> PumpFlow {
        match event {
            GatewayEvent::ConnectionAck => {
                self.set_connected(true);
                PumpFlow::Continue
            }
            GatewayEvent::ConnectionClosed => {
                *self.state.lock() = ConnectionState::Disconnected;
                self.set_connected(false);
                PumpFlow::Shutdown
            }
            GatewayEvent::Error {
                request_id,
                code,
                message,
            } => {
                match classify_gateway_error(request_id, code) {
                    ErrorClass::Informational => {
                        debug!(code, %message, "gateway notification");
                    }
                    ErrorClass::Benign => {
                        trace!(request_id, code, %message, "benign gateway code");
                    }
                    ErrorClass::Trading => {
                        warn!(request_id, code, %message, "gateway error");
                        self.emit(TerminalEvent::TradingError {
                            request_id: Some(request_id),
                            code: Some(code),
                            message,
                        });
                    }
                }
                PumpFlow::Continue
            }
            GatewayEvent::Bar { request_id, bar } => {
                self.dispatch_bar(request_id, bar);
                PumpFlow::Continue
            }
            GatewayEvent::BarStreamEnd { request_id } => {
                self.dispatch_bar_stream_end(request_id);
                PumpFlow::Continue
            }
            GatewayEvent::Tick {
                request_id,
                kind,
                timestamp,
                price,
                size,
            } => {
                self.dispatch_tick(request_id, kind, timestamp, price, size);
                PumpFlow::Continue
            }
            GatewayEvent::OrderStatus {
                order_id,
                status,
                filled,
                remaining,
                avg_fill_price,
                last_fill_price,
            } => {
                let applied = self.orders.lock().apply_status(
                    order_id,
                    &status,
                    filled,
                    remaining,
                    avg_fill_price,
                    last_fill_price,
                );
                match applied {
                    Ok(Some(update)) => self.emit(TerminalEvent::TradeStatusUpdated { update }),
                    Ok(None) => trace!(order_id, "status for unknown order dropped"),
                    Err(err) => self.emit_local_error(&err),
                }
                PumpFlow::Continue
            }
            GatewayEvent::NextValidOrderId { order_id } => {
                self.requests.lock().seed_order_counter(order_id);
                PumpFlow::Continue
            }
            GatewayEvent::AccountValue {
                account_id,
                key,
                value,
            } => {
                let updated = self.accounts.lock().apply_value(&account_id, &key, &value);
                if let Some(account) = updated {
                    self.emit(TerminalEvent::AccountUpdated { account });
                }
                PumpFlow::Continue
            }
            GatewayEvent::PositionChanged {
                account_id,
                security,
                quantity,
                avg_cost,
            } => {
                let position =
                    self.accounts
                        .lock()
                        .apply_position(&account_id, security, quantity, avg_cost);
                self.emit(TerminalEvent::PositionUpdated { position });
                PumpFlow::Continue
            }
            GatewayEvent::AccountList { accounts } => {
                self.accounts.lock().set_account_ids(accounts.clone());
                self.emit(TerminalEvent::AccountList { accounts });
                PumpFlow::Continue
            }
        }
    }

    fn resolve_security(&self, base: i64) -> Option<Security> {
        match self.requests.lock().resolve_owner(base) {
            Some(BlockOwner::Security(security)) => Some(security.clone()),
            _ => None,
        }
    }

    fn dispatch_bar(&self, request_id: i64, bar: crate::market::types::Bar) {
        let (base, offset) = decode(request_id);
        let Some(security) = self.resolve_security(base) else {
            trace!(request_id, "bar for stale block dropped");
            return;
        };
        let Some(slot) = MarketSlot::from_offset(offset) else {
            return;
        };

        let today = Utc::now().date_naive();
        let outcome = self.book.lock().apply_bar(&security, slot, bar, today);
        match outcome {
            BarApplyOutcome::ReferenceClose { close } => {
                self.emit(TerminalEvent::LiveQuote {
                    security,
                    kind: QuoteKind::Open,
                    timestamp: bar.timestamp,
                    price: close,
                    size: 0.0,
                });
            }
            BarApplyOutcome::DiscardedStaleDay => {
                debug!(request_id, timestamp = bar.timestamp, "stale-day bar discarded");
            }
            BarApplyOutcome::AppliedBackfill
            | BarApplyOutcome::AppliedLive
            | BarApplyOutcome::IgnoredSlot => {}
        }
    }

    fn dispatch_bar_stream_end(&self, request_id: i64) {
        let (base, offset) = decode(request_id);
        if MarketSlot::from_offset(offset) != Some(MarketSlot::IntradayBackfill) {
            return;
        }
        let Some(security) = self.resolve_security(base) else {
            trace!(request_id, "stream end for stale block dropped");
            return;
        };
        self.book.lock().complete_backfill(&security);
        self.requests.lock().mark_complete(base);
        self.emit(TerminalEvent::BackfillComplete { security });
    }

    fn dispatch_tick(&self, request_id: i64, kind: QuoteKind, timestamp: i64, price: f64, size: f64) {
        let (base, offset) = decode(request_id);
        if !matches!(
            MarketSlot::from_offset(offset),
            Some(MarketSlot::BidAsk) | Some(MarketSlot::TradePrints)
        ) {
            return;
        }
        let Some(security) = self.resolve_security(base) else {
            trace!(request_id, "tick for stale block dropped");
            return;
        };
        self.emit(TerminalEvent::LiveQuote {
            security,
            kind,
            timestamp,
            price,
            size,
        });
    }
}

/// Drain and dispatch queued gateway messages until the transport closes or
/// the session shuts down. Exits cleanly on failure and is never restarted
/// by itself. The exit side effects are skipped when a newer connection has
/// already superseded this pump's generation.
async fn run_pump(
    session: Arc<TerminalSession>,
    mut inbound: UnboundedReceiver<GatewayEvent>,
    generation: u64,
) {
    info!(generation, "session pump started");
    loop {
        tokio::select! {
            _ = session.cancel.cancelled() => {
                debug!("session pump cancelled");
                break;
            }
            event = inbound.recv() => {
                let Some(event) = event else {
                    error!("gateway event stream closed");
                    break;
                };
                match session.dispatch(event) {
                    PumpFlow::Continue => {}
                    PumpFlow::Shutdown => break,
                }
            }
        }
    }
    if session.pump_generation.load(Ordering::SeqCst) == generation {
        *session.state.lock() = ConnectionState::Disconnected;
        session.set_connected(false);
    } else {
        debug!(generation, "stale pump exited after reconnect");
    }
    info!(generation, "session pump exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SessionArgs, SessionConfig};
    use crate::gateway::sim::{SimCall, SimGateway};
    use crate::market::types::Bar;
    use crate::trading::types::{OrderKind, OrderSide, OrderStatus};
    use std::time::Duration;
    use tokio::time::timeout;

    fn test_config() -> SessionConfig {
        SessionArgs {
            cancel_pacing_ms: Some(0),
            ..SessionArgs::default()
        }
        .normalize()
        .expect("test config is valid")
    }

    fn session_with_sim() -> (Arc<TerminalSession>, Arc<SimGateway>) {
        let gateway = Arc::new(SimGateway::new());
        let session = TerminalSession::new(gateway.clone(), test_config());
        (session, gateway)
    }

    async fn next_event(rx: &mut broadcast::Receiver<TerminalEvent>) -> TerminalEvent {
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("event within deadline")
            .expect("channel open")
    }

    fn today_ms() -> i64 {
        Utc::now().timestamp_millis()
    }

    fn bar(timestamp: i64, close: f64) -> Bar {
        Bar {
            timestamp,
            open: close,
            high: close,
            low: close,
            close,
            volume: 1.0,
        }
    }

    fn fund_account(gateway: &SimGateway) {
        gateway.push(GatewayEvent::AccountValue {
            account_id: "DU1".to_string(),
            key: "AvailableFunds".to_string(),
            value: "1000000".to_string(),
        });
    }

    fn ticket(id: i64, quantity: f64, limit: f64) -> TradeTicket {
        TradeTicket::new(
            id,
            Security::stock("AAPL"),
            OrderSide::Buy,
            quantity,
            OrderKind::Limit { limit_price: limit },
        )
    }

    #[test]
    fn classifies_gateway_errors() {
        assert_eq!(classify_gateway_error(-1, 300), ErrorClass::Informational);
        assert_eq!(classify_gateway_error(55, 162), ErrorClass::Benign);
        assert_eq!(classify_gateway_error(55, 2104), ErrorClass::Benign);
        assert_eq!(classify_gateway_error(55, 999), ErrorClass::Trading);
    }

    #[tokio::test]
    async fn connect_is_idempotent() {
        let (session, gateway) = session_with_sim();
        session.connect().expect("first connect");
        session.connect().expect("repeat connect is a no-op");

        let connects = gateway
            .calls()
            .into_iter()
            .filter(|call| *call == SimCall::Connect)
            .count();
        assert_eq!(connects, 1);
        assert_eq!(session.connection_state(), ConnectionState::Connected);
        session.shutdown();
    }

    #[tokio::test]
    async fn disconnect_only_closes_when_connected() {
        let (session, gateway) = session_with_sim();
        session.disconnect();
        assert!(gateway.calls().is_empty());

        session.connect().expect("connect");
        session.disconnect();
        session.disconnect();
        let disconnects = gateway
            .calls()
            .into_iter()
            .filter(|call| *call == SimCall::Disconnect)
            .count();
        assert_eq!(disconnects, 1);
        session.shutdown();
    }

    #[tokio::test]
    async fn connectivity_events_are_idempotent() {
        let (session, gateway) = session_with_sim();
        let mut rx = session.events();
        session.connect().expect("connect");

        gateway.push(GatewayEvent::ConnectionAck);
        assert_eq!(
            next_event(&mut rx).await,
            TerminalEvent::ConnectivityChanged { connected: true }
        );

        // Re-asserting the same connectivity must not re-fire; the next
        // event observers see is the trading error pushed after it.
        gateway.push(GatewayEvent::ConnectionAck);
        gateway.push(GatewayEvent::Error {
            request_id: 55,
            code: 999,
            message: "boom".to_string(),
        });
        assert!(matches!(
            next_event(&mut rx).await,
            TerminalEvent::TradingError { code: Some(999), .. }
        ));
        session.shutdown();
    }

    #[tokio::test]
    async fn sentinel_and_benign_errors_never_surface() {
        let (session, gateway) = session_with_sim();
        let mut rx = session.events();
        session.connect().expect("connect");

        gateway.push(GatewayEvent::Error {
            request_id: -1,
            code: 300,
            message: "notice".to_string(),
        });
        gateway.push(GatewayEvent::Error {
            request_id: 55,
            code: 162,
            message: "historical data cancelled".to_string(),
        });
        gateway.push(GatewayEvent::Error {
            request_id: 55,
            code: 999,
            message: "real failure".to_string(),
        });

        // Only the unknown code reaches observers.
        assert!(matches!(
            next_event(&mut rx).await,
            TerminalEvent::TradingError {
                request_id: Some(55),
                code: Some(999),
                ..
            }
        ));
        session.shutdown();
    }

    #[tokio::test]
    async fn backfill_and_live_bars_flow_into_the_series() {
        let (session, gateway) = session_with_sim();
        let mut rx = session.events();
        session.connect().expect("connect");

        let security = Security::stock("AAPL");
        session
            .request_streaming(&security)
            .await
            .expect("subscribe");
        let base = 40_000;

        // Prior-close snapshot publishes the reference quote.
        gateway.push(GatewayEvent::Bar {
            request_id: base,
            bar: bar(today_ms() - 86_400_000, 101.5),
        });
        assert!(matches!(
            next_event(&mut rx).await,
            TerminalEvent::LiveQuote {
                kind: QuoteKind::Open,
                price,
                ..
            } if price == 101.5
        ));

        // Backfill burst: one stale-day bar (dropped) and one of today.
        gateway.push(GatewayEvent::Bar {
            request_id: base + 1,
            bar: bar(today_ms() - 86_400_000, 99.0),
        });
        gateway.push(GatewayEvent::Bar {
            request_id: base + 1,
            bar: bar(today_ms(), 100.0),
        });
        gateway.push(GatewayEvent::BarStreamEnd { request_id: base + 1 });
        assert!(matches!(
            next_event(&mut rx).await,
            TerminalEvent::BackfillComplete { .. }
        ));

        let series = session.series(&security).expect("series exists");
        assert!(series.backfill_complete);
        assert_eq!(series.bars.len(), 1);
        assert!(!series.bars[0].is_live);

        // Live update after the boundary is tagged live.
        gateway.push(GatewayEvent::Bar {
            request_id: base + 2,
            bar: bar(today_ms() + 60_000, 100.5),
        });
        gateway.push(GatewayEvent::Tick {
            request_id: base + 3,
            kind: QuoteKind::Bid,
            timestamp: today_ms(),
            price: 100.4,
            size: 3.0,
        });
        assert!(matches!(
            next_event(&mut rx).await,
            TerminalEvent::LiveQuote {
                kind: QuoteKind::Bid,
                ..
            }
        ));

        let series = session.series(&security).expect("series exists");
        assert_eq!(series.bars.len(), 2);
        assert!(series.bars[1].is_live);
        session.shutdown();
    }

    #[tokio::test]
    async fn callbacks_for_stale_blocks_are_dropped() {
        let (session, gateway) = session_with_sim();
        let mut rx = session.events();
        session.connect().expect("connect");

        // Block 39_995 was never allocated; nothing may surface.
        gateway.push(GatewayEvent::Bar {
            request_id: 39_995,
            bar: bar(today_ms(), 100.0),
        });
        gateway.push(GatewayEvent::Tick {
            request_id: 39_998,
            kind: QuoteKind::Bid,
            timestamp: today_ms(),
            price: 1.0,
            size: 1.0,
        });
        gateway.push(GatewayEvent::Error {
            request_id: 10,
            code: 999,
            message: "sync marker".to_string(),
        });

        assert!(matches!(
            next_event(&mut rx).await,
            TerminalEvent::TradingError { .. }
        ));
        session.shutdown();
    }

    #[tokio::test]
    async fn account_and_position_callbacks_republish() {
        let (session, gateway) = session_with_sim();
        let mut rx = session.events();
        session.connect().expect("connect");

        gateway.push(GatewayEvent::AccountList {
            accounts: vec!["DU1".to_string()],
        });
        assert!(matches!(
            next_event(&mut rx).await,
            TerminalEvent::AccountList { .. }
        ));

        fund_account(&gateway);
        let TerminalEvent::AccountUpdated { account } = next_event(&mut rx).await else {
            panic!("expected account update");
        };
        assert_eq!(account.available_funds, Some(1_000_000.0));

        gateway.push(GatewayEvent::PositionChanged {
            account_id: "DU1".to_string(),
            security: Security::stock("AAPL"),
            quantity: 100.0,
            avg_cost: 150.0,
        });
        assert!(matches!(
            next_event(&mut rx).await,
            TerminalEvent::PositionUpdated { .. }
        ));
        session.shutdown();
    }

    #[tokio::test]
    async fn approved_bracket_executes_with_seeded_order_ids() {
        let (session, gateway) = session_with_sim();
        let mut rx = session.events();
        session.connect().expect("connect");

        gateway.push(GatewayEvent::NextValidOrderId { order_id: 27 });
        fund_account(&gateway);
        assert!(matches!(
            next_event(&mut rx).await,
            TerminalEvent::AccountUpdated { .. }
        ));

        let (entry, stop) = session
            .approve_trade(
                &ticket(1, 10.0, 150.0),
                Some(&ticket(2, 10.0, 140.0)),
            )
            .expect("pair approved");
        let bracket = session
            .execute_trade(&entry, stop.as_ref())
            .expect("execution allowed");

        // Seeded counter 27 rounds up to the block at 30.
        assert_eq!(bracket.entry_order_id, 30);
        assert_eq!(bracket.stop_order_id, Some(31));
        assert_eq!(session.portfolio().len(), 2);

        gateway.push(GatewayEvent::OrderStatus {
            order_id: 30,
            status: "Submitted".to_string(),
            filled: 0.0,
            remaining: 10.0,
            avg_fill_price: 0.0,
            last_fill_price: 0.0,
        });
        let TerminalEvent::TradeStatusUpdated { update } = next_event(&mut rx).await else {
            panic!("expected status update");
        };
        assert_eq!(update.status, OrderStatus::Submitted);
        assert_eq!(update.ticket_id, 1);
        session.shutdown();
    }

    #[tokio::test]
    async fn execution_without_full_token_set_is_refused() {
        let (session, gateway) = session_with_sim();
        let mut rx = session.events();
        session.connect().expect("connect");

        fund_account(&gateway);
        assert!(matches!(
            next_event(&mut rx).await,
            TerminalEvent::AccountUpdated { .. }
        ));

        // approve(orderA) -> 101; approve(orderB, stopB) -> {102, 103}.
        let (order_a, _) = session
            .approve_trade(&ticket(1, 1.0, 100.0), None)
            .expect("A approved");
        assert_eq!(order_a.approval_code, Some(101));
        let (order_b, stop_b) = session
            .approve_trade(&ticket(2, 1.0, 100.0), Some(&ticket(3, 1.0, 90.0)))
            .expect("B approved");
        let stop_b = stop_b.expect("stop leg approved");
        assert_eq!(order_b.approval_code, Some(102));
        assert_eq!(stop_b.approval_code, Some(103));

        session.execute_trade(&order_a, None).expect("A executes");
        let placed_after_a = gateway.placed_orders().len();

        // Token 103 is gone; the B pair must not execute at all.
        session.cancel_approval(&stop_b, None);
        let refused = session.execute_trade(&order_b, Some(&stop_b));
        assert!(matches!(refused, Err(SessionError::ApprovalMissing(3))));
        assert_eq!(gateway.placed_orders().len(), placed_after_a);
        assert_eq!(session.portfolio().len(), 1);

        // The refusal surfaced as a trading error.
        let mut saw_refusal = false;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, TerminalEvent::TradingError { .. }) {
                saw_refusal = true;
            }
        }
        assert!(saw_refusal);
        session.shutdown();
    }

    #[tokio::test]
    async fn malformed_status_text_surfaces_and_skips_the_update() {
        let (session, gateway) = session_with_sim();
        let mut rx = session.events();
        session.connect().expect("connect");

        fund_account(&gateway);
        assert!(matches!(
            next_event(&mut rx).await,
            TerminalEvent::AccountUpdated { .. }
        ));
        let (entry, _) = session
            .approve_trade(&ticket(1, 1.0, 100.0), None)
            .expect("approved");
        session.execute_trade(&entry, None).expect("executes");

        gateway.push(GatewayEvent::OrderStatus {
            order_id: 0,
            status: "Garbled".to_string(),
            filled: 1.0,
            remaining: 0.0,
            avg_fill_price: 100.0,
            last_fill_price: 100.0,
        });
        assert!(matches!(
            next_event(&mut rx).await,
            TerminalEvent::TradingError { .. }
        ));
        session.shutdown();
    }

    #[tokio::test]
    async fn execute_requires_connection() {
        let (session, _gateway) = session_with_sim();
        let entry = ticket(1, 1.0, 100.0);
        assert!(matches!(
            session.execute_trade(&entry, None),
            Err(SessionError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn pump_exits_when_transport_drops() {
        let (session, gateway) = session_with_sim();
        let mut rx = session.events();
        session.connect().expect("connect");

        gateway.push(GatewayEvent::ConnectionAck);
        assert_eq!(
            next_event(&mut rx).await,
            TerminalEvent::ConnectivityChanged { connected: true }
        );

        gateway.drop_connection();
        assert_eq!(
            next_event(&mut rx).await,
            TerminalEvent::ConnectivityChanged { connected: false }
        );
        assert_eq!(session.connection_state(), ConnectionState::Disconnected);
        session.shutdown();
    }

    #[tokio::test]
    async fn stale_pump_exit_does_not_reset_a_newer_connection() {
        let (session, gateway) = session_with_sim();
        let mut rx = session.events();
        session.connect().expect("connect");
        gateway.push(GatewayEvent::ConnectionAck);
        assert_eq!(
            next_event(&mut rx).await,
            TerminalEvent::ConnectivityChanged { connected: true }
        );

        // Reconnect before the first pump has noticed its closed stream.
        session.disconnect();
        session.connect().expect("reconnect");
        tokio::time::sleep(Duration::from_millis(50)).await;

        // The superseded pump drained and exited without touching the new
        // connection's state or connectivity.
        assert_eq!(session.connection_state(), ConnectionState::Connected);
        gateway.push(GatewayEvent::Error {
            request_id: 55,
            code: 999,
            message: "marker".to_string(),
        });
        assert!(matches!(
            next_event(&mut rx).await,
            TerminalEvent::TradingError { code: Some(999), .. }
        ));
        session.shutdown();
    }

    #[tokio::test]
    async fn unacknowledged_session_ends_without_connectivity_events() {
        let (session, gateway) = session_with_sim();
        let mut rx = session.events();
        session.connect().expect("connect");

        // The transport drops before the gateway ever acknowledged; no
        // connectivity was announced, so none is retracted.
        gateway.drop_connection();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
        assert_eq!(session.connection_state(), ConnectionState::Disconnected);
        session.shutdown();
    }
}
