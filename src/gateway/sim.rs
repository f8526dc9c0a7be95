//! Deterministic scripted transport. Records every outbound call and lets
//! callers feed inbound events, standing in for the brokerage client library
//! in tests and offline runs.

use crate::error::SessionError;
use crate::gateway::{Gateway, GatewayEvent, HistoricalBarsRequest, TickStreamKind};
use crate::market::types::Security;
use crate::trading::types::OrderPayload;
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

#[derive(Debug, Clone, PartialEq)]
pub enum SimCall {
    Connect,
    Disconnect,
    HistoricalBars(HistoricalBarsRequest),
    TickStream {
        request_id: i64,
        security: Security,
        kind: TickStreamKind,
    },
    CancelTickStream { request_id: i64 },
    CancelHistorical { request_id: i64 },
    CancelMarketData { request_id: i64 },
    PlaceOrder {
        order_id: i64,
        security: Security,
        payload: OrderPayload,
    },
    AccountUpdates { subscribe: bool, account_id: String },
}

#[derive(Default)]
struct SimState {
    calls: Vec<SimCall>,
    inbound: Option<UnboundedSender<GatewayEvent>>,
    refuse_connect: bool,
    place_order_budget: Option<usize>,
    stream_request_budget: Option<usize>,
}

impl SimState {
    fn take_stream_request(&mut self) -> Result<(), SessionError> {
        let Some(budget) = self.stream_request_budget.as_mut() else {
            return Ok(());
        };
        if *budget == 0 {
            // One-shot: the next burst goes through again.
            self.stream_request_budget = None;
            return Err(SessionError::Transport(
                "stream request rejected by transport".to_string(),
            ));
        }
        *budget -= 1;
        Ok(())
    }
}

#[derive(Default)]
pub struct SimGateway {
    state: Mutex<SimState>,
}

impl SimGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every recorded outbound call, in order.
    pub fn calls(&self) -> Vec<SimCall> {
        self.state.lock().calls.clone()
    }

    /// Convenience view over just the order payloads handed to the gateway.
    pub fn placed_orders(&self) -> Vec<OrderPayload> {
        self.state
            .lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                SimCall::PlaceOrder { payload, .. } => Some(payload.clone()),
                _ => None,
            })
            .collect()
    }

    /// Deliver an inbound event to the connected session, if any.
    pub fn push(&self, event: GatewayEvent) {
        let sender = self.state.lock().inbound.clone();
        if let Some(sender) = sender {
            let _ = sender.send(event);
        }
    }

    /// Close the inbound stream, as a dropped transport would.
    pub fn drop_connection(&self) {
        self.state.lock().inbound = None;
    }

    pub fn refuse_connect(&self) {
        self.state.lock().refuse_connect = true;
    }

    /// Accept `budget` further place-order calls, then fail the rest.
    pub fn fail_place_order_after(&self, budget: usize) {
        self.state.lock().place_order_budget = Some(budget);
    }

    /// Accept `budget` further market-data requests, then fail the next one.
    pub fn fail_stream_request_after(&self, budget: usize) {
        self.state.lock().stream_request_budget = Some(budget);
    }
}

impl Gateway for SimGateway {
    fn connect(&self) -> Result<UnboundedReceiver<GatewayEvent>, SessionError> {
        let mut state = self.state.lock();
        state.calls.push(SimCall::Connect);
        if state.refuse_connect {
            return Err(SessionError::Transport("connection refused".to_string()));
        }
        let (sender, receiver) = mpsc::unbounded_channel();
        state.inbound = Some(sender);
        Ok(receiver)
    }

    fn disconnect(&self) {
        let mut state = self.state.lock();
        state.calls.push(SimCall::Disconnect);
        state.inbound = None;
    }

    fn request_historical_bars(&self, request: HistoricalBarsRequest) -> Result<(), SessionError> {
        let mut state = self.state.lock();
        state.take_stream_request()?;
        state.calls.push(SimCall::HistoricalBars(request));
        Ok(())
    }

    fn request_tick_stream(
        &self,
        request_id: i64,
        security: &Security,
        kind: TickStreamKind,
    ) -> Result<(), SessionError> {
        let mut state = self.state.lock();
        state.take_stream_request()?;
        state.calls.push(SimCall::TickStream {
            request_id,
            security: security.clone(),
            kind,
        });
        Ok(())
    }

    fn cancel_tick_stream(&self, request_id: i64) {
        self.state
            .lock()
            .calls
            .push(SimCall::CancelTickStream { request_id });
    }

    fn cancel_historical(&self, request_id: i64) {
        self.state
            .lock()
            .calls
            .push(SimCall::CancelHistorical { request_id });
    }

    fn cancel_market_data(&self, request_id: i64) {
        self.state
            .lock()
            .calls
            .push(SimCall::CancelMarketData { request_id });
    }

    fn place_order(
        &self,
        order_id: i64,
        security: &Security,
        payload: &OrderPayload,
    ) -> Result<(), SessionError> {
        let mut state = self.state.lock();
        if let Some(budget) = state.place_order_budget.as_mut() {
            if *budget == 0 {
                return Err(SessionError::Transport(
                    "place order rejected by transport".to_string(),
                ));
            }
            *budget -= 1;
        }
        state.calls.push(SimCall::PlaceOrder {
            order_id,
            security: security.clone(),
            payload: payload.clone(),
        });
        Ok(())
    }

    fn request_account_updates(&self, subscribe: bool, account_id: &str) {
        self.state.lock().calls.push(SimCall::AccountUpdates {
            subscribe,
            account_id: account_id.to_string(),
        });
    }
}
