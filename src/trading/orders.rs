//! Order-id allocation, bracket construction, and status correlation.
//! Submitted orders are registered before anything is transmitted and are
//! kept for the life of the process so late status callbacks always resolve.

use crate::error::SessionError;
use crate::gateway::Gateway;
use crate::requests::{BlockOwner, OrderSlot, RequestFlow, RequestLedger};
use crate::trading::types::{OrderKind, OrderPayload, OrderStatus, TradeTicket};
use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct PendingOrder {
    pub order_id: i64,
    pub trade: TradeTicket,
    pub payload: OrderPayload,
    pub status: OrderStatus,
    pub filled: f64,
    pub remaining: f64,
    pub avg_fill_price: f64,
    pub last_fill_price: f64,
}

/// Observer-facing snapshot re-published on every status callback.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeStatusUpdate {
    pub order_id: i64,
    pub ticket_id: i64,
    pub status: OrderStatus,
    pub filled: f64,
    pub remaining: f64,
    pub avg_fill_price: f64,
    pub last_fill_price: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmittedBracket {
    pub entry_order_id: i64,
    pub stop_order_id: Option<i64>,
}

#[derive(Debug, Default)]
pub struct OrderTracker {
    pending: HashMap<i64, PendingOrder>,
}

fn validate_leg(trade: &TradeTicket) -> Result<(), SessionError> {
    if !trade.quantity.is_finite() || trade.quantity <= 0.0 {
        return Err(SessionError::InvalidArgument(format!(
            "trade {} quantity must be positive",
            trade.ticket_id
        )));
    }
    match trade.kind {
        OrderKind::Limit { limit_price } if !(limit_price.is_finite() && limit_price > 0.0) => {
            Err(SessionError::InvalidArgument(format!(
                "trade {} limit price must be positive",
                trade.ticket_id
            )))
        }
        OrderKind::Stop { stop_price } if !(stop_price.is_finite() && stop_price > 0.0) => {
            Err(SessionError::InvalidArgument(format!(
                "trade {} stop price must be positive",
                trade.ticket_id
            )))
        }
        _ => Ok(()),
    }
}

impl OrderTracker {
    pub fn pending(&self, order_id: i64) -> Option<&PendingOrder> {
        self.pending.get(&order_id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Build, register, and transmit an entry order with an optional
    /// protective stop. Both legs are registered before either is handed to
    /// the gateway; a lone entry transmits immediately, a bracket entry is
    /// held (`transmit = false`) until its child carries the transmit flag so
    /// the gateway releases the pair atomically.
    pub fn submit(
        &mut self,
        ledger: &mut RequestLedger,
        gateway: &dyn Gateway,
        entry: &TradeTicket,
        stop: Option<&TradeTicket>,
    ) -> Result<SubmittedBracket, SessionError> {
        validate_leg(entry)?;
        if let Some(stop_trade) = stop {
            validate_leg(stop_trade)?;
        }

        let block = ledger.allocate(RequestFlow::Order, BlockOwner::Order(entry.ticket_id));
        let entry_id = block.slot(OrderSlot::Entry.offset());
        let entry_payload = OrderPayload {
            order_id: entry_id,
            side: entry.side,
            quantity: entry.quantity,
            kind: entry.kind,
            parent_order_id: None,
            transmit: stop.is_none(),
        };

        let stop_leg = stop.map(|stop_trade| {
            let stop_id = block.slot(OrderSlot::ProtectiveStop.offset());
            (
                stop_trade,
                OrderPayload {
                    order_id: stop_id,
                    side: stop_trade.side,
                    quantity: stop_trade.quantity,
                    kind: stop_trade.kind,
                    parent_order_id: Some(entry_id),
                    transmit: true,
                },
            )
        });

        // Register both legs before anything goes out.
        self.pending.insert(
            entry_id,
            PendingOrder {
                order_id: entry_id,
                trade: entry.clone(),
                payload: entry_payload.clone(),
                status: OrderStatus::PendingSubmit,
                filled: 0.0,
                remaining: entry.quantity,
                avg_fill_price: 0.0,
                last_fill_price: 0.0,
            },
        );
        if let Some((stop_trade, stop_payload)) = &stop_leg {
            self.pending.insert(
                stop_payload.order_id,
                PendingOrder {
                    order_id: stop_payload.order_id,
                    trade: (*stop_trade).clone(),
                    payload: stop_payload.clone(),
                    status: OrderStatus::PendingSubmit,
                    filled: 0.0,
                    remaining: stop_trade.quantity,
                    avg_fill_price: 0.0,
                    last_fill_price: 0.0,
                },
            );
        }

        gateway.place_order(entry_id, &entry.security, &entry_payload)?;
        if let Some((stop_trade, stop_payload)) = &stop_leg {
            // The entry leg is held at the gateway with transmit=false; if
            // the stop cannot follow, the position would go live unprotected
            // once anything releases it. Surface that distinctly.
            gateway
                .place_order(stop_payload.order_id, &stop_trade.security, stop_payload)
                .map_err(|error| {
                    SessionError::BracketRegistration(format!(
                        "stop leg for entry order {entry_id} was not transmitted: {error}"
                    ))
                })?;
        }

        debug!(
            entry_order_id = entry_id,
            stop_order_id = stop_leg.as_ref().map(|(_, payload)| payload.order_id),
            "bracket submitted"
        );
        Ok(SubmittedBracket {
            entry_order_id: entry_id,
            stop_order_id: stop_leg.map(|(_, payload)| payload.order_id),
        })
    }

    /// Apply a gateway status callback. Unknown order ids are stale
    /// correlations and yield `Ok(None)`; unparseable status text aborts this
    /// update without touching the record.
    pub fn apply_status(
        &mut self,
        order_id: i64,
        status_text: &str,
        filled: f64,
        remaining: f64,
        avg_fill_price: f64,
        last_fill_price: f64,
    ) -> Result<Option<TradeStatusUpdate>, SessionError> {
        let Some(record) = self.pending.get_mut(&order_id) else {
            return Ok(None);
        };

        let status = OrderStatus::parse(status_text);
        if status == OrderStatus::Unknown {
            return Err(SessionError::UnknownOrderStatus(status_text.to_string()));
        }

        record.status = status;
        record.filled = filled;
        record.remaining = remaining;
        record.avg_fill_price = avg_fill_price;
        record.last_fill_price = last_fill_price;

        Ok(Some(TradeStatusUpdate {
            order_id,
            ticket_id: record.trade.ticket_id,
            status,
            filled,
            remaining,
            avg_fill_price,
            last_fill_price,
        }))
    }
}
