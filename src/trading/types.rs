use crate::market::types::Security;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum OrderKind {
    Market,
    #[serde(rename_all = "camelCase")]
    Limit { limit_price: f64 },
    #[serde(rename_all = "camelCase")]
    Stop { stop_price: f64 },
}

/// A UI-side trade intent. `ticket_id` is the caller-assigned local
/// identifier the approval workflow keys its tokens on; `approval_code` is
/// stamped by a passing risk check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeTicket {
    pub ticket_id: i64,
    pub security: Security,
    pub side: OrderSide,
    pub quantity: f64,
    pub kind: OrderKind,
    pub approval_code: Option<i64>,
}

impl TradeTicket {
    pub fn new(ticket_id: i64, security: Security, side: OrderSide, quantity: f64, kind: OrderKind) -> Self {
        Self {
            ticket_id,
            security,
            side,
            quantity,
            kind,
            approval_code: None,
        }
    }

    /// The price the risk check values this ticket at, when it carries one.
    pub fn reference_price(&self) -> Option<f64> {
        match self.kind {
            OrderKind::Limit { limit_price } => Some(limit_price),
            OrderKind::Stop { stop_price } => Some(stop_price),
            OrderKind::Market => None,
        }
    }
}

/// The broker-facing order record handed to [`crate::gateway::Gateway::place_order`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderPayload {
    pub order_id: i64,
    pub side: OrderSide,
    pub quantity: f64,
    pub kind: OrderKind,
    /// Links a protective leg to its entry; the gateway holds the parent
    /// until the child arrives with `transmit` set.
    pub parent_order_id: Option<i64>,
    pub transmit: bool,
}

/// Closed mapping of the gateway's order-status strings. `Unknown` replaces
/// the original's reflection-based parse; callers treat it as an error for
/// the update that carried it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OrderStatus {
    PendingSubmit,
    PendingCancel,
    PreSubmitted,
    Submitted,
    Filled,
    Cancelled,
    ApiCancelled,
    Inactive,
    Unknown,
}

impl OrderStatus {
    pub fn parse(text: &str) -> Self {
        match text {
            "PendingSubmit" => Self::PendingSubmit,
            "PendingCancel" => Self::PendingCancel,
            "PreSubmitted" => Self::PreSubmitted,
            "Submitted" => Self::Submitted,
            "Filled" => Self::Filled,
            "Cancelled" => Self::Cancelled,
            "ApiCancelled" => Self::ApiCancelled,
            "Inactive" => Self::Inactive,
            _ => Self::Unknown,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Filled | Self::Cancelled | Self::ApiCancelled | Self::Inactive
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_status_strings() {
        assert_eq!(OrderStatus::parse("Submitted"), OrderStatus::Submitted);
        assert_eq!(OrderStatus::parse("Filled"), OrderStatus::Filled);
        assert_eq!(
            OrderStatus::parse("ApiCancelled"),
            OrderStatus::ApiCancelled
        );
    }

    #[test]
    fn unknown_status_maps_to_unknown_variant() {
        assert_eq!(OrderStatus::parse("Exploded"), OrderStatus::Unknown);
        assert_eq!(OrderStatus::parse(""), OrderStatus::Unknown);
        // Case matters: the gateway sends exact strings.
        assert_eq!(OrderStatus::parse("submitted"), OrderStatus::Unknown);
    }

    #[test]
    fn terminal_statuses() {
        assert!(OrderStatus::Filled.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(!OrderStatus::Submitted.is_terminal());
    }

    #[test]
    fn limit_ticket_reference_price() {
        let ticket = TradeTicket::new(
            1,
            crate::market::types::Security::stock("AAPL"),
            OrderSide::Buy,
            10.0,
            OrderKind::Limit { limit_price: 150.0 },
        );
        assert_eq!(ticket.reference_price(), Some(150.0));
    }
}
