//! Two-phase trade gate. A passing risk check issues one time-stamped token
//! per leg; execution is refused unless every leg still holds a live token.
//! Tokens are consumed by execution or explicit cancellation; there is no
//! timer expiry.

use crate::error::SessionError;
use crate::trading::types::TradeTicket;
use std::collections::HashMap;
use std::time::Instant;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct ApprovalToken {
    pub code: i64,
    pub ticket_id: i64,
    pub issued_at: Instant,
}

#[derive(Debug)]
pub struct ApprovalDesk {
    next_code: i64,
    pending: HashMap<i64, ApprovalToken>,
    portfolio: Vec<TradeTicket>,
}

impl Default for ApprovalDesk {
    fn default() -> Self {
        Self {
            next_code: 100,
            pending: HashMap::new(),
            portfolio: Vec::new(),
        }
    }
}

impl ApprovalDesk {
    fn issue(&mut self, ticket_id: i64) -> i64 {
        self.next_code += 1;
        let code = self.next_code;
        self.pending.insert(
            code,
            ApprovalToken {
                code,
                ticket_id,
                issued_at: Instant::now(),
            },
        );
        code
    }

    /// Run the risk check once for the pair; on pass, stamp both legs with
    /// fresh tokens. On fail nothing is issued, not even for a passing leg.
    ///
    /// `mark_price` values market orders that carry no price of their own;
    /// `budget` is the account's risk budget, `None` when the account cache
    /// has nothing yet (which refuses the trade).
    pub fn approve(
        &mut self,
        entry: &TradeTicket,
        stop: Option<&TradeTicket>,
        budget: Option<f64>,
        mark_price: Option<f64>,
    ) -> Result<(TradeTicket, Option<TradeTicket>), SessionError> {
        let Some(budget) = budget else {
            return Err(SessionError::ApprovalRefused(entry.ticket_id));
        };
        let Some(price) = entry.reference_price().or(mark_price) else {
            return Err(SessionError::ApprovalRefused(entry.ticket_id));
        };
        let notional = entry.quantity * price;
        if !(entry.quantity > 0.0 && notional.is_finite() && notional <= budget) {
            return Err(SessionError::ApprovalRefused(entry.ticket_id));
        }
        if let Some(stop_trade) = stop {
            if stop_trade.quantity <= 0.0 {
                return Err(SessionError::ApprovalRefused(stop_trade.ticket_id));
            }
        }

        let mut approved_entry = entry.clone();
        approved_entry.approval_code = Some(self.issue(entry.ticket_id));
        let approved_stop = stop.map(|stop_trade| {
            let mut approved = stop_trade.clone();
            approved.approval_code = Some(self.issue(stop_trade.ticket_id));
            approved
        });

        debug!(
            ticket_id = entry.ticket_id,
            code = approved_entry.approval_code,
            "trade approved"
        );
        Ok((approved_entry, approved_stop))
    }

    fn token_is_live(&self, trade: &TradeTicket) -> bool {
        trade
            .approval_code
            .and_then(|code| self.pending.get(&code))
            .is_some_and(|token| token.ticket_id == trade.ticket_id)
    }

    /// Check every leg's token without consuming anything. All-or-nothing:
    /// one missing token refuses the whole pair.
    pub fn verify(
        &self,
        entry: &TradeTicket,
        stop: Option<&TradeTicket>,
    ) -> Result<(), SessionError> {
        if !self.token_is_live(entry) {
            return Err(SessionError::ApprovalMissing(entry.ticket_id));
        }
        if let Some(stop_trade) = stop {
            if !self.token_is_live(stop_trade) {
                return Err(SessionError::ApprovalMissing(stop_trade.ticket_id));
            }
        }
        Ok(())
    }

    /// Consume the pair's tokens and append the legs to the portfolio.
    /// Callers verify first and submit in between, so a failed submission
    /// leaves the tokens live.
    pub fn settle(&mut self, entry: &TradeTicket, stop: Option<&TradeTicket>) {
        for trade in [Some(entry), stop].into_iter().flatten() {
            if let Some(code) = trade.approval_code {
                self.pending.remove(&code);
            }
            self.portfolio.push(trade.clone());
        }
    }

    /// Withdraw approval without executing.
    pub fn cancel(&mut self, entry: &TradeTicket, stop: Option<&TradeTicket>) {
        for trade in [Some(entry), stop].into_iter().flatten() {
            if let Some(code) = trade.approval_code {
                self.pending.remove(&code);
            }
        }
    }

    /// Test/diagnostic view of outstanding token codes.
    pub fn pending_codes(&self) -> Vec<i64> {
        let mut codes: Vec<i64> = self.pending.keys().copied().collect();
        codes.sort_unstable();
        codes
    }

    /// Drop a live token by code; models an externally expired approval.
    pub fn revoke(&mut self, code: i64) {
        self.pending.remove(&code);
    }

    pub fn portfolio(&self) -> &[TradeTicket] {
        &self.portfolio
    }
}
