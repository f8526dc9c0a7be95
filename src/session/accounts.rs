//! Account and position cache. Records are mutated in place by callback
//! handlers; the approval workflow reads them for risk limits but never owns
//! them.

use crate::market::types::Security;
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSnapshot {
    pub account_id: String,
    pub net_liquidation: Option<f64>,
    pub buying_power: Option<f64>,
    pub available_funds: Option<f64>,
    pub cash_balance: Option<f64>,
}

impl AccountSnapshot {
    /// Funds the risk check budgets against.
    pub fn risk_budget(&self) -> Option<f64> {
        self.available_funds.or(self.buying_power)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionSnapshot {
    pub account_id: String,
    pub security: Security,
    pub quantity: f64,
    pub avg_cost: f64,
}

#[derive(Debug, Default)]
pub struct AccountCache {
    accounts: HashMap<String, AccountSnapshot>,
    positions: HashMap<(String, Security), PositionSnapshot>,
    account_ids: Vec<String>,
}

impl AccountCache {
    /// Apply an account-field callback. Unrecognized keys are ignored; the
    /// gateway reports far more fields than the terminal consumes.
    pub fn apply_value(&mut self, account_id: &str, key: &str, value: &str) -> Option<AccountSnapshot> {
        let parsed = value.parse::<f64>().ok().filter(|number| number.is_finite());
        let snapshot = self
            .accounts
            .entry(account_id.to_string())
            .or_insert_with(|| AccountSnapshot {
                account_id: account_id.to_string(),
                ..AccountSnapshot::default()
            });

        let field = match key {
            "NetLiquidation" => &mut snapshot.net_liquidation,
            "BuyingPower" => &mut snapshot.buying_power,
            "AvailableFunds" => &mut snapshot.available_funds,
            "CashBalance" => &mut snapshot.cash_balance,
            _ => return None,
        };
        *field = parsed;
        Some(snapshot.clone())
    }

    pub fn apply_position(
        &mut self,
        account_id: &str,
        security: Security,
        quantity: f64,
        avg_cost: f64,
    ) -> PositionSnapshot {
        let snapshot = PositionSnapshot {
            account_id: account_id.to_string(),
            security: security.clone(),
            quantity,
            avg_cost,
        };
        self.positions
            .insert((account_id.to_string(), security), snapshot.clone());
        snapshot
    }

    pub fn set_account_ids(&mut self, accounts: Vec<String>) {
        self.account_ids = accounts;
    }

    pub fn account(&self, account_id: &str) -> Option<&AccountSnapshot> {
        self.accounts.get(account_id)
    }

    /// The snapshot risk checks run against: the configured account when
    /// named, otherwise the first account the gateway reported.
    pub fn primary(&self, preferred: &str) -> Option<&AccountSnapshot> {
        if !preferred.is_empty() {
            return self.accounts.get(preferred);
        }
        self.account_ids
            .first()
            .and_then(|account_id| self.accounts.get(account_id))
            .or_else(|| self.accounts.values().next())
    }

    pub fn positions(&self) -> impl Iterator<Item = &PositionSnapshot> {
        self.positions.values()
    }
}
