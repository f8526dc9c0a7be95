//! Reconciles last-close backfill, intraday backfill, and live intraday
//! updates into a security's running series. Pure transforms over
//! [`MarketBook`]; the session routes decoded callbacks here from the pump.

use crate::market::types::{utc_day_of_ms, Bar, Security, SeriesBar};
use crate::requests::MarketSlot;
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub enum BarApplyOutcome {
    /// Prior-session reference close recorded.
    ReferenceClose { close: f64 },
    AppliedBackfill,
    AppliedLive,
    /// Calendar day does not match the current session; dropped.
    DiscardedStaleDay,
    /// Slot carries no bar semantics (tick-stream offsets).
    IgnoredSlot,
}

/// Running intraday state for one security.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickSeries {
    pub bars: Vec<SeriesBar>,
    pub last_close: Option<f64>,
    /// Set by the backfill-end callback; consumers must not treat the series
    /// as complete before this flips.
    pub backfill_complete: bool,
}

impl TickSeries {
    /// Insert or overwrite the bar for `bar.timestamp`. Last writer wins;
    /// the provenance tag of the winning write is kept.
    fn upsert(&mut self, bar: Bar, is_live: bool) {
        let entry = SeriesBar { bar, is_live };
        match self
            .bars
            .binary_search_by_key(&bar.timestamp, |existing| existing.bar.timestamp)
        {
            Ok(index) => self.bars[index] = entry,
            Err(index) => self.bars.insert(index, entry),
        }
    }
}

#[derive(Debug, Default)]
pub struct MarketBook {
    series: HashMap<Security, TickSeries>,
}

impl MarketBook {
    pub fn series(&self, security: &Security) -> Option<&TickSeries> {
        self.series.get(security)
    }

    /// Drop all series state; used when the active subscription is replaced
    /// wholesale.
    pub fn clear(&mut self) {
        self.series.clear();
    }

    pub fn apply_bar(
        &mut self,
        security: &Security,
        slot: MarketSlot,
        bar: Bar,
        today: NaiveDate,
    ) -> BarApplyOutcome {
        let series = self.series.entry(security.clone()).or_default();
        match slot {
            MarketSlot::LastClose => {
                series.last_close = Some(bar.close);
                BarApplyOutcome::ReferenceClose { close: bar.close }
            }
            MarketSlot::IntradayBackfill => {
                if utc_day_of_ms(bar.timestamp) != Some(today) {
                    return BarApplyOutcome::DiscardedStaleDay;
                }
                series.upsert(bar, false);
                BarApplyOutcome::AppliedBackfill
            }
            MarketSlot::IntradayLive => {
                if utc_day_of_ms(bar.timestamp) != Some(today) {
                    return BarApplyOutcome::DiscardedStaleDay;
                }
                series.upsert(bar, true);
                BarApplyOutcome::AppliedLive
            }
            MarketSlot::BidAsk | MarketSlot::TradePrints => BarApplyOutcome::IgnoredSlot,
        }
    }

    /// Valuation price for orders that carry none of their own: the latest
    /// intraday close, else the prior session's reference close.
    pub fn mark_price(&self, security: &Security) -> Option<f64> {
        self.series.get(security).and_then(|series| {
            series
                .bars
                .last()
                .map(|entry| entry.bar.close)
                .or(series.last_close)
        })
    }

    /// The intraday backfill burst ended; the series is ready for live
    /// updates.
    pub fn complete_backfill(&mut self, security: &Security) {
        let series = self.series.entry(security.clone()).or_default();
        series.backfill_complete = true;
    }
}
