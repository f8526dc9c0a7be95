//! Streaming quote subscription. At most one security streams at a time;
//! switching securities cancels the whole outgoing block before any request
//! for the replacement goes out. The subscription slot is an async mutex so
//! the cancel pacing delays serialize concurrent switches instead of
//! interleaving them.

use crate::error::SessionError;
use crate::gateway::{HistoricalBarsRequest, TickStreamKind};
use crate::market::types::{prior_trading_day, BarSize, Security};
use crate::requests::{BlockOwner, MarketSlot, RequestBlock, RequestFlow};
use crate::session::{ConnectionState, TerminalSession};
use chrono::Utc;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct ActiveSubscription {
    pub request_base: i64,
    pub security: Security,
}

impl TerminalSession {
    /// Start the five-request stream for `security`: prior-session close,
    /// intraday backfill, live intraday bars, and both tick streams, all on
    /// one correlation block. Re-requesting the active security is a no-op;
    /// a different security replaces the stream, cancel-before-request.
    pub async fn request_streaming(&self, security: &Security) -> Result<(), SessionError> {
        if self.connection_state() != ConnectionState::Connected {
            return Err(SessionError::NotConnected);
        }

        let mut active = self.active.lock().await;
        if active
            .as_ref()
            .is_some_and(|current| current.security == *security)
        {
            debug!(symbol = %security.symbol, "streaming already active");
            return Ok(());
        }
        if let Some(prior) = active.take() {
            self.cancel_block(&prior).await;
        }

        let block = {
            let mut ledger = self.requests.lock();
            ledger.allocate(RequestFlow::MarketData, BlockOwner::Security(security.clone()))
        };
        let subscription = ActiveSubscription {
            request_base: block.base,
            security: security.clone(),
        };

        // A failure mid-burst leaves the earlier requests live at the
        // gateway; tear the whole block down so nothing streams unowned.
        if let Err(err) = self.issue_stream_requests(&block, security) {
            self.cancel_block(&subscription).await;
            return Err(err);
        }

        info!(symbol = %security.symbol, base = block.base, "streaming started");
        *active = Some(subscription);
        Ok(())
    }

    fn issue_stream_requests(
        &self,
        block: &RequestBlock,
        security: &Security,
    ) -> Result<(), SessionError> {
        let today = Utc::now().date_naive();
        self.gateway().request_historical_bars(HistoricalBarsRequest {
            request_id: block.slot(MarketSlot::LastClose.offset()),
            security: security.clone(),
            anchor: Some(prior_trading_day(today)),
            duration_days: 1,
            bar_size: BarSize::D1,
            keep_updated: false,
        })?;
        self.gateway().request_historical_bars(HistoricalBarsRequest {
            request_id: block.slot(MarketSlot::IntradayBackfill.offset()),
            security: security.clone(),
            anchor: None,
            duration_days: 1,
            bar_size: BarSize::M1,
            keep_updated: false,
        })?;
        self.gateway().request_historical_bars(HistoricalBarsRequest {
            request_id: block.slot(MarketSlot::IntradayLive.offset()),
            security: security.clone(),
            anchor: None,
            duration_days: 1,
            bar_size: BarSize::M1,
            keep_updated: true,
        })?;
        self.gateway().request_tick_stream(
            block.slot(MarketSlot::BidAsk.offset()),
            security,
            TickStreamKind::BidAsk,
        )?;
        self.gateway().request_tick_stream(
            block.slot(MarketSlot::TradePrints.offset()),
            security,
            TickStreamKind::TradePrints,
        )?;
        Ok(())
    }

    /// Tear down the active stream for `security`; a no-op when it is not
    /// the one streaming.
    pub async fn cancel_streaming(&self, security: &Security) {
        let mut active = self.active.lock().await;
        if !active
            .as_ref()
            .is_some_and(|current| current.security == *security)
        {
            return;
        }
        if let Some(prior) = active.take() {
            self.cancel_block(&prior).await;
        }
    }

    /// Tear down whatever is streaming and drop all cached series.
    pub async fn cancel_all_streaming(&self) {
        let mut active = self.active.lock().await;
        if let Some(prior) = active.take() {
            self.cancel_block(&prior).await;
        }
        self.book.lock().clear();
    }

    /// Cancel every slot of a block. The slot meanings are not tracked per
    /// id on the wire, so each of the five ids gets all three cancel kinds;
    /// the gateway ignores the mismatched ones. Calls are paced to keep the
    /// burst under the gateway's messages-per-second ceiling.
    async fn cancel_block(&self, subscription: &ActiveSubscription) {
        // Release first: late callbacks for this block now decode to an
        // unknown owner and are dropped instead of reviving the series.
        self.requests.lock().release(subscription.request_base);
        info!(
            symbol = %subscription.security.symbol,
            base = subscription.request_base,
            "streaming cancelled"
        );

        let pause = Duration::from_millis(self.config.cancel_pacing_ms);
        for slot in MarketSlot::ALL {
            let request_id = subscription.request_base + slot.offset();
            self.gateway().cancel_tick_stream(request_id);
            pace(pause).await;
            self.gateway().cancel_historical(request_id);
            pace(pause).await;
            self.gateway().cancel_market_data(request_id);
            pace(pause).await;
        }
    }
}

async fn pace(pause: Duration) {
    if !pause.is_zero() {
        tokio::time::sleep(pause).await;
    }
}
