//! Correlation-identifier space shared by market-data and trading flows.
//! Identifiers are handed out in fixed 5-wide blocks; the slot offset within
//! a block encodes the request kind, so a received id decodes back to its
//! block and meaning without any per-request table lookup.

use crate::market::types::Security;
use std::collections::HashMap;
use std::time::Instant;

pub const BLOCK_WIDTH: i64 = 5;
pub const MARKET_DATA_COUNTER_START: i64 = 40_000;
pub const INTERNAL_COUNTER_START: i64 = 10_000;

/// Independent counter families; their id ranges never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestFlow {
    MarketData,
    Order,
    Internal,
}

/// Slot meanings for a market-data block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketSlot {
    LastClose,
    IntradayBackfill,
    IntradayLive,
    BidAsk,
    TradePrints,
}

impl MarketSlot {
    pub const ALL: [Self; 5] = [
        Self::LastClose,
        Self::IntradayBackfill,
        Self::IntradayLive,
        Self::BidAsk,
        Self::TradePrints,
    ];

    pub fn offset(self) -> i64 {
        match self {
            Self::LastClose => 0,
            Self::IntradayBackfill => 1,
            Self::IntradayLive => 2,
            Self::BidAsk => 3,
            Self::TradePrints => 4,
        }
    }

    pub fn from_offset(offset: i64) -> Option<Self> {
        match offset {
            0 => Some(Self::LastClose),
            1 => Some(Self::IntradayBackfill),
            2 => Some(Self::IntradayLive),
            3 => Some(Self::BidAsk),
            4 => Some(Self::TradePrints),
            _ => None,
        }
    }
}

/// Slot meanings for an order block. Offsets 2..4 are reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderSlot {
    Entry,
    ProtectiveStop,
}

impl OrderSlot {
    pub fn offset(self) -> i64 {
        match self {
            Self::Entry => 0,
            Self::ProtectiveStop => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BlockOwner {
    Security(Security),
    Order(i64),
    Internal,
}

#[derive(Debug, Clone)]
pub struct RequestBlock {
    pub base: i64,
    pub owner: BlockOwner,
}

impl RequestBlock {
    pub fn slot(&self, offset: i64) -> i64 {
        debug_assert!((0..BLOCK_WIDTH).contains(&offset));
        self.base + offset
    }
}

/// Recover `(base, offset)` from a received identifier.
pub fn decode(id: i64) -> (i64, i64) {
    let offset = id.rem_euclid(BLOCK_WIDTH);
    (id - offset, offset)
}

#[derive(Debug)]
struct BlockRecord {
    owner: BlockOwner,
    opened_at: Instant,
    completed: bool,
}

/// Allocation table for all three flows. Blocks are never reused; releasing
/// one only forgets the owner so late callbacks resolve to nothing.
#[derive(Debug)]
pub struct RequestLedger {
    market_data_counter: i64,
    order_counter: i64,
    internal_counter: i64,
    live: HashMap<i64, BlockRecord>,
}

impl Default for RequestLedger {
    fn default() -> Self {
        Self {
            market_data_counter: MARKET_DATA_COUNTER_START,
            order_counter: 0,
            internal_counter: INTERNAL_COUNTER_START,
            live: HashMap::new(),
        }
    }
}

impl RequestLedger {
    pub fn allocate(&mut self, flow: RequestFlow, owner: BlockOwner) -> RequestBlock {
        let counter = match flow {
            RequestFlow::MarketData => &mut self.market_data_counter,
            RequestFlow::Order => &mut self.order_counter,
            RequestFlow::Internal => &mut self.internal_counter,
        };
        let base = *counter;
        *counter += BLOCK_WIDTH;

        self.live.insert(
            base,
            BlockRecord {
                owner: owner.clone(),
                opened_at: Instant::now(),
                completed: false,
            },
        );
        RequestBlock { base, owner }
    }

    /// Seed the order counter from the gateway's reported next valid order
    /// id, rounded up to the next block boundary so `decode` stays exact.
    /// Never moves the counter backwards.
    pub fn seed_order_counter(&mut self, next_order_id: i64) {
        // Signed `div_ceil` is unstable; the value is non-negative after
        // `.max(0)`, so the unsigned `div_ceil` is exact here.
        let aligned = ((next_order_id.max(0) as u64).div_ceil(BLOCK_WIDTH as u64) as i64)
            .saturating_mul(BLOCK_WIDTH);
        if aligned > self.order_counter {
            self.order_counter = aligned;
        }
    }

    pub fn resolve_owner(&self, base: i64) -> Option<&BlockOwner> {
        self.live.get(&base).map(|record| &record.owner)
    }

    /// Mark a block's streaming work finished so the staleness sweep skips it.
    pub fn mark_complete(&mut self, base: i64) {
        if let Some(record) = self.live.get_mut(&base) {
            record.completed = true;
        }
    }

    pub fn release(&mut self, base: i64) {
        self.live.remove(&base);
    }

    /// Bases of market-data blocks still awaiting completion that are older
    /// than `max_age`; input to the periodic sweep.
    pub fn stale_bases(&self, max_age: std::time::Duration) -> Vec<i64> {
        let now = Instant::now();
        let mut bases: Vec<i64> = self
            .live
            .iter()
            .filter(|(_, record)| {
                !record.completed && now.duration_since(record.opened_at) >= max_age
            })
            .filter(|(_, record)| matches!(record.owner, BlockOwner::Security(_)))
            .map(|(base, _)| *base)
            .collect();
        bases.sort_unstable();
        bases
    }
}
