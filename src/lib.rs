//! Brokerage-gateway adapter core for a desktop trading terminal: one
//! session object owning connection lifecycle, block-allocated request-id
//! correlation, streaming market data, bracket order submission, and the
//! two-phase trade approval gate. The embedding shell subscribes to
//! [`TerminalEvent`]s and renders; nothing here touches a UI.

pub mod config;
pub mod error;
pub mod gateway;
pub mod market;
pub mod requests;
pub mod session;
pub mod sweep;
pub mod trading;

pub use config::{SessionArgs, SessionConfig};
pub use error::SessionError;
pub use gateway::{Gateway, GatewayEvent, HistoricalBarsRequest, TickStreamKind};
pub use market::ingest::TickSeries;
pub use market::types::{Bar, BarSize, QuoteKind, Security, SeriesBar};
pub use session::{ConnectionState, TerminalEvent, TerminalSession};
pub use sweep::spawn_stale_request_sweep;
pub use trading::orders::{SubmittedBracket, TradeStatusUpdate};
pub use trading::types::{OrderKind, OrderSide, OrderStatus, TradeTicket};
