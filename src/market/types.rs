use chrono::{DateTime, Datelike, Days, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Serialize};

pub const DEFAULT_EXCHANGE: &str = "SMART";
pub const DEFAULT_CURRENCY: &str = "USD";

/// Instrument reference shared by market-data and trading flows.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Security {
    pub symbol: String,
    pub exchange: String,
    pub currency: String,
}

impl Security {
    pub fn stock(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into().trim().to_ascii_uppercase(),
            exchange: DEFAULT_EXCHANGE.to_string(),
            currency: DEFAULT_CURRENCY.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum BarSize {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "1d")]
    D1,
}

impl BarSize {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::M1 => "1m",
            Self::M5 => "5m",
            Self::H1 => "1h",
            Self::D1 => "1d",
        }
    }

    pub fn duration_ms(self) -> i64 {
        match self {
            Self::M1 => 60_000,
            Self::M5 => 300_000,
            Self::H1 => 3_600_000,
            Self::D1 => 86_400_000,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum QuoteKind {
    Open,
    Bid,
    Ask,
    Trade,
}

/// A price bar as delivered by the gateway; timestamps are unix milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bar {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// A bar in a security's running series, tagged with its provenance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesBar {
    pub bar: Bar,
    pub is_live: bool,
}

pub fn utc_day_of_ms(timestamp_ms: i64) -> Option<NaiveDate> {
    DateTime::<Utc>::from_timestamp_millis(timestamp_ms).map(|moment| moment.date_naive())
}

/// The last completed trading session strictly before `today`, skipping
/// weekends. Exchange holidays are not modeled; the gateway answers those
/// requests with the nearest prior session itself.
pub fn prior_trading_day(today: NaiveDate) -> NaiveDate {
    let mut day = today;
    loop {
        day = day
            .checked_sub_days(Days::new(1))
            .unwrap_or(NaiveDate::MIN);
        if !matches!(day.weekday(), Weekday::Sat | Weekday::Sun) {
            return day;
        }
    }
}
