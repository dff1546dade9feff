use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One OHLCV aggregation interval. `timeframe` is kept verbatim as the
/// label the bar was requested or produced with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub instrument: String,
    pub timeframe: String,
    pub datetime: DateTime<Utc>,
    pub open_price: f64,
    pub high_price: f64,
    pub low_price: f64,
    pub close_price: f64,
    pub volume: i64,
}

impl Bar {
    /// `low <= open, close <= high`.
    pub fn is_consistent(&self) -> bool {
        self.low_price <= self.high_price
            && (self.low_price..=self.high_price).contains(&self.open_price)
            && (self.low_price..=self.high_price).contains(&self.close_price)
    }
}
