use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single quote/trade event. Any price or volume field may be absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub instrument: String,
    pub datetime: DateTime<Utc>,
    pub bid_price: Option<f64>,
    pub ask_price: Option<f64>,
    pub last_price: Option<f64>,
    pub volume: Option<i64>,
}

impl Tick {
    pub fn spread(&self) -> Option<f64> {
        match (self.bid_price, self.ask_price) {
            (Some(bid), Some(ask)) => Some(ask - bid),
            _ => None,
        }
    }
}
