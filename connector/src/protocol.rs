use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use mdkit::{Bar, Tick};

use crate::error::ConnectorError;

/// Receives ticks of one subscription, one at a time, in generation order.
pub type TickCallback = Box<dyn Fn(Tick) + Send + 'static>;

type CancelFn = dyn Fn() -> Result<(), ConnectorError> + Send + Sync;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectorKind {
    Simulated,
    FileHandshake,
}

impl ConnectorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Simulated => "simulated",
            Self::FileHandshake => "file_handshake",
        }
    }
}

pub trait Connector: Send + Sync {
    fn kind(&self) -> ConnectorKind;
    fn connect(&self) -> Result<(), ConnectorError>;
    /// Releases the medium and stops every live subscription of this connector.
    fn disconnect(&self);
    fn is_connected(&self) -> bool;

    fn supports_realtime(&self) -> bool {
        true
    }

    /// Starts streaming ticks for `instrument` into `on_tick` and returns
    /// immediately with a handle that cancels the stream.
    fn subscribe_market_data(
        &self,
        instrument: &str,
        on_tick: TickCallback,
    ) -> Result<Subscription, ConnectorError>;

    /// Blocking bulk fetch of bars in `[start, end)`.
    fn request_historical_data(
        &self,
        instrument: &str,
        timeframe: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bar>, ConnectorError>;
}

/// Handle of one live subscription. Clones share the same cancel action;
/// cancelling more than once is a no-op.
#[derive(Clone)]
pub struct Subscription {
    id: u64,
    instrument: String,
    cancel: Arc<CancelFn>,
}

impl Subscription {
    pub fn new(
        id: u64,
        instrument: impl Into<String>,
        cancel: impl Fn() -> Result<(), ConnectorError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            id,
            instrument: instrument.into(),
            cancel: Arc::new(cancel),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn instrument(&self) -> &str {
        &self.instrument
    }

    /// Stops the stream and waits (bounded) for its loop to exit. No tick
    /// is delivered after this returns `Ok`.
    pub fn cancel(&self) -> Result<(), ConnectorError> {
        (self.cancel)()
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("instrument", &self.instrument)
            .finish()
    }
}
