use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConnectorError {
    /// The medium is unreachable, or the connector is not connected yet.
    #[error("connection failure: {0}")]
    ConnectionFailure(String),
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),
    #[error("no response from the export agent within {0:?}")]
    Timeout(Duration),
    #[error("subscription {id} did not stop within {waited:?}")]
    StopTimeout { id: u64, waited: Duration },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("export parse error: {0}")]
    Export(#[from] csv::Error),
}

impl ConnectorError {
    pub fn not_connected() -> Self {
        Self::ConnectionFailure("connector is not connected".to_string())
    }
}
