pub mod adapters;
pub mod error;
pub mod protocol;
mod stream;

pub use adapters::handshake::{parse_export, CommandFile, COMMAND_VERB};
pub use adapters::{HandshakeConfig, HandshakeConnector, SimulatedConfig, SimulatedConnector};
pub use error::ConnectorError;
pub use protocol::{Connector, ConnectorKind, Subscription, TickCallback};
