pub mod handshake;
pub mod simulated;

pub use handshake::{HandshakeConfig, HandshakeConnector};
pub use simulated::{SimulatedConfig, SimulatedConnector};
