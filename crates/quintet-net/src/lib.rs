// Networking layer: relay socket plus point-to-point links.

pub mod memory;
pub mod relay_client;
pub mod tcp;
pub mod transport;

pub use memory::MemoryNetwork;
pub use relay_client::{connect_relay, RelayClientError, RelayNotification};
pub use tcp::TcpConnector;
pub use transport::{Connector, DirectSignal, Link, LinkError, LinkEvent};
