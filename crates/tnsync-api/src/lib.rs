// tnsync-api: async transports for the TrueNAS middleware daemon (midclt + websocket)

pub mod error;
pub mod midclt;
pub mod protocol;
pub mod transport;
pub mod websocket;

pub use error::Error;
pub use midclt::Midclt;
pub use transport::{Output, Transport};
pub use websocket::{Credentials, WebsocketClient, WebsocketConfig};
