//! Engine.IO Transport Layer
//!
//! A transport carries packets between one client and one session:
//! - HTTP long-polling (`polling`): GET drains queued packets, POST delivers a batch
//! - WebSocket (`websocket`): one packet per frame, full duplex
//!
//! Transports are decoupled from the session via the `PacketHandler` trait:
//! every decoded packet and the final close are reported to it, tagged with
//! the reporting transport's `TransportId`.

pub mod polling;
pub mod registry;
pub mod transport;
pub mod websocket;

pub use polling::{PollingFactory, PollingTransport};
pub use registry::{TransportFactory, TransportOptions, TransportRegistry};
pub use transport::{PacketHandler, RequestInfo, Transport, TransportError, TransportId};
pub use websocket::{WebSocketFactory, WebSocketTransport};
