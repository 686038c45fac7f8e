//! Engine.IO Server — sessions on top of swappable transports.
//!
//! The server owns the session store, maps incoming HTTP requests to sessions
//! and transports, and runs one heartbeat task per session. Applications see
//! each connection as a `Session` with a blocking reader/writer pair and get
//! new sessions through the `ConnectionHandler` trait.

pub mod config;
pub mod engine;
pub mod error;
pub mod server;
pub mod session;
pub mod store;

pub use config::{EngineConfig, ServerConfig};
pub use engine::{ConnectionHandler, Engine};
pub use error::{EngineError, SessionError};
pub use server::EngineServer;
pub use session::{MessageReader, MessageWriter, Session, SessionConfig, SessionOwner, SessionState};
pub use store::{SessionIdGenerator, SessionStore, UuidGenerator};
