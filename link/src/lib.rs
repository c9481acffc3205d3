//! Trellis client session core.
//!
//! A duplex framed-message client that multiplexes concurrent query and call
//! requests over one ordered websocket transport, correlates responses by
//! monotonic request identifier, enforces version compatibility, exposes a
//! drain protocol, and guards user-initiated navigation against in-flight
//! data loss. Queries are pinned to the compile-time whitelist by their
//! fingerprints; the client refuses anything the compiler never saw.

pub mod discovery;
pub mod error;
pub mod frames;
pub mod session;
pub mod settings;
pub mod transport;
pub mod unload;

pub use discovery::Discovery;
pub use error::{LinkError, Result};
pub use frames::{InboundMessage, ResultPayload};
pub use session::{Clock, Session, Status, SystemClock};
pub use settings::{Settings, WaitPolicy};
pub use transport::{Frame, ReadyState, Transport, TransportConnector, WsConnector};
pub use unload::{guard_installed, set_navigation_guard, NavigationGuard};
