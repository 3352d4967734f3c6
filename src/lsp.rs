//! JSON-RPC wire layer: message types, classification, framing and carriers.
pub mod framed;
pub mod protocol;
pub mod transport;
pub mod types;
pub mod websocket;

pub use protocol::{parse_message, ProtocolError};
pub use transport::{Connection, MessageReader, MessageWriter};
pub use types::{Message, Notification, Request, RequestId, Response, ResponseError};

/// Target used for per-message logging (enabled by `--trace`).
pub const WIRE_TARGET: &str = "lsp_session::wire";
