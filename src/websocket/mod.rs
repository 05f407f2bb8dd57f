mod handler;
mod message;
mod session;

pub use handler::{ws_handler, WsQuery};
pub use message::{
    decode_inbound, encode_outbound, CodecError, Envelope, EventKind, InboundPayload,
};
pub use session::{Frame, Session, SessionState, SessionSummary, TransportError};
