//! Documentation channel to the backend AI medical session
//!
//! - `messages`: wire format (outbound requests, inbound typed events, socket URL)
//! - `state`: projection of inbound messages into transcript and notes
//! - `channel`: the WebSocket connection with reconnect and backlog

mod channel;
pub mod messages;
mod state;

pub use channel::{ChannelSettings, ChannelStatus, Delivery, DocumentationChannel};
pub use messages::{build_socket_url, Identifier, InboundMessage, OutboundMessage};
pub use state::{
    DocumentationEvent, DocumentationNote, DocumentationState, PendingRequest, TranscriptEntry,
};
