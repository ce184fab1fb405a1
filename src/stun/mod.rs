//! STUN (Session Traversal Utilities for NAT) wire codec and Binding responder
//!
//! Only the Binding method is answered. Every other method and class decodes
//! fine and is ignored; unknown attributes are carried through as raw bytes so
//! stored requests can be reported exactly as they arrived.

pub mod protocol;
pub mod server;

pub use protocol::{
    is_stun_message, Attribute, AttributeType, AttributeValue, Message, MessageClass,
    MessageType, Method, TransactionId, DEFAULT_PORT, HEADER_SIZE, MAGIC_COOKIE,
};

pub use server::{
    BindingServer, DatagramOutcome, ServerStats, ServerStatsSnapshot, RECV_BUFFER_SIZE, SOFTWARE,
};
