//! Wire shape and framing for the ISIS transaction log's peer protocol.
//!
//! A single record shape carries all three logical messages described by
//! the protocol (initial multicast, proposal, agreed broadcast); the role
//! is inferred by the reader from `origin` vs. sender identity and from
//! the `deliverable` flag, never encoded explicitly.

mod codec;
mod error;
mod message;

pub use codec::{decode, encode, read_message, write_message, MAX_MESSAGE_LEN};
pub use error::{Error, Result};
pub use message::{Message, MessageId, NodeIndex, Payload, Priority};
