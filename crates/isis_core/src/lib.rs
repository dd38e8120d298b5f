//! The ISIS total-ordering engine for the replicated transaction log.
//!
//! Assembles one [`Core`] value out of the peer link table, the hold-back
//! priority queue, the priority allocator, the protocol engine itself
//! (PROPOSED → AGREED → DELIVERABLE), the delivery dispatcher, and the
//! crash-based failure detector. Bootstrap (connecting sockets,
//! handshaking), command parsing, and the balance state machine are
//! deliberately out of scope — see `isis_membership`, `isis_wire`, and
//! `isis_ledger`.

mod deliver;
mod engine;
mod error;
mod links;
mod priority;
mod queue;

pub use deliver::Deliver;
pub use engine::Core;
pub use error::{Error, Result};
pub use links::PeerLinks;
pub use priority::PriorityAllocator;
pub use queue::HoldBackQueue;

pub use isis_wire::{Message, MessageId, NodeIndex, Payload, Priority};
