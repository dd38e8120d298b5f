//! Membership-file parsing for the ISIS transaction log.
//!
//! The group is static: bootstrap reads this file once, derives the
//! connection plan (§6), and the core never revisits it.

mod error;
mod membership;

pub use error::{Error, Result};
pub use membership::{Membership, NodeIndex, PeerSpec};
