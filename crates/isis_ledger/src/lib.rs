//! Out-of-core collaborators for the transaction log: the stdin command
//! parser, the balance state machine, and the per-message metrics writer.
//! None of this depends on `isis_core`; it only produces and consumes
//! [`isis_wire::Message`] values.

mod error;
mod ledger;
mod metrics;
mod parser;

pub use error::{Error, Result};
pub use ledger::Ledger;
pub use metrics::{now_secs, MetricsWriter};
pub use parser::parse_line;
