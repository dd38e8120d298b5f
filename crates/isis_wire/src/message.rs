use std::cmp::Ordering;

/// Index of a node within the fixed peer group, in `[0, N)`.
pub type NodeIndex = u16;

/// Globally unique message id, of the form `<origin-name>-<sequence>`.
pub type MessageId = String;

/// An explicit `(logical_counter, origin)` pair compared lexicographically.
///
/// Replaces the original's `curr_priority + origin/10` float encoding (see
/// design notes): the integer part is the Lamport-style counter, the origin
/// index is the tie-breaker, and the pair is strictly ordered with no limit
/// on group size and no floating-point equality hazards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Priority {
    pub counter: u64,
    pub origin: NodeIndex,
}

impl Priority {
    pub const ZERO: Priority = Priority {
        counter: 0,
        origin: 0,
    };

    pub fn new(counter: u64, origin: NodeIndex) -> Self {
        Self { counter, origin }
    }
}

impl PartialOrd for Priority {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Priority {
    fn cmp(&self, other: &Self) -> Ordering {
        self.counter
            .cmp(&other.counter)
            .then_with(|| self.origin.cmp(&other.origin))
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.counter, self.origin)
    }
}

/// The transaction payload. Opaque to the ordering core; only `isis_ledger`
/// interprets it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Deposit { account: String, amount: i64 },
    Transfer { from: String, to: String, amount: i64 },
}

impl Payload {
    fn tag(&self) -> u8 {
        match self {
            Payload::Deposit { .. } => 0,
            Payload::Transfer { .. } => 1,
        }
    }
}

/// A single record on the wire. The same shape carries all three roles a
/// message plays in its lifetime (initial multicast, proposal, agreed
/// broadcast); the role is inferred from `origin` vs. the sender and from
/// `deliverable`.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: MessageId,
    pub origin: NodeIndex,
    pub payload: Payload,
    pub priority: Priority,
    pub deliverable: bool,
    pub error: bool,
    /// Wall-clock stamp set by the origin, for metrics only.
    pub start_time: f64,
}

impl Message {
    pub fn new(id: MessageId, origin: NodeIndex, payload: Payload, start_time: f64) -> Self {
        Self {
            id,
            origin,
            payload,
            priority: Priority::ZERO,
            deliverable: false,
            error: false,
            start_time,
        }
    }
}

pub(crate) fn payload_tag(p: &Payload) -> u8 {
    p.tag()
}
