use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, trace, warn};

use isis_wire::{Message, MessageId, NodeIndex, Priority};

use crate::deliver::Deliver;
use crate::error::{Error, Result};
use crate::links::PeerLinks;
use crate::priority::PriorityAllocator;
use crate::queue::HoldBackQueue;

/// Per-id negotiation state kept at the node that is tracking a proposal
/// round for `id` — the origin tracks it for every id it originated, and
/// every node tracks a one-shot entry for every id it first receives, purely
/// to make proposing idempotent.
struct Negotiation {
    /// The message's origin. Only entries with `origin == self` are ever
    /// completed by [`Core::handle_proposal_return`] or re-evaluated by the
    /// failure detector.
    origin: NodeIndex,
    highest_proposed: Priority,
    proposals_received: usize,
}

struct PriorityState {
    allocator: PriorityAllocator,
    negotiations: HashMap<MessageId, Negotiation>,
}

/// The ISIS total-ordering engine, assembling the peer link table, hold-back
/// queue, priority allocator, and failure detector behind one value — there
/// are no process-wide statics; every lock is a field of `Core`.
///
/// Lock acquisition order, preserved globally: `failure_lock` →
/// `priority_lock` → `queue_mutex`. No lock is held across a network send:
/// peer sends go through [`PeerLinks::send`], a synchronous, non-blocking
/// channel hand-off, with the actual socket write living in a writer task
/// owned by the host (see `isisd`).
pub struct Core<D: Deliver> {
    links: PeerLinks,
    /// Serializes the "declare dead, then re-evaluate pending negotiations"
    /// sequence across failures observed concurrently by different
    /// connection tasks.
    failure_lock: Mutex<()>,
    priority: Mutex<PriorityState>,
    queue: Mutex<HoldBackQueue>,
    deliver: D,
}

impl<D: Deliver> Core<D> {
    pub fn new(self_index: NodeIndex, peer_count: usize, deliver: D) -> Self {
        Self {
            links: PeerLinks::new(peer_count, self_index),
            failure_lock: Mutex::new(()),
            priority: Mutex::new(PriorityState {
                allocator: PriorityAllocator::new(),
                negotiations: HashMap::new(),
            }),
            queue: Mutex::new(HoldBackQueue::new()),
            deliver,
        }
    }

    pub fn self_index(&self) -> NodeIndex {
        self.links.self_index()
    }

    pub fn peer_count(&self) -> usize {
        self.links.peer_count()
    }

    pub fn alive_count(&self) -> usize {
        self.links.alive_count()
    }

    pub fn curr_priority(&self) -> u64 {
        self.priority.lock().allocator.curr_priority()
    }

    /// Attaches the outbound channel for `idx`, established by the bootstrap
    /// collaborator once the TCP connection and handshake to that peer
    /// complete. The handshake itself is out of this type's scope.
    pub fn attach_peer(&self, idx: NodeIndex, sender: UnboundedSender<Message>) -> Result<()> {
        if idx as usize >= self.peer_count() {
            return Err(Error::PeerIndexOutOfRange(idx, self.peer_count()));
        }
        if idx != self.self_index() && self.links.is_live(idx) {
            return Err(Error::AlreadyAttached(idx));
        }
        self.links.attach(idx, sender);
        Ok(())
    }

    /// The local submission path: multicasts a freshly-originated message to
    /// every live peer and starts its own negotiation round. `msg` must
    /// already carry a unique id and `origin == self_index()`; `isis_ledger`'s
    /// parser is responsible for both.
    pub fn submit(&self, mut msg: Message) {
        debug_assert_eq!(msg.origin, self.self_index());
        // Self counts as a peer that has proposed, so if this node is alone
        // in the group the negotiation is already complete — the same
        // completion check the proposal-return path applies to every later
        // proposal return applies here to the self-proposal too.
        let (priority, already_agreed) = {
            let mut pstate = self.priority.lock();
            let p = pstate.allocator.propose(self.self_index());
            let alive = self.links.alive_count();
            pstate.negotiations.insert(
                msg.id.clone(),
                Negotiation {
                    origin: self.self_index(),
                    highest_proposed: p,
                    proposals_received: 1,
                },
            );
            (p, alive == 1)
        };
        msg.priority = priority;
        msg.deliverable = false;
        trace!(id = %msg.id, priority = %priority, "submitted, proposed own priority");
        {
            let mut q = self.queue.lock();
            q.push(msg.clone());
        }
        if already_agreed {
            self.finalize(&msg.id, priority);
            return;
        }
        self.broadcast(&msg);
    }

    /// Dispatches one inbound wire message on its three disjoint cases: an
    /// AGREED broadcast, a proposal returning to its origin, or the first
    /// receipt of a message originated elsewhere.
    pub fn handle_message(&self, msg: Message) {
        if msg.deliverable {
            self.handle_agreed(msg);
        } else if msg.origin == self.self_index() {
            self.handle_proposal_return(msg);
        } else {
            self.handle_first_receipt(msg);
        }
    }

    /// Case A: an AGREED broadcast from the origin.
    fn handle_agreed(&self, msg: Message) {
        {
            let mut pstate = self.priority.lock();
            pstate.allocator.observe_agreed(msg.priority);
        }
        let known = {
            let mut q = self.queue.lock();
            q.update(&msg.id, msg.clone())
        };
        if !known {
            // Should not occur on correct paths.
            debug!(id = %msg.id, "AGREED for an id with no queue entry; dropping");
            return;
        }
        trace!(id = %msg.id, priority = %msg.priority, "agreed, delivering");
        self.dispatch();
    }

    /// Case B: a proposal returning to its origin.
    fn handle_proposal_return(&self, msg: Message) {
        let agreed = {
            let mut pstate = self.priority.lock();
            let alive = self.links.alive_count();
            let Some(neg) = pstate.negotiations.get_mut(&msg.id) else {
                debug!(id = %msg.id, "proposal return for an id with no negotiation state; dropping");
                return;
            };
            if neg.proposals_received < alive {
                neg.proposals_received += 1;
                neg.highest_proposed = neg.highest_proposed.max(msg.priority);
            }
            (neg.proposals_received == alive).then_some(neg.highest_proposed)
        };
        if let Some(agreed) = agreed {
            self.finalize(&msg.id, agreed);
        }
    }

    /// Case C: first receipt of a message originated elsewhere.
    fn handle_first_receipt(&self, msg: Message) {
        let proposal = {
            let mut pstate = self.priority.lock();
            if pstate.negotiations.contains_key(&msg.id) {
                // Idempotence: a duplicate initial multicast for an id we
                // already proposed on is discarded.
                trace!(id = %msg.id, "duplicate first receipt; already proposed");
                return;
            }
            let p = pstate.allocator.propose(self.self_index());
            pstate.negotiations.insert(
                msg.id.clone(),
                Negotiation {
                    origin: msg.origin,
                    highest_proposed: p,
                    proposals_received: 1,
                },
            );
            p
        };

        let mut proposed = msg;
        proposed.priority = proposal;
        proposed.deliverable = false;
        {
            let mut q = self.queue.lock();
            q.push(proposed.clone());
        }
        trace!(id = %proposed.id, priority = %proposal, origin = proposed.origin, "proposed priority, unicasting back");
        if !self.links.send(proposed.origin, proposed.clone()) {
            self.on_transport_failure(proposed.origin);
        }
    }

    /// Finalizes a negotiation: sets the agreed priority, updates the queue,
    /// dispatches, and broadcasts. Called both from the normal proposal-
    /// return path and from failure re-evaluation.
    fn finalize(&self, id: &MessageId, agreed: Priority) {
        self.priority.lock().negotiations.remove(id);
        let agreed_msg = {
            let mut q = self.queue.lock();
            let Some(mut m) = q.get(id).cloned() else {
                return;
            };
            m.priority = agreed;
            m.deliverable = true;
            q.update(id, m.clone());
            m
        };
        debug!(id = %id, priority = %agreed, "negotiation complete");
        self.dispatch();
        self.broadcast(&agreed_msg);
    }

    /// The delivery dispatcher: the only place messages leave the hold-back
    /// queue.
    fn dispatch(&self) {
        let mut q = self.queue.lock();
        loop {
            match q.peek() {
                Some(m) if m.deliverable => {
                    let m = q.pop().expect("peeked deliverable entry must pop");
                    self.bdeliver(&mut q, m);
                }
                Some(m) if m.error => {
                    let id = m.id.clone();
                    q.pop();
                    trace!(id = %id, "discarding errored entry at queue head");
                }
                _ => break,
            }
        }
    }

    /// Idempotent via `delivered_ids`, rebroadcasts on behalf of a dead
    /// origin, then invokes the application callback exactly once, still
    /// inside the queue-mutex critical section so delivery order and
    /// non-reentrancy hold.
    fn bdeliver(&self, q: &mut HoldBackQueue, msg: Message) {
        if !q.mark_delivered(&msg.id) {
            return;
        }
        if msg.origin != self.self_index() {
            self.broadcast(&msg);
        }
        self.deliver.deliver(msg);
    }

    /// Sends to every live peer; per-peer failures feed the failure detector
    /// and never abort the loop.
    fn broadcast(&self, msg: &Message) {
        for peer in self.links.live_peers() {
            if !self.links.send(peer, msg.clone()) {
                self.on_transport_failure(peer);
            }
        }
    }

    /// Called by the host whenever any send or receive on peer `idx`'s link
    /// errors — a perfect-failure-detector abstraction over TCP, no
    /// timeouts or suspicion involved.
    pub fn on_transport_failure(&self, idx: NodeIndex) {
        let _guard = self.failure_lock.lock();
        if !self.links.mark_dead(idx) {
            return;
        }
        warn!(peer = idx, alive_count = self.links.alive_count(), "peer link failed");
        self.reevaluate_after_failure(idx);
    }

    /// Re-evaluates every pending negotiation against the new `alive_count`,
    /// not just the one message whose send triggered this failure: a peer
    /// dying can complete more than one in-flight negotiation at once.
    fn reevaluate_after_failure(&self, dead_peer: NodeIndex) {
        let alive = self.links.alive_count();
        let self_idx = self.self_index();

        let ready: Vec<(MessageId, Priority)> = {
            let pstate = self.priority.lock();
            pstate
                .negotiations
                .iter()
                .filter_map(|(id, neg)| {
                    (neg.origin == self_idx && neg.proposals_received == alive)
                        .then_some((id.clone(), neg.highest_proposed))
                })
                .collect()
        };
        for (id, agreed) in ready {
            self.finalize(&id, agreed);
        }

        {
            let mut q = self.queue.lock();
            q.mark_errored_for_origin(dead_peer);
        }
        self.dispatch();
    }
}
