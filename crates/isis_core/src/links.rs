use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedSender;

use isis_wire::{Message, NodeIndex};

struct LinksState {
    slots: Vec<Option<UnboundedSender<Message>>>,
    alive_count: usize,
}

/// The fixed-size peer link table: one outbound channel per peer index plus
/// a liveness bit, with the self-slot always absent.
///
/// A single mutex guards every transition of this table (attach, send,
/// mark-dead) so that `alive_count` is always observed consistently with the
/// slot it was derived from. Modelled on `librqbit`'s `WriterRequest` channel
/// per peer in `torrent_state/live`: the actual socket write happens in a
/// writer task owned by the host, not here.
pub struct PeerLinks {
    self_index: NodeIndex,
    state: Mutex<LinksState>,
}

impl PeerLinks {
    pub fn new(peer_count: usize, self_index: NodeIndex) -> Self {
        Self {
            self_index,
            state: Mutex::new(LinksState {
                slots: (0..peer_count).map(|_| None).collect(),
                // This node counts itself as always alive.
                alive_count: 1,
            }),
        }
    }

    pub fn self_index(&self) -> NodeIndex {
        self.self_index
    }

    pub fn peer_count(&self) -> usize {
        self.state.lock().slots.len()
    }

    pub fn alive_count(&self) -> usize {
        self.state.lock().alive_count
    }

    /// Attaches the outbound channel for `idx`. A no-op if `idx` is the
    /// self-slot or already attached.
    pub fn attach(&self, idx: NodeIndex, sender: UnboundedSender<Message>) {
        if idx == self.self_index {
            return;
        }
        let mut state = self.state.lock();
        let Some(slot) = state.slots.get_mut(idx as usize) else {
            return;
        };
        if slot.is_none() {
            *slot = Some(sender);
            state.alive_count += 1;
        }
    }

    pub fn is_live(&self, idx: NodeIndex) -> bool {
        if idx == self.self_index {
            return true;
        }
        self.state
            .lock()
            .slots
            .get(idx as usize)
            .is_some_and(Option::is_some)
    }

    /// Marks `idx` dead. Idempotent: returns `true` only on the call that
    /// actually performs the live-to-dead transition, so callers observe the
    /// `alive_count` decrement exactly once.
    pub fn mark_dead(&self, idx: NodeIndex) -> bool {
        if idx == self.self_index {
            return false;
        }
        let mut state = self.state.lock();
        match state.slots.get_mut(idx as usize) {
            Some(slot) if slot.is_some() => {
                *slot = None;
                state.alive_count -= 1;
                true
            }
            _ => false,
        }
    }

    /// Sends to `idx`. Returns `false` if the slot is dead or the channel's
    /// receiver has gone away (the transport has failed); the caller must
    /// mark the peer dead in response.
    pub fn send(&self, idx: NodeIndex, msg: Message) -> bool {
        if idx == self.self_index {
            return true;
        }
        let state = self.state.lock();
        match state.slots.get(idx as usize).and_then(Option::as_ref) {
            Some(tx) => tx.send(msg).is_ok(),
            None => false,
        }
    }

    /// All peer indices currently believed live, self excluded.
    pub fn live_peers(&self) -> Vec<NodeIndex> {
        self.state
            .lock()
            .slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.is_some().then_some(i as NodeIndex))
            .collect()
    }
}
