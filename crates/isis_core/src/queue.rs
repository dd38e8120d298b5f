use std::collections::{BTreeMap, HashMap, HashSet};

use isis_wire::{Message, MessageId, NodeIndex, Priority};

/// The per-node hold-back queue: holds every message awaiting agreement or
/// awaiting delivery, ordered by priority.
///
/// Realized as an ordered map keyed by `(priority, id)` — `Priority`'s `Ord`
/// already encodes the `(counter, origin)` total order this queue needs —
/// with a side table from id to the entry's current key, so `update` can
/// look the old key up, remove it, and reinsert under the new key without a
/// linear scan. Rust's standard `BinaryHeap` exposes no stable handle for an
/// in-place resift, which is why this isn't built on one.
///
/// `delivered_ids` lives here too: every mutation of it happens inside the
/// same critical section the dispatcher already locks to pop entries, so
/// folding it into this structure avoids a redundant lock.
#[derive(Default)]
pub struct HoldBackQueue {
    entries: BTreeMap<(Priority, MessageId), Message>,
    keys: HashMap<MessageId, (Priority, MessageId)>,
    delivered_ids: HashSet<MessageId>,
}

impl HoldBackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<&Message> {
        let key = self.keys.get(id)?;
        self.entries.get(key)
    }

    /// Inserts a freshly-proposed message. Callers (the protocol engine) are
    /// responsible for checking idempotence before calling this — pushing an
    /// id already present is a bug, caught in debug builds.
    pub fn push(&mut self, msg: Message) {
        let key = (msg.priority, msg.id.clone());
        let prev = self.keys.insert(msg.id.clone(), key.clone());
        debug_assert!(prev.is_none(), "pushed an id already in the hold-back queue");
        self.entries.insert(key, msg);
    }

    /// Returns the lowest-priority entry without removing it.
    pub fn peek(&self) -> Option<&Message> {
        self.entries.values().next()
    }

    /// Removes and returns the lowest-priority entry, if any.
    pub fn pop(&mut self) -> Option<Message> {
        let key = self.entries.keys().next()?.clone();
        let msg = self.entries.remove(&key)?;
        self.keys.remove(&msg.id);
        Some(msg)
    }

    /// Mutates the entry for `id` in place — new message value, new
    /// priority — and re-sifts it to its new position. Returns `false` if
    /// `id` is not queued; that should not happen on correct paths, but
    /// callers decide how to react rather than this type panicking.
    pub fn update(&mut self, id: &str, new_message: Message) -> bool {
        let Some(old_key) = self.keys.get(id).cloned() else {
            return false;
        };
        self.entries.remove(&old_key);
        let new_key = (new_message.priority, new_message.id.clone());
        self.keys.insert(id.to_owned(), new_key.clone());
        self.entries.insert(new_key, new_message);
        true
    }

    /// Marks every non-deliverable entry still waiting on `origin`'s AGREED
    /// broadcast as permanently undeliverable, because the link to that
    /// origin just died.
    pub fn mark_errored_for_origin(&mut self, origin: NodeIndex) {
        let ids: Vec<MessageId> = self
            .entries
            .values()
            .filter(|m| !m.deliverable && !m.error && m.origin == origin)
            .map(|m| m.id.clone())
            .collect();
        for id in ids {
            if let Some(mut m) = self.get(&id).cloned() {
                m.error = true;
                self.update(&id, m);
            }
        }
    }

    /// Records `id` as delivered. Returns `true` the first time, `false` on
    /// every redundant call — this is what makes repeated delivery attempts
    /// idempotent.
    pub fn mark_delivered(&mut self, id: &str) -> bool {
        self.delivered_ids.insert(id.to_owned())
    }

    pub fn is_delivered(&self, id: &str) -> bool {
        self.delivered_ids.contains(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use isis_wire::Payload;

    fn msg(id: &str, counter: u64, origin: NodeIndex) -> Message {
        let mut m = Message::new(
            id.to_owned(),
            origin,
            Payload::Deposit {
                account: "alice".to_owned(),
                amount: 1,
            },
            0.0,
        );
        m.priority = Priority::new(counter, origin);
        m
    }

    #[test]
    fn head_is_always_the_minimum_priority() {
        let mut q = HoldBackQueue::new();
        q.push(msg("a", 5, 0));
        q.push(msg("b", 1, 0));
        q.push(msg("c", 3, 0));
        assert_eq!(q.peek().unwrap().id, "b");
        assert_eq!(q.pop().unwrap().id, "b");
        assert_eq!(q.peek().unwrap().id, "c");
    }

    #[test]
    fn ties_break_by_origin_index() {
        let mut q = HoldBackQueue::new();
        q.push(msg("from1", 4, 1));
        q.push(msg("from0", 4, 0));
        assert_eq!(q.pop().unwrap().id, "from0");
        assert_eq!(q.pop().unwrap().id, "from1");
    }

    #[test]
    fn update_resifts_to_new_position() {
        let mut q = HoldBackQueue::new();
        q.push(msg("a", 5, 0));
        q.push(msg("b", 1, 0));
        let mut updated = msg("a", 0, 0);
        updated.deliverable = true;
        assert!(q.update("a", updated));
        assert_eq!(q.peek().unwrap().id, "a");
        assert!(q.peek().unwrap().deliverable);
    }

    #[test]
    fn update_of_unknown_id_is_reported() {
        let mut q = HoldBackQueue::new();
        assert!(!q.update("ghost", msg("ghost", 0, 0)));
    }

    #[test]
    fn mark_delivered_is_idempotent() {
        let mut q = HoldBackQueue::new();
        assert!(q.mark_delivered("a"));
        assert!(!q.mark_delivered("a"));
    }

    #[test]
    fn mark_errored_for_origin_only_touches_pending_entries_from_that_origin() {
        let mut q = HoldBackQueue::new();
        q.push(msg("from0", 1, 0));
        let mut delivered = msg("from1", 2, 1);
        delivered.deliverable = true;
        q.push(delivered);
        q.mark_errored_for_origin(0);
        assert!(q.get("from0").unwrap().error);
        assert!(!q.get("from1").unwrap().error);
    }
}
