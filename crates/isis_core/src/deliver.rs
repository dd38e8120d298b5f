use isis_wire::Message;

/// The application-facing delivery callback: invoked exactly once per
/// message id, at each live node, in the agreed total order.
pub trait Deliver: Send + Sync + 'static {
    fn deliver(&self, msg: Message);
}

impl<F> Deliver for F
where
    F: Fn(Message) + Send + Sync + 'static,
{
    fn deliver(&self, msg: Message) {
        self(msg)
    }
}

/// Forwards delivered messages onto a channel — the shape `isisd` actually
/// uses to hand them to `isis_ledger` without the core depending on it.
impl Deliver for tokio::sync::mpsc::UnboundedSender<Message> {
    fn deliver(&self, msg: Message) {
        // The receiver only goes away at shutdown; a dropped delivery at
        // that point is not a correctness issue.
        let _ = self.send(msg);
    }
}
