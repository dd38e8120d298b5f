use std::collections::BTreeMap;

use isis_wire::Payload;
use tracing::trace;

/// The balance state machine applied to every delivered message, identical
/// at every live node because delivery order is identical everywhere:
/// replaying the same order through this state machine at any node yields
/// identical final balances. A `BTreeMap` keeps accounts in the alphabetical
/// order `printAllBalances` printed them in.
#[derive(Debug, Default)]
pub struct Ledger {
    balances: BTreeMap<String, i64>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one delivered payload. Returns whether it actually moved any
    /// balance — `false` for a rejected transfer — matching `rDeliver`'s
    /// original behavior of only reprinting balances when they changed.
    pub fn apply(&mut self, payload: &Payload) -> bool {
        match payload {
            Payload::Deposit { account, amount } => {
                *self.balances.entry(account.clone()).or_insert(0) += amount;
                trace!(account, amount, "deposit applied");
                true
            }
            Payload::Transfer { from, to, amount } => {
                let from_balance = self.balances.get(from).copied().unwrap_or(0);
                if from_balance - amount >= 0 {
                    *self.balances.entry(from.clone()).or_insert(0) -= amount;
                    *self.balances.entry(to.clone()).or_insert(0) += amount;
                    trace!(from, to, amount, "transfer applied");
                    true
                } else {
                    trace!(from, to, amount, balance = from_balance, "transfer rejected: insufficient balance");
                    false
                }
            }
        }
    }

    pub fn balance(&self, account: &str) -> i64 {
        self.balances.get(account).copied().unwrap_or(0)
    }

    /// Renders non-zero balances in alphabetical order as
    /// `BALANCES alice:10 bob:20`, matching `printAllBalances`'s output
    /// shape.
    pub fn format_balances(&self) -> String {
        let mut out = String::from("BALANCES");
        for (account, balance) in &self.balances {
            if *balance > 0 {
                out.push(' ');
                out.push_str(account);
                out.push(':');
                out.push_str(&balance.to_string());
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deposit_increases_balance() {
        let mut l = Ledger::new();
        l.apply(&Payload::Deposit { account: "alice".into(), amount: 100 });
        assert_eq!(l.balance("alice"), 100);
    }

    #[test]
    fn transfer_moves_funds_when_sufficient() {
        let mut l = Ledger::new();
        l.apply(&Payload::Deposit { account: "alice".into(), amount: 100 });
        l.apply(&Payload::Transfer { from: "alice".into(), to: "bob".into(), amount: 40 });
        assert_eq!(l.balance("alice"), 60);
        assert_eq!(l.balance("bob"), 40);
    }

    #[test]
    fn transfer_is_a_no_op_when_insufficient() {
        let mut l = Ledger::new();
        l.apply(&Payload::Deposit { account: "alice".into(), amount: 100 });
        l.apply(&Payload::Transfer { from: "alice".into(), to: "bob".into(), amount: 200 });
        assert_eq!(l.balance("alice"), 100);
        assert_eq!(l.balance("bob"), 0);
    }

    #[test]
    fn format_balances_lists_nonzero_accounts_alphabetically() {
        let mut l = Ledger::new();
        l.apply(&Payload::Deposit { account: "bob".into(), amount: 5 });
        l.apply(&Payload::Deposit { account: "alice".into(), amount: 10 });
        l.apply(&Payload::Deposit { account: "carl".into(), amount: 0 });
        assert_eq!(l.format_balances(), "BALANCES alice:10 bob:5");
    }
}
