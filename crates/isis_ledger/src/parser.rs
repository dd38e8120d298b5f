use isis_wire::{Message, NodeIndex, Payload};

use crate::error::{Error, Result};

/// Turns one line of stdin input into a [`Message`] ready for
/// `isis_core::Core::submit`. Malformed input is rejected here, before it
/// ever reaches `submit`.
///
/// Grammar: `DEPOSIT <account> <amount>` or `TRANSFER <from> <amount> <to>`.
/// This fixes an off-by-one in the original parser (`node.go`'s `ParseMessage`
/// required five whitespace-separated TRANSFER fields but only ever read
/// four of them, silently dropping the actual recipient) — `TRANSFER alice
/// 200 bob` now moves funds from `alice` to `bob`, not to a field that was
/// never read.
pub fn parse_line(
    line: &str,
    self_name: &str,
    self_index: NodeIndex,
    sequence: &mut u64,
    start_time: f64,
) -> Result<Message> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    let payload = match parts.as_slice() {
        ["DEPOSIT", account, amount] => Payload::Deposit {
            account: (*account).to_owned(),
            amount: parse_amount(amount)?,
        },
        ["TRANSFER", from, amount, to] => Payload::Transfer {
            from: (*from).to_owned(),
            to: (*to).to_owned(),
            amount: parse_amount(amount)?,
        },
        [] => return Err(Error::WrongFieldCount(line.to_owned())),
        [command, ..] if *command != "DEPOSIT" && *command != "TRANSFER" => {
            return Err(Error::UnknownCommand((*command).to_owned()));
        }
        _ => return Err(Error::WrongFieldCount(line.to_owned())),
    };

    let id = format!("{self_name}-{sequence}");
    *sequence += 1;
    Ok(Message::new(id, self_index, payload, start_time))
}

fn parse_amount(s: &str) -> Result<i64> {
    s.parse().map_err(|_| Error::InvalidAmount(s.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_deposit() {
        let mut seq = 0;
        let msg = parse_line("DEPOSIT alice 100", "node0", 0, &mut seq, 0.0).unwrap();
        assert_eq!(msg.id, "node0-0");
        assert_eq!(seq, 1);
        assert_eq!(
            msg.payload,
            Payload::Deposit {
                account: "alice".to_owned(),
                amount: 100
            }
        );
    }

    #[test]
    fn parses_transfer() {
        let mut seq = 5;
        let msg = parse_line("TRANSFER alice 200 bob", "node1", 1, &mut seq, 0.0).unwrap();
        assert_eq!(msg.id, "node1-5");
        assert_eq!(
            msg.payload,
            Payload::Transfer {
                from: "alice".to_owned(),
                to: "bob".to_owned(),
                amount: 200
            }
        );
    }

    #[test]
    fn sequence_increments_across_calls() {
        let mut seq = 0;
        parse_line("DEPOSIT a 1", "n", 0, &mut seq, 0.0).unwrap();
        let second = parse_line("DEPOSIT b 2", "n", 0, &mut seq, 0.0).unwrap();
        assert_eq!(second.id, "n-1");
    }

    #[test]
    fn rejects_unknown_command() {
        let mut seq = 0;
        let err = parse_line("WITHDRAW alice 5", "n", 0, &mut seq, 0.0).unwrap_err();
        assert!(matches!(err, Error::UnknownCommand(_)));
    }

    #[test]
    fn rejects_non_numeric_amount() {
        let mut seq = 0;
        let err = parse_line("DEPOSIT alice notanumber", "n", 0, &mut seq, 0.0).unwrap_err();
        assert!(matches!(err, Error::InvalidAmount(_)));
    }

    #[test]
    fn rejects_wrong_field_count() {
        let mut seq = 0;
        let err = parse_line("TRANSFER alice 200", "n", 0, &mut seq, 0.0).unwrap_err();
        assert!(matches!(err, Error::WrongFieldCount(_)));
    }
}
