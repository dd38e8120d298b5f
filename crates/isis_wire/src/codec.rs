use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};
use crate::message::{Message, NodeIndex, Payload, Priority};

/// Refuses to allocate a read buffer for a frame larger than this. A
/// transaction record is a handful of short strings and fixed-width
/// integers; this is generous headroom, not a tuned limit.
pub const MAX_MESSAGE_LEN: u32 = 1 << 20;

fn write_string(buf: &mut Vec<u8>, s: &str) -> Result<()> {
    let bytes = s.as_bytes();
    let len: u16 = bytes
        .len()
        .try_into()
        .map_err(|_| Error::Malformed("string longer than 65535 bytes"))?;
    buf.write_u16::<BigEndian>(len).map_err(Error::Write)?;
    buf.extend_from_slice(bytes);
    Ok(())
}

fn read_string(cur: &mut Cursor<&[u8]>, field: &'static str) -> Result<String> {
    let len = cur.read_u16::<BigEndian>().map_err(Error::Read)? as usize;
    let start = cur.position() as usize;
    let end = start
        .checked_add(len)
        .ok_or(Error::Malformed("string length overflow"))?;
    let bytes = cur
        .get_ref()
        .get(start..end)
        .ok_or(Error::Malformed("string runs past end of message"))?;
    let s = std::str::from_utf8(bytes)
        .map_err(|_| Error::InvalidUtf8(field))?
        .to_owned();
    cur.set_position(end as u64);
    Ok(s)
}

/// Encodes a [`Message`] into its wire representation (without the
/// length prefix).
pub fn encode(msg: &Message) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(64);
    write_string(&mut buf, &msg.id)?;
    buf.write_u16::<BigEndian>(msg.origin).map_err(Error::Write)?;
    buf.write_u8(crate::message::payload_tag(&msg.payload))
        .map_err(Error::Write)?;
    match &msg.payload {
        Payload::Deposit { account, amount } => {
            write_string(&mut buf, account)?;
            buf.write_i64::<BigEndian>(*amount).map_err(Error::Write)?;
        }
        Payload::Transfer { from, to, amount } => {
            write_string(&mut buf, from)?;
            write_string(&mut buf, to)?;
            buf.write_i64::<BigEndian>(*amount).map_err(Error::Write)?;
        }
    }
    buf.write_u64::<BigEndian>(msg.priority.counter)
        .map_err(Error::Write)?;
    buf.write_u16::<BigEndian>(msg.priority.origin)
        .map_err(Error::Write)?;
    buf.write_u8(msg.deliverable as u8).map_err(Error::Write)?;
    buf.write_u8(msg.error as u8).map_err(Error::Write)?;
    buf.write_f64::<BigEndian>(msg.start_time)
        .map_err(Error::Write)?;
    Ok(buf)
}

/// Decodes a [`Message`] from its wire representation (without the length
/// prefix).
pub fn decode(bytes: &[u8]) -> Result<Message> {
    let mut cur = Cursor::new(bytes);
    let id = read_string(&mut cur, "id")?;
    let origin: NodeIndex = cur.read_u16::<BigEndian>().map_err(Error::Read)?;
    let tag = cur.read_u8().map_err(Error::Read)?;
    let payload = match tag {
        0 => {
            let account = read_string(&mut cur, "account")?;
            let amount = cur.read_i64::<BigEndian>().map_err(Error::Read)?;
            Payload::Deposit { account, amount }
        }
        1 => {
            let from = read_string(&mut cur, "from")?;
            let to = read_string(&mut cur, "to")?;
            let amount = cur.read_i64::<BigEndian>().map_err(Error::Read)?;
            Payload::Transfer { from, to, amount }
        }
        _ => return Err(Error::Malformed("unknown payload tag")),
    };
    let counter = cur.read_u64::<BigEndian>().map_err(Error::Read)?;
    let origin_tiebreak = cur.read_u16::<BigEndian>().map_err(Error::Read)?;
    let deliverable = cur.read_u8().map_err(Error::Read)? != 0;
    let error = cur.read_u8().map_err(Error::Read)? != 0;
    let start_time = cur.read_f64::<BigEndian>().map_err(Error::Read)?;

    Ok(Message {
        id,
        origin,
        payload,
        priority: Priority::new(counter, origin_tiebreak),
        deliverable,
        error,
        start_time,
    })
}

/// Writes a length-prefixed, bincode-free binary frame: a 4-byte
/// big-endian length followed by the encoded message.
pub async fn write_message<W: AsyncWrite + Unpin>(w: &mut W, msg: &Message) -> Result<()> {
    let body = encode(msg)?;
    let len: u32 = body
        .len()
        .try_into()
        .map_err(|_| Error::Malformed("message too large to frame"))?;
    w.write_all(&len.to_be_bytes()).await.map_err(Error::Write)?;
    w.write_all(&body).await.map_err(Error::Write)?;
    Ok(())
}

/// Reads one length-prefixed frame and decodes it.
pub async fn read_message<R: AsyncRead + Unpin>(r: &mut R) -> Result<Message> {
    let mut len_buf = [0u8; 4];
    r.read_exact(&mut len_buf).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            Error::Disconnected
        } else {
            Error::Read(e)
        }
    })?;
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_MESSAGE_LEN {
        return Err(Error::TooLarge {
            len,
            max: MAX_MESSAGE_LEN,
        });
    }
    let mut body = vec![0u8; len as usize];
    r.read_exact(&mut body).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            Error::Disconnected
        } else {
            Error::Read(e)
        }
    })?;
    decode(&body)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Message {
        let mut m = Message::new(
            "node0-1".to_owned(),
            0,
            Payload::Transfer {
                from: "alice".to_owned(),
                to: "bob".to_owned(),
                amount: 42,
            },
            1234.5,
        );
        m.priority = Priority::new(7, 2);
        m.deliverable = true;
        m
    }

    #[test]
    fn round_trips_through_encode_decode() {
        let msg = sample();
        let bytes = encode(&msg).unwrap();
        let decoded = decode(&bytes).unwrap();
        assert_eq!(msg, decoded);
    }

    #[tokio::test]
    async fn round_trips_through_duplex_stream() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        let msg = sample();
        write_message(&mut a, &msg).await.unwrap();
        let decoded = read_message(&mut b).await.unwrap();
        assert_eq!(msg, decoded);
    }

    #[tokio::test]
    async fn disconnect_is_reported_distinctly() {
        let (a, mut b) = tokio::io::duplex(4096);
        drop(a);
        let err = read_message(&mut b).await.unwrap_err();
        assert!(matches!(err, Error::Disconnected));
    }

    #[test]
    fn oversized_length_is_rejected_before_allocating() {
        let mut framed = Vec::new();
        framed.extend_from_slice(&(MAX_MESSAGE_LEN + 1).to_be_bytes());
        let mut cur = Cursor::new(framed.as_slice());
        let len = cur.read_u32::<BigEndian>().unwrap();
        assert!(len > MAX_MESSAGE_LEN);
    }
}
