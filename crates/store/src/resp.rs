//! Minimal RESP2 codec: request encoding and incremental reply decoding.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{Result, StoreError};

/// A decoded RESP value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    Simple(String),
    Error(String),
    Integer(i64),
    /// `None` is the null bulk string
    Bulk(Option<Bytes>),
    /// `None` is the null array
    Array(Option<Vec<RespValue>>),
}

impl RespValue {
    /// True for `+PONG`
    pub fn is_pong(&self) -> bool {
        matches!(self, RespValue::Simple(s) if s == "PONG")
    }

    /// True for `+OK`
    pub fn is_ok(&self) -> bool {
        matches!(self, RespValue::Simple(s) if s == "OK")
    }

    /// Bulk or simple string payload as text
    pub fn as_text(&self) -> Option<String> {
        match self {
            RespValue::Simple(s) => Some(s.clone()),
            RespValue::Bulk(Some(b)) => Some(String::from_utf8_lossy(b).into_owned()),
            _ => None,
        }
    }

    /// Append this value's wire form
    pub fn write_to(&self, buf: &mut BytesMut) {
        match self {
            RespValue::Simple(s) => write_line(buf, b'+', s.as_bytes()),
            RespValue::Error(s) => write_line(buf, b'-', s.as_bytes()),
            RespValue::Integer(n) => write_line(buf, b':', n.to_string().as_bytes()),
            RespValue::Bulk(None) => buf.put_slice(b"$-1\r\n"),
            RespValue::Bulk(Some(data)) => {
                write_line(buf, b'$', data.len().to_string().as_bytes());
                buf.put_slice(data);
                buf.put_slice(b"\r\n");
            }
            RespValue::Array(None) => buf.put_slice(b"*-1\r\n"),
            RespValue::Array(Some(items)) => {
                write_line(buf, b'*', items.len().to_string().as_bytes());
                for item in items {
                    item.write_to(buf);
                }
            }
        }
    }
}

fn write_line(buf: &mut BytesMut, prefix: u8, body: &[u8]) {
    buf.put_u8(prefix);
    buf.put_slice(body);
    buf.put_slice(b"\r\n");
}

/// Largest array capacity reserved up front from a length header
const MAX_PREALLOC: usize = 1024;

/// Encode a command as an array of bulk strings
pub fn encode_command(args: &[&str], buf: &mut BytesMut) {
    write_line(buf, b'*', args.len().to_string().as_bytes());
    for arg in args {
        write_line(buf, b'$', arg.len().to_string().as_bytes());
        buf.put_slice(arg.as_bytes());
        buf.put_slice(b"\r\n");
    }
}

/// Decode one complete value from the front of `buf`.
///
/// Returns `Ok(None)` and leaves `buf` untouched when more bytes are needed.
pub fn decode(buf: &mut BytesMut) -> Result<Option<RespValue>> {
    match parse(&buf[..])? {
        Some((value, used)) => {
            buf.advance(used);
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

fn parse(input: &[u8]) -> Result<Option<(RespValue, usize)>> {
    let Some((line, mut used)) = read_line(input) else {
        return Ok(None);
    };
    let Some((&kind, body)) = line.split_first() else {
        return Err(StoreError::protocol("empty reply line"));
    };
    let text = || String::from_utf8_lossy(body).into_owned();

    let value = match kind {
        b'+' => RespValue::Simple(text()),
        b'-' => RespValue::Error(text()),
        b':' => RespValue::Integer(parse_int(body)?),
        b'$' => {
            let len = parse_int(body)?;
            if len < 0 {
                RespValue::Bulk(None)
            } else {
                let len = len as usize;
                let Some(end) = used.checked_add(len).and_then(|n| n.checked_add(2)) else {
                    return Err(StoreError::protocol("bulk string length out of range"));
                };
                if input.len() < end {
                    return Ok(None);
                }
                let data = Bytes::copy_from_slice(&input[used..used + len]);
                if &input[used + len..used + len + 2] != b"\r\n" {
                    return Err(StoreError::protocol("bulk string missing terminator"));
                }
                used += len + 2;
                RespValue::Bulk(Some(data))
            }
        }
        b'*' => {
            let count = parse_int(body)?;
            if count < 0 {
                RespValue::Array(None)
            } else {
                // 长度头来自对端，不可信
                let mut items = Vec::with_capacity((count as usize).min(MAX_PREALLOC));
                for _ in 0..count {
                    match parse(&input[used..])? {
                        Some((item, n)) => {
                            used += n;
                            items.push(item);
                        }
                        None => return Ok(None),
                    }
                }
                RespValue::Array(Some(items))
            }
        }
        other => {
            return Err(StoreError::protocol(format!(
                "unknown reply type byte 0x{other:02x}"
            )))
        }
    };
    Ok(Some((value, used)))
}

/// Line without its CRLF, plus bytes consumed including the CRLF
fn read_line(input: &[u8]) -> Option<(&[u8], usize)> {
    input
        .windows(2)
        .position(|w| w == b"\r\n")
        .map(|pos| (&input[..pos], pos + 2))
}

fn parse_int(body: &[u8]) -> Result<i64> {
    std::str::from_utf8(body)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .ok_or_else(|| {
            StoreError::protocol(format!(
                "invalid integer '{}'",
                String::from_utf8_lossy(body)
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_set() {
        let mut buf = BytesMut::new();
        encode_command(&["SET", "k", "hello"], &mut buf);
        assert_eq!(&buf[..], b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$5\r\nhello\r\n");
    }

    #[test]
    fn test_decode_simple_and_error() {
        let mut buf = BytesMut::from(&b"+PONG\r\n-MOVED 12 10.0.0.1:7001\r\n"[..]);
        assert!(decode(&mut buf).unwrap().unwrap().is_pong());
        assert_eq!(
            decode(&mut buf).unwrap(),
            Some(RespValue::Error("MOVED 12 10.0.0.1:7001".into()))
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_partial_bulk_waits() {
        let mut buf = BytesMut::from(&b"$5\r\nhel"[..]);
        assert_eq!(decode(&mut buf).unwrap(), None);
        assert_eq!(buf.len(), 7);
        buf.extend_from_slice(b"lo\r\n");
        let value = decode(&mut buf).unwrap().unwrap();
        assert_eq!(value.as_text().as_deref(), Some("hello"));
    }

    #[test]
    fn test_decode_null_bulk() {
        let mut buf = BytesMut::from(&b"$-1\r\n"[..]);
        assert_eq!(decode(&mut buf).unwrap(), Some(RespValue::Bulk(None)));
    }

    #[test]
    fn test_decode_command_array() {
        let mut buf = BytesMut::new();
        encode_command(&["GET", "XD:status"], &mut buf);
        let value = decode(&mut buf).unwrap().unwrap();
        match value {
            RespValue::Array(Some(items)) => {
                assert_eq!(items.len(), 2);
                assert_eq!(items[1].as_text().as_deref(), Some("XD:status"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_decode_oversized_headers() {
        let mut buf = BytesMut::from(&b"*999999999999\r\n:1\r\n"[..]);
        assert_eq!(decode(&mut buf).unwrap(), None);
        assert_eq!(buf.len(), 19);

        // 仅在数据到齐前等待，不预留内存
        let mut buf = BytesMut::from(&b"$9223372036854775807\r\nabc"[..]);
        assert_eq!(decode(&mut buf).unwrap(), None);
        assert_eq!(buf.len(), 25);
    }

    #[test]
    fn test_decode_rejects_unknown_type() {
        let mut buf = BytesMut::from(&b"?x\r\n"[..]);
        assert!(decode(&mut buf).is_err());
    }

    #[test]
    fn test_write_to_matches_decode() {
        let value = RespValue::Array(Some(vec![
            RespValue::Integer(3),
            RespValue::Bulk(Some(Bytes::from_static(b"v"))),
        ]));
        let mut buf = BytesMut::new();
        value.write_to(&mut buf);
        assert_eq!(decode(&mut buf).unwrap(), Some(value));
    }
}
