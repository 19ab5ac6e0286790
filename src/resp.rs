//! A RESP2-flavoured wire protocol: requests are arrays of bulk strings,
//! replies are one of the five reply types below. Modelled on the request
//! framing the original CLI's client speaks (`cmd/client`), generalised
//! into a proper codec instead of one-off per-command parsing.

use std::io::{self, BufRead, Write};

#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Vec<u8>),
    Nil,
    Array(Vec<Reply>),
}

impl Reply {
    pub fn ok() -> Reply {
        Reply::Simple("OK".to_string())
    }

    pub fn from_bulk(value: Option<Vec<u8>>) -> Reply {
        match value {
            Some(v) => Reply::Bulk(v),
            None => Reply::Nil,
        }
    }

    pub fn from_bulk_list(values: Vec<Vec<u8>>) -> Reply {
        Reply::Array(values.into_iter().map(Reply::Bulk).collect())
    }

    pub fn encode(&self, out: &mut impl Write) -> io::Result<()> {
        match self {
            Reply::Simple(s) => write!(out, "+{s}\r\n"),
            Reply::Error(s) => write!(out, "-{s}\r\n"),
            Reply::Integer(n) => write!(out, ":{n}\r\n"),
            Reply::Bulk(b) => {
                write!(out, "${}\r\n", b.len())?;
                out.write_all(b)?;
                out.write_all(b"\r\n")
            }
            Reply::Nil => write!(out, "$-1\r\n"),
            Reply::Array(items) => {
                write!(out, "*{}\r\n", items.len())?;
                for item in items {
                    item.encode(out)?;
                }
                Ok(())
            }
        }
    }
}

/// Reads one request — an array of bulk strings — from `reader`. Returns
/// `Ok(None)` on a clean EOF before any bytes of a new request arrive.
pub fn read_request(reader: &mut impl BufRead) -> io::Result<Option<Vec<Vec<u8>>>> {
    let Some(line) = read_line(reader)? else { return Ok(None) };
    let line = line.trim_end();
    let Some(count) = line.strip_prefix('*') else {
        return Err(protocol_error(&format!("expected array, got '{line}'")));
    };
    let count: i64 = count.parse().map_err(|_| protocol_error("invalid array length"))?;
    if count < 0 {
        return Ok(Some(Vec::new()));
    }
    let mut args = Vec::with_capacity(count as usize);
    for _ in 0..count {
        args.push(read_bulk(reader)?);
    }
    Ok(Some(args))
}

fn read_bulk(reader: &mut impl BufRead) -> io::Result<Vec<u8>> {
    let Some(line) = read_line(reader)? else {
        return Err(protocol_error("unexpected eof reading bulk header"));
    };
    let line = line.trim_end();
    let Some(len) = line.strip_prefix('$') else {
        return Err(protocol_error(&format!("expected bulk string, got '{line}'")));
    };
    let len: usize = len.parse().map_err(|_| protocol_error("invalid bulk length"))?;
    let mut buf = vec![0u8; len + 2];
    reader.read_exact(&mut buf)?;
    buf.truncate(len);
    Ok(buf)
}

fn read_line(reader: &mut impl BufRead) -> io::Result<Option<String>> {
    let mut line = String::new();
    let n = reader.read_line(&mut line)?;
    if n == 0 {
        return Ok(None);
    }
    Ok(Some(line))
}

fn protocol_error(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::BufReader;

    #[test]
    fn encodes_each_reply_variant() {
        let mut buf = Vec::new();
        Reply::ok().encode(&mut buf).unwrap();
        assert_eq!(buf, b"+OK\r\n");

        buf.clear();
        Reply::Error("ERR boom".into()).encode(&mut buf).unwrap();
        assert_eq!(buf, b"-ERR boom\r\n");

        buf.clear();
        Reply::Integer(42).encode(&mut buf).unwrap();
        assert_eq!(buf, b":42\r\n");

        buf.clear();
        Reply::Bulk(b"hi".to_vec()).encode(&mut buf).unwrap();
        assert_eq!(buf, b"$2\r\nhi\r\n");

        buf.clear();
        Reply::Nil.encode(&mut buf).unwrap();
        assert_eq!(buf, b"$-1\r\n");

        buf.clear();
        Reply::Array(vec![Reply::Integer(1), Reply::Bulk(b"x".to_vec())]).encode(&mut buf).unwrap();
        assert_eq!(buf, b"*2\r\n:1\r\n$1\r\nx\r\n");
    }

    #[test]
    fn reads_well_formed_request() {
        let input = b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n".to_vec();
        let mut reader = BufReader::new(&input[..]);
        let req = read_request(&mut reader).unwrap().unwrap();
        assert_eq!(req, vec![b"GET".to_vec(), b"k".to_vec()]);
    }

    #[test]
    fn eof_before_request_is_none() {
        let input: Vec<u8> = Vec::new();
        let mut reader = BufReader::new(&input[..]);
        assert!(read_request(&mut reader).unwrap().is_none());
    }
}
