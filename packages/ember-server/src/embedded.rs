//! Embedded API facade. Each operation constructs a
//! token array, calls the dispatcher with `conn=None, embedded=true`
//! (never traversing the authorizer), decodes the response, and returns a
//! typed value.

use std::sync::Arc;

use bytes::Bytes;
use ember_core::Error;

use crate::dispatcher::Dispatcher;

/// In-process handle for embedding emberdb without a TCP listener.
pub struct Embedded {
    dispatcher: Arc<Dispatcher>,
}

impl Embedded {
    #[must_use]
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }

    async fn call(&self, tokens: Vec<Bytes>) -> Result<EmbeddedResponse, Error> {
        let raw = self.dispatcher.handle(tokens, None, false, true).await?;
        decode_response(&raw)
    }

    pub async fn get(&self, key: impl Into<Bytes>) -> Result<Option<Bytes>, Error> {
        match self.call(vec![Bytes::from_static(b"GET"), key.into()]).await? {
            EmbeddedResponse::Bulk(b) => Ok(Some(b)),
            EmbeddedResponse::Null => Ok(None),
            other => Err(unexpected_response(&other)),
        }
    }

    pub async fn set(&self, key: impl Into<Bytes>, value: impl Into<Bytes>) -> Result<(), Error> {
        match self.call(vec![Bytes::from_static(b"SET"), key.into(), value.into()]).await? {
            EmbeddedResponse::Simple(_) => Ok(()),
            other => Err(unexpected_response(&other)),
        }
    }

    pub async fn del(&self, key: impl Into<Bytes>) -> Result<i64, Error> {
        match self.call(vec![Bytes::from_static(b"DEL"), key.into()]).await? {
            EmbeddedResponse::Integer(n) => Ok(n),
            other => Err(unexpected_response(&other)),
        }
    }

    pub async fn dbsize(&self) -> Result<i64, Error> {
        match self.call(vec![Bytes::from_static(b"DBSIZE")]).await? {
            EmbeddedResponse::Integer(n) => Ok(n),
            other => Err(unexpected_response(&other)),
        }
    }
}

/// A decoded dispatcher response, typed enough for the facade's callers
/// without pulling in the full `RespValue` encoder-side variants.
#[derive(Debug)]
enum EmbeddedResponse {
    Simple(String),
    Integer(i64),
    Bulk(Bytes),
    Null,
    Array(Vec<EmbeddedResponse>),
}

fn unexpected_response(got: &EmbeddedResponse) -> Error {
    Error::protocol(format!("unexpected response shape from dispatcher: {got:?}"))
}

/// Decodes one complete RESP value out of raw dispatcher output. Shares the
/// wire codec's grammar but a `-Error` frame decodes to `Err` instead of an
/// `EmbeddedResponse` variant.
fn decode_response(raw: &[u8]) -> Result<EmbeddedResponse, Error> {
    let mut reader = RespValueReader { buf: raw, pos: 0 };
    reader.read_value()
}

struct RespValueReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> RespValueReader<'a> {
    fn read_line(&mut self) -> Result<&'a [u8], Error> {
        let rest = &self.buf[self.pos..];
        let idx = rest
            .windows(2)
            .position(|w| w == b"\r\n")
            .ok_or_else(|| Error::protocol("truncated embedded response"))?;
        let line = &rest[..idx];
        self.pos += idx + 2;
        Ok(line)
    }

    fn read_value(&mut self) -> Result<EmbeddedResponse, Error> {
        if self.pos >= self.buf.len() {
            return Err(Error::protocol("empty embedded response"));
        }
        let tag = self.buf[self.pos];
        self.pos += 1;
        match tag {
            b'+' => {
                let line = self.read_line()?;
                Ok(EmbeddedResponse::Simple(String::from_utf8_lossy(line).into_owned()))
            }
            b'-' => {
                let line = self.read_line()?;
                Err(Error::from_resp(String::from_utf8_lossy(line).into_owned()))
            }
            b':' => {
                let line = self.read_line()?;
                let n = std::str::from_utf8(line)
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .ok_or_else(|| Error::protocol("invalid integer in embedded response"))?;
                Ok(EmbeddedResponse::Integer(n))
            }
            b'$' => {
                let line = self.read_line()?;
                let len: i64 = std::str::from_utf8(line)
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .ok_or_else(|| Error::protocol("invalid bulk length in embedded response"))?;
                if len < 0 {
                    return Ok(EmbeddedResponse::Null);
                }
                let len = len as usize;
                let bytes = Bytes::copy_from_slice(&self.buf[self.pos..self.pos + len]);
                self.pos += len + 2;
                Ok(EmbeddedResponse::Bulk(bytes))
            }
            b'_' => {
                self.read_line()?;
                Ok(EmbeddedResponse::Null)
            }
            b'*' | b'%' => {
                let line = self.read_line()?;
                let count: usize = std::str::from_utf8(line)
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .ok_or_else(|| Error::protocol("invalid array length in embedded response"))?;
                let elements = if tag == b'%' { count * 2 } else { count };
                let mut items = Vec::with_capacity(elements);
                for _ in 0..elements {
                    items.push(self.read_value()?);
                }
                Ok(EmbeddedResponse::Array(items))
            }
            other => Err(Error::protocol(format!("unknown response tag '{}'", other as char))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_simple_string() {
        let resp = decode_response(b"+OK\r\n").unwrap();
        assert!(matches!(resp, EmbeddedResponse::Simple(s) if s == "OK"));
    }

    #[test]
    fn decodes_bulk_string() {
        let resp = decode_response(b"$5\r\nhello\r\n").unwrap();
        assert!(matches!(resp, EmbeddedResponse::Bulk(b) if b == Bytes::from_static(b"hello")));
    }

    #[test]
    fn decodes_null_bulk_as_null() {
        let resp = decode_response(b"$-1\r\n").unwrap();
        assert!(matches!(resp, EmbeddedResponse::Null));
    }

    #[test]
    fn decodes_error_frame_as_err() {
        let err = decode_response(b"-command FOO not supported\r\n").unwrap_err();
        assert_eq!(err.kind, ember_core::ErrorKind::NotSupported);
    }

    #[test]
    fn decodes_wrong_type_error_frame_with_its_real_kind() {
        let err = decode_response(b"-WRONGTYPE Operation against a key holding the wrong kind of value\r\n").unwrap_err();
        assert_eq!(err.kind, ember_core::ErrorKind::WrongType);
    }

    #[test]
    fn decodes_out_of_memory_error_frame_with_its_real_kind() {
        let err = decode_response(b"-OOM command not allowed when used memory > 'max_memory'\r\n").unwrap_err();
        assert_eq!(err.kind, ember_core::ErrorKind::OutOfMemory);
    }

    #[test]
    fn decodes_busy_error_frame_with_its_real_kind() {
        let err = decode_response(b"-BUSY a preamble rewrite is already in progress\r\n").unwrap_err();
        assert_eq!(err.kind, ember_core::ErrorKind::Busy);
    }

    #[test]
    fn decodes_not_leader_error_frame_with_its_real_kind() {
        let err = decode_response(b"-NOTLEADER this node is not the cluster leader\r\n").unwrap_err();
        assert_eq!(err.kind, ember_core::ErrorKind::NotLeader);
    }

    #[test]
    fn decodes_nested_array() {
        let resp = decode_response(b"*2\r\n$1\r\na\r\n$1\r\nb\r\n").unwrap();
        match resp {
            EmbeddedResponse::Array(items) => assert_eq!(items.len(), 2),
            other => panic!("expected array, got {other:?}"),
        }
    }
}
