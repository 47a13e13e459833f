//! RESP2/RESP3 wire codec.
//!
//! Decodes length-prefixed arrays of bulk strings (`*N\r\n$len\r\n<bytes>\r\n...`)
//! into command token vectors, and encodes typed responses. Implements
//! `tokio_util::codec::{Decoder, Encoder}` so framing composes with
//! `tokio_util::codec::Framed` over a plain `TcpStream`.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{Error, ErrorKind};

/// Maximum chunk size for a single write of a large response.
pub const CHUNK_SIZE: usize = 1024;

/// A decoded command: the ordered list of bulk-string tokens.
pub type Command = Vec<Bytes>;

/// Frames inbound RESP arrays-of-bulk-strings into [`Command`] token vectors.
#[derive(Debug, Default)]
pub struct RespCodec {
    /// Accumulated state so partial frames survive across `poll_read` calls.
    state: DecodeState,
}

#[derive(Debug, Default)]
enum DecodeState {
    #[default]
    AwaitingArrayHeader,
    AwaitingBulkHeader {
        tokens: Vec<Bytes>,
        remaining: i64,
    },
    AwaitingBulkBody {
        tokens: Vec<Bytes>,
        remaining: i64,
        body_len: usize,
    },
}

impl RespCodec {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

/// Finds a `\r\n` terminator starting at `src[start..]`, returning the index
/// of the `\r`.
fn find_crlf(src: &BytesMut, start: usize) -> Option<usize> {
    if start >= src.len() {
        return None;
    }
    src[start..]
        .windows(2)
        .position(|w| w == b"\r\n")
        .map(|p| p + start)
}

impl Decoder for RespCodec {
    type Item = Command;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match std::mem::take(&mut self.state) {
                DecodeState::AwaitingArrayHeader => {
                    if src.is_empty() {
                        self.state = DecodeState::AwaitingArrayHeader;
                        return Ok(None);
                    }
                    if src[0] != b'*' {
                        return Err(Error::new(
                            ErrorKind::ProtocolError,
                            "expected '*' array header",
                        ));
                    }
                    let Some(crlf) = find_crlf(src, 1) else {
                        self.state = DecodeState::AwaitingArrayHeader;
                        return Ok(None);
                    };
                    let count_str = std::str::from_utf8(&src[1..crlf])
                        .map_err(|_| Error::protocol("invalid array length"))?;
                    let count: i64 = count_str
                        .parse()
                        .map_err(|_| Error::protocol("invalid array length"))?;
                    src.advance(crlf + 2);

                    if count <= 0 {
                        return Err(Error::protocol("empty command"));
                    }
                    self.state = DecodeState::AwaitingBulkHeader {
                        tokens: Vec::with_capacity(count as usize),
                        remaining: count,
                    };
                }
                DecodeState::AwaitingBulkHeader { tokens, remaining } => {
                    if remaining == 0 {
                        return Ok(Some(tokens));
                    }
                    if src.is_empty() {
                        self.state = DecodeState::AwaitingBulkHeader { tokens, remaining };
                        return Ok(None);
                    }
                    if src[0] != b'$' {
                        return Err(Error::protocol("expected '$' bulk string header"));
                    }
                    let Some(crlf) = find_crlf(src, 1) else {
                        self.state = DecodeState::AwaitingBulkHeader { tokens, remaining };
                        return Ok(None);
                    };
                    let len_str = std::str::from_utf8(&src[1..crlf])
                        .map_err(|_| Error::protocol("invalid bulk length"))?;
                    let len: i64 = len_str
                        .parse()
                        .map_err(|_| Error::protocol("invalid bulk length"))?;
                    if len < 0 {
                        return Err(Error::protocol("negative bulk length"));
                    }
                    src.advance(crlf + 2);
                    self.state = DecodeState::AwaitingBulkBody {
                        tokens,
                        remaining,
                        // Bulk length is bounded by memory, never by the cast target.
                        body_len: len as usize,
                    };
                }
                DecodeState::AwaitingBulkBody {
                    mut tokens,
                    remaining,
                    body_len,
                } => {
                    if src.len() < body_len + 2 {
                        self.state = DecodeState::AwaitingBulkBody {
                            tokens,
                            remaining,
                            body_len,
                        };
                        return Ok(None);
                    }
                    let body = src.split_to(body_len).freeze();
                    if &src[..2] != b"\r\n" {
                        return Err(Error::protocol("missing bulk string terminator"));
                    }
                    src.advance(2);
                    tokens.push(body);
                    self.state = DecodeState::AwaitingBulkHeader {
                        tokens,
                        remaining: remaining - 1,
                    };
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() && matches!(self.state, DecodeState::AwaitingArrayHeader) {
            return Ok(None);
        }
        match self.decode(src)? {
            Some(item) => Ok(Some(item)),
            None => Err(Error::eof()),
        }
    }
}

/// Typed response values the encoder can render. Protocol 3 (`proto` field
/// in `HELLO`) renders `Map`/`Set` with their native RESP3 framing; protocol 2
/// degrades them to flat arrays.
#[derive(Debug, Clone, PartialEq)]
pub enum RespValue {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Bytes),
    Null,
    Array(Vec<RespValue>),
    Map(Vec<(RespValue, RespValue)>),
}

impl RespValue {
    #[must_use]
    pub fn bulk_from(s: impl Into<Vec<u8>>) -> Self {
        RespValue::Bulk(Bytes::from(s.into()))
    }

    #[must_use]
    pub fn ok() -> Self {
        RespValue::Simple("OK".to_string())
    }

    /// Encodes this value to raw RESP bytes for the given protocol version.
    #[must_use]
    pub fn encode(&self, protocol: u8) -> Vec<u8> {
        let mut buf = BytesMut::new();
        encode_into(&mut buf, self, protocol);
        buf.to_vec()
    }
}

fn encode_into(buf: &mut BytesMut, value: &RespValue, protocol: u8) {
    match value {
        RespValue::Simple(s) => {
            buf.put_u8(b'+');
            buf.put_slice(s.as_bytes());
            buf.put_slice(b"\r\n");
        }
        RespValue::Error(s) => {
            buf.put_u8(b'-');
            buf.put_slice(s.as_bytes());
            buf.put_slice(b"\r\n");
        }
        RespValue::Integer(i) => {
            buf.put_u8(b':');
            buf.put_slice(i.to_string().as_bytes());
            buf.put_slice(b"\r\n");
        }
        RespValue::Bulk(b) => {
            buf.put_u8(b'$');
            buf.put_slice(b.len().to_string().as_bytes());
            buf.put_slice(b"\r\n");
            buf.put_slice(b);
            buf.put_slice(b"\r\n");
        }
        RespValue::Null => {
            if protocol >= 3 {
                buf.put_slice(b"_\r\n");
            } else {
                buf.put_slice(b"$-1\r\n");
            }
        }
        RespValue::Array(items) => {
            buf.put_u8(b'*');
            buf.put_slice(items.len().to_string().as_bytes());
            buf.put_slice(b"\r\n");
            for item in items {
                encode_into(buf, item, protocol);
            }
        }
        RespValue::Map(pairs) => {
            if protocol >= 3 {
                buf.put_u8(b'%');
                buf.put_slice(pairs.len().to_string().as_bytes());
                buf.put_slice(b"\r\n");
                for (k, v) in pairs {
                    encode_into(buf, k, protocol);
                    encode_into(buf, v, protocol);
                }
            } else {
                buf.put_u8(b'*');
                buf.put_slice((pairs.len() * 2).to_string().as_bytes());
                buf.put_slice(b"\r\n");
                for (k, v) in pairs {
                    encode_into(buf, k, protocol);
                    encode_into(buf, v, protocol);
                }
            }
        }
    }
}

/// Encodes a decoded [`Command`] back into its canonical wire form. Used to
/// produce the bytes an AOF record stores and an append-log replay feeds
/// back into the dispatcher -- not necessarily byte-identical to whatever a
/// client originally sent (inline commands, say), but decodes to the same
/// tokens.
#[must_use]
pub fn encode_command(tokens: &[Bytes]) -> Vec<u8> {
    let mut buf = BytesMut::new();
    buf.put_u8(b'*');
    buf.put_slice(tokens.len().to_string().as_bytes());
    buf.put_slice(b"\r\n");
    for token in tokens {
        buf.put_u8(b'$');
        buf.put_slice(token.len().to_string().as_bytes());
        buf.put_slice(b"\r\n");
        buf.put_slice(token);
        buf.put_slice(b"\r\n");
    }
    buf.to_vec()
}

/// Splits `bytes` into `CHUNK_SIZE`-sized pieces, as required for responses
/// over 1024 bytes.
#[must_use]
pub fn chunk_response(bytes: &[u8]) -> Vec<&[u8]> {
    if bytes.len() <= CHUNK_SIZE {
        return vec![bytes];
    }
    bytes.chunks(CHUNK_SIZE).collect()
}

/// Encoder side: writes an already-encoded byte frame verbatim. Handlers
/// encode via [`RespValue::encode`]; the encoder's job is just buffering.
impl Encoder<Vec<u8>> for RespCodec {
    type Error = Error;

    fn encode(&mut self, item: Vec<u8>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(item.len());
        dst.put_slice(&item);
        Ok(())
    }
}
