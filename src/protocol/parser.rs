//! Incremental RESP decoder.
//!
//! [`parse_frame`] looks at a buffer that may hold a partial message and
//! returns `Ok(None)` until a whole frame is present, so the caller can keep
//! appending socket reads and retry. [`parse_command`] additionally accepts
//! inline commands (`RESOLVE 0z\r\n`, as typed into telnet) and flattens the
//! request into its arguments.

use bytes::Bytes;
use thiserror::Error;

use crate::protocol::types::{prefix, Frame, CRLF};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("invalid integer {0:?}")]
    InvalidInteger(String),

    #[error("invalid length {0}")]
    InvalidLength(i64),

    #[error("{what} of {size} exceeds the limit of {max}")]
    TooLarge {
        what: &'static str,
        size: usize,
        max: usize,
    },

    #[error("protocol error: {0}")]
    Protocol(String),
}

pub type ParseResult<T> = Result<T, ParseError>;

/// Longest accepted bulk string. Generous for a URL.
pub const MAX_BULK_LEN: usize = 1024 * 1024;

/// Most elements accepted in one array.
pub const MAX_ARRAY_LEN: usize = 1024;

const MAX_DEPTH: usize = 8;

/// Parses one frame from the front of `buf`.
///
/// Returns the frame and the number of bytes it occupied.
pub fn parse_frame(buf: &[u8]) -> ParseResult<Option<(Frame, usize)>> {
    let mut cursor = Cursor { buf, pos: 0 };
    Ok(cursor.frame(0)?.map(|frame| (frame, cursor.pos)))
}

/// Parses one client request into its arguments.
pub fn parse_command(buf: &[u8]) -> ParseResult<Option<(Vec<Bytes>, usize)>> {
    match buf.first() {
        None => Ok(None),
        Some(&prefix::ARRAY) => match parse_frame(buf)? {
            None => Ok(None),
            Some((Frame::Array(items), used)) => {
                let args = items
                    .into_iter()
                    .map(|item| match item {
                        Frame::Bulk(b) => Ok(b),
                        other => Err(ParseError::Protocol(format!(
                            "expected bulk string argument, got {:?}",
                            other
                        ))),
                    })
                    .collect::<ParseResult<Vec<_>>>()?;
                Ok(Some((args, used)))
            }
            Some((_, used)) => Ok(Some((Vec::new(), used))),
        },
        Some(_) => parse_inline(buf),
    }
}

fn parse_inline(buf: &[u8]) -> ParseResult<Option<(Vec<Bytes>, usize)>> {
    let Some(end) = find_crlf(buf) else {
        if buf.len() > MAX_BULK_LEN {
            return Err(ParseError::TooLarge {
                what: "inline command",
                size: buf.len(),
                max: MAX_BULK_LEN,
            });
        }
        return Ok(None);
    };

    let args = buf[..end]
        .split(|b| b.is_ascii_whitespace())
        .filter(|word| !word.is_empty())
        .map(Bytes::copy_from_slice)
        .collect();
    Ok(Some((args, end + CRLF.len())))
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn frame(&mut self, depth: usize) -> ParseResult<Option<Frame>> {
        if depth > MAX_DEPTH {
            return Err(ParseError::Protocol("arrays nested too deeply".to_string()));
        }
        let Some(&tag) = self.buf.get(self.pos) else {
            return Ok(None);
        };
        self.pos += 1;

        match tag {
            prefix::SIMPLE => Ok(self.text()?.map(Frame::Simple)),
            prefix::ERROR => Ok(self.text()?.map(Frame::Error)),
            prefix::INTEGER => Ok(self.integer()?.map(Frame::Integer)),
            prefix::BULK => self.bulk(),
            prefix::ARRAY => self.array(depth),
            other => Err(ParseError::Protocol(format!(
                "unexpected type byte {:#04x}",
                other
            ))),
        }
    }

    fn line(&mut self) -> Option<&'a [u8]> {
        let buf: &'a [u8] = self.buf;
        let rest = &buf[self.pos..];
        let end = find_crlf(rest)?;
        self.pos += end + CRLF.len();
        Some(&rest[..end])
    }

    fn text(&mut self) -> ParseResult<Option<String>> {
        match self.line() {
            None => Ok(None),
            Some(line) => String::from_utf8(line.to_vec())
                .map(Some)
                .map_err(|e| ParseError::Protocol(e.to_string())),
        }
    }

    fn integer(&mut self) -> ParseResult<Option<i64>> {
        match self.line() {
            None => Ok(None),
            Some(line) => {
                let text = String::from_utf8_lossy(line);
                text.parse()
                    .map(Some)
                    .map_err(|_| ParseError::InvalidInteger(text.into_owned()))
            }
        }
    }

    fn length(&mut self, what: &'static str, max: usize) -> ParseResult<Option<Option<usize>>> {
        let Some(len) = self.integer()? else {
            return Ok(None);
        };
        match len {
            -1 => Ok(Some(None)),
            n if n < 0 => Err(ParseError::InvalidLength(n)),
            n if n as u64 > max as u64 => Err(ParseError::TooLarge {
                what,
                size: n as usize,
                max,
            }),
            n => Ok(Some(Some(n as usize))),
        }
    }

    fn bulk(&mut self) -> ParseResult<Option<Frame>> {
        let len = match self.length("bulk string", MAX_BULK_LEN)? {
            None => return Ok(None),
            Some(None) => return Ok(Some(Frame::Null)),
            Some(Some(len)) => len,
        };

        let end = self.pos + len;
        if self.buf.len() < end + CRLF.len() {
            return Ok(None);
        }
        if &self.buf[end..end + CRLF.len()] != CRLF {
            return Err(ParseError::Protocol(
                "bulk string not terminated by CRLF".to_string(),
            ));
        }

        let data = Bytes::copy_from_slice(&self.buf[self.pos..end]);
        self.pos = end + CRLF.len();
        Ok(Some(Frame::Bulk(data)))
    }

    fn array(&mut self, depth: usize) -> ParseResult<Option<Frame>> {
        let count = match self.length("array", MAX_ARRAY_LEN)? {
            None => return Ok(None),
            Some(None) => return Ok(Some(Frame::Null)),
            Some(Some(count)) => count,
        };

        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            match self.frame(depth + 1)? {
                Some(item) => items.push(item),
                None => return Ok(None),
            }
        }
        Ok(Some(Frame::Array(items)))
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == CRLF)
}
