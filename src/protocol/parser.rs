use bytes::{Buf, Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::protocol::Frame;

/// Largest accepted bulk string.
const MAX_BULK_LEN: usize = 512 * 1024;

/// Largest accepted array length.
const MAX_ARRAY_LEN: usize = 64 * 1024;

/// Longest line without a terminator before the peer is considered broken.
const MAX_LINE_LEN: usize = 64 * 1024;

/// Deepest accepted array nesting.
const MAX_DEPTH: usize = 8;

/// RESP2 parser.
///
/// Parsing is two-phase: the buffer is first scanned to find the length of
/// one complete frame without consuming anything, then exactly that many
/// bytes are split off and decoded. Partial reads therefore never leave the
/// buffer half-consumed, and bulk strings are sliced out without copying.
pub struct Parser;

impl Parser {
    /// Create a new parser
    pub fn new() -> Self {
        Self
    }

    /// Try to parse one frame from the front of the buffer.
    ///
    /// Returns `Error::Incomplete` if more data is needed; the buffer is
    /// untouched in that case.
    pub fn parse(&self, buf: &mut BytesMut) -> Result<Frame> {
        let len = frame_len(&buf[..], 0)?;
        let mut frame = buf.split_to(len).freeze();
        decode(&mut frame)
    }
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

/// Position of the first `\r\n` in `buf`.
fn find_crlf(buf: &[u8]) -> Result<usize> {
    match buf.windows(2).position(|w| w == b"\r\n") {
        Some(pos) => Ok(pos),
        None if buf.len() > MAX_LINE_LEN => Err(Error::Protocol("line too long".into())),
        None => Err(Error::Incomplete),
    }
}

/// Parse the signed length in a `$`/`*` header line.
fn header_len(line: &[u8]) -> Result<i64> {
    let s = std::str::from_utf8(line)
        .map_err(|e| Error::Protocol(format!("invalid utf8: {}", e)))?;
    s.parse()
        .map_err(|_| Error::Protocol(format!("invalid length: {}", s)))
}

/// Byte length of the complete frame at the start of `buf`.
fn frame_len(buf: &[u8], depth: usize) -> Result<usize> {
    let Some(&first) = buf.first() else {
        return Err(Error::Incomplete);
    };

    match first {
        b'+' | b'-' | b':' => find_crlf(buf).map(|pos| pos + 2),
        b'$' => {
            let crlf = find_crlf(buf)?;
            let header = crlf + 2;
            match header_len(&buf[1..crlf])? {
                -1 => Ok(header),
                n if n < 0 => Err(Error::Protocol(format!("invalid bulk length: {}", n))),
                n if n as usize > MAX_BULK_LEN => {
                    Err(Error::Protocol(format!("bulk string too large: {}", n)))
                }
                n => {
                    let total = header + n as usize + 2;
                    if buf.len() < total {
                        return Err(Error::Incomplete);
                    }
                    if &buf[total - 2..total] != b"\r\n" {
                        return Err(Error::Protocol("bulk string missing terminator".into()));
                    }
                    Ok(total)
                }
            }
        }
        b'*' => {
            if depth >= MAX_DEPTH {
                return Err(Error::Protocol("arrays nested too deeply".into()));
            }
            let crlf = find_crlf(buf)?;
            let mut pos = crlf + 2;
            match header_len(&buf[1..crlf])? {
                -1 => Ok(pos),
                n if n < 0 => Err(Error::Protocol(format!("invalid array length: {}", n))),
                n if n as usize > MAX_ARRAY_LEN => {
                    Err(Error::Protocol(format!("array too large: {}", n)))
                }
                n => {
                    for _ in 0..n {
                        pos += frame_len(&buf[pos..], depth + 1)?;
                    }
                    Ok(pos)
                }
            }
        }
        // Inline command: PING\r\n
        _ => find_crlf(buf).map(|pos| pos + 2),
    }
}

/// Decode a frame from a buffer known to contain it completely.
fn decode(buf: &mut Bytes) -> Result<Frame> {
    let first = buf[0];
    let crlf = find_crlf(&buf[..])?;
    let line = if crlf > 0 { buf.slice(1..crlf) } else { Bytes::new() };

    match first {
        b'+' | b'-' => {
            let s = String::from_utf8(line.to_vec())
                .map_err(|e| Error::Protocol(format!("invalid utf8: {}", e)))?;
            buf.advance(crlf + 2);
            Ok(if first == b'+' {
                Frame::Simple(s)
            } else {
                Frame::Error(s)
            })
        }
        b':' => {
            let n = header_len(&line)
                .map_err(|_| Error::Protocol("invalid integer".into()))?;
            buf.advance(crlf + 2);
            Ok(Frame::Integer(n))
        }
        b'$' => {
            let n = header_len(&line)?;
            buf.advance(crlf + 2);
            if n == -1 {
                return Ok(Frame::Null);
            }
            let content = buf.split_to(n as usize);
            buf.advance(2);
            Ok(Frame::Bulk(content))
        }
        b'*' => {
            let n = header_len(&line)?;
            buf.advance(crlf + 2);
            if n == -1 {
                return Ok(Frame::Null);
            }
            let mut frames = Vec::with_capacity(n as usize);
            for _ in 0..n {
                frames.push(decode(buf)?);
            }
            Ok(Frame::Array(frames))
        }
        _ => {
            let line = buf.split_to(crlf);
            buf.advance(2);
            let frames: Vec<Frame> = line
                .split(|&b| b == b' ' || b == b'\t')
                .filter(|s| !s.is_empty())
                .map(|p| Frame::Bulk(line.slice_ref(p)))
                .collect();

            if frames.is_empty() {
                return Err(Error::Protocol("empty inline command".to_string()));
            }
            Ok(Frame::Array(frames))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(input: &[u8]) -> (Result<Frame>, BytesMut) {
        let mut buf = BytesMut::from(input);
        let result = Parser::new().parse(&mut buf);
        (result, buf)
    }

    #[test]
    fn test_parse_tballow_command() {
        let (frame, rest) =
            parse(b"*6\r\n$7\r\nTBALLOW\r\n$8\r\nrl:t:r:s\r\n$2\r\n10\r\n$1\r\n1\r\n$1\r\n5\r\n$1\r\n1\r\n");
        let arr = frame.unwrap().into_array().unwrap();
        assert_eq!(arr.len(), 6);
        assert_eq!(arr[0].as_str(), Some("TBALLOW"));
        assert_eq!(arr[1].as_str(), Some("rl:t:r:s"));
        assert!(rest.is_empty());
    }

    #[test]
    fn test_parse_tballow_reply() {
        let (frame, _) = parse(b"*3\r\n:0\r\n:4\r\n:-1\r\n");
        assert_eq!(
            frame.unwrap(),
            Frame::Array(vec![Frame::Integer(0), Frame::Integer(4), Frame::Integer(-1)])
        );
    }

    #[test]
    fn test_parse_simple_and_error() {
        let (frame, _) = parse(b"+OK\r\n");
        assert_eq!(frame.unwrap(), Frame::ok());
        let (frame, _) = parse(b"-WRONGTYPE bad\r\n");
        assert_eq!(frame.unwrap(), Frame::error("WRONGTYPE bad"));
    }

    #[test]
    fn test_parse_null_bulk_and_array() {
        let (frame, _) = parse(b"$-1\r\n");
        assert!(frame.unwrap().is_null());
        let (frame, _) = parse(b"*-1\r\n");
        assert!(frame.unwrap().is_null());
    }

    #[test]
    fn test_parse_empty_array() {
        let (frame, _) = parse(b"*0\r\n");
        assert_eq!(frame.unwrap(), Frame::Array(vec![]));
    }

    #[test]
    fn test_parse_binary_bulk_with_crlf_inside() {
        let (frame, _) = parse(b"$4\r\na\r\nb\r\n");
        assert_eq!(frame.unwrap(), Frame::bulk(&b"a\r\nb"[..]));
    }

    #[test]
    fn test_partial_array_leaves_buffer_untouched() {
        let input = b"*2\r\n$4\r\nPING\r\n$4\r\nte";
        let (result, rest) = parse(input);
        assert!(matches!(result, Err(Error::Incomplete)));
        assert_eq!(&rest[..], &input[..]);
    }

    #[test]
    fn test_pipelined_frames() {
        let mut buf = BytesMut::from(&b":1\r\n:2\r\n+OK\r\n"[..]);
        let parser = Parser::new();
        assert_eq!(parser.parse(&mut buf).unwrap(), Frame::Integer(1));
        assert_eq!(parser.parse(&mut buf).unwrap(), Frame::Integer(2));
        assert_eq!(parser.parse(&mut buf).unwrap(), Frame::ok());
        assert!(matches!(parser.parse(&mut buf), Err(Error::Incomplete)));
    }

    #[test]
    fn test_parse_inline() {
        let (frame, rest) = parse(b"SMEMBERS  rule:index\r\n");
        let arr = frame.unwrap().into_array().unwrap();
        assert_eq!(arr.len(), 2);
        assert_eq!(arr[1].as_str(), Some("rule:index"));
        assert!(rest.is_empty());
    }

    #[test]
    fn test_empty_inline_is_consumed_and_rejected() {
        let (result, rest) = parse(b"  \r\n:1\r\n");
        assert!(matches!(result, Err(Error::Protocol(_))));
        assert_eq!(&rest[..], b":1\r\n");
    }

    #[test]
    fn test_rejects_negative_and_oversized_lengths() {
        assert!(matches!(parse(b"$-5\r\n").0, Err(Error::Protocol(_))));
        assert!(matches!(parse(b"*-2\r\n").0, Err(Error::Protocol(_))));
        assert!(matches!(parse(b"$999999999\r\n").0, Err(Error::Protocol(_))));
        assert!(matches!(parse(b"$3\r\nabcXY").0, Err(Error::Protocol(_))));
    }

    #[test]
    fn test_rejects_deep_nesting() {
        let input = "*1\r\n".repeat(MAX_DEPTH + 1) + ":1\r\n";
        assert!(matches!(parse(input.as_bytes()).0, Err(Error::Protocol(_))));
    }

    #[test]
    fn test_invalid_integer() {
        assert!(matches!(parse(b":abc\r\n").0, Err(Error::Protocol(_))));
    }

    #[test]
    fn test_bare_crlf_is_rejected() {
        let (result, rest) = parse(b"\r\n");
        assert!(matches!(result, Err(Error::Protocol(_))));
        assert!(rest.is_empty());
    }

    #[test]
    fn test_parse_empty() {
        assert!(matches!(parse(b"").0, Err(Error::Incomplete)));
    }
}
