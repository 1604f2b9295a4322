use bytes::{BufMut, BytesMut};

use crate::protocol::Frame;

/// RESP protocol encoder.
///
/// Used on both sides of the store connection: the server encodes replies,
/// the client encodes commands.
pub struct Encoder;

impl Encoder {
    /// Create a new encoder
    pub fn new() -> Self {
        Self
    }

    /// Encode a frame into the buffer
    pub fn encode(&self, frame: &Frame, buf: &mut BytesMut) {
        match frame {
            Frame::Simple(s) => put_line(buf, b'+', s.as_bytes()),
            Frame::Error(s) => put_line(buf, b'-', s.as_bytes()),
            Frame::Integer(i) => {
                let mut itoa_buf = itoa::Buffer::new();
                put_line(buf, b':', itoa_buf.format(*i).as_bytes());
            }
            Frame::Bulk(b) => {
                put_len(buf, b'$', b.len());
                buf.put_slice(b);
                buf.put_slice(b"\r\n");
            }
            Frame::Null => buf.put_slice(b"$-1\r\n"),
            Frame::Array(arr) => {
                put_len(buf, b'*', arr.len());
                for frame in arr {
                    self.encode(frame, buf);
                }
            }
        }
    }

    /// Encode a frame into a new BytesMut buffer
    pub fn encode_to_bytes(&self, frame: &Frame) -> BytesMut {
        let mut buf = BytesMut::with_capacity(64);
        self.encode(frame, &mut buf);
        buf
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

#[inline]
fn put_line(buf: &mut BytesMut, prefix: u8, body: &[u8]) {
    buf.reserve(body.len() + 3);
    buf.put_u8(prefix);
    buf.put_slice(body);
    buf.put_slice(b"\r\n");
}

#[inline]
fn put_len(buf: &mut BytesMut, prefix: u8, len: usize) {
    let mut itoa_buf = itoa::Buffer::new();
    put_line(buf, prefix, itoa_buf.format(len).as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Parser;

    fn encode(frame: &Frame) -> BytesMut {
        Encoder::new().encode_to_bytes(frame)
    }

    #[test]
    fn test_encode_tballow_reply() {
        let frame = Frame::Array(vec![Frame::integer(0), Frame::integer(7), Frame::integer(-1)]);
        assert_eq!(&encode(&frame)[..], b"*3\r\n:0\r\n:7\r\n:-1\r\n");
    }

    #[test]
    fn test_encode_command() {
        let frame = Frame::command(["SADD", "rule:index", "rule:t:r"]);
        assert_eq!(
            &encode(&frame)[..],
            b"*3\r\n$4\r\nSADD\r\n$10\r\nrule:index\r\n$8\r\nrule:t:r\r\n"
        );
    }

    #[test]
    fn test_encode_status_frames() {
        assert_eq!(&encode(&Frame::ok())[..], b"+OK\r\n");
        assert_eq!(&encode(&Frame::pong())[..], b"+PONG\r\n");
        assert_eq!(&encode(&Frame::error("ERR nope"))[..], b"-ERR nope\r\n");
        assert_eq!(&encode(&Frame::Null)[..], b"$-1\r\n");
        assert_eq!(&encode(&Frame::Array(vec![]))[..], b"*0\r\n");
    }

    #[test]
    fn test_encoded_hash_reply_parses_back() {
        let frame = Frame::Array(vec![
            Frame::bulk("capacity"),
            Frame::bulk("10"),
            Frame::bulk("refill_rate"),
            Frame::bulk("0"),
        ]);
        let mut buf = encode(&frame);
        assert_eq!(Parser::new().parse(&mut buf).unwrap(), frame);
        assert!(buf.is_empty());
    }
}
