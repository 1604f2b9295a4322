use bytes::Bytes;
use std::fmt;

/// One RESP2 value.
///
/// Bulk strings hold `Bytes` so keys and fields move between the network
/// buffer and the store without copying.
#[derive(Clone, PartialEq)]
pub enum Frame {
    /// `+OK`
    Simple(String),
    /// `-ERR message`
    Error(String),
    /// `:42`
    Integer(i64),
    /// `$5 hello`
    Bulk(Bytes),
    /// `$-1`
    Null,
    /// `*N` followed by N frames
    Array(Vec<Frame>),
}

impl Frame {
    #[inline]
    pub fn ok() -> Self {
        Frame::Simple("OK".into())
    }

    #[inline]
    pub fn pong() -> Self {
        Frame::Simple("PONG".into())
    }

    #[inline]
    pub fn error(msg: impl Into<String>) -> Self {
        Frame::Error(msg.into())
    }

    #[inline]
    pub fn integer(val: i64) -> Self {
        Frame::Integer(val)
    }

    #[inline]
    pub fn bulk(data: impl Into<Bytes>) -> Self {
        Frame::Bulk(data.into())
    }

    /// A request as clients send it: an array of bulk strings.
    pub fn command<I, B>(parts: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        Frame::Array(parts.into_iter().map(Frame::bulk).collect())
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Frame::Error(_))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Frame::Null)
    }

    pub fn as_integer(&self) -> Option<i64> {
        if let Frame::Integer(i) = self {
            Some(*i)
        } else {
            None
        }
    }

    /// Text of a simple string, or of a bulk string holding UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Frame::Simple(s) => Some(s),
            Frame::Bulk(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    pub fn into_array(self) -> Option<Vec<Frame>> {
        if let Frame::Array(items) = self {
            Some(items)
        } else {
            None
        }
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frame::Simple(s) => write!(f, "+{}", s),
            Frame::Error(s) => write!(f, "-{}", s),
            Frame::Integer(i) => write!(f, ":{}", i),
            Frame::Bulk(b) => match std::str::from_utf8(b) {
                Ok(s) => write!(f, "{:?}", s),
                Err(_) => write!(f, "{:?}", b),
            },
            Frame::Null => f.write_str("(nil)"),
            Frame::Array(items) => f.debug_list().entries(items).finish(),
        }
    }
}
