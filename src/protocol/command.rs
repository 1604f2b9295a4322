use bytes::Bytes;

use crate::engine::BucketParams;
use crate::error::{Error, Result};
use crate::protocol::Frame;
use crate::types::Key;

/// Parsed command from a store client.
///
/// Commands are parsed from RESP arrays and validated for correct
/// argument types and counts.
#[derive(Debug, Clone)]
pub enum Command {
    /// PING [message]
    Ping(Option<Bytes>),

    /// TBALLOW key now refill_rate capacity requested
    ///
    /// Runs one token bucket transition atomically. Replies
    /// `*3 :allowed :remaining :retry_after_ms`.
    TbAllow { key: Key, params: BucketParams },

    /// HSET key field value [field value ...]
    HSet(Key, Vec<(Bytes, Bytes)>),

    /// HGETALL key
    HGetAll(Key),

    /// DEL key
    Del(Key),

    /// SADD key member [member ...]
    SAdd(Key, Vec<Bytes>),

    /// SREM key member [member ...]
    SRem(Key, Vec<Bytes>),

    /// SMEMBERS key
    SMembers(Key),

    /// DBSIZE - number of live entries
    DbSize,

    /// INFO [section] - server statistics
    Info(Option<Bytes>),
}

impl Command {
    /// Parse a Frame into a Command
    pub fn from_frame(frame: Frame) -> Result<Self> {
        let array = match frame {
            Frame::Array(arr) => arr,
            _ => return Err(Error::Protocol("expected array".into())),
        };

        if array.is_empty() {
            return Err(Error::Protocol("empty command".into()));
        }

        let cmd_name = match &array[0] {
            Frame::Bulk(b) => b,
            _ => return Err(Error::Protocol("expected bulk string for command".into())),
        };

        let cmd_upper: Vec<u8> = cmd_name.iter().map(|b| b.to_ascii_uppercase()).collect();

        match cmd_upper.as_slice() {
            b"PING" => {
                let msg = if array.len() > 1 {
                    Self::extract_bytes(&array, 1).ok()
                } else {
                    None
                };
                Ok(Command::Ping(msg))
            }
            b"TBALLOW" => {
                Self::ensure_args(&array, 6, "TBALLOW")?;
                let key = Self::extract_key(&array, 1)?;
                let params = BucketParams {
                    now: Self::extract_i64(&array, 2)?,
                    refill_rate: Self::extract_u64(&array, 3)?,
                    capacity: Self::extract_u64(&array, 4)?,
                    requested: Self::extract_u64(&array, 5)?,
                };
                Ok(Command::TbAllow { key, params })
            }
            b"HSET" => {
                if array.len() < 4 || array.len() % 2 != 0 {
                    return Err(Self::arity_error("HSET"));
                }
                let key = Self::extract_key(&array, 1)?;
                let fields = (2..array.len())
                    .step_by(2)
                    .map(|i| Ok((Self::extract_bytes(&array, i)?, Self::extract_bytes(&array, i + 1)?)))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Command::HSet(key, fields))
            }
            b"HGETALL" => {
                Self::ensure_args(&array, 2, "HGETALL")?;
                Ok(Command::HGetAll(Self::extract_key(&array, 1)?))
            }
            b"DEL" => {
                Self::ensure_args(&array, 2, "DEL")?;
                Ok(Command::Del(Self::extract_key(&array, 1)?))
            }
            b"SADD" | b"SREM" => {
                let name = if cmd_upper == b"SADD" { "SADD" } else { "SREM" };
                if array.len() < 3 {
                    return Err(Self::arity_error(name));
                }
                let key = Self::extract_key(&array, 1)?;
                let members = (2..array.len())
                    .map(|i| Self::extract_bytes(&array, i))
                    .collect::<Result<Vec<_>>>()?;
                Ok(if name == "SADD" {
                    Command::SAdd(key, members)
                } else {
                    Command::SRem(key, members)
                })
            }
            b"SMEMBERS" => {
                Self::ensure_args(&array, 2, "SMEMBERS")?;
                Ok(Command::SMembers(Self::extract_key(&array, 1)?))
            }
            b"DBSIZE" => Ok(Command::DbSize),
            b"INFO" => {
                let section = if array.len() > 1 {
                    Self::extract_bytes(&array, 1).ok()
                } else {
                    None
                };
                Ok(Command::Info(section))
            }
            _ => {
                let cmd_str = String::from_utf8_lossy(cmd_name);
                Err(Error::UnknownCommand(cmd_str.to_string()))
            }
        }
    }

    /// Encode this command as a request frame for a remote store.
    pub fn to_frame(&self) -> Frame {
        let mut parts: Vec<Bytes> = vec![Bytes::from_static(self.name().as_bytes())];
        match self {
            Command::Ping(msg) => parts.extend(msg.clone()),
            Command::TbAllow { key, params } => {
                parts.push(key.clone().into_bytes());
                parts.push(int_bytes(params.now));
                parts.push(int_bytes(params.refill_rate));
                parts.push(int_bytes(params.capacity));
                parts.push(int_bytes(params.requested));
            }
            Command::HSet(key, fields) => {
                parts.push(key.clone().into_bytes());
                for (f, v) in fields {
                    parts.push(f.clone());
                    parts.push(v.clone());
                }
            }
            Command::HGetAll(key) | Command::Del(key) | Command::SMembers(key) => {
                parts.push(key.clone().into_bytes());
            }
            Command::SAdd(key, members) | Command::SRem(key, members) => {
                parts.push(key.clone().into_bytes());
                parts.extend(members.iter().cloned());
            }
            Command::DbSize => {}
            Command::Info(section) => parts.extend(section.clone()),
        }
        Frame::command(parts)
    }

    fn arity_error(cmd: &str) -> Error {
        Error::InvalidArgument(format!("wrong number of arguments for '{}' command", cmd))
    }

    /// Ensure the array has exactly the expected number of arguments
    fn ensure_args(array: &[Frame], expected: usize, cmd: &str) -> Result<()> {
        if array.len() != expected {
            return Err(Self::arity_error(cmd));
        }
        Ok(())
    }

    /// Extract a Key from the array at the given index
    fn extract_key(array: &[Frame], idx: usize) -> Result<Key> {
        match array.get(idx) {
            Some(Frame::Bulk(b)) => Ok(Key::new(b.clone())),
            _ => Err(Error::InvalidArgument("expected key".into())),
        }
    }

    /// Extract raw Bytes from the array at the given index
    fn extract_bytes(array: &[Frame], idx: usize) -> Result<Bytes> {
        match array.get(idx) {
            Some(Frame::Bulk(b)) => Ok(b.clone()),
            _ => Err(Error::InvalidArgument("expected bulk string".into())),
        }
    }

    /// Extract an i64 from the array at the given index
    fn extract_i64(array: &[Frame], idx: usize) -> Result<i64> {
        match array.get(idx) {
            Some(Frame::Bulk(b)) => std::str::from_utf8(b)
                .map_err(|_| Error::InvalidArgument("invalid utf8".into()))?
                .parse::<i64>()
                .map_err(|_| Error::InvalidArgument("value is not an integer".into())),
            Some(Frame::Integer(i)) => Ok(*i),
            _ => Err(Error::InvalidArgument("expected integer".into())),
        }
    }

    /// Extract a u64 from the array at the given index
    fn extract_u64(array: &[Frame], idx: usize) -> Result<u64> {
        match array.get(idx) {
            Some(Frame::Bulk(b)) => std::str::from_utf8(b)
                .map_err(|_| Error::InvalidArgument("invalid utf8".into()))?
                .parse::<u64>()
                .map_err(|_| Error::InvalidArgument("value is not a non-negative integer".into())),
            Some(Frame::Integer(i)) if *i >= 0 => Ok(*i as u64),
            Some(Frame::Integer(_)) => {
                Err(Error::InvalidArgument("value must not be negative".into()))
            }
            _ => Err(Error::InvalidArgument("expected non-negative integer".into())),
        }
    }

    /// Get the command name for logging/debugging
    pub fn name(&self) -> &'static str {
        match self {
            Command::Ping(_) => "PING",
            Command::TbAllow { .. } => "TBALLOW",
            Command::HSet(..) => "HSET",
            Command::HGetAll(_) => "HGETALL",
            Command::Del(_) => "DEL",
            Command::SAdd(..) => "SADD",
            Command::SRem(..) => "SREM",
            Command::SMembers(_) => "SMEMBERS",
            Command::DbSize => "DBSIZE",
            Command::Info(_) => "INFO",
        }
    }
}

fn int_bytes<I: itoa::Integer>(n: I) -> Bytes {
    let mut buf = itoa::Buffer::new();
    Bytes::copy_from_slice(buf.format(n).as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmd(parts: &[&'static str]) -> Result<Command> {
        Command::from_frame(Frame::command(parts.iter().copied()))
    }

    #[test]
    fn test_parse_tballow() {
        let parsed = cmd(&["tballow", "rl:t:r:s", "1000", "2", "10", "3"]).unwrap();
        match parsed {
            Command::TbAllow { key, params } => {
                assert_eq!(key.as_bytes(), b"rl:t:r:s");
                assert_eq!(params.now, 1000);
                assert_eq!(params.refill_rate, 2);
                assert_eq!(params.capacity, 10);
                assert_eq!(params.requested, 3);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_tballow_rejects_negative_and_bad_arity() {
        assert!(matches!(
            cmd(&["TBALLOW", "k", "1000", "-1", "10", "1"]),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            cmd(&["TBALLOW", "k", "1000", "1", "10"]),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            cmd(&["TBALLOW", "k", "soon", "1", "10", "1"]),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_parse_hset_pairs() {
        match cmd(&["HSET", "rule:t:r", "capacity", "10", "refill_rate", "1"]).unwrap() {
            Command::HSet(_, fields) => {
                assert_eq!(fields.len(), 2);
                assert_eq!(fields[1].0.as_ref(), b"refill_rate");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(cmd(&["HSET", "k", "field"]).is_err());
        assert!(cmd(&["HSET", "k", "a", "1", "b"]).is_err());
    }

    #[test]
    fn test_parse_set_commands() {
        assert!(matches!(
            cmd(&["SADD", "rule:index", "a", "b"]).unwrap(),
            Command::SAdd(_, m) if m.len() == 2
        ));
        assert!(matches!(
            cmd(&["srem", "rule:index", "a"]).unwrap(),
            Command::SRem(_, m) if m.len() == 1
        ));
        assert!(cmd(&["SADD", "rule:index"]).is_err());
        assert!(matches!(cmd(&["SMEMBERS", "rule:index"]).unwrap(), Command::SMembers(_)));
    }

    #[test]
    fn test_unknown_command() {
        assert!(matches!(cmd(&["FLUSHALL"]), Err(Error::UnknownCommand(_))));
    }

    #[test]
    fn test_non_array_is_protocol_error() {
        assert!(matches!(
            Command::from_frame(Frame::integer(1)),
            Err(Error::Protocol(_))
        ));
        assert!(matches!(
            Command::from_frame(Frame::Array(vec![])),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn test_to_frame_is_parseable() {
        let tballow = Command::TbAllow {
            key: Key::from("rl:t:r:s"),
            params: BucketParams {
                now: 1_700_000_000_000,
                refill_rate: 5,
                capacity: 100,
                requested: 1,
            },
        };
        let frame = tballow.to_frame();
        assert_eq!(
            frame,
            Frame::command(["TBALLOW", "rl:t:r:s", "1700000000000", "5", "100", "1"])
        );
        assert!(matches!(Command::from_frame(frame).unwrap(), Command::TbAllow { .. }));
    }

    #[test]
    fn test_name() {
        assert_eq!(cmd(&["dbsize"]).unwrap().name(), "DBSIZE");
        assert_eq!(cmd(&["PING"]).unwrap().name(), "PING");
    }
}
