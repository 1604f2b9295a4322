use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::config::Config;
use crate::engine::{Admission, BucketParams, RetryAfter};
use crate::error::{Error, Result};
use crate::protocol::{Command, Frame};
use crate::server::Connection;
use crate::store::{BucketStore, RecordStore};
use crate::types::Key;

/// Client for a state store server speaking RESP.
///
/// Connections are pooled and bounded by a semaphore. Every round trip runs
/// in its own task and the caller waits for it under a deadline:
///
/// - dropping the caller's future stops the wait, never the round trip
/// - on timeout the command may still have committed on the server, so a
///   retried `TBALLOW` can consume tokens twice (at-least-once)
///
/// A connection that errors or stalls past the deadline is discarded and its
/// pool slot freed. So is one whose reply leaves unread bytes.
#[derive(Clone)]
pub struct RemoteStore {
    inner: Arc<Inner>,
}

struct Inner {
    addr: String,
    timeout: Duration,
    idle: Mutex<Vec<Connection>>,
    permits: Semaphore,
}

impl RemoteStore {
    pub fn new(addr: impl Into<String>, pool_size: usize, timeout: Duration) -> Self {
        let pool_size = pool_size.max(1);
        Self {
            inner: Arc::new(Inner {
                addr: addr.into(),
                timeout,
                idle: Mutex::new(Vec::with_capacity(pool_size)),
                permits: Semaphore::new(pool_size),
            }),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.store_addr.clone(),
            config.store_pool_size,
            config.store_timeout(),
        )
    }

    /// Number of idle pooled connections
    pub fn idle_connections(&self) -> usize {
        self.inner.idle.lock().len()
    }

    /// Dispatch a command and wait for its reply within the deadline.
    async fn execute(&self, cmd: Command) -> Result<Frame> {
        let name = cmd.name();
        let request = cmd.to_frame();
        let inner = self.inner.clone();
        let task = tokio::spawn(async move { inner.round_trip(&request).await });

        let reply = match tokio::time::timeout(self.inner.timeout, task).await {
            Ok(Ok(result)) => result?,
            Ok(Err(join_err)) => {
                return Err(Error::store(format!("{} task failed: {}", name, join_err)))
            }
            Err(_) => {
                warn!(
                    "{} to {} timed out after {:?}; outcome unknown",
                    name, self.inner.addr, self.inner.timeout
                );
                return Err(Error::Timeout(self.inner.timeout));
            }
        };

        match reply {
            Frame::Error(msg) if msg.starts_with("WRONGTYPE") => Err(Error::WrongType),
            Frame::Error(msg) => Err(Error::store(format!("{} rejected: {}", name, msg))),
            frame => Ok(frame),
        }
    }
}

impl Inner {
    async fn round_trip(&self, request: &Frame) -> Result<Frame> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| Error::store("connection pool closed"))?;

        // The permit is held until the socket work ends, so that work gets
        // its own deadline. A stalled connection is dropped, never pooled.
        match tokio::time::timeout(self.timeout, self.exchange(request)).await {
            Ok(result) => result,
            Err(_) => {
                debug!("Dropping stalled store connection to {}", self.addr);
                Err(Error::Timeout(self.timeout))
            }
        }
    }

    async fn exchange(&self, request: &Frame) -> Result<Frame> {
        let pooled = self.idle.lock().pop();
        let mut conn = match pooled {
            Some(conn) => conn,
            None => {
                debug!("Opening store connection to {}", self.addr);
                Connection::connect(&self.addr)
                    .await
                    .map_err(|e| Error::store(format!("connect {}: {}", self.addr, e)))?
            }
        };

        let reply = conn
            .round_trip(request)
            .await
            .map_err(|e| Error::store(format!("round trip to {}: {}", self.addr, e)))?;

        if !conn.has_pending_input() {
            self.idle.lock().push(conn);
        }
        Ok(reply)
    }
}

fn malformed(what: &str, frame: &Frame) -> Error {
    Error::store(format!("malformed {} reply: {:?}", what, frame))
}

fn expect_integer(what: &str, frame: Frame) -> Result<i64> {
    frame.as_integer().ok_or_else(|| malformed(what, &frame))
}

fn expect_bulk_array(what: &str, frame: Frame) -> Result<Vec<Bytes>> {
    let Frame::Array(items) = frame else {
        return Err(malformed(what, &frame));
    };
    items
        .into_iter()
        .map(|item| match item {
            Frame::Bulk(b) => Ok(b),
            other => Err(malformed(what, &other)),
        })
        .collect()
}

/// Decode `*3 :allowed :remaining :retry_after_ms`, rejecting anything the
/// transition could not have produced.
fn decode_admission(frame: Frame, capacity: u64) -> Result<Admission> {
    let items = match frame {
        Frame::Array(items) if items.len() == 3 => items,
        other => return Err(malformed("TBALLOW", &other)),
    };
    let ints: Vec<i64> = items
        .iter()
        .map(|f| f.as_integer().ok_or_else(|| malformed("TBALLOW", f)))
        .collect::<Result<_>>()?;

    let allowed = match ints[0] {
        0 => false,
        1 => true,
        _ => return Err(Error::store(format!("TBALLOW allowed flag {}", ints[0]))),
    };
    let remaining = u64::try_from(ints[1])
        .ok()
        .filter(|r| *r <= capacity)
        .ok_or_else(|| Error::store(format!("TBALLOW remaining {} out of range", ints[1])))?;
    let retry_after = RetryAfter::from_millis_sentinel(ints[2])
        .filter(|r| allowed == (*r == RetryAfter::Immediately))
        .ok_or_else(|| Error::store(format!("TBALLOW retry-after {} inconsistent", ints[2])))?;

    Ok(Admission {
        allowed,
        remaining,
        retry_after,
    })
}

#[async_trait]
impl BucketStore for RemoteStore {
    async fn token_bucket(&self, key: &Key, params: BucketParams) -> Result<Admission> {
        let reply = self
            .execute(Command::TbAllow {
                key: key.clone(),
                params,
            })
            .await?;
        decode_admission(reply, params.capacity)
    }
}

#[async_trait]
impl RecordStore for RemoteStore {
    async fn hset(&self, key: &Key, fields: Vec<(Bytes, Bytes)>) -> Result<()> {
        let reply = self.execute(Command::HSet(key.clone(), fields)).await?;
        expect_integer("HSET", reply).map(|_| ())
    }

    async fn hgetall(&self, key: &Key) -> Result<Vec<(Bytes, Bytes)>> {
        let reply = self.execute(Command::HGetAll(key.clone())).await?;
        let flat = expect_bulk_array("HGETALL", reply)?;
        if flat.len() % 2 != 0 {
            return Err(Error::store("HGETALL reply has an odd number of items"));
        }
        let mut fields = Vec::with_capacity(flat.len() / 2);
        let mut it = flat.into_iter();
        while let (Some(f), Some(v)) = (it.next(), it.next()) {
            fields.push((f, v));
        }
        Ok(fields)
    }

    async fn del(&self, key: &Key) -> Result<bool> {
        let reply = self.execute(Command::Del(key.clone())).await?;
        expect_integer("DEL", reply).map(|n| n > 0)
    }

    async fn sadd(&self, key: &Key, member: Bytes) -> Result<()> {
        let reply = self.execute(Command::SAdd(key.clone(), vec![member])).await?;
        expect_integer("SADD", reply).map(|_| ())
    }

    async fn srem(&self, key: &Key, member: Bytes) -> Result<bool> {
        let reply = self.execute(Command::SRem(key.clone(), vec![member])).await?;
        expect_integer("SREM", reply).map(|n| n > 0)
    }

    async fn smembers(&self, key: &Key) -> Result<Vec<Bytes>> {
        let reply = self.execute(Command::SMembers(key.clone())).await?;
        expect_bulk_array("SMEMBERS", reply)
    }

    async fn ping(&self) -> Result<()> {
        match self.execute(Command::Ping(None)).await? {
            Frame::Simple(s) if s == "PONG" => Ok(()),
            other => Err(malformed("PING", &other)),
        }
    }
}
