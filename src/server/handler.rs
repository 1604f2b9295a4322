use bytes::Bytes;
use std::sync::Arc;
use std::time::Instant;

use crate::engine::ShardedDb;
use crate::error::{Error, Result};
use crate::metrics::{CommandType, Metrics};
use crate::protocol::{Command, Frame};
use crate::server::Connection;

/// Command handler for a single store connection.
pub struct Handler {
    connection: Connection,
    db: Arc<ShardedDb>,
    metrics: Arc<Metrics>,
}

impl Handler {
    pub fn new(connection: Connection, db: Arc<ShardedDb>, metrics: Arc<Metrics>) -> Self {
        Self {
            connection,
            db,
            metrics,
        }
    }

    /// Run the handler loop, processing commands until the connection closes.
    /// Uses automatic batching: reads all available frames, processes them,
    /// then flushes all responses in a single syscall.
    pub async fn run(&mut self) -> Result<()> {
        loop {
            let frames = self.connection.read_frames().await?;

            if frames.is_empty() {
                return Ok(());
            }

            for frame in frames {
                let response = self.process_frame(frame);
                self.connection.write_frame_buffered(&response);
            }

            self.connection.flush().await?;
        }
    }

    /// Process a single frame and return the response.
    fn process_frame(&self, frame: Frame) -> Frame {
        match Command::from_frame(frame) {
            Ok(cmd) => {
                let start = Instant::now();
                let cmd_type = Self::command_type(&cmd);
                let response = self.execute_command(cmd);
                self.metrics.record_command(cmd_type, start);
                response
            }
            Err(e) => {
                tracing::debug!("Command parse error: {}", e);
                if matches!(e, Error::UnknownCommand(_)) {
                    self.metrics.inc(&self.metrics.errors_unknown_cmd);
                } else {
                    self.metrics.inc(&self.metrics.errors_parse);
                }
                Frame::error(format!("ERR {}", e))
            }
        }
    }

    #[inline]
    fn command_type(cmd: &Command) -> CommandType {
        match cmd {
            Command::TbAllow { .. } => CommandType::TbAllow,
            Command::HSet(..) | Command::HGetAll(_) => CommandType::Hash,
            Command::SAdd(..) | Command::SRem(..) | Command::SMembers(_) => CommandType::Set,
            _ => CommandType::Other,
        }
    }

    /// Execute a command and return the response frame.
    fn execute_command(&self, cmd: Command) -> Frame {
        let result = match cmd {
            Command::Ping(msg) => Ok(msg.map_or_else(Frame::pong, Frame::Bulk)),
            Command::TbAllow { key, params } => {
                self.db.token_bucket(key, &params).map(|a| {
                    Frame::Array(vec![
                        Frame::integer(a.allowed as i64),
                        Frame::integer(i64::try_from(a.remaining).unwrap_or(i64::MAX)),
                        Frame::integer(a.retry_after_ms()),
                    ])
                })
            }
            Command::HSet(key, fields) => self
                .db
                .hset(key, fields)
                .map(|added| Frame::integer(added as i64)),
            Command::HGetAll(key) => self.db.hgetall(&key).map(|fields| {
                Frame::Array(
                    fields
                        .into_iter()
                        .flat_map(|(f, v)| [Frame::Bulk(f), Frame::Bulk(v)])
                        .collect(),
                )
            }),
            Command::Del(key) => Ok(Frame::integer(self.db.del(&key) as i64)),
            Command::SAdd(key, members) => self
                .db
                .sadd(key, members)
                .map(|added| Frame::integer(added as i64)),
            Command::SRem(key, members) => self
                .db
                .srem(&key, &members)
                .map(|removed| Frame::integer(removed as i64)),
            Command::SMembers(key) => self
                .db
                .smembers(&key)
                .map(|members| Frame::Array(members.into_iter().map(Frame::Bulk).collect())),
            Command::DbSize => Ok(Frame::integer(self.db.total_entries() as i64)),
            Command::Info(section) => {
                let section = section.as_deref().and_then(|b| std::str::from_utf8(b).ok());
                let info = self
                    .metrics
                    .snapshot()
                    .to_info_string(section, self.db.total_entries());
                Ok(Frame::Bulk(Bytes::from(info)))
            }
        };

        result.unwrap_or_else(|e| match e {
            Error::WrongType => Frame::error(
                "WRONGTYPE Operation against a key holding the wrong kind of value",
            ),
            e => Frame::error(format!("ERR {}", e)),
        })
    }
}
