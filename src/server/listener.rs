use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::engine::ShardedDb;
use crate::error::Error;
use crate::metrics::Metrics;
use crate::server::{Connection, Handler};

/// TCP listener of the state store: accepts RESP clients and spawns a
/// handler per connection.
pub struct Listener {
    listener: TcpListener,
    db: Arc<ShardedDb>,
    metrics: Arc<Metrics>,
    connection_limit: Arc<Semaphore>,
}

impl Listener {
    /// Create a new Listener bound to the configured address.
    pub async fn bind(
        config: &Config,
        db: Arc<ShardedDb>,
        metrics: Arc<Metrics>,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(config.bind).await?;
        info!("State store listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            db,
            metrics,
            connection_limit: Arc::new(Semaphore::new(config.max_connections.max(1))),
        })
    }

    /// Address actually bound, useful when binding port 0.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept store clients until the process exits.
    ///
    /// At most `max_connections` clients are served at once; further
    /// clients wait in the kernel backlog.
    pub async fn run(&self) -> std::io::Result<()> {
        loop {
            let Ok(permit) = self.connection_limit.clone().acquire_owned().await else {
                return Ok(());
            };

            let (socket, addr) = match self.listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    error!("Failed to accept store connection: {}", e);
                    continue;
                }
            };

            let mut handler = Handler::new(
                Connection::new(socket),
                self.db.clone(),
                self.metrics.clone(),
            );
            let metrics = self.metrics.clone();

            tokio::spawn(async move {
                let _permit = permit;
                metrics.connection_opened();
                debug!("Store client connected: {}", addr);

                match handler.run().await {
                    Ok(()) | Err(Error::ConnectionClosed) => {
                        debug!("Store client disconnected: {}", addr)
                    }
                    Err(e) => warn!("Store client {} dropped: {}", addr, e),
                }

                metrics.connection_closed();
            });
        }
    }
}
