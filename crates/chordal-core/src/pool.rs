//! Per-node cache of gRPC clients, keyed by peer address. Connections are
//! dialed lazily, reused for every call to the same address, and all closed
//! together when the node shuts down.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::RwLock;
use tonic::transport::{Channel, Endpoint};

use chordal_proto::v1::chord_client::ChordClient;
use chordal_types::ChordError;

struct PoolInner {
    conns: HashMap<String, ChordClient<Channel>>,
    disposed: bool,
}

pub(crate) struct ClientPool {
    connect_timeout: Duration,
    inner: RwLock<PoolInner>,
}

impl ClientPool {
    pub fn new(connect_timeout: Duration) -> Self {
        ClientPool {
            connect_timeout,
            inner: RwLock::new(PoolInner { conns: HashMap::new(), disposed: false }),
        }
    }

    /// Fetch the cached client for `addr`, dialing if absent. Reuse is keyed
    /// strictly by address; liveness is whatever the transport reports on
    /// the next call.
    pub async fn get(&self, addr: &str) -> Result<ChordClient<Channel>, ChordError> {
        {
            let pool = self.inner.read().await;
            if pool.disposed {
                return Err(ChordError::NodeShutdown);
            }
            if let Some(client) = pool.conns.get(addr) {
                return Ok(client.clone());
            }
        }

        // Dial outside any lock; losing the insert race below just means we
        // adopt the winner's connection and drop this one.
        let endpoint = Endpoint::from_shared(format!("http://{addr}"))
            .map_err(|e| ChordError::Transport(e.to_string()))?
            .connect_timeout(self.connect_timeout)
            .timeout(self.connect_timeout);
        let channel = endpoint
            .connect()
            .await
            .map_err(|e| ChordError::Transport(e.to_string()))?;
        let client = ChordClient::new(channel);

        let mut pool = self.inner.write().await;
        if pool.disposed {
            return Err(ChordError::NodeShutdown);
        }
        if let Some(existing) = pool.conns.get(addr) {
            return Ok(existing.clone());
        }
        pool.conns.insert(addr.to_string(), client.clone());
        Ok(client)
    }

    /// Drop every cached connection and poison the pool; later `get` calls
    /// fail with `NodeShutdown`.
    pub async fn shutdown(&self) {
        let mut pool = self.inner.write().await;
        pool.disposed = true;
        pool.conns.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_after_shutdown_is_rejected() {
        let pool = ClientPool::new(Duration::from_millis(100));
        pool.shutdown().await;
        assert!(matches!(
            pool.get("127.0.0.1:1").await,
            Err(ChordError::NodeShutdown)
        ));
    }

    #[tokio::test]
    async fn dial_failure_surfaces_as_transport_error() {
        let pool = ClientPool::new(Duration::from_millis(100));
        // TEST-NET-1 address: nothing listens there.
        match pool.get("192.0.2.1:1").await {
            Err(ChordError::Transport(_)) => {}
            other => panic!("expected transport error, got {other:?}"),
        }
    }
}
