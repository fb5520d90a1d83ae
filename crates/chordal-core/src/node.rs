//! The node façade: construction and join, the find-successor /
//! find-predecessor walk, the stabilize and fix-fingers maintenance tasks,
//! key transfer, and graceful departure.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tracing::{debug, info, warn};

use chordal_proto::v1::chord_server::ChordServer;
use chordal_proto::v1::client_api_server::ClientApiServer;
use chordal_types::{ChordError, Config, Peer};

use crate::finger::FingerTable;
use crate::id;
use crate::pool::ClientPool;
use crate::rpc::{ChordService, ClientApiService};
use crate::store::KvStore;

/// State shared between the façade, the RPC services, and the maintenance
/// tasks. Each mutable resource sits behind its own lock; compound
/// operations acquire locks in declaration order (predecessor, successor,
/// fingers, store, clients) and never hold more than they need.
pub(crate) struct NodeShared {
    pub(crate) cfg: Config,
    pub(crate) local: Peer,
    pub(crate) predecessor: RwLock<Option<Peer>>,
    pub(crate) successor: RwLock<Option<Peer>>,
    pub(crate) fingers: RwLock<FingerTable>,
    pub(crate) store: KvStore,
    pub(crate) clients: ClientPool,
    pub(crate) shutdown_tx: broadcast::Sender<()>,
}

impl NodeShared {
    pub(crate) async fn predecessor_peer(&self) -> Option<Peer> {
        self.predecessor.read().await.clone()
    }

    pub(crate) async fn successor_peer(&self) -> Option<Peer> {
        self.successor.read().await.clone()
    }

    pub(crate) async fn closest_preceding_finger(&self, target: &[u8]) -> Peer {
        self.fingers.read().await.closest_preceding(target)
    }

    /// Resolve the node responsible for `target`: the successor of
    /// `target`'s predecessor. An empty successor reply collapses to this
    /// node, the only-one-in-ring case.
    pub(crate) async fn find_successor(&self, target: &[u8]) -> Result<Peer, ChordError> {
        let pred = self.find_predecessor(target).await?;
        match self.get_successor_rpc(&pred).await? {
            Some(succ) => Ok(succ),
            None => Ok(self.local.clone()),
        }
    }

    /// Walk the ring toward `target` until reaching the node whose arc
    /// `(n, n.successor]` covers it. Fingers accelerate the walk; the
    /// successor chain guarantees progress when they cannot.
    pub(crate) async fn find_predecessor(&self, target: &[u8]) -> Result<Peer, ChordError> {
        let mut pred = self.local.clone();
        let Some(succ) = self.successor_peer().await else {
            return Ok(pred);
        };
        if id::between_right_incl(target, &pred.id, &succ.id) {
            return Ok(pred);
        }

        pred = self.closest_preceding_finger(target).await;
        let mut succ = match self.get_successor_rpc(&pred).await {
            Ok(Some(s)) => s,
            _ => return Ok(pred),
        };

        while !id::between_right_incl(target, &pred.id, &succ.id) {
            let next = match self.closest_preceding_finger_rpc(&pred, target).await? {
                Some(next) => next,
                None => return Ok(self.local.clone()),
            };
            if next.id == pred.id {
                // The peer had no better finger than itself; step to its
                // successor so the walk still advances.
                pred = succ.clone();
            } else {
                pred = next;
            }
            succ = match self.get_successor_rpc(&pred).await? {
                Some(s) => s,
                None => return Ok(self.local.clone()),
            };
        }

        Ok(pred)
    }

    /// One stabilize round: learn the successor's predecessor, adopt it if
    /// it sits between us, then notify the successor of our claim. Failures
    /// are logged and retried on the next tick.
    pub(crate) async fn stabilize(&self) {
        let Some(mut succ) = self.successor_peer().await else {
            return;
        };

        let succ_pred = match self.get_predecessor_rpc(&succ).await {
            Ok(pred) => pred,
            Err(e) => {
                debug!(successor = %succ, error = %e, "stabilize: successor unreachable");
                return;
            }
        };

        if let Some(x) = succ_pred {
            if id::between(&x.id, &self.local.id, &succ.id) {
                *self.successor.write().await = Some(x.clone());
                succ = x;
            }
        }

        if let Err(e) = self.notify_rpc(&succ, &self.local).await {
            debug!(successor = %succ, error = %e, "stabilize: notify not accepted");
        }
    }

    /// Inbound claim from a peer that believes it is our predecessor.
    /// Accepting the claim may hand the newly-covered arc of keys over to
    /// the claimant; that transfer runs while the predecessor lock is held
    /// so no second notify can interleave with it.
    pub(crate) async fn notify(&self, claimant: Peer) -> Result<(), ChordError> {
        let mut pred = self.predecessor.write().await;

        let accepted = match pred.as_ref() {
            None => true,
            Some(p) => id::between(&claimant.id, &p.id, &self.local.id),
        };
        if !accepted {
            // A repeated claim from the current predecessor is fine;
            // anything else is declined.
            return match pred.as_ref() {
                Some(p) if p.id == claimant.id => Ok(()),
                _ => Err(ChordError::NotPredecessor),
            };
        }

        let prev_id = pred
            .as_ref()
            .map(|p| p.id.clone())
            .unwrap_or_else(|| id::zero_id(self.cfg.id_length));
        *pred = Some(claimant.clone());

        if id::between(&claimant.id, &prev_id, &self.local.id) {
            if let Err(e) = self.transfer_keys(&prev_id, &claimant).await {
                warn!(to = %claimant, error = %e, "key handoff to new predecessor failed");
            }
        }

        Ok(())
    }

    /// Move every local key whose hash falls in `(from_id, to.id]` to `to`.
    /// The store stays exclusively locked for the whole scan, so puts block
    /// until the transfer finishes. Each key is deleted as soon as its
    /// remote put succeeds; a failure aborts with the remaining keys still
    /// local.
    pub(crate) async fn transfer_keys(&self, from_id: &[u8], to: &Peer) -> Result<(), ChordError> {
        if to.id == self.local.id {
            return Ok(());
        }

        let mut map = self.store.transfer_guard().await;
        let moving: Vec<(String, Vec<u8>)> = map
            .iter()
            .filter(|(key, _)| {
                let hash = id::hash_key(key, self.cfg.id_length);
                id::between_right_incl(&hash, from_id, &to.id)
            })
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        if !moving.is_empty() {
            debug!(count = moving.len(), to = %to, "transferring keys");
        }
        for (key, value) in moving {
            self.put_key_val_rpc(to, &key, value).await?;
            map.remove(&key);
        }
        Ok(())
    }

    /// Ask our successor for the keys we now own: the arc from its previous
    /// predecessor (no lower bound when absent) up to our own id.
    pub(crate) async fn obtain_new_keys(&self) -> Result<(), ChordError> {
        let Some(succ) = self.successor_peer().await else {
            return Ok(());
        };
        let from_id = self
            .get_predecessor_rpc(&succ)
            .await?
            .map(|p| p.id)
            .unwrap_or_else(|| id::zero_id(self.cfg.id_length));
        self.transfer_keys_rpc(&succ, &from_id, &self.local).await
    }

    /// Refresh finger `next`, returning the index to fix on the following
    /// tick. A failed lookup leaves the entry alone and retries the same
    /// index.
    pub(crate) async fn fix_next_finger(&self, next: usize) -> usize {
        let start = id::finger_start(&self.local.id, next as u32, self.cfg.key_size);
        match self.find_successor(&start).await {
            Ok(peer) => {
                let mut fingers = self.fingers.write().await;
                fingers.replace(next, peer);
                (next + 1) % fingers.len()
            }
            Err(e) => {
                debug!(index = next, error = %e, "fix-fingers: lookup failed");
                next
            }
        }
    }

    pub(crate) async fn locate(&self, key: &str) -> Result<Peer, ChordError> {
        let hash = id::hash_key(key, self.cfg.id_length);
        self.find_successor(&hash).await
    }

    /// Route a read to the key's owner. One failure is retried once after
    /// `retry_interval` with a fresh locate, covering the window in which
    /// the key is mid-transfer between owners.
    pub(crate) async fn get(&self, key: &str) -> Result<Vec<u8>, ChordError> {
        let owner = self.locate(key).await?;
        match self.get_key_rpc(&owner, key).await {
            Ok(value) => Ok(value),
            Err(first) => {
                debug!(key, owner = %owner, error = %first, "get failed, retrying once");
                time::sleep(self.cfg.retry_interval).await;
                let owner = self.locate(key).await?;
                self.get_key_rpc(&owner, key).await
            }
        }
    }

    /// Route a write to the key's owner. Never retried: put is not
    /// idempotent under first-writer-wins.
    pub(crate) async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), ChordError> {
        let owner = self.locate(key).await?;
        self.put_key_val_rpc(&owner, key, value).await
    }

    /// Detach from the ring: hand our keys to the successor and splice our
    /// neighbors together. Every step is best-effort; a peer we cannot
    /// reach will heal through its own stabilize rounds.
    pub(crate) async fn leave_ring(&self) {
        let pred = self.predecessor.read().await.clone();
        let succ = self.successor.read().await.clone();
        let (Some(pred), Some(succ)) = (pred, succ) else {
            return;
        };
        if succ.addr == self.local.addr {
            return;
        }

        if let Err(e) = self.transfer_keys(&pred.id, &succ).await {
            warn!(successor = %succ, error = %e, "leave: key handoff failed");
        }
        if let Err(e) = self.set_predecessor_rpc(&succ, &pred).await {
            warn!(successor = %succ, error = %e, "leave: could not update successor's predecessor");
        }
        if let Err(e) = self.set_successor_rpc(&pred, &succ).await {
            warn!(predecessor = %pred, error = %e, "leave: could not update predecessor's successor");
        }
    }
}

/// A running Chord node: RPC server, maintenance tasks, datastore shard.
///
/// Dropping a `Node` without calling [`Node::shutdown`] abandons the ring
/// without handing keys over; peers will route around the hole but the
/// node's keys are lost.
pub struct Node {
    shared: Arc<NodeShared>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Configures and starts a [`Node`].
pub struct NodeBuilder {
    addr: String,
    id: Option<Vec<u8>>,
    config: Config,
    parent: Option<Peer>,
}

impl NodeBuilder {
    /// Use a fixed identifier instead of hashing the listen address. Must be
    /// exactly `id_length` bytes.
    pub fn id(mut self, id: Vec<u8>) -> Self {
        self.id = Some(id);
        self
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Bootstrap through an existing ring member. Without a parent the node
    /// forms a one-node ring.
    pub fn parent(mut self, parent: Peer) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Bind the listener, start serving, join the ring, and spawn the
    /// maintenance tasks.
    pub async fn start(self) -> Result<Node, ChordError> {
        self.config.validate()?;

        let listener = TcpListener::bind(&self.addr)
            .await
            .map_err(|e| ChordError::Transport(format!("bind {}: {e}", self.addr)))?;
        let addr = listener
            .local_addr()
            .map_err(|e| ChordError::Transport(e.to_string()))?
            .to_string();

        let node_id = match self.id {
            Some(id) => {
                if id.len() != self.config.id_length {
                    return Err(ChordError::BadIdLen {
                        expected: self.config.id_length,
                        actual: id.len(),
                    });
                }
                id
            }
            // The default identity is the hash of the address actually
            // bound, so `:0` listeners work.
            None => id::hash_key(&addr, self.config.id_length),
        };
        let local = Peer::new(node_id, addr);
        info!(node = %local, "starting chord node");

        let (shutdown_tx, _) = broadcast::channel(1);
        let shared = Arc::new(NodeShared {
            local: local.clone(),
            predecessor: RwLock::new(None),
            successor: RwLock::new(None),
            fingers: RwLock::new(FingerTable::new(local.clone(), self.config.key_size)),
            store: KvStore::new(),
            clients: ClientPool::new(self.config.connection_timeout),
            shutdown_tx: shutdown_tx.clone(),
            cfg: self.config,
        });

        let reflection = tonic_reflection::server::Builder::configure()
            .register_encoded_file_descriptor_set(chordal_proto::FILE_DESCRIPTOR_SET)
            .build_v1()
            .expect("failed to build reflection service");
        let server = Server::builder()
            .add_service(ChordServer::new(ChordService::new(shared.clone())))
            .add_service(ClientApiServer::new(ClientApiService::new(shared.clone())))
            .add_service(reflection);

        let mut server_shutdown = shutdown_tx.subscribe();
        let incoming = TcpListenerStream::new(listener);
        let server_task = tokio::spawn(async move {
            let served = server
                .serve_with_incoming_shutdown(incoming, async move {
                    let _ = server_shutdown.recv().await;
                })
                .await;
            if let Err(e) = served {
                warn!(error = %e, "rpc server terminated abnormally");
            }
        });

        // Join before the maintenance loops start so they heal state that
        // already points somewhere sensible.
        if let Err(e) = join(&shared, self.parent).await {
            let _ = shutdown_tx.send(());
            let _ = server_task.await;
            shared.clients.shutdown().await;
            return Err(e);
        }

        let tasks = vec![
            server_task,
            spawn_stabilize(shared.clone()),
            spawn_fix_fingers(shared.clone()),
        ];

        // Let the first stabilize round land before handing the node out.
        time::sleep(shared.cfg.stabilize_interval).await;

        Ok(Node { shared, tasks: Mutex::new(tasks) })
    }
}

async fn join(shared: &Arc<NodeShared>, parent: Option<Peer>) -> Result<(), ChordError> {
    let Some(parent) = parent else {
        *shared.successor.write().await = Some(shared.local.clone());
        return Ok(());
    };

    let succ = shared.find_successor_rpc(&parent, &shared.local.id).await?;
    if succ.id == shared.local.id {
        return Err(ChordError::IdCollision);
    }
    info!(node = %shared.local, successor = %succ, "joining ring");
    *shared.successor.write().await = Some(succ);
    shared.obtain_new_keys().await
}

fn spawn_stabilize(shared: Arc<NodeShared>) -> JoinHandle<()> {
    let mut shutdown = shared.shutdown_tx.subscribe();
    tokio::spawn(async move {
        let period = shared.cfg.stabilize_interval;
        let mut ticker = time::interval_at(time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => shared.stabilize().await,
                _ = shutdown.recv() => break,
            }
        }
    })
}

fn spawn_fix_fingers(shared: Arc<NodeShared>) -> JoinHandle<()> {
    let mut shutdown = shared.shutdown_tx.subscribe();
    tokio::spawn(async move {
        let period = shared.cfg.fix_finger_interval;
        let mut ticker = time::interval_at(time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut next = 0;
        loop {
            tokio::select! {
                _ = ticker.tick() => next = shared.fix_next_finger(next).await,
                _ = shutdown.recv() => break,
            }
        }
    })
}

impl Node {
    pub fn builder(addr: impl Into<String>) -> NodeBuilder {
        NodeBuilder {
            addr: addr.into(),
            id: None,
            config: Config::default(),
            parent: None,
        }
    }

    pub fn id(&self) -> &[u8] {
        &self.shared.local.id
    }

    /// The address the node actually listens on.
    pub fn addr(&self) -> &str {
        &self.shared.local.addr
    }

    pub fn peer(&self) -> Peer {
        self.shared.local.clone()
    }

    pub async fn successor(&self) -> Option<Peer> {
        self.shared.successor_peer().await
    }

    pub async fn predecessor(&self) -> Option<Peer> {
        self.shared.predecessor_peer().await
    }

    /// Resolve the node responsible for an identifier.
    pub async fn find_successor(&self, target: &[u8]) -> Result<Peer, ChordError> {
        self.shared.find_successor(target).await
    }

    /// Resolve the node responsible for a key.
    pub async fn locate(&self, key: &str) -> Result<Peer, ChordError> {
        self.shared.locate(key).await
    }

    /// Fetch a key from wherever it lives in the ring.
    pub async fn get(&self, key: &str) -> Result<Vec<u8>, ChordError> {
        self.shared.get(key).await
    }

    /// Store a key on its owner. Fails with `KeyExists` if the key has ever
    /// been written.
    pub async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), ChordError> {
        self.shared.put(key, value).await
    }

    /// Read straight from this node's own shard, without routing.
    pub async fn local_get(&self, key: &str) -> Result<Vec<u8>, ChordError> {
        self.shared.store.get(key).await
    }

    /// Number of keys currently stored on this node's own shard.
    pub async fn local_key_count(&self) -> usize {
        self.shared.store.len().await
    }

    /// One-line summary of the node's ring position, for logs.
    pub async fn describe(&self) -> String {
        let id_of = |p: &Option<Peer>| {
            p.as_ref()
                .map(|p| id::id_to_string(&p.id))
                .unwrap_or_else(|| "-".to_string())
        };
        let pred = self.shared.predecessor_peer().await;
        let succ = self.shared.successor_peer().await;
        format!(
            "node-{} @ {} {{succ: {}, pred: {}}}",
            id::id_to_string(&self.shared.local.id),
            self.shared.local.addr,
            id_of(&succ),
            id_of(&pred),
        )
    }

    /// Graceful departure: stop the maintenance tasks and the RPC server,
    /// hand keys and ring pointers to the neighbors, then drop every cached
    /// client connection. Safe to call more than once.
    pub async fn shutdown(&self) {
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        if tasks.is_empty() {
            return;
        }
        info!(node = %self.shared.local, "shutting down");
        let _ = self.shared.shutdown_tx.send(());
        for task in tasks {
            let _ = task.await;
        }
        self.shared.leave_ring().await;
        self.shared.clients.shutdown().await;
    }
}
