//! The RPC surface: outbound per-method wrappers over the client pool, and
//! the inbound `Chord` / `ClientApi` service implementations.
//!
//! Every outbound wrapper short-circuits to the in-process implementation
//! when the target address is our own, so a node never dials itself.

use std::sync::Arc;

use tonic::{Request, Response, Status};
use tracing::debug;

use chordal_proto::v1 as pb;
use chordal_proto::v1::chord_server::Chord;
use chordal_proto::v1::client_api_server::ClientApi;
use chordal_types::{ChordError, Peer};

use crate::convert::{
    err_from_status, opt_peer_to_proto, peer_from_proto, peer_to_proto, status_from_err,
};
use crate::node::NodeShared;

// ---------------------------------------------------------------------------
// Outbound wrappers
// ---------------------------------------------------------------------------

impl NodeShared {
    pub(crate) async fn get_predecessor_rpc(
        &self,
        peer: &Peer,
    ) -> Result<Option<Peer>, ChordError> {
        if peer.addr == self.local.addr {
            return Ok(self.predecessor_peer().await);
        }
        let mut client = self.clients.get(&peer.addr).await?;
        let reply = client
            .get_predecessor(pb::Empty {})
            .await
            .map_err(err_from_status)?;
        Ok(peer_from_proto(reply.into_inner()))
    }

    pub(crate) async fn get_successor_rpc(&self, peer: &Peer) -> Result<Option<Peer>, ChordError> {
        if peer.addr == self.local.addr {
            return Ok(self.successor_peer().await);
        }
        let mut client = self.clients.get(&peer.addr).await?;
        let reply = client
            .get_successor(pb::Empty {})
            .await
            .map_err(err_from_status)?;
        Ok(peer_from_proto(reply.into_inner()))
    }

    pub(crate) async fn set_predecessor_rpc(
        &self,
        peer: &Peer,
        pred: &Peer,
    ) -> Result<(), ChordError> {
        if peer.addr == self.local.addr {
            *self.predecessor.write().await = Some(pred.clone());
            return Ok(());
        }
        let mut client = self.clients.get(&peer.addr).await?;
        client
            .set_predecessor(peer_to_proto(pred))
            .await
            .map_err(err_from_status)?;
        Ok(())
    }

    pub(crate) async fn set_successor_rpc(
        &self,
        peer: &Peer,
        succ: &Peer,
    ) -> Result<(), ChordError> {
        if peer.addr == self.local.addr {
            *self.successor.write().await = Some(succ.clone());
            return Ok(());
        }
        let mut client = self.clients.get(&peer.addr).await?;
        client
            .set_successor(peer_to_proto(succ))
            .await
            .map_err(err_from_status)?;
        Ok(())
    }

    pub(crate) async fn notify_rpc(&self, peer: &Peer, claimant: &Peer) -> Result<(), ChordError> {
        if peer.addr == self.local.addr {
            return self.notify(claimant.clone()).await;
        }
        let mut client = self.clients.get(&peer.addr).await?;
        client
            .notify(peer_to_proto(claimant))
            .await
            .map_err(err_from_status)?;
        Ok(())
    }

    pub(crate) async fn closest_preceding_finger_rpc(
        &self,
        peer: &Peer,
        target: &[u8],
    ) -> Result<Option<Peer>, ChordError> {
        if peer.addr == self.local.addr {
            return Ok(Some(self.closest_preceding_finger(target).await));
        }
        let mut client = self.clients.get(&peer.addr).await?;
        let reply = client
            .closest_preceding_finger(pb::Id { id: target.to_vec() })
            .await
            .map_err(err_from_status)?;
        Ok(peer_from_proto(reply.into_inner()))
    }

    pub(crate) async fn find_successor_rpc(
        &self,
        peer: &Peer,
        target: &[u8],
    ) -> Result<Peer, ChordError> {
        if peer.addr == self.local.addr {
            return self.find_successor(target).await;
        }
        let mut client = self.clients.get(&peer.addr).await?;
        let reply = client
            .find_successor(pb::Id { id: target.to_vec() })
            .await
            .map_err(err_from_status)?;
        peer_from_proto(reply.into_inner())
            .ok_or_else(|| ChordError::Transport("peer returned an empty successor".to_string()))
    }

    pub(crate) async fn get_key_rpc(&self, peer: &Peer, key: &str) -> Result<Vec<u8>, ChordError> {
        if peer.addr == self.local.addr {
            return self.store.get(key).await;
        }
        let mut client = self.clients.get(&peer.addr).await?;
        let reply = client
            .get_key(pb::Key { key: key.to_string() })
            .await
            .map_err(err_from_status)?;
        Ok(reply.into_inner().value)
    }

    pub(crate) async fn put_key_val_rpc(
        &self,
        peer: &Peer,
        key: &str,
        value: Vec<u8>,
    ) -> Result<(), ChordError> {
        if peer.addr == self.local.addr {
            return self.store.put(key, value).await;
        }
        let mut client = self.clients.get(&peer.addr).await?;
        client
            .put_key_val(pb::KeyValue { key: key.to_string(), value })
            .await
            .map_err(err_from_status)?;
        Ok(())
    }

    pub(crate) async fn transfer_keys_rpc(
        &self,
        peer: &Peer,
        from_id: &[u8],
        to: &Peer,
    ) -> Result<(), ChordError> {
        if peer.addr == self.local.addr {
            return self.transfer_keys(from_id, to).await;
        }
        let mut client = self.clients.get(&peer.addr).await?;
        client
            .transfer_keys(pb::TransferKeysRequest {
                from_id: from_id.to_vec(),
                to: Some(peer_to_proto(to)),
            })
            .await
            .map_err(err_from_status)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Inbound: peer-facing Chord service
// ---------------------------------------------------------------------------

pub(crate) struct ChordService {
    shared: Arc<NodeShared>,
}

impl ChordService {
    pub(crate) fn new(shared: Arc<NodeShared>) -> Self {
        ChordService { shared }
    }
}

#[tonic::async_trait]
impl Chord for ChordService {
    async fn get_predecessor(
        &self,
        _request: Request<pb::Empty>,
    ) -> Result<Response<pb::Peer>, Status> {
        let pred = self.shared.predecessor_peer().await;
        Ok(Response::new(opt_peer_to_proto(pred.as_ref())))
    }

    async fn get_successor(
        &self,
        _request: Request<pb::Empty>,
    ) -> Result<Response<pb::Peer>, Status> {
        let succ = self.shared.successor_peer().await;
        Ok(Response::new(opt_peer_to_proto(succ.as_ref())))
    }

    async fn set_predecessor(
        &self,
        request: Request<pb::Peer>,
    ) -> Result<Response<pb::Empty>, Status> {
        *self.shared.predecessor.write().await = peer_from_proto(request.into_inner());
        Ok(Response::new(pb::Empty {}))
    }

    async fn set_successor(
        &self,
        request: Request<pb::Peer>,
    ) -> Result<Response<pb::Empty>, Status> {
        *self.shared.successor.write().await = peer_from_proto(request.into_inner());
        Ok(Response::new(pb::Empty {}))
    }

    async fn notify(&self, request: Request<pb::Peer>) -> Result<Response<pb::Empty>, Status> {
        let claimant = peer_from_proto(request.into_inner())
            .ok_or_else(|| Status::invalid_argument("notify requires a peer"))?;
        self.shared.notify(claimant).await.map_err(status_from_err)?;
        Ok(Response::new(pb::Empty {}))
    }

    async fn closest_preceding_finger(
        &self,
        request: Request<pb::Id>,
    ) -> Result<Response<pb::Peer>, Status> {
        let target = request.into_inner().id;
        let peer = self.shared.closest_preceding_finger(&target).await;
        Ok(Response::new(peer_to_proto(&peer)))
    }

    async fn find_successor(
        &self,
        request: Request<pb::Id>,
    ) -> Result<Response<pb::Peer>, Status> {
        let target = request.into_inner().id;
        let succ = self
            .shared
            .find_successor(&target)
            .await
            .map_err(status_from_err)?;
        Ok(Response::new(peer_to_proto(&succ)))
    }

    async fn get_key(&self, request: Request<pb::Key>) -> Result<Response<pb::Value>, Status> {
        let key = request.into_inner().key;
        let value = self.shared.store.get(&key).await.map_err(status_from_err)?;
        Ok(Response::new(pb::Value { value }))
    }

    async fn put_key_val(
        &self,
        request: Request<pb::KeyValue>,
    ) -> Result<Response<pb::Empty>, Status> {
        let kv = request.into_inner();
        self.shared
            .store
            .put(&kv.key, kv.value)
            .await
            .map_err(status_from_err)?;
        Ok(Response::new(pb::Empty {}))
    }

    async fn transfer_keys(
        &self,
        request: Request<pb::TransferKeysRequest>,
    ) -> Result<Response<pb::Empty>, Status> {
        let req = request.into_inner();
        let to = req
            .to
            .and_then(peer_from_proto)
            .ok_or_else(|| Status::invalid_argument("transfer requires a destination peer"))?;
        self.shared
            .transfer_keys(&req.from_id, &to)
            .await
            .map_err(status_from_err)?;
        Ok(Response::new(pb::Empty {}))
    }
}

// ---------------------------------------------------------------------------
// Inbound: client-facing API
// ---------------------------------------------------------------------------

pub(crate) struct ClientApiService {
    shared: Arc<NodeShared>,
}

impl ClientApiService {
    pub(crate) fn new(shared: Arc<NodeShared>) -> Self {
        ClientApiService { shared }
    }
}

#[tonic::async_trait]
impl ClientApi for ClientApiService {
    async fn locate(
        &self,
        request: Request<pb::LocateRequest>,
    ) -> Result<Response<pb::LocateResponse>, Status> {
        let key = request.into_inner().key;
        debug!(key = %key, "client locate");
        let peer = self
            .shared
            .locate(&key)
            .await
            .map_err(|e| Status::internal(format!("could not locate key: {e}")))?;
        Ok(Response::new(pb::LocateResponse {
            peer: Some(peer_to_proto(&peer)),
        }))
    }

    async fn get(
        &self,
        request: Request<pb::GetRequest>,
    ) -> Result<Response<pb::GetResponse>, Status> {
        let key = request.into_inner().key;
        debug!(key = %key, "client get");
        let value = self
            .shared
            .get(&key)
            .await
            .map_err(|e| Status::internal(format!("could not get key: {e}")))?;
        Ok(Response::new(pb::GetResponse { value }))
    }

    async fn put(
        &self,
        request: Request<pb::PutRequest>,
    ) -> Result<Response<pb::PutResponse>, Status> {
        let req = request.into_inner();
        debug!(key = %req.key, "client put");
        self.shared
            .put(&req.key, req.value)
            .await
            .map_err(|e| Status::internal(format!("could not put key value pair: {e}")))?;
        Ok(Response::new(pb::PutResponse {}))
    }

    async fn get_id(
        &self,
        _request: Request<pb::GetIdRequest>,
    ) -> Result<Response<pb::GetIdResponse>, Status> {
        Ok(Response::new(pb::GetIdResponse {
            id: self.shared.local.id.clone(),
        }))
    }
}
