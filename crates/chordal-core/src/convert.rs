//! Conversions between wire messages and domain types, and between the
//! error taxonomy and gRPC statuses.

use tonic::{Code, Status};

use chordal_proto::v1 as pb;
use chordal_types::{ChordError, Peer};

/// The wire sentinel for "absent" is a peer with no id bytes and an empty
/// address; decode it into an optional immediately on receipt.
pub(crate) fn peer_from_proto(peer: pb::Peer) -> Option<Peer> {
    if peer.id.is_empty() && peer.addr.is_empty() {
        return None;
    }
    Some(Peer { id: peer.id, addr: peer.addr })
}

pub(crate) fn peer_to_proto(peer: &Peer) -> pb::Peer {
    pb::Peer { id: peer.id.clone(), addr: peer.addr.clone() }
}

pub(crate) fn opt_peer_to_proto(peer: Option<&Peer>) -> pb::Peer {
    match peer {
        Some(p) => peer_to_proto(p),
        None => pb::Peer::default(),
    }
}

pub(crate) fn status_from_err(err: ChordError) -> Status {
    match &err {
        ChordError::KeyNotFound => Status::not_found(err.to_string()),
        ChordError::KeyExists => Status::already_exists(err.to_string()),
        ChordError::NotPredecessor => Status::failed_precondition(err.to_string()),
        ChordError::NodeShutdown | ChordError::Transport(_) => {
            Status::unavailable(err.to_string())
        }
        ChordError::BadKeyLen(_)
        | ChordError::BadIdLen { .. }
        | ChordError::BadId(_) => Status::invalid_argument(err.to_string()),
        ChordError::IdCollision => Status::already_exists(err.to_string()),
    }
}

pub(crate) fn err_from_status(status: Status) -> ChordError {
    match status.code() {
        Code::NotFound => ChordError::KeyNotFound,
        Code::AlreadyExists => ChordError::KeyExists,
        Code::FailedPrecondition => ChordError::NotPredecessor,
        _ => ChordError::Transport(status.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_peer_decodes_to_none() {
        assert_eq!(peer_from_proto(pb::Peer::default()), None);
        assert_eq!(
            peer_from_proto(pb::Peer { id: vec![1], addr: "a:1".into() }),
            Some(Peer::new(vec![1], "a:1"))
        );
    }

    #[test]
    fn absent_round_trips_through_the_sentinel() {
        assert_eq!(peer_from_proto(opt_peer_to_proto(None)), None);
        let p = Peer::new(vec![7], "h:1");
        assert_eq!(peer_from_proto(opt_peer_to_proto(Some(&p))), Some(p));
    }

    #[test]
    fn datastore_errors_round_trip_through_status() {
        for (err, code) in [
            (ChordError::KeyNotFound, Code::NotFound),
            (ChordError::KeyExists, Code::AlreadyExists),
            (ChordError::NotPredecessor, Code::FailedPrecondition),
        ] {
            let status = status_from_err(err);
            assert_eq!(status.code(), code);
            let back = err_from_status(status);
            assert_eq!(status_from_err(back).code(), code);
        }
    }
}
