//! Generated protobuf/gRPC bindings for the `chordal.v1` package.

pub mod v1 {
    tonic::include_proto!("chordal.v1");
}

/// Encoded file descriptor set, registered with the reflection service on
/// the daemon's server.
pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("descriptor");
