#![doc = include_str!("../README.md")]

mod common;
pub use common::*;

/// Generated protobuf messages and gRPC stubs.
pub mod proto {
    /// The single-buffer hashing backend (`hashsvc.Hasher`).
    pub mod hashsvc {
        tonic::include_proto!("hashsvc");
    }

    /// The batch fanout service (`parhash.ParallelHasher`).
    pub mod parhash {
        tonic::include_proto!("parhash");
    }

    /// Encoded descriptors for both packages, registered with gRPC reflection.
    pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("parhash_descriptor");
}
