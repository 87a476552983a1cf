//! Generated gRPC types for the pinsync daemon.

#[allow(clippy::all)]
mod gen {
    tonic::include_proto!("pinsync.v1");
}

pub use gen::*;
