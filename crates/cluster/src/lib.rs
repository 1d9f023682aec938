//! Shared-nothing cluster support: consistent-hash key routing, pooled peer
//! connections, and the Try/Commit/Cancel distributed-transaction
//! coordinator.

pub mod client;
mod cluster;
pub mod ids;
mod peer;
pub mod pool;
pub mod ring;
pub mod tcc;

pub use client::Client;
pub use cluster::Cluster;
pub use ring::Ring;
