//! Adapters implementing the domain ports.

pub mod in_memory;
pub mod node_rpc;
pub mod price;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
pub mod token;
