//! Domain types and the ports the engine depends on.

pub mod events;
pub mod keyspace;
pub mod payment;
pub mod ports;
pub mod transfer;
