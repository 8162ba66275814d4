//! Adapters that expose the payment service to the outside world.

pub mod csv;
pub mod http;
