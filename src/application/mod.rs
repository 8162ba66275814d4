//! Application layer orchestrating the payment lifecycle.
//!
//! [`service::PaymentService`] is the entry point used by every interface.
//! It drives one polling task per open payment through
//! [`scheduler::CheckScheduler`] and fans confirmations out through
//! [`event_bus::EventBus`].

pub mod event_bus;
pub mod scheduler;
pub mod service;
