//! Business logic services for Sublet
//!
//! `ReservationLifecycle` orchestrates every reservation operation:
//! authorization of the caller against the reservation, planning with the
//! pure lifecycle rules, the refund through the payment gateway and the
//! conditional commit.
//!
//! # Architecture
//!
//! - The service owns its collaborators behind `Arc`, so one instance is
//!   shared by all HTTP workers
//! - Storage and payments are trait objects in production and concrete test
//!   doubles in tests
//! - All operations are instrumented with tracing

pub mod lifecycle;

pub use lifecycle::{Caller, RefundQuote, ReservationLifecycle, TransitionOutcome};

/// Business logic constants
pub mod constants {
    /// Longest accepted cancellation/rejection reason, in characters
    pub const MAX_REASON_LENGTH: usize = 2000;
}
