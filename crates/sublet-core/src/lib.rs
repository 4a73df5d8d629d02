//! Sublet Core Library
//!
//! This crate provides the foundational types, traits, and error handling
//! for the Sublet reservation service. It includes:
//!
//! - Domain models (Reservation, ReservationEvent, UserRole)
//! - The refund-tier policy and the pure lifecycle planner
//! - Repository, payment gateway and clock traits
//! - Unified error handling with HTTP response mapping
//! - Application configuration

pub mod clock;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod models;
pub mod refund;
pub mod traits;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::AppConfig;
pub use error::AppError;
pub use lifecycle::{Action, TransitionPlan};
pub use refund::{RefundPolicy, RefundTier};

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;
