//! Sublet Database Layer
//!
//! This crate provides reservation storage for the Sublet service:
//!
//! - Connection pool management and embedded migrations with sqlx
//! - `PgReservationRepository`, with compare-and-swap status updates
//! - `MemoryReservationRepository`, a process-local store for tests and demos

pub mod pool;
pub mod repositories;

pub use pool::{create_pool, run_migrations};
pub use repositories::*;

// Re-export commonly used types
pub use sqlx::PgPool;
pub use sublet_core::{AppError, AppResult};
