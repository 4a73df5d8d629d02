//! Repository implementations
//!
//! Concrete implementations of the `ReservationRepository` trait defined in
//! sublet-core.

pub mod memory_repo;
pub mod reservation_repo;

pub use memory_repo::MemoryReservationRepository;
pub use reservation_repo::PgReservationRepository;
