//! Domain models for Sublet

pub mod event;
pub mod reservation;
pub mod user;

pub use event::{EventKind, ReservationEvent};
pub use reservation::{minor_unit_exponent, NewReservation, Reservation, ReservationStatus};
pub use user::UserRole;
