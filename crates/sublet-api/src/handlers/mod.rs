//! HTTP request handlers

pub mod admin;
pub mod health;
pub mod reservation;

pub use admin::configure as configure_admin;
pub use health::configure as configure_health;
pub use reservation::configure as configure_reservations;
