//! Data Transfer Objects (DTOs) for API requests and responses

pub mod common;
pub mod reservation;

pub use common::*;
pub use reservation::*;
