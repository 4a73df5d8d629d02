//! Authentication and authorization for Sublet
//!
//! Users sign in with the hosted auth provider, which issues HS256 bearer
//! tokens. This crate validates those tokens and exposes Actix-web request
//! extractors for the authenticated user and for moderation staff.
//!
//! # Examples
//!
//! ```no_run
//! use sublet_auth::{Claims, JwtService};
//! use sublet_core::models::UserRole;
//! use uuid::Uuid;
//!
//! let jwt_service = JwtService::new("your-secret-key", 3600, None);
//! let claims = Claims::new(Uuid::new_v4(), UserRole::Authenticated);
//! let token = jwt_service.create_token(&claims)?;
//! let decoded = jwt_service.validate_token(&token)?;
//! # Ok::<(), sublet_core::AppError>(())
//! ```

pub mod claims;
pub mod jwt;
pub mod middleware;

pub use claims::Claims;
pub use jwt::JwtService;
pub use middleware::{AdminUser, AuthenticatedUser};
