//! JWT Claims structure
//!
//! Claims issued by the auth provider. `sub` is the user's UUID.

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use sublet_core::error::AppError;
use sublet_core::models::UserRole;
use uuid::Uuid;

/// JWT Claims
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Claims {
    /// Subject (user id)
    pub sub: String,

    /// User role; tokens without one are plain signed-in users
    #[serde(default)]
    pub role: UserRole,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Audience
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,

    /// Issued at (Unix timestamp)
    pub iat: i64,

    /// Expiration time (Unix timestamp)
    pub exp: i64,
}

impl Claims {
    /// Create new claims for `user_id`; expiration is set by `JwtService`
    ///
    /// # Examples
    ///
    /// ```
    /// use sublet_auth::Claims;
    /// use sublet_core::models::UserRole;
    /// use uuid::Uuid;
    ///
    /// let id = Uuid::new_v4();
    /// let claims = Claims::new(id, UserRole::Admin);
    /// assert_eq!(claims.user_id().unwrap(), id);
    /// ```
    pub fn new(user_id: Uuid, role: UserRole) -> Self {
        Self {
            sub: user_id.to_string(),
            role,
            email: None,
            aud: None,
            iat: Utc::now().timestamp(),
            exp: 0,
        }
    }

    /// Create new claims expiring `expires_in_secs` from now
    pub fn with_expiration(user_id: Uuid, role: UserRole, expires_in_secs: i64) -> Self {
        let now = Utc::now();
        let exp = now + Duration::seconds(expires_in_secs);

        Self {
            iat: now.timestamp(),
            exp: exp.timestamp(),
            ..Self::new(user_id, role)
        }
    }

    /// Set the audience
    pub fn for_audience(mut self, audience: &str) -> Self {
        self.aud = Some(audience.to_string());
        self
    }

    /// Check if the token is expired
    pub fn is_expired(&self) -> bool {
        self.exp <= Utc::now().timestamp()
    }

    /// The subject as a user id
    pub fn user_id(&self) -> Result<Uuid, AppError> {
        Uuid::parse_str(&self.sub)
            .map_err(|_| AppError::InvalidToken("subject is not a user id".to_string()))
    }

    /// Check if user has moderation privileges
    pub fn is_admin(&self) -> bool {
        self.role.is_admin()
    }
}
