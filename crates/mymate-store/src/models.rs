//! Rows of the `users` table.
//!
//! Message rows map straight onto [`mymate_shared::ChatMessage`], so only the
//! user record needs a store-local struct.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mymate_shared::{Identity, UserId};

/// A user profile as far as the chat core is concerned.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserRecord {
    pub id: UserId,
    pub first_name: String,
    pub last_name: String,
    pub avatar_url: Option<String>,
    /// Incremented to invalidate every token issued before the bump.
    pub jwt_version: u32,
    pub created_at: DateTime<Utc>,
}

impl UserRecord {
    pub fn new(id: UserId, first_name: impl Into<String>, last_name: impl Into<String>) -> Self {
        Self {
            id,
            first_name: first_name.into(),
            last_name: last_name.into(),
            avatar_url: None,
            jwt_version: 0,
            created_at: Utc::now(),
        }
    }

    pub fn identity(&self) -> Identity {
        Identity {
            id: self.id,
            name: Identity::display_name(&self.first_name, &self.last_name),
            avatar_url: self.avatar_url.clone(),
        }
    }
}
