use serde::{Deserialize, Serialize};

use crate::types::UserId;

/// An authenticated principal as the chat core sees it: a stable id plus the
/// attributes needed to render it in a chat list.
///
/// The account service owns these records; the chat core only reads them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Identity {
    pub id: UserId,
    pub name: String,
    pub avatar_url: Option<String>,
}

impl Identity {
    /// Build the display name from the first/last name pair of a profile.
    pub fn display_name(first_name: &str, last_name: &str) -> String {
        format!("{} {}", first_name.trim(), last_name.trim())
            .trim()
            .to_string()
    }
}
