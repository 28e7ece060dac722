//! Read side of the chat core: the chat list and per-conversation pages
//! that clients use to catch up on messages sent while they were offline.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use mymate_shared::constants::{DEFAULT_HISTORY_LIMIT, MAX_HISTORY_LIMIT};
use mymate_shared::{ChatMessage, ChatSummary, MessageId, UserId};

use crate::store::{call_blocking, MessageStore, StoreUnavailable};

#[derive(Debug, Error)]
pub enum HistoryError {
    /// The backend could not answer; the caller may retry.
    #[error("history unavailable: {0}")]
    StoreUnavailable(#[from] StoreUnavailable),
}

/// Page selector of a history query.
///
/// `from` is an exclusive upper bound on message ids: pass the id of the
/// oldest message already shown to get the page before it. Absent means
/// start from the newest message, and so does a non-positive id (`-1` is
/// what older clients send for "no cursor").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    pub from: Option<MessageId>,
    #[serde(default)]
    pub offset: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    DEFAULT_HISTORY_LIMIT
}

impl Default for HistoryQuery {
    fn default() -> Self {
        Self {
            from: None,
            offset: 0,
            limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

impl HistoryQuery {
    pub fn before(cursor: MessageId, limit: u32) -> Self {
        Self {
            from: Some(cursor),
            limit,
            ..Self::default()
        }
    }

    fn cursor(&self) -> Option<MessageId> {
        self.from.filter(|id| id.0 > 0)
    }

    fn clamped_limit(&self) -> u32 {
        self.limit.clamp(1, MAX_HISTORY_LIMIT)
    }
}

#[derive(Clone)]
pub struct HistoryService {
    store: Arc<dyn MessageStore>,
    request_timeout: Duration,
}

impl HistoryService {
    pub fn new(store: Arc<dyn MessageStore>, request_timeout: Duration) -> Self {
        Self {
            store,
            request_timeout,
        }
    }

    /// Every conversation of `user`, most recently active first.
    pub async fn chat_list(&self, user: UserId) -> Result<Vec<ChatSummary>, HistoryError> {
        let chats = call_blocking(&self.store, self.request_timeout, move |store| {
            store.recent_chats(user)
        })
        .await?;
        Ok(chats)
    }

    /// One page of the conversation between `user` and `counterpart`,
    /// newest first.
    pub async fn history(
        &self,
        user: UserId,
        counterpart: UserId,
        query: HistoryQuery,
    ) -> Result<Vec<ChatMessage>, HistoryError> {
        let limit = query.clamped_limit();
        let cursor = query.cursor();
        let messages = call_blocking(&self.store, self.request_timeout, move |store| {
            store.history(user, counterpart, cursor, query.offset, limit)
        })
        .await?;
        Ok(messages)
    }
}
