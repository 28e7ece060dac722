//! In-memory index of open chat connections.
//!
//! Maps every open [`Channel`] to the user that authenticated it. A user may
//! own any number of channels at once (one per device). Traversals run over
//! a snapshot taken under the read lock, so callbacks are free to remove
//! entries (their own or others') while the traversal is in progress.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use mymate_shared::UserId;

use crate::channel::{Channel, ChannelId};

/// Decision returned by a traversal callback for the entry it was given.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    Keep,
    Remove,
}

/// Outcome of one traversal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Traversal {
    pub visited: usize,
    pub removed: usize,
}

struct Entry {
    channel: Channel,
    owner: UserId,
}

#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    entries: Arc<RwLock<HashMap<ChannelId, Entry>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index a freshly authenticated channel. Visible to traversals as soon
    /// as this returns.
    pub async fn register(&self, channel: Channel, owner: UserId) {
        let id = channel.id();
        let total = {
            let mut entries = self.entries.write().await;
            entries.insert(id, Entry { channel, owner });
            entries.len()
        };
        debug!(channel = %id, user = %owner, total, "Channel registered");
    }

    /// Drop a channel from the index and close it. Returns `true` only for
    /// the call that actually removed the entry; later calls are no-ops.
    pub async fn unregister(&self, channel: &Channel) -> bool {
        let removed = self.entries.write().await.remove(&channel.id());
        channel.close();

        match removed {
            Some(entry) => {
                entry.channel.close();
                debug!(channel = %channel.id(), user = %entry.owner, "Channel unregistered");
                true
            }
            None => false,
        }
    }

    /// Reverse lookup: which user owns this channel.
    pub async fn owner_of(&self, id: ChannelId) -> Option<UserId> {
        self.entries.read().await.get(&id).map(|entry| entry.owner)
    }

    pub async fn contains(&self, id: ChannelId) -> bool {
        self.entries.read().await.contains_key(&id)
    }

    /// Snapshot of every channel owned by `owner`.
    pub async fn channels_of(&self, owner: UserId) -> Vec<Channel> {
        self.entries
            .read()
            .await
            .values()
            .filter(|entry| entry.owner == owner)
            .map(|entry| entry.channel.clone())
            .collect()
    }

    /// Snapshot of every registered channel with its owner.
    pub async fn snapshot(&self) -> Vec<(Channel, UserId)> {
        self.entries
            .read()
            .await
            .values()
            .map(|entry| (entry.channel.clone(), entry.owner))
            .collect()
    }

    /// Run `visit` for every channel of `owner`, awaiting each call in turn.
    /// A [`Visit::Remove`] unregisters that one channel immediately and the
    /// traversal continues with the next one.
    pub async fn for_each_channel_of<F, Fut>(&self, owner: UserId, mut visit: F) -> Traversal
    where
        F: FnMut(Channel) -> Fut,
        Fut: Future<Output = Visit>,
    {
        let mut traversal = Traversal::default();
        for channel in self.channels_of(owner).await {
            traversal.visited += 1;
            if visit(channel.clone()).await == Visit::Remove && self.unregister(&channel).await {
                traversal.removed += 1;
            }
        }
        traversal
    }

    /// Run `visit` for every registered channel. Channels answered with
    /// [`Visit::Remove`] are unregistered once the whole snapshot has been
    /// visited.
    pub async fn for_each_channel<F>(&self, mut visit: F) -> Traversal
    where
        F: FnMut(&Channel, UserId) -> Visit,
    {
        let mut traversal = Traversal::default();
        let mut doomed = Vec::new();
        for (channel, owner) in self.snapshot().await {
            traversal.visited += 1;
            if visit(&channel, owner) == Visit::Remove {
                doomed.push(channel);
            }
        }
        for channel in doomed {
            if self.unregister(&channel).await {
                traversal.removed += 1;
            }
        }
        traversal
    }

    /// Ids of every registered channel.
    pub async fn channel_ids(&self) -> HashSet<ChannelId> {
        self.entries.read().await.keys().copied().collect()
    }

    pub async fn connection_count(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Number of distinct users with at least one open channel.
    pub async fn online_users(&self) -> usize {
        self.entries
            .read()
            .await
            .values()
            .map(|entry| entry.owner)
            .collect::<HashSet<_>>()
            .len()
    }
}
