//! Persistence port of the chat core.
//!
//! The router and the history service only see the narrow [`MessageStore`]
//! trait; the identity resolver only sees [`UserDirectory`]. Both are
//! implemented by [`SqliteStore`] in production and by an in-memory double
//! in tests. Implementations are synchronous and are driven from async code
//! through [`call_blocking`], which applies the request deadline.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::debug;

use mymate_shared::{ChatMessage, ChatSummary, MessageId, UserId};
use mymate_store::{Database, StoreError, UserRecord};

pub trait MessageStore: Send + Sync + 'static {
    /// Persist one message and return its store-assigned id.
    ///
    /// Nothing may be committed once `deadline` has passed; the call fails
    /// with [`StoreError::DeadlineExceeded`] instead.
    fn append(
        &self,
        sender: UserId,
        receiver: UserId,
        body: &str,
        created_at: DateTime<Utc>,
        deadline: Instant,
    ) -> mymate_store::Result<MessageId>;

    /// Messages between `a` and `b`, newest first, strictly older than
    /// `before` when given.
    fn history(
        &self,
        a: UserId,
        b: UserId,
        before: Option<MessageId>,
        offset: u32,
        limit: u32,
    ) -> mymate_store::Result<Vec<ChatMessage>>;

    fn recent_chats(&self, user: UserId) -> mymate_store::Result<Vec<ChatSummary>>;
}

/// Profiles and token versions, fed by the account service.
pub trait UserDirectory: Send + Sync + 'static {
    fn user(&self, id: UserId) -> mymate_store::Result<UserRecord>;

    /// Insert or update a profile and return the stored record. The token
    /// version of an existing user never decreases.
    fn upsert_user(&self, user: &UserRecord) -> mymate_store::Result<UserRecord>;

    /// Invalidate every outstanding token of a user; returns the new version.
    fn revoke_tokens(&self, id: UserId) -> mymate_store::Result<u32>;
}

/// A store call that did not produce a result.
#[derive(Debug, Error)]
pub enum StoreUnavailable {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("store call timed out after {0:?}")]
    TimedOut(Duration),

    #[error("store task failed: {0}")]
    Task(String),
}

/// Run a synchronous store call on the blocking pool, bounded by `deadline`.
///
/// On timeout the call is abandoned, not cancelled: it may still complete in
/// the background. Only reads go through here; writes use [`write_blocking`].
pub async fn call_blocking<S, T, F>(
    store: &Arc<S>,
    deadline: Duration,
    f: F,
) -> Result<T, StoreUnavailable>
where
    S: ?Sized + Send + Sync + 'static,
    T: Send + 'static,
    F: FnOnce(&S) -> mymate_store::Result<T> + Send + 'static,
{
    let store = Arc::clone(store);
    let task = tokio::task::spawn_blocking(move || f(&*store));
    match tokio::time::timeout(deadline, task).await {
        Ok(Ok(result)) => result.map_err(StoreUnavailable::from),
        Ok(Err(join_error)) => Err(StoreUnavailable::Task(join_error.to_string())),
        Err(_) => Err(StoreUnavailable::TimedOut(deadline)),
    }
}

/// [`call_blocking`] for writes whose outcome the caller must know.
///
/// The store call is handed the absolute deadline and must not commit past
/// it. If the async deadline fires first, the task is still awaited so that
/// a timeout is only reported for a write that did not land.
pub async fn write_blocking<S, T, F>(
    store: &Arc<S>,
    deadline: Duration,
    f: F,
) -> Result<T, StoreUnavailable>
where
    S: ?Sized + Send + Sync + 'static,
    T: Send + 'static,
    F: FnOnce(&S, Instant) -> mymate_store::Result<T> + Send + 'static,
{
    let store = Arc::clone(store);
    let expires = Instant::now() + deadline;
    let mut task = tokio::task::spawn_blocking(move || f(&*store, expires));

    let joined = match tokio::time::timeout(deadline, &mut task).await {
        Ok(joined) => joined,
        Err(_) => {
            debug!(?deadline, "Store write overran its deadline, awaiting outcome");
            task.await
        }
    };
    match joined {
        Ok(Err(StoreError::DeadlineExceeded)) => Err(StoreUnavailable::TimedOut(deadline)),
        Ok(result) => result.map_err(StoreUnavailable::from),
        Err(join_error) => Err(StoreUnavailable::Task(join_error.to_string())),
    }
}

/// [`Database`] behind a mutex, shared by every request.
pub struct SqliteStore {
    db: Mutex<Database>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> mymate_store::Result<Self> {
        Ok(Self::from_database(Database::open_at(path)?))
    }

    pub fn in_memory() -> mymate_store::Result<Self> {
        Ok(Self::from_database(Database::open_in_memory()?))
    }

    pub fn from_database(db: Database) -> Self {
        Self { db: Mutex::new(db) }
    }

    /// Lock the connection. A panic in another holder does not corrupt
    /// SQLite state, so a poisoned lock is recovered.
    pub fn db(&self) -> MutexGuard<'_, Database> {
        self.db.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl MessageStore for SqliteStore {
    fn append(
        &self,
        sender: UserId,
        receiver: UserId,
        body: &str,
        created_at: DateTime<Utc>,
        deadline: Instant,
    ) -> mymate_store::Result<MessageId> {
        self.db()
            .append_message(sender, receiver, body, created_at, Some(deadline))
    }

    fn history(
        &self,
        a: UserId,
        b: UserId,
        before: Option<MessageId>,
        offset: u32,
        limit: u32,
    ) -> mymate_store::Result<Vec<ChatMessage>> {
        self.db().conversation_page(a, b, before, offset, limit)
    }

    fn recent_chats(&self, user: UserId) -> mymate_store::Result<Vec<ChatSummary>> {
        self.db().recent_chats(user)
    }
}

impl UserDirectory for SqliteStore {
    fn user(&self, id: UserId) -> mymate_store::Result<UserRecord> {
        self.db().get_user(id)
    }

    fn upsert_user(&self, user: &UserRecord) -> mymate_store::Result<UserRecord> {
        let db = self.db();
        db.upsert_user(user)?;
        db.get_user(user.id)
    }

    fn revoke_tokens(&self, id: UserId) -> mymate_store::Result<u32> {
        self.db().bump_jwt_version(id)
    }
}

#[cfg(test)]
pub mod testing {
    //! In-memory store double with failure injection and a call log.

    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    #[derive(Default)]
    pub struct MemoryStore {
        messages: Mutex<Vec<ChatMessage>>,
        users: Mutex<HashMap<UserId, UserRecord>>,
        appends: Mutex<Vec<(UserId, UserId, String)>>,
        append_delay: Mutex<Duration>,
        failing: AtomicBool,
    }

    impl MemoryStore {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub fn add_user(&self, first_name: &str) -> UserRecord {
            let record = UserRecord::new(UserId::new(), first_name, "");
            self.users
                .lock()
                .unwrap()
                .insert(record.id, record.clone());
            record
        }

        pub fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        /// Make every append block for `delay` before it commits.
        pub fn set_append_delay(&self, delay: Duration) {
            *self.append_delay.lock().unwrap() = delay;
        }

        /// Every append attempt, successful or not.
        pub fn appends(&self) -> Vec<(UserId, UserId, String)> {
            self.appends.lock().unwrap().clone()
        }

        pub fn messages(&self) -> Vec<ChatMessage> {
            self.messages.lock().unwrap().clone()
        }

        fn check(&self) -> mymate_store::Result<()> {
            if self.failing.load(Ordering::SeqCst) {
                Err(StoreError::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "store offline",
                )))
            } else {
                Ok(())
            }
        }
    }

    impl MessageStore for MemoryStore {
        fn append(
            &self,
            sender: UserId,
            receiver: UserId,
            body: &str,
            created_at: DateTime<Utc>,
            deadline: Instant,
        ) -> mymate_store::Result<MessageId> {
            self.appends
                .lock()
                .unwrap()
                .push((sender, receiver, body.to_string()));
            self.check()?;
            let delay = *self.append_delay.lock().unwrap();
            std::thread::sleep(delay);
            if Instant::now() >= deadline {
                return Err(StoreError::DeadlineExceeded);
            }
            let mut messages = self.messages.lock().unwrap();
            let id = MessageId(messages.len() as i64 + 1);
            messages.push(ChatMessage {
                id,
                sender_id: sender,
                receiver_id: receiver,
                message: body.to_string(),
                created_at,
            });
            Ok(id)
        }

        fn history(
            &self,
            a: UserId,
            b: UserId,
            before: Option<MessageId>,
            offset: u32,
            limit: u32,
        ) -> mymate_store::Result<Vec<ChatMessage>> {
            self.check()?;
            let messages = self.messages.lock().unwrap();
            Ok(messages
                .iter()
                .rev()
                .filter(|m| m.involves(a) && m.counterpart_of(a) == b)
                .filter(|m| before.map_or(true, |cursor| m.id < cursor))
                .skip(offset as usize)
                .take(limit as usize)
                .cloned()
                .collect())
        }

        fn recent_chats(&self, user: UserId) -> mymate_store::Result<Vec<ChatSummary>> {
            self.check()?;
            let messages = self.messages.lock().unwrap();
            let users = self.users.lock().unwrap();
            let mut seen = Vec::new();
            let mut chats = Vec::new();
            for message in messages.iter().rev().filter(|m| m.involves(user)) {
                let counterpart = message.counterpart_of(user);
                if seen.contains(&counterpart) {
                    continue;
                }
                seen.push(counterpart);
                if let Some(record) = users.get(&counterpart) {
                    chats.push(ChatSummary {
                        counterpart: record.identity(),
                        latest_message: message.clone(),
                    });
                }
            }
            Ok(chats)
        }
    }

    impl UserDirectory for MemoryStore {
        fn user(&self, id: UserId) -> mymate_store::Result<UserRecord> {
            self.check()?;
            self.users
                .lock()
                .unwrap()
                .get(&id)
                .cloned()
                .ok_or(StoreError::NotFound)
        }

        fn upsert_user(&self, user: &UserRecord) -> mymate_store::Result<UserRecord> {
            self.check()?;
            let mut users = self.users.lock().unwrap();
            let mut record = user.clone();
            if let Some(existing) = users.get(&user.id) {
                record.jwt_version = record.jwt_version.max(existing.jwt_version);
                record.created_at = existing.created_at;
            }
            users.insert(record.id, record.clone());
            Ok(record)
        }

        fn revoke_tokens(&self, id: UserId) -> mymate_store::Result<u32> {
            self.check()?;
            let mut users = self.users.lock().unwrap();
            let user = users.get_mut(&id).ok_or(StoreError::NotFound)?;
            user.jwt_version += 1;
            Ok(user.jwt_version)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_call_blocking_runs_store_call() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let user = UserRecord::new(UserId::new(), "Anna", "");
        store.db().upsert_user(&user).unwrap();

        let id = user.id;
        let loaded = call_blocking(&store, Duration::from_secs(5), move |s| s.user(id))
            .await
            .unwrap();
        assert_eq!(loaded.first_name, "Anna");
    }

    #[tokio::test]
    async fn test_call_blocking_maps_store_errors() {
        let store: Arc<dyn UserDirectory> = Arc::new(SqliteStore::in_memory().unwrap());
        let missing = UserId::new();

        let err = call_blocking(&store, Duration::from_secs(5), move |s| s.user(missing))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreUnavailable::Store(StoreError::NotFound)));
    }

    #[tokio::test]
    async fn test_call_blocking_times_out() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());

        let err = call_blocking(&store, Duration::from_millis(10), |_| {
            std::thread::sleep(Duration::from_millis(200));
            Ok(())
        })
        .await
        .unwrap_err();
        assert!(matches!(err, StoreUnavailable::TimedOut(_)));
    }

    #[tokio::test]
    async fn test_write_blocking_reports_late_commit_as_success() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());

        // Ignores its deadline, so the outcome arrives after the timer fired.
        let value = write_blocking(&store, Duration::from_millis(10), |_, _| {
            std::thread::sleep(Duration::from_millis(100));
            Ok(7)
        })
        .await
        .unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_write_blocking_refused_commit_is_timeout() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let a = UserRecord::new(UserId::new(), "a", "");
        let b = UserRecord::new(UserId::new(), "b", "");
        store.db().upsert_user(&a).unwrap();
        store.db().upsert_user(&b).unwrap();

        let err = write_blocking(&store, Duration::from_millis(10), move |s, deadline| {
            std::thread::sleep(Duration::from_millis(50));
            s.append(a.id, b.id, "late", Utc::now(), deadline)
        })
        .await
        .unwrap_err();

        assert!(matches!(err, StoreUnavailable::TimedOut(_)));
        assert!(store.history(a.id, b.id, None, 0, 20).unwrap().is_empty());
    }

    #[test]
    fn test_upsert_keeps_token_version() {
        let store = SqliteStore::in_memory().unwrap();
        let user = UserRecord::new(UserId::new(), "Anna", "");
        store.upsert_user(&user).unwrap();

        assert_eq!(store.revoke_tokens(user.id).unwrap(), 1);
        let stored = store.upsert_user(&user).unwrap();
        assert_eq!(stored.jwt_version, 1);
        assert!(matches!(
            store.revoke_tokens(UserId::new()),
            Err(StoreError::NotFound)
        ));
    }
}
