pub mod durable;
pub mod memory;
pub mod schema;

use thiserror::Error;

pub use durable::RedbStore;
pub use memory::MemoryStore;
pub use schema::{CommentEntry, Fingerprint, OwnerId, WatchEntry};

/// Maximum number of live comments per owner. Submissions beyond the cap are
/// rejected, never evicted.
pub const COMMENT_CAP: usize = 30;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store connection failed: {0}")]
    ConnectFailed(String),
    #[error("store query failed: {0}")]
    QueryFailed(String),
}

/// Durable mapping from chat identity to watched URLs and comments.
///
/// Every mutation is atomic at the row level: one write transaction for the
/// redb backend, one mutex hold for the in-memory backend. Callers never
/// cache store contents across calls; each operation re-reads.
pub trait WatchStore: Send + Sync {
    /// Create the account if absent. Returns `false` when it already existed.
    fn register_account(&self, owner: OwnerId) -> Result<bool, StoreError>;

    fn account_exists(&self, owner: OwnerId) -> Result<bool, StoreError>;

    /// Delete the account and cascade to its watches and comments.
    /// Returns `false` when no such account existed.
    fn remove_account(&self, owner: OwnerId) -> Result<bool, StoreError>;

    fn all_accounts(&self) -> Result<Vec<OwnerId>, StoreError>;

    fn watch_exists(&self, owner: OwnerId, url: &str) -> Result<bool, StoreError>;

    /// Conditional insert: returns `false` (and writes nothing) when an entry
    /// for `(owner, url)` already exists.
    fn insert_watch(
        &self,
        owner: OwnerId,
        url: &str,
        fingerprint: Fingerprint,
    ) -> Result<bool, StoreError>;

    /// Returns `false` when no entry for `(owner, url)` existed.
    fn remove_watch(&self, owner: OwnerId, url: &str) -> Result<bool, StoreError>;

    /// Delete every watch of `owner` in one transaction, returning the removed
    /// URLs in insertion order.
    fn remove_all_watches(&self, owner: OwnerId) -> Result<Vec<String>, StoreError>;

    /// Watches of one owner, in insertion order.
    fn watches_for(&self, owner: OwnerId) -> Result<Vec<WatchEntry>, StoreError>;

    /// Snapshot of every watch across all owners.
    fn all_watches(&self) -> Result<Vec<WatchEntry>, StoreError>;

    /// Row-level compare-and-set: overwrite the fingerprint only while the
    /// stored value still equals `expected`. Returns `false` when the row is
    /// gone or a concurrent writer got there first.
    fn update_fingerprint_if(
        &self,
        owner: OwnerId,
        url: &str,
        expected: &Fingerprint,
        next: Fingerprint,
    ) -> Result<bool, StoreError>;

    /// Atomic conditional append: returns `false` (and writes nothing) when
    /// the owner already holds [`COMMENT_CAP`] live comments.
    fn append_comment(
        &self,
        owner: OwnerId,
        text: &str,
        handle: Option<&str>,
        display_name: Option<&str>,
    ) -> Result<bool, StoreError>;

    /// Comments of one owner, in creation order.
    fn comments_for(&self, owner: OwnerId) -> Result<Vec<CommentEntry>, StoreError>;

    /// Unconditionally delete every comment of every owner, returning the
    /// number of rows purged.
    fn purge_comments(&self) -> Result<usize, StoreError>;
}
