use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::Utc;

use crate::schema::{AccountRecord, CommentEntry, Fingerprint, OwnerId, WatchEntry};
use crate::{COMMENT_CAP, StoreError, WatchStore};

/// In-memory [`WatchStore`]. Interchangeable with [`crate::RedbStore`]; used
/// by tests and by ephemeral deployments that do not need durability.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    accounts: BTreeMap<OwnerId, AccountRecord>,
    watches: BTreeMap<(OwnerId, String), WatchEntry>,
    comments: BTreeMap<(OwnerId, u64), CommentEntry>,
    watch_seq: u64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn locked<T>(&self, f: impl FnOnce(&mut Inner) -> T) -> Result<T, StoreError> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|e| StoreError::QueryFailed(format!("store lock poisoned: {e}")))?;
        Ok(f(&mut inner))
    }
}

impl WatchStore for MemoryStore {
    fn register_account(&self, owner: OwnerId) -> Result<bool, StoreError> {
        self.locked(|inner| {
            if inner.accounts.contains_key(&owner) {
                return false;
            }
            inner.accounts.insert(
                owner,
                AccountRecord {
                    created_at: Utc::now(),
                },
            );
            true
        })
    }

    fn account_exists(&self, owner: OwnerId) -> Result<bool, StoreError> {
        self.locked(|inner| inner.accounts.contains_key(&owner))
    }

    fn remove_account(&self, owner: OwnerId) -> Result<bool, StoreError> {
        self.locked(|inner| {
            if inner.accounts.remove(&owner).is_none() {
                return false;
            }
            inner.watches.retain(|(o, _), _| *o != owner);
            inner.comments.retain(|(o, _), _| *o != owner);
            true
        })
    }

    fn all_accounts(&self) -> Result<Vec<OwnerId>, StoreError> {
        self.locked(|inner| inner.accounts.keys().copied().collect())
    }

    fn watch_exists(&self, owner: OwnerId, url: &str) -> Result<bool, StoreError> {
        self.locked(|inner| inner.watches.contains_key(&(owner, url.to_string())))
    }

    fn insert_watch(
        &self,
        owner: OwnerId,
        url: &str,
        fingerprint: Fingerprint,
    ) -> Result<bool, StoreError> {
        self.locked(|inner| {
            let key = (owner, url.to_string());
            if inner.watches.contains_key(&key) {
                return false;
            }
            inner.watch_seq += 1;
            inner.watches.insert(
                key,
                WatchEntry {
                    owner,
                    url: url.to_string(),
                    fingerprint,
                    seq: inner.watch_seq,
                    last_checked: Utc::now(),
                },
            );
            true
        })
    }

    fn remove_watch(&self, owner: OwnerId, url: &str) -> Result<bool, StoreError> {
        self.locked(|inner| inner.watches.remove(&(owner, url.to_string())).is_some())
    }

    fn remove_all_watches(&self, owner: OwnerId) -> Result<Vec<String>, StoreError> {
        self.locked(|inner| {
            let mut removed: Vec<WatchEntry> = Vec::new();
            inner.watches.retain(|(o, _), entry| {
                if *o == owner {
                    removed.push(entry.clone());
                    false
                } else {
                    true
                }
            });
            removed.sort_by_key(|e| e.seq);
            removed.into_iter().map(|e| e.url).collect()
        })
    }

    fn watches_for(&self, owner: OwnerId) -> Result<Vec<WatchEntry>, StoreError> {
        self.locked(|inner| {
            let mut rows: Vec<WatchEntry> = inner
                .watches
                .values()
                .filter(|e| e.owner == owner)
                .cloned()
                .collect();
            rows.sort_by_key(|e| e.seq);
            rows
        })
    }

    fn all_watches(&self) -> Result<Vec<WatchEntry>, StoreError> {
        self.locked(|inner| {
            let mut rows: Vec<WatchEntry> = inner.watches.values().cloned().collect();
            rows.sort_by_key(|e| e.seq);
            rows
        })
    }

    fn update_fingerprint_if(
        &self,
        owner: OwnerId,
        url: &str,
        expected: &Fingerprint,
        next: Fingerprint,
    ) -> Result<bool, StoreError> {
        self.locked(|inner| {
            let Some(entry) = inner.watches.get_mut(&(owner, url.to_string())) else {
                return false;
            };
            if entry.fingerprint != *expected {
                return false;
            }
            entry.fingerprint = next;
            entry.last_checked = Utc::now();
            true
        })
    }

    fn append_comment(
        &self,
        owner: OwnerId,
        text: &str,
        handle: Option<&str>,
        display_name: Option<&str>,
    ) -> Result<bool, StoreError> {
        self.locked(|inner| {
            let range = inner.comments.range((owner, 0)..=(owner, u64::MAX));
            let mut count = 0usize;
            let mut last_seq = 0u64;
            for ((_, seq), _) in range {
                count += 1;
                last_seq = *seq;
            }
            if count >= COMMENT_CAP {
                return false;
            }
            let seq = last_seq + 1;
            inner.comments.insert(
                (owner, seq),
                CommentEntry {
                    owner,
                    seq,
                    text: text.to_string(),
                    handle: handle.map(str::to_string),
                    display_name: display_name.map(str::to_string),
                    created_at: Utc::now(),
                },
            );
            true
        })
    }

    fn comments_for(&self, owner: OwnerId) -> Result<Vec<CommentEntry>, StoreError> {
        self.locked(|inner| {
            inner
                .comments
                .range((owner, 0)..=(owner, u64::MAX))
                .map(|(_, entry)| entry.clone())
                .collect()
        })
    }

    fn purge_comments(&self) -> Result<usize, StoreError> {
        self.locked(|inner| {
            let purged = inner.comments.len();
            inner.comments.clear();
            purged
        })
    }
}
