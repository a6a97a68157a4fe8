//! Durable [`WatchStore`] backed by [`redb`].
//!
//! # Tables
//!
//! | Name       | Key             | Value                              |
//! |------------|-----------------|------------------------------------|
//! | `accounts` | owner id (i64)  | JSON-serialised [`AccountRecord`]  |
//! | `watches`  | (owner, url)    | JSON-serialised [`WatchEntry`]     |
//! | `comments` | (owner, seq)    | JSON-serialised [`CommentEntry`]   |
//! | `meta`     | counter name    | u64                                |
//!
//! Every trait operation is one transaction, so row mutations are atomic and
//! concurrent writers serialise on redb's single-writer lock. The `watches`
//! key is the (owner, url) pair itself, which gives (owner, url) uniqueness
//! for free; insertion order is recovered from the `seq` field carried in the
//! value.

use std::path::{Path, PathBuf};

use chrono::Utc;
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use tracing::info;

use crate::schema::{AccountRecord, CommentEntry, Fingerprint, OwnerId, WatchEntry};
use crate::{COMMENT_CAP, StoreError, WatchStore};

const ACCOUNTS: TableDefinition<i64, &[u8]> = TableDefinition::new("accounts");
const WATCHES: TableDefinition<(i64, &str), &[u8]> = TableDefinition::new("watches");
const COMMENTS: TableDefinition<(i64, u64), &[u8]> = TableDefinition::new("comments");
const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

/// Global insertion counter for watch rows.
const WATCH_SEQ: &str = "watch_seq";

pub struct RedbStore {
    db: Database,
    path: PathBuf,
}

impl RedbStore {
    /// Open or create the store file at `path`, ensuring all tables exist so
    /// later read transactions never hit a missing table.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::ConnectFailed(e.to_string()))?;
        }
        let db = Database::create(&path)
            .map_err(|e| StoreError::ConnectFailed(format!("{}: {e}", path.display())))?;

        {
            let tx = db.begin_write()?;
            tx.open_table(ACCOUNTS)?;
            tx.open_table(WATCHES)?;
            tx.open_table(COMMENTS)?;
            tx.open_table(META)?;
            tx.commit()?;
        }

        info!(path = %path.display(), "watch store opened");
        Ok(Self { db, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl From<redb::TransactionError> for StoreError {
    fn from(e: redb::TransactionError) -> Self {
        StoreError::QueryFailed(e.to_string())
    }
}

impl From<redb::TableError> for StoreError {
    fn from(e: redb::TableError) -> Self {
        StoreError::QueryFailed(e.to_string())
    }
}

impl From<redb::StorageError> for StoreError {
    fn from(e: redb::StorageError) -> Self {
        StoreError::QueryFailed(e.to_string())
    }
}

impl From<redb::CommitError> for StoreError {
    fn from(e: redb::CommitError) -> Self {
        StoreError::QueryFailed(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::QueryFailed(format!("row encoding: {e}"))
    }
}

/// Collect one owner's watch rows from any readable `watches` table,
/// re-sorted into insertion order.
fn collect_owner_watches(
    tbl: &impl ReadableTable<(i64, &'static str), &'static [u8]>,
    owner: OwnerId,
) -> Result<Vec<WatchEntry>, StoreError> {
    let mut rows: Vec<WatchEntry> = Vec::new();
    for item in tbl.range((owner, "")..)? {
        let (key, value) = item?;
        if key.value().0 != owner {
            break;
        }
        rows.push(serde_json::from_slice(value.value())?);
    }
    rows.sort_by_key(|e| e.seq);
    Ok(rows)
}

impl WatchStore for RedbStore {
    fn register_account(&self, owner: OwnerId) -> Result<bool, StoreError> {
        let tx = self.db.begin_write()?;
        let created = {
            let mut tbl = tx.open_table(ACCOUNTS)?;
            if tbl.get(owner)?.is_some() {
                false
            } else {
                let record = AccountRecord {
                    created_at: Utc::now(),
                };
                tbl.insert(owner, serde_json::to_vec(&record)?.as_slice())?;
                true
            }
        };
        tx.commit()?;
        Ok(created)
    }

    fn account_exists(&self, owner: OwnerId) -> Result<bool, StoreError> {
        let tx = self.db.begin_read()?;
        let tbl = tx.open_table(ACCOUNTS)?;
        Ok(tbl.get(owner)?.is_some())
    }

    fn remove_account(&self, owner: OwnerId) -> Result<bool, StoreError> {
        let tx = self.db.begin_write()?;
        let removed = {
            let mut accounts = tx.open_table(ACCOUNTS)?;
            if accounts.remove(owner)?.is_none() {
                false
            } else {
                let mut watches = tx.open_table(WATCHES)?;
                let urls: Vec<String> = {
                    let mut urls = Vec::new();
                    for item in watches.range((owner, "")..)? {
                        let (key, _) = item?;
                        let (o, url) = key.value();
                        if o != owner {
                            break;
                        }
                        urls.push(url.to_string());
                    }
                    urls
                };
                for url in &urls {
                    watches.remove((owner, url.as_str()))?;
                }

                let mut comments = tx.open_table(COMMENTS)?;
                let seqs: Vec<u64> = {
                    let mut seqs = Vec::new();
                    for item in comments.range((owner, 0)..=(owner, u64::MAX))? {
                        let (key, _) = item?;
                        seqs.push(key.value().1);
                    }
                    seqs
                };
                for seq in seqs {
                    comments.remove((owner, seq))?;
                }
                true
            }
        };
        tx.commit()?;
        Ok(removed)
    }

    fn all_accounts(&self) -> Result<Vec<OwnerId>, StoreError> {
        let tx = self.db.begin_read()?;
        let tbl = tx.open_table(ACCOUNTS)?;
        let mut owners = Vec::new();
        for item in tbl.iter()? {
            let (key, _) = item?;
            owners.push(key.value());
        }
        Ok(owners)
    }

    fn watch_exists(&self, owner: OwnerId, url: &str) -> Result<bool, StoreError> {
        let tx = self.db.begin_read()?;
        let tbl = tx.open_table(WATCHES)?;
        Ok(tbl.get((owner, url))?.is_some())
    }

    fn insert_watch(
        &self,
        owner: OwnerId,
        url: &str,
        fingerprint: Fingerprint,
    ) -> Result<bool, StoreError> {
        let tx = self.db.begin_write()?;
        let inserted = {
            let mut watches = tx.open_table(WATCHES)?;
            if watches.get((owner, url))?.is_some() {
                false
            } else {
                let mut meta = tx.open_table(META)?;
                let seq = meta.get(WATCH_SEQ)?.map(|v| v.value()).unwrap_or(0) + 1;
                meta.insert(WATCH_SEQ, seq)?;

                let entry = WatchEntry {
                    owner,
                    url: url.to_string(),
                    fingerprint,
                    seq,
                    last_checked: Utc::now(),
                };
                watches.insert((owner, url), serde_json::to_vec(&entry)?.as_slice())?;
                true
            }
        };
        tx.commit()?;
        Ok(inserted)
    }

    fn remove_watch(&self, owner: OwnerId, url: &str) -> Result<bool, StoreError> {
        let tx = self.db.begin_write()?;
        let removed = {
            let mut tbl = tx.open_table(WATCHES)?;
            tbl.remove((owner, url))?.is_some()
        };
        tx.commit()?;
        Ok(removed)
    }

    fn remove_all_watches(&self, owner: OwnerId) -> Result<Vec<String>, StoreError> {
        let tx = self.db.begin_write()?;
        let urls = {
            let mut tbl = tx.open_table(WATCHES)?;
            let rows = collect_owner_watches(&tbl, owner)?;
            for entry in &rows {
                tbl.remove((owner, entry.url.as_str()))?;
            }
            rows.into_iter().map(|e| e.url).collect()
        };
        tx.commit()?;
        Ok(urls)
    }

    fn watches_for(&self, owner: OwnerId) -> Result<Vec<WatchEntry>, StoreError> {
        let tx = self.db.begin_read()?;
        let tbl = tx.open_table(WATCHES)?;
        collect_owner_watches(&tbl, owner)
    }

    fn all_watches(&self) -> Result<Vec<WatchEntry>, StoreError> {
        let tx = self.db.begin_read()?;
        let tbl = tx.open_table(WATCHES)?;
        let mut rows: Vec<WatchEntry> = Vec::new();
        for item in tbl.iter()? {
            let (_, value) = item?;
            rows.push(serde_json::from_slice(value.value())?);
        }
        rows.sort_by_key(|e| e.seq);
        Ok(rows)
    }

    fn update_fingerprint_if(
        &self,
        owner: OwnerId,
        url: &str,
        expected: &Fingerprint,
        next: Fingerprint,
    ) -> Result<bool, StoreError> {
        let tx = self.db.begin_write()?;
        let updated = {
            let mut tbl = tx.open_table(WATCHES)?;
            let current: Option<WatchEntry> = tbl
                .get((owner, url))?
                .map(|v| serde_json::from_slice(v.value()))
                .transpose()?;
            match current {
                Some(mut entry) if entry.fingerprint == *expected => {
                    entry.fingerprint = next;
                    entry.last_checked = Utc::now();
                    tbl.insert((owner, url), serde_json::to_vec(&entry)?.as_slice())?;
                    true
                }
                // Row gone (unfollowed mid-cycle) or a concurrent writer won.
                _ => false,
            }
        };
        tx.commit()?;
        Ok(updated)
    }

    fn append_comment(
        &self,
        owner: OwnerId,
        text: &str,
        handle: Option<&str>,
        display_name: Option<&str>,
    ) -> Result<bool, StoreError> {
        let tx = self.db.begin_write()?;
        let stored = {
            let mut tbl = tx.open_table(COMMENTS)?;
            let (count, last_seq) = {
                let mut count = 0usize;
                let mut last_seq = 0u64;
                for item in tbl.range((owner, 0)..=(owner, u64::MAX))? {
                    let (key, _) = item?;
                    count += 1;
                    last_seq = key.value().1;
                }
                (count, last_seq)
            };
            if count >= COMMENT_CAP {
                false
            } else {
                let seq = last_seq + 1;
                let entry = CommentEntry {
                    owner,
                    seq,
                    text: text.to_string(),
                    handle: handle.map(str::to_string),
                    display_name: display_name.map(str::to_string),
                    created_at: Utc::now(),
                };
                tbl.insert((owner, seq), serde_json::to_vec(&entry)?.as_slice())?;
                true
            }
        };
        tx.commit()?;
        Ok(stored)
    }

    fn comments_for(&self, owner: OwnerId) -> Result<Vec<CommentEntry>, StoreError> {
        let tx = self.db.begin_read()?;
        let tbl = tx.open_table(COMMENTS)?;
        let mut rows = Vec::new();
        for item in tbl.range((owner, 0)..=(owner, u64::MAX))? {
            let (_, value) = item?;
            rows.push(serde_json::from_slice(value.value())?);
        }
        Ok(rows)
    }

    fn purge_comments(&self) -> Result<usize, StoreError> {
        let tx = self.db.begin_write()?;
        let purged = {
            let tbl = tx.open_table(COMMENTS)?;
            tbl.len()? as usize
        };
        tx.delete_table(COMMENTS)?;
        tx.open_table(COMMENTS)?;
        tx.commit()?;
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_store(dir: &TempDir) -> RedbStore {
        RedbStore::open(dir.path().join("store.redb")).unwrap()
    }

    fn fp(data: &[u8]) -> Fingerprint {
        Fingerprint::digest(data)
    }

    #[test]
    fn register_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        assert!(store.register_account(42).unwrap());
        assert!(!store.register_account(42).unwrap());
        assert!(store.account_exists(42).unwrap());
    }

    #[test]
    fn insert_watch_rejects_duplicates() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        store.register_account(42).unwrap();
        assert!(store.insert_watch(42, "http://example.com", fp(b"a")).unwrap());
        assert!(!store.insert_watch(42, "http://example.com", fp(b"b")).unwrap());
        assert_eq!(store.watches_for(42).unwrap().len(), 1);
        // The losing insert must not have touched the row.
        assert_eq!(store.watches_for(42).unwrap()[0].fingerprint, fp(b"a"));
    }

    #[test]
    fn watches_listed_in_insertion_order() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        store.register_account(1).unwrap();
        // Deliberately out of lexicographic order.
        for url in ["http://zzz.example", "http://aaa.example", "http://mmm.example"] {
            store.insert_watch(1, url, fp(url.as_bytes())).unwrap();
        }
        let urls: Vec<String> = store
            .watches_for(1)
            .unwrap()
            .into_iter()
            .map(|e| e.url)
            .collect();
        assert_eq!(
            urls,
            ["http://zzz.example", "http://aaa.example", "http://mmm.example"]
        );
    }

    #[test]
    fn remove_all_watches_reports_removed_urls() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        store.register_account(1).unwrap();
        store.insert_watch(1, "http://one.example", fp(b"1")).unwrap();
        store.insert_watch(1, "http://two.example", fp(b"2")).unwrap();
        store.insert_watch(2, "http://other.example", fp(b"3")).unwrap();

        let removed = store.remove_all_watches(1).unwrap();
        assert_eq!(removed, ["http://one.example", "http://two.example"]);
        assert!(store.watches_for(1).unwrap().is_empty());
        // Other owners untouched.
        assert_eq!(store.watches_for(2).unwrap().len(), 1);
    }

    #[test]
    fn remove_account_cascades() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        store.register_account(7).unwrap();
        store.insert_watch(7, "http://x.example", fp(b"x")).unwrap();
        store.append_comment(7, "hello", None, None).unwrap();

        assert!(store.remove_account(7).unwrap());
        assert!(!store.account_exists(7).unwrap());
        assert!(store.watches_for(7).unwrap().is_empty());
        assert!(store.comments_for(7).unwrap().is_empty());
        // Second delete reports nothing to do.
        assert!(!store.remove_account(7).unwrap());
    }

    #[test]
    fn compare_and_set_fingerprint() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        store.register_account(1).unwrap();
        store.insert_watch(1, "http://x.example", fp(b"v1")).unwrap();

        // Stale expectation: no write.
        assert!(!store
            .update_fingerprint_if(1, "http://x.example", &fp(b"other"), fp(b"v2"))
            .unwrap());
        assert_eq!(store.watches_for(1).unwrap()[0].fingerprint, fp(b"v1"));

        // Matching expectation: write lands.
        assert!(store
            .update_fingerprint_if(1, "http://x.example", &fp(b"v1"), fp(b"v2"))
            .unwrap());
        assert_eq!(store.watches_for(1).unwrap()[0].fingerprint, fp(b"v2"));

        // Missing row: no-op.
        assert!(!store
            .update_fingerprint_if(1, "http://gone.example", &fp(b"v1"), fp(b"v2"))
            .unwrap());
    }

    #[test]
    fn comment_cap_enforced_at_thirty() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        store.register_account(9).unwrap();
        for i in 0..COMMENT_CAP {
            assert!(
                store
                    .append_comment(9, &format!("comment {i}"), Some("user"), None)
                    .unwrap(),
                "comment {i} should be accepted"
            );
        }
        assert!(!store.append_comment(9, "one too many", None, None).unwrap());
        assert_eq!(store.comments_for(9).unwrap().len(), COMMENT_CAP);
    }

    #[test]
    fn purge_clears_every_owner() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        store.append_comment(1, "a", None, None).unwrap();
        store.append_comment(2, "b", None, None).unwrap();
        assert_eq!(store.purge_comments().unwrap(), 2);
        assert!(store.comments_for(1).unwrap().is_empty());
        assert!(store.comments_for(2).unwrap().is_empty());
        // Purge lifts the cap again.
        assert!(store.append_comment(1, "after purge", None, None).unwrap());
    }

    #[test]
    fn comments_keep_creation_order_and_metadata() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        store
            .append_comment(3, "first", Some("alice"), Some("Alice"))
            .unwrap();
        store.append_comment(3, "second", None, None).unwrap();
        let rows = store.comments_for(3).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].text, "first");
        assert_eq!(rows[0].handle.as_deref(), Some("alice"));
        assert_eq!(rows[0].display_name.as_deref(), Some("Alice"));
        assert_eq!(rows[1].text, "second");
        assert!(rows[0].seq < rows[1].seq);
    }

    #[test]
    fn survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.redb");
        {
            let store = RedbStore::open(&path).unwrap();
            store.register_account(5).unwrap();
            store.insert_watch(5, "http://keep.example", fp(b"k")).unwrap();
        }
        let store = RedbStore::open(&path).unwrap();
        assert!(store.account_exists(5).unwrap());
        assert_eq!(store.watches_for(5).unwrap()[0].url, "http://keep.example");
    }
}
