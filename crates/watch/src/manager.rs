//! Watch-list admission and removal on behalf of user commands.
//!
//! Every operation except `register` requires a prior successful
//! registration of the invoking user. Batch operations report one outcome per
//! URL; a failed URL never aborts its siblings.

use std::sync::Arc;

use thiserror::Error;
use url::Url;

use vigil_store::{OwnerId, StoreError, WatchStore};

use crate::fetch::{FetchError, FetchFingerprint};

/// Longest URL the store admits.
pub const MAX_URL_LEN: usize = 1500;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("chat {0} has not registered")]
    NotRegistered(OwnerId),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug)]
pub enum FollowOutcome {
    Followed,
    AlreadyExists,
    InvalidUrl,
    TooLong,
    Fetch(FetchError),
    Store(StoreError),
}

#[derive(Debug)]
pub enum UnfollowOutcome {
    Unfollowed,
    NotFound,
    InvalidUrl,
    TooLong,
    Store(StoreError),
}

#[derive(Debug, PartialEq, Eq)]
pub enum RegisterOutcome {
    Registered,
    AlreadyStarted,
}

#[derive(Debug, PartialEq, Eq)]
pub enum DeregisterOutcome {
    Deleted,
    NothingToDelete,
}

#[derive(Debug, PartialEq, Eq)]
pub enum UnfollowAllOutcome {
    Removed(Vec<String>),
    NothingToUnfollow,
}

enum UrlIssue {
    Invalid,
    TooLong,
}

/// A well-formed absolute http(s) URL within the length cap.
fn admit_url(raw: &str) -> Result<(), UrlIssue> {
    if raw.len() > MAX_URL_LEN {
        return Err(UrlIssue::TooLong);
    }
    match Url::parse(raw) {
        Ok(url) if url.has_host() && matches!(url.scheme(), "http" | "https") => Ok(()),
        _ => Err(UrlIssue::Invalid),
    }
}

pub struct WatchListManager {
    store: Arc<dyn WatchStore>,
    fetcher: Arc<dyn FetchFingerprint>,
}

impl WatchListManager {
    pub fn new(store: Arc<dyn WatchStore>, fetcher: Arc<dyn FetchFingerprint>) -> Self {
        Self { store, fetcher }
    }

    fn require_registered(&self, owner: OwnerId) -> Result<(), CommandError> {
        if self.store.account_exists(owner)? {
            Ok(())
        } else {
            Err(CommandError::NotRegistered(owner))
        }
    }

    /// Idempotent: a repeat registration reports `AlreadyStarted`, never errors.
    pub fn register(&self, owner: OwnerId) -> Result<RegisterOutcome, StoreError> {
        if self.store.register_account(owner)? {
            Ok(RegisterOutcome::Registered)
        } else {
            Ok(RegisterOutcome::AlreadyStarted)
        }
    }

    pub fn deregister(&self, owner: OwnerId) -> Result<DeregisterOutcome, StoreError> {
        if self.store.remove_account(owner)? {
            Ok(DeregisterOutcome::Deleted)
        } else {
            Ok(DeregisterOutcome::NothingToDelete)
        }
    }

    /// Follow each URL independently: validate, fetch an initial fingerprint,
    /// insert. The fingerprint stored at creation is the fetch result, so the
    /// first scheduler cycle only fires if the content changes afterwards.
    pub async fn follow(
        &self,
        owner: OwnerId,
        urls: &[String],
    ) -> Result<Vec<(String, FollowOutcome)>, CommandError> {
        self.require_registered(owner)?;

        let mut results = Vec::with_capacity(urls.len());
        for url in urls {
            let outcome = self.follow_one(owner, url).await;
            results.push((url.clone(), outcome));
        }
        Ok(results)
    }

    async fn follow_one(&self, owner: OwnerId, url: &str) -> FollowOutcome {
        match admit_url(url) {
            Err(UrlIssue::Invalid) => return FollowOutcome::InvalidUrl,
            Err(UrlIssue::TooLong) => return FollowOutcome::TooLong,
            Ok(()) => {}
        }
        match self.store.watch_exists(owner, url) {
            Ok(true) => return FollowOutcome::AlreadyExists,
            Ok(false) => {}
            Err(err) => return FollowOutcome::Store(err),
        }
        let fingerprint = match self.fetcher.fetch(url).await {
            Ok(fp) => fp,
            Err(err) => return FollowOutcome::Fetch(err),
        };
        match self.store.insert_watch(owner, url, fingerprint) {
            Ok(true) => FollowOutcome::Followed,
            // Lost a race with a concurrent follow of the same URL.
            Ok(false) => FollowOutcome::AlreadyExists,
            Err(err) => FollowOutcome::Store(err),
        }
    }

    pub async fn unfollow(
        &self,
        owner: OwnerId,
        urls: &[String],
    ) -> Result<Vec<(String, UnfollowOutcome)>, CommandError> {
        self.require_registered(owner)?;

        let mut results = Vec::with_capacity(urls.len());
        for url in urls {
            let outcome = match admit_url(url) {
                Err(UrlIssue::Invalid) => UnfollowOutcome::InvalidUrl,
                Err(UrlIssue::TooLong) => UnfollowOutcome::TooLong,
                Ok(()) => match self.store.remove_watch(owner, url) {
                    Ok(true) => UnfollowOutcome::Unfollowed,
                    Ok(false) => UnfollowOutcome::NotFound,
                    Err(err) => UnfollowOutcome::Store(err),
                },
            };
            results.push((url.clone(), outcome));
        }
        Ok(results)
    }

    pub fn unfollow_all(&self, owner: OwnerId) -> Result<UnfollowAllOutcome, CommandError> {
        self.require_registered(owner)?;
        let removed = self.store.remove_all_watches(owner)?;
        if removed.is_empty() {
            Ok(UnfollowAllOutcome::NothingToUnfollow)
        } else {
            Ok(UnfollowAllOutcome::Removed(removed))
        }
    }

    /// Currently watched URLs in the order they were followed.
    pub fn list(&self, owner: OwnerId) -> Result<Vec<String>, CommandError> {
        self.require_registered(owner)?;
        let urls = self
            .store
            .watches_for(owner)?
            .into_iter()
            .map(|entry| entry.url)
            .collect();
        Ok(urls)
    }
}
