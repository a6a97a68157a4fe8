//! Bounded per-user feedback log.

use std::sync::Arc;

use tracing::warn;

use vigil_store::{CommentEntry, OwnerId, WatchStore};

use crate::manager::CommandError;
use crate::notify::Notifier;

#[derive(Debug, PartialEq, Eq)]
pub enum SubmitOutcome {
    Stored,
    QuotaExceeded,
}

pub struct CommentLedger {
    store: Arc<dyn WatchStore>,
    notifier: Arc<dyn Notifier>,
    operator: OwnerId,
}

impl CommentLedger {
    pub fn new(store: Arc<dyn WatchStore>, notifier: Arc<dyn Notifier>, operator: OwnerId) -> Self {
        Self {
            store,
            notifier,
            operator,
        }
    }

    /// Forward `text` to the operator, then append it to the owner's log.
    ///
    /// The operator forward is best-effort and happens first, independent of
    /// the storage outcome: a quota-rejected comment still reaches the
    /// operator. Handle and display name are backfilled opportunistically
    /// when the transport supplies them.
    pub async fn submit(
        &self,
        owner: OwnerId,
        text: &str,
        handle: Option<&str>,
        display_name: Option<&str>,
    ) -> Result<SubmitOutcome, CommandError> {
        if !self.store.account_exists(owner)? {
            return Err(CommandError::NotRegistered(owner));
        }

        let who = handle
            .or(display_name)
            .map(str::to_string)
            .unwrap_or_else(|| owner.to_string());
        let forward = format!("Comment from {who}:\n{text}");
        if let Err(err) = self.notifier.send_text(self.operator, &forward).await {
            warn!(owner, %err, "could not forward comment to operator");
        }

        if self.store.append_comment(owner, text, handle, display_name)? {
            Ok(SubmitOutcome::Stored)
        } else {
            Ok(SubmitOutcome::QuotaExceeded)
        }
    }

    /// All comments of `owner` in creation order.
    pub fn list(&self, owner: OwnerId) -> Result<Vec<CommentEntry>, CommandError> {
        if !self.store.account_exists(owner)? {
            return Err(CommandError::NotRegistered(owner));
        }
        Ok(self.store.comments_for(owner)?)
    }
}
