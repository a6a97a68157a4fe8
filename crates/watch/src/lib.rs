pub mod fetch;
pub mod ledger;
pub mod manager;
pub mod notify;
pub mod scheduler;

pub use fetch::{FetchError, FetchFingerprint, HttpFetcher};
pub use ledger::{CommentLedger, SubmitOutcome};
pub use manager::{
    CommandError, DeregisterOutcome, FollowOutcome, RegisterOutcome, UnfollowAllOutcome,
    UnfollowOutcome, WatchListManager, MAX_URL_LEN,
};
pub use notify::{broadcast, spawn_dispatcher, Notifier};
pub use scheduler::{
    run_cycle, spawn_comment_purge, spawn_watch_cycles, ChangeEvent, CycleSummary,
};
