//! Background change-detection and comment-purge cycles.
//!
//! Two independent periodic tasks, each a spawned loop selecting between its
//! timer and a shared shutdown watch channel. The change-detection task runs
//! its first cycle immediately at startup; the purge task waits a full period
//! before its first run.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use vigil_store::{OwnerId, StoreError, WatchStore};

use crate::fetch::FetchFingerprint;
use crate::notify::Notifier;

/// Emitted once per (owner, url) whose fingerprint changed this cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub owner: OwnerId,
    pub url: String,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub checked: usize,
    pub changed: usize,
    pub failed: usize,
}

/// One execution of the periodic scan over all watch rows.
///
/// Rows are processed independently: a fetch failure is logged and the row is
/// skipped for this cycle, never marked changed and never deleted. A differing
/// fingerprint is written back with a row-level compare-and-set before the
/// event fires, so a row that was unfollowed mid-cycle (or already updated by
/// a concurrent cycle) produces no notification.
pub async fn run_cycle(
    store: &dyn WatchStore,
    fetcher: &dyn FetchFingerprint,
    events: &mpsc::UnboundedSender<ChangeEvent>,
) -> Result<CycleSummary, StoreError> {
    let rows = store.all_watches()?;
    let mut summary = CycleSummary {
        checked: rows.len(),
        ..CycleSummary::default()
    };

    for row in rows {
        let current = match fetcher.fetch(&row.url).await {
            Ok(fp) => fp,
            Err(err) => {
                warn!(owner = row.owner, url = %row.url, %err, "fetch failed; skipping row this cycle");
                summary.failed += 1;
                continue;
            }
        };
        if current == row.fingerprint {
            continue;
        }
        if store.update_fingerprint_if(row.owner, &row.url, &row.fingerprint, current)? {
            summary.changed += 1;
            debug!(owner = row.owner, url = %row.url, "change noted");
            // Receiver gone means shutdown; remaining rows still get their
            // store updates on the next cycle.
            let _ = events.send(ChangeEvent {
                owner: row.owner,
                url: row.url,
            });
        }
    }

    Ok(summary)
}

/// Spawn the recurring change-detection task. The first cycle runs
/// immediately; subsequent cycles fire every `period`. Cycles never overlap:
/// a cycle that outlasts the period simply delays the next tick.
pub fn spawn_watch_cycles(
    store: Arc<dyn WatchStore>,
    fetcher: Arc<dyn FetchFingerprint>,
    events: mpsc::UnboundedSender<ChangeEvent>,
    period: Duration,
    shutdown_tx: &watch::Sender<bool>,
) -> JoinHandle<()> {
    let mut rx = shutdown_tx.subscribe();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match run_cycle(store.as_ref(), fetcher.as_ref(), &events).await {
                        Ok(summary) if summary.changed > 0 || summary.failed > 0 => {
                            info!(
                                checked = summary.checked,
                                changed = summary.changed,
                                failed = summary.failed,
                                "change-detection cycle complete"
                            );
                        }
                        Ok(summary) => {
                            debug!(checked = summary.checked, "change-detection cycle complete");
                        }
                        Err(err) => warn!(%err, "change-detection cycle failed"),
                    }
                }
                changed = rx.changed() => {
                    if changed.is_ok() && *rx.borrow() {
                        break;
                    }
                }
            }
        }
    })
}

/// Spawn the recurring comment purge: every `period` (5 days by default) the
/// entire comment table is dropped unconditionally and the operator is told
/// the outcome.
pub fn spawn_comment_purge(
    store: Arc<dyn WatchStore>,
    notifier: Arc<dyn Notifier>,
    operator: OwnerId,
    period: Duration,
    shutdown_tx: &watch::Sender<bool>,
) -> JoinHandle<()> {
    let mut rx = shutdown_tx.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(period) => {
                    let report = match store.purge_comments() {
                        Ok(purged) => {
                            info!(purged, "comment purge complete");
                            format!("Scheduled cleanup: purged {purged} comments.")
                        }
                        Err(err) => {
                            warn!(%err, "comment purge failed");
                            "Scheduled cleanup failed; see server log.".to_string()
                        }
                    };
                    if let Err(err) = notifier.send_text(operator, &report).await {
                        warn!(operator, %err, "could not report purge outcome");
                    }
                }
                changed = rx.changed() => {
                    if changed.is_ok() && *rx.borrow() {
                        break;
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::FetchError;
    use crate::notify::test_support::RecordingNotifier;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use vigil_store::{Fingerprint, MemoryStore};

    #[derive(Default)]
    struct StubFetcher {
        bodies: Mutex<HashMap<String, Vec<u8>>>,
    }

    impl StubFetcher {
        fn set(&self, url: &str, body: &[u8]) {
            self.bodies
                .lock()
                .unwrap()
                .insert(url.to_string(), body.to_vec());
        }
    }

    #[async_trait]
    impl FetchFingerprint for StubFetcher {
        async fn fetch(&self, url: &str) -> Result<Fingerprint, FetchError> {
            match self.bodies.lock().unwrap().get(url) {
                Some(body) => Ok(Fingerprint::digest(body)),
                None => Err(FetchError::Unreachable("no route".into())),
            }
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ChangeEvent>) -> Vec<ChangeEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    #[tokio::test]
    async fn unchanged_content_emits_nothing() {
        let store = MemoryStore::new();
        let fetcher = StubFetcher::default();
        fetcher.set("http://example.com", b"same");
        store.register_account(42).unwrap();
        store
            .insert_watch(42, "http://example.com", Fingerprint::digest(b"same"))
            .unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let summary = run_cycle(&store, &fetcher, &tx).await.unwrap();
        assert_eq!(
            summary,
            CycleSummary {
                checked: 1,
                changed: 0,
                failed: 0
            }
        );
        assert!(drain(&mut rx).is_empty());
        // Fingerprint untouched.
        assert_eq!(
            store.watches_for(42).unwrap()[0].fingerprint,
            Fingerprint::digest(b"same")
        );
    }

    #[tokio::test]
    async fn changed_content_updates_store_and_emits_one_event() {
        let store = MemoryStore::new();
        let fetcher = StubFetcher::default();
        store.register_account(42).unwrap();
        store
            .insert_watch(42, "http://example.com", Fingerprint::digest(b"before"))
            .unwrap();
        fetcher.set("http://example.com", b"after");

        let (tx, mut rx) = mpsc::unbounded_channel();
        let summary = run_cycle(&store, &fetcher, &tx).await.unwrap();
        assert_eq!(summary.changed, 1);

        let events = drain(&mut rx);
        assert_eq!(
            events,
            [ChangeEvent {
                owner: 42,
                url: "http://example.com".to_string()
            }]
        );
        assert_eq!(
            store.watches_for(42).unwrap()[0].fingerprint,
            Fingerprint::digest(b"after")
        );

        // Next cycle over the now-matching fingerprint is quiet.
        let summary = run_cycle(&store, &fetcher, &tx).await.unwrap();
        assert_eq!(summary.changed, 0);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn fetch_failure_skips_row_without_touching_it() {
        let store = MemoryStore::new();
        let fetcher = StubFetcher::default();
        store.register_account(1).unwrap();
        store
            .insert_watch(1, "http://down.example", Fingerprint::digest(b"v1"))
            .unwrap();
        // Second owner's site still reachable and changed.
        store.register_account(2).unwrap();
        store
            .insert_watch(2, "http://up.example", Fingerprint::digest(b"old"))
            .unwrap();
        fetcher.set("http://up.example", b"new");

        let (tx, mut rx) = mpsc::unbounded_channel();
        let summary = run_cycle(&store, &fetcher, &tx).await.unwrap();
        assert_eq!(
            summary,
            CycleSummary {
                checked: 2,
                changed: 1,
                failed: 1
            }
        );
        // Failed row survives with its old fingerprint.
        let kept = store.watches_for(1).unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].fingerprint, Fingerprint::digest(b"v1"));
        // Only the reachable row notified.
        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].owner, 2);
    }

    #[tokio::test]
    async fn row_unfollowed_mid_cycle_produces_no_event() {
        let store = MemoryStore::new();
        let fetcher = StubFetcher::default();
        store.register_account(1).unwrap();
        store
            .insert_watch(1, "http://x.example", Fingerprint::digest(b"old"))
            .unwrap();
        fetcher.set("http://x.example", b"new");

        // Snapshot taken, then the row disappears before the write.
        let rows = store.all_watches().unwrap();
        store.remove_watch(1, "http://x.example").unwrap();
        assert!(!store
            .update_fingerprint_if(
                1,
                "http://x.example",
                &rows[0].fingerprint,
                Fingerprint::digest(b"new")
            )
            .unwrap());
    }

    #[tokio::test]
    async fn purge_task_reports_to_operator() {
        let store = Arc::new(MemoryStore::new());
        store.append_comment(5, "hi", None, None).unwrap();
        let notifier = Arc::new(RecordingNotifier::default());
        let (shutdown_tx, _) = watch::channel(false);

        let handle = spawn_comment_purge(
            store.clone(),
            notifier.clone(),
            999,
            Duration::from_millis(10),
            &shutdown_tx,
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        assert!(store.comments_for(5).unwrap().is_empty());
        let sent = notifier.sent.lock().unwrap();
        assert!(!sent.is_empty());
        assert_eq!(sent[0].0, 999);
        assert!(sent[0].1.contains("purged 1 comments"));
    }

    #[tokio::test]
    async fn watch_task_runs_first_cycle_immediately_and_stops_on_shutdown() {
        let store = Arc::new(MemoryStore::new());
        let fetcher = Arc::new(StubFetcher::default());
        store.register_account(42).unwrap();
        store
            .insert_watch(42, "http://example.com", Fingerprint::digest(b"old"))
            .unwrap();
        fetcher.set("http://example.com", b"new");

        let (tx, mut rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = watch::channel(false);
        let handle = spawn_watch_cycles(
            store.clone(),
            fetcher,
            tx,
            Duration::from_secs(3600),
            &shutdown_tx,
        );

        let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("first cycle should fire without waiting a full period")
            .unwrap();
        assert_eq!(event.owner, 42);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
