//! Drives incremental passes from debounced watch events

use async_trait::async_trait;
use sett_indexer::{IndexError, Indexer, PassReport, PassScope};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::debounce::{Batch, Debouncer};
use crate::watcher::PathEvent;

/// Runs one incremental pass over a set of changed paths.
#[async_trait]
pub trait PassRunner: Send + Sync + 'static {
    async fn run_paths(&self, paths: Vec<PathBuf>) -> Result<PassReport, IndexError>;
}

#[async_trait]
impl PassRunner for Indexer {
    async fn run_paths(&self, paths: Vec<PathBuf>) -> Result<PassReport, IndexError> {
        // Watch-triggered passes never rebind a workspace
        self.run(PassScope::Paths(paths), false).await
    }
}

/// Consumes path events, debounces them and runs one pass per quiet
/// window. Passes run on their own task so events keep aggregating.
pub struct WatcherService<R: PassRunner> {
    runner: Arc<R>,
    window: Duration,
}

impl<R: PassRunner> WatcherService<R> {
    pub fn new(runner: Arc<R>, window: Duration) -> Self {
        Self { runner, window }
    }

    /// Run until the event channel closes, then wait for any pass still
    /// in flight.
    pub async fn run(self, mut events: mpsc::UnboundedReceiver<PathEvent>) {
        let mut debouncer = Debouncer::<Instant>::new(self.window);
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();
        info!("Watcher service started (window {:?})", self.window);

        loop {
            let deadline = debouncer.deadline();
            let timer = async move {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                ev = events.recv() => match ev {
                    Some(ev) => {
                        debug!("Change {:?} {}", ev.kind, ev.path.display());
                        debouncer.on_event(ev.path, ev.kind, Instant::now());
                    }
                    None => break,
                },
                _ = timer => {
                    if let Some(batch) = debouncer.poll(Instant::now()) {
                        self.spawn_pass(batch, &done_tx);
                    } else if debouncer.is_running() {
                        debug!("Pass in progress; queued {} paths", debouncer.queued_len());
                    }
                }
                Some((batch, result)) = done_rx.recv() => {
                    let next = Self::finish(&mut debouncer, batch, result);
                    if let Some(batch) = next {
                        self.spawn_pass(batch, &done_tx);
                    }
                }
            }
        }

        // Let the outstanding pass and anything it queued finish
        while debouncer.is_running() {
            let Some((batch, result)) = done_rx.recv().await else {
                break;
            };
            if let Some(next) = Self::finish(&mut debouncer, batch, result) {
                self.spawn_pass(next, &done_tx);
            }
        }
        if let Some(batch) = debouncer.flush() {
            info!("Indexing {} remaining paths before shutdown", batch.len());
            let paths = batch.keys().cloned().collect();
            if let Err(e) = self.runner.run_paths(paths).await {
                warn!("Final pass failed, {} paths left unindexed: {}", batch.len(), e);
            }
        }
        info!("Watcher service stopped");
    }

    fn spawn_pass(
        &self,
        batch: Batch,
        done_tx: &mpsc::UnboundedSender<(Batch, Result<PassReport, IndexError>)>,
    ) {
        let runner = self.runner.clone();
        let done_tx = done_tx.clone();
        info!("Triggering incremental pass over {} paths", batch.len());
        tokio::spawn(async move {
            let paths = batch.keys().cloned().collect();
            let result = runner.run_paths(paths).await;
            // The service loop owns the receiver; a send error means it is gone
            let _ = done_tx.send((batch, result));
        });
    }

    fn finish(
        debouncer: &mut Debouncer<Instant>,
        batch: Batch,
        result: Result<PassReport, IndexError>,
    ) -> Option<Batch> {
        match result {
            Ok(report) => {
                debug!(
                    "Pass {} done: {} files parsed, {} deleted",
                    report.sequence, report.files_parsed, report.files_deleted
                );
                debouncer.on_pass_complete()
            }
            Err(e) => {
                warn!("Incremental pass failed: {}", e);
                debouncer.on_pass_failed(batch)
            }
        }
    }
}
