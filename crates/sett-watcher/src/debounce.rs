//! Trailing-edge debouncer for filesystem events
//!
//! Pure state machine: no clock, no I/O. The caller supplies `now` and
//! drives `poll` when the reported deadline passes, so the same code runs
//! under the tokio clock in the service and under plain `Duration`s in
//! tests.

use std::collections::BTreeMap;
use std::ops::Add;
use std::path::PathBuf;
use std::time::Duration;

/// What happened to a path, as far as the indexer cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
}

impl ChangeKind {
    /// Fold a newer event for the same path into an older one.
    pub fn merge(self, newer: ChangeKind) -> ChangeKind {
        use ChangeKind::*;
        match (self, newer) {
            (Created, Modified) => Created,
            (Deleted, Created) | (Deleted, Modified) => Modified,
            (Modified, Created) => Modified,
            (_, Deleted) => Deleted,
            (same, _) => same,
        }
    }
}

/// Paths collected during one debounce window.
pub type Batch = BTreeMap<PathBuf, ChangeKind>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State<I> {
    Idle,
    Pending { deadline: I },
}

/// Collects events until the window has been quiet, then hands out one
/// batch. At most one batch is outstanding; a window that closes while a
/// pass is running is queued and released by `on_pass_complete`.
#[derive(Debug)]
pub struct Debouncer<I> {
    window: Duration,
    state: State<I>,
    pending: Batch,
    queued: Batch,
    running: bool,
}

impl<I> Debouncer<I>
where
    I: Copy + Ord + Add<Duration, Output = I>,
{
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            state: State::Idle,
            pending: Batch::new(),
            queued: Batch::new(),
            running: false,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Record an event and push the deadline to `now + window`.
    pub fn on_event(&mut self, path: PathBuf, kind: ChangeKind, now: I) {
        merge_one(&mut self.pending, path, kind);
        self.state = State::Pending {
            deadline: now + self.window,
        };
    }

    /// When the next `poll` can fire, if anything is pending.
    pub fn deadline(&self) -> Option<I> {
        match self.state {
            State::Idle => None,
            State::Pending { deadline } => Some(deadline),
        }
    }

    /// Close the window if its deadline has passed. Returns a batch to run
    /// now, or `None` when the window is still open, nothing is pending, or
    /// a pass is already running (the batch is queued instead).
    pub fn poll(&mut self, now: I) -> Option<Batch> {
        let State::Pending { deadline } = self.state else {
            return None;
        };
        if now < deadline {
            return None;
        }
        self.state = State::Idle;
        let batch = std::mem::take(&mut self.pending);
        if batch.is_empty() {
            return None;
        }
        if self.running {
            merge_into(&mut self.queued, batch);
            return None;
        }
        self.running = true;
        Some(batch)
    }

    /// The outstanding pass finished. Releases the queued batch, if any.
    pub fn on_pass_complete(&mut self) -> Option<Batch> {
        self.running = false;
        if self.queued.is_empty() {
            return None;
        }
        self.running = true;
        Some(std::mem::take(&mut self.queued))
    }

    /// The outstanding pass failed. Its paths go back into the pending set
    /// without arming the timer, so they ride along with the next trigger.
    pub fn on_pass_failed(&mut self, batch: Batch) -> Option<Batch> {
        let newer = std::mem::replace(&mut self.pending, batch);
        merge_into(&mut self.pending, newer);
        self.on_pass_complete()
    }

    /// Take everything not yet run, queued and pending, as one last batch.
    /// Only meaningful once no pass is outstanding.
    pub fn flush(&mut self) -> Option<Batch> {
        self.state = State::Idle;
        let mut batch = std::mem::take(&mut self.queued);
        merge_into(&mut batch, std::mem::take(&mut self.pending));
        if batch.is_empty() {
            return None;
        }
        self.running = true;
        Some(batch)
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn queued_len(&self) -> usize {
        self.queued.len()
    }
}

fn merge_one(batch: &mut Batch, path: PathBuf, kind: ChangeKind) {
    batch
        .entry(path)
        .and_modify(|old| *old = old.merge(kind))
        .or_insert(kind);
}

fn merge_into(older: &mut Batch, newer: Batch) {
    for (path, kind) in newer {
        merge_one(older, path, kind);
    }
}
