//! Filesystem watching and debounced incremental passes

pub mod debounce;
pub mod service;
pub mod watcher;

pub use debounce::{Batch, ChangeKind, Debouncer};
pub use service::{PassRunner, WatcherService};
pub use watcher::{FileWatcher, PathEvent};
