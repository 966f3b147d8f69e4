//! Sett core: graph data model, hash cache, changesets and the store seam

pub mod cache;
pub mod changeset;
pub mod embed;
pub mod error;
pub mod hash;
pub mod memory;
pub mod model;
pub mod store;
pub mod workspace;

#[cfg(test)]
pub mod test_utils;

pub use cache::{Classification, HashCache, hash_cache_path, write_atomic};
pub use changeset::Changeset;
pub use embed::Embedder;
pub use error::{CoreError, EmbedError, StoreError};
pub use hash::content_hash;
pub use memory::MemoryStore;
pub use model::{ContentHash, EdgeKey, EdgeKind, EntityKind, Fingerprint, GraphEdge, GraphNode, Language};
pub use store::{GraphQuery, GraphReader, GraphStore, Neighbor, QueryResult, ScoredNode, StoreStats, cosine_similarity};
pub use workspace::{Binding, WorkspaceRecord, check_binding, workspace_record_path};
