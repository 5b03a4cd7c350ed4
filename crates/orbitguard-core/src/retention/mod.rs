//! Adaptive retention: decay, recurrence scoring, pinning and the store.

pub mod decay;
pub mod error;
mod eviction;
pub mod index;
pub mod policy;
pub mod recurrence;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use index::{cosine_similarity, SimilarityIndex};
pub use policy::RetentionPolicy;
pub use recurrence::{RecurrenceTracker, ResonanceParams};
pub use store::{
    AdaptiveStore, EvictionReport, OutcomeSummary, RecalledEvent, SnapshotEntry, StoreHandle,
    StoreSnapshot,
};
