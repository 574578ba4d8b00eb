pub mod broadcaster;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod indexer;
pub mod models;
pub mod store;

pub use broadcaster::{EventBroadcaster, Subscription, SubscriptionHandle};
pub use config::RebuildConfig;
pub use coordinator::{RebuildCoordinator, RebuildSession};
pub use error::{CoordinatorError, SourceError, StoreError};
pub use indexer::{DocumentSource, Indexer};
pub use models::{
    DocumentId, DocumentRecord, DocumentState, EventEnvelope, IndexCounters, IndexEvent,
    ProgressSnapshot, RebuildOutcome, SummaryEvent,
};
pub use store::{IndexStore, UpsertMode};
