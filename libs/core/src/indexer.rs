use crate::error::SourceError;
use crate::models::DocumentId;
use async_trait::async_trait;

/// Produces the full document set for a rebuild, in processing order.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    async fn enumerate(&self) -> Result<Vec<DocumentId>, SourceError>;
}

/// The actual content extraction work for one document.
///
/// May be slow and may fail; an `Err` carries the failure reason recorded on
/// the document. No store lock is held while this runs.
#[async_trait]
pub trait Indexer: Send + Sync {
    async fn index(&self, document: &DocumentId) -> Result<(), String>;
}
