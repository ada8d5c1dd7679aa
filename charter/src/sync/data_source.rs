use async_trait::async_trait;

use crate::error::Result;
use crate::services::query::ThreadQuery;
use crate::types::{Message, NetworkMessage};

/// Local persisted message graph.
///
/// Calls are synchronous and short; the orchestrator serializes writes so
/// implementations only need to be safe to share.
pub trait CacheDataSource: Send + Sync {
    /// Messages matching the query's local projection, sorted and paginated.
    fn get_threads(&self, query: &ThreadQuery) -> Result<Vec<Message>>;

    /// Upsert a batch, returning how many messages were written. Invalid
    /// messages are skipped; any other failure aborts the batch.
    fn cache_messages(&self, messages: &[NetworkMessage]) -> Result<usize>;
}

/// Remote archive
#[async_trait]
pub trait NetworkDataSource: Send + Sync {
    async fn get_threads(&self, query: &ThreadQuery) -> Result<Vec<NetworkMessage>>;
}
