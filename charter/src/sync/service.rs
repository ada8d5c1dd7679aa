//! Cache-first read path with network write-back
//!
//! Every read ends in the cache. The network only ever feeds the cache, so a
//! caller sees the same shape of data whether the fetch worked or not.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use flume::{Receiver, Sender};
use serde::Serialize;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error, info, warn};

use super::data_source::{CacheDataSource, NetworkDataSource};
use crate::services::query::ThreadQuery;
use crate::services::thread::{assemble_thread, ThreadEntry};
use crate::types::{Message, NetworkMessage};

/// Upper bound on messages fetched when loading a single thread
pub const DEFAULT_THREAD_PAGE_SIZE: u32 = 1000;

/// Network activity, emitted around every archive fetch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SyncEvent {
    FetchStarted,
    /// Sent right before the cache write, whether or not the fetch worked
    FetchEnded { ok: bool, count: usize },
}

pub struct SyncService<C, N> {
    cache: Arc<C>,
    network: Arc<N>,
    /// Held across write-back and the re-read that follows it
    write_lock: AsyncMutex<()>,
    in_flight: AtomicUsize,
    subscribers: Mutex<Vec<Sender<SyncEvent>>>,
    thread_page_size: u32,
}

impl<C, N> SyncService<C, N>
where
    C: CacheDataSource,
    N: NetworkDataSource,
{
    pub fn new(cache: Arc<C>, network: Arc<N>) -> Self {
        Self {
            cache,
            network,
            write_lock: AsyncMutex::new(()),
            in_flight: AtomicUsize::new(0),
            subscribers: Mutex::new(Vec::new()),
            thread_page_size: DEFAULT_THREAD_PAGE_SIZE,
        }
    }

    pub fn with_thread_page_size(mut self, page_size: u32) -> Self {
        self.thread_page_size = page_size;
        self
    }

    pub fn cache(&self) -> Arc<C> {
        self.cache.clone()
    }

    /// Receive network activity events. Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> Receiver<SyncEvent> {
        let (tx, rx) = flume::unbounded();
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.push(tx);
        }
        rx
    }

    /// True while at least one archive fetch is outstanding
    pub fn is_network_active(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst) > 0
    }

    /// Cache only. Never touches the network.
    pub async fn get_cached(&self, query: &ThreadQuery) -> Vec<Message> {
        self.read_cache(query)
    }

    /// Fetch from the archive, write back, then answer from the cache.
    ///
    /// A failed fetch skips the write and returns whatever the cache
    /// already holds for the query.
    pub async fn refresh(&self, query: &ThreadQuery) -> Vec<Message> {
        let fetched = self.fetch(query).await;

        let _guard = self.write_lock.lock().await;
        if let Some(messages) = &fetched {
            self.write_back(messages);
        }
        self.read_cache(query)
    }

    /// Fetch from the archive and return exactly the fetched messages as
    /// cached, in the order the archive returned them.
    pub async fn get_uncached(&self, query: &ThreadQuery) -> Vec<Message> {
        let Some(fetched) = self.fetch(query).await else {
            return Vec::new();
        };

        let order: HashMap<String, usize> = fetched
            .iter()
            .enumerate()
            .map(|(index, message)| (message.id.clone(), index))
            .collect();
        let by_id = ThreadQuery::ids(fetched.iter().map(|m| m.id.clone()).collect());

        let mut messages = {
            let _guard = self.write_lock.lock().await;
            self.write_back(&fetched);
            self.read_cache(&by_id)
        };

        messages.sort_by_key(|m| order.get(&m.id).copied().unwrap_or(usize::MAX));
        messages
    }

    /// Conversation below `root`, refreshed from the archive when the cache
    /// holds fewer complete descendants than the root declares.
    pub async fn load_thread(&self, root: &Message) -> Vec<ThreadEntry> {
        let query = ThreadQuery::descendants_of(root, self.thread_page_size);

        let mut descendants = self.get_cached(&query).await;
        if root.descendants.len() > descendants.len() {
            debug!(
                "Thread {} has {} of {} descendants cached, refreshing",
                root.id,
                descendants.len(),
                root.descendants.len()
            );
            descendants = self.refresh(&query).await;
        }

        assemble_thread(root, &descendants)
    }

    async fn fetch(&self, query: &ThreadQuery) -> Option<Vec<NetworkMessage>> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        self.emit(SyncEvent::FetchStarted);

        let result = self.network.get_threads(query).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match result {
            Ok(messages) => {
                info!("Fetched {} messages from the archive", messages.len());
                self.emit(SyncEvent::FetchEnded {
                    ok: true,
                    count: messages.len(),
                });
                Some(messages)
            }
            Err(e) => {
                warn!("Archive fetch failed, serving cache: {}", e);
                self.emit(SyncEvent::FetchEnded { ok: false, count: 0 });
                None
            }
        }
    }

    fn write_back(&self, messages: &[NetworkMessage]) {
        match self.cache.cache_messages(messages) {
            Ok(written) => debug!("Cached {} of {} fetched messages", written, messages.len()),
            Err(e) => error!("Failed to cache fetched messages: {}", e),
        }
    }

    fn read_cache(&self, query: &ThreadQuery) -> Vec<Message> {
        self.cache.get_threads(query).unwrap_or_else(|e| {
            error!("Cache read failed: {}", e);
            Vec::new()
        })
    }

    fn emit(&self, event: SyncEvent) {
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }
}
