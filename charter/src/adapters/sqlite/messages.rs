//! Persisted message graph
//!
//! Messages live in one table keyed by id; `in_reply_to` is a column and the
//! `references`/`descendants` lists are edge tables. Every id a message
//! mentions exists as a row, either complete or as an empty stub, so edges
//! never dangle and a stub is promoted by updating its row in place.

use std::collections::HashSet;
use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use tracing::{debug, warn};

use super::pool::{create_memory_pool, create_pool, DbConnection, DbPool};
use super::schema::initialize_schema;
use crate::error::{CharterError, Result};
use crate::services::query::{LocalQuery, ThreadQuery};
use crate::sync::CacheDataSource;
use crate::types::{stub_date, Message, NetworkMessage};

const MESSAGE_COLUMNS: &str =
    "id, from_address, mailing_list, content, subject, archive_url, date, in_reply_to";

/// An edge table and the column holding the far end of the edge
#[derive(Clone, Copy)]
enum Link {
    References,
    Descendants,
}

impl Link {
    fn table(&self) -> &'static str {
        match self {
            Link::References => "message_references",
            Link::Descendants => "message_descendants",
        }
    }

    fn target_column(&self) -> &'static str {
        match self {
            Link::References => "reference_id",
            Link::Descendants => "descendant_id",
        }
    }
}

/// SQLite-backed cache of the archive's message graph
pub struct MessageStore {
    pool: DbPool,
}

impl MessageStore {
    /// Open (or create) the cache at the given path
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let pool = create_pool(path.as_ref())?;
        Self::from_pool(pool)
    }

    /// Create an in-memory cache (for testing)
    pub fn in_memory() -> Result<Self> {
        Self::from_pool(create_memory_pool()?)
    }

    fn from_pool(pool: DbPool) -> Result<Self> {
        let store = Self { pool };
        initialize_schema(&*store.connection()?)?;
        Ok(store)
    }

    fn connection(&self) -> Result<DbConnection> {
        Ok(self.pool.get()?)
    }

    /// Insert or merge a network message, creating stubs for every id it
    /// mentions that the cache has not seen yet.
    ///
    /// All writes happen in one transaction: the message row, the stubs and
    /// the rewired edges become visible together or not at all.
    pub fn upsert(&self, incoming: &NetworkMessage) -> Result<Message> {
        incoming.validate()?;

        let conn = self.connection()?;
        let tx = conn.unchecked_transaction()?;

        let stub_millis = stub_date().timestamp_millis();

        // Empty incoming values never blank stored ones
        tx.execute(
            "INSERT INTO messages (id, from_address, mailing_list, content, subject,
                archive_url, date, in_reply_to)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO UPDATE SET
                from_address = CASE WHEN excluded.from_address != '' THEN excluded.from_address ELSE messages.from_address END,
                mailing_list = CASE WHEN excluded.mailing_list != '' THEN excluded.mailing_list ELSE messages.mailing_list END,
                content = CASE WHEN excluded.content != '' THEN excluded.content ELSE messages.content END,
                subject = CASE WHEN excluded.subject != '' THEN excluded.subject ELSE messages.subject END,
                archive_url = COALESCE(excluded.archive_url, messages.archive_url),
                date = CASE WHEN excluded.date != ?9 THEN excluded.date ELSE messages.date END,
                in_reply_to = COALESCE(excluded.in_reply_to, messages.in_reply_to)",
            params![
                incoming.id,
                incoming.from,
                incoming.mailing_list,
                incoming.content,
                incoming.subject,
                incoming.archive_url,
                incoming.date.timestamp_millis(),
                incoming.in_reply_to,
                stub_millis,
            ],
        )?;

        let mut stubs_created = 0;
        for id in linked_ids(incoming) {
            // A message never stubs itself, whatever its own lists say
            if id == incoming.id {
                continue;
            }
            stubs_created += tx.execute(
                "INSERT OR IGNORE INTO messages (id, date) VALUES (?1, ?2)",
                params![id, stub_millis],
            )?;
        }

        replace_links(&tx, Link::Descendants, &incoming.id, &incoming.descendants)?;
        replace_links(&tx, Link::References, &incoming.id, &incoming.references)?;

        tx.commit()?;

        debug!(
            "Upserted message {} ({} new stubs, {} descendants, {} references)",
            incoming.id,
            stubs_created,
            incoming.descendants.len(),
            incoming.references.len()
        );

        load_message(&conn, &incoming.id)?
            .ok_or_else(|| CharterError::NotFound(incoming.id.clone()))
    }

    /// Filter, sort and paginate the cached messages.
    pub fn query(&self, query: &LocalQuery) -> Result<Vec<Message>> {
        let (where_clause, values) = query.where_clause();
        let sql = format!(
            "SELECT {} FROM messages WHERE {} ORDER BY {} LIMIT {} OFFSET {}",
            MESSAGE_COLUMNS,
            where_clause,
            query.order_clause(),
            query.page_size,
            query.offset()
        );

        let conn = self.connection()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            let mut message = row?;
            attach_links(&conn, &mut message)?;
            messages.push(message);
        }

        Ok(messages)
    }

    /// Look up a single message, stub or complete
    pub fn get(&self, id: &str) -> Result<Option<Message>> {
        let conn = self.connection()?;
        load_message(&conn, id)
    }

    /// Number of cached rows, stubs included
    pub fn count(&self) -> Result<usize> {
        let conn = self.connection()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

impl CacheDataSource for MessageStore {
    fn get_threads(&self, query: &ThreadQuery) -> Result<Vec<Message>> {
        self.query(&query.local_query())
    }

    /// Upserts each message on its own. A message that fails validation is
    /// dropped and the rest are still written.
    fn cache_messages(&self, messages: &[NetworkMessage]) -> Result<usize> {
        let mut written = 0;

        for message in messages {
            match self.upsert(message) {
                Ok(_) => written += 1,
                Err(CharterError::Validation(reason)) => {
                    warn!("Dropping invalid message {:?}: {}", message.id, reason);
                }
                Err(e) => return Err(CharterError::CacheWrite(e.to_string())),
            }
        }

        Ok(written)
    }
}

/// Every id a message points at, first mention wins
fn linked_ids(message: &NetworkMessage) -> Vec<&str> {
    let mut seen = HashSet::new();
    message
        .descendants
        .iter()
        .chain(message.references.iter())
        .chain(message.in_reply_to.iter())
        .map(String::as_str)
        .filter(|id| seen.insert(*id))
        .collect()
}

/// An empty incoming list leaves the stored edges alone.
fn replace_links(conn: &Connection, link: Link, message_id: &str, targets: &[String]) -> Result<()> {
    if targets.is_empty() {
        return Ok(());
    }

    conn.execute(
        &format!("DELETE FROM {} WHERE message_id = ?1", link.table()),
        params![message_id],
    )?;

    let sql = format!(
        "INSERT OR IGNORE INTO {} (message_id, position, {}) VALUES (?1, ?2, ?3)",
        link.table(),
        link.target_column()
    );
    let mut stmt = conn.prepare(&sql)?;
    for (position, target) in targets.iter().enumerate() {
        stmt.execute(params![message_id, position as i64, target])?;
    }

    Ok(())
}

fn load_links(conn: &Connection, link: Link, message_id: &str) -> Result<Vec<String>> {
    let sql = format!(
        "SELECT {} FROM {} WHERE message_id = ?1 ORDER BY position ASC",
        link.target_column(),
        link.table()
    );
    let mut stmt = conn.prepare(&sql)?;
    let ids = stmt
        .query_map(params![message_id], |row| row.get(0))?
        .collect::<std::result::Result<Vec<String>, _>>()?;
    Ok(ids)
}

fn attach_links(conn: &Connection, message: &mut Message) -> Result<()> {
    message.references = load_links(conn, Link::References, &message.id)?;
    message.descendants = load_links(conn, Link::Descendants, &message.id)?;
    Ok(())
}

fn load_message(conn: &Connection, id: &str) -> Result<Option<Message>> {
    let sql = format!("SELECT {} FROM messages WHERE id = ?1", MESSAGE_COLUMNS);
    let message = conn.query_row(&sql, params![id], row_to_message).optional()?;

    match message {
        Some(mut message) => {
            attach_links(conn, &mut message)?;
            Ok(Some(message))
        }
        None => Ok(None),
    }
}

fn row_to_message(row: &Row) -> std::result::Result<Message, rusqlite::Error> {
    let millis: i64 = row.get(6)?;
    Ok(Message {
        id: row.get(0)?,
        from: row.get(1)?,
        mailing_list: row.get(2)?,
        content: row.get(3)?,
        subject: row.get(4)?,
        archive_url: row.get(5)?,
        date: DateTime::<Utc>::from_timestamp_millis(millis).unwrap_or_else(stub_date),
        in_reply_to: row.get(7)?,
        references: Vec::new(),
        descendants: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::query::{ReplyFilter, SortField};

    fn network(id: &str, list: &str, millis: i64) -> NetworkMessage {
        NetworkMessage {
            id: id.to_string(),
            from: format!("{} at example.com (Sender {})", id, id),
            mailing_list: list.to_string(),
            content: format!("Body of {}", id),
            archive_url: None,
            date: DateTime::from_timestamp_millis(millis).unwrap(),
            subject: format!("Subject {}", id),
            in_reply_to: None,
            references: Vec::new(),
            descendants: Vec::new(),
        }
    }

    fn ids(messages: &[Message]) -> Vec<&str> {
        messages.iter().map(|m| m.id.as_str()).collect()
    }

    #[test]
    fn test_upsert_creates_stubs_for_links() {
        let store = MessageStore::in_memory().unwrap();

        let mut root = network("root", "swift-dev", 1_000_000);
        root.descendants = vec!["r1".to_string(), "r2".to_string()];
        root.references = vec!["older".to_string()];

        let saved = store.upsert(&root).unwrap();
        assert!(saved.is_complete());
        assert_eq!(saved.descendants, vec!["r1", "r2"]);
        assert_eq!(saved.references, vec!["older"]);
        assert_eq!(store.count().unwrap(), 4);

        let stub = store.get("r1").unwrap().expect("stub exists");
        assert!(!stub.is_complete());
        assert_eq!(stub.date, stub_date());
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let store = MessageStore::in_memory().unwrap();

        let mut msg = network("a", "swift-dev", 5_000);
        msg.in_reply_to = Some("parent".to_string());
        msg.references = vec!["parent".to_string()];
        msg.descendants = vec!["child".to_string()];

        let first = store.upsert(&msg).unwrap();
        let second = store.upsert(&msg).unwrap();

        assert_eq!(first, second);
        assert_eq!(store.count().unwrap(), 3);
        assert_eq!(second.references, vec!["parent"]);
    }

    #[test]
    fn test_stub_is_completed_in_place() {
        let store = MessageStore::in_memory().unwrap();

        let mut reply = network("reply", "swift-dev", 10_000);
        reply.in_reply_to = Some("root".to_string());
        store.upsert(&reply).unwrap();
        assert!(!store.get("root").unwrap().unwrap().is_complete());

        let root = network("root", "swift-dev", 5_000);
        store.upsert(&root).unwrap();

        let root = store.get("root").unwrap().unwrap();
        assert!(root.is_complete());
        assert_eq!(root.date.timestamp_millis(), 5_000);

        // The edge created while root was a stub still resolves
        let reply = store.get("reply").unwrap().unwrap();
        assert_eq!(reply.in_reply_to.as_deref(), Some("root"));
        assert_eq!(store.count().unwrap(), 2);
    }

    #[test]
    fn test_incomplete_record_never_blanks_complete_fields() {
        let store = MessageStore::in_memory().unwrap();

        let mut complete = network("m", "swift-users", 7_000);
        complete.archive_url = Some("https://lists.swift.org/m.html".to_string());
        complete.in_reply_to = Some("p".to_string());
        store.upsert(&complete).unwrap();

        let partial = NetworkMessage {
            id: "m".to_string(),
            from: String::new(),
            mailing_list: String::new(),
            content: String::new(),
            archive_url: None,
            date: stub_date(),
            subject: String::new(),
            in_reply_to: None,
            references: Vec::new(),
            descendants: Vec::new(),
        };
        store.upsert(&partial).unwrap();

        let stored = store.get("m").unwrap().unwrap();
        assert!(stored.is_complete());
        assert_eq!(stored.from, complete.from);
        assert_eq!(stored.subject, complete.subject);
        assert_eq!(stored.archive_url, complete.archive_url);
        assert_eq!(stored.in_reply_to.as_deref(), Some("p"));
        assert_eq!(stored.date.timestamp_millis(), 7_000);
    }

    #[test]
    fn test_linking_to_complete_message_keeps_it_complete() {
        let store = MessageStore::in_memory().unwrap();
        store.upsert(&network("root", "swift-dev", 1_000_000)).unwrap();

        let mut reply = network("reply", "swift-dev", 2_000_000);
        reply.in_reply_to = Some("root".to_string());
        reply.references = vec!["root".to_string()];
        store.upsert(&reply).unwrap();

        assert!(store.get("root").unwrap().unwrap().is_complete());
    }

    #[test]
    fn test_self_reference_does_not_shadow_message() {
        let store = MessageStore::in_memory().unwrap();

        let mut msg = network("self", "swift-dev", 3_000);
        msg.references = vec!["self".to_string()];
        msg.descendants = vec!["self".to_string(), "other".to_string()];

        let saved = store.upsert(&msg).unwrap();
        assert!(saved.is_complete());
        assert_eq!(saved.descendants, vec!["self", "other"]);
        assert_eq!(store.count().unwrap(), 2);
    }

    #[test]
    fn test_invalid_message_writes_nothing() {
        let store = MessageStore::in_memory().unwrap();

        let mut msg = network("bad", "swift-dev", 3_000);
        msg.descendants = vec!["fine".to_string(), String::new()];

        assert!(matches!(store.upsert(&msg), Err(CharterError::Validation(_))));
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_descendant_list_is_replaced_not_appended() {
        let store = MessageStore::in_memory().unwrap();

        let mut root = network("root", "swift-dev", 1_000);
        root.descendants = vec!["a".to_string()];
        store.upsert(&root).unwrap();

        root.descendants = vec!["a".to_string(), "b".to_string()];
        let saved = store.upsert(&root).unwrap();
        assert_eq!(saved.descendants, vec!["a", "b"]);
    }

    #[test]
    fn test_pagination_bounds() {
        let store = MessageStore::in_memory().unwrap();
        for i in 0..25 {
            store.upsert(&network(&format!("m{:02}", i), "swift-dev", 1_000 + i)).unwrap();
        }

        let page = |n| {
            ThreadQuery::builder()
                .mailing_list("swift-dev")
                .page(n)
                .page_size(10)
                .build()
                .local_query()
        };

        assert_eq!(store.query(&page(1)).unwrap().len(), 10);
        assert_eq!(store.query(&page(3)).unwrap().len(), 5);
        assert!(store.query(&page(4)).unwrap().is_empty());
        assert_eq!(ids(&store.query(&page(3)).unwrap())[0], "m20");
    }

    #[test]
    fn test_filters_sort_and_insertion_order() {
        let store = MessageStore::in_memory().unwrap();

        store.upsert(&network("late", "swift-dev", 3_000)).unwrap();
        store.upsert(&network("early", "swift-dev", 1_000)).unwrap();
        store.upsert(&network("other", "swift-users", 2_000)).unwrap();

        let mut reply = network("reply", "swift-dev", 4_000);
        reply.in_reply_to = Some("early".to_string());
        store.upsert(&reply).unwrap();

        // No sort: insertion order
        let all = store.query(&ThreadQuery::builder().build().local_query()).unwrap();
        assert_eq!(ids(&all), vec!["late", "early", "other", "reply"]);

        let roots = ThreadQuery::builder()
            .mailing_list("swift-dev")
            .in_reply_to(ReplyFilter::Root)
            .sort_by(SortField::Date, true)
            .build();
        assert_eq!(ids(&store.get_threads(&roots).unwrap()), vec!["early", "late"]);

        let replies = ThreadQuery::builder()
            .in_reply_to(ReplyFilter::Parent("early".to_string()))
            .build();
        assert_eq!(ids(&store.get_threads(&replies).unwrap()), vec!["reply"]);

        let newest = ThreadQuery::builder().sort_by(SortField::Date, false).build();
        assert_eq!(ids(&store.get_threads(&newest).unwrap())[0], "reply");
    }

    #[test]
    fn test_only_complete_with_and_without_id_filter() {
        let store = MessageStore::in_memory().unwrap();

        let mut root = network("root", "swift-dev", 1_000);
        root.descendants = vec!["root".to_string(), "a".to_string(), "b".to_string()];
        store.upsert(&root).unwrap();
        store.upsert(&network("a", "swift-dev", 2_000)).unwrap();

        let by_ids = |only_complete| {
            ThreadQuery::builder()
                .id_in(["root", "a", "b"])
                .only_complete(only_complete)
                .build()
        };
        assert_eq!(store.get_threads(&by_ids(false)).unwrap().len(), 3);
        assert_eq!(ids(&store.get_threads(&by_ids(true)).unwrap()), vec!["root", "a"]);

        let complete = ThreadQuery::builder().only_complete(true).build();
        assert_eq!(ids(&store.get_threads(&complete).unwrap()), vec!["root", "a"]);

        let everything = ThreadQuery::builder().build();
        assert_eq!(store.get_threads(&everything).unwrap().len(), 3);
    }

    #[test]
    fn test_phrase_search_over_cache() {
        let store = MessageStore::in_memory().unwrap();

        let mut pitch = network("pitch", "swift-evolution", 1_000);
        pitch.subject = "[Pitch] Typed Throws".to_string();
        store.upsert(&pitch).unwrap();

        let mut sale = network("sale", "swift-evolution", 2_000);
        sale.content = "Now 50% off, typed throws included".to_string();
        store.upsert(&sale).unwrap();

        let mut decoy = network("decoy", "swift-evolution", 3_000);
        decoy.content = "Now 50 percent off".to_string();
        store.upsert(&decoy).unwrap();

        let search = |phrase| ThreadQuery::search("swift-evolution", phrase);
        assert_eq!(ids(&store.get_threads(&search("typed THROWS")).unwrap()), vec!["pitch", "sale"]);
        assert_eq!(ids(&store.get_threads(&search("50% off")).unwrap()), vec!["sale"]);
        assert_eq!(ids(&store.get_threads(&search("sender decoy")).unwrap()), vec!["decoy"]);
        assert!(store.get_threads(&search("throws_")).unwrap().is_empty());
    }

    #[test]
    fn test_sql_filters_agree_with_in_memory_matches() {
        let store = MessageStore::in_memory().unwrap();

        let mut root = network("root", "swift-dev", 1_000);
        root.descendants = vec!["root".to_string(), "r1".to_string(), "ghost".to_string()];
        store.upsert(&root).unwrap();

        let mut r1 = network("r1", "swift-dev", 2_000);
        r1.in_reply_to = Some("root".to_string());
        r1.content = "Agreed, ship it".to_string();
        store.upsert(&r1).unwrap();

        store.upsert(&network("solo", "swift-users", 3_000)).unwrap();

        let all = store
            .query(&ThreadQuery::builder().page_size(100).build().local_query())
            .unwrap();
        assert_eq!(all.len(), 4);

        let queries = vec![
            ThreadQuery::builder().mailing_list("swift-dev"),
            ThreadQuery::builder().in_reply_to(ReplyFilter::Root),
            ThreadQuery::builder().in_reply_to(ReplyFilter::Parent("root".to_string())),
            ThreadQuery::builder().id_in(["root", "ghost", "solo"]),
            ThreadQuery::builder().id_in(["root", "ghost"]).only_complete(true),
            ThreadQuery::builder().only_complete(true).in_reply_to(ReplyFilter::Root),
            ThreadQuery::builder().mailing_list("swift-dev").phrase("SHIP IT"),
            ThreadQuery::builder().phrase("sender solo"),
        ];

        for builder in queries {
            let local = builder.page_size(100).build().local_query();
            let expected: Vec<&str> = all
                .iter()
                .filter(|m| local.matches(m))
                .map(|m| m.id.as_str())
                .collect();

            let found = store.query(&local).unwrap();
            assert_eq!(ids(&found), expected, "{:?}", local.filters);
        }
    }

    #[test]
    fn test_cache_messages_skips_invalid() {
        let store = MessageStore::in_memory().unwrap();

        let mut bad = network("", "swift-dev", 1_000);
        bad.id.clear();
        let batch = vec![network("a", "swift-dev", 1_000), bad, network("b", "swift-dev", 2_000)];

        assert_eq!(store.cache_messages(&batch).unwrap(), 2);
        assert_eq!(store.count().unwrap(), 2);
    }
}
