use rusqlite::Connection;
use tracing::info;

use crate::error::Result;

/// Bumped whenever the layout below changes. Any other stored version is
/// migrated by dropping everything; the cache is refetched from the archive.
pub const SCHEMA_VERSION: i32 = 1;

const MESSAGE_COLUMNS: [&str; 8] = [
    "id",
    "from_address",
    "mailing_list",
    "content",
    "subject",
    "archive_url",
    "date",
    "in_reply_to",
];

pub fn initialize_schema(conn: &Connection) -> Result<()> {
    let stored: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

    if stored != 0 && stored != SCHEMA_VERSION {
        info!(
            "Cache schema version {} does not match {}, wiping cached messages",
            stored, SCHEMA_VERSION
        );
        drop_all(conn)?;
    } else if stored == 0 && has_foreign_layout(conn)? {
        // Written before versioning existed
        info!("Unversioned cache with an unknown layout, wiping cached messages");
        drop_all(conn)?;
    }

    conn.execute_batch("
        -- One row per message id; stubs have empty text columns
        CREATE TABLE IF NOT EXISTS messages (
            id              TEXT PRIMARY KEY NOT NULL,
            from_address    TEXT NOT NULL DEFAULT '',
            mailing_list    TEXT NOT NULL DEFAULT '',
            content         TEXT NOT NULL DEFAULT '',
            subject         TEXT NOT NULL DEFAULT '',
            archive_url     TEXT,
            date            INTEGER NOT NULL DEFAULT 1000,  -- unix epoch ms
            in_reply_to     TEXT REFERENCES messages(id) DEFERRABLE INITIALLY DEFERRED
        );

        CREATE INDEX IF NOT EXISTS idx_messages_list_date   ON messages(mailing_list, date DESC);
        CREATE INDEX IF NOT EXISTS idx_messages_in_reply_to ON messages(in_reply_to);

        -- Ancestor chain as declared by the sender
        CREATE TABLE IF NOT EXISTS message_references (
            message_id      TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
            position        INTEGER NOT NULL,
            reference_id    TEXT NOT NULL REFERENCES messages(id) DEFERRABLE INITIALLY DEFERRED,
            PRIMARY KEY (message_id, reference_id)
        );

        -- Whole thread below a root as declared by the server
        CREATE TABLE IF NOT EXISTS message_descendants (
            message_id      TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
            position        INTEGER NOT NULL,
            descendant_id   TEXT NOT NULL REFERENCES messages(id) DEFERRABLE INITIALLY DEFERRED,
            PRIMARY KEY (message_id, descendant_id)
        );
    ")?;

    conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;

    Ok(())
}

/// True when a `messages` table exists without exactly the expected columns
fn has_foreign_layout(conn: &Connection) -> Result<bool> {
    let mut stmt = conn.prepare("SELECT name FROM pragma_table_info('messages')")?;
    let columns: Vec<String> = stmt
        .query_map([], |row| row.get(0))?
        .collect::<std::result::Result<_, _>>()?;

    if columns.is_empty() {
        return Ok(false);
    }

    let mut expected = MESSAGE_COLUMNS.to_vec();
    let mut found: Vec<&str> = columns.iter().map(String::as_str).collect();
    expected.sort_unstable();
    found.sort_unstable();

    Ok(found != expected)
}

fn drop_all(conn: &Connection) -> Result<()> {
    conn.execute_batch("
        DROP TABLE IF EXISTS message_descendants;
        DROP TABLE IF EXISTS message_references;
        DROP TABLE IF EXISTS messages;
    ")?;
    Ok(())
}
