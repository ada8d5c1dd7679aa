pub mod mailing_list;
pub mod network;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

pub use mailing_list::MailingList;
pub use network::NetworkMessage;

/// Date given to stubs until the real record arrives (epoch + 1s).
pub fn stub_date() -> DateTime<Utc> {
    DateTime::<Utc>::default() + Duration::seconds(1)
}

/// A message as persisted in the local cache.
///
/// Relationships are plain ids into the store, never owned objects, so a stub
/// can be completed in place without touching anything that points at it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub from: String,
    pub mailing_list: String,
    pub content: String,
    pub subject: String,
    pub archive_url: Option<String>,
    pub date: DateTime<Utc>,
    pub in_reply_to: Option<String>,
    pub references: Vec<String>,
    pub descendants: Vec<String>,
}

impl Message {
    /// An incomplete placeholder that only carries an id.
    pub fn stub(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            from: String::new(),
            mailing_list: String::new(),
            content: String::new(),
            subject: String::new(),
            archive_url: None,
            date: stub_date(),
            in_reply_to: None,
            references: Vec::new(),
            descendants: Vec::new(),
        }
    }

    /// A complete message can be shown without another trip to the backend.
    pub fn is_complete(&self) -> bool {
        !self.id.is_empty()
            && !self.from.is_empty()
            && !self.mailing_list.is_empty()
            && !self.content.is_empty()
            && !self.subject.is_empty()
    }

    pub fn is_root(&self) -> bool {
        self.in_reply_to.is_none()
    }
}
