//! Wire format of the archive API
//!
//! The backend is a RESTHeart-style collection: documents carry their id in
//! `_id`, dates as `{"$date": <millis>}`, and listings wrap documents in
//! `{"_embedded": {"rh:doc": [...]}}`.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::error::{CharterError, Result};

/// A message as received from the network. Never persisted directly; the
/// store turns it into a [`crate::types::Message`] plus stubs for every id it
/// mentions.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkMessage {
    pub id: String,
    pub from: String,
    pub mailing_list: String,
    pub content: String,
    pub archive_url: Option<String>,
    pub date: DateTime<Utc>,
    pub subject: String,
    pub in_reply_to: Option<String>,
    pub references: Vec<String>,
    pub descendants: Vec<String>,
}

#[derive(Deserialize)]
struct RawNetworkMessage {
    #[serde(rename = "_id")]
    id: Option<String>,
    from: Option<String>,
    #[serde(rename = "mailingList")]
    mailing_list: Option<String>,
    content: Option<String>,
    subject: Option<String>,
    #[serde(rename = "archiveURL")]
    archive_url: Option<String>,
    date: Option<Value>,
    #[serde(rename = "inReplyTo")]
    in_reply_to: Option<String>,
    references: Option<Vec<String>>,
    descendants: Option<Vec<String>>,
}

fn required(field: &str, value: Option<String>) -> Result<String> {
    value.ok_or_else(|| CharterError::Validation(format!("missing required field: {}", field)))
}

fn parse_date(value: Option<&Value>) -> Result<DateTime<Utc>> {
    let millis = value
        .and_then(|d| d.get("$date"))
        .and_then(Value::as_f64)
        .ok_or_else(|| CharterError::Validation("invalid date".to_string()))?;

    DateTime::from_timestamp_millis(millis as i64)
        .ok_or_else(|| CharterError::Validation(format!("date out of range: {}", millis)))
}

impl NetworkMessage {
    /// Parse a single archive document.
    pub fn from_json(value: &Value) -> Result<Self> {
        let raw: RawNetworkMessage = serde_json::from_value(value.clone())
            .map_err(|e| CharterError::Validation(e.to_string()))?;

        let date = parse_date(raw.date.as_ref())?;

        Ok(Self {
            id: required("_id", raw.id)?,
            from: required("from", raw.from)?,
            mailing_list: required("mailingList", raw.mailing_list)?,
            content: required("content", raw.content)?,
            subject: required("subject", raw.subject)?,
            archive_url: raw.archive_url,
            date,
            in_reply_to: raw.in_reply_to,
            references: non_empty_ids(raw.references),
            descendants: non_empty_ids(raw.descendants),
        })
    }

    /// Parse a listing response. Documents that fail validation are dropped
    /// one by one; only a body without the embedded document array fails.
    pub fn list_from_json(data: &[u8]) -> Result<Vec<Self>> {
        let json: Value = serde_json::from_slice(data)?;

        let docs = json
            .pointer("/_embedded/rh:doc")
            .and_then(Value::as_array)
            .ok_or_else(|| CharterError::Parse("response has no _embedded.rh:doc array".to_string()))?;

        let messages = docs
            .iter()
            .filter_map(|doc| match Self::from_json(doc) {
                Ok(msg) => Some(msg),
                Err(e) => {
                    warn!("Dropping archive document {:?}: {}", doc.get("_id"), e);
                    None
                }
            })
            .collect();

        Ok(messages)
    }

    /// Checks the invariants the store relies on before it opens a transaction.
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(CharterError::Validation("message id is empty".to_string()));
        }

        let empty_link = self
            .references
            .iter()
            .chain(self.descendants.iter())
            .chain(self.in_reply_to.iter())
            .any(|id| id.is_empty());

        if empty_link {
            return Err(CharterError::Validation(format!(
                "message {} links to an empty id",
                self.id
            )));
        }

        Ok(())
    }
}

fn non_empty_ids(ids: Option<Vec<String>>) -> Vec<String> {
    ids.unwrap_or_default()
        .into_iter()
        .filter(|id| !id.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn document() -> Value {
        json!({
            "_id": "m1@swift.org",
            "from": "jane at example.com (Jane Appleseed)",
            "mailingList": "swift-evolution",
            "content": "Hello everyone",
            "subject": "[Pitch] Hello",
            "archiveURL": "https://lists.swift.org/pipermail/swift-evolution/m1.html",
            "date": { "$date": 1456272000000.0 },
            "inReplyTo": null,
            "references": ["", "m0@swift.org"],
            "descendants": ["m2@swift.org", ""]
        })
    }

    #[test]
    fn test_parse_document() {
        let msg = NetworkMessage::from_json(&document()).expect("valid document");
        assert_eq!(msg.id, "m1@swift.org");
        assert_eq!(msg.mailing_list, "swift-evolution");
        assert_eq!(msg.date.timestamp(), 1456272000);
        assert_eq!(msg.in_reply_to, None);
        assert_eq!(msg.references, vec!["m0@swift.org"]);
        assert_eq!(msg.descendants, vec!["m2@swift.org"]);
        assert!(msg.archive_url.is_some());
    }

    #[test]
    fn test_missing_required_field() {
        let mut doc = document();
        doc.as_object_mut().unwrap().remove("subject");

        let err = NetworkMessage::from_json(&doc).unwrap_err();
        assert!(matches!(err, CharterError::Validation(ref m) if m.contains("subject")));
    }

    #[test]
    fn test_invalid_date() {
        let mut doc = document();
        doc["date"] = json!("2016-02-24");
        assert!(matches!(
            NetworkMessage::from_json(&doc),
            Err(CharterError::Validation(_))
        ));

        doc.as_object_mut().unwrap().remove("date");
        assert!(matches!(
            NetworkMessage::from_json(&doc),
            Err(CharterError::Validation(_))
        ));
    }

    #[test]
    fn test_listing_drops_invalid_documents() {
        let mut broken = document();
        broken.as_object_mut().unwrap().remove("from");
        let body = json!({ "_embedded": { "rh:doc": [document(), broken] } });

        let messages = NetworkMessage::list_from_json(body.to_string().as_bytes()).unwrap();
        assert_eq!(messages.len(), 1);
    }

    #[test]
    fn test_listing_without_documents_is_parse_error() {
        let err = NetworkMessage::list_from_json(br#"{"_returned": 0}"#).unwrap_err();
        assert!(matches!(err, CharterError::Parse(_)));
    }

    #[test]
    fn test_validate_rejects_empty_id() {
        let mut msg = NetworkMessage::from_json(&document()).unwrap();
        assert!(msg.validate().is_ok());

        msg.id.clear();
        assert!(matches!(msg.validate(), Err(CharterError::Validation(_))));
    }
}
