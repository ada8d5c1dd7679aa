//! Conversation assembly
//!
//! Turns a root and an unordered bag of its descendants into the flat,
//! indented sequence a conversation view renders top to bottom.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::types::Message;

/// One row of an assembled conversation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThreadEntry {
    /// Depth below the root (the root itself is 0)
    pub indent: usize,
    pub message: Message,
}

/// Depth-first, date-ordered conversation starting at `root`.
///
/// Descendants whose parent is not reachable from the root are dropped.
pub fn assemble_thread(root: &Message, descendants: &[Message]) -> Vec<ThreadEntry> {
    let mut children: HashMap<&str, Vec<&Message>> = HashMap::new();
    for message in descendants {
        if let Some(parent) = message.in_reply_to.as_deref() {
            children.entry(parent).or_default().push(message);
        }
    }

    // sort_by_key is stable: equal dates keep input order
    for replies in children.values_mut() {
        replies.sort_by_key(|m| m.date);
    }

    let mut entries = Vec::with_capacity(descendants.len() + 1);
    let mut visited = HashSet::new();
    visit(root, 0, &children, &mut visited, &mut entries);
    entries
}

fn visit<'a>(
    message: &'a Message,
    indent: usize,
    children: &HashMap<&str, Vec<&'a Message>>,
    visited: &mut HashSet<&'a str>,
    entries: &mut Vec<ThreadEntry>,
) {
    if !visited.insert(message.id.as_str()) {
        return;
    }

    entries.push(ThreadEntry {
        indent,
        message: message.clone(),
    });

    let Some(replies) = children.get(message.id.as_str()) else {
        return;
    };

    for &reply in replies {
        if reply.id == message.id {
            continue;
        }
        visit(reply, indent + 1, children, visited, entries);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};

    fn message(id: &str, parent: Option<&str>, secs: i64) -> Message {
        let mut msg = Message::stub(id);
        msg.in_reply_to = parent.map(str::to_string);
        msg.date = DateTime::<Utc>::from_timestamp(secs, 0).unwrap();
        msg
    }

    fn shape(entries: &[ThreadEntry]) -> Vec<(usize, &str)> {
        entries
            .iter()
            .map(|e| (e.indent, e.message.id.as_str()))
            .collect()
    }

    #[test]
    fn test_replies_sorted_by_date_and_indented() {
        let root = message("R", None, 0);
        let descendants = vec![
            message("A", Some("R"), 2),
            message("B", Some("R"), 1),
            message("C", Some("A"), 3),
        ];

        let thread = assemble_thread(&root, &descendants);
        assert_eq!(shape(&thread), vec![(0, "R"), (1, "B"), (1, "A"), (2, "C")]);
    }

    #[test]
    fn test_orphans_are_dropped() {
        let root = message("R", None, 0);
        let descendants = vec![
            message("A", Some("R"), 1),
            message("X", Some("missing"), 2),
            message("Y", Some("X"), 3),
            message("Z", None, 4),
        ];

        let thread = assemble_thread(&root, &descendants);
        assert_eq!(shape(&thread), vec![(0, "R"), (1, "A")]);
    }

    #[test]
    fn test_equal_dates_keep_input_order() {
        let root = message("R", None, 0);
        let descendants = vec![
            message("second", Some("R"), 5),
            message("first", Some("R"), 5),
            message("early", Some("R"), 1),
        ];

        let thread = assemble_thread(&root, &descendants);
        assert_eq!(
            shape(&thread),
            vec![(0, "R"), (1, "early"), (1, "second"), (1, "first")]
        );
    }

    #[test]
    fn test_self_reply_and_cycles_terminate() {
        let root = message("R", None, 0);
        let descendants = vec![
            message("R", Some("R"), 1),
            message("A", Some("R"), 2),
            message("B", Some("A"), 3),
            message("A", Some("B"), 4),
        ];

        let thread = assemble_thread(&root, &descendants);
        assert_eq!(shape(&thread), vec![(0, "R"), (1, "A"), (2, "B")]);
    }

    #[test]
    fn test_root_without_replies() {
        let root = message("R", None, 0);
        assert_eq!(shape(&assemble_thread(&root, &[])), vec![(0, "R")]);
    }
}
