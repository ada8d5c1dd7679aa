//! Thread queries
//!
//! A [`ThreadQuery`] is built once and projected two ways: the parameters of
//! the remote archive API and a [`LocalQuery`] the SQLite cache executes.
//! Both come from the same field values so that a cache read after a network
//! refresh answers the same logical question the network did.

use std::collections::BTreeMap;

use tracing::warn;

use crate::types::Message;

/// Page used by the local projection when the query does not set one
pub const DEFAULT_PAGE: u32 = 1;
/// Page size used by the local projection when the query does not set one
pub const DEFAULT_PAGE_SIZE: u32 = 25;

/// Filter values that are already raw JSON and must not be quoted.
const RAW_VALUE_PREFIXES: [&str; 2] = ["{$in", "{$search"];

/// Filter on a message's parent.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ReplyFilter {
    /// No filter on the parent
    #[default]
    Any,
    /// Only messages without a parent (thread roots)
    Root,
    /// Only direct replies to the given id
    Parent(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    Date,
    Subject,
    From,
    MailingList,
    Id,
}

impl SortField {
    /// Field name understood by the archive API
    pub fn remote_name(&self) -> &'static str {
        match self {
            SortField::Date => "date",
            SortField::Subject => "subject",
            SortField::From => "from",
            SortField::MailingList => "mailingList",
            SortField::Id => "_id",
        }
    }

    /// Column in the cache's `messages` table
    pub fn column(&self) -> &'static str {
        match self {
            SortField::Date => "date",
            SortField::Subject => "subject",
            SortField::From => "from_address",
            SortField::MailingList => "mailing_list",
            SortField::Id => "id",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sort {
    pub field: SortField,
    pub ascending: bool,
}

/// Accumulates query fields; `build` freezes them into a [`ThreadQuery`].
#[derive(Debug, Clone, Default)]
pub struct ThreadQueryBuilder {
    page: Option<u32>,
    page_size: Option<u32>,
    mailing_list: Option<String>,
    in_reply_to: ReplyFilter,
    sort: Vec<Sort>,
    only_complete: bool,
    id_in: Option<Vec<String>>,
    phrase: Option<String>,
}

impl ThreadQueryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }

    pub fn page_size(mut self, page_size: u32) -> Self {
        self.page_size = Some(page_size);
        self
    }

    pub fn mailing_list(mut self, mailing_list: impl Into<String>) -> Self {
        self.mailing_list = Some(mailing_list.into());
        self
    }

    pub fn in_reply_to(mut self, filter: ReplyFilter) -> Self {
        self.in_reply_to = filter;
        self
    }

    /// Adds a sort key. Only the first one is honoured.
    pub fn sort_by(mut self, field: SortField, ascending: bool) -> Self {
        self.sort.push(Sort { field, ascending });
        self
    }

    /// Only fully-formed messages should be returned
    pub fn only_complete(mut self, only_complete: bool) -> Self {
        self.only_complete = only_complete;
        self
    }

    pub fn id_in<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.id_in = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    /// Exact phrase that must appear in the subject, sender or body
    pub fn phrase(mut self, phrase: impl Into<String>) -> Self {
        self.phrase = Some(phrase.into());
        self
    }

    pub fn build(self) -> ThreadQuery {
        if self.sort.len() > 1 {
            warn!(
                "Thread queries support a single sort field; ignoring {} extra",
                self.sort.len() - 1
            );
        }

        ThreadQuery {
            page: self.page,
            page_size: self.page_size,
            mailing_list: self.mailing_list,
            in_reply_to: self.in_reply_to,
            sort: self.sort.into_iter().next(),
            only_complete: self.only_complete,
            id_in: self.id_in,
            phrase: self.phrase,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum FilterValue {
    Text(String),
    Null,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadQuery {
    page: Option<u32>,
    page_size: Option<u32>,
    mailing_list: Option<String>,
    in_reply_to: ReplyFilter,
    sort: Option<Sort>,
    only_complete: bool,
    id_in: Option<Vec<String>>,
    phrase: Option<String>,
}

impl ThreadQuery {
    pub fn builder() -> ThreadQueryBuilder {
        ThreadQueryBuilder::new()
    }

    /// One page of thread roots for a mailing list, newest first.
    pub fn threads_page(mailing_list: &str, page: u32, page_size: u32) -> Self {
        Self::builder()
            .mailing_list(mailing_list)
            .in_reply_to(ReplyFilter::Root)
            .only_complete(true)
            .page_size(page_size)
            .page(page)
            .sort_by(SortField::Date, false)
            .build()
    }

    /// Every complete message the root declares as a descendant.
    pub fn descendants_of(root: &Message, page_size: u32) -> Self {
        Self::builder()
            .id_in(root.descendants.iter().cloned())
            .page(1)
            .page_size(page_size)
            .only_complete(true)
            .build()
    }

    /// Archive-wide exact phrase search within one mailing list.
    pub fn search(mailing_list: &str, phrase: &str) -> Self {
        Self::builder()
            .mailing_list(mailing_list)
            .phrase(phrase)
            .build()
    }

    /// Exactly the given ids, all on the first page.
    pub fn ids(ids: Vec<String>) -> Self {
        let page_size = u32::try_from(ids.len()).unwrap_or(u32::MAX);
        Self::builder().id_in(ids).page(1).page_size(page_size).build()
    }

    pub fn page(&self) -> Option<u32> {
        self.page
    }

    pub fn page_size(&self) -> Option<u32> {
        self.page_size
    }

    pub fn mailing_list(&self) -> Option<&str> {
        self.mailing_list.as_deref()
    }

    pub fn in_reply_to(&self) -> &ReplyFilter {
        &self.in_reply_to
    }

    pub fn sort(&self) -> Option<Sort> {
        self.sort
    }

    pub fn is_only_complete(&self) -> bool {
        self.only_complete
    }

    pub fn id_in(&self) -> Option<&[String]> {
        self.id_in.as_deref()
    }

    pub fn phrase(&self) -> Option<&str> {
        self.phrase.as_deref()
    }

    fn remote_filter(&self) -> String {
        let mut filter: BTreeMap<&'static str, FilterValue> = BTreeMap::new();

        match &self.in_reply_to {
            ReplyFilter::Any => {}
            ReplyFilter::Root => {
                filter.insert("inReplyTo", FilterValue::Null);
            }
            ReplyFilter::Parent(id) => {
                filter.insert("inReplyTo", FilterValue::Text(id.clone()));
            }
        }

        if let Some(mailing_list) = &self.mailing_list {
            filter.insert("mailingList", FilterValue::Text(mailing_list.clone()));
        }

        if let Some(ids) = &self.id_in {
            // The transport does not escape '+' for us, everything else it does
            let quoted: Vec<String> = ids
                .iter()
                .map(|id| format!("'{}'", id.replace('+', "%2B")))
                .collect();
            filter.insert("_id", FilterValue::Text(format!("{{$in:[{}]}}", quoted.join(","))));
        }

        if let Some(phrase) = &self.phrase {
            // Quoted so the text index matches the exact phrase
            let escaped = phrase
                .replace('%', "%25")
                .replace('+', "%2B")
                .replace('\'', "\\'");
            filter.insert(
                "$text",
                FilterValue::Text(format!("{{$search:'\"{}\"'}}", escaped)),
            );
        }

        let entries: Vec<String> = filter
            .into_iter()
            .map(|(key, value)| match value {
                FilterValue::Text(text) => {
                    if RAW_VALUE_PREFIXES.iter().any(|p| text.starts_with(p)) {
                        format!("{}:{}", key, text)
                    } else {
                        format!("{}:'{}'", key, text)
                    }
                }
                FilterValue::Null => format!("{}:null", key),
            })
            .collect();

        format!("{{{}}}", entries.join(","))
    }

    /// Query parameters for the archive API, keyed and ordered by name.
    pub fn remote_parameters(&self) -> BTreeMap<&'static str, String> {
        let mut params = BTreeMap::new();

        params.insert("filter", self.remote_filter());

        if let Some(sort) = self.sort {
            let direction = if sort.ascending { "" } else { "-" };
            params.insert("sort_by", format!("{}{}", direction, sort.field.remote_name()));
        }

        if let Some(page_size) = self.page_size {
            params.insert("pagesize", page_size.to_string());
        }

        if let Some(page) = self.page {
            params.insert("page", page.to_string());
        }

        params
    }

    /// Unescaped `key=value&...` form of [`Self::remote_parameters`].
    /// Identical queries always produce identical strings.
    pub fn remote_query_string(&self) -> String {
        self.remote_parameters()
            .into_iter()
            .map(|(key, value)| format!("{}={}", key, value))
            .collect::<Vec<_>>()
            .join("&")
    }

    /// The projection executed by the local cache.
    pub fn local_query(&self) -> LocalQuery {
        let mut filters = Vec::new();

        match &self.in_reply_to {
            ReplyFilter::Any => {}
            ReplyFilter::Root => filters.push(LocalFilter::InReplyTo(None)),
            ReplyFilter::Parent(id) => filters.push(LocalFilter::InReplyTo(Some(id.clone()))),
        }

        if let Some(mailing_list) = &self.mailing_list {
            filters.push(LocalFilter::MailingList(mailing_list.clone()));
        }

        if let Some(ids) = &self.id_in {
            filters.push(LocalFilter::IdIn(ids.clone()));
        }

        if let Some(phrase) = &self.phrase {
            filters.push(LocalFilter::Phrase(phrase.clone()));
        }

        LocalQuery {
            filters,
            sort: self.sort,
            page: self.page.unwrap_or(DEFAULT_PAGE).max(1),
            page_size: self.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
            only_complete: self.only_complete,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalFilter {
    MailingList(String),
    /// `None` matches messages without a parent
    InReplyTo(Option<String>),
    IdIn(Vec<String>),
    /// Case-insensitive substring of subject, sender or content
    Phrase(String),
}

impl LocalFilter {
    /// SQL condition over the `messages` table and its bound parameters.
    pub fn to_sql(&self) -> (String, Vec<String>) {
        match self {
            LocalFilter::MailingList(list) => ("mailing_list = ?".to_string(), vec![list.clone()]),
            LocalFilter::InReplyTo(None) => ("in_reply_to IS NULL".to_string(), Vec::new()),
            LocalFilter::InReplyTo(Some(id)) => ("in_reply_to = ?".to_string(), vec![id.clone()]),
            LocalFilter::IdIn(ids) if ids.is_empty() => ("0".to_string(), Vec::new()),
            LocalFilter::IdIn(ids) => {
                let placeholders = vec!["?"; ids.len()].join(", ");
                (format!("id IN ({})", placeholders), ids.clone())
            }
            LocalFilter::Phrase(phrase) => {
                let pattern = format!("%{}%", escape_like(phrase));
                (
                    "(subject LIKE ? ESCAPE '\\' OR from_address LIKE ? ESCAPE '\\' \
                     OR content LIKE ? ESCAPE '\\')"
                        .to_string(),
                    vec![pattern.clone(), pattern.clone(), pattern],
                )
            }
        }
    }

    pub fn matches(&self, message: &Message) -> bool {
        match self {
            LocalFilter::MailingList(list) => &message.mailing_list == list,
            LocalFilter::InReplyTo(parent) => &message.in_reply_to == parent,
            LocalFilter::IdIn(ids) => ids.contains(&message.id),
            LocalFilter::Phrase(phrase) => {
                let phrase = phrase.to_lowercase();
                [&message.subject, &message.from, &message.content]
                    .iter()
                    .any(|field| field.to_lowercase().contains(&phrase))
            }
        }
    }
}

fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

const COMPLETE_SQL: &str = "(id != '' AND from_address != '' AND mailing_list != '' \
                            AND content != '' AND subject != '')";

/// Structured filter executed by the message store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalQuery {
    pub filters: Vec<LocalFilter>,
    pub sort: Option<Sort>,
    /// 1-indexed
    pub page: u32,
    pub page_size: u32,
    pub only_complete: bool,
}

impl LocalQuery {
    /// `WHERE` body (without the keyword) and its parameters, in order.
    pub fn where_clause(&self) -> (String, Vec<String>) {
        let mut clauses = Vec::new();
        let mut params = Vec::new();

        for filter in &self.filters {
            let (clause, values) = filter.to_sql();
            clauses.push(clause);
            params.extend(values);
        }

        if self.only_complete {
            clauses.push(COMPLETE_SQL.to_string());
        }

        if clauses.is_empty() {
            ("1".to_string(), params)
        } else {
            (clauses.join(" AND "), params)
        }
    }

    /// `ORDER BY` body; insertion order breaks ties and applies when unsorted.
    pub fn order_clause(&self) -> String {
        match self.sort {
            Some(sort) => format!(
                "{} {}, rowid ASC",
                sort.field.column(),
                if sort.ascending { "ASC" } else { "DESC" }
            ),
            None => "rowid ASC".to_string(),
        }
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page.max(1) - 1) * u64::from(self.page_size)
    }

    /// Evaluates the filters in memory, ignoring sort and pagination.
    pub fn matches(&self, message: &Message) -> bool {
        self.filters.iter().all(|f| f.matches(message))
            && (!self.only_complete || message.is_complete())
    }
}
