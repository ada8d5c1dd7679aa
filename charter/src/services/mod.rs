//! Pure logic over messages: queries, thread assembly and display formatting.

pub mod formatter;
pub mod query;
pub mod thread;

pub use formatter::{EmailFormatter, RegionKind, SearchMatch, TextRegion};
pub use query::{ReplyFilter, SortField, ThreadQuery, ThreadQueryBuilder};
pub use thread::{assemble_thread, ThreadEntry};
