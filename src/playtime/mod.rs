//! Session model for player playtime.
//!
//! The parser is a pure transformation: a log line plus a [`ParserContext`]
//! becomes zero or more mutations of an [`AggregateStore`].

mod context;
mod parser;
mod presence;
mod types;

pub use context::{FlushReason, OnlineEntry, ParserContext};
pub use parser::{parse_line, parse_lines, LineOutcome};
pub use presence::PresenceStatus;
pub use types::{AggregateEntry, AggregateStore, PlaySession, PlayerSummary, PlaytimeRecord};
