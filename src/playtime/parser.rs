//! Line tokenizer and session parser.
//!
//! Turns server log lines such as
//!
//! ```text
//! [10:00:00] [User Authenticator #1/INFO]: UUID of player Steve is 069a79f4-44e9-4726-a5be-fca90e38aaf5
//! [10:00:00] [Server thread/INFO]: Steve joined the game
//! [11:30:00] [Server thread/INFO]: Steve left the game
//! ```
//!
//! into sessions in an [`AggregateStore`]. The only state is the
//! [`ParserContext`] passed in.

use chrono::{DateTime, NaiveTime, TimeDelta, Timelike, Utc};
use uuid::Uuid;

use super::context::{FlushReason, LeaveRejected, ParserContext};
use super::types::AggregateStore;

const TIMESTAMP_FORMAT: &str = "%H:%M:%S";

/// What a single line did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LineOutcome {
    /// The line carried a valid timestamp and source tag.
    pub recognized: bool,
    /// At least one player came online or went offline.
    pub presence_changed: bool,
}

impl LineOutcome {
    const UNRECOGNIZED: Self = Self {
        recognized: false,
        presence_changed: false,
    };

    fn recognized(presence_changed: bool) -> Self {
        Self {
            recognized: true,
            presence_changed,
        }
    }
}

/// Parse one line and apply it to `ctx` and `store`.
///
/// Lines without a leading `[HH:MM:SS] [tag]:` prefix (stack traces, blank
/// lines) are not errors; they return an unrecognized outcome. A line parsed
/// before any file was started in `ctx` is unrecognized as well.
pub fn parse_line(line: &str, ctx: &mut ParserContext, store: &mut AggregateStore) -> LineOutcome {
    let line = line.trim_end_matches('\r');
    let Some((time_of_day, rest)) = split_timestamp(line) else {
        return LineOutcome::UNRECOGNIZED;
    };
    let Some(baseline) = ctx.day_baseline() else {
        return LineOutcome::UNRECOGNIZED;
    };
    let now = baseline + time_of_day;
    let Some(message) = strip_source_tag(rest) else {
        return LineOutcome::UNRECOGNIZED;
    };

    let mut changed = false;
    if ctx.take_pending_flush() {
        changed = ctx.flush_online(now, FlushReason::Restart, store);
    }

    let tokens: Vec<&str> = message.split_whitespace().collect();
    match tokens.as_slice() {
        ["Stopping", "server"] | ["Stopping", "the", "server"] => {
            changed |= ctx.flush_online(now, FlushReason::ServerStopped, store);
            ctx.set_server_stopped(true);
        }
        ["Starting", "minecraft", "server", "version", _] if ctx.server_stopped() => {
            ctx.set_server_stopped(false);
        }
        ["UUID", "of", "player", name, "is", uuid_text] => {
            record_identity(name, uuid_text, ctx);
        }
        [name, "joined", "the", "game"]
        | [name, "(formerly", "known", "as", _, "joined", "the", "game"] => {
            ctx.mark_joined(name, now);
            changed = true;
        }
        [name, "left", "the", "game"] => {
            changed |= player_left(name, now, ctx, store);
        }
        _ => {}
    }
    LineOutcome::recognized(changed)
}

/// Parse newline-separated text, skipping blank lines.
///
/// Every physical line advances the context's line counter. A trailing
/// fragment without a newline is parsed as a line of its own; if it was cut
/// short by a concurrent writer it is misparsed, not held back.
///
/// Returns whether any line changed who is online.
pub fn parse_lines(text: &str, ctx: &mut ParserContext, store: &mut AggregateStore) -> bool {
    let mut changed = false;
    for line in text.split_terminator('\n') {
        ctx.advance_line();
        if line.trim_end_matches('\r').is_empty() {
            continue;
        }
        changed |= parse_line(line, ctx, store).presence_changed;
    }
    changed
}

fn record_identity(name: &str, uuid_text: &str, ctx: &mut ParserContext) {
    if uuid_text.len() != 36 {
        return;
    }
    match Uuid::try_parse(uuid_text) {
        Ok(uuid) => ctx.set_identity(name, uuid),
        Err(e) => {
            tracing::warn!(
                player = %name,
                uuid = %uuid_text,
                file = %ctx.file_name(),
                line = ctx.line(),
                error = %e,
                "UUID parsing failed"
            );
        }
    }
}

fn player_left(
    name: &str,
    now: DateTime<Utc>,
    ctx: &mut ParserContext,
    store: &mut AggregateStore,
) -> bool {
    match ctx.mark_left(name, now, store) {
        Ok(()) => true,
        Err(reason) => {
            let what = match reason {
                LeaveRejected::MissingIdentity => "UUID not found for player leaving",
                LeaveRejected::MissingJoin => "Join time not found for player leaving",
            };
            tracing::warn!(
                player = %name,
                file = %ctx.file_name(),
                line = ctx.line(),
                "{what}"
            );
            false
        }
    }
}

/// Split `[HH:MM:SS]` off the front of `line`.
///
/// Only the zero-padded 24-hour form is accepted; leap seconds are not.
fn split_timestamp(line: &str) -> Option<(TimeDelta, &str)> {
    let rest = line.strip_prefix('[')?;
    let (field, rest) = (rest.get(..8)?, rest.get(8..)?);
    let rest = rest.strip_prefix(']')?;
    let time = NaiveTime::parse_from_str(field, TIMESTAMP_FORMAT).ok()?;
    if time.nanosecond() != 0 || time.format(TIMESTAMP_FORMAT).to_string() != field {
        return None;
    }
    let offset = TimeDelta::seconds(i64::from(time.num_seconds_from_midnight()));
    Some((offset, rest))
}

/// Drop the ` [thread/LEVEL]:` tag and return the message after it.
fn strip_source_tag(rest: &str) -> Option<&str> {
    let tagged = rest.trim_start().strip_prefix('[')?;
    let close = tagged.find(']')?;
    tagged[close + 1..].strip_prefix(':')
}
