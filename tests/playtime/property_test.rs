//! Invariants over generated log sequences.

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use playtime_tracker::playtime::{parse_lines, AggregateStore, ParserContext};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const PLAYERS: [(&str, &str); 3] = [
    ("Steve", "069a79f4-44e9-4726-a5be-fca90e38aaf5"),
    ("Alex", "ec561538-f3fd-461d-aff5-086b22154bce"),
    ("Notch", "853c80ef-3c37-49fd-aa49-938b674adae6"),
];

fn baseline() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

/// A day of log lines with joins, leaves, renames, noise and restarts.
fn generate_log(seed: u64) -> Vec<String> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut seconds = 0u64;
    let mut lines = Vec::new();
    while seconds < 86_000 {
        seconds += rng.random_range(1..600);
        let time = format!(
            "[{:02}:{:02}:{:02}]",
            seconds / 3600,
            seconds % 3600 / 60,
            seconds % 60
        );
        let (name, id) = PLAYERS[rng.random_range(0..PLAYERS.len())];
        let line = match rng.random_range(0..9) {
            0 => format!("{time} [User Authenticator #1/INFO]: UUID of player {name} is {id}"),
            1 => {
                let alias = format!("{name}_{}", rng.random_range(0..2));
                format!("{time} [User Authenticator #1/INFO]: UUID of player {alias} is {id}")
            }
            2 | 3 => format!("{time} [Server thread/INFO]: {name} joined the game"),
            4 => format!("{time} [Server thread/INFO]: {name}_1 (formerly known as {name}) joined the game"),
            5 | 6 => format!("{time} [Server thread/INFO]: {name} left the game"),
            7 => match rng.random_range(0..3) {
                0 => format!("{time} [Server thread/INFO]: Stopping server"),
                1 => format!("{time} [Server thread/INFO]: Starting minecraft server version 1.20.4"),
                _ => format!("{time} [Server thread/INFO]: {name}_0 left the game"),
            },
            _ => "\tat java.base/java.lang.Thread.run(Thread.java:1583)".to_string(),
        };
        lines.push(line);
    }
    lines
}

fn parse_all(text: &str) -> (ParserContext, AggregateStore) {
    let mut ctx = ParserContext::new();
    let mut store = AggregateStore::new();
    ctx.begin_file("2024-01-01-1.log", baseline());
    parse_lines(text, &mut ctx, &mut store);
    (ctx, store)
}

fn check_invariants(store: &AggregateStore) {
    let mut previous = None;
    for (uuid, entry) in store.entries() {
        if let Some(prev) = previous {
            assert!(prev < *uuid, "store must be ascending by identity");
        }
        previous = Some(*uuid);

        let sum = entry
            .record()
            .sessions()
            .iter()
            .fold(TimeDelta::zero(), |acc, s| acc + s.duration);
        assert_eq!(entry.record().total(), sum);
        assert!(entry
            .record()
            .sessions()
            .iter()
            .all(|s| s.duration >= TimeDelta::zero()));
        assert!(
            entry.display_names().windows(2).all(|w| w[0] != w[1]),
            "consecutive duplicate names in {:?}",
            entry.display_names()
        );
    }
}

#[test]
fn totals_equal_session_sums() {
    for seed in 0..40 {
        let text = generate_log(seed).join("\n");
        let (_, store) = parse_all(&text);
        check_invariants(&store);
    }
}

#[test]
fn incremental_parse_equals_batch() {
    for seed in 0..40 {
        let lines = generate_log(seed);
        let text: String = lines.iter().map(|l| format!("{l}\n")).collect();
        let (batch_ctx, batch_store) = parse_all(&text);

        let mut rng = StdRng::seed_from_u64(seed ^ 0xdead_beef);
        let mut ctx = ParserContext::new();
        let mut store = AggregateStore::new();
        ctx.begin_file("2024-01-01-1.log", baseline());
        let mut rest = lines.as_slice();
        while !rest.is_empty() {
            let take = rng.random_range(0..8).min(rest.len());
            let chunk: String = rest[..take].iter().map(|l| format!("{l}\n")).collect();
            parse_lines(&chunk, &mut ctx, &mut store);
            rest = &rest[take..];
        }

        assert_eq!(store, batch_store, "seed {seed}");
        assert_eq!(ctx, batch_ctx, "seed {seed}");
    }
}

#[test]
fn split_mid_line_is_misparsed() {
    let join = "[10:00:00] [User Authenticator #1/INFO]: UUID of player Steve is 069a79f4-44e9-4726-a5be-fca90e38aaf5\n\
                [10:00:00] [Server thread/INFO]: Steve joined the game\n";
    let (batch_ctx, _) = parse_all(join);
    assert_eq!(batch_ctx.online_count(), 1);

    // a read that ends inside a line sees two fragments, neither a join
    let split = join.find("jo").unwrap() + 2;
    let mut ctx = ParserContext::new();
    let mut store = AggregateStore::new();
    ctx.begin_file("2024-01-01-1.log", baseline());
    parse_lines(&join[..split], &mut ctx, &mut store);
    parse_lines(&join[split..], &mut ctx, &mut store);
    assert_eq!(ctx.online_count(), 0);
}
