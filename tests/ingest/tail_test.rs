//! Integration tests for tailing the live log.

use std::time::Duration;

use chrono::TimeDelta;
use playtime_tracker::config::WatcherBackend;
use playtime_tracker::ingest::{
    backfill, live_baseline, BackfillOptions, IngestDriver, IngestError, IngestState,
    IngestedFiles,
};
use playtime_tracker::watcher::{FileEvent, WatcherError};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{append, config, join, leave, server_line, write_gz, ALEX, STEVE};

fn modified() -> FileEvent {
    FileEvent {
        modified: true,
        ..FileEvent::default()
    }
}

fn uuid(text: &str) -> Uuid {
    Uuid::parse_str(text).unwrap()
}

#[tokio::test]
async fn appends_are_parsed_incrementally() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();
    let live = dir.join("latest.log");
    std::fs::write(&live, join("10:00:00", "Steve", STEVE)).unwrap();

    let mut driver = IngestDriver::start(config(dir), ()).await.unwrap();
    let shared = driver.shared();
    assert_eq!(shared.online_count().await, 1);

    append(&live, &join("10:05:00", "Alex", ALEX));
    driver.handle_event(modified()).await;
    assert_eq!(shared.online_count().await, 2);

    append(&live, &leave("10:35:00", "Alex"));
    driver.handle_event(modified()).await;
    let state = shared.snapshot().await;
    assert_eq!(state.context.online_count(), 1);
    assert_eq!(
        state.store.get(&uuid(ALEX)).unwrap().record().total(),
        TimeDelta::minutes(30)
    );

    // nothing new
    driver.handle_event(modified()).await;
    assert_eq!(shared.snapshot().await, state);
}

#[tokio::test]
async fn tailing_matches_batch_backfill() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();
    write_gz(
        &dir.join("2024-01-01-1.log.gz"),
        &(join("22:00:00", "Steve", STEVE) + &leave("23:00:00", "Steve")),
    );
    let live = dir.join("latest.log");
    std::fs::write(&live, "").unwrap();

    let chunks = [
        join("08:00:00", "Steve", STEVE),
        join("08:10:00", "Alex", ALEX) + &server_line("08:11:00", "Alex has made the advancement [Stone Age]"),
        leave("09:00:00", "Steve"),
        String::new(),
        server_line("09:30:00", "Stopping the server") + &server_line("09:31:00", "Starting minecraft server version 1.20.4"),
        join("10:00:00", "Steve", STEVE),
    ];

    let mut driver = IngestDriver::start(config(dir), ()).await.unwrap();
    for chunk in &chunks {
        append(&live, chunk);
        driver.handle_event(modified()).await;
    }
    let tailed = driver.shared().snapshot().await;

    let mut batch = IngestState::new();
    let options = BackfillOptions {
        include_live: true,
        preserve_context: true,
    };
    backfill(&config(dir), &mut batch, options, &mut ()).await.unwrap();

    assert_eq!(tailed.store, batch.store);
    assert_eq!(
        tailed.context.online_players(),
        batch.context.online_players()
    );
    assert_eq!(tailed.context.online_count(), 1);
}

#[tokio::test]
async fn truncation_reparses_on_committed_snapshot() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();
    write_gz(&dir.join("2024-01-01-1.log.gz"), &join("10:00:00", "Steve", STEVE));
    let live = dir.join("latest.log");
    std::fs::write(
        &live,
        join("08:00:00", "Alex", ALEX) + &leave("09:00:00", "Alex") + &join("09:30:00", "Alex", ALEX),
    )
    .unwrap();

    let mut driver = IngestDriver::start(config(dir), ()).await.unwrap();
    let committed = driver.committed().clone();
    assert!(committed.store.is_empty());

    let rewritten = join("12:00:00", "Alex", ALEX);
    std::fs::write(&live, &rewritten).unwrap();
    driver.handle_event(modified()).await;

    let mut expected = committed.clone();
    let tz = config(dir).time_zone().unwrap();
    expected
        .context
        .begin_file("latest.log", live_baseline(&live, &tz).await.unwrap());
    expected.parse(&rewritten);

    assert_eq!(driver.shared().snapshot().await, expected);
    assert_eq!(driver.committed(), &committed);
}

#[tokio::test]
async fn rotation_commits_snapshot_and_waits_for_new_file() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();
    let live = dir.join("latest.log");
    std::fs::write(&live, join("10:00:00", "Steve", STEVE)).unwrap();

    let mut driver = IngestDriver::start(config(dir), IngestedFiles::new())
        .await
        .unwrap();

    // written after the last read, picked up from the renamed file
    append(&live, &join("10:30:00", "Alex", ALEX));
    std::fs::rename(&live, dir.join("2024-01-01-1.log")).unwrap();
    driver
        .handle_event(FileEvent {
            renamed_to: Some("2024-01-01-1.log".to_string()),
            ..FileEvent::default()
        })
        .await;

    assert!(driver.is_awaiting_create());
    assert_eq!(driver.observer().names(), ["2024-01-01-1"]);
    let committed = driver.committed().clone();
    assert_eq!(committed.context.online_count(), 2);
    assert_eq!(driver.shared().snapshot().await, committed);

    std::fs::write(&live, leave("11:00:00", "Alex")).unwrap();
    driver
        .handle_event(FileEvent {
            created: true,
            ..FileEvent::default()
        })
        .await;
    driver.handle_event(modified()).await;

    assert!(!driver.is_awaiting_create());
    let state = driver.shared().snapshot().await;
    assert_eq!(state.context.file_name(), "latest.log");
    assert_eq!(state.context.online_count(), 0);
    assert!(state.store.get(&uuid(ALEX)).is_some());
}

#[tokio::test]
async fn modified_while_awaiting_create_starts_new_file() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();
    let live = dir.join("latest.log");
    std::fs::write(&live, join("10:00:00", "Steve", STEVE)).unwrap();

    let mut driver = IngestDriver::start(config(dir), ()).await.unwrap();
    std::fs::rename(&live, dir.join("2024-01-01-1.log")).unwrap();
    driver
        .handle_event(FileEvent {
            renamed_to: Some("2024-01-01-1.log".to_string()),
            ..FileEvent::default()
        })
        .await;

    std::fs::write(&live, join("12:00:00", "Alex", ALEX)).unwrap();
    driver.handle_event(modified()).await;

    assert!(!driver.is_awaiting_create());
    let state = driver.shared().snapshot().await;
    let online: Vec<&str> = state
        .context
        .online_players()
        .into_iter()
        .map(|(name, _)| name)
        .collect();
    assert_eq!(online, ["Alex"]);
}

fn online_names(state: &IngestState) -> Vec<String> {
    state
        .context
        .online_players()
        .into_iter()
        .map(|(name, _)| name.to_string())
        .collect()
}

/// Rotate the live log the way the server does: rename it, then start a new
/// file under the live name.
fn rotate(dir: &std::path::Path, archive: &str, new_text: Option<&str>) {
    let live = dir.join("latest.log");
    std::fs::rename(&live, dir.join(archive)).unwrap();
    if let Some(text) = new_text {
        std::fs::write(&live, text).unwrap();
    }
}

#[tokio::test]
async fn rotation_without_rename_event_keeps_sessions() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();
    let live = dir.join("latest.log");
    std::fs::write(&live, join("10:00:00", "Steve", STEVE)).unwrap();

    let mut driver = IngestDriver::start(config(dir), IngestedFiles::new())
        .await
        .unwrap();

    // the polling backend only reports the live name's metadata changing
    append(&live, &leave("11:00:00", "Steve"));
    rotate(dir, "2024-01-01-1.log", Some(&join("12:00:00", "Alex", ALEX)));
    driver.handle_event(modified()).await;

    let state = driver.shared().snapshot().await;
    assert_eq!(
        state.store.get(&uuid(STEVE)).unwrap().record().total(),
        TimeDelta::hours(1)
    );
    assert!(driver.committed().store.get(&uuid(STEVE)).is_some());
    assert!(driver.committed().store.get(&uuid(ALEX)).is_none());
    assert_eq!(driver.observer().names(), ["2024-01-01-1"]);
    assert_eq!(online_names(&state), ["Alex"]);
    assert!(!driver.is_awaiting_create());
}

#[tokio::test]
async fn rotation_seen_before_new_file_exists() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();
    let live = dir.join("latest.log");
    std::fs::write(&live, join("10:00:00", "Steve", STEVE)).unwrap();

    let mut driver = IngestDriver::start(config(dir), IngestedFiles::new())
        .await
        .unwrap();
    append(&live, &leave("11:00:00", "Steve"));
    rotate(dir, "2024-01-01-1.log", None);
    driver.handle_event(modified()).await;

    assert!(driver.is_awaiting_create());
    assert_eq!(driver.observer().names(), ["2024-01-01-1"]);
    assert_eq!(
        driver.committed().store.get(&uuid(STEVE)).unwrap().record().total(),
        TimeDelta::hours(1)
    );

    std::fs::write(&live, join("12:00:00", "Alex", ALEX)).unwrap();
    driver.handle_event(modified()).await;

    assert!(!driver.is_awaiting_create());
    let state = driver.shared().snapshot().await;
    assert_eq!(online_names(&state), ["Alex"]);
    assert_eq!(state.store.total_playtime(), TimeDelta::hours(1));
}

#[tokio::test]
async fn late_events_after_detected_rotation_change_nothing() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();
    let live = dir.join("latest.log");
    std::fs::write(&live, join("10:00:00", "Steve", STEVE)).unwrap();

    let mut driver = IngestDriver::start(config(dir), IngestedFiles::new())
        .await
        .unwrap();
    append(&live, &leave("11:00:00", "Steve"));
    rotate(dir, "2024-01-01-1.log", Some(&join("12:00:00", "Alex", ALEX)));
    driver.handle_event(modified()).await;

    let state = driver.shared().snapshot().await;
    let committed = driver.committed().clone();

    // the native backend delivers these after the first modification is read
    driver
        .handle_event(FileEvent {
            renamed_to: Some("2024-01-01-1.log".to_string()),
            ..FileEvent::default()
        })
        .await;
    driver
        .handle_event(FileEvent {
            created: true,
            ..FileEvent::default()
        })
        .await;
    driver.handle_event(modified()).await;

    assert_eq!(driver.shared().snapshot().await, state);
    assert_eq!(driver.committed(), &committed);
    assert_eq!(driver.observer().names(), ["2024-01-01-1"]);
    assert!(!driver.is_awaiting_create());
}

#[tokio::test]
async fn create_event_for_rotation_without_rename_event() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();
    let live = dir.join("latest.log");
    std::fs::write(&live, join("10:00:00", "Steve", STEVE)).unwrap();

    let mut driver = IngestDriver::start(config(dir), IngestedFiles::new())
        .await
        .unwrap();
    append(&live, &leave("11:00:00", "Steve"));
    rotate(dir, "2024-01-01-1.log", Some(&join("12:00:00", "Alex", ALEX)));
    driver
        .handle_event(FileEvent {
            created: true,
            ..FileEvent::default()
        })
        .await;

    let state = driver.shared().snapshot().await;
    assert_eq!(driver.observer().names(), ["2024-01-01-1"]);
    assert_eq!(state.store.total_playtime(), TimeDelta::hours(1));
    assert_eq!(online_names(&state), ["Alex"]);
}

#[tokio::test]
async fn replaced_live_log_is_reparsed_with_flush() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();
    write_gz(&dir.join("2024-01-01-1.log.gz"), &join("10:00:00", "Steve", STEVE));
    let live = dir.join("latest.log");
    std::fs::write(&live, join("08:00:00", "Alex", ALEX)).unwrap();

    let mut driver = IngestDriver::start(config(dir), ()).await.unwrap();
    assert_eq!(driver.shared().online_count().await, 2);

    let other = dir.join("other.txt");
    std::fs::write(&other, server_line("12:00:00", "Done (2.5s)!")).unwrap();
    std::fs::rename(&other, &live).unwrap();
    driver
        .handle_event(FileEvent {
            created_by_rename: true,
            ..FileEvent::default()
        })
        .await;

    let state = driver.shared().snapshot().await;
    assert_eq!(state.context.online_count(), 0);
    assert_eq!(state.store.get(&uuid(STEVE)).unwrap().record().sessions().len(), 1);
    assert!(state.store.get(&uuid(ALEX)).is_none());
}

#[tokio::test]
async fn missing_live_log_is_not_fatal() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();
    write_gz(
        &dir.join("2024-01-01-1.log.gz"),
        &(join("10:00:00", "Steve", STEVE) + &leave("11:00:00", "Steve")),
    );

    let mut driver = IngestDriver::start(config(dir), ()).await.unwrap();
    driver.handle_event(modified()).await;
    let state = driver.shared().snapshot().await;
    assert_eq!(state.store.total_playtime(), TimeDelta::hours(1));
}

#[tokio::test]
async fn real_watcher_follows_appends() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path().to_path_buf();
    let live = dir.join("latest.log");
    std::fs::write(&live, "").unwrap();

    let mut cfg = config(&dir);
    cfg.poll_backoff_ms = 10;
    cfg.max_watcher_restarts = 0;
    let mut driver = IngestDriver::start(cfg, ()).await.unwrap();
    let shared = driver.shared();

    let shutdown = CancellationToken::new();
    let stop = shutdown.clone();
    let writer = async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        append(&live, &join("10:00:00", "Steve", STEVE));
        tokio::time::sleep(Duration::from_millis(500)).await;
        stop.cancel();
    };

    let (result, ()) = tokio::join!(driver.run(&shutdown), writer);
    match result {
        Ok(()) => {}
        Err(IngestError::Watcher(WatcherError::Notify(e))) => {
            eprintln!("Skipping test due to system limit: {e}");
            return;
        }
        Err(e) => panic!("Unexpected error: {e}"),
    }

    // Slow CI machines may not deliver the event in time
    let online = shared.online_count().await;
    if online != 1 {
        eprintln!("Append not observed before shutdown (online = {online})");
    }
}

#[tokio::test]
async fn polling_watcher_keeps_sessions_across_rotation() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path().to_path_buf();
    let live = dir.join("latest.log");
    std::fs::write(
        &live,
        join("10:00:00", "Steve", STEVE) + &leave("11:00:00", "Steve"),
    )
    .unwrap();

    let mut cfg = config(&dir);
    cfg.poll_backoff_ms = 10;
    cfg.max_watcher_restarts = 0;
    cfg.watcher.backend = WatcherBackend::Polling;
    cfg.watcher.poll_interval_ms = 20;
    let mut driver = IngestDriver::start(cfg, IngestedFiles::new()).await.unwrap();
    let shared = driver.shared();

    let shutdown = CancellationToken::new();
    let stop = shutdown.clone();
    let writer = async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        std::fs::rename(&live, dir.join("2024-01-01-1.log")).unwrap();
        std::fs::write(&live, join("12:00:00", "Alex", ALEX)).unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        stop.cancel();
    };

    let (result, ()) = tokio::join!(driver.run(&shutdown), writer);
    match result {
        Ok(()) => {}
        Err(IngestError::Watcher(WatcherError::Notify(e))) => {
            eprintln!("Skipping test due to system limit: {e}");
            return;
        }
        Err(e) => panic!("Unexpected error: {e}"),
    }

    let state = shared.snapshot().await;
    assert_eq!(
        state.store.get(&uuid(STEVE)).unwrap().record().total(),
        TimeDelta::hours(1)
    );
    // Slow CI machines may not deliver the scan in time
    if online_names(&state) != ["Alex"] {
        eprintln!("New live log not observed before shutdown");
    }
}
