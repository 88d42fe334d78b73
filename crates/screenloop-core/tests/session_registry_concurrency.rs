//! Concurrent registry mutations from independent handles, threads or
//! processes, must not lose entries.

use screenloop_core::SessionRecord;
use screenloop_core::SessionRegistry;
use screenloop_core::testing::FakeMultiplexer;
use std::path::PathBuf;
use std::process::Command;
use std::sync::{Arc, Barrier};
use std::thread;
use tempfile::TempDir;

fn record(name: &str) -> SessionRecord {
    SessionRecord {
        name: name.to_string(),
        prompt_source: "inline".to_string(),
        working_path: PathBuf::from("/tmp"),
        session_id: format!("id-{name}"),
        model: Some("sonnet".to_string()),
        iterations: 10,
        screen_name: format!("screenloop-{name}"),
        started_at: None,
    }
}

const WORKER_PATH_ENV: &str = "SCREENLOOP_REGISTRY_WORKER_PATH";
const WORKER_PREFIX_ENV: &str = "SCREENLOOP_REGISTRY_WORKER_PREFIX";
const WORKER_COUNT: usize = 25;

/// Body of the child processes spawned below; a no-op in a normal test run.
#[test]
fn registry_worker_process() {
    let (Ok(path), Ok(prefix)) = (
        std::env::var(WORKER_PATH_ENV),
        std::env::var(WORKER_PREFIX_ENV),
    ) else {
        return;
    };
    let registry = SessionRegistry::new(path, FakeMultiplexer::new());
    for i in 0..WORKER_COUNT {
        let name = format!("{prefix}-{i}");
        registry.track(&name, record(&name)).unwrap();
    }
}

#[test]
fn test_tracks_from_separate_processes_are_all_persisted() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join(".live-agents");
    let exe = std::env::current_exe().unwrap();

    let children: Vec<_> = ["left", "right"]
        .iter()
        .map(|prefix| {
            Command::new(&exe)
                .args(["--exact", "registry_worker_process", "--test-threads", "1"])
                .env(WORKER_PATH_ENV, &path)
                .env(WORKER_PREFIX_ENV, prefix)
                .spawn()
                .unwrap()
        })
        .collect();
    for mut child in children {
        assert!(child.wait().unwrap().success());
    }

    let registry = SessionRegistry::new(&path, FakeMultiplexer::new());
    let all = registry.all().unwrap();
    assert_eq!(all.len(), 2 * WORKER_COUNT);
    for prefix in ["left", "right"] {
        assert!((0..WORKER_COUNT).all(|i| all.contains_key(&format!("{prefix}-{i}"))));
    }
}

#[test]
fn test_concurrent_tracks_are_all_persisted() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join(".live-agents");
    let workers = 8;
    let per_worker = 10;
    let barrier = Arc::new(Barrier::new(workers));

    let handles: Vec<_> = (0..workers)
        .map(|w| {
            let path = path.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                // Separate registry per thread: each lock call opens its own descriptor
                let registry = SessionRegistry::new(path, FakeMultiplexer::new());
                barrier.wait();
                for i in 0..per_worker {
                    let name = format!("w{w}-s{i}");
                    registry.track(&name, record(&name)).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let registry = SessionRegistry::new(&path, FakeMultiplexer::new());
    let all = registry.all().unwrap();
    assert_eq!(all.len(), workers * per_worker);
    assert!(all.values().all(|r| r.started_at.is_some()));
}

#[test]
fn test_clean_racing_track_keeps_both_mutations() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join(".live-agents");
    let fake = FakeMultiplexer::with_alive(["keep"]);

    let seed = SessionRegistry::new(&path, fake.clone());
    seed.track("keep", record("keep")).unwrap();
    for i in 0..20 {
        seed.track(&format!("dead-{i}"), record(&format!("dead-{i}"))).unwrap();
    }

    let barrier = Arc::new(Barrier::new(2));
    let cleaner = {
        let path = path.clone();
        let fake = fake.clone();
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            let registry = SessionRegistry::new(path, fake);
            barrier.wait();
            registry.clean().unwrap()
        })
    };
    let tracker = {
        let path = path.clone();
        let fake = fake.clone();
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            let registry = SessionRegistry::new(path, fake.clone());
            barrier.wait();
            for i in 0..20 {
                let name = format!("new-{i}");
                fake.set_alive(&name, true);
                registry.track(&name, record(&name)).unwrap();
            }
        })
    };

    let removed = cleaner.join().unwrap();
    tracker.join().unwrap();

    assert_eq!(removed.len(), 20);
    assert!(removed.iter().all(|name| name.starts_with("dead-")));

    let all = seed.all().unwrap();
    assert_eq!(all.len(), 21);
    assert!(all.contains_key("keep"));
    assert!((0..20).all(|i| all.contains_key(&format!("new-{i}"))));
}
