use dengue_forecast::{LocationKey, LocationLocks};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn key(name: &str) -> LocationKey {
    LocationKey::from_name(name).unwrap()
}

#[test]
fn test_guard_releases_on_drop() {
    let locks = LocationLocks::new();
    let region = key("Region X");

    {
        let guard = locks.acquire(&region);
        assert_eq!(guard.key(), &region);
        assert!(locks.is_held(&region));
    }

    assert!(!locks.is_held(&region));
}

#[test]
fn test_timeout_while_held() {
    let locks = LocationLocks::new();
    let region = key("Region X");

    let _guard = locks.acquire(&region);

    assert!(locks
        .acquire_timeout(&region, Duration::from_millis(30))
        .is_none());
}

#[test]
fn test_keys_are_independent() {
    let locks = LocationLocks::new();

    let _a = locks.acquire(&key("Region X"));
    let b = locks.acquire_timeout(&key("Region Y"), Duration::from_millis(30));

    assert!(b.is_some());
}

#[test]
fn test_same_key_is_exclusive_across_threads() {
    let locks = Arc::new(LocationLocks::new());
    let inside = Arc::new(AtomicUsize::new(0));
    let overlaps = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let locks = Arc::clone(&locks);
            let inside = Arc::clone(&inside);
            let overlaps = Arc::clone(&overlaps);
            thread::spawn(move || {
                for _ in 0..5 {
                    let _guard = locks.acquire(&key("Region X"));
                    if inside.fetch_add(1, Ordering::SeqCst) > 0 {
                        overlaps.fetch_add(1, Ordering::SeqCst);
                    }
                    thread::sleep(Duration::from_millis(1));
                    inside.fetch_sub(1, Ordering::SeqCst);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(overlaps.load(Ordering::SeqCst), 0);
}

#[test]
fn test_waiter_proceeds_after_release() {
    let locks = Arc::new(LocationLocks::new());
    let guard = locks.acquire(&key("Region X"));

    let waiter = {
        let locks = Arc::clone(&locks);
        thread::spawn(move || {
            let acquired = locks
                .acquire_timeout(&key("Region X"), Duration::from_secs(5))
                .is_some();
            acquired
        })
    };

    thread::sleep(Duration::from_millis(20));
    drop(guard);

    assert!(waiter.join().unwrap());
}
