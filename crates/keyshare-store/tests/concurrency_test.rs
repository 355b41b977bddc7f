//! Parallel requests against one registry must not lose records or
//! overspend quota.

use std::io::Read;
use std::sync::Arc;
use std::thread;

use keyshare_config::testing::TestEnvironment;
use keyshare_store::{FileRegistry, StoreError};

#[test]
fn test_parallel_uploads_lose_no_record() {
    const THREADS: usize = 8;
    const PER_THREAD: usize = 10;

    let env = TestEnvironment::new().unwrap();
    let registry = Arc::new(FileRegistry::new(&env.config()).unwrap());

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                (0..PER_THREAD)
                    .map(|i| {
                        let body = format!("{}-{}", t, i);
                        let tokens = registry.upload_bytes("same.txt", body.as_bytes()).unwrap();
                        (tokens, body)
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let uploaded: Vec<_> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();

    assert_eq!(registry.list().unwrap().len(), THREADS * PER_THREAD);
    for (tokens, body) in &uploaded {
        let mut out = String::new();
        registry
            .download(&tokens.share, "reader")
            .unwrap()
            .stream
            .read_to_string(&mut out)
            .unwrap();
        assert_eq!(&out, body);
    }
}

#[test]
fn test_parallel_downloads_never_overspend() {
    const LIMIT: u64 = 5;
    const THREADS: usize = 12;

    let env = TestEnvironment::new().unwrap();
    let registry = Arc::new(FileRegistry::new(&env.config_with_limit(LIMIT)).unwrap());
    let tokens = registry.upload_bytes("a.txt", b"x").unwrap();

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let registry = Arc::clone(&registry);
            let share = tokens.share.clone();
            thread::spawn(move || registry.download(&share, "one-origin").map(|d| d.remaining))
        })
        .collect();

    let mut granted = Vec::new();
    let mut refused = 0;
    for handle in handles {
        match handle.join().unwrap() {
            Ok(remaining) => granted.push(remaining),
            Err(StoreError::QuotaExceeded { .. }) => refused += 1,
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    // The seeding download is free, then LIMIT more.
    assert_eq!(granted.len() as u64, LIMIT + 1);
    assert_eq!(refused, THREADS - granted.len());
    granted.sort_unstable();
    let mut expected: Vec<u64> = (0..LIMIT).collect();
    expected.push(LIMIT);
    expected.sort_unstable();
    assert_eq!(granted, expected);
    assert_eq!(registry.quota("one-origin").unwrap(), Some(0));
}

#[test]
fn test_deletes_and_uploads_interleave() {
    let env = TestEnvironment::new().unwrap();
    let registry = Arc::new(FileRegistry::new(&env.config()).unwrap());

    let doomed: Vec<_> = (0..16)
        .map(|i| registry.upload_bytes(&format!("d{}", i), b"d").unwrap())
        .collect();

    let deleters: Vec<_> = doomed
        .chunks(4)
        .map(|chunk| {
            let registry = Arc::clone(&registry);
            let owners: Vec<String> = chunk.iter().map(|t| t.owner.clone()).collect();
            thread::spawn(move || {
                for owner in owners {
                    registry.delete(&owner).unwrap();
                }
            })
        })
        .collect();
    let uploaders: Vec<_> = (0..4)
        .map(|t| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                (0..4)
                    .map(|i| registry.upload_bytes(&format!("k{}-{}", t, i), b"k").unwrap())
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    for handle in deleters {
        handle.join().unwrap();
    }
    let kept: Vec<_> = uploaders
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();

    let records = registry.list().unwrap();
    assert_eq!(records.len(), kept.len());
    for tokens in &kept {
        assert!(registry.is_valid_owner_token(&tokens.owner).unwrap());
    }
    for tokens in &doomed {
        assert!(registry.download(&tokens.share, "o").unwrap_err().is_not_found());
    }
}
