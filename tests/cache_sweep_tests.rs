mod common;

use common::*;
use record_cache::cache::header::HEADER_SIZE;
use record_cache::dns::enums::DNSResourceType;
use record_cache::{CacheConfig, RecordCache};
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};
use tempfile::tempdir;

#[test]
fn test_ttl_counts_down_and_expires() {
    let dir = tempdir().unwrap();
    let cache = open_cache(&dir);
    cache.add_records(&[a_record("short.test", 3, 1)]).unwrap();

    let mut seen = Vec::new();
    loop {
        let found = lookup(&cache, "short.test", DNSResourceType::A);
        match found.first() {
            Some(record) => seen.push(record.ttl),
            None => break,
        }
        cache.sweep_once().unwrap();
    }
    assert_eq!(seen, vec![3, 2, 1]);
    assert_eq!(cache.usage().unwrap().entries, 0);
}

#[test]
fn test_expired_entry_is_never_returned() {
    let dir = tempdir().unwrap();
    let cache = open_cache(&dir);
    cache
        .add_records(&[a_record("one.test", 1, 1), a_record("one.test", 5, 2)])
        .unwrap();

    let report = cache.sweep_once().unwrap();
    assert_eq!(report.expired, 1);
    assert_eq!(report.removed, 1);

    let found = lookup(&cache, "one.test", DNSResourceType::A);
    assert_eq!(found, vec![a_record("one.test", 4, 2)]);
}

#[test]
fn test_exact_fit_reuse_after_expiry() {
    let dir = tempdir().unwrap();
    let cache = open_cache(&dir);
    cache
        .add_records(&[
            a_record("first.test", 1, 1),
            a_record("neighbour.test", 60, 2),
        ])
        .unwrap();
    let offset_of = |name: &str| {
        cache
            .entries()
            .unwrap()
            .into_iter()
            .find(|listed| listed.record.name == name)
            .map(|listed| listed.entry.offset)
    };
    let first_offset = offset_of("first.test").unwrap();

    cache.sweep_once().unwrap();
    assert_eq!(offset_of("first.test"), None);

    // Same name length, same address length: same rounded zone size
    cache.add_records(&[a_record("other.test", 60, 3)]).unwrap();
    assert_eq!(offset_of("other.test"), Some(first_offset));
    assert_eq!(cache.stats().reused_zones.load(Ordering::Relaxed), 1);
    assert_eq!(
        lookup(&cache, "neighbour.test", DNSResourceType::A),
        vec![a_record("neighbour.test", 59, 2)]
    );
    assert_eq!(
        lookup(&cache, "other.test", DNSResourceType::A),
        vec![a_record("other.test", 60, 3)]
    );
}

#[test]
fn test_high_water_mark_follows_highest_live_zone() {
    let dir = tempdir().unwrap();
    let cache = open_cache(&dir);
    cache
        .add_records(&[
            a_record("low.test", 60, 1),
            txt_record("middle.test", 1, "expires first"),
            txt_record("high.test", 2, "expires second"),
        ])
        .unwrap();
    let blob_bytes = cache.usage().unwrap().blob_bytes;

    let first = cache.sweep_once().unwrap();
    assert_eq!(first.removed, 1);
    assert_eq!(first.end, HEADER_SIZE + blob_bytes);

    let low_end = {
        let entries = cache.entries().unwrap();
        let low = entries
            .iter()
            .find(|e| e.record.name == "low.test")
            .unwrap();
        (low.entry.offset + low.entry.length) as usize
    };
    let second = cache.sweep_once().unwrap();
    assert_eq!(second.removed, 1);
    assert_eq!(second.end, low_end);

    // Nothing left at all resets the arena
    for _ in 0..60 {
        cache.sweep_once().unwrap();
    }
    assert_eq!(cache.usage().unwrap().entries, 0);
    assert_eq!(cache.usage().unwrap().blob_bytes, 0);
}

#[test]
fn test_ignore_ttl_freezes_entries() {
    let dir = tempdir().unwrap();
    let config = CacheConfig {
        ignore_ttl: true,
        ..test_config(dir.path())
    };
    let cache = RecordCache::open(&config).unwrap();
    cache.add_records(&[a_record("frozen.test", 2, 1)]).unwrap();
    for _ in 0..5 {
        cache.sweep_once().unwrap();
    }
    assert_eq!(
        lookup(&cache, "frozen.test", DNSResourceType::A),
        vec![a_record("frozen.test", 2, 1)]
    );
}

#[test]
fn test_background_sweeper_expires_entries() {
    let dir = tempdir().unwrap();
    let config = CacheConfig {
        sweep_interval_ms: 20,
        ..test_config(dir.path())
    };
    let cache = RecordCache::open(&config).unwrap();
    cache.add_records(&[a_record("bg.test", 2, 1)]).unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    while cache.usage().unwrap().entries > 0 {
        assert!(Instant::now() < deadline, "sweeper never removed the entry");
        std::thread::sleep(Duration::from_millis(10));
    }
    assert!(lookup(&cache, "bg.test", DNSResourceType::A).is_empty());
    cache.close().unwrap();
}

#[test]
fn test_forced_ttl_and_multiple() {
    let dir = tempdir().unwrap();
    let config = CacheConfig {
        multiple_ttl: 2,
        ..test_config(dir.path())
    };
    let cache = RecordCache::open(&config).unwrap();
    cache
        .add_records(&[a_record("scaled.test", 10, 1)])
        .unwrap();
    assert_eq!(lookup(&cache, "scaled.test", DNSResourceType::A)[0].ttl, 10);
    cache.sweep_once().unwrap();
    assert_eq!(lookup(&cache, "scaled.test", DNSResourceType::A)[0].ttl, 9);
    assert_eq!(cache.entries().unwrap()[0].entry.original_ttl, 10);
    cache.close().unwrap();

    let config = CacheConfig {
        force_ttl: 30,
        ..test_config(dir.path())
    };
    let cache = RecordCache::open(&config).unwrap();
    cache
        .add_records(&[a_record("forced.test", 86_400, 1)])
        .unwrap();
    assert_eq!(
        lookup(&cache, "forced.test", DNSResourceType::A)[0].ttl,
        86_400
    );
    let forced = cache
        .entries()
        .unwrap()
        .into_iter()
        .find(|listed| listed.record.name == "forced.test")
        .unwrap();
    assert_eq!(forced.entry.ttl, 30);
}

#[test]
fn test_forced_ttl_reports_upstream_ttl() {
    let dir = tempdir().unwrap();
    let config = CacheConfig {
        force_ttl: 2,
        multiple_ttl: 3,
        ..test_config(dir.path())
    };
    let cache = RecordCache::open(&config).unwrap();
    cache
        .add_records(&[a_record("pinned.test", 86_400, 1)])
        .unwrap();

    cache.sweep_once().unwrap();
    assert_eq!(
        lookup(&cache, "pinned.test", DNSResourceType::A),
        vec![a_record("pinned.test", 86_400, 1)]
    );

    // The forced value still decides when the entry leaves the cache
    cache.sweep_once().unwrap();
    assert!(lookup(&cache, "pinned.test", DNSResourceType::A).is_empty());
}

#[test]
fn test_chased_cname_reports_remaining_ticks() {
    let dir = tempdir().unwrap();
    let config = CacheConfig {
        multiple_ttl: 2,
        ..test_config(dir.path())
    };
    let cache = RecordCache::open(&config).unwrap();
    cache
        .add_records(&[
            cname_record("alias.test", "target.test", 10),
            a_record("target.test", 10, 1),
        ])
        .unwrap();
    cache.sweep_once().unwrap();

    let chain = lookup(&cache, "alias.test", DNSResourceType::A);
    assert_eq!(chain.len(), 2);
    assert_eq!(chain[0].ttl, 19);
    assert_eq!(chain[1].ttl, 9);
}
