mod common;

use common::*;
use record_cache::cache::header::{CACHE_VERSION, CacheHeader};
use record_cache::dns::enums::DNSResourceType;
use record_cache::{CacheError, RecordCache};
use std::fs;
use tempfile::tempdir;

#[test]
fn test_reload_reproduces_lookups() {
    let dir = tempdir().unwrap();
    let before = {
        let cache = open_cache(&dir);
        cache
            .add_answers(&response_with(
                "www.example.com",
                DNSResourceType::A,
                vec![
                    cname_record("www.example.com", "web.example.net", 600),
                    a_record("web.example.net", 600, 10),
                    a_record("web.example.net", 600, 11),
                ],
            ))
            .unwrap();
        cache
            .add_records(&[mx_record("example.com", 3600, 10, "mail.example.com")])
            .unwrap();
        cache.sweep_once().unwrap();

        let before = lookup(&cache, "www.example.com", DNSResourceType::A);
        assert_eq!(before.len(), 3);
        cache.close().unwrap();
        before
    };

    let cache = open_cache(&dir);
    assert_eq!(cache.usage().unwrap().entries, 4);
    assert_eq!(
        lookup(&cache, "www.example.com", DNSResourceType::A),
        before
    );
    assert_eq!(
        lookup(&cache, "example.com", DNSResourceType::MX),
        vec![mx_record("example.com", 3599, 10, "mail.example.com")]
    );
}

#[test]
fn test_reload_disabled_starts_empty() {
    let dir = tempdir().unwrap();
    {
        let cache = open_cache(&dir);
        cache.add_records(&[a_record("a.test", 60, 1)]).unwrap();
    }

    let config = record_cache::CacheConfig {
        reload_cache: false,
        ..test_config(dir.path())
    };
    let cache = RecordCache::open(&config).unwrap();
    assert_eq!(cache.usage().unwrap().entries, 0);
    assert!(lookup(&cache, "a.test", DNSResourceType::A).is_empty());
}

#[test]
fn test_size_mismatch_rejected_without_touching_file() {
    let dir = tempdir().unwrap();
    {
        let cache = open_cache(&dir);
        cache.add_records(&[a_record("kept.test", 60, 1)]).unwrap();
    }
    let path = test_config(dir.path()).cache_file;
    let original = fs::read(&path).unwrap();

    let bigger = test_config(dir.path()).with_size(TEST_CACHE_SIZE * 2);
    let err = RecordCache::open(&bigger).err().unwrap();
    assert!(matches!(err, CacheError::Incompatible { .. }));
    assert_eq!(err.init_code(), Some(5));
    assert_eq!(fs::read(&path).unwrap(), original);

    // The untouched file still loads with the original size
    let cache = open_cache(&dir);
    assert_eq!(lookup(&cache, "kept.test", DNSResourceType::A).len(), 1);
}

#[test]
fn test_version_mismatch_rejected_without_touching_file() {
    let dir = tempdir().unwrap();
    drop(open_cache(&dir));
    let path = test_config(dir.path()).cache_file;

    let mut bytes = fs::read(&path).unwrap();
    bytes[..4].copy_from_slice(&(CACHE_VERSION + 1).to_ne_bytes());
    fs::write(&path, &bytes).unwrap();

    let err = RecordCache::open(&test_config(dir.path())).err().unwrap();
    assert!(matches!(
        err,
        CacheError::Incompatible {
            found_version,
            ..
        } if found_version == CACHE_VERSION + 1
    ));
    assert_eq!(fs::read(&path).unwrap(), bytes);
}

#[test]
fn test_overwrite_recreates_empty_cache() {
    let dir = tempdir().unwrap();
    {
        let cache = open_cache(&dir);
        cache.add_records(&[a_record("old.test", 60, 1)]).unwrap();
    }

    let config = record_cache::CacheConfig {
        overwrite_cache: true,
        ..test_config(dir.path()).with_size(TEST_CACHE_SIZE * 2)
    };
    let cache = RecordCache::open(&config).unwrap();
    assert_eq!(cache.usage().unwrap().entries, 0);
    assert!(lookup(&cache, "old.test", DNSResourceType::A).is_empty());
    cache.close().unwrap();

    let bytes = fs::read(&config.cache_file).unwrap();
    assert_eq!(bytes.len(), TEST_CACHE_SIZE * 2);
    let header = CacheHeader::from_bytes(&bytes).unwrap();
    assert_eq!(header.version, CACHE_VERSION);
    assert_eq!(header.size as usize, TEST_CACHE_SIZE * 2);
}

#[test]
fn test_second_open_of_same_file_fails() {
    let dir = tempdir().unwrap();
    let _cache = open_cache(&dir);
    let err = RecordCache::open(&test_config(dir.path())).err().unwrap();
    assert!(matches!(err, CacheError::Lock { .. }));
    assert_eq!(err.init_code(), Some(4));
}

#[test]
fn test_size_below_floor_is_rejected() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path()).with_size(50_000);
    let err = RecordCache::open(&config).err().unwrap();
    assert!(matches!(err, CacheError::SizeTooSmall { .. }));
    assert_eq!(err.init_code(), Some(1));
}

#[test]
fn test_unaligned_size_is_rounded_up() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path()).with_size(TEST_CACHE_SIZE + 3);
    let cache = RecordCache::open(&config).unwrap();
    assert_eq!(cache.usage().unwrap().capacity, TEST_CACHE_SIZE + 8);
}
