//! Shared helpers for the record cache integration tests

#![allow(dead_code)] // Each test binary uses a different subset

use record_cache::{
    CacheConfig, RecordCache,
    dns::{
        DNSPacket,
        descriptor::FieldValue,
        enums::{DNSResourceClass, DNSResourceType},
        question::DNSQuestion,
        resource::DNSResource,
    },
};
use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::Path;
use tempfile::TempDir;

pub const TEST_CACHE_SIZE: usize = 102_400;

/// Configuration for a cache file inside `dir`. The sweeper interval is long
/// enough that tests drive aging through `sweep_once`.
pub fn test_config(dir: &Path) -> CacheConfig {
    CacheConfig {
        sweep_interval_ms: 3_600_000,
        ..CacheConfig::default()
    }
    .with_file(dir.join("records.db"))
    .with_size(TEST_CACHE_SIZE)
}

pub fn open_cache(dir: &TempDir) -> RecordCache {
    RecordCache::open(&test_config(dir.path())).expect("Failed to open cache")
}

pub fn record(name: &str, rtype: DNSResourceType, ttl: u32, fields: &[FieldValue]) -> DNSResource {
    DNSResource::from_fields(name, rtype, DNSResourceClass::IN, ttl, fields)
        .expect("Failed to build record")
}

pub fn a_record(name: &str, ttl: u32, last_octet: u8) -> DNSResource {
    record(
        name,
        DNSResourceType::A,
        ttl,
        &[FieldValue::Ipv4(Ipv4Addr::new(192, 0, 2, last_octet))],
    )
}

pub fn aaaa_record(name: &str, ttl: u32) -> DNSResource {
    record(
        name,
        DNSResourceType::AAAA,
        ttl,
        &[FieldValue::Ipv6(Ipv6Addr::new(
            0x2001, 0xdb8, 0, 0, 0, 0, 0, 1,
        ))],
    )
}

pub fn cname_record(name: &str, target: &str, ttl: u32) -> DNSResource {
    record(
        name,
        DNSResourceType::CNAME,
        ttl,
        &[FieldValue::Name(target.to_string())],
    )
}

pub fn mx_record(name: &str, ttl: u32, preference: u16, exchange: &str) -> DNSResource {
    record(
        name,
        DNSResourceType::MX,
        ttl,
        &[
            FieldValue::U16(preference),
            FieldValue::Name(exchange.to_string()),
        ],
    )
}

pub fn txt_record(name: &str, ttl: u32, text: &str) -> DNSResource {
    record(
        name,
        DNSResourceType::TXT,
        ttl,
        &[FieldValue::Text(text.to_string())],
    )
}

/// Upstream response carrying `answers` for a question about `name`.
pub fn response_with(name: &str, qtype: DNSResourceType, answers: Vec<DNSResource>) -> DNSPacket {
    let query = DNSPacket::query(4242, DNSQuestion::new(name, qtype, DNSResourceClass::IN));
    let mut response = query.generate_response();
    response.header.ancount = answers.len() as u16;
    response.answers = answers;
    response
}

pub fn lookup(cache: &RecordCache, name: &str, rtype: DNSResourceType) -> Vec<DNSResource> {
    cache
        .lookup(name, rtype, DNSResourceClass::IN)
        .expect("Lookup failed")
}
