//! Answering a question from the index, following CNAME chains.

use super::codec::{StoredRecord, cache_key, decode};
use super::index::{CacheEntry, NodeId, NodeIndex};
use crate::config::CacheConfig;
use crate::dns::{
    ParseError,
    common::PacketComponent,
    descriptor::FieldValue,
    enums::{DNSResourceClass, DNSResourceType},
    resource::DNSResource,
};
use crate::error::Result;
use bitstream_io::{BigEndian, BitReader};
use std::collections::HashSet;
use tracing::{trace, warn};

/// Longest CNAME chain followed before giving up on a question.
pub const MAX_CNAME_HOPS: usize = 16;

/// How upstream TTLs map to stored ticks and back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlPolicy {
    pub force_ttl: Option<u32>,
    pub multiple: u32,
}

impl TtlPolicy {
    pub fn from_config(config: &CacheConfig) -> Self {
        Self {
            force_ttl: config.forced_ttl(),
            multiple: config.multiple_ttl.max(1),
        }
    }

    /// Ticks to store for a record received with `upstream` seconds.
    pub fn stored(&self, upstream: u32) -> u32 {
        match self.force_ttl {
            Some(ttl) => ttl,
            None => upstream.saturating_mul(self.multiple),
        }
    }

    /// Seconds to report for a record of the requested RRset. A forced TTL
    /// only bounds the time spent in the cache; callers still see the
    /// upstream TTL.
    pub fn reported(&self, entry: &CacheEntry) -> u32 {
        match self.force_ttl {
            Some(_) => entry.original_ttl,
            None => entry.ttl / self.multiple.max(1),
        }
    }
}

/// Records found for one question, serialized back to back in wire form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CachedAnswer {
    pub count: usize,
    pub wire: Vec<u8>,
}

impl CachedAnswer {
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn records(&self) -> std::result::Result<Vec<DNSResource>, ParseError> {
        let mut reader = BitReader::<_, BigEndian>::new(&self.wire[..]);
        let mut records = Vec::with_capacity(self.count);
        for _ in 0..self.count {
            let mut record = DNSResource::default();
            record.read(&mut reader, &self.wire)?;
            records.push(record);
        }
        Ok(records)
    }

    fn push(&mut self, record: &StoredRecord, ttl: u32) -> Result<()> {
        let len = self.wire.len();
        if let Err(e) = record.write_wire(ttl, &mut self.wire) {
            self.wire.truncate(len);
            return Err(e);
        }
        self.count += 1;
        Ok(())
    }
}

/// Live entries stored under `key`, in insertion order. Entries that fail to
/// decode are skipped.
fn live_records(index: NodeIndex<'_>, key: &[u8]) -> Result<Vec<(StoredRecord, CacheEntry)>> {
    let mut records = Vec::new();
    let mut cursor: Option<NodeId> = None;
    while let Some(node) = index.find(key, cursor)? {
        cursor = Some(node);
        let entry = index.entry(node)?;
        if entry.ttl == 0 {
            continue;
        }
        match decode(index.blob(&entry)?, entry.offset as usize) {
            Ok(record) => records.push((record, entry)),
            Err(e) => warn!("Skipping cached record: {}", e),
        }
    }
    Ok(records)
}

/// Resolve `(name, rtype, rclass)`. An empty answer means the caller has to
/// ask upstream.
pub(crate) fn resolve(
    index: NodeIndex<'_>,
    name: &str,
    rtype: DNSResourceType,
    rclass: DNSResourceClass,
    policy: &TtlPolicy,
) -> Result<CachedAnswer> {
    let mut answer = CachedAnswer::default();
    let mut current = name.trim_end_matches('.').to_ascii_lowercase();

    if rtype != DNSResourceType::CNAME {
        let mut visited = HashSet::from([current.clone()]);
        let mut hops = 0;
        loop {
            let key = cache_key(&current, DNSResourceType::CNAME, rclass);
            let Some((record, entry)) = live_records(index, &key)?.into_iter().next() else {
                break;
            };
            let Some(FieldValue::Name(target)) = record.fields.first() else {
                break;
            };
            let target = target.to_ascii_lowercase();

            hops += 1;
            if hops > MAX_CNAME_HOPS || !visited.insert(target.clone()) {
                warn!("Abandoning CNAME chain for {} at {}", name, current);
                return Ok(CachedAnswer::default());
            }
            // Aliases carry their raw remaining ticks
            answer.push(&record, entry.ttl)?;
            trace!("{} is an alias for {}", current, target);
            current = target;
        }
    }

    let key = cache_key(&current, rtype, rclass);
    let rrset = live_records(index, &key)?;
    if rrset.is_empty() {
        return Ok(CachedAnswer::default());
    }
    for (record, entry) in &rrset {
        answer.push(record, policy.reported(entry))?;
    }
    Ok(answer)
}
