//! Persistent DNS record cache.
//!
//! Records live in a single memory-mapped file. Blobs grow upward from the
//! header, the hash index grows downward from the end of the file, and one
//! reader/writer lock guards the whole region. A background sweeper ages
//! entries once per tick and reclaims the dead ones.

pub mod codec;
pub mod header;
pub(crate) mod index;
pub(crate) mod region;
pub mod resolver;
pub mod stats;
pub(crate) mod sweeper;
pub(crate) mod zone;

pub use codec::StoredRecord;
pub use index::CacheEntry;
pub use region::OpenMode;
pub use resolver::{CachedAnswer, MAX_CNAME_HOPS, TtlPolicy};
pub use stats::CacheStats;
pub use sweeper::SweepReport;

use crate::config::CacheConfig;
use crate::dns::{
    DNSPacket,
    descriptor::fields_for,
    enums::{DNSResourceClass, DNSResourceType},
    question::DNSQuestion,
    resource::DNSResource,
};
use crate::error::{CacheError, Result};
use header::HEADER_SIZE;
use index::{NodeIndex, NodeIndexMut, hash_key};
use parking_lot::{Mutex, RwLock};
use region::Region;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use sweeper::Sweeper;
use tracing::{debug, error, info, trace, warn};

/// State shared with the sweeper thread.
pub(crate) struct Shared {
    /// `None` once the cache has been closed
    pub(crate) region: RwLock<Option<Region>>,
    pub(crate) policy: TtlPolicy,
    pub(crate) stats: CacheStats,
}

/// Per-batch result of an insertion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertReport {
    pub inserted: usize,
    /// Identical live records already present
    pub duplicates: usize,
    /// Identical expired records brought back to life
    pub refreshed: usize,
    /// Records of uncacheable types or with a zero TTL
    pub skipped: usize,
    /// Records that could not be stored, e.g. because the cache is full
    pub failed: usize,
}

/// Space accounting of an open cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheUsage {
    pub path: PathBuf,
    pub capacity: usize,
    pub entries: usize,
    pub free_nodes: usize,
    pub blob_bytes: usize,
    pub index_bytes: usize,
}

impl CacheUsage {
    /// Bytes still available between the two arenas.
    pub fn free_bytes(&self) -> usize {
        self.capacity
            .saturating_sub(HEADER_SIZE + self.blob_bytes + self.index_bytes)
    }
}

/// An entry as listed by [`RecordCache::entries`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedEntry {
    pub record: StoredRecord,
    pub entry: CacheEntry,
}

enum Stored {
    Inserted { reused: bool },
    Duplicate,
    Refreshed,
}

pub struct RecordCache {
    shared: Arc<Shared>,
    sweeper: Mutex<Option<Sweeper>>,
    path: PathBuf,
    ignore_ttl: bool,
}

impl RecordCache {
    /// Open or create the cache described by `config`.
    ///
    /// Fails with [`CacheError::Disabled`] when `multiple_ttl` is 0; callers
    /// are expected to carry on without a cache on any error.
    pub fn open(config: &CacheConfig) -> Result<Self> {
        config.validate()?;
        if !config.caching_enabled() {
            return Err(CacheError::Disabled);
        }

        let (mut region, mode) = Region::open(config).inspect_err(|e| {
            error!("Cache initialization failed: {}", e);
        })?;

        match mode {
            OpenMode::Reloaded => match NodeIndex::new(&region).validate() {
                Ok(()) => {
                    let entries = NodeIndex::new(&region).active_count()?;
                    info!("Cache reloaded, containing {} entries", entries);
                }
                Err(e) if config.overwrite_cache => {
                    warn!("{}; recreating the cache", e);
                    region.reset()?;
                    index::format(&mut region)?;
                }
                Err(e) => {
                    error!("Cache initialization failed: {}", e);
                    return Err(e);
                }
            },
            OpenMode::Created | OpenMode::Overwritten => index::format(&mut region)?,
        }

        let path = region.path().to_path_buf();
        debug!(
            "Cache opened at {} ({:?}, format version {})",
            path.display(),
            mode,
            region.header()?.version
        );
        let shared = Arc::new(Shared {
            region: RwLock::new(Some(region)),
            policy: TtlPolicy::from_config(config),
            stats: CacheStats::new(),
        });

        let sweeper = if config.ignore_ttl {
            info!("TTL ignored, cache sweeper not started");
            None
        } else {
            Some(Sweeper::spawn(
                Arc::clone(&shared),
                config.sweep_interval(),
            )?)
        };

        Ok(Self {
            shared,
            sweeper: Mutex::new(sweeper),
            path,
            ignore_ttl: config.ignore_ttl,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn policy(&self) -> TtlPolicy {
        self.shared.policy
    }

    pub fn stats(&self) -> &CacheStats {
        &self.shared.stats
    }

    pub fn is_closed(&self) -> bool {
        self.shared.region.read().is_none()
    }

    /// Store a batch of records under one exclusive lock. A record that cannot
    /// be stored is counted as failed and the rest of the batch continues.
    pub fn add_records<'a, I>(&self, records: I) -> Result<InsertReport>
    where
        I: IntoIterator<Item = &'a DNSResource>,
    {
        let policy = self.shared.policy;
        let stats = &self.shared.stats;
        let mut report = InsertReport::default();

        let mut guard = self.shared.region.write();
        let region = guard.as_mut().ok_or(CacheError::Closed)?;
        let mut index = NodeIndexMut::new(region);

        for record in records {
            let ticks = policy.stored(record.ttl);
            if fields_for(record.rtype).is_none() || ticks == 0 {
                trace!("Not caching {} {:?}", record.name(), record.rtype);
                report.skipped += 1;
                continue;
            }

            match store(&mut index, record, ticks) {
                Ok(Stored::Inserted { reused }) => {
                    stats.record_insert(reused);
                    report.inserted += 1;
                }
                Ok(Stored::Duplicate) => {
                    stats.record_duplicate();
                    report.duplicates += 1;
                }
                Ok(Stored::Refreshed) => {
                    stats.record_refresh();
                    report.refreshed += 1;
                }
                Err(e) if e.is_record_local() => {
                    warn!(
                        "Failed to cache {} {:?}: {}",
                        record.name(),
                        record.rtype,
                        e
                    );
                    stats.record_insert_failure();
                    report.failed += 1;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(report)
    }

    /// Store the answer section of an upstream response.
    pub fn add_answers(&self, response: &DNSPacket) -> Result<InsertReport> {
        self.add_records(&response.answers)
    }

    /// Cached answer for a question, following CNAME chains.
    pub fn get_by_question(&self, question: &DNSQuestion) -> Result<CachedAnswer> {
        let name = question.name();
        let guard = self.shared.region.read();
        let region = guard.as_ref().ok_or(CacheError::Closed)?;
        let answer = resolver::resolve(
            NodeIndex::new(region),
            &name,
            question.qtype,
            question.qclass,
            &self.shared.policy,
        )?;
        drop(guard);

        if answer.is_empty() {
            self.shared.stats.record_miss();
            trace!("Cache miss for {} {:?}", name, question.qtype);
        } else {
            self.shared.stats.record_hit();
            trace!(
                "Cache hit for {} {:?}: {} records",
                name, question.qtype, answer.count
            );
        }
        Ok(answer)
    }

    pub fn lookup(
        &self,
        name: &str,
        rtype: DNSResourceType,
        rclass: DNSResourceClass,
    ) -> Result<Vec<DNSResource>> {
        let answer = self.get_by_question(&DNSQuestion::new(name, rtype, rclass))?;
        answer
            .records()
            .map_err(|e| CacheError::Corrupt(e.to_string()))
    }

    /// Response to a single-question query built from cached records, or
    /// `None` when the query has to go upstream.
    pub fn answer_query(&self, query: &DNSPacket) -> Option<DNSPacket> {
        let [question] = query.questions.as_slice() else {
            return None;
        };
        let records = match self.get_by_question(question).and_then(|answer| {
            answer
                .records()
                .map_err(|e| CacheError::Corrupt(e.to_string()))
        }) {
            Ok(records) if !records.is_empty() => records,
            Ok(_) => return None,
            Err(e) => {
                debug!("Cache unavailable for query {}: {}", query.header.id, e);
                return None;
            }
        };

        let mut response = query.generate_response();
        response.header.ancount = records.len() as u16;
        response.answers = records;
        Some(response)
    }

    /// Run one sweep tick synchronously. Does nothing when TTLs are ignored.
    pub fn sweep_once(&self) -> Result<SweepReport> {
        if self.ignore_ttl {
            let guard = self.shared.region.read();
            let region = guard.as_ref().ok_or(CacheError::Closed)?;
            return Ok(SweepReport {
                end: region.end()?,
                ..SweepReport::default()
            });
        }
        sweeper::tick(&self.shared)
    }

    pub fn usage(&self) -> Result<CacheUsage> {
        let guard = self.shared.region.read();
        let region = guard.as_ref().ok_or(CacheError::Closed)?;
        let index = NodeIndex::new(region);
        let entries = index.active_count()? as usize;
        Ok(CacheUsage {
            path: self.path.clone(),
            capacity: region.size(),
            entries,
            free_nodes: index.node_count()? as usize - entries,
            blob_bytes: region.end()? - HEADER_SIZE,
            index_bytes: index.index_bytes()?,
        })
    }

    /// Every active entry, live or expired but not yet swept, in node order.
    pub fn entries(&self) -> Result<Vec<ListedEntry>> {
        let guard = self.shared.region.read();
        let region = guard.as_ref().ok_or(CacheError::Closed)?;
        let index = NodeIndex::new(region);
        let mut listed = Vec::new();
        for node in index.nodes()? {
            if !index.is_active(node)? {
                continue;
            }
            let entry = index.entry(node)?;
            let record = codec::decode(index.blob(&entry)?, entry.offset as usize)?;
            listed.push(ListedEntry { record, entry });
        }
        Ok(listed)
    }

    pub fn flush(&self) -> Result<()> {
        let guard = self.shared.region.read();
        guard.as_ref().ok_or(CacheError::Closed)?.flush()
    }

    /// Stop the sweeper, flush and unmap the file. Later calls on this handle
    /// fail with [`CacheError::Closed`].
    pub fn close(&self) -> Result<()> {
        drop(self.sweeper.lock().take());
        let region = self
            .shared
            .region
            .write()
            .take()
            .ok_or(CacheError::Closed)?;
        region.flush()?;
        info!("Cache {} closed", self.path.display());
        Ok(())
    }
}

impl Drop for RecordCache {
    fn drop(&mut self) {
        drop(self.sweeper.get_mut().take());
    }
}

fn store(index: &mut NodeIndexMut<'_>, record: &DNSResource, ticks: u32) -> Result<Stored> {
    let blob = codec::encode(record)?;
    let key = codec::cache_key(&record.name(), record.rtype, record.rclass);

    let view = index.view();
    let mut cursor = None;
    while let Some(node) = view.find(&key, cursor)? {
        cursor = Some(node);
        let entry = view.entry(node)?;
        if view.blob(&entry)? == blob.as_slice() {
            if entry.ttl > 0 {
                return Ok(Stored::Duplicate);
            }
            index.set_ttl(node, ticks, record.ttl)?;
            return Ok(Stored::Refreshed);
        }
    }

    let zone = zone::place(index, &blob)?;
    index.set_ttl(zone.node, ticks, record.ttl)?;
    index.add_by_key(hash_key(&key), zone.node)?;
    Ok(Stored::Inserted {
        reused: zone.reused,
    })
}
