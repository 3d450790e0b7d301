//! Background TTL aging.
//!
//! A tick first ages every active entry under the shared lock, using atomic
//! decrements so lookups keep running. Only when some entry is dead does it
//! take the exclusive lock to tombstone and unlink the dead entries and pull
//! the blob high-water mark back.

use super::Shared;
use super::codec::TOMBSTONE;
use super::index::{NodeIndex, NodeIndexMut};
use super::zone::reclaim_tail;
use crate::error::{CacheError, Result};
use crossbeam::channel::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Outcome of one sweep tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Entries whose TTL was decremented
    pub aged: usize,
    /// Entries that reached zero on this tick
    pub expired: usize,
    /// Dead entries unlinked from the index
    pub removed: usize,
    /// Blob high-water mark after the tick
    pub end: usize,
}

pub(crate) fn tick(shared: &Shared) -> Result<SweepReport> {
    let mut report = SweepReport::default();
    let mut dead = 0;
    {
        let guard = shared.region.read();
        let region = guard.as_ref().ok_or(CacheError::Closed)?;
        let index = NodeIndex::new(region);
        for node in index.nodes()? {
            if !index.is_active(node)? {
                continue;
            }
            let cell = index.ttl_cell(node)?;
            match cell.fetch_update(Ordering::AcqRel, Ordering::Acquire, |ttl| {
                ttl.checked_sub(1)
            }) {
                Ok(previous) => {
                    report.aged += 1;
                    if previous == 1 {
                        report.expired += 1;
                        dead += 1;
                    }
                }
                Err(_) => dead += 1,
            }
        }
        report.end = region.end()?;
    }

    if dead > 0 {
        let mut guard = shared.region.write();
        let region = guard.as_mut().ok_or(CacheError::Closed)?;
        let mut index = NodeIndexMut::new(region);

        let view = index.view();
        let mut doomed = Vec::with_capacity(dead);
        for node in view.nodes()? {
            if view.is_active(node)? && view.ttl_cell(node)?.load(Ordering::Acquire) == 0 {
                doomed.push((node, view.entry(node)?.offset as usize));
            }
        }
        for (node, offset) in doomed {
            index.region_mut().write_u8(offset, TOMBSTONE)?;
            index.remove_node(node)?;
            report.removed += 1;
        }
        report.end = reclaim_tail(&mut index)?;
    }

    shared.stats.record_sweep(report.removed as u64);
    if report.removed > 0 {
        debug!(
            "Sweep removed {} expired entries, {} aged, end at {}",
            report.removed, report.aged, report.end
        );
    } else {
        trace!("Sweep aged {} entries", report.aged);
    }
    Ok(report)
}

/// Handle of the sweeper thread. Dropping it stops and joins the thread.
pub(crate) struct Sweeper {
    stop: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl Sweeper {
    pub(crate) fn spawn(shared: Arc<Shared>, interval: Duration) -> Result<Self> {
        let (stop, stopped) = channel::bounded::<()>(1);
        let handle = thread::Builder::new()
            .name("cache-sweeper".to_string())
            .spawn(move || {
                loop {
                    match stopped.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                    match tick(&shared) {
                        Ok(_) => {}
                        Err(CacheError::Closed) => break,
                        Err(e) => warn!("Cache sweep failed: {}", e),
                    }
                }
                debug!("Cache sweeper stopped");
            })?;

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    fn shutdown(&mut self) {
        let _ = self.stop.try_send(());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Cache sweeper panicked");
            }
        }
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.shutdown();
    }
}
