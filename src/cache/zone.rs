//! Zone placement in the blob arena.
//!
//! Blobs are bump-allocated upward from the header while index nodes are
//! carved downward from the top. A zone released by the sweeper stays attached
//! to its free node and is handed out again only to a request of exactly the
//! same rounded length.

use super::header::HEADER_SIZE;
use super::index::{NodeId, NodeIndexMut};
use crate::error::{CacheError, Result};
use tracing::trace;

pub(crate) const ZONE_ALIGN: usize = 8;

pub(crate) fn round_up(len: usize) -> usize {
    len.div_ceil(ZONE_ALIGN) * ZONE_ALIGN
}

/// A placed blob. The node is detached: the caller links it into the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Zone {
    pub node: NodeId,
    pub offset: usize,
    pub length: usize,
    pub reused: bool,
}

fn check_arenas(index: &NodeIndexMut<'_>) -> Result<()> {
    let view = index.view();
    let end = view.region().end()?;
    let low = view.index_low()?;
    if end > low {
        return Err(CacheError::Corrupt(format!(
            "blob arena ({}) overlaps index arena ({})",
            end, low
        )));
    }
    Ok(())
}

/// Find room for `blob`, copy it in and zero the padding up to the rounded
/// length. Nothing is modified when placement fails.
pub(crate) fn place(index: &mut NodeIndexMut<'_>, blob: &[u8]) -> Result<Zone> {
    if blob.is_empty() {
        return Err(CacheError::MalformedBlob(0));
    }
    let length = round_up(blob.len());

    let view = index.view();
    let mut exact = None;
    let mut zoneless = None;
    let mut cursor = None;
    while let Some(node) = view.find_unused_node(cursor)? {
        let entry = view.entry(node)?;
        if entry.length as usize == length {
            exact = Some((node, entry.offset as usize));
            break;
        }
        if entry.length == 0 && zoneless.is_none() {
            zoneless = Some(node);
        }
        cursor = Some(node);
    }

    let zone = match exact {
        Some((node, offset)) => {
            index.fetch_node(node)?;
            trace!("Reusing zone {}+{} of node {}", offset, length, node.get());
            Zone {
                node,
                offset,
                length,
                reused: true,
            }
        }
        None => {
            let end = view.region().end()?;
            let new_end = end + length;
            let node = match zoneless {
                Some(node) => {
                    let low = view.index_low()?;
                    if new_end > low {
                        return Err(CacheError::ArenaFull {
                            need: length,
                            available: low.saturating_sub(end),
                        });
                    }
                    index.fetch_node(node)?;
                    node
                }
                None => index.create_node(new_end).map_err(|e| match e {
                    CacheError::ArenaFull { available, .. } => CacheError::ArenaFull {
                        need: length + super::index::NODE_SIZE,
                        available: available + length,
                    },
                    other => other,
                })?,
            };
            index.region_mut().set_end(new_end)?;
            Zone {
                node,
                offset: end,
                length,
                reused: false,
            }
        }
    };

    index.set_zone(zone.node, zone.offset, zone.length, blob.len())?;
    let bytes = index.region_mut().bytes_mut(zone.offset, zone.length)?;
    bytes[..blob.len()].copy_from_slice(blob);
    bytes[blob.len()..].fill(0);
    check_arenas(index)?;
    Ok(zone)
}

/// Pull `End` back to the highest zone still in use and detach free zones
/// left beyond it. Returns the new `End`.
pub(crate) fn reclaim_tail(index: &mut NodeIndexMut<'_>) -> Result<usize> {
    let view = index.view();
    let mut end = HEADER_SIZE;
    let mut stranded = Vec::new();
    for node in view.nodes()? {
        let entry = view.entry(node)?;
        let zone_end = entry.offset as usize + entry.length as usize;
        if view.is_active(node)? {
            end = end.max(zone_end);
        } else if entry.length > 0 {
            stranded.push((node, zone_end));
        }
    }

    for (node, zone_end) in stranded {
        if zone_end > end {
            index.clear_zone(node)?;
        }
    }
    index.region_mut().set_end(end)?;
    check_arenas(index)?;
    Ok(end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::index::{self, NodeIndex, hash_key};
    use crate::cache::region::Region;
    use crate::config::CacheConfig;
    use tempfile::tempdir;

    fn region_in(dir: &std::path::Path) -> Region {
        let config = CacheConfig::default()
            .with_file(dir.join("zone.db"))
            .with_size(102_400);
        let (mut region, _) = Region::open(&config).unwrap();
        index::format(&mut region).unwrap();
        region
    }

    fn link(index: &mut NodeIndexMut<'_>, zone: &Zone, key: u32) {
        index.add_by_key(key, zone.node).unwrap();
    }

    #[test]
    fn test_round_up() {
        assert_eq!(round_up(1), 8);
        assert_eq!(round_up(8), 8);
        assert_eq!(round_up(9), 16);
    }

    #[test]
    fn test_fresh_zone_bumps_end_and_zeroes_padding() {
        let dir = tempdir().unwrap();
        let mut region = region_in(dir.path());
        region.bytes_mut(HEADER_SIZE, 16).unwrap().fill(0xAA);

        let mut index = NodeIndexMut::new(&mut region);
        let zone = place(&mut index, b"abcdefghij").unwrap();
        assert_eq!(zone.offset, HEADER_SIZE);
        assert_eq!(zone.length, 16);
        assert!(!zone.reused);
        assert_eq!(index.view().region().end().unwrap(), HEADER_SIZE + 16);

        let bytes = index.view().region().bytes(HEADER_SIZE, 16).unwrap();
        assert_eq!(&bytes[..10], b"abcdefghij");
        assert!(bytes[10..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_exact_fit_reuse() {
        let dir = tempdir().unwrap();
        let mut region = region_in(dir.path());
        let mut index = NodeIndexMut::new(&mut region);

        let first = place(&mut index, &[1; 20]).unwrap();
        link(&mut index, &first, 1);
        let second = place(&mut index, &[2; 40]).unwrap();
        link(&mut index, &second, 2);
        index.remove_node(first.node).unwrap();

        // 30 rounds to 32, not 24: no reuse
        let other = place(&mut index, &[3; 30]).unwrap();
        assert!(!other.reused);
        link(&mut index, &other, 3);

        let again = place(&mut index, &[4; 17]).unwrap();
        assert!(again.reused);
        assert_eq!(again.offset, first.offset);
        assert_eq!(again.node, first.node);

        let untouched = index.view().region().bytes(second.offset, 40).unwrap();
        assert!(untouched.iter().all(|b| *b == 2));
    }

    #[test]
    fn test_arena_full_leaves_state_unchanged() {
        let dir = tempdir().unwrap();
        let mut region = region_in(dir.path());
        let mut index = NodeIndexMut::new(&mut region);

        let blob = vec![7u8; 1000];
        let mut placed = 0;
        let err = loop {
            match place(&mut index, &blob) {
                Ok(zone) => {
                    link(&mut index, &zone, placed);
                    placed += 1;
                }
                Err(e) => break e,
            }
        };
        assert!(matches!(err, CacheError::ArenaFull { .. }));
        assert!(placed > 50);

        let view = index.view();
        let end = view.region().end().unwrap();
        assert!(end <= view.index_low().unwrap());
        assert_eq!(view.node_count().unwrap(), placed);
        assert_eq!(view.active_count().unwrap(), placed);
    }

    #[test]
    fn test_reclaim_tail_uses_highest_live_zone() {
        let dir = tempdir().unwrap();
        let mut region = region_in(dir.path());
        let mut index = NodeIndexMut::new(&mut region);

        let a = place(&mut index, &[1; 8]).unwrap();
        link(&mut index, &a, hash_key(b"a"));
        let b = place(&mut index, &[2; 16]).unwrap();
        link(&mut index, &b, hash_key(b"b"));
        let c = place(&mut index, &[3; 24]).unwrap();
        link(&mut index, &c, hash_key(b"c"));

        index.remove_node(c.node).unwrap();
        let end = reclaim_tail(&mut index).unwrap();
        assert_eq!(end, b.offset + b.length);

        // c's zone now lies beyond End and must not be reused in place
        let view: NodeIndex<'_> = index.view();
        assert_eq!(view.entry(c.node).unwrap().length, 0);
        let d = place(&mut index, &[4; 24]).unwrap();
        assert!(!d.reused);
        assert_eq!(d.node, c.node);
        assert_eq!(d.offset, end);

        index.remove_node(a.node).unwrap();
        index.remove_node(b.node).unwrap();
        index.remove_node(d.node).unwrap();
        assert_eq!(reclaim_tail(&mut index).unwrap(), HEADER_SIZE);
    }
}
