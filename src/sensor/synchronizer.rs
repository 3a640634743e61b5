//! Approximate-time pairing of depth and color images.
//!
//! Each channel keeps a small cache keyed by timestamp. When a message
//! arrives it is matched against the closest message on the other channel;
//! a pair is emitted when the stamps differ by at most `slop`. Matched
//! messages leave both caches. Unmatched messages stay until the cache
//! overflows, at which point the oldest entry is discarded.

use std::collections::BTreeMap;

use tracing::debug;

use super::frame::Frame;
use super::image::{ColorImage, DepthImage};

/// Pairs depth and color images arriving on independent channels.
pub struct FrameSynchronizer {
    cache_count: usize,
    slop_ns: u64,
    depth: BTreeMap<u64, DepthImage>,
    color: BTreeMap<u64, ColorImage>,
}

impl FrameSynchronizer {
    pub fn new(cache_count: usize, slop_ns: u64) -> Self {
        Self {
            cache_count: cache_count.max(1),
            slop_ns,
            depth: BTreeMap::new(),
            color: BTreeMap::new(),
        }
    }

    /// Add a depth image; returns a frame if it completes a pair.
    pub fn push_depth(&mut self, stamp_ns: u64, image: DepthImage) -> Option<Frame> {
        let (depth, (color_stamp, color)) = match_pair(
            &mut self.depth,
            &mut self.color,
            stamp_ns,
            image,
            self.cache_count,
            self.slop_ns,
        )?;
        Some(Frame {
            depth,
            color,
            stamp_ns: color_stamp,
        })
    }

    /// Add a color image; returns a frame if it completes a pair.
    pub fn push_color(&mut self, stamp_ns: u64, image: ColorImage) -> Option<Frame> {
        let (color, (_, depth)) = match_pair(
            &mut self.color,
            &mut self.depth,
            stamp_ns,
            image,
            self.cache_count,
            self.slop_ns,
        )?;
        Some(Frame {
            depth,
            color,
            stamp_ns,
        })
    }

    /// Number of unmatched (depth, color) messages held.
    pub fn pending(&self) -> (usize, usize) {
        (self.depth.len(), self.color.len())
    }

    pub fn clear(&mut self) {
        self.depth.clear();
        self.color.clear();
    }
}

/// Insert `msg` into `own`, then look for the closest partner in `other`.
///
/// Returns `(msg, (partner_stamp, partner))` on a match.
fn match_pair<A, B>(
    own: &mut BTreeMap<u64, A>,
    other: &mut BTreeMap<u64, B>,
    stamp_ns: u64,
    msg: A,
    cache_count: usize,
    slop_ns: u64,
) -> Option<(A, (u64, B))> {
    own.insert(stamp_ns, msg);
    while own.len() > cache_count {
        if let Some((evicted, _)) = own.pop_first() {
            debug!(stamp_ns = evicted, "Synchronizer cache full, dropping oldest message");
        }
    }
    // The new message may itself have been the oldest one.
    if !own.contains_key(&stamp_ns) {
        return None;
    }

    let lo = stamp_ns.saturating_sub(slop_ns);
    let hi = stamp_ns.saturating_add(slop_ns);
    let partner_stamp = other
        .range(lo..=hi)
        .map(|(&s, _)| s)
        .min_by_key(|&s| s.abs_diff(stamp_ns))?;

    let partner = other.remove(&partner_stamp)?;
    let msg = own.remove(&stamp_ns)?;
    Some((msg, (partner_stamp, partner)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MS: u64 = 1_000_000;

    fn depth() -> DepthImage {
        DepthImage::new(2, 2)
    }

    fn color() -> ColorImage {
        ColorImage::new(2, 2)
    }

    #[test]
    fn test_pairs_within_slop() {
        let mut sync = FrameSynchronizer::new(10, 10 * MS);

        assert!(sync.push_depth(100 * MS, depth()).is_none());
        let frame = sync.push_color(105 * MS, color()).expect("pair expected");

        assert_eq!(frame.stamp_ns, 105 * MS);
        assert_eq!(sync.pending(), (0, 0));
    }

    #[test]
    fn test_slop_bound_is_inclusive() {
        let mut sync = FrameSynchronizer::new(10, 10 * MS);

        sync.push_color(0, color());
        assert!(sync.push_depth(10 * MS, depth()).is_some());
    }

    #[test]
    fn test_no_pair_outside_slop() {
        let mut sync = FrameSynchronizer::new(10, 10 * MS);

        sync.push_depth(0, depth());
        assert!(sync.push_color(11 * MS, color()).is_none());
        assert_eq!(sync.pending(), (1, 1));
    }

    #[test]
    fn test_picks_closest_partner() {
        let mut sync = FrameSynchronizer::new(10, 10 * MS);

        sync.push_depth(92 * MS, depth());
        sync.push_depth(99 * MS, depth());
        sync.push_depth(107 * MS, depth());
        let frame = sync.push_color(100 * MS, color()).unwrap();

        assert_eq!(frame.stamp_ns, 100 * MS);
        // 99 ms was consumed; 92 and 107 remain
        assert_eq!(sync.pending(), (2, 0));
        assert!(sync.push_color(108 * MS, color()).is_some());
    }

    #[test]
    fn test_out_of_order_arrival() {
        let mut sync = FrameSynchronizer::new(10, 5 * MS);

        sync.push_color(200 * MS, color());
        sync.push_color(100 * MS, color());
        let frame = sync.push_depth(101 * MS, depth()).unwrap();

        assert_eq!(frame.stamp_ns, 100 * MS);
        assert_eq!(sync.pending(), (0, 1));
    }

    #[test]
    fn test_cache_evicts_oldest() {
        let mut sync = FrameSynchronizer::new(2, MS);

        sync.push_depth(10 * MS, depth());
        sync.push_depth(20 * MS, depth());
        sync.push_depth(30 * MS, depth());
        assert_eq!(sync.pending(), (2, 0));

        // 10 ms was evicted, so this color has no partner
        assert!(sync.push_color(10 * MS, color()).is_none());
        assert!(sync.push_color(20 * MS, color()).is_some());
    }

    #[test]
    fn test_stale_arrival_is_discarded() {
        let mut sync = FrameSynchronizer::new(1, MS);

        sync.push_depth(50 * MS, depth());
        sync.push_color(10 * MS, color());
        // Older than everything cached on its own channel and cache is full
        sync.push_color(5 * MS, color());
        assert_eq!(sync.pending(), (1, 1));
    }
}
