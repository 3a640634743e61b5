//! Transform lookup interface and an in-memory, time-indexed implementation.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::FrameError;
use crate::geometry::SE3;

/// Source of time-stamped rigid transforms between named frames.
pub trait TransformProvider: Send + Sync {
    /// Look up `T_target_source` at `stamp_ns`, blocking for up to `timeout`
    /// while the transform is not available yet. `stamp_ns == 0` asks for
    /// the latest available transform.
    fn lookup(
        &self,
        target_frame: &str,
        source_frame: &str,
        stamp_ns: u64,
        timeout: Duration,
    ) -> Result<SE3, FrameError>;
}

/// Default history kept per edge.
const DEFAULT_CACHE_DURATION: Duration = Duration::from_secs(10);

type Edge = (String, String);

enum Sample {
    Found(SE3),
    /// Stamp is newer than anything stored; waiting may help.
    NotYet,
    /// Frames unknown or stamp older than the stored history.
    Unavailable,
}

/// Thread-safe buffer of `T_parent_child` samples per edge.
///
/// Lookups interpolate between bracketing samples and can be answered for
/// either direction of an edge. Lookups for a stamp newer than the latest
/// sample wait on a condition variable until a writer catches up or the
/// timeout expires.
pub struct TransformBuffer {
    edges: Mutex<HashMap<Edge, BTreeMap<u64, SE3>>>,
    updated: Condvar,
    cache_ns: u64,
}

impl TransformBuffer {
    pub fn new() -> Self {
        Self::with_cache_duration(DEFAULT_CACHE_DURATION)
    }

    pub fn with_cache_duration(cache: Duration) -> Self {
        Self {
            edges: Mutex::new(HashMap::new()),
            updated: Condvar::new(),
            cache_ns: cache.as_nanos() as u64,
        }
    }

    /// Store `T_parent_child` at `stamp_ns` and wake any waiting lookups.
    pub fn set_transform(&self, parent: &str, child: &str, stamp_ns: u64, transform: SE3) {
        let mut edges = self.edges.lock();
        let history = edges
            .entry((parent.to_string(), child.to_string()))
            .or_default();
        history.insert(stamp_ns, transform);

        let latest = history.keys().next_back().copied().unwrap_or(stamp_ns);
        let horizon = latest.saturating_sub(self.cache_ns);
        *history = history.split_off(&horizon);
        drop(edges);

        self.updated.notify_all();
    }

    pub fn clear(&self) {
        self.edges.lock().clear();
    }

    fn sample(
        edges: &HashMap<Edge, BTreeMap<u64, SE3>>,
        target: &str,
        source: &str,
        stamp_ns: u64,
    ) -> Sample {
        let forward = edges.get(&(target.to_string(), source.to_string()));
        let (history, invert) = match forward {
            Some(h) => (h, false),
            None => match edges.get(&(source.to_string(), target.to_string())) {
                Some(h) => (h, true),
                None => return Sample::NotYet,
            },
        };

        match interpolate(history, stamp_ns) {
            Sample::Found(t) if invert => Sample::Found(t.inverse()),
            other => other,
        }
    }
}

impl Default for TransformBuffer {
    fn default() -> Self {
        Self::new()
    }
}

fn interpolate(history: &BTreeMap<u64, SE3>, stamp_ns: u64) -> Sample {
    let Some((&latest_stamp, latest)) = history.iter().next_back() else {
        return Sample::NotYet;
    };
    if stamp_ns == 0 {
        return Sample::Found(latest.clone());
    }
    if stamp_ns > latest_stamp {
        return Sample::NotYet;
    }
    if let Some(exact) = history.get(&stamp_ns) {
        return Sample::Found(exact.clone());
    }

    let before = history.range(..stamp_ns).next_back();
    let after = history.range(stamp_ns..).next();
    match (before, after) {
        (Some((&t0, p0)), Some((&t1, p1))) => {
            let t = (stamp_ns - t0) as f64 / (t1 - t0) as f64;
            Sample::Found(p0.interpolate(p1, t))
        }
        _ => Sample::Unavailable,
    }
}

impl TransformProvider for TransformBuffer {
    fn lookup(
        &self,
        target_frame: &str,
        source_frame: &str,
        stamp_ns: u64,
        timeout: Duration,
    ) -> Result<SE3, FrameError> {
        if target_frame == source_frame {
            return Ok(SE3::identity());
        }

        let start = Instant::now();
        let deadline = start + timeout;
        let mut edges = self.edges.lock();
        loop {
            match Self::sample(&edges, target_frame, source_frame, stamp_ns) {
                Sample::Found(t) => return Ok(t),
                Sample::Unavailable => break,
                Sample::NotYet => {
                    if self.updated.wait_until(&mut edges, deadline).timed_out() {
                        // One last look in case the final update raced the timeout
                        if let Sample::Found(t) =
                            Self::sample(&edges, target_frame, source_frame, stamp_ns)
                        {
                            return Ok(t);
                        }
                        break;
                    }
                }
            }
        }

        Err(FrameError::PoseUnavailable {
            target_frame: target_frame.to_string(),
            source_frame: source_frame.to_string(),
            stamp_ns,
            waited: start.elapsed(),
        })
    }
}
