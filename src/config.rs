//! Controller configuration.
//!
//! Every field has a default, so a YAML file only needs the keys it changes:
//!
//! ```yaml
//! slop_s: 0.02
//! warmup_frames: 10
//! overflow_policy: drop_oldest
//! ```

use std::fs::File;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::capture::{OverflowPolicy, RotationMetric};

/// Longest pose lookup wait accepted from configuration (seconds).
pub const MAX_POSE_TIMEOUT_S: f64 = 3600.0;
/// Slowest consumer rate accepted from configuration (Hz).
pub const MIN_INTEGRATION_RATE_HZ: f64 = 0.01;

/// Tuning for the synchronizer, queue, integration worker and exports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Messages cached per image channel while waiting for a partner.
    pub cache_count: usize,
    /// Maximum depth/color timestamp difference for a pair (seconds).
    pub slop_s: f64,
    /// Consumer tick rate (Hz). One frame is popped per tick.
    pub integration_rate_hz: f64,
    /// Frames that must be seen before the consumer starts popping.
    pub warmup_frames: u64,
    /// Live mode publishes a diagnostic point cloud every this many
    /// integrated frames. Zero disables it.
    pub diagnostic_period: u64,
    /// How long a pose lookup may block the producer (seconds).
    pub pose_timeout_s: f64,
    /// Capture queue capacity.
    pub queue_capacity: usize,
    /// What producers do when the queue is full.
    pub overflow_policy: OverflowPolicy,
    /// Fallback poll period for Stop's drain wait (milliseconds).
    pub drain_poll_interval_ms: u64,
    /// Orientation distance used by the keyframe gate.
    pub rotation_metric: RotationMetric,
    /// Keep admitted keyframes in memory for archiving at Stop.
    pub retain_keyframes: bool,
    /// Point cloud file written next to the mesh.
    pub point_cloud_filename: String,
    /// Unfiltered mesh file written into the archive directory.
    pub archive_mesh_filename: String,
    /// Capacity of the best-effort publication channel.
    pub publish_capacity: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            cache_count: 10,
            slop_s: 0.01,
            integration_rate_hz: 50.0,
            warmup_frames: 30,
            diagnostic_period: 50,
            pose_timeout_s: 5.0,
            queue_capacity: 512,
            overflow_policy: OverflowPolicy::Block,
            drain_poll_interval_ms: 100,
            rotation_metric: RotationMetric::Chordal,
            retain_keyframes: true,
            point_cloud_filename: "integrated_point_cloud.ply".to_string(),
            archive_mesh_filename: "integrated.ply".to_string(),
            publish_capacity: 16,
        }
    }
}

impl ControllerConfig {
    /// Load from a YAML file and validate.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
        let config: Self = serde_yaml::from_reader(file)
            .with_context(|| format!("Failed to parse {:?}", path))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.cache_count == 0 {
            bail!("cache_count must be at least 1");
        }
        if !(self.slop_s.is_finite() && self.slop_s >= 0.0) {
            bail!("slop_s must be finite and non-negative, got {}", self.slop_s);
        }
        if !(self.integration_rate_hz.is_finite()
            && self.integration_rate_hz >= MIN_INTEGRATION_RATE_HZ)
        {
            bail!(
                "integration_rate_hz must be finite and at least {}, got {}",
                MIN_INTEGRATION_RATE_HZ,
                self.integration_rate_hz
            );
        }
        if !(0.0..=MAX_POSE_TIMEOUT_S).contains(&self.pose_timeout_s) {
            bail!(
                "pose_timeout_s must be within [0, {}], got {}",
                MAX_POSE_TIMEOUT_S,
                self.pose_timeout_s
            );
        }
        if self.queue_capacity == 0 {
            bail!("queue_capacity must be at least 1");
        }
        // A blocking queue must hold the whole warm-up or producers stall
        // before the consumer ever pops.
        if self.overflow_policy == OverflowPolicy::Block
            && self.queue_capacity as u64 <= self.warmup_frames
        {
            bail!(
                "queue_capacity ({}) must exceed warmup_frames ({}) with the block policy",
                self.queue_capacity,
                self.warmup_frames
            );
        }
        if self.drain_poll_interval_ms == 0 {
            bail!("drain_poll_interval_ms must be at least 1");
        }
        Ok(())
    }

    pub fn slop_ns(&self) -> u64 {
        (self.slop_s * 1e9).round() as u64
    }

    /// Consumer period. Out-of-range rates are clamped into the accepted
    /// range so an unvalidated config cannot panic here.
    pub fn tick_period(&self) -> Duration {
        let rate = if self.integration_rate_hz.is_nan() {
            MIN_INTEGRATION_RATE_HZ
        } else {
            self.integration_rate_hz.max(MIN_INTEGRATION_RATE_HZ)
        };
        Duration::try_from_secs_f64(1.0 / rate).unwrap_or(Duration::from_millis(20))
    }

    /// Pose lookup timeout, clamped to `[0, MAX_POSE_TIMEOUT_S]`.
    pub fn pose_timeout(&self) -> Duration {
        let secs = if self.pose_timeout_s.is_nan() {
            0.0
        } else {
            self.pose_timeout_s.clamp(0.0, MAX_POSE_TIMEOUT_S)
        };
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::ZERO)
    }

    pub fn drain_poll_interval(&self) -> Duration {
        Duration::from_millis(self.drain_poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = ControllerConfig::default();

        assert_eq!(config.warmup_frames, 30);
        assert_eq!(config.diagnostic_period, 50);
        assert_eq!(config.slop_ns(), 10_000_000);
        assert_eq!(config.tick_period(), Duration::from_millis(20));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("controller.yaml");
        let mut f = File::create(&path).unwrap();
        writeln!(f, "warmup_frames: 5\noverflow_policy: drop_oldest\nrotation_metric: geodesic").unwrap();

        let config = ControllerConfig::load(&path).unwrap();

        assert_eq!(config.warmup_frames, 5);
        assert_eq!(config.overflow_policy, OverflowPolicy::DropOldest);
        assert_eq!(config.rotation_metric, RotationMetric::Geodesic);
        assert_eq!(config.cache_count, 10);
    }

    #[test]
    fn test_rejects_zero_rate() {
        let config = ControllerConfig {
            integration_rate_hz: 0.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_blocking_queue_smaller_than_warmup() {
        let config = ControllerConfig {
            queue_capacity: 4,
            warmup_frames: 30,
            overflow_policy: OverflowPolicy::Block,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let dropping = ControllerConfig {
            overflow_policy: OverflowPolicy::DropOldest,
            ..config.clone()
        };
        assert!(dropping.validate().is_ok());

        let roomy = ControllerConfig {
            queue_capacity: 31,
            ..config
        };
        assert!(roomy.validate().is_ok());
    }

    #[test]
    fn test_rejects_unbounded_durations() {
        for pose_timeout_s in [f64::INFINITY, f64::NAN, 1e300, -1.0] {
            let config = ControllerConfig {
                pose_timeout_s,
                ..Default::default()
            };
            assert!(config.validate().is_err(), "pose_timeout_s {}", pose_timeout_s);
        }
        for integration_rate_hz in [f64::INFINITY, f64::NAN, 1e-300] {
            let config = ControllerConfig {
                integration_rate_hz,
                ..Default::default()
            };
            assert!(
                config.validate().is_err(),
                "integration_rate_hz {}",
                integration_rate_hz
            );
        }
    }

    #[test]
    fn test_durations_never_panic_on_unvalidated_values() {
        let config = ControllerConfig {
            pose_timeout_s: f64::INFINITY,
            integration_rate_hz: 0.0,
            ..Default::default()
        };
        assert_eq!(config.pose_timeout(), Duration::from_secs(3600));
        assert_eq!(config.tick_period(), Duration::from_secs(100));

        let config = ControllerConfig {
            pose_timeout_s: f64::NAN,
            integration_rate_hz: f64::INFINITY,
            ..Default::default()
        };
        assert_eq!(config.pose_timeout(), Duration::ZERO);
        assert_eq!(config.tick_period(), Duration::ZERO);
    }
}
