//! Pose Resolver: camera pose for a frame timestamp.

use std::sync::Arc;
use std::time::Duration;

use crate::error::FrameError;
use crate::geometry::SE3;

use super::provider::TransformProvider;

/// Default bound on how long a lookup may block the producer.
pub const DEFAULT_POSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Resolves `T_reference_tracking` for frame timestamps.
///
/// Built once per session at Start; cheap to clone so the producer can take
/// a copy out of the session lock before blocking on a lookup.
#[derive(Clone)]
pub struct PoseResolver {
    provider: Arc<dyn TransformProvider>,
    tracking_frame: String,
    reference_frame: String,
    timeout: Duration,
}

impl PoseResolver {
    pub fn new(
        provider: Arc<dyn TransformProvider>,
        tracking_frame: impl Into<String>,
        reference_frame: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            provider,
            tracking_frame: tracking_frame.into(),
            reference_frame: reference_frame.into(),
            timeout,
        }
    }

    /// Pose of the tracking frame in the reference frame at `stamp_ns`.
    ///
    /// Fails with [`FrameError::PoseUnavailable`]; callers drop the frame.
    pub fn resolve(&self, stamp_ns: u64) -> Result<SE3, FrameError> {
        self.provider.lookup(
            &self.reference_frame,
            &self.tracking_frame,
            stamp_ns,
            self.timeout,
        )
    }

    pub fn tracking_frame(&self) -> &str {
        &self.tracking_frame
    }

    pub fn reference_frame(&self) -> &str {
        &self.reference_frame
    }
}

impl std::fmt::Debug for PoseResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoseResolver")
            .field("tracking_frame", &self.tracking_frame)
            .field("reference_frame", &self.reference_frame)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::TransformBuffer;
    use approx::assert_relative_eq;
    use nalgebra::{UnitQuaternion, Vector3};

    #[test]
    fn test_resolves_tracking_in_reference() {
        let buffer = Arc::new(TransformBuffer::new());
        buffer.set_transform(
            "world",
            "tool0",
            42,
            SE3::from_rt(UnitQuaternion::identity(), Vector3::new(0.0, 0.3, 0.0)),
        );
        let resolver = PoseResolver::new(buffer, "tool0", "world", Duration::ZERO);

        let pose = resolver.resolve(42).unwrap();
        assert_relative_eq!(pose.translation, Vector3::new(0.0, 0.3, 0.0));
    }

    #[test]
    fn test_missing_pose_is_pose_unavailable() {
        let buffer = Arc::new(TransformBuffer::new());
        let resolver = PoseResolver::new(buffer, "tool0", "world", Duration::from_millis(5));

        assert!(matches!(
            resolver.resolve(1),
            Err(FrameError::PoseUnavailable { .. })
        ));
    }
}
