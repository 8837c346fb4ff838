use transport::Pose;

/// Best pose-history entry for a rendered frame.
#[derive(Debug, Clone, Copy)]
pub struct PoseMatch {
    pub target_timestamp_ns: u64,
}

/// Pose store queried once per frame with the renderer-supplied 3x4
/// matrix. A miss never stalls the pipeline; the frame is encoded with
/// the transport-carried timestamp instead.
pub trait PoseHistory: Send + Sync {
    fn best_match(&self, pose: &Pose) -> Option<PoseMatch>;
}

/// Used when no runtime pose store is wired up.
pub struct NoPoseHistory;

impl PoseHistory for NoPoseHistory {
    fn best_match(&self, _pose: &Pose) -> Option<PoseMatch> {
        None
    }
}
