use std::sync::atomic::{AtomicBool, Ordering};

/// Tracks the conditions that force the next frame to be an IDR.
///
/// Stream start, downstream packet loss, and explicit insert requests all
/// arm the same pending flag, so any number of events before the next
/// frame coalesce into a single forced keyframe. The periodic keyframe
/// cadence is the encoder's own and does not pass through here.
#[derive(Debug, Default)]
pub struct IdrScheduler {
    pending: AtomicBool,
}

impl IdrScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_stream_start(&self) {
        self.pending.store(true, Ordering::SeqCst);
    }

    pub fn on_packet_loss(&self) {
        self.pending.store(true, Ordering::SeqCst);
    }

    pub fn insert_idr(&self) {
        self.pending.store(true, Ordering::SeqCst);
    }

    /// Whether the next frame must be forced to an IDR; clears the flag.
    pub fn check_and_clear(&self) -> bool {
        self.pending.swap(false, Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_unarmed() {
        let scheduler = IdrScheduler::new();
        assert!(!scheduler.check_and_clear());
    }

    #[test]
    fn test_check_clears_the_flag() {
        let scheduler = IdrScheduler::new();
        scheduler.insert_idr();
        assert!(scheduler.check_and_clear());
        assert!(!scheduler.check_and_clear(), "flag must clear after check");
    }

    #[test]
    fn test_repeated_events_coalesce() {
        let scheduler = IdrScheduler::new();
        scheduler.on_stream_start();
        scheduler.on_packet_loss();
        for _ in 0..10 {
            scheduler.insert_idr();
        }
        assert!(scheduler.check_and_clear(), "one IDR for all pending events");
        assert!(!scheduler.check_and_clear());
    }
}
