pub const DEFAULT_DETECTION_STRIDE: u64 = 3;

/// Runs inference on every `stride`-th consumed frame (counters start at 1).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DetectionScheduler {
    stride: u64,
}

impl DetectionScheduler {
    /// A zero stride is treated as 1 (infer on every frame).
    pub fn new(stride: u64) -> Self {
        Self {
            stride: stride.max(1),
        }
    }

    pub fn stride(&self) -> u64 {
        self.stride
    }

    pub fn should_infer(&self, frame_counter: u64) -> bool {
        frame_counter != 0 && frame_counter % self.stride == 0
    }
}

impl Default for DetectionScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_DETECTION_STRIDE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_cadence_is_every_third_frame() {
        let scheduler = DetectionScheduler::default();
        let inferred: Vec<u64> = (1..=10).filter(|c| scheduler.should_infer(*c)).collect();
        assert_eq!(inferred, vec![3, 6, 9]);
    }

    #[test]
    fn zero_stride_infers_every_frame() {
        let scheduler = DetectionScheduler::new(0);
        assert!((1..=5).all(|c| scheduler.should_infer(c)));
    }
}
