use std::time::{Duration, Instant};

/// Leaky output-rate governor: sleeps out whatever is left of the
/// `1 / target_fps` budget after an iteration. Oversleep is not paid back.
#[derive(Debug)]
pub struct FrameGovernor {
    budget: Duration,
    overruns: u64,
}

impl FrameGovernor {
    pub fn new(target_fps: f64) -> Self {
        let fps = if target_fps.is_finite() && target_fps > 0.0 {
            target_fps
        } else {
            1.0
        };
        Self {
            budget: Duration::from_secs_f64(1.0 / fps),
            overruns: 0,
        }
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// Iterations that took longer than the budget.
    pub fn overruns(&self) -> u64 {
        self.overruns
    }

    pub fn remaining(&self, elapsed: Duration) -> Option<Duration> {
        self.budget.checked_sub(elapsed).filter(|d| !d.is_zero())
    }

    /// Sleep until one budget after `iteration_start`.
    pub fn pace(&mut self, iteration_start: Instant) {
        match self.remaining(iteration_start.elapsed()) {
            Some(rest) => std::thread::sleep(rest),
            None => self.overruns += 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_follows_target_fps() {
        assert_eq!(FrameGovernor::new(10.0).budget(), Duration::from_millis(100));
        assert_eq!(FrameGovernor::new(0.0).budget(), Duration::from_secs(1));
    }

    #[test]
    fn remaining_is_budget_minus_elapsed() {
        let governor = FrameGovernor::new(10.0);
        assert_eq!(
            governor.remaining(Duration::from_millis(30)),
            Some(Duration::from_millis(70))
        );
        assert_eq!(governor.remaining(Duration::from_millis(100)), None);
        assert_eq!(governor.remaining(Duration::from_millis(250)), None);
    }

    #[test]
    fn pace_sleeps_out_the_budget_and_counts_overruns() {
        let mut governor = FrameGovernor::new(20.0);
        let start = Instant::now();
        governor.pace(start);
        assert!(start.elapsed() >= Duration::from_millis(45));
        assert_eq!(governor.overruns(), 0);

        let late = Instant::now() - Duration::from_millis(80);
        governor.pace(late);
        assert_eq!(governor.overruns(), 1);
    }
}
