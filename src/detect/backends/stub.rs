use anyhow::{bail, Result};
use image::RgbImage;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;

/// Stub backend for testing and demos.
///
/// Returns the same scripted detections on every call (none by default),
/// clipped to the image. `failing_every(n)` makes every nth call fail.
pub struct StubBackend {
    script: Vec<Detection>,
    fail_every: u64,
    calls: Arc<AtomicU64>,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::scripted(Vec::new())
    }

    pub fn scripted(script: Vec<Detection>) -> Self {
        Self {
            script,
            fail_every: 0,
            calls: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn failing_every(mut self, n: u64) -> Self {
        self.fail_every = n;
        self
    }

    /// Counter of `detect` calls, readable after the backend is moved away.
    pub fn call_counter(&self) -> Arc<AtomicU64> {
        self.calls.clone()
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, image: &RgbImage) -> Result<Vec<Detection>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_every > 0 && call % self.fail_every == 0 {
            bail!("stub detector failure on call {}", call);
        }
        Ok(self
            .script
            .iter()
            .map(|d| Detection {
                bbox: d.bbox.clamped(image.width(), image.height()),
                ..d.clone()
            })
            .collect())
    }
}
