use anyhow::Result;
use image::RgbImage;

use crate::detect::result::Detection;

/// Detector backend trait.
///
/// From the pipeline's point of view a backend is an opaque function from an
/// RGB image to detections. Boxes are in pixel coordinates of `image`.
/// An `Err` is isolated to the calling iteration and treated as "no
/// detections this cycle".
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<Detection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
