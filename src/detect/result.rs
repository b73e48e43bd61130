use std::fmt;

/// Axis-aligned box in pixel coordinates of the image that was passed to
/// the detector: `(x1, y1)` top-left, `(x2, y2)` bottom-right.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let inter = BoundingBox::new(
            self.x1.max(other.x1),
            self.y1.max(other.y1),
            self.x2.min(other.x2),
            self.y2.min(other.y2),
        )
        .area();
        let union = self.area() + other.area() - inter;
        if union <= 0.0 || !union.is_finite() {
            return 0.0;
        }
        inter / union
    }

    /// Scale both axes, e.g. from model input space back to the frame.
    pub fn scaled(&self, sx: f32, sy: f32) -> Self {
        Self::new(self.x1 * sx, self.y1 * sy, self.x2 * sx, self.y2 * sy)
    }

    /// Clip to `[0, width) x [0, height)`.
    pub fn clamped(&self, width: u32, height: u32) -> Self {
        let max_x = width.saturating_sub(1) as f32;
        let max_y = height.saturating_sub(1) as f32;
        Self::new(
            self.x1.clamp(0.0, max_x),
            self.y1.clamp(0.0, max_y),
            self.x2.clamp(0.0, max_x),
            self.y2.clamp(0.0, max_y),
        )
    }
}

/// One detected object. Produced fresh per inference call.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub class_id: usize,
    pub class_name: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl Detection {
    pub fn new(class_id: usize, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            class_id,
            class_name: super::classes::class_name(class_id).to_string(),
            confidence,
            bbox,
        }
    }
}

impl fmt::Display for Detection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:.2} [{:.0},{:.0},{:.0},{:.0}]",
            self.class_name, self.confidence, self.bbox.x1, self.bbox.y1, self.bbox.x2, self.bbox.y2
        )
    }
}

/// Greedy non-maximum suppression. Boxes of different classes never
/// suppress each other.
pub fn non_max_suppression(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.retain(|d| d.confidence.is_finite());
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<Detection> = Vec::with_capacity(detections.len());
    'outer: for candidate in detections {
        for kept in &keep {
            if kept.class_id == candidate.class_id && kept.bbox.iou(&candidate.bbox) > iou_threshold
            {
                continue 'outer;
            }
        }
        keep.push(candidate);
    }
    keep
}
