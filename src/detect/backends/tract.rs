#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use image::imageops::{self, FilterType};
use image::RgbImage;
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::classes::COCO_CLASSES;
use crate::detect::result::{non_max_suppression, BoundingBox, Detection};

const NMS_IOU: f32 = 0.45;
const BOX_ATTRS: usize = 4;

/// Tract-based YOLOv8 backend for ONNX inference.
///
/// Frames are stretched to the square model input (no letterbox); boxes are
/// mapped back to frame coordinates. Expects the standard export layout
/// `[1, 4 + classes, anchors]` with `cx, cy, w, h` in input pixels.
pub struct TractBackend {
    model: RunnableModel<TypedFact, Box<dyn TypedOp>, TypedModel>,
    input_size: u32,
    confidence_threshold: f32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let side = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, side, side)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        log::info!(
            "TractBackend: loaded {} (input {}x{})",
            model_path.display(),
            input_size,
            input_size
        );
        Ok(Self {
            model,
            input_size,
            confidence_threshold: 0.4,
        })
    }

    /// Override the default confidence threshold.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    fn build_input(&self, image: &RgbImage) -> Tensor {
        let resized = imageops::resize(image, self.input_size, self.input_size, FilterType::Triangle);
        let side = self.input_size as usize;
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, side, side), |(_, c, y, x)| {
            resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
        });
        input.into_tensor()
    }

    fn decode(&self, outputs: TVec<TValue>, width: u32, height: u32) -> Result<Vec<Detection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = view.shape().to_vec();
        if shape.len() != 3 || shape[0] != 1 {
            bail!("unexpected YOLO output shape {:?}", shape);
        }
        // Some exports put anchors first; attributes are always the short axis.
        let transposed = shape[1] > shape[2];
        let (attrs, anchors) = if transposed {
            (shape[2], shape[1])
        } else {
            (shape[1], shape[2])
        };
        if attrs <= BOX_ATTRS {
            bail!("YOLO output has no class scores: {:?}", shape);
        }
        let at = |attr: usize, anchor: usize| {
            if transposed {
                view[[0, anchor, attr]]
            } else {
                view[[0, attr, anchor]]
            }
        };

        let classes = (attrs - BOX_ATTRS).min(COCO_CLASSES.len());
        let sx = width as f32 / self.input_size as f32;
        let sy = height as f32 / self.input_size as f32;
        let mut detections = Vec::new();
        for anchor in 0..anchors {
            let mut best = (0usize, f32::NEG_INFINITY);
            for class_id in 0..classes {
                let score = at(BOX_ATTRS + class_id, anchor);
                if score > best.1 {
                    best = (class_id, score);
                }
            }
            let (class_id, score) = best;
            if !score.is_finite() || score < self.confidence_threshold {
                continue;
            }
            let (cx, cy, w, h) = (at(0, anchor), at(1, anchor), at(2, anchor), at(3, anchor));
            let bbox = BoundingBox::new(cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0)
                .scaled(sx, sy)
                .clamped(width, height);
            detections.push(Detection::new(class_id, score, bbox));
        }
        Ok(non_max_suppression(detections, NMS_IOU))
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, image: &RgbImage) -> Result<Vec<Detection>> {
        let input = self.build_input(image);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode(outputs, image.width(), image.height())
    }

    fn warm_up(&mut self) -> Result<()> {
        let blank = RgbImage::new(self.input_size, self.input_size);
        self.detect(&blank).map(|_| ())
    }
}
