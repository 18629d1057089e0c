#![cfg(feature = "backend-tract")]

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::caption::preprocess::{to_chw, InputSpec};
use crate::config::SecuritySettings;
use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;
use crate::detect::yolo::{self, YoloParams};
use crate::frame::Frame;

/// Tract-based backend for YOLOv8-style ONNX object detectors.
///
/// Frames are stretched to the square model input; boxes are scaled back to
/// the frame afterwards.
pub struct TractBackend {
    model: TypedRunnableModel<TypedModel>,
    input_size: u32,
    params: YoloParams,
}

impl TractBackend {
    /// Load the model named in the security settings.
    pub fn load(settings: &SecuritySettings) -> Result<Self> {
        let model_path = settings
            .model_path
            .as_deref()
            .ok_or_else(|| anyhow!("security model_path is required for the tract backend"))?;
        let size = settings.input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, size, size)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        log::info!("loaded detector model {}", model_path.display());
        Ok(Self {
            model,
            input_size: settings.input_size,
            params: YoloParams {
                class_threshold: settings.class_threshold,
                iou_threshold: settings.iou_threshold,
                ..YoloParams::default()
            },
        })
    }

    fn build_input(&self, frame: &Frame) -> Result<Tensor> {
        let size = self.input_size as usize;
        let chw = to_chw(frame, &InputSpec::unit(self.input_size, self.input_size))?;
        let input = tract_ndarray::Array4::from_shape_vec((1, 3, size, size), chw)
            .context("detector input shape mismatch")?;
        Ok(input.into_tensor())
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let input = self.build_input(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = view.shape().to_vec();
        if shape.len() != 3 || shape[0] != 1 {
            return Err(anyhow!("unexpected detector output shape {:?}", shape));
        }
        let anchors = shape[2];
        let flat: Vec<f32> = view.iter().copied().collect();

        let size = self.input_size as f32;
        yolo::decode(
            &flat,
            anchors,
            &self.params,
            [frame.width() as f32 / size, frame.height() as f32 / size],
            [frame.width(), frame.height()],
        )
    }

    fn warm_up(&mut self) -> Result<()> {
        let frame = Frame::filled(self.input_size, self.input_size, [0, 0, 0]);
        self.detect(&frame).map(|_| ())
    }
}
