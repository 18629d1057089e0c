#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::caption::beam::{beam_search, TokenScorer};
use crate::caption::model::CaptionModel;
use crate::caption::preprocess::to_chw;
use crate::caption::vocab::Vocabulary;
use crate::config::CaptionSettings;
use crate::frame::Frame;

type Plan = TypedRunnableModel<TypedModel>;

/// Encoder/decoder image captioner running exported ONNX graphs through tract.
///
/// The vision encoder maps a `[1, 3, H, W]` image to `[1, N, D]` hidden states.
/// The text decoder takes `input_ids` `[1, max_length]` (right padded) plus the
/// hidden states and returns logits `[1, max_length, vocab]`.
pub struct TractCaptionModel {
    encoder: Plan,
    decoder: Plan,
    vocab: Vocabulary,
    settings: CaptionSettings,
}

impl TractCaptionModel {
    pub fn load(settings: &CaptionSettings) -> Result<Self> {
        let encoder_path = settings
            .encoder_path
            .as_deref()
            .ok_or_else(|| anyhow!("caption encoder_path is required for the tract backend"))?;
        let decoder_path = settings
            .decoder_path
            .as_deref()
            .ok_or_else(|| anyhow!("caption decoder_path is required for the tract backend"))?;
        let vocab_path = settings
            .vocab_path
            .as_deref()
            .ok_or_else(|| anyhow!("caption vocab_path is required for the tract backend"))?;

        let encoder = load_plan(
            encoder_path,
            vec![InferenceFact::dt_shape(
                f32::datum_type(),
                tvec!(
                    1,
                    3,
                    settings.input.height as usize,
                    settings.input.width as usize
                ),
            )],
        )?;
        let decoder = load_plan(
            decoder_path,
            vec![
                InferenceFact::dt_shape(i64::datum_type(), tvec!(1, settings.beam.max_length)),
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, settings.encoder_tokens, settings.encoder_dim),
                ),
            ],
        )?;
        let vocab = Vocabulary::from_file(vocab_path)?.with_special_ids([
            settings.beam.bos_token_id,
            settings.beam.eos_token_id,
            settings.pad_token_id,
        ]);

        log::info!(
            "loaded caption model (encoder {}, decoder {}, {} tokens)",
            encoder_path.display(),
            decoder_path.display(),
            vocab.len()
        );

        Ok(Self {
            encoder,
            decoder,
            vocab,
            settings: settings.clone(),
        })
    }

    fn encode(&self, frame: &Frame) -> Result<Tensor> {
        let spec = &self.settings.input;
        let chw = to_chw(frame, spec)?;
        let input = tract_ndarray::Array4::from_shape_vec(
            (1, 3, spec.height as usize, spec.width as usize),
            chw,
        )
        .context("caption input shape mismatch")?
        .into_tensor();

        let mut outputs = self
            .encoder
            .run(tvec!(input.into()))
            .context("caption encoder inference failed")?;
        if outputs.is_empty() {
            return Err(anyhow!("caption encoder produced no outputs"));
        }
        Ok(outputs.remove(0).into_tensor())
    }
}

fn load_plan(path: &Path, facts: Vec<InferenceFact>) -> Result<Plan> {
    let mut model = tract_onnx::onnx()
        .model_for_path(path)
        .with_context(|| format!("failed to load ONNX model from {}", path.display()))?;
    for (slot, fact) in facts.into_iter().enumerate() {
        model = model
            .with_input_fact(slot, fact)
            .with_context(|| format!("failed to set input fact {} for {}", slot, path.display()))?;
    }
    model
        .into_optimized()
        .with_context(|| format!("failed to optimize {}", path.display()))?
        .into_runnable()
        .with_context(|| format!("failed to build runnable model for {}", path.display()))
}

/// Scores the next token by rerunning the decoder over the padded prefix.
struct DecoderScorer<'a> {
    decoder: &'a Plan,
    hidden: &'a Tensor,
    max_length: usize,
    pad_token_id: i64,
}

impl TokenScorer for DecoderScorer<'_> {
    fn next_logits(&mut self, prefix: &[i64]) -> Result<Vec<f32>> {
        if prefix.is_empty() || prefix.len() > self.max_length {
            return Err(anyhow!("prefix length {} out of range", prefix.len()));
        }
        let mut ids = vec![self.pad_token_id; self.max_length];
        ids[..prefix.len()].copy_from_slice(prefix);
        let ids = tract_ndarray::Array2::from_shape_vec((1, self.max_length), ids)
            .context("decoder input shape mismatch")?
            .into_tensor();

        let outputs = self
            .decoder
            .run(tvec!(ids.into(), self.hidden.clone().into()))
            .context("caption decoder inference failed")?;
        let logits = outputs
            .first()
            .ok_or_else(|| anyhow!("caption decoder produced no outputs"))?
            .to_array_view::<f32>()
            .context("decoder output tensor was not f32")?;
        let shape = logits.shape();
        if shape.len() != 3 || shape[1] < prefix.len() {
            return Err(anyhow!("unexpected decoder output shape {:?}", shape));
        }
        let position = prefix.len() - 1;
        Ok(logits
            .index_axis(tract_ndarray::Axis(0), 0)
            .index_axis(tract_ndarray::Axis(0), position)
            .iter()
            .copied()
            .collect())
    }
}

impl CaptionModel for TractCaptionModel {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn caption(&mut self, frame: &Frame) -> Result<String> {
        let hidden = self.encode(frame)?;
        let mut scorer = DecoderScorer {
            decoder: &self.decoder,
            hidden: &hidden,
            max_length: self.settings.beam.max_length,
            pad_token_id: self.settings.pad_token_id,
        };
        let tokens = beam_search(&mut scorer, &self.settings.beam)?;
        Ok(self.vocab.decode(&tokens))
    }

    fn warm_up(&mut self) -> Result<()> {
        let spec = &self.settings.input;
        let frame = Frame::filled(spec.width, spec.height, [0, 0, 0]);
        self.caption(&frame).map(|_| ())
    }
}
