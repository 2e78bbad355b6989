//! # ONNX Inference Backend
//!
//! Runs the exported CAPTCHA network with `tract`. The model is optimized for
//! a fixed `(1, 1, height, width)` input once at load time; each call returns
//! one probability vector per character head.

use std::path::Path;
use tract_onnx::prelude::*;

use crate::common::error::ClassifierError;
use crate::processing::captcha::CharacterModel;

/// A loaded, optimized ONNX classifier.
pub struct OnnxModel {
    plan: TypedRunnableModel<TypedModel>,
    height: usize,
    width: usize,
}

impl OnnxModel {
    /// Load and optimize the model for the given input dimensions.
    ///
    /// # Errors
    /// - The file is missing or is not a valid ONNX graph
    /// - The graph cannot be specialized to a `(1, 1, height, width)` input
    pub fn load(path: &Path, height: usize, width: usize) -> Result<Self, ClassifierError> {
        if !path.exists() {
            return Err(ClassifierError::MissingArtifact(path.display().to_string()));
        }

        let plan = tract_onnx::onnx()
            .model_for_path(path)
            .and_then(|model| model.with_input_fact(0, f32::fact([1, 1, height, width]).into()))
            .and_then(|model| model.into_optimized())
            .and_then(|model| model.into_runnable())
            .map_err(|e| ClassifierError::Inference(format!("{:#}", e)))?;

        Ok(Self {
            plan,
            height,
            width,
        })
    }
}

impl CharacterModel for OnnxModel {
    fn infer(
        &self,
        input: &[f32],
        height: usize,
        width: usize,
    ) -> Result<Vec<Vec<f32>>, ClassifierError> {
        if height != self.height || width != self.width {
            return Err(ClassifierError::Inference(format!(
                "model was built for {}x{}, got {}x{}",
                self.height, self.width, height, width
            )));
        }

        let tensor: Tensor =
            tract_ndarray::Array4::from_shape_vec((1, 1, height, width), input.to_vec())
                .map_err(|e| ClassifierError::Inference(e.to_string()))?
                .into();

        let outputs = self
            .plan
            .run(tvec!(tensor.into()))
            .map_err(|e| ClassifierError::Inference(format!("{:#}", e)))?;

        outputs
            .iter()
            .map(|output| {
                output
                    .to_array_view::<f32>()
                    .map(|view| view.iter().copied().collect())
                    .map_err(|e| ClassifierError::Inference(format!("{:#}", e)))
            })
            .collect()
    }
}
