//! # CAPTCHA Image Classifier
//!
//! Turns a challenge image into a 4-character answer using a pretrained
//! multi-head character classifier.
//!
//! ## Pipeline
//!
//! 1. Decode the image bytes (any format supported by the `image` crate)
//! 2. Convert to a single grayscale channel
//! 3. Resize to the model's input dimensions (Lanczos)
//! 4. Normalize every pixel with `(v / 255 - mean) / std`
//! 5. Run inference: one probability vector per character position
//! 6. Arg-max each head and map the index through the character table
//!
//! The answer is accepted only when it is exactly 4 characters long and every
//! character belongs to the model's character set, whatever the confidence.
//!
//! ## Fail-closed loading
//!
//! [`ImageClassifier::load`] never fails. Missing or broken artifacts yield
//! [`ImageClassifier::Unavailable`], whose `classify` always rejects. The rest
//! of the system keeps running without a solver.

use log::{error, info, warn};
use rand::Rng;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::sync::Arc;
use std::time::Instant;

use crate::common::config::ClassifierConfig;
use crate::common::error::ClassifierError;
use crate::processing::metrics::{SolverStats, SolverStatsSnapshot};
use crate::processing::onnx::OnnxModel;

/// Number of characters in every challenge.
pub const CODE_LENGTH: usize = 4;

/// An inference engine producing per-position character probabilities.
pub trait CharacterModel: Send + Sync {
    /// Run one inference on a row-major `(1, 1, height, width)` input.
    fn infer(
        &self,
        input: &[f32],
        height: usize,
        width: usize,
    ) -> Result<Vec<Vec<f32>>, ClassifierError>;
}

// ============================================================================
// MODEL METADATA
// ============================================================================

/// Descriptor shipped next to the model file.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelMetadata {
    /// `[channels, height, width]` or `[batch, height, width, ...]`; indices 1 and 2 are used
    pub input_shape: Vec<usize>,
    pub normalization: Normalization,
    /// Stringified class index -> character
    pub idx_to_char: HashMap<String, String>,
    /// Every character the model can legitimately emit
    pub chars: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Normalization {
    pub mean: Vec<f32>,
    pub std: Vec<f32>,
}

impl ModelMetadata {
    pub fn from_json(content: &str) -> Result<Self, ClassifierError> {
        let metadata: ModelMetadata = serde_json::from_str(content)
            .map_err(|e| ClassifierError::Metadata(e.to_string()))?;
        metadata.check()?;
        Ok(metadata)
    }

    /// `(height, width)` of the model input.
    pub fn dimensions(&self) -> (usize, usize) {
        (self.input_shape[1], self.input_shape[2])
    }

    pub fn mean(&self) -> f32 {
        self.normalization.mean[0]
    }

    pub fn std(&self) -> f32 {
        self.normalization.std[0]
    }

    pub fn valid_chars(&self) -> HashSet<char> {
        self.chars.chars().collect()
    }

    fn check(&self) -> Result<(), ClassifierError> {
        if self.input_shape.len() < 3 || self.input_shape[1] == 0 || self.input_shape[2] == 0 {
            return Err(ClassifierError::Metadata(format!(
                "input_shape {:?} has no usable height/width",
                self.input_shape
            )));
        }
        if self.normalization.mean.is_empty() || self.normalization.std.is_empty() {
            return Err(ClassifierError::Metadata(
                "normalization mean/std are empty".to_string(),
            ));
        }
        if self.normalization.std[0] == 0.0 {
            return Err(ClassifierError::Metadata("normalization std is zero".to_string()));
        }
        if self.idx_to_char.is_empty() || self.chars.is_empty() {
            return Err(ClassifierError::Metadata(
                "character table is empty".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// CLASSIFICATION RESULT
// ============================================================================

/// Answer of one `classify` call.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    /// The accepted 4-character answer, `None` when rejected
    pub code: Option<String>,
    pub ok: bool,
    /// Mean of the per-position arg-max probabilities (0 when rejected)
    pub confidence: f32,
}

impl Classification {
    pub fn rejected() -> Self {
        Self {
            code: None,
            ok: false,
            confidence: 0.0,
        }
    }

    fn accepted(code: String, confidence: f32) -> Self {
        Self {
            code: Some(code),
            ok: true,
            confidence,
        }
    }
}

// ============================================================================
// PURE HELPERS
// ============================================================================

/// Decode, grayscale, resize and normalize an image into model input.
pub fn preprocess(
    image_bytes: &[u8],
    height: usize,
    width: usize,
    mean: f32,
    std: f32,
) -> Result<Vec<f32>, ClassifierError> {
    let img = image::load_from_memory(image_bytes)?;
    let gray = img.to_luma8();
    let resized = image::imageops::resize(
        &gray,
        width as u32,
        height as u32,
        image::imageops::FilterType::Lanczos3,
    );

    Ok(resized
        .pixels()
        .map(|p| (p[0] as f32 / 255.0 - mean) / std)
        .collect())
}

fn argmax(probs: &[f32]) -> Option<(usize, f32)> {
    probs
        .iter()
        .copied()
        .enumerate()
        .filter(|(_, p)| !p.is_nan())
        .fold(None, |best, (idx, p)| match best {
            Some((_, best_p)) if best_p >= p => best,
            _ => Some((idx, p)),
        })
}

/// Map every head to its most likely character.
///
/// Returns the concatenated text and the mean arg-max probability, or `None`
/// if a head is empty or an index has no entry in the character table.
pub fn decode_heads(
    heads: &[Vec<f32>],
    idx_to_char: &HashMap<String, String>,
) -> Option<(String, f32)> {
    if heads.is_empty() {
        return None;
    }

    let mut text = String::new();
    let mut total = 0.0f32;
    for probs in heads {
        let (idx, confidence) = argmax(probs)?;
        text.push_str(idx_to_char.get(&idx.to_string())?);
        total += confidence;
    }

    Some((text, total / heads.len() as f32))
}

/// A decoded answer is usable only with exactly [`CODE_LENGTH`] valid characters.
pub fn is_acceptable(text: &str, valid_chars: &HashSet<char>) -> bool {
    text.chars().count() == CODE_LENGTH && text.chars().all(|c| valid_chars.contains(&c))
}

// ============================================================================
// CLASSIFIER
// ============================================================================

/// A loaded model plus everything needed to run it.
pub struct Solver {
    model: Box<dyn CharacterModel>,
    metadata: ModelMetadata,
    valid_chars: HashSet<char>,
    stats: SolverStats,
}

impl Solver {
    fn classify(&self, image_bytes: &[u8]) -> Classification {
        self.stats.record_attempt();
        let started = Instant::now();

        match self.try_classify(image_bytes) {
            Ok(Some((text, confidence))) => {
                info!(
                    "🔤 Solver decoded '{}' (confidence {:.3}, {:.3}s)",
                    text,
                    confidence,
                    started.elapsed().as_secs_f64()
                );
                self.stats.record_success();
                Classification::accepted(text, confidence)
            }
            Ok(None) => {
                self.stats.record_failure();
                Classification::rejected()
            }
            Err(e) => {
                error!("❌ Solver failed on challenge image: {}", e);
                self.stats.record_failure();
                Classification::rejected()
            }
        }
    }

    fn try_classify(&self, image_bytes: &[u8]) -> Result<Option<(String, f32)>, ClassifierError> {
        let (height, width) = self.metadata.dimensions();
        let input = preprocess(
            image_bytes,
            height,
            width,
            self.metadata.mean(),
            self.metadata.std(),
        )?;

        let heads = self.model.infer(&input, height, width)?;
        if heads.len() != CODE_LENGTH {
            warn!(
                "⚠️  Solver produced {} heads, expected {}",
                heads.len(),
                CODE_LENGTH
            );
            return Ok(None);
        }

        let Some((text, confidence)) = decode_heads(&heads, &self.metadata.idx_to_char) else {
            warn!("⚠️  Solver output did not map through the character table");
            return Ok(None);
        };

        if !is_acceptable(&text, &self.valid_chars) {
            warn!(
                "⚠️  Solver answer '{}' rejected (length {}, expected {})",
                text,
                text.chars().count(),
                CODE_LENGTH
            );
            return Ok(None);
        }

        Ok(Some((text, confidence)))
    }
}

/// Handle to the CAPTCHA solver, or the reason it is not available.
pub enum ImageClassifier {
    Ready(Arc<Solver>),
    Unavailable { reason: String },
}

impl ImageClassifier {
    /// Load the model and metadata named by `config`.
    ///
    /// Never fails: any problem yields [`ImageClassifier::Unavailable`].
    pub fn load(config: &ClassifierConfig) -> Self {
        let model_path = config.model_path();
        let metadata_path = config.metadata_path();
        info!("🧠 Looking for CAPTCHA model at {}", model_path.display());

        let loaded = (|| {
            if !metadata_path.exists() {
                return Err(ClassifierError::MissingArtifact(
                    metadata_path.display().to_string(),
                ));
            }
            if !model_path.exists() {
                return Err(ClassifierError::MissingArtifact(
                    model_path.display().to_string(),
                ));
            }
            let content = fs::read_to_string(&metadata_path)
                .map_err(|e| ClassifierError::Metadata(e.to_string()))?;
            let metadata = ModelMetadata::from_json(&content)?;
            let (height, width) = metadata.dimensions();
            let model = OnnxModel::load(&model_path, height, width)?;
            Ok((model, metadata))
        })();

        match loaded {
            Ok((model, metadata)) => Self::from_model(Box::new(model), metadata),
            Err(e) => {
                error!("❌ CAPTCHA solver disabled: {}", e);
                Self::unavailable(e.to_string())
            }
        }
    }

    /// Wrap an inference engine after a sanity inference on random input.
    ///
    /// The classifier is unavailable unless that inference yields exactly
    /// [`CODE_LENGTH`] heads.
    pub fn from_model(model: Box<dyn CharacterModel>, metadata: ModelMetadata) -> Self {
        let (height, width) = metadata.dimensions();
        let dummy: Vec<f32> = {
            let mut rng = rand::thread_rng();
            (0..height * width).map(|_| rng.gen::<f32>()).collect()
        };

        match model.infer(&dummy, height, width) {
            Ok(heads) if heads.len() == CODE_LENGTH => {
                info!("✅ CAPTCHA model ready ({}x{} input)", width, height);
                let valid_chars = metadata.valid_chars();
                Self::Ready(Arc::new(Solver {
                    model,
                    metadata,
                    valid_chars,
                    stats: SolverStats::new(),
                }))
            }
            Ok(heads) => {
                let reason = format!(
                    "sanity inference produced {} outputs, expected {}",
                    heads.len(),
                    CODE_LENGTH
                );
                error!("❌ CAPTCHA solver disabled: {}", reason);
                Self::unavailable(reason)
            }
            Err(e) => {
                error!("❌ CAPTCHA solver disabled: sanity inference failed: {}", e);
                Self::unavailable(e.to_string())
            }
        }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    /// Classify on the current thread.
    pub fn classify_blocking(&self, image_bytes: &[u8]) -> Classification {
        match self {
            Self::Ready(solver) => solver.classify(image_bytes),
            Self::Unavailable { .. } => Classification::rejected(),
        }
    }

    /// Classify on the blocking thread pool so inference cannot stall I/O tasks.
    pub async fn classify(&self, image_bytes: Vec<u8>) -> Classification {
        let solver = match self {
            Self::Ready(solver) => solver.clone(),
            Self::Unavailable { .. } => return Classification::rejected(),
        };

        tokio::task::spawn_blocking(move || solver.classify(&image_bytes))
            .await
            .unwrap_or_else(|e| {
                error!("❌ Solver task panicked: {}", e);
                Classification::rejected()
            })
    }

    pub fn stats(&self) -> Option<SolverStatsSnapshot> {
        match self {
            Self::Ready(solver) => Some(solver.stats.snapshot()),
            Self::Unavailable { .. } => None,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{ImageBuffer, Luma};

    /// Model that ignores its input and returns fixed heads.
    pub(crate) struct FixedHeads(pub Vec<Vec<f32>>);

    impl CharacterModel for FixedHeads {
        fn infer(&self, _: &[f32], _: usize, _: usize) -> Result<Vec<Vec<f32>>, ClassifierError> {
            Ok(self.0.clone())
        }
    }

    pub(crate) fn metadata() -> ModelMetadata {
        ModelMetadata::from_json(
            r#"{
                "input_shape": [1, 8, 16],
                "normalization": {"mean": [0.5], "std": [0.5]},
                "idx_to_char": {"0": "A", "1": "B", "2": "C", "3": "D", "4": "D1", "5": "a"},
                "chars": "ABCD"
            }"#,
        )
        .unwrap()
    }

    /// One-hot head for class `idx` with probability `p`.
    pub(crate) fn head(idx: usize, p: f32) -> Vec<f32> {
        let mut probs = vec![(1.0 - p) / 5.0; 6];
        probs[idx] = p;
        probs
    }

    pub(crate) fn png(width: u32, height: u32, shade: u8) -> Vec<u8> {
        let img: ImageBuffer<Luma<u8>, Vec<u8>> =
            ImageBuffer::from_fn(width, height, |_, _| Luma([shade]));
        let mut bytes = Vec::new();
        img.write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn test_classify_accepts_four_valid_chars() {
        let heads = vec![head(0, 0.9), head(1, 0.8), head(2, 0.7), head(3, 0.6)];
        let classifier = ImageClassifier::from_model(Box::new(FixedHeads(heads)), metadata());
        assert!(classifier.is_available());

        let result = classifier.classify_blocking(&png(40, 20, 200));
        assert!(result.ok);
        assert_eq!(result.code.as_deref(), Some("ABCD"));
        assert!((result.confidence - 0.75).abs() < 1e-6);

        let stats = classifier.stats().unwrap();
        assert_eq!(stats.attempts, 1);
        assert_eq!(stats.successful_decodes, 1);
    }

    #[test]
    fn test_five_char_decode_is_rejected_regardless_of_confidence() {
        // "A" "B" "C" "D1" concatenates to "ABCD1"
        let heads = vec![head(0, 0.99), head(1, 0.99), head(2, 0.99), head(4, 0.99)];
        let classifier = ImageClassifier::from_model(Box::new(FixedHeads(heads)), metadata());

        let result = classifier.classify_blocking(&png(40, 20, 10));
        assert_eq!(result, Classification::rejected());
    }

    #[test]
    fn test_char_outside_valid_set_is_rejected() {
        let heads = vec![head(0, 0.9), head(5, 0.9), head(2, 0.9), head(3, 0.9)];
        let classifier = ImageClassifier::from_model(Box::new(FixedHeads(heads)), metadata());

        assert!(!classifier.classify_blocking(&png(40, 20, 10)).ok);
        assert_eq!(classifier.stats().unwrap().failures, 1);
    }

    #[test]
    fn test_is_acceptable() {
        let valid: HashSet<char> = "ABCD".chars().collect();
        assert!(is_acceptable("DCBA", &valid));
        assert!(!is_acceptable("ABCD1", &valid));
        assert!(!is_acceptable("ABC", &valid));
        assert!(!is_acceptable("ABCx", &valid));
    }

    #[test]
    fn test_wrong_head_count_fails_closed() {
        let heads = vec![head(0, 0.9), head(1, 0.9), head(2, 0.9)];
        let classifier = ImageClassifier::from_model(Box::new(FixedHeads(heads)), metadata());

        assert!(!classifier.is_available());
        assert!(!classifier.classify_blocking(&png(40, 20, 10)).ok);
        assert!(classifier.stats().is_none());
    }

    #[test]
    fn test_missing_artifacts_fail_closed() {
        let dir = tempfile::tempdir().unwrap();
        let config = ClassifierConfig {
            model_dir: dir.path().to_path_buf(),
            ..ClassifierConfig::default()
        };

        let classifier = ImageClassifier::load(&config);
        match classifier {
            ImageClassifier::Unavailable { reason } => assert!(reason.contains("missing")),
            ImageClassifier::Ready(_) => panic!("classifier must be unavailable"),
        }
    }

    #[test]
    fn test_preprocess_normalizes_and_resizes() {
        let input = preprocess(&png(40, 20, 255), 8, 16, 0.5, 0.5).unwrap();
        assert_eq!(input.len(), 8 * 16);
        assert!(input.iter().all(|v| (v - 1.0).abs() < 1e-3));

        let input = preprocess(&png(40, 20, 0), 8, 16, 0.5, 0.5).unwrap();
        assert!(input.iter().all(|v| (v + 1.0).abs() < 1e-3));
    }

    #[test]
    fn test_preprocess_rejects_garbage() {
        assert!(preprocess(b"not an image", 8, 16, 0.5, 0.5).is_err());
    }

    #[test]
    fn test_metadata_rejects_zero_std() {
        let result = ModelMetadata::from_json(
            r#"{"input_shape": [1, 8, 16], "normalization": {"mean": [0.5], "std": [0.0]},
                "idx_to_char": {"0": "A"}, "chars": "A"}"#,
        );
        assert!(matches!(result, Err(ClassifierError::Metadata(_))));
    }

    #[tokio::test]
    async fn test_async_classify_runs_off_thread() {
        let heads = vec![head(3, 0.9), head(2, 0.9), head(1, 0.9), head(0, 0.9)];
        let classifier = ImageClassifier::from_model(Box::new(FixedHeads(heads)), metadata());

        let result = classifier.classify(png(40, 20, 128)).await;
        assert_eq!(result.code.as_deref(), Some("DCBA"));
    }
}
