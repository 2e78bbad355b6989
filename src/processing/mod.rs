//! # Challenge Image Processing
//!
//! This module turns CAPTCHA challenge images into answers using a pretrained
//! character classifier.

pub mod captcha;
pub mod metrics;
pub mod onnx;

// Re-export main types for convenience
pub use captcha::{CharacterModel, Classification, ImageClassifier, ModelMetadata};
pub use metrics::{SolverStats, SolverStatsSnapshot};
