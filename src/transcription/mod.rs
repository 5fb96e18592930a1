//! # Transcription Module
//!
//! Speech-to-text pipeline, from model weights to response text.
//!
//! ## Key Components:
//! - **Model**: Candle-based Whisper weights, tokenizer, and decoding loop
//! - **Engine**: the recognition seam, meaning the traits the rest of the
//!   service works against, plus the Whisper-backed implementation
//! - **Registry**: single-slot engine cache keyed by model identifier
//! - **Service**: the orchestrator driving one upload end to end

pub mod engine;
pub mod model;
pub mod registry;
pub mod service;

pub use engine::{EngineLoader, EngineOutput, RecognitionEngine, WhisperLoader};
pub use model::{ModelSize, Segment};
pub use registry::ModelRegistry;
pub use service::{TranscriptionOutcome, TranscriptionService};
