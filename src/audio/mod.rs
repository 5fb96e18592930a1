//! # Audio Intake Module
//!
//! Coerces arbitrary uploaded audio into the canonical format the
//! recognition engine expects: 16 kHz, mono, 16-bit signed PCM.
//!
//! ## Key Components:
//! - **Format Normalizer**: thin wrapper around an external converter
//!   process (ffmpeg), reporting success/failure as an explicit outcome
//!   rather than an error
//!
//! Deciding whether a given upload needs conversion (by extension) belongs
//! to the transcription orchestrator, not to this module.

pub mod converter;

pub use converter::{ConversionOutcome, FfmpegConverter, FormatNormalizer};
