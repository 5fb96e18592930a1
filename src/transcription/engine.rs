//! # Recognition Engine
//!
//! The speech-to-text engine boundary. The orchestrator and registry work
//! against the `RecognitionEngine` and `EngineLoader` traits; the concrete
//! implementation wraps the Candle-based Whisper model.
//!
//! ## Contract:
//! An engine is invoked with an audio file path (canonical format: 16 kHz
//! mono 16-bit PCM WAV) and an optional language hint, and returns the
//! ordered segments it emitted plus summary metadata. Engines are shared
//! handles: one caller may keep transcribing with an engine while the
//! registry replaces its cached reference.

use crate::transcription::model::{ModelSize, Segment, WhisperModel, SAMPLE_RATE};
use anyhow::{anyhow, Result};
use candle_core::Device;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Everything the engine reports for one audio file.
#[derive(Debug, Clone)]
pub struct EngineOutput {
    /// Recognized segments, in emission order
    pub segments: Vec<Segment>,
    /// Language the engine settled on, when it reports one
    pub language: Option<String>,
    /// Audio duration in seconds, when the engine can determine it
    pub duration: Option<f64>,
}

/// A loaded speech-recognition engine.
pub trait RecognitionEngine: Send + Sync {
    /// Transcribe the audio file at `audio_path`. An absent language hint
    /// leaves language selection to the engine.
    fn transcribe(&self, audio_path: &Path, language: Option<&str>) -> Result<EngineOutput>;

    /// Identifier this engine was constructed for.
    fn model_id(&self) -> &str;
}

/// Constructs engines from model identifiers. Loading is expensive (weights
/// download and device initialization), which is why the registry caches
/// the result.
pub trait EngineLoader: Send + Sync {
    fn load(&self, model_id: &str) -> Result<Arc<dyn RecognitionEngine>>;
}

/// Whisper-backed engine. Decoding mutates the model's key/value caches, so
/// the model sits behind a mutex; requests for the same engine serialize at
/// the actual inference step.
pub struct WhisperEngine {
    model_id: String,
    inner: Mutex<WhisperModel>,
}

impl RecognitionEngine for WhisperEngine {
    fn transcribe(&self, audio_path: &Path, language: Option<&str>) -> Result<EngineOutput> {
        let (samples, duration) = read_wav_samples(audio_path)?;

        let mut model = self
            .inner
            .lock()
            .map_err(|_| anyhow!("recognition engine lock poisoned"))?;
        let segments = model.transcribe_samples(&samples, language)?;

        Ok(EngineOutput {
            segments,
            language: language.map(str::to_string),
            duration: Some(duration),
        })
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

/// Loader for Whisper engines on a fixed compute device.
pub struct WhisperLoader {
    device: Device,
}

impl WhisperLoader {
    pub fn new(device: Device) -> Self {
        Self { device }
    }
}

impl EngineLoader for WhisperLoader {
    fn load(&self, model_id: &str) -> Result<Arc<dyn RecognitionEngine>> {
        let size: ModelSize = model_id.parse()?;
        let model = WhisperModel::load(size, self.device.clone())?;
        Ok(Arc::new(WhisperEngine {
            model_id: model_id.to_string(),
            inner: Mutex::new(model),
        }))
    }
}

/// Read a WAV file into 16 kHz mono f32 samples plus its duration in
/// seconds. Multi-channel audio is downmixed by averaging; integer sample
/// formats are scaled into [-1.0, 1.0].
fn read_wav_samples(path: &Path) -> Result<(Vec<f32>, f64)> {
    let mut file = std::fs::File::open(path)
        .map_err(|e| anyhow!("Failed to open audio file {}: {}", path.display(), e))?;
    let (header, data) = wav::read(&mut file)
        .map_err(|e| anyhow!("Failed to parse WAV file {}: {}", path.display(), e))?;

    let mut samples: Vec<f32> = match data {
        wav::BitDepth::Eight(v) => v.into_iter().map(|s| (s as f32 - 128.0) / 128.0).collect(),
        wav::BitDepth::Sixteen(v) => v.into_iter().map(|s| s as f32 / 32768.0).collect(),
        wav::BitDepth::TwentyFour(v) => v.into_iter().map(|s| s as f32 / 8_388_608.0).collect(),
        wav::BitDepth::ThirtyTwoFloat(v) => v,
        wav::BitDepth::Empty => return Err(anyhow!("WAV file contains no audio data")),
    };

    let channels = header.channel_count.max(1) as usize;
    if channels > 1 {
        samples = samples
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect();
    }

    if header.sampling_rate as usize != SAMPLE_RATE {
        tracing::warn!(
            sample_rate = header.sampling_rate,
            "WAV sample rate differs from the canonical 16 kHz; \
             recognition accuracy may suffer"
        );
    }

    let duration = samples.len() as f64 / header.sampling_rate.max(1) as f64;
    Ok((samples, duration))
}
