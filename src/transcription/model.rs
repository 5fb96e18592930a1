//! # Whisper Model
//!
//! Loading and inference for Whisper models via Candle. Weights and
//! tokenizer files are fetched from HuggingFace (cached locally) and the
//! model decodes audio in 30-second windows, emitting one text segment per
//! window.
//!
//! ## Model identifiers:
//! - **tiny**: ~39MB, fastest but least accurate
//! - **base**: ~74MB, the default for this service
//! - **small**: ~244MB, better accuracy
//! - **medium**: ~769MB, good technical vocabulary
//! - **large**: ~1550MB, best accuracy but slowest

use anyhow::{anyhow, Result};
use candle_core::{Device, IndexOp, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::whisper::{self as m, Config};
use tokenizers::Tokenizer;

/// Samples per second expected by the model.
pub const SAMPLE_RATE: usize = 16_000;

/// Whisper processes audio in windows of at most 30 seconds.
const WINDOW_SECONDS: usize = 30;

/// A contiguous span of recognized speech, in emission order.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Segment {
    pub text: String,
    /// Window start offset within the audio, in seconds
    pub start: f64,
    /// Window end offset within the audio, in seconds
    pub end: f64,
}

/// Known Whisper model variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ModelSize {
    Tiny,
    Base,
    Small,
    Medium,
    Large,
}

impl ModelSize {
    pub const ALL: [ModelSize; 5] = [
        ModelSize::Tiny,
        ModelSize::Base,
        ModelSize::Small,
        ModelSize::Medium,
        ModelSize::Large,
    ];

    /// HuggingFace repository holding this variant's weights.
    pub fn repo_name(&self) -> &'static str {
        match self {
            ModelSize::Tiny => "openai/whisper-tiny",
            ModelSize::Base => "openai/whisper-base",
            ModelSize::Small => "openai/whisper-small",
            ModelSize::Medium => "openai/whisper-medium",
            ModelSize::Large => "openai/whisper-large-v2",
        }
    }

    /// Approximate on-disk size in MB.
    pub fn size_mb(&self) -> u32 {
        match self {
            ModelSize::Tiny => 39,
            ModelSize::Base => 74,
            ModelSize::Small => 244,
            ModelSize::Medium => 769,
            ModelSize::Large => 1550,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ModelSize::Tiny => "Fastest, basic accuracy",
            ModelSize::Base => "Fast, good default",
            ModelSize::Small => "Balanced speed and accuracy",
            ModelSize::Medium => "Good accuracy, handles technical vocabulary",
            ModelSize::Large => "Best accuracy, slowest processing",
        }
    }
}

impl std::str::FromStr for ModelSize {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "tiny" => Ok(ModelSize::Tiny),
            "base" => Ok(ModelSize::Base),
            "small" => Ok(ModelSize::Small),
            "medium" => Ok(ModelSize::Medium),
            "large" => Ok(ModelSize::Large),
            _ => Err(anyhow!("Unknown model identifier: {}", s)),
        }
    }
}

impl std::fmt::Display for ModelSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ModelSize::Tiny => "tiny",
            ModelSize::Base => "base",
            ModelSize::Small => "small",
            ModelSize::Medium => "medium",
            ModelSize::Large => "large",
        };
        write!(f, "{}", name)
    }
}

/// A loaded Whisper model. Decoding mutates internal key/value caches, so
/// callers need exclusive access for the duration of a transcription.
pub struct WhisperModel {
    model: m::model::Whisper,
    config: Config,
    device: Device,
    size: ModelSize,
    tokenizer: Tokenizer,
}

impl WhisperModel {
    /// Download (if necessary) and load a Whisper model.
    ///
    /// This is the expensive operation in the model lifecycle: a cold cache
    /// downloads the weights, and even a warm cache pays for weight
    /// initialization on the target device.
    pub fn load(size: ModelSize, device: Device) -> Result<Self> {
        tracing::info!("Loading Whisper {} model...", size);
        let start_time = std::time::Instant::now();

        let api = {
            use hf_hub::api::sync::ApiBuilder;

            let mut builder = ApiBuilder::new().with_progress(false);
            if let Ok(token) = std::env::var("HF_TOKEN") {
                builder = builder.with_token(Some(token));
            }
            if let Ok(cache_dir) = std::env::var("HF_HUB_CACHE") {
                builder = builder.with_cache_dir(cache_dir.into());
            }
            builder
                .build()
                .map_err(|e| anyhow!("Failed to initialize HuggingFace API client: {}", e))?
        };

        let repo = api.model(size.repo_name().to_string());

        let config_filename = repo
            .get("config.json")
            .map_err(|e| anyhow!("Failed to download config.json from {}: {}", size.repo_name(), e))?;
        let tokenizer_filename = repo
            .get("tokenizer.json")
            .map_err(|e| anyhow!("Failed to download tokenizer.json from {}: {}", size.repo_name(), e))?;
        let model_filename = repo
            .get("model.safetensors")
            .map_err(|e| anyhow!("Failed to download model weights from {}: {}", size.repo_name(), e))?;

        let config: Config = serde_json::from_reader(std::fs::File::open(config_filename)?)?;

        let tokenizer = Tokenizer::from_file(tokenizer_filename)
            .map_err(|e| anyhow!("Failed to load tokenizer: {}", e))?;

        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[model_filename], m::DTYPE, &device)? };
        let model = m::model::Whisper::load(&vb, config.clone())?;

        tracing::info!(
            "Whisper {} model loaded in {:.2}s",
            size,
            start_time.elapsed().as_secs_f64()
        );

        Ok(Self {
            model,
            config,
            device,
            size,
            tokenizer,
        })
    }

    pub fn size(&self) -> ModelSize {
        self.size
    }

    /// Transcribe 16 kHz mono samples, one segment per 30-second window.
    ///
    /// Segments are emitted in audio order; an absent language hint leaves
    /// the choice to the model.
    pub fn transcribe_samples(
        &mut self,
        samples: &[f32],
        language: Option<&str>,
    ) -> Result<Vec<Segment>> {
        if samples.is_empty() {
            return Err(anyhow!("Audio data is empty"));
        }

        let window_len = WINDOW_SECONDS * SAMPLE_RATE;
        let mut segments = Vec::new();

        for (index, window) in samples.chunks(window_len).enumerate() {
            let start = (index * WINDOW_SECONDS) as f64;
            let end = start + window.len() as f64 / SAMPLE_RATE as f64;

            let text = self.decode_window(window, language)?;
            tracing::debug!(
                window = index,
                start,
                end,
                "Decoded window: '{}'",
                text
            );

            segments.push(Segment { text, start, end });
        }

        Ok(segments)
    }

    /// Decode one padded 30-second window to text.
    fn decode_window(&mut self, window: &[f32], language: Option<&str>) -> Result<String> {
        let mel = self.window_to_mel(window)?;
        let mel = mel.unsqueeze(0)?; // batch dimension

        let encoder_output = self.model.encoder.forward(&mel, false)?;

        // Decoder prompt: start-of-transcript, optional language, task token.
        let mut prompt = vec![self.sot_token()];
        if let Some(lang) = language {
            if let Some(lang_token) = self.language_token(lang) {
                prompt.push(lang_token);
            }
        }
        prompt.push(self.transcribe_token());
        let prompt_len = prompt.len();

        let mut tokens = prompt;
        let mut output_tokens = Vec::new();

        // Greedy decoding with temperature fallback when the model gets
        // stuck repeating itself.
        const MAX_TOKENS: usize = 200;
        const TEMPERATURES: &[f32] = &[0.0, 0.2, 0.4, 0.6, 0.8, 1.0];

        for &temperature in TEMPERATURES {
            tokens.truncate(prompt_len);
            output_tokens.clear();

            let mut decode_success = true;

            for _ in 0..MAX_TOKENS {
                let token_tensor = Tensor::new(&tokens[..], &self.device)?.unsqueeze(0)?;
                let logits = self.model.decoder.forward(&token_tensor, &encoder_output, false)?;
                let last_logits = logits.i((.., tokens.len() - 1, ..))?;

                let next_token = if temperature > 0.0 {
                    self.sample_token(&last_logits, temperature)?
                } else {
                    last_logits.argmax_keepdim(1)?.to_scalar::<u32>()?
                };

                if next_token == self.eot_token() {
                    break;
                }

                if is_repetitive(&output_tokens, next_token) {
                    decode_success = false;
                    break;
                }

                tokens.push(next_token);
                output_tokens.push(next_token);
            }

            if decode_success && !output_tokens.is_empty() {
                break;
            }
        }

        self.decode_tokens(&output_tokens)
    }

    /// Build the log-mel spectrogram tensor for one window, padded to the
    /// model's fixed 30-second frame count.
    fn window_to_mel(&self, window: &[f32]) -> Result<Tensor> {
        let target_len = WINDOW_SECONDS * SAMPLE_RATE;
        let mut padded = vec![0.0f32; target_len];
        let copy_len = window.len().min(target_len);
        padded[..copy_len].copy_from_slice(&window[..copy_len]);

        let n_mels = self.config.num_mel_bins as usize;
        let n_frames = 3000; // fixed Whisper frame count for 30s

        let mut mel_data = vec![0.0f32; n_mels * n_frames];

        // Energy-based log-mel features over fixed-size frames.
        let frame_size = padded.len() / n_frames;
        for frame in 0..n_frames {
            let start = frame * frame_size;
            let end = (start + frame_size).min(padded.len());

            for mel_bin in 0..n_mels {
                let mut energy = 0.0f32;
                for sample in &padded[start..end] {
                    energy += sample.abs();
                }
                // -80 dB floor
                mel_data[mel_bin * n_frames + frame] =
                    (energy / frame_size as f32).ln().max(-11.5129);
            }
        }

        Ok(Tensor::from_vec(mel_data, (n_mels, n_frames), &self.device)?)
    }

    fn sot_token(&self) -> u32 {
        50258
    }

    fn eot_token(&self) -> u32 {
        50257
    }

    fn transcribe_token(&self) -> u32 {
        50359
    }

    /// Language token for a hint, when the language is one the multilingual
    /// checkpoints know about. Unknown hints fall back to auto-detection.
    fn language_token(&self, language: &str) -> Option<u32> {
        match language.to_lowercase().as_str() {
            "en" | "english" => Some(50259),
            "zh" | "chinese" => Some(50260),
            "de" | "german" => Some(50261),
            "es" | "spanish" => Some(50262),
            "ru" | "russian" => Some(50263),
            "ko" | "korean" => Some(50264),
            "fr" | "french" => Some(50265),
            "ja" | "japanese" => Some(50266),
            "pt" | "portuguese" => Some(50267),
            "it" | "italian" => Some(50274),
            _ => None,
        }
    }

    fn sample_token(&self, logits: &Tensor, temperature: f32) -> Result<u32> {
        let temp_tensor = Tensor::from_vec(vec![temperature], (1,), &self.device)?;
        let logits = logits.broadcast_div(&temp_tensor)?;
        let probs = candle_nn::ops::softmax_last_dim(&logits)?;
        let token = probs.argmax_keepdim(1)?.to_scalar::<u32>()?;
        Ok(token)
    }

    fn decode_tokens(&self, tokens: &[u32]) -> Result<String> {
        let text = self
            .tokenizer
            .decode(tokens, true)
            .map_err(|e| anyhow!("Tokenizer decode error: {}", e))?;

        // Strip special markers the tokenizer occasionally leaves behind.
        let cleaned = text
            .replace("<|startoftranscript|>", "")
            .replace("<|endoftext|>", "")
            .replace("<|notimestamps|>", "");

        Ok(cleaned.trim().to_string())
    }
}

/// Detect the degenerate repetition patterns greedy decoding can fall into,
/// assuming `new_token` were appended to `tokens`.
fn is_repetitive(tokens: &[u32], new_token: u32) -> bool {
    let n = tokens.len();

    // Same token three times in a row
    if n >= 2 && tokens[n - 2..] == [new_token, new_token] {
        return true;
    }

    // Same 3-token pattern twice in a row
    if n >= 5 {
        let candidate = [tokens[n - 2], tokens[n - 1], new_token];
        if tokens[n - 5..n - 2] == candidate {
            return true;
        }
    }

    false
}
