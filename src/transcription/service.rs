//! # Transcription Orchestrator
//!
//! Runs the full pipeline for one upload: validate the filename, persist
//! the bytes to a scoped temp file, normalize the format when needed,
//! resolve an engine through the registry, transcribe, and assemble the
//! response text.
//!
//! ## Pipeline (synchronous, one request end to end):
//! 1. Extension validation, rejected before any allocation or disk I/O
//! 2. Persist upload to a temp file carrying the original extension
//! 3. Engine resolution via the registry (cache hit or load)
//! 4. Conversion to 16 kHz mono PCM WAV, skipped for `.wav` uploads
//! 5. Recognition on the canonical-format file
//! 6. Segment joining into a single text
//!
//! ## Cleanup discipline:
//! Every temp file is released on every exit path, success or failure.
//! A release failure is logged and never surfaced to the caller; the
//! transcription result (or the pipeline error) always wins.

use crate::audio::FormatNormalizer;
use crate::error::{AppError, AppResult};
use crate::transcription::model::Segment;
use crate::transcription::registry::ModelRegistry;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// Upload extensions the pipeline accepts. Everything except `wav` goes
/// through the format normalizer before recognition.
pub const SUPPORTED_EXTENSIONS: [&str; 7] = ["wav", "mp3", "m4a", "ogg", "flac", "wma", "aac"];

/// Extension of the canonical recognition format; uploads already carrying
/// it skip conversion.
const CANONICAL_EXTENSION: &str = "wav";

/// Successful pipeline result, ready for serialization at the boundary.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TranscriptionOutcome {
    pub text: String,
    pub language: Option<String>,
    pub duration: Option<f64>,
}

/// Drives one upload through validation, conversion, and recognition.
pub struct TranscriptionService {
    registry: Arc<ModelRegistry>,
    normalizer: Arc<dyn FormatNormalizer>,
}

impl TranscriptionService {
    pub fn new(registry: Arc<ModelRegistry>, normalizer: Arc<dyn FormatNormalizer>) -> Self {
        Self {
            registry,
            normalizer,
        }
    }

    /// Transcribe one uploaded file. Blocking: call from a worker thread,
    /// not an async executor.
    pub fn transcribe(
        &self,
        audio: &[u8],
        filename: &str,
        model_id: &str,
        language: Option<&str>,
    ) -> AppResult<TranscriptionOutcome> {
        let extension = audio_extension(filename)?;

        info!(
            filename = filename,
            model = model_id,
            bytes = audio.len(),
            "Starting transcription request"
        );

        let upload = persist_upload(audio, &extension)?;

        // The converted file (if any) lives in this slot so the cleanup
        // below covers it no matter where the pipeline bails out.
        let mut converted: Option<NamedTempFile> = None;
        let result = self.run_recognition(upload.path(), &extension, model_id, language, &mut converted);

        if let Some(file) = converted {
            release_artifact(file, "converted audio");
        }
        release_artifact(upload, "uploaded audio");

        let output = result?;
        let text = join_segments(&output.segments);

        info!(
            model = model_id,
            segments = output.segments.len(),
            chars = text.len(),
            "Transcription request completed"
        );

        Ok(TranscriptionOutcome {
            text,
            language: output.language,
            duration: output.duration,
        })
    }

    /// Steps 3-5: engine resolution, conversion, recognition. Split out so
    /// the caller can run cleanup over whatever `converted` holds before
    /// inspecting the result.
    fn run_recognition(
        &self,
        upload_path: &Path,
        extension: &str,
        model_id: &str,
        language: Option<&str>,
        converted: &mut Option<NamedTempFile>,
    ) -> AppResult<crate::transcription::engine::EngineOutput> {
        let engine = self
            .registry
            .get(model_id)
            .map_err(|e| AppError::ModelLoad(format!("model '{}': {}", model_id, e)))?;

        let recognition_path = if extension == CANONICAL_EXTENSION {
            debug!("Upload already in canonical format, skipping conversion");
            upload_path.to_path_buf()
        } else {
            let target = tempfile::Builder::new()
                .prefix("transcribe-")
                .suffix(".wav")
                .tempfile()
                .map_err(|e| AppError::Internal(format!("failed to create temp file: {}", e)))?;
            let target_path = target.path().to_path_buf();
            // Park the handle before converting so the caller's cleanup
            // sees it even if conversion fails.
            *converted = Some(target);

            let outcome = self
                .normalizer
                .normalize(upload_path, &target_path)
                .map_err(|e| AppError::Conversion(format!("failed to run converter: {}", e)))?;
            if !outcome.success {
                return Err(AppError::Conversion(outcome.stderr));
            }
            target_path
        };

        let output = engine
            .transcribe(recognition_path.as_path(), language)
            .map_err(|e| AppError::Transcription(e.to_string()))?;

        Ok(output)
    }
}

/// Extract and validate the lowercase extension of an uploaded filename.
/// Runs before any disk or model work so bad uploads cost nothing.
fn audio_extension(filename: &str) -> AppResult<String> {
    let extension = Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_lowercase)
        .ok_or_else(|| {
            AppError::Validation(format!("filename '{}' has no extension", filename))
        })?;

    if !SUPPORTED_EXTENSIONS.contains(&extension.as_str()) {
        return Err(AppError::Validation(format!(
            "unsupported audio format '{}'; supported: {}",
            extension,
            SUPPORTED_EXTENSIONS.join(", ")
        )));
    }

    Ok(extension)
}

/// Write the upload bytes to a named temp file whose suffix preserves the
/// original extension (the converter sniffs the container from it).
fn persist_upload(audio: &[u8], extension: &str) -> AppResult<NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("upload-")
        .suffix(&format!(".{}", extension))
        .tempfile()
        .map_err(|e| AppError::Internal(format!("failed to create temp file: {}", e)))?;
    file.write_all(audio)
        .map_err(|e| AppError::Internal(format!("failed to persist upload: {}", e)))?;
    file.flush()
        .map_err(|e| AppError::Internal(format!("failed to persist upload: {}", e)))?;
    Ok(file)
}

/// Delete a pipeline temp file. Failure is logged, never propagated; the
/// request's real outcome takes precedence over cleanup trouble.
fn release_artifact(file: NamedTempFile, label: &str) {
    let path = file.path().to_path_buf();
    if let Err(e) = file.close() {
        warn!(
            path = %path.display(),
            artifact = label,
            "Failed to remove temp file: {}",
            e
        );
    }
}

/// Join segment texts into the response body: each segment trimmed, empty
/// ones dropped, the rest separated by single spaces.
fn join_segments(segments: &[Segment]) -> String {
    segments
        .iter()
        .map(|s| s.text.trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::ConversionOutcome;
    use crate::transcription::engine::{EngineLoader, EngineOutput, RecognitionEngine};
    use anyhow::{anyhow, Result};
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn segment(text: &str) -> Segment {
        Segment {
            text: text.to_string(),
            start: 0.0,
            end: 1.0,
        }
    }

    struct StubEngine {
        model_id: String,
        fail: bool,
        /// Paths this engine was asked to transcribe.
        seen: Mutex<Vec<PathBuf>>,
    }

    impl RecognitionEngine for StubEngine {
        fn transcribe(&self, audio_path: &Path, language: Option<&str>) -> Result<EngineOutput> {
            self.seen.lock().unwrap().push(audio_path.to_path_buf());
            if self.fail {
                return Err(anyhow!("decoder exploded"));
            }
            Ok(EngineOutput {
                segments: vec![segment(" Hello "), segment("world. ")],
                language: language.map(str::to_string),
                duration: Some(2.5),
            })
        }

        fn model_id(&self) -> &str {
            &self.model_id
        }
    }

    struct StubLoader {
        loads: AtomicUsize,
        fail: bool,
        engine_fails: bool,
        engines: Mutex<Vec<Arc<StubEngine>>>,
    }

    impl StubLoader {
        fn new() -> Self {
            Self {
                loads: AtomicUsize::new(0),
                fail: false,
                engine_fails: false,
                engines: Mutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::new()
            }
        }

        fn with_failing_engine() -> Self {
            Self {
                engine_fails: true,
                ..Self::new()
            }
        }
    }

    impl EngineLoader for StubLoader {
        fn load(&self, model_id: &str) -> Result<Arc<dyn RecognitionEngine>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(anyhow!("no weights for '{}'", model_id));
            }
            let engine = Arc::new(StubEngine {
                model_id: model_id.to_string(),
                fail: self.engine_fails,
                seen: Mutex::new(Vec::new()),
            });
            self.engines.lock().unwrap().push(engine.clone());
            Ok(engine)
        }
    }

    #[derive(Clone)]
    struct SharedLoader(Arc<StubLoader>);

    impl EngineLoader for SharedLoader {
        fn load(&self, model_id: &str) -> Result<Arc<dyn RecognitionEngine>> {
            self.0.load(model_id)
        }
    }

    /// Normalizer that records invocations and writes a marker byte to the
    /// target so the engine sees a real file.
    struct StubNormalizer {
        calls: AtomicUsize,
        succeed: bool,
        targets: Mutex<Vec<PathBuf>>,
    }

    impl StubNormalizer {
        fn succeeding() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                succeed: true,
                targets: Mutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self {
                succeed: false,
                ..Self::succeeding()
            }
        }
    }

    impl FormatNormalizer for StubNormalizer {
        fn normalize(&self, _source: &Path, target: &Path) -> std::io::Result<ConversionOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.targets.lock().unwrap().push(target.to_path_buf());
            if self.succeed {
                std::fs::write(target, b"RIFF")?;
                Ok(ConversionOutcome {
                    success: true,
                    stderr: String::new(),
                })
            } else {
                Ok(ConversionOutcome {
                    success: false,
                    stderr: "Invalid data found when processing input".to_string(),
                })
            }
        }
    }

    fn service(
        loader: Arc<StubLoader>,
        normalizer: Arc<StubNormalizer>,
    ) -> TranscriptionService {
        let registry = Arc::new(ModelRegistry::new(Box::new(SharedLoader(loader))));
        TranscriptionService::new(registry, normalizer)
    }

    #[test]
    fn test_unsupported_extension_rejected_before_any_work() {
        let loader = Arc::new(StubLoader::new());
        let normalizer = Arc::new(StubNormalizer::succeeding());
        let svc = service(loader.clone(), normalizer.clone());

        let err = svc
            .transcribe(b"data", "notes.txt", "base", None)
            .expect_err("txt must be rejected");
        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(loader.loads.load(Ordering::SeqCst), 0);
        assert_eq!(normalizer.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_missing_extension_rejected() {
        let loader = Arc::new(StubLoader::new());
        let normalizer = Arc::new(StubNormalizer::succeeding());
        let svc = service(loader, normalizer);

        let err = svc
            .transcribe(b"data", "recording", "base", None)
            .expect_err("extensionless filename must be rejected");
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn test_extension_match_is_case_insensitive() {
        let loader = Arc::new(StubLoader::new());
        let normalizer = Arc::new(StubNormalizer::succeeding());
        let svc = service(loader, normalizer.clone());

        let outcome = svc
            .transcribe(b"data", "MEETING.WAV", "base", None)
            .expect("uppercase wav is supported");
        assert_eq!(outcome.text, "Hello world.");
        // Canonical format: no conversion pass.
        assert_eq!(normalizer.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_wav_upload_skips_conversion() {
        let loader = Arc::new(StubLoader::new());
        let normalizer = Arc::new(StubNormalizer::succeeding());
        let svc = service(loader.clone(), normalizer.clone());

        let outcome = svc
            .transcribe(b"data", "meeting.wav", "base", Some("en"))
            .expect("wav transcribes");

        assert_eq!(outcome.text, "Hello world.");
        assert_eq!(outcome.language.as_deref(), Some("en"));
        assert_eq!(outcome.duration, Some(2.5));
        assert_eq!(normalizer.calls.load(Ordering::SeqCst), 0);

        // The engine saw the upload's own temp file, which is gone now.
        let engines = loader.engines.lock().unwrap();
        let seen = engines[0].seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].to_string_lossy().ends_with(".wav"));
        assert!(!seen[0].exists());
    }

    #[test]
    fn test_every_supported_extension_produces_text() {
        for ext in SUPPORTED_EXTENSIONS {
            let loader = Arc::new(StubLoader::new());
            let normalizer = Arc::new(StubNormalizer::succeeding());
            let svc = service(loader.clone(), normalizer.clone());

            let filename = format!("clip.{}", ext);
            let outcome = svc
                .transcribe(b"data", &filename, "base", None)
                .unwrap_or_else(|e| panic!("'{}' upload must transcribe: {}", ext, e));
            assert!(!outcome.text.is_empty(), "empty text for '{}'", ext);

            // wav is already canonical; everything else converts once.
            let expected_conversions = if ext == "wav" { 0 } else { 1 };
            assert_eq!(
                normalizer.calls.load(Ordering::SeqCst),
                expected_conversions,
                "wrong conversion count for '{}'",
                ext
            );
        }
    }

    #[test]
    fn test_non_wav_upload_converts_exactly_once() {
        let loader = Arc::new(StubLoader::new());
        let normalizer = Arc::new(StubNormalizer::succeeding());
        let svc = service(loader.clone(), normalizer.clone());

        let outcome = svc
            .transcribe(b"ID3", "podcast.mp3", "base", None)
            .expect("mp3 transcribes after conversion");

        assert_eq!(outcome.text, "Hello world.");
        assert_eq!(normalizer.calls.load(Ordering::SeqCst), 1);

        // The engine was given the converted .wav, not the .mp3 upload.
        let engines = loader.engines.lock().unwrap();
        let seen = engines[0].seen.lock().unwrap();
        let targets = normalizer.targets.lock().unwrap();
        assert_eq!(seen[0], targets[0]);
        assert!(seen[0].to_string_lossy().ends_with(".wav"));

        // Both temp files are gone after the request.
        assert!(!seen[0].exists());
        assert!(!targets[0].exists());
    }

    #[test]
    fn test_conversion_failure_reports_diagnostics_and_cleans_up() {
        let loader = Arc::new(StubLoader::new());
        let normalizer = Arc::new(StubNormalizer::failing());
        let svc = service(loader, normalizer.clone());

        let err = svc
            .transcribe(b"ID3", "podcast.mp3", "base", None)
            .expect_err("failed conversion must error");

        match err {
            AppError::Conversion(msg) => assert!(msg.contains("Invalid data")),
            other => panic!("expected Conversion, got {:?}", other),
        }

        let targets = normalizer.targets.lock().unwrap();
        assert!(!targets[0].exists(), "converted temp must be removed");
    }

    #[test]
    fn test_engine_failure_cleans_up_temp_files() {
        let loader = Arc::new(StubLoader::with_failing_engine());
        let normalizer = Arc::new(StubNormalizer::succeeding());
        let svc = service(loader.clone(), normalizer.clone());

        let err = svc
            .transcribe(b"ID3", "podcast.mp3", "base", None)
            .expect_err("engine failure must error");
        assert!(matches!(err, AppError::Transcription(_)));

        let targets = normalizer.targets.lock().unwrap();
        assert!(!targets[0].exists());
        let engines = loader.engines.lock().unwrap();
        let seen = engines[0].seen.lock().unwrap();
        assert!(!seen[0].exists());
    }

    #[test]
    fn test_model_load_failure_kind() {
        let loader = Arc::new(StubLoader::failing());
        let normalizer = Arc::new(StubNormalizer::succeeding());
        let svc = service(loader, normalizer.clone());

        let err = svc
            .transcribe(b"data", "meeting.wav", "base", None)
            .expect_err("load failure must error");
        assert!(matches!(err, AppError::ModelLoad(_)));
        // Engine resolution precedes conversion, so nothing was converted.
        assert_eq!(normalizer.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_join_segments_trims_and_drops_empties() {
        let segments = vec![segment(" Hello "), segment("   "), segment("world. ")];
        assert_eq!(join_segments(&segments), "Hello world.");
    }

    #[test]
    fn test_join_segments_empty_input() {
        assert_eq!(join_segments(&[]), "");
    }
}
