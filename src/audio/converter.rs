//! # Format Normalizer
//!
//! Invokes an external conversion process to resample uploaded audio into
//! the canonical recognition format (16 kHz, mono, signed 16-bit PCM WAV).
//!
//! A nonzero converter exit is a normal, expected outcome. It is reported
//! as `ConversionOutcome { success: false, .. }` together with the captured
//! stderr, never as an `Err`. `Err` is reserved for failing to run the
//! process at all (binary missing, spawn failure).

use std::io;
use std::path::Path;
use std::process::Command;
use tracing::{debug, warn};

/// Result of one conversion attempt: exit status plus the process's
/// captured diagnostic output.
#[derive(Debug, Clone)]
pub struct ConversionOutcome {
    pub success: bool,
    pub stderr: String,
}

/// Converts a source audio file into the canonical recognition format at a
/// caller-owned target path. Implementations must overwrite the target
/// unconditionally; the caller owns both paths' lifecycles.
pub trait FormatNormalizer: Send + Sync {
    fn normalize(&self, source: &Path, target: &Path) -> io::Result<ConversionOutcome>;
}

/// ffmpeg-backed normalizer. The binary path comes from configuration so
/// deployments can point at a vendored build.
pub struct FfmpegConverter {
    binary: String,
}

impl FfmpegConverter {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl FormatNormalizer for FfmpegConverter {
    fn normalize(&self, source: &Path, target: &Path) -> io::Result<ConversionOutcome> {
        debug!(
            source = %source.display(),
            target = %target.display(),
            "Converting audio to 16kHz mono 16-bit PCM"
        );

        let output = Command::new(&self.binary)
            .arg("-i")
            .arg(source)
            .args(["-ar", "16000"]) // 16 kHz sample rate
            .args(["-ac", "1"]) // mono
            .args(["-c:a", "pcm_s16le"]) // signed 16-bit little-endian PCM
            .arg("-y") // overwrite target unconditionally
            .arg(target)
            .output()?;

        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if output.status.success() {
            debug!(target = %target.display(), "Audio conversion completed");
        } else {
            warn!(
                source = %source.display(),
                status = %output.status,
                "Audio conversion process reported failure"
            );
        }

        Ok(ConversionOutcome {
            success: output.status.success(),
            stderr,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_missing_binary_is_an_io_error() {
        let converter = FfmpegConverter::new("definitely-not-a-real-converter-binary");
        let result = converter.normalize(
            &PathBuf::from("/tmp/in.mp3"),
            &PathBuf::from("/tmp/out.wav"),
        );
        let err = result.expect_err("spawning a missing binary must fail");
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[cfg(unix)]
    #[test]
    fn test_nonzero_exit_is_reported_not_raised() {
        // `false` ignores the ffmpeg-style arguments and exits 1, which is
        // exactly the "converter ran but failed" case.
        let converter = FfmpegConverter::new("false");
        let outcome = converter
            .normalize(&PathBuf::from("/tmp/in.mp3"), &PathBuf::from("/tmp/out.wav"))
            .expect("running an existing binary must not error");
        assert!(!outcome.success);
    }
}
