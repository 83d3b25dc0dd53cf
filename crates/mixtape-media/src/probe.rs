//! FFprobe audio information.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tracing::warn;

use crate::command::FfmpegRunner;
use crate::error::{looks_like_bad_input, MediaError, MediaResult};

/// Audio file information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioInfo {
    /// Duration in whole milliseconds
    pub duration_ms: u64,
    /// Title tag
    pub title: Option<String>,
    /// Artist tag
    pub artist: Option<String>,
    /// Audio codec
    pub codec: String,
    /// Sample rate of the first audio stream
    pub sample_rate: Option<u32>,
    /// Channel count of the first audio stream
    pub channels: Option<u16>,
}

/// FFprobe JSON output format.
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
    #[serde(default)]
    tags: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: String,
    codec_name: Option<String>,
    sample_rate: Option<String>,
    channels: Option<u16>,
    duration: Option<String>,
    #[serde(default)]
    tags: HashMap<String, String>,
}

/// Probe an audio file for duration and tags.
///
/// Fails with an input error when the file is missing, unreadable, has no
/// audio stream, or has zero duration. A crashed or hung ffprobe is a tool
/// failure and may be retried. The runner's timeout applies.
pub async fn probe_audio(runner: &FfmpegRunner, path: impl AsRef<Path>) -> MediaResult<AudioInfo> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(MediaError::FileNotFound(path.to_path_buf()));
    }

    which::which("ffprobe").map_err(|_| MediaError::FfprobeNotFound)?;

    let mut command = Command::new("ffprobe");
    command
        .args([
            "-v",
            "error",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    let output: Output = with_deadline(command.output(), runner.timeout_secs()).await?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(probe_failure(path, output.status.code(), stderr.trim()));
    }

    parse_probe_output(path, &output.stdout)
}

/// Await a subprocess future, giving up after `timeout_secs`. Dropping the
/// future kills the process.
async fn with_deadline<T, F>(fut: F, timeout_secs: Option<u64>) -> MediaResult<T>
where
    F: Future<Output = std::io::Result<T>>,
{
    let Some(secs) = timeout_secs else {
        return Ok(fut.await?);
    };
    match tokio::time::timeout(Duration::from_secs(secs), fut).await {
        Ok(result) => Ok(result?),
        Err(_) => {
            warn!("FFprobe timed out after {} seconds, killing process", secs);
            Err(MediaError::Timeout(secs))
        }
    }
}

/// Map a failed ffprobe exit to an error. Only a normal exit with a
/// decoder complaint blames the file; signals and other failures are
/// tool errors.
fn probe_failure(path: &Path, exit_code: Option<i32>, stderr: &str) -> MediaError {
    if exit_code.is_some() && looks_like_bad_input(stderr) {
        return MediaError::invalid_audio(path, stderr);
    }
    MediaError::ffmpeg_failed(
        "FFprobe exited with non-zero status",
        (!stderr.is_empty()).then(|| stderr.to_string()),
        exit_code,
    )
}

/// Interpret ffprobe JSON for `path`.
pub fn parse_probe_output(path: &Path, json: &[u8]) -> MediaResult<AudioInfo> {
    let probe: FfprobeOutput = serde_json::from_slice(json)
        .map_err(|e| MediaError::invalid_audio(path, format!("unparseable ffprobe output: {}", e)))?;

    let stream = probe
        .streams
        .iter()
        .find(|s| s.codec_type == "audio")
        .ok_or_else(|| MediaError::invalid_audio(path, "no audio stream found"))?;

    // Container duration first; some raw streams only report it per stream.
    let duration_secs = probe
        .format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .or(stream.duration.as_deref())
        .and_then(|d| d.parse::<f64>().ok())
        .filter(|d| d.is_finite())
        .unwrap_or(0.0);

    let duration_ms = (duration_secs * 1000.0).floor().max(0.0) as u64;
    if duration_ms == 0 {
        return Err(MediaError::ZeroDuration(path.to_path_buf()));
    }

    let format_tags = probe.format.as_ref().map(|f| &f.tags);
    let tag = |key: &str| {
        format_tags
            .and_then(|tags| find_tag(tags, key))
            .or_else(|| find_tag(&stream.tags, key))
    };

    Ok(AudioInfo {
        duration_ms,
        title: tag("title"),
        artist: tag("artist"),
        codec: stream.codec_name.clone().unwrap_or_default(),
        sample_rate: stream.sample_rate.as_deref().and_then(|r| r.parse().ok()),
        channels: stream.channels,
    })
}

/// Case-insensitive tag lookup; blank values count as missing.
fn find_tag(tags: &HashMap<String, String>, key: &str) -> Option<String> {
    tags.iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mp3_with_tags() {
        let json = br#"{
            "streams": [
                {"codec_type": "audio", "codec_name": "mp3", "sample_rate": "44100", "channels": 2}
            ],
            "format": {
                "duration": "183.456000",
                "tags": {"title": "Strobe", "ARTIST": "deadmau5"}
            }
        }"#;

        let info = parse_probe_output(Path::new("a.mp3"), json).unwrap();
        assert_eq!(info.duration_ms, 183_456);
        assert_eq!(info.title.as_deref(), Some("Strobe"));
        assert_eq!(info.artist.as_deref(), Some("deadmau5"));
        assert_eq!(info.sample_rate, Some(44_100));
    }

    #[test]
    fn test_stream_tags_fallback() {
        let json = br#"{
            "streams": [
                {"codec_type": "video", "codec_name": "mjpeg"},
                {"codec_type": "audio", "codec_name": "vorbis", "duration": "2.5",
                 "tags": {"TITLE": "  Ogg Song  ", "artist": ""}}
            ],
            "format": {}
        }"#;

        let info = parse_probe_output(Path::new("a.ogg"), json).unwrap();
        assert_eq!(info.duration_ms, 2500);
        assert_eq!(info.title.as_deref(), Some("Ogg Song"));
        assert_eq!(info.artist, None);
    }

    #[test]
    fn test_zero_duration_rejected() {
        let json = br#"{"streams": [{"codec_type": "audio"}], "format": {"duration": "0.000"}}"#;
        let err = parse_probe_output(Path::new("empty.wav"), json).unwrap_err();
        assert!(matches!(err, MediaError::ZeroDuration(_)));
        assert!(err.is_input_error());
    }

    #[test]
    fn test_no_audio_stream() {
        let json = br#"{"streams": [{"codec_type": "video"}], "format": {"duration": "3.0"}}"#;
        let err = parse_probe_output(Path::new("clip.mp4"), json).unwrap_err();
        assert!(err.is_input_error());
    }

    #[tokio::test]
    async fn test_missing_file() {
        let err = probe_audio(&FfmpegRunner::new(), "/definitely/not/here.mp3")
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::FileNotFound(_)));
    }

    #[test]
    fn test_bad_file_is_input_error() {
        let err = probe_failure(
            Path::new("broken.mp3"),
            Some(1),
            "broken.mp3: Invalid data found when processing input",
        );
        assert!(matches!(err, MediaError::InvalidAudio { .. }));
        assert!(err.is_input_error());
        assert!(!err.is_transient());
    }

    #[test]
    fn test_tool_crash_is_transient() {
        // Killed by a signal: no exit code
        let err = probe_failure(Path::new("a.mp3"), None, "Invalid data found when processing input");
        assert!(matches!(err, MediaError::FfmpegFailed { exit_code: None, .. }));
        assert!(err.is_transient());

        // Non-zero exit without a decoder complaint
        let err = probe_failure(Path::new("a.mp3"), Some(1), "Cannot allocate memory");
        assert!(err.is_transient());
        assert!(!err.is_input_error());

        let err = probe_failure(Path::new("a.mp3"), Some(137), "");
        assert!(matches!(err, MediaError::FfmpegFailed { stderr: None, exit_code: Some(137), .. }));
    }

    #[tokio::test]
    async fn test_hung_probe_times_out() {
        let never = std::future::pending::<std::io::Result<()>>();
        let err = with_deadline(never, Some(0)).await.unwrap_err();
        assert!(matches!(err, MediaError::Timeout(0)));
        assert!(err.is_transient());

        let done = async { Ok::<_, std::io::Error>(7) };
        assert_eq!(with_deadline(done, None).await.unwrap(), 7);
    }
}
