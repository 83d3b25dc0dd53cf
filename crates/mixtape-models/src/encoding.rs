//! Audio and video encoding configuration.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Sample rate every track is decoded to before mixing.
pub const MIX_SAMPLE_RATE: u32 = 48_000;
/// Channel count every track is decoded to before mixing.
pub const MIX_CHANNELS: u16 = 2;
/// Frames per millisecond at [`MIX_SAMPLE_RATE`]; keeps millisecond slicing exact.
pub const FRAMES_PER_MS: u64 = (MIX_SAMPLE_RATE / 1000) as u64;

/// Default crossfade length
pub const DEFAULT_TRANSITION_MS: u32 = 6000;
/// Default low-pass cutoff inside the overlap window
pub const DEFAULT_LOWPASS_HZ: u32 = 4000;
/// Upper bound accepted for `transition_ms`
pub const MAX_TRANSITION_MS: u32 = 60_000;

/// Default video codec (H.264)
pub const DEFAULT_VIDEO_CODEC: &str = "libx264";
/// Default audio codec inside the video container
pub const DEFAULT_VIDEO_AUDIO_CODEC: &str = "aac";
/// Encoding preset for still-image video
pub const DEFAULT_PRESET: &str = "ultrafast";
/// Audio bitrate for lossy outputs
pub const DEFAULT_AUDIO_BITRATE: &str = "192k";

/// Background frame size
pub const VIDEO_WIDTH: u32 = 1280;
pub const VIDEO_HEIGHT: u32 = 720;
/// A still image only needs one frame per second.
pub const VIDEO_FPS: u32 = 1;

/// Output container for the mixed audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum AudioFormat {
    #[default]
    Mp3,
    Wav,
    Flac,
    Aac,
}

impl AudioFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Wav => "wav",
            AudioFormat::Flac => "flac",
            AudioFormat::Aac => "aac",
        }
    }

    /// File extension for the output file.
    pub fn extension(&self) -> &'static str {
        match self {
            AudioFormat::Aac => "m4a",
            other => other.as_str(),
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "audio/mpeg",
            AudioFormat::Wav => "audio/wav",
            AudioFormat::Flac => "audio/flac",
            AudioFormat::Aac => "audio/mp4",
        }
    }

    /// FFmpeg codec arguments for this format.
    pub fn to_ffmpeg_args(&self) -> Vec<String> {
        let args: &[&str] = match self {
            AudioFormat::Mp3 => &["-c:a", "libmp3lame", "-b:a", DEFAULT_AUDIO_BITRATE],
            AudioFormat::Wav => &["-c:a", "pcm_s16le"],
            AudioFormat::Flac => &["-c:a", "flac"],
            AudioFormat::Aac => &["-c:a", "aac", "-b:a", DEFAULT_AUDIO_BITRATE],
        };
        args.iter().map(|s| s.to_string()).collect()
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Still-image video encoding configuration.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct VideoRenderConfig {
    /// Output width in pixels
    #[serde(default = "default_width")]
    pub width: u32,

    /// Output height in pixels
    #[serde(default = "default_height")]
    pub height: u32,

    /// Constant frame rate
    #[serde(default = "default_fps")]
    pub fps: u32,

    /// Video codec
    #[serde(default = "default_video_codec")]
    pub codec: String,

    /// Encoding preset
    #[serde(default = "default_preset")]
    pub preset: String,

    /// Audio codec
    #[serde(default = "default_audio_codec")]
    pub audio_codec: String,

    /// Audio bitrate
    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate: String,
}

fn default_width() -> u32 {
    VIDEO_WIDTH
}
fn default_height() -> u32 {
    VIDEO_HEIGHT
}
fn default_fps() -> u32 {
    VIDEO_FPS
}
fn default_video_codec() -> String {
    DEFAULT_VIDEO_CODEC.to_string()
}
fn default_preset() -> String {
    DEFAULT_PRESET.to_string()
}
fn default_audio_codec() -> String {
    DEFAULT_VIDEO_AUDIO_CODEC.to_string()
}
fn default_audio_bitrate() -> String {
    DEFAULT_AUDIO_BITRATE.to_string()
}

impl Default for VideoRenderConfig {
    fn default() -> Self {
        Self {
            width: VIDEO_WIDTH,
            height: VIDEO_HEIGHT,
            fps: VIDEO_FPS,
            codec: default_video_codec(),
            preset: default_preset(),
            audio_codec: default_audio_codec(),
            audio_bitrate: default_audio_bitrate(),
        }
    }
}

impl VideoRenderConfig {
    /// Convert to FFmpeg output arguments.
    pub fn to_ffmpeg_args(&self) -> Vec<String> {
        vec![
            "-c:v".to_string(),
            self.codec.clone(),
            "-preset".to_string(),
            self.preset.clone(),
            "-tune".to_string(),
            "stillimage".to_string(),
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
            "-r".to_string(),
            self.fps.to_string(),
            "-c:a".to_string(),
            self.audio_codec.clone(),
            "-b:a".to_string(),
            self.audio_bitrate.clone(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_per_ms_is_exact() {
        assert_eq!(FRAMES_PER_MS * 1000, MIX_SAMPLE_RATE as u64);
    }

    #[test]
    fn test_audio_format_args() {
        let args = AudioFormat::Mp3.to_ffmpeg_args();
        assert!(args.contains(&"libmp3lame".to_string()));
        assert_eq!(AudioFormat::Aac.extension(), "m4a");
        assert_eq!(AudioFormat::Wav.content_type(), "audio/wav");
    }

    #[test]
    fn test_video_args() {
        let args = VideoRenderConfig::default().to_ffmpeg_args();
        assert!(args.contains(&"stillimage".to_string()));
        assert!(args.contains(&"libx264".to_string()));
        assert!(args.contains(&"yuv420p".to_string()));
    }
}
