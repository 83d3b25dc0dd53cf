//! FFmpeg CLI wrapper and crossfade mixer.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building with pipe inputs and outputs
//! - Progress parsing from `-progress pipe:2`
//! - Audio probing via FFprobe
//! - PCM decode/encode and the crossfade mixer
//! - Still-image video rendering

pub mod command;
pub mod error;
pub mod filters;
pub mod mixer;
pub mod pcm;
pub mod probe;
pub mod progress;
pub mod toolkit;
pub mod video;

pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner};
pub use error::{MediaError, MediaResult};
pub use mixer::{crossfade, crossfade_blocking, plan_overlaps, CrossfadeSettings, MixOutput};
pub use pcm::AudioBuffer;
pub use probe::{probe_audio, AudioInfo};
pub use progress::FfmpegProgress;
pub use toolkit::{FfmpegToolkit, MediaToolkit};
pub use video::render_still_video;
