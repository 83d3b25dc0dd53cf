//! Interleaved PCM buffers and FFmpeg decode/encode.

use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use mixtape_models::encoding::{AudioFormat, FRAMES_PER_MS, MIX_CHANNELS, MIX_SAMPLE_RATE};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{looks_like_bad_input, MediaError, MediaResult};

/// Raw sample format exchanged with FFmpeg.
const PCM_FORMAT: &str = "f32le";

/// Samples per stdin write.
const WRITE_CHUNK_SAMPLES: usize = 64 * 1024;

/// Interleaved `f32` audio at the mix rate and channel layout.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    samples: Vec<f32>,
    channels: u16,
}

impl AudioBuffer {
    /// Wrap interleaved samples, dropping any partial trailing millisecond.
    pub fn from_interleaved(mut samples: Vec<f32>, channels: u16) -> Self {
        let per_ms = FRAMES_PER_MS as usize * channels as usize;
        let whole = samples.len() / per_ms * per_ms;
        samples.truncate(whole);
        Self { samples, channels }
    }

    /// Silent buffer of the given length.
    pub fn silence(duration_ms: u64, channels: u16) -> Self {
        let len = duration_ms as usize * FRAMES_PER_MS as usize * channels as usize;
        Self {
            samples: vec![0.0; len],
            channels,
        }
    }

    /// Decode little-endian `f32` bytes.
    pub fn from_le_bytes(bytes: &[u8], channels: u16) -> Self {
        let samples = bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        Self::from_interleaved(samples, channels)
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn samples_mut(&mut self) -> &mut [f32] {
        &mut self.samples
    }

    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }

    /// Number of frames (one sample per channel).
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    /// Length in whole milliseconds.
    pub fn duration_ms(&self) -> u64 {
        self.frames() as u64 / FRAMES_PER_MS
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Sample index of a millisecond offset.
    pub fn sample_offset(&self, ms: u64) -> usize {
        ms as usize * FRAMES_PER_MS as usize * self.channels as usize
    }
}

/// Decode any audio file to mix-rate stereo PCM.
pub async fn decode_to_pcm(runner: &FfmpegRunner, path: &Path) -> MediaResult<AudioBuffer> {
    if !path.exists() {
        return Err(MediaError::FileNotFound(path.to_path_buf()));
    }

    let cmd = FfmpegCommand::to_stdout()
        .input(path)
        .no_video()
        .format(PCM_FORMAT)
        .sample_rate(MIX_SAMPLE_RATE)
        .channels(MIX_CHANNELS);

    let bytes = match runner.run_capture_stdout(&cmd).await {
        Ok(bytes) => bytes,
        // The file exists, so a decoder error means the content is bad.
        Err(MediaError::FfmpegFailed {
            stderr: Some(stderr),
            exit_code: Some(_),
            ..
        }) if looks_like_bad_input(&stderr) => {
            return Err(MediaError::invalid_audio(path, stderr));
        }
        Err(e) => return Err(e),
    };

    let buffer = AudioBuffer::from_le_bytes(&bytes, MIX_CHANNELS);
    if buffer.is_empty() {
        return Err(MediaError::ZeroDuration(path.to_path_buf()));
    }

    debug!(
        path = %path.display(),
        duration_ms = buffer.duration_ms(),
        "Decoded track"
    );
    Ok(buffer)
}

/// Encode a PCM buffer into `output` using the container's codec.
pub async fn encode_pcm(
    runner: &FfmpegRunner,
    audio: Arc<AudioBuffer>,
    format: AudioFormat,
    output: &Path,
) -> MediaResult<()> {
    let cmd = FfmpegCommand::new(output)
        .raw_pcm_input(PCM_FORMAT, MIX_SAMPLE_RATE, audio.channels())
        .stdin_input()
        .output_args(format.to_ffmpeg_args());

    runner
        .run_with_stdin(&cmd, move |mut stdin| async move {
            let mut bytes = Vec::with_capacity(WRITE_CHUNK_SAMPLES * 4);
            for chunk in audio.samples().chunks(WRITE_CHUNK_SAMPLES) {
                bytes.clear();
                bytes.extend(chunk.iter().flat_map(|s| s.to_le_bytes()));
                stdin.write_all(&bytes).await?;
            }
            stdin.shutdown().await
        })
        .await?;

    debug!(output = %output.display(), format = format.as_str(), "Encoded mix");
    Ok(())
}
