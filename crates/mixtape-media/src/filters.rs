//! Sample-level filters used inside crossfade windows.
//!
//! All functions work on interleaved buffers in place.

use std::f32::consts::PI;

/// Linear fade from silence to full level across the whole slice.
pub fn fade_in(samples: &mut [f32], channels: u16) {
    apply_gain_ramp(samples, channels, |pos| pos);
}

/// Linear fade from full level to silence across the whole slice.
///
/// Complementary to [`fade_in`]: at every frame the two gains sum to one.
pub fn fade_out(samples: &mut [f32], channels: u16) {
    apply_gain_ramp(samples, channels, |pos| 1.0 - pos);
}

fn apply_gain_ramp(samples: &mut [f32], channels: u16, gain: impl Fn(f32) -> f32) {
    let channels = channels.max(1) as usize;
    let frames = samples.len() / channels;
    if frames == 0 {
        return;
    }

    let len = frames as f32;
    for (frame_idx, frame) in samples.chunks_exact_mut(channels).enumerate() {
        let g = gain(frame_idx as f32 / len);
        for s in frame {
            *s *= g;
        }
    }
}

/// First-order RC low-pass, run independently per channel.
#[derive(Debug, Clone, Copy)]
pub struct LowPass {
    alpha: f32,
}

impl LowPass {
    pub fn new(cutoff_hz: u32, sample_rate: u32) -> Self {
        let rc = 1.0 / (cutoff_hz.max(1) as f32 * 2.0 * PI);
        let dt = 1.0 / sample_rate.max(1) as f32;
        Self { alpha: dt / (rc + dt) }
    }

    /// Smoothing factor in `(0, 1]`.
    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    /// Filter the slice in place. The first frame passes through unchanged.
    pub fn apply(&self, samples: &mut [f32], channels: u16) {
        let channels = channels.max(1) as usize;
        let mut frames = samples.chunks_exact_mut(channels);

        let Some(first) = frames.next() else {
            return;
        };
        let mut last: Vec<f32> = first.to_vec();

        for frame in frames {
            for (s, prev) in frame.iter_mut().zip(last.iter_mut()) {
                *prev += self.alpha * (*s - *prev);
                *s = *prev;
            }
        }
    }
}
