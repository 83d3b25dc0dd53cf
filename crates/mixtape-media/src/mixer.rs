//! Crossfade mixer.
//!
//! Tracks are joined strictly left to right. Each join overlaps the tail of
//! the running mix with the head of the next track, fades both sides with
//! complementary linear ramps, low-passes them, and sums the result.
//!
//! Overlap lengths come from [`plan_overlaps`], which only looks at track
//! durations. The same plan is applied to the samples and handed to the
//! chapter builder, so the two can never disagree.

use tracing::debug;

use mixtape_models::encoding::MIX_SAMPLE_RATE;
use mixtape_models::mix::OverlapPlan;

use crate::error::{MediaError, MediaResult};
use crate::filters::{fade_in, fade_out, LowPass};
use crate::pcm::AudioBuffer;

/// Crossfade parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrossfadeSettings {
    pub transition_ms: u64,
    pub lowpass_cutoff_hz: u32,
}

/// Result of a mix.
#[derive(Debug, Clone)]
pub struct MixOutput {
    pub audio: AudioBuffer,
    pub plan: Vec<OverlapPlan>,
}

impl MixOutput {
    pub fn duration_ms(&self) -> u64 {
        self.audio.duration_ms()
    }
}

/// Compute the overlap for every adjacent pair.
///
/// For the join into track `i`:
/// `overlap = min(transition, remaining(outgoing), available(incoming))`.
/// `remaining` is the part of the outgoing track not already used by the
/// crossfade into it, so no point of the mix ever carries three tracks.
/// `available` is the incoming length, minus one millisecond when another
/// track follows; that millisecond of solo playback keeps chapter starts
/// strictly increasing.
///
/// A middle track shorter than the transition therefore overlaps one
/// millisecond less than its length: durations `[10000, 1500, 10000]` with a
/// 5000 ms transition give overlaps of 1499 ms and then 1 ms, where the
/// plain `min(transition, len(outgoing), len(incoming))` would give 1500 ms
/// and leave the second chapter starting where the third one does. The
/// final track has no successor and may be overlapped in full.
pub fn plan_overlaps(durations_ms: &[u64], transition_ms: u64) -> Vec<OverlapPlan> {
    let Some((&first, rest)) = durations_ms.split_first() else {
        return Vec::new();
    };

    let mut plan = Vec::with_capacity(rest.len());
    let mut mix_len = first;
    let mut remaining = first;

    for (offset, &incoming) in rest.iter().enumerate() {
        let index = offset + 1;
        let is_last = index == durations_ms.len() - 1;
        let available = if is_last {
            incoming
        } else {
            incoming.saturating_sub(1)
        };

        let overlap = transition_ms.min(remaining).min(available);
        let join_at = mix_len - overlap;

        plan.push(OverlapPlan {
            track_a_index: index - 1,
            track_b_index: index,
            overlap_ms: overlap,
            a_tail_start_ms_in_mix: join_at,
            b_head_start_ms_in_mix: join_at,
        });

        mix_len = join_at + incoming;
        remaining = incoming - overlap;
    }

    plan
}

/// Mix decoded tracks into one buffer.
///
/// Consumes the segments so each can be dropped as soon as it is appended.
pub fn crossfade(segments: Vec<AudioBuffer>, settings: CrossfadeSettings) -> MediaResult<MixOutput> {
    let channels = match segments.first() {
        Some(first) => first.channels(),
        None => return Err(MediaError::MixInput("no segments to mix".to_string())),
    };
    if let Some(bad) = segments.iter().position(|s| s.channels() != channels) {
        return Err(MediaError::MixInput(format!(
            "segment {} has {} channels, expected {}",
            bad,
            segments[bad].channels(),
            channels
        )));
    }

    let durations: Vec<u64> = segments.iter().map(AudioBuffer::duration_ms).collect();
    let plan = plan_overlaps(&durations, settings.transition_ms);
    let lowpass = LowPass::new(settings.lowpass_cutoff_hz, MIX_SAMPLE_RATE);

    let mut segments = segments.into_iter();
    let mut mix = segments
        .next()
        .map(AudioBuffer::into_samples)
        .unwrap_or_default();

    for (entry, incoming) in plan.iter().zip(segments) {
        let overlap_samples = incoming.sample_offset(entry.overlap_ms);
        let join_at = incoming.sample_offset(entry.a_tail_start_ms_in_mix);

        if mix.len() != join_at + overlap_samples {
            return Err(MediaError::MixInput(format!(
                "running mix is {} samples, plan expects {}",
                mix.len(),
                join_at + overlap_samples
            )));
        }

        let incoming = incoming.into_samples();
        if overlap_samples == 0 {
            mix.extend_from_slice(&incoming);
            continue;
        }

        let (head, body) = incoming.split_at(overlap_samples);
        let mut intro = head.to_vec();
        fade_in(&mut intro, channels);
        lowpass.apply(&mut intro, channels);

        let outro = &mut mix[join_at..];
        fade_out(outro, channels);
        lowpass.apply(outro, channels);

        for (out, inc) in outro.iter_mut().zip(&intro) {
            *out += inc;
        }
        mix.extend_from_slice(body);

        debug!(
            track = entry.track_b_index,
            overlap_ms = entry.overlap_ms,
            join_at_ms = entry.a_tail_start_ms_in_mix,
            "Applied crossfade"
        );
    }

    Ok(MixOutput {
        audio: AudioBuffer::from_interleaved(mix, channels),
        plan,
    })
}

/// Run [`crossfade`] on the blocking pool.
pub async fn crossfade_blocking(
    segments: Vec<AudioBuffer>,
    settings: CrossfadeSettings,
) -> MediaResult<MixOutput> {
    tokio::task::spawn_blocking(move || crossfade(segments, settings))
        .await
        .map_err(|e| MediaError::internal(format!("mix task failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use mixtape_models::mix::expected_mix_duration_ms;

    fn tone(duration_ms: u64, level: f32) -> AudioBuffer {
        let mut buf = AudioBuffer::silence(duration_ms, 2);
        buf.samples_mut().iter_mut().for_each(|s| *s = level);
        buf
    }

    fn settings(transition_ms: u64) -> CrossfadeSettings {
        CrossfadeSettings {
            transition_ms,
            lowpass_cutoff_hz: 4000,
        }
    }

    #[test]
    fn test_plan_three_tracks() {
        let plan = plan_overlaps(&[60_000, 45_000, 30_000], 3000);
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].overlap_ms, 3000);
        assert_eq!(plan[0].b_head_start_ms_in_mix, 57_000);
        assert_eq!(plan[1].overlap_ms, 3000);
        assert_eq!(plan[1].b_head_start_ms_in_mix, 99_000);
        assert_eq!(expected_mix_duration_ms(&[60_000, 45_000, 30_000], &plan), 129_000);
    }

    #[test]
    fn test_plan_clamps_to_short_final_track() {
        let plan = plan_overlaps(&[10_000, 2000], 5000);
        assert_eq!(plan[0].overlap_ms, 2000);
        assert_eq!(expected_mix_duration_ms(&[10_000, 2000], &plan), 10_000);
    }

    #[test]
    fn test_plan_never_stacks_three_tracks() {
        // Middle track shorter than the transition
        let durations = [10_000, 1500, 10_000];
        let plan = plan_overlaps(&durations, 5000);
        assert_eq!(plan[0].overlap_ms, 1499);
        // Only 1 ms of the middle track is left for the next crossfade
        assert_eq!(plan[1].overlap_ms, 1);
        assert!(plan[1].a_tail_start_ms_in_mix >= plan[0].crossfade_end_ms());
    }

    #[test]
    fn test_plan_single_and_empty() {
        assert!(plan_overlaps(&[5000], 3000).is_empty());
        assert!(plan_overlaps(&[], 3000).is_empty());
    }

    #[test]
    fn test_plan_zero_transition() {
        let plan = plan_overlaps(&[1000, 1000], 0);
        assert_eq!(plan[0].overlap_ms, 0);
        assert_eq!(plan[0].b_head_start_ms_in_mix, 1000);
    }

    #[test]
    fn test_crossfade_duration_matches_plan() {
        let out = crossfade(vec![tone(600, 0.5), tone(450, 0.5), tone(300, 0.5)], settings(30)).unwrap();
        assert_eq!(out.plan.len(), 2);
        assert_eq!(out.duration_ms(), expected_mix_duration_ms(&[600, 450, 300], &out.plan));
        assert_eq!(out.duration_ms(), 1290);
    }

    #[test]
    fn test_single_track_is_verbatim() {
        let track = tone(250, 0.25);
        let out = crossfade(vec![track.clone()], settings(100)).unwrap();
        assert!(out.plan.is_empty());
        assert_eq!(out.audio, track);
    }

    #[test]
    fn test_crossfade_keeps_level_on_dc() {
        // Equal DC levels: complementary fades sum back to the same level
        // once the low-pass has settled.
        let out = crossfade(vec![tone(100, 0.5), tone(100, 0.5)], settings(50)).unwrap();
        let samples = out.audio.samples();
        let mid = out.audio.sample_offset(75);
        assert!((samples[mid] - 0.5).abs() < 0.01);
        // Untouched head and tail
        assert_eq!(samples[0], 0.5);
        assert_eq!(samples[samples.len() - 1], 0.5);
    }

    #[test]
    fn test_crossfade_is_deterministic() {
        let a = crossfade(vec![tone(200, 0.3), tone(150, -0.2)], settings(80)).unwrap();
        let b = crossfade(vec![tone(200, 0.3), tone(150, -0.2)], settings(80)).unwrap();
        assert_eq!(a.plan, b.plan);
        assert_eq!(a.audio, b.audio);
    }

    #[test]
    fn test_channel_mismatch_rejected() {
        let mono = AudioBuffer::silence(100, 1);
        let err = crossfade(vec![tone(100, 0.1), mono], settings(10)).unwrap_err();
        assert!(matches!(err, MediaError::MixInput(_)));
    }

    #[tokio::test]
    async fn test_crossfade_blocking() {
        let out = crossfade_blocking(vec![tone(100, 0.1), tone(100, 0.1)], settings(20))
            .await
            .unwrap();
        assert_eq!(out.duration_ms(), 180);
    }
}
