//! Crossfade plan shared by the mixer and the chapter builder.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// One crossfade between two adjacent tracks.
///
/// Offsets are positions in the final mix, in milliseconds. The mixer
/// produces these once; everything downstream reads them instead of
/// recomputing overlaps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct OverlapPlan {
    /// Index of the outgoing track
    pub track_a_index: usize,
    /// Index of the incoming track
    pub track_b_index: usize,
    /// Length of the overlap window
    pub overlap_ms: u64,
    /// Where the faded-out tail of the outgoing side starts in the mix
    pub a_tail_start_ms_in_mix: u64,
    /// Where the incoming track starts in the mix
    pub b_head_start_ms_in_mix: u64,
}

impl OverlapPlan {
    /// Mix position at which the crossfade into `track_b_index` is over.
    pub fn crossfade_end_ms(&self) -> u64 {
        self.b_head_start_ms_in_mix + self.overlap_ms
    }
}

/// Expected mix length for a set of track durations and applied overlaps.
pub fn expected_mix_duration_ms(durations_ms: &[u64], plan: &[OverlapPlan]) -> u64 {
    let total: u64 = durations_ms.iter().sum();
    let overlapped: u64 = plan.iter().map(|p| p.overlap_ms).sum();
    total - overlapped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crossfade_end() {
        let plan = OverlapPlan {
            track_a_index: 0,
            track_b_index: 1,
            overlap_ms: 3000,
            a_tail_start_ms_in_mix: 57_000,
            b_head_start_ms_in_mix: 57_000,
        };
        assert_eq!(plan.crossfade_end_ms(), 60_000);
        assert_eq!(expected_mix_duration_ms(&[60_000, 45_000], &[plan]), 102_000);
    }
}
