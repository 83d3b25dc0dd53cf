//! Chapter list and description text derived from the crossfade plan.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};
use crate::mix::OverlapPlan;
use crate::options::JobOptions;
use crate::track::TrackRef;

/// Maximum number of hashtags in a description.
pub const MAX_HASHTAGS: usize = 15;

const BASE_HASHTAGS: [&str; 15] = [
    "#EDM",
    "#ElectronicMusic",
    "#DanceMusic",
    "#DJMix",
    "#Mix",
    "#HouseMusic",
    "#TechHouse",
    "#DeepHouse",
    "#ProgressiveHouse",
    "#Trance",
    "#Dubstep",
    "#DrumAndBass",
    "#FutureBass",
    "#Rave",
    "#Festival",
];

/// A single chapter of the mix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Chapter {
    /// Zero-based track index
    pub index: usize,
    /// Chapter start in the mix
    pub start_ms: u64,
    /// `M:SS` or `H:MM:SS`
    pub timestamp: String,
    /// Display label
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
}

/// Machine-readable chapter list, stored as the `chapters_json` artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ChapterSheet {
    pub chapters: Vec<Chapter>,
    pub total_duration_ms: u64,
}

impl ChapterSheet {
    /// Tracklist lines, one per chapter.
    pub fn tracklist(&self) -> String {
        self.chapters
            .iter()
            .map(|c| format!("{}  {}", c.timestamp, c.label))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Build chapters from tracks and the plan the mixer actually applied.
///
/// Chapter `i` starts where the crossfade into track `i` ends. The first
/// chapter starts at zero.
pub fn build_chapters(
    tracks: &[TrackRef],
    plan: &[OverlapPlan],
    total_duration_ms: u64,
) -> ModelResult<ChapterSheet> {
    if tracks.is_empty() {
        return Err(ModelError::EmptyTracks);
    }
    if plan.len() != tracks.len() - 1 {
        return Err(ModelError::PlanLengthMismatch {
            tracks: tracks.len(),
            actual: plan.len(),
        });
    }

    let mut chapters = Vec::with_capacity(tracks.len());
    let mut previous: Option<u64> = None;

    for (index, track) in tracks.iter().enumerate() {
        let start_ms = if index == 0 {
            0
        } else {
            let entry = plan
                .iter()
                .find(|p| p.track_b_index == index && p.track_a_index + 1 == index)
                .ok_or(ModelError::MissingOverlap(index))?;
            entry.crossfade_end_ms()
        };

        if previous.is_some_and(|prev| start_ms <= prev) {
            return Err(ModelError::NonMonotonicChapters { index });
        }
        previous = Some(start_ms);

        let label = track
            .label()
            .unwrap_or_else(|| format!("Track {}", index + 1));

        chapters.push(Chapter {
            index,
            start_ms,
            timestamp: format_timestamp(start_ms / 1000),
            label,
            title: track.title.clone(),
            artist: track.artist.clone(),
        });
    }

    Ok(ChapterSheet {
        chapters,
        total_duration_ms,
    })
}

/// Format whole seconds as `M:SS`, or `H:MM:SS` from one hour on.
pub fn format_timestamp(total_seconds: u64) -> String {
    let h = total_seconds / 3600;
    let m = (total_seconds % 3600) / 60;
    let s = total_seconds % 60;
    if h > 0 {
        format!("{}:{:02}:{:02}", h, m, s)
    } else {
        format!("{}:{:02}", m, s)
    }
}

/// Base hashtags plus extras, `#`-prefixed, case-insensitively deduplicated
/// and capped at [`MAX_HASHTAGS`].
pub fn hashtags(extra: &[String]) -> Vec<String> {
    let extras = extra.iter().filter_map(|tag| {
        let tag = tag.trim();
        if tag.is_empty() {
            None
        } else if tag.starts_with('#') {
            Some(tag.to_string())
        } else {
            Some(format!("#{}", tag.split_whitespace().collect::<String>()))
        }
    });

    let mut seen = std::collections::HashSet::new();
    BASE_HASHTAGS
        .iter()
        .map(|t| t.to_string())
        .chain(extras)
        .filter(|t| seen.insert(t.to_lowercase()))
        .take(MAX_HASHTAGS)
        .collect()
}

/// Render the human-readable description for a finished mix.
pub fn render_description(sheet: &ChapterSheet, options: &JobOptions) -> String {
    let total = format_timestamp(sheet.total_duration_ms / 1000);
    let crossfade_secs = options.transition_ms as f64 / 1000.0;

    let mut out = String::new();
    out.push_str(&options.mixtape_title);
    out.push_str("\n\n");
    out.push_str(&format!(
        "A seamless EDM listening session with smooth crossfades (~{:.1}s) built from my current rotation. \
         Put this on for focus, driving, gym, or late-night vibes.\n\n",
        crossfade_secs
    ));
    out.push_str(&format!("Total length: {}\n", total));
    out.push_str("\n🎵 Tracklist:\n");
    out.push_str(&sheet.tracklist());
    out.push_str(
        "\n\n🧠 Tip: If you like a particular track, drop the timestamp in the comments and I’ll pin it.\n",
    );
    out.push_str(
        "\n⚠️ Disclaimer:\nTrack credits belong to their respective owners. \
         If you’re a rights holder and want changes, reach out and I’ll respond quickly.\n",
    );
    out.push_str("\n");
    out.push_str(&hashtags(&options.extra_hashtags).join(" "));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(a: usize, overlap_ms: u64, b_head: u64) -> OverlapPlan {
        OverlapPlan {
            track_a_index: a,
            track_b_index: a + 1,
            overlap_ms,
            a_tail_start_ms_in_mix: b_head,
            b_head_start_ms_in_mix: b_head,
        }
    }

    fn tracks(n: usize) -> Vec<TrackRef> {
        (0..n)
            .map(|i| TrackRef::new(format!("/in/{:02} - Song {}.mp3", i + 1, i + 1)))
            .collect()
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(0), "0:00");
        assert_eq!(format_timestamp(65), "1:05");
        assert_eq!(format_timestamp(3599), "59:59");
        assert_eq!(format_timestamp(3600), "1:00:00");
        assert_eq!(format_timestamp(3725), "1:02:05");
    }

    #[test]
    fn test_chapters_follow_plan() {
        // 60s, 45s, 30s with 3s crossfades
        let plan = vec![plan(0, 3000, 57_000), plan(1, 3000, 99_000)];
        let sheet = build_chapters(&tracks(3), &plan, 129_000).unwrap();

        let starts: Vec<u64> = sheet.chapters.iter().map(|c| c.start_ms).collect();
        assert_eq!(starts, vec![0, 60_000, 102_000]);
        assert_eq!(sheet.chapters[1].timestamp, "1:00");
        assert_eq!(sheet.chapters[2].label, "Song 3");
    }

    #[test]
    fn test_single_track() {
        let sheet = build_chapters(&tracks(1), &[], 42_000).unwrap();
        assert_eq!(sheet.chapters.len(), 1);
        assert_eq!(sheet.chapters[0].start_ms, 0);
    }

    #[test]
    fn test_plan_length_mismatch() {
        let err = build_chapters(&tracks(3), &[plan(0, 3000, 57_000)], 0).unwrap_err();
        assert_eq!(err, ModelError::PlanLengthMismatch { tracks: 3, actual: 1 });
    }

    #[test]
    fn test_non_monotonic_rejected() {
        let plan = vec![plan(0, 3000, 57_000), plan(1, 3000, 50_000)];
        let err = build_chapters(&tracks(3), &plan, 0).unwrap_err();
        assert_eq!(err, ModelError::NonMonotonicChapters { index: 2 });
    }

    #[test]
    fn test_label_fallback_to_track_number() {
        let tracks = vec![TrackRef::new("a.mp3"), TrackRef::new("/dir/")];
        let sheet = build_chapters(&tracks, &[plan(0, 0, 1000)], 2000).unwrap();
        assert_eq!(sheet.chapters[1].label, "Track 2");
    }

    #[test]
    fn test_hashtags_dedupe_and_cap() {
        let tags = hashtags(&["edm".to_string(), "Late Night".to_string(), " ".to_string()]);
        assert_eq!(tags.len(), MAX_HASHTAGS);
        assert!(!tags.iter().any(|t| t == "#LateNight"));

        let tags = hashtags(&[]);
        assert_eq!(tags.first().map(String::as_str), Some("#EDM"));
    }

    #[test]
    fn test_description_contents() {
        let plan = vec![plan(0, 3000, 57_000)];
        let tracks = vec![
            TrackRef::new("a.mp3").with_tags(Some("Intro".into()), Some("DJ".into())),
            TrackRef::new("b.mp3"),
        ];
        let sheet = build_chapters(&tracks, &plan, 102_000).unwrap();
        let options = JobOptions::default().with_transition_ms(3000);
        let text = render_description(&sheet, &options);

        assert!(text.starts_with(&options.mixtape_title));
        assert!(text.contains("(~3.0s)"));
        assert!(text.contains("Total length: 1:42"));
        assert!(text.contains("0:00  DJ – Intro"));
        assert!(text.contains("1:00  b"));
        assert!(text.ends_with("#Festival"));
    }
}
