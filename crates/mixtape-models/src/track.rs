//! Input tracks.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A single input track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TrackRef {
    /// File reference as submitted
    pub path: String,

    /// Duration in milliseconds; unknown until probed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,

    /// Title tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Artist tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
}

impl TrackRef {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            duration_ms: None,
            title: None,
            artist: None,
        }
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_tags(mut self, title: Option<String>, artist: Option<String>) -> Self {
        self.title = title;
        self.artist = artist;
        self
    }

    /// Final path component of the reference.
    pub fn filename(&self) -> &str {
        self.path
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(self.path.as_str())
    }

    /// Display label: `artist – title`, the title alone, or a title recovered
    /// from the filename. `None` when nothing usable is left.
    pub fn label(&self) -> Option<String> {
        let title = non_blank(self.title.as_deref());
        let artist = non_blank(self.artist.as_deref());
        match (artist, title) {
            (Some(artist), Some(title)) => Some(format!("{} – {}", artist, title)),
            (None, Some(title)) => Some(title.to_string()),
            _ => {
                let fallback = title_from_filename(self.filename());
                (!fallback.is_empty()).then_some(fallback)
            }
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Turn `01 - Artist - Track (Remix).mp3` into `Artist - Track (Remix)`.
pub fn title_from_filename(name: &str) -> String {
    let stem = match name.rfind('.') {
        Some(idx) if idx > 0 => &name[..idx],
        _ => name,
    };

    // Leading track number followed by one separator.
    let trimmed = stem.trim_start();
    let digits = trimmed.chars().take_while(|c| c.is_ascii_digit()).count();
    let mut rest = trimmed;
    if digits > 0 {
        let after_digits = trimmed[digits..].trim_start();
        if let Some(sep) = after_digits.chars().next() {
            if matches!(sep, '-' | '_' | '.') || after_digits.len() < trimmed[digits..].len() {
                let skip = if matches!(sep, '-' | '_' | '.') { sep.len_utf8() } else { 0 };
                rest = after_digits[skip..].trim_start();
            }
        }
    }

    rest.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filename() {
        assert_eq!(TrackRef::new("/music/set/01 - intro.mp3").filename(), "01 - intro.mp3");
        assert_eq!(TrackRef::new("plain.wav").filename(), "plain.wav");
    }

    #[test]
    fn test_title_from_filename() {
        assert_eq!(
            title_from_filename("01 - Artist - Track (Remix).mp3"),
            "Artist - Track (Remix)"
        );
        assert_eq!(title_from_filename("07_Deep   Cut.flac"), "Deep Cut");
        assert_eq!(title_from_filename("Song.mp3"), "Song");
        assert_eq!(title_from_filename("2049.mp3"), "2049");
    }

    #[test]
    fn test_label_prefers_tags() {
        let track = TrackRef::new("01 - x.mp3")
            .with_tags(Some("Title".into()), Some("Artist".into()));
        assert_eq!(track.label().as_deref(), Some("Artist – Title"));

        let track = TrackRef::new("01 - x.mp3").with_tags(Some("Only Title".into()), None);
        assert_eq!(track.label().as_deref(), Some("Only Title"));

        let track = TrackRef::new("03 - From File.mp3");
        assert_eq!(track.label().as_deref(), Some("From File"));
    }
}
