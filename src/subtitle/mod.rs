use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Header line required at the top of a WebVTT document
pub const WEBVTT_HEADER: &str = "WEBVTT";

/// One timed caption entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cue {
    /// Position within the track, in source order (0-based)
    pub index: usize,

    /// Start time in seconds
    pub start_seconds: f64,

    /// End time in seconds
    pub end_seconds: f64,

    /// Caption text (may span multiple lines)
    pub text: String,
}

/// An ordered sequence of cues parsed from SRT text.
///
/// The track is the single source of truth for the editor: edits replace a
/// cue's text by index and a display format (WebVTT) is derived on demand.
#[derive(Debug, Clone, Default)]
pub struct SubtitleTrack {
    cues: Vec<Cue>,
    skipped_blocks: usize,
}

fn timing_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(\d+):(\d{2}):(\d{2})[,.](\d{3})\s*-->\s*(\d+):(\d{2}):(\d{2})[,.](\d{3})")
            .expect("timing pattern is a valid regex")
    })
}

impl SubtitleTrack {
    /// Parse SRT text into an ordered cue sequence.
    ///
    /// Parsing is lenient: blocks whose timing line does not match
    /// `H:MM:SS,mmm --> H:MM:SS,mmm` (dot separators also accepted) are
    /// skipped rather than failing the whole track, and cues whose start is
    /// not strictly before their end are dropped. Skipped blocks are counted
    /// for diagnostics via [`SubtitleTrack::skipped_blocks`].
    pub fn parse(text: &str) -> Self {
        let normalized = text.replace("\r\n", "\n").replace('\r', "\n");

        let mut cues = Vec::new();
        let mut skipped_blocks = 0;

        for block in normalized.split("\n\n") {
            let lines: Vec<&str> = block
                .lines()
                .map(|line| line.trim_end())
                .skip_while(|line| line.is_empty())
                .collect();

            if lines.is_empty() {
                continue;
            }

            // A purely numeric first line is a cue-number marker; the index
            // is recomputed on serialization, so the marker is discarded.
            let mut cursor = 0;
            if lines[0].chars().all(|c| c.is_ascii_digit()) && !lines[0].is_empty() {
                cursor = 1;
            }

            let Some((start_seconds, end_seconds)) =
                lines.get(cursor).and_then(|line| parse_timing_line(line))
            else {
                tracing::debug!("skipping malformed cue block: {:?}", lines.first());
                skipped_blocks += 1;
                continue;
            };

            if start_seconds >= end_seconds {
                tracing::debug!(
                    "dropping cue with non-positive duration: {} >= {}",
                    start_seconds,
                    end_seconds
                );
                skipped_blocks += 1;
                continue;
            }

            let text = lines[cursor + 1..].join("\n");

            cues.push(Cue {
                index: cues.len(),
                start_seconds,
                end_seconds,
                text,
            });
        }

        Self {
            cues,
            skipped_blocks,
        }
    }

    /// Cues in source order
    pub fn cues(&self) -> &[Cue] {
        &self.cues
    }

    /// Number of blocks dropped during parse (malformed timing or inverted times)
    pub fn skipped_blocks(&self) -> usize {
        self.skipped_blocks
    }

    pub fn len(&self) -> usize {
        self.cues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cues.is_empty()
    }

    /// Replace the text of one cue by index, preserving all others.
    ///
    /// Returns false if the index is out of range.
    pub fn replace_text(&mut self, index: usize, text: impl Into<String>) -> bool {
        match self.cues.get_mut(index) {
            Some(cue) => {
                cue.text = text.into();
                true
            }
            None => false,
        }
    }

    /// Serialize the track back to SRT text.
    ///
    /// Indices are re-emitted 1-based from the current cue order, so editing
    /// or dropped blocks never leave gaps in the numbering.
    pub fn to_srt(&self) -> String {
        let blocks: Vec<String> = self
            .cues
            .iter()
            .enumerate()
            .map(|(i, cue)| {
                format!(
                    "{}\n{} --> {}\n{}",
                    i + 1,
                    format_timestamp(cue.start_seconds, ','),
                    format_timestamp(cue.end_seconds, ','),
                    cue.text
                )
            })
            .collect();

        let mut out = blocks.join("\n\n");
        out.push('\n');
        out
    }
}

/// Parse one `H:MM:SS,mmm --> H:MM:SS,mmm` line into (start, end) seconds.
fn parse_timing_line(line: &str) -> Option<(f64, f64)> {
    let caps = timing_pattern().captures(line)?;

    let field = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<f64>().ok());

    let start = field(1)? * 3600.0 + field(2)? * 60.0 + field(3)? + field(4)? / 1000.0;
    let end = field(5)? * 3600.0 + field(6)? * 60.0 + field(7)? + field(8)? / 1000.0;

    Some((start, end))
}

/// Format seconds as `HH:MM:SS<sep>mmm`, truncating (not rounding) so a
/// formatted value re-parses to the same millisecond.
pub fn format_timestamp(seconds: f64, sep: char) -> String {
    let total_ms = (seconds * 1000.0).floor().max(0.0) as u64;

    let hours = total_ms / 3_600_000;
    let minutes = (total_ms / 60_000) % 60;
    let secs = (total_ms / 1000) % 60;
    let millis = total_ms % 1000;

    format!("{hours:02}:{minutes:02}:{secs:02}{sep}{millis:03}")
}

/// Convert SRT text to WebVTT display text.
///
/// One-directional: numeric cue-number lines are stripped, the comma
/// millisecond separator in timing lines becomes a dot, and the fixed
/// `WEBVTT` header plus a blank line is prepended. Cue text and line breaks
/// pass through untouched.
pub fn webvtt_from_srt(srt: &str) -> String {
    let normalized = srt.replace("\r\n", "\n").replace('\r', "\n");

    let mut lines = Vec::new();
    for line in normalized.lines() {
        let line = line.trim_end();

        if !line.is_empty() && line.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }

        if timing_pattern().is_match(line) {
            lines.push(line.replace(',', "."));
        } else {
            lines.push(line.to_string());
        }
    }

    format!("{}\n\n{}\n", WEBVTT_HEADER, lines.join("\n"))
}

/// Find the cue active at `time_seconds`: the first cue whose span contains
/// the playhead, bounds inclusive. Gaps between cues yield `None`.
pub fn active_cue_index(cues: &[Cue], time_seconds: f64) -> Option<usize> {
    cues.iter()
        .position(|cue| cue.start_seconds <= time_seconds && time_seconds <= cue.end_seconds)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_SRT: &str =
        "1\n00:00:01,000 --> 00:00:03,500\nHello\n\n2\n00:00:04,000 --> 00:00:06,000\nWorld\n";

    #[test]
    fn test_parse_sample() {
        let track = SubtitleTrack::parse(SAMPLE_SRT);

        assert_eq!(track.len(), 2);
        assert_eq!(track.skipped_blocks(), 0);

        let cues = track.cues();
        assert_eq!(cues[0].start_seconds, 1.0);
        assert_eq!(cues[0].end_seconds, 3.5);
        assert_eq!(cues[0].text, "Hello");
        assert_eq!(cues[1].start_seconds, 4.0);
        assert_eq!(cues[1].end_seconds, 6.0);
        assert_eq!(cues[1].text, "World");
    }

    #[test]
    fn test_parse_accepts_dot_separator_and_crlf() {
        let srt = "1\r\n00:00:01.250 --> 00:00:02.750\r\nHi\r\n";
        let track = SubtitleTrack::parse(srt);

        assert_eq!(track.len(), 1);
        assert_eq!(track.cues()[0].start_seconds, 1.25);
        assert_eq!(track.cues()[0].end_seconds, 2.75);
    }

    #[test]
    fn test_parse_skips_malformed_blocks() {
        let srt = "1\n00:00:01,000 --> 00:00:02,000\nGood\n\nnot a timing line\njunk\n\n3\n00:00:05,000 --> 00:00:06,000\nAlso good\n";
        let track = SubtitleTrack::parse(srt);

        assert_eq!(track.len(), 2);
        assert_eq!(track.skipped_blocks(), 1);
        assert_eq!(track.cues()[0].text, "Good");
        assert_eq!(track.cues()[1].text, "Also good");
    }

    #[test]
    fn test_parse_drops_inverted_cues() {
        let srt = "1\n00:00:05,000 --> 00:00:02,000\nBackwards\n\n2\n00:00:06,000 --> 00:00:07,000\nForwards\n";
        let track = SubtitleTrack::parse(srt);

        assert_eq!(track.len(), 1);
        assert_eq!(track.skipped_blocks(), 1);
        assert_eq!(track.cues()[0].text, "Forwards");
    }

    #[test]
    fn test_multiline_cue_text() {
        let srt = "1\n00:00:01,000 --> 00:00:04,000\nLine one\nLine two\n";
        let track = SubtitleTrack::parse(srt);

        assert_eq!(track.cues()[0].text, "Line one\nLine two");
    }

    #[test]
    fn test_round_trip_is_idempotent() {
        let track = SubtitleTrack::parse(SAMPLE_SRT);
        let reparsed = SubtitleTrack::parse(&track.to_srt());

        assert_eq!(track.cues(), reparsed.cues());
        assert_eq!(track.to_srt(), reparsed.to_srt());
    }

    #[test]
    fn test_format_timestamp_truncates() {
        // 3.6789s floors to 3.678, never rounds up to 3.679
        assert_eq!(format_timestamp(3.6789, ','), "00:00:03,678");
        assert_eq!(format_timestamp(0.0, ','), "00:00:00,000");
        assert_eq!(format_timestamp(3661.5, '.'), "01:01:01.500");
    }

    #[test]
    fn test_webvtt_conversion_end_to_end() {
        let vtt = webvtt_from_srt(SAMPLE_SRT);

        assert_eq!(
            vtt,
            "WEBVTT\n\n00:00:01.000 --> 00:00:03.500\nHello\n\n00:00:04.000 --> 00:00:06.000\nWorld\n"
        );
    }

    #[test]
    fn test_webvtt_header_and_no_index_lines() {
        let vtt = webvtt_from_srt(SAMPLE_SRT);

        assert!(vtt.starts_with("WEBVTT\n\n"));
        assert!(!vtt.lines().any(|l| !l.is_empty() && l.chars().all(|c| c.is_ascii_digit())));
    }

    #[test]
    fn test_webvtt_preserves_commas_in_text() {
        let srt = "1\n00:00:01,000 --> 00:00:02,000\nHello, world\n";
        let vtt = webvtt_from_srt(srt);

        assert!(vtt.contains("00:00:01.000 --> 00:00:02.000"));
        assert!(vtt.contains("Hello, world"));
    }

    #[test]
    fn test_active_cue_lookup() {
        let cues = vec![
            Cue {
                index: 0,
                start_seconds: 0.0,
                end_seconds: 2.0,
                text: "a".into(),
            },
            Cue {
                index: 1,
                start_seconds: 3.0,
                end_seconds: 5.0,
                text: "b".into(),
            },
        ];

        assert_eq!(active_cue_index(&cues, 1.0), Some(0));
        assert_eq!(active_cue_index(&cues, 2.5), None);
        assert_eq!(active_cue_index(&cues, 4.0), Some(1));
        assert_eq!(active_cue_index(&cues, 6.0), None);
        // bounds are inclusive
        assert_eq!(active_cue_index(&cues, 2.0), Some(0));
        assert_eq!(active_cue_index(&cues, 3.0), Some(1));
    }

    #[test]
    fn test_replace_text() {
        let mut track = SubtitleTrack::parse(SAMPLE_SRT);

        assert!(track.replace_text(1, "Everyone"));
        assert_eq!(track.cues()[1].text, "Everyone");
        assert_eq!(track.cues()[0].text, "Hello");
        assert!(!track.replace_text(5, "out of range"));
    }
}
