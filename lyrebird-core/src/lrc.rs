use crate::error::ParseError;
use crate::time::DurationExt;
use std::fmt::Write;
use std::time::Duration;
use tracing::debug;

/// Parsed timed-lyric document: metadata plus lines sorted by timestamp
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LyricDocument {
    pub metadata: LyricMetadata,
    pub lines: Vec<LyricLine>,
}

/// Metadata from ID tags
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LyricMetadata {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub author: Option<String>,
    pub length: Option<Duration>,
    pub offset_ms: i64, // milliseconds, can be negative
}

/// A single line of lyrics with its offset-adjusted start time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LyricLine {
    pub timestamp: Duration,
    pub text: String,
}

impl LyricLine {
    pub fn new(timestamp: Duration, text: impl Into<String>) -> Self {
        Self {
            timestamp,
            text: text.into(),
        }
    }
}

/// Counters collected while parsing, for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseReport {
    /// Lines that carried one or more timestamp tags
    pub timed_lines: usize,
    /// Metadata tags recognized or ignored
    pub metadata_tags: usize,
    /// Non-blank lines skipped because nothing in them could be parsed
    pub skipped: usize,
}

impl ParseReport {
    /// Whether the input carried any tag at all
    #[must_use]
    pub const fn has_tags(&self) -> bool {
        self.timed_lines > 0 || self.metadata_tags > 0
    }
}

impl LyricDocument {
    /// Parse timed-lyric text, skipping malformed lines.
    ///
    /// Never fails: a document without any valid line is simply empty.
    #[must_use]
    pub fn parse(input: &str) -> Self {
        Self::parse_with_report(input).0
    }

    /// Parse for import: like [`parse`](Self::parse), but text that is not
    /// blank and carries no tag at all is rejected as untimed.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::NoTimedContent`] for plain, untagged text.
    pub fn parse_strict(input: &str) -> Result<Self, ParseError> {
        let (document, report) = Self::parse_with_report(input);
        if !report.has_tags() && !input.trim().is_empty() {
            return Err(ParseError::NoTimedContent);
        }
        Ok(document)
    }

    /// Parse and return the document together with parse counters
    #[must_use]
    pub fn parse_with_report(input: &str) -> (Self, ParseReport) {
        let mut metadata = LyricMetadata::default();
        let mut lines = Vec::new();
        let mut report = ParseReport::default();

        for (number, raw) in input.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }

            // Timestamps take priority: [01:02.03] also looks like a tag
            if let Some(parsed) = parse_lyric_line(line) {
                report.timed_lines += 1;
                lines.extend(parsed);
                continue;
            }

            if let Some((tag, value)) = parse_id_tag(line) {
                if apply_id_tag(&mut metadata, &tag, &value) {
                    report.metadata_tags += 1;
                } else {
                    debug!("Skipping malformed [{tag}] tag on line {}", number + 1);
                    report.skipped += 1;
                }
                continue;
            }

            debug!("Skipping unrecognized lyric line {}", number + 1);
            report.skipped += 1;
        }

        if metadata.offset_ms != 0 {
            for line in &mut lines {
                line.timestamp = apply_offset(line.timestamp, metadata.offset_ms);
            }
        }

        // Stable: lines sharing a timestamp keep encounter order
        lines.sort_by_key(|l| l.timestamp);

        (Self { metadata, lines }, report)
    }

    /// Serialize back to timed-lyric text.
    ///
    /// Metadata first (only present fields, no offset tag when zero), a blank
    /// separator, then one `[mm:ss.xx]text` line per lyric line. Timestamps
    /// are written with the offset removed so that parsing the output applies
    /// it exactly once.
    #[must_use]
    pub fn serialize(&self) -> String {
        let mut output = String::new();
        let meta = &self.metadata;

        if let Some(ref title) = meta.title {
            let _ = writeln!(output, "[ti:{title}]");
        }
        if let Some(ref artist) = meta.artist {
            let _ = writeln!(output, "[ar:{artist}]");
        }
        if let Some(ref album) = meta.album {
            let _ = writeln!(output, "[al:{album}]");
        }
        if let Some(ref author) = meta.author {
            let _ = writeln!(output, "[by:{author}]");
        }
        if let Some(length) = meta.length {
            let _ = writeln!(output, "[length:{}]", format_timestamp(length));
        }
        if meta.offset_ms != 0 {
            let _ = writeln!(output, "[offset:{}]", meta.offset_ms);
        }
        if !output.is_empty() {
            output.push('\n');
        }

        for line in &self.lines {
            let raw = apply_offset(line.timestamp, -meta.offset_ms);
            let _ = writeln!(output, "[{}]{}", format_timestamp(raw), line.text);
        }

        output
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Index of the line active at `position`, if any.
    ///
    /// The active line is the last one whose timestamp is at or before the
    /// position; among equal timestamps that is the last of the run.
    #[must_use]
    pub fn current_line_index(&self, position: Duration) -> Option<usize> {
        self.lines
            .partition_point(|line| line.timestamp <= position)
            .checked_sub(1)
    }

    /// Find the current line for a given playback position
    #[must_use]
    pub fn current_line(&self, position: Duration) -> Option<&LyricLine> {
        self.current_line_index(position).map(|i| &self.lines[i])
    }

    /// Get lines around the current position for display
    #[must_use]
    pub fn visible_lines(&self, position: Duration, before: usize, after: usize) -> &[LyricLine] {
        let current_idx = self.current_line_index(position).unwrap_or(0);

        let start = current_idx.saturating_sub(before);
        let end = (current_idx + after + 1).min(self.lines.len());

        if start >= end {
            return &[];
        }
        &self.lines[start..end]
    }

    /// Progress through line `index` (0.0 to 1.0), measured against the next
    /// line's start or a five second default for the last line
    #[must_use]
    pub fn line_progress(&self, index: usize, position: Duration) -> f32 {
        let Some(line) = self.lines.get(index) else {
            return 0.0;
        };
        if position < line.timestamp {
            return 0.0;
        }

        let end_time = self
            .lines
            .get(index + 1)
            .map_or(line.timestamp + Duration::from_secs(5), |next| next.timestamp);

        if position >= end_time {
            return 1.0;
        }

        let total = end_time.saturating_sub(line.timestamp);
        if total.is_zero() {
            return 1.0;
        }
        let elapsed = position.saturating_sub(line.timestamp);

        (elapsed.as_secs_f32() / total.as_secs_f32()).clamp(0.0, 1.0)
    }
}

/// Store a recognized ID tag; returns false when its value is malformed
fn apply_id_tag(metadata: &mut LyricMetadata, tag: &str, value: &str) -> bool {
    match tag.to_lowercase().as_str() {
        "ti" => metadata.title = Some(value.to_string()),
        "ar" => metadata.artist = Some(value.to_string()),
        "al" => metadata.album = Some(value.to_string()),
        "by" | "au" => metadata.author = Some(value.to_string()),
        "length" => match parse_timestamp(value) {
            Some(length) => metadata.length = Some(length),
            None => return false,
        },
        "offset" => match value.trim_start_matches('+').parse::<i64>() {
            Ok(offset) => metadata.offset_ms = offset,
            Err(_) => return false,
        },
        _ => {} // Ignore unknown tags
    }
    true
}

/// Parse an ID tag like [ti:Title] or [ar:Artist]
fn parse_id_tag(line: &str) -> Option<(String, String)> {
    if !line.starts_with('[') || !line.ends_with(']') {
        return None;
    }

    let content = &line[1..line.len() - 1];
    let first_colon = content.find(':')?;
    let tag = &content[..first_colon];

    // A numeric tag is a broken timestamp, not an ID tag
    if tag.is_empty() || !tag.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }

    let value = content[first_colon + 1..].trim().to_string();
    Some((tag.to_string(), value))
}

/// Parse a lyric line like [00:12.34]Hello world or [00:12.34][00:15.67]Same lyrics
fn parse_lyric_line(line: &str) -> Option<Vec<LyricLine>> {
    let mut remaining = line;
    let mut timestamps = Vec::new();

    // Extract all timestamps at the beginning
    while remaining.starts_with('[') {
        let Some(end) = remaining.find(']') else {
            break;
        };
        match parse_timestamp(&remaining[1..end]) {
            Some(time) => {
                timestamps.push(time);
                remaining = &remaining[end + 1..];
            }
            None => break,
        }
    }

    if timestamps.is_empty() {
        return None;
    }

    let text = remaining.trim();

    // One line per tag; all share the trailing text
    Some(
        timestamps
            .into_iter()
            .map(|timestamp| LyricLine::new(timestamp, text))
            .collect(),
    )
}

/// Parse a timestamp like "00:12.34", "00:12.345", "00:12" or "00:12:34"
fn parse_timestamp(s: &str) -> Option<Duration> {
    let s = s.trim();
    let (minutes, rest) = s.split_once(':')?;
    let (seconds, fraction) = match rest.split_once(['.', ':']) {
        Some((seconds, fraction)) => (seconds, Some(fraction)),
        None => (rest, None),
    };

    let minutes = parse_digits(minutes)?;
    let seconds = parse_digits(seconds)?;
    if seconds >= 60 {
        return None;
    }

    let millis = match fraction {
        None => 0,
        Some(fraction) => fraction_to_millis(fraction)?,
    };

    // Out-of-range minute counts make the line unparsable
    let total = minutes
        .checked_mul(60_000)?
        .checked_add(seconds * 1000 + millis)?;
    Some(Duration::from_millis(total))
}

/// Convert the fractional part of a timestamp to milliseconds.
///
/// One digit is tenths, two hundredths, three milliseconds; further digits
/// are truncated.
fn fraction_to_millis(fraction: &str) -> Option<u64> {
    if fraction.is_empty() || !fraction.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let digits = &fraction[..fraction.len().min(3)];
    let value: u64 = digits.parse().ok()?;
    Some(match digits.len() {
        1 => value * 100,
        2 => value * 10,
        _ => value,
    })
}

fn parse_digits(s: &str) -> Option<u64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// Apply a millisecond offset to a duration (can be negative)
fn apply_offset(duration: Duration, offset_ms: i64) -> Duration {
    let magnitude = Duration::from_millis(offset_ms.unsigned_abs());
    if offset_ms >= 0 {
        duration + magnitude
    } else {
        duration.saturating_sub(magnitude)
    }
}

/// Format a duration as a timestamp tag body (mm:ss.xx)
fn format_timestamp(duration: Duration) -> String {
    let total_ms = duration.as_millis_u64();
    let minutes = total_ms / 60_000;
    let seconds = (total_ms / 1000) % 60;
    let hundredths = (total_ms % 1000) / 10;

    format!("{minutes:02}:{seconds:02}.{hundredths:02}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    #[test]
    fn test_parse_simple_line() {
        let doc = LyricDocument::parse("[00:12.34]Hello world");
        assert_eq!(doc.lines.len(), 1);
        assert_eq!(doc.lines[0].timestamp, ms(12_340));
        assert_eq!(doc.lines[0].text, "Hello world");
    }

    #[test]
    fn test_parse_millisecond_precision() {
        let doc = LyricDocument::parse("[01:02.345]Precise");
        assert_eq!(doc.lines[0].timestamp, ms(62_345));
    }

    #[test]
    fn test_parse_alternative_formats() {
        let doc = LyricDocument::parse("[00:12:34]Colon\n[00:20]Whole seconds\n[00:30.5]Tenths");
        assert_eq!(doc.lines[0].timestamp, ms(12_340));
        assert_eq!(doc.lines[1].timestamp, ms(20_000));
        assert_eq!(doc.lines[2].timestamp, ms(30_500));
    }

    #[test]
    fn test_parse_id_tags() {
        let input = r"
[ti:Song Title]
[ar:Artist Name]
[al:Album Name]
[by:Lyric Author]
[length:03:25.00]
[00:05.00]Lyrics here
";
        let doc = LyricDocument::parse(input);
        assert_eq!(doc.metadata.title.as_deref(), Some("Song Title"));
        assert_eq!(doc.metadata.artist.as_deref(), Some("Artist Name"));
        assert_eq!(doc.metadata.album.as_deref(), Some("Album Name"));
        assert_eq!(doc.metadata.author.as_deref(), Some("Lyric Author"));
        assert_eq!(doc.metadata.length, Some(Duration::from_secs(205)));
        assert_eq!(doc.lines.len(), 1);
    }

    #[test]
    fn test_parse_offset() {
        let doc = LyricDocument::parse("[offset:500]\n[00:10.00]Test");
        assert_eq!(doc.metadata.offset_ms, 500);
        assert_eq!(doc.lines[0].timestamp, ms(10_500));
    }

    #[test]
    fn test_parse_negative_offset() {
        let doc = LyricDocument::parse("[offset:-500]\n[00:10.00]Test");
        assert_eq!(doc.lines[0].timestamp, ms(9_500));
    }

    #[test]
    fn test_negative_offset_clamps_at_zero() {
        let doc = LyricDocument::parse("[offset:-2000]\n[00:01.00]Early");
        assert_eq!(doc.lines[0].timestamp, Duration::ZERO);
    }

    #[test]
    fn test_offset_after_lines_still_applies() {
        let doc = LyricDocument::parse("[00:10.00]Test\n[offset:250]");
        assert_eq!(doc.lines[0].timestamp, ms(10_250));
    }

    #[test]
    fn test_parse_cjk_lyrics() {
        let doc = LyricDocument::parse("[00:05.00]你好世界");
        assert_eq!(doc.lines[0].text, "你好世界");
    }

    #[test]
    fn test_multi_timestamp_line_fans_out() {
        let doc = LyricDocument::parse("[00:05.00][00:15.00]Repeated lyric\n[00:10.00]Middle");
        assert_eq!(doc.lines.len(), 3);
        assert_eq!(doc.lines[0], LyricLine::new(ms(5_000), "Repeated lyric"));
        assert_eq!(doc.lines[1], LyricLine::new(ms(10_000), "Middle"));
        assert_eq!(doc.lines[2], LyricLine::new(ms(15_000), "Repeated lyric"));
    }

    #[test]
    fn test_sort_is_stable_for_equal_timestamps() {
        let doc = LyricDocument::parse("[00:20.00]Later\n[00:10.00]First\n[00:10.00]Second");
        let texts: Vec<_> = doc.lines.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, ["First", "Second", "Later"]);
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let input = "[00:05.00]Good\nno tag here\n[aa:bb.cc]Broken\n[00:99.00]Bad seconds\n[offset:abc]\n[00:10.00]Also good";
        let (doc, report) = LyricDocument::parse_with_report(input);
        assert_eq!(doc.lines.len(), 2);
        assert_eq!(doc.metadata.offset_ms, 0);
        assert_eq!(report.timed_lines, 2);
        assert_eq!(report.skipped, 4);
    }

    #[test]
    fn test_oversized_minutes_are_skipped() {
        let input = "[999999999999999:00.00]Too far\n[00:01.00]Fine";
        let (doc, report) = LyricDocument::parse_with_report(input);
        assert_eq!(doc.lines.len(), 1);
        assert_eq!(doc.lines[0].text, "Fine");
        assert_eq!(report.timed_lines, 1);
        assert_eq!(report.skipped, 1);
    }

    #[test]
    fn test_empty_lines_ignored() {
        let input = "\n[00:05.00]First\n\n   \n[00:10.00]Second\n";
        let (doc, report) = LyricDocument::parse_with_report(input);
        assert_eq!(doc.lines.len(), 2);
        assert_eq!(report.skipped, 0);
    }

    #[test]
    fn test_empty_text_line_is_valid() {
        let doc = LyricDocument::parse("[00:05.00]");
        assert_eq!(doc.lines.len(), 1);
        assert_eq!(doc.lines[0].text, "");
    }

    #[test]
    fn test_document_without_lines_is_valid() {
        let doc = LyricDocument::parse("[ti:Instrumental]");
        assert!(doc.is_empty());
        assert_eq!(doc.metadata.title.as_deref(), Some("Instrumental"));
        assert!(LyricDocument::parse_strict("[ti:Instrumental]").is_ok());
        assert!(LyricDocument::parse_strict("").is_ok());
    }

    #[test]
    fn test_parse_strict_rejects_plain_text() {
        let err = LyricDocument::parse_strict("just some words\nwithout timing").unwrap_err();
        assert_eq!(err, ParseError::NoTimedContent);
    }

    #[test]
    fn test_current_line() {
        let doc = LyricDocument::parse("[00:05.00]First\n[00:10.00]Second\n[00:15.00]Third");

        assert!(doc.current_line(Duration::from_secs(0)).is_none());
        assert_eq!(doc.current_line(Duration::from_secs(7)).unwrap().text, "First");
        assert_eq!(doc.current_line(Duration::from_secs(10)).unwrap().text, "Second");
        assert_eq!(doc.current_line(Duration::from_secs(20)).unwrap().text, "Third");
    }

    #[test]
    fn test_current_line_index_on_empty_document() {
        assert_eq!(LyricDocument::default().current_line_index(ms(500)), None);
    }

    #[test]
    fn test_visible_lines() {
        let doc = LyricDocument::parse(
            "[00:05.00]Line 1\n[00:10.00]Line 2\n[00:15.00]Line 3\n[00:20.00]Line 4\n[00:25.00]Line 5",
        );

        let visible = doc.visible_lines(Duration::from_secs(12), 1, 1);
        let texts: Vec<_> = visible.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, ["Line 1", "Line 2", "Line 3"]);
        assert!(LyricDocument::default().visible_lines(ms(0), 2, 2).is_empty());
    }

    #[test]
    fn test_line_progress() {
        let doc = LyricDocument::parse("[00:10.00]Hello\n[00:15.00]World");

        assert!(doc.line_progress(0, Duration::from_secs(8)).abs() < f32::EPSILON);
        assert!((doc.line_progress(0, ms(12_500)) - 0.5).abs() < 0.01);
        assert!((doc.line_progress(0, Duration::from_secs(15)) - 1.0).abs() < f32::EPSILON);
        assert!((doc.line_progress(1, ms(17_500)) - 0.5).abs() < 0.01);
        assert!(doc.line_progress(9, ms(0)).abs() < f32::EPSILON);
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(ms(12_340)), "00:12.34");
        assert_eq!(format_timestamp(Duration::from_secs(90)), "01:30.00");
        assert_eq!(format_timestamp(ms(5 * 60_000 + 45_000 + 679)), "05:45.67");
        assert_eq!(format_timestamp(Duration::ZERO), "00:00.00");
    }

    #[test]
    fn test_serialize_layout() {
        let doc = LyricDocument {
            metadata: LyricMetadata {
                title: Some("Test Song".to_string()),
                artist: Some("Test Artist".to_string()),
                ..Default::default()
            },
            lines: vec![
                LyricLine::new(ms(5_000), "Hello world"),
                LyricLine::new(ms(10_000), "Second line"),
            ],
        };

        assert_eq!(
            doc.serialize(),
            "[ti:Test Song]\n[ar:Test Artist]\n\n[00:05.00]Hello world\n[00:10.00]Second line\n"
        );
    }

    #[test]
    fn test_serialize_omits_zero_offset() {
        let doc = LyricDocument::parse("[ti:X]\n[offset:0]\n[00:01.00]a");
        assert!(!doc.serialize().contains("offset"));
    }

    #[test]
    fn test_round_trip_with_offset() {
        let input = "[ar:Someone]\n[offset:-1234]\n[00:05.00][00:42.10]Chorus\n[00:20.78]Verse ✓\n[01:02.345]Bridge";
        let doc = LyricDocument::parse(input);
        let reparsed = LyricDocument::parse(&doc.serialize());

        assert_eq!(reparsed.metadata, doc.metadata);
        assert_eq!(reparsed.lines.len(), doc.lines.len());
        for (a, b) in doc.lines.iter().zip(&reparsed.lines) {
            assert_eq!(a.text, b.text);
            let delta = if a.timestamp > b.timestamp {
                a.timestamp - b.timestamp
            } else {
                b.timestamp - a.timestamp
            };
            assert!(delta < ms(10), "{:?} vs {:?}", a.timestamp, b.timestamp);
        }
    }
}
