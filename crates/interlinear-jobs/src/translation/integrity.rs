//! Segment integrity checks.
//!
//! Aligned segments are only trusted when their source spans, joined
//! together, reproduce the unit's source text. Whitespace is ignored on both
//! sides since models routinely reflow spacing between spans.

use interlinear_core::{AlignedSegment, Error, Result};

/// Remove all whitespace.
pub fn normalize(text: &str) -> String {
    text.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Verify that `segments` reconstruct `source`.
pub fn check_segments(source: &str, segments: &[AlignedSegment]) -> Result<()> {
    let joined: String = segments.iter().map(|s| s.source.as_str()).collect();
    let expected = normalize(source);
    let actual = normalize(&joined);
    if expected == actual {
        Ok(())
    } else {
        Err(Error::Integrity(format!(
            "segments reconstruct {} of {} source characters",
            common_prefix_len(&expected, &actual),
            expected.chars().count()
        )))
    }
}

/// Keep `segments` only when they pass [`check_segments`]. An empty list is
/// treated the same as no segments.
pub fn verified_segments(
    source: &str,
    segments: Vec<AlignedSegment>,
) -> (Option<Vec<AlignedSegment>>, Option<Error>) {
    if segments.is_empty() {
        return (None, None);
    }
    match check_segments(source, &segments) {
        Ok(()) => (Some(segments), None),
        Err(e) => (None, Some(e)),
    }
}

fn common_prefix_len(a: &str, b: &str) -> usize {
    a.chars().zip(b.chars()).take_while(|(x, y)| x == y).count()
}
