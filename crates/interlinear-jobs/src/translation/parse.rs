//! Tolerant parsing of model responses.
//!
//! Parsing is two-stage. The block format from [`super::prompts`] is tried
//! first; when no block can be found, an embedded JSON document is located
//! by pattern and decoded instead.

use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;

use interlinear_core::{AlignedSegment, Annotation, Error, Result};

use super::prompts::{SEGMENT_SEPARATOR, UNIT_CLOSE};

/// One unit's worth of parsed output. Fields the model omitted are `None`
/// or empty; acceptance is decided by the caller.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedUnit {
    pub index: Option<i32>,
    pub fluent: Option<String>,
    pub literal: Option<String>,
    pub segments: Vec<AlignedSegment>,
    pub annotations: Vec<Annotation>,
}

fn unit_header() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\[\[\s*UNIT\s+(-?\d+)\s*\]\]").expect("unit header pattern is valid")
    })
}

fn fenced_json() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)```").expect("fence pattern is valid")
    })
}

#[derive(Clone, Copy, PartialEq)]
enum Section {
    None,
    Fluent,
    Literal,
    Segments,
    Notes,
}

/// Split `line` into a known section label and the rest of the line.
fn section_label(line: &str) -> Option<(Section, &str)> {
    let trimmed = line.trim_start_matches(|c: char| c == '*' || c == '#' || c.is_whitespace());
    let (label, rest) = trimmed.split_once(':')?;
    let label = label.trim_end_matches(['*', ' ']);
    let section = match label.to_ascii_uppercase().as_str() {
        "FLUENT" => Section::Fluent,
        "LITERAL" => Section::Literal,
        "SEGMENTS" => Section::Segments,
        "NOTES" | "ANNOTATIONS" => Section::Notes,
        _ => return None,
    };
    Some((section, rest.trim_start_matches('*').trim()))
}

fn append(target: &mut Option<String>, text: &str) {
    if text.is_empty() {
        return;
    }
    match target {
        Some(existing) if !existing.is_empty() => {
            existing.push('\n');
            existing.push_str(text);
        }
        _ => *target = Some(text.to_string()),
    }
}

fn is_placeholder(text: &str) -> bool {
    matches!(
        text.trim().to_ascii_lowercase().as_str(),
        "" | "-" | "none" | "n/a" | "..."
    )
}

fn parse_segment(line: &str) -> Option<AlignedSegment> {
    let (source, literal) = line.split_once(SEGMENT_SEPARATOR)?;
    let source = source.trim().trim_start_matches("- ").trim();
    if source.is_empty() {
        return None;
    }
    Some(AlignedSegment {
        source: source.to_string(),
        literal: literal.trim().to_string(),
    })
}

fn parse_note(line: &str) -> Option<Annotation> {
    let line = line.trim().trim_start_matches(['-', '*', '•']).trim();
    if is_placeholder(line) {
        return None;
    }
    let (term, note) = line.split_once(':')?;
    let (term, note) = (term.trim(), note.trim());
    if term.is_empty() || note.is_empty() {
        return None;
    }
    Some(Annotation {
        term: term.to_string(),
        note: note.to_string(),
    })
}

/// Parse the labelled sections of a single unit body.
pub fn parse_unit_body(body: &str) -> ParsedUnit {
    let mut unit = ParsedUnit::default();
    let mut section = Section::None;

    for raw in body.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with("```") {
            continue;
        }
        if let Some((next, rest)) = section_label(line) {
            section = next;
            match section {
                Section::Fluent if !is_placeholder(rest) => append(&mut unit.fluent, rest),
                Section::Literal if !is_placeholder(rest) => append(&mut unit.literal, rest),
                Section::Segments => unit.segments.extend(parse_segment(rest)),
                Section::Notes => unit.annotations.extend(parse_note(rest)),
                _ => {}
            }
            continue;
        }
        match section {
            Section::Fluent => append(&mut unit.fluent, line),
            Section::Literal => append(&mut unit.literal, line),
            Section::Segments => unit.segments.extend(parse_segment(line)),
            Section::Notes => unit.annotations.extend(parse_note(line)),
            Section::None => {}
        }
    }
    unit
}

/// Parse every `[[UNIT n]]` block in `text`.
///
/// A block runs to its `[[END]]` marker, or to the next header when the
/// marker is missing. Text outside blocks is ignored.
pub fn parse_blocks(text: &str) -> Vec<ParsedUnit> {
    let headers: Vec<(usize, usize, Option<i32>)> = unit_header()
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let index = caps.get(1).and_then(|m| m.as_str().parse().ok());
            Some((whole.start(), whole.end(), index))
        })
        .collect();

    headers
        .iter()
        .enumerate()
        .map(|(i, &(_, body_start, index))| {
            let body_end = headers.get(i + 1).map_or(text.len(), |next| next.0);
            let body = &text[body_start..body_end];
            let body = body.split(UNIT_CLOSE).next().unwrap_or(body);
            ParsedUnit {
                index,
                ..parse_unit_body(body)
            }
        })
        .collect()
}

#[derive(Deserialize)]
struct JsonUnit {
    #[serde(alias = "unit", alias = "id", default)]
    index: Option<i32>,
    #[serde(default)]
    fluent: Option<String>,
    #[serde(default)]
    literal: Option<String>,
    #[serde(default)]
    segments: Vec<AlignedSegment>,
    #[serde(alias = "notes", default)]
    annotations: Vec<Annotation>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum JsonPayload {
    Wrapped { units: Vec<JsonUnit> },
    List(Vec<JsonUnit>),
    Single(JsonUnit),
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !is_placeholder(v))
}

/// Candidate JSON documents embedded in `text`, most specific first.
fn json_candidates(text: &str) -> Vec<&str> {
    let mut candidates: Vec<&str> = fenced_json()
        .captures_iter(text)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().trim()))
        .collect();

    for (open, close) in [('{', '}'), ('[', ']')] {
        if let (Some(start), Some(end)) = (text.find(open), text.rfind(close)) {
            if start < end {
                candidates.push(&text[start..=end]);
            }
        }
    }
    candidates
}

/// Locate and decode an embedded JSON payload.
pub fn parse_json_block(text: &str) -> Result<Vec<ParsedUnit>> {
    for candidate in json_candidates(text) {
        let Ok(payload) = serde_json::from_str::<JsonPayload>(candidate) else {
            continue;
        };
        let units = match payload {
            JsonPayload::Wrapped { units } | JsonPayload::List(units) => units,
            JsonPayload::Single(unit) => vec![unit],
        };
        let parsed: Vec<ParsedUnit> = units
            .into_iter()
            .map(|u| ParsedUnit {
                index: u.index,
                fluent: non_blank(u.fluent),
                literal: non_blank(u.literal),
                segments: u
                    .segments
                    .into_iter()
                    .filter(|s| !s.source.trim().is_empty())
                    .collect(),
                annotations: u.annotations,
            })
            .filter(|u| u.fluent.is_some() || u.literal.is_some())
            .collect();
        if !parsed.is_empty() {
            return Ok(parsed);
        }
    }
    Err(Error::Parse("no unit blocks or JSON payload in response".to_string()))
}

/// Parse a multi-unit response: block format first, JSON second.
pub fn parse_batch_response(text: &str) -> Result<Vec<ParsedUnit>> {
    let blocks: Vec<ParsedUnit> = parse_blocks(text)
        .into_iter()
        .filter(|u| u.fluent.is_some() || u.literal.is_some())
        .collect();
    if !blocks.is_empty() {
        return Ok(blocks);
    }
    parse_json_block(text)
}

/// Parse a literal-only response for one unit.
///
/// Accepts a block, a bare labelled body, or JSON.
pub fn parse_literal_response(text: &str) -> Result<ParsedUnit> {
    if let Some(unit) = parse_batch_response(text)
        .ok()
        .and_then(|units| units.into_iter().find(|u| u.literal.is_some()))
    {
        return Ok(unit);
    }
    let bare = parse_unit_body(text);
    if bare.literal.is_some() {
        return Ok(bare);
    }
    Err(Error::Parse("response has no literal rendering".to_string()))
}

/// Parse a fluent-only response: the whole reply, minus fences, labels, and
/// surrounding quotes.
pub fn parse_fluent_response(text: &str) -> Result<String> {
    let mut body = text.trim();
    if let Some(caps) = fenced_json().captures(body) {
        if let Some(inner) = caps.get(1) {
            body = inner.as_str().trim();
        }
    }
    if let Some((Section::Fluent, rest)) = section_label(body.lines().next().unwrap_or("")) {
        let tail: Vec<&str> = body.lines().skip(1).collect();
        let joined = if tail.is_empty() {
            rest.to_string()
        } else {
            format!("{rest}\n{}", tail.join("\n"))
        };
        return finish_fluent(&joined);
    }
    finish_fluent(body)
}

fn finish_fluent(text: &str) -> Result<String> {
    let text = text.split(UNIT_CLOSE).next().unwrap_or(text).trim();
    let text = text
        .strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .unwrap_or(text)
        .trim();
    if is_placeholder(text) {
        Err(Error::Parse("empty fluent rendering".to_string()))
    } else {
        Ok(text.to_string())
    }
}
