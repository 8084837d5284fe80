//! Prompt construction for translation requests.
//!
//! Batch and literal requests ask for a line-oriented block format:
//!
//! ```text
//! [[UNIT 12]]
//! FLUENT: natural translation
//! LITERAL: word-for-word rendering
//! SEGMENTS:
//! source span ||| literal span
//! NOTES:
//! term: note
//! [[END]]
//! ```
//!
//! Models keep to this more reliably than to strict JSON, and it survives
//! stray commentary around the blocks.

use std::fmt::Write;

use interlinear_core::{TextUnit, TranslationParams};

/// Marker opening a unit block.
pub const UNIT_OPEN: &str = "[[UNIT";
/// Marker closing a unit block.
pub const UNIT_CLOSE: &str = "[[END]]";
/// Separator between source and literal text on a segment line.
pub const SEGMENT_SEPARATOR: &str = "|||";

/// A unit together with the translation of the unit just before it, when
/// one is already available.
#[derive(Debug, Clone)]
pub struct PromptUnit<'a> {
    pub unit: &'a TextUnit,
    pub previous: Option<&'a str>,
}

fn languages(params: &TranslationParams) -> String {
    match &params.variant {
        Some(variant) => format!(
            "from `{}` into `{}` ({} style)",
            params.source_lang, params.target_lang, variant
        ),
        None => format!("from `{}` into `{}`", params.source_lang, params.target_lang),
    }
}

const LITERAL_RULES: &str = "\
LITERAL is a word-for-word rendering that follows the source word order, even when awkward.
SEGMENTS splits the source text into consecutive spans, one per line, written as
`source span ||| literal rendering of that span`. The source spans, joined in order,
must reproduce the unit's source text exactly: copy them verbatim, skip nothing, add nothing.
NOTES lists idioms, names, or ambiguous terms as `term: note`, one per line. Leave it empty if there is nothing to note.";

/// System instructions for a combined multi-unit request.
pub fn batch_system(params: &TranslationParams) -> String {
    format!(
        "You are a careful translator working {langs}.
For every unit you receive, produce both a fluent and a literal translation.
FLUENT is a natural, idiomatic translation of the whole unit.
{LITERAL_RULES}

Answer with exactly one block per unit, using the unit's number, and nothing else:
{UNIT_OPEN} <number>]]
FLUENT: ...
LITERAL: ...
SEGMENTS:
... {SEGMENT_SEPARATOR} ...
NOTES:
...
{UNIT_CLOSE}",
        langs = languages(params),
    )
}

/// System instructions for a fluent-only request.
pub fn fluent_system(params: &TranslationParams) -> String {
    format!(
        "You are a careful translator working {}.
Translate the unit naturally and idiomatically. Reply with the translation only, \
without labels, quotes, or commentary.",
        languages(params)
    )
}

/// System instructions for a literal-only request.
pub fn literal_system(params: &TranslationParams) -> String {
    format!(
        "You are a careful translator working {langs}.
Produce only the literal rendering of the unit.
{LITERAL_RULES}

Answer with exactly this block and nothing else:
{UNIT_OPEN} <number>]]
LITERAL: ...
SEGMENTS:
... {SEGMENT_SEPARATOR} ...
NOTES:
...
{UNIT_CLOSE}",
        langs = languages(params),
    )
}

fn write_document_context(out: &mut String, params: &TranslationParams) {
    if let Some(context) = params
        .document_context
        .as_deref()
        .filter(|c| !c.trim().is_empty())
    {
        let _ = writeln!(out, "Document context: {}\n", context.trim());
    }
}

fn write_unit(out: &mut String, item: &PromptUnit<'_>) {
    if let Some(previous) = item.previous.filter(|p| !p.trim().is_empty()) {
        let _ = writeln!(
            out,
            "(Context only, translation of the preceding unit: {})",
            previous.trim()
        );
    }
    let _ = writeln!(out, "{UNIT_OPEN} {}]]", item.unit.index);
    let _ = writeln!(out, "{}", item.unit.source_text.trim());
    let _ = writeln!(out, "{UNIT_CLOSE}\n");
}

/// User content for a combined request over one or more units.
pub fn batch_content(params: &TranslationParams, units: &[PromptUnit<'_>]) -> String {
    let mut out = String::new();
    write_document_context(&mut out, params);
    let _ = writeln!(out, "Translate the following {} unit(s).\n", units.len());
    for item in units {
        write_unit(&mut out, item);
    }
    out
}

/// User content for a single-unit, single-form request.
pub fn single_content(params: &TranslationParams, item: &PromptUnit<'_>) -> String {
    let mut out = String::new();
    write_document_context(&mut out, params);
    write_unit(&mut out, item);
    out
}
