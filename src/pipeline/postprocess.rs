//! Post-processing: deterministic cleanup of model output and the text
//! helpers the extraction drivers share.
//!
//! Model replies are normalised before anything else looks at them: outer
//! Markdown fences are stripped, line endings unified, invisible Unicode
//! removed. Each rule is a pure `&str → String` function and is tested on its
//! own.

use crate::collaborators::{Analysis, EntitySpan};
use once_cell::sync::Lazy;
use regex::Regex;

// ── Model reply cleanup ──────────────────────────────────────────────────────

/// Strip fences, normalise line endings, drop invisible characters, trim.
pub fn clean_model_text(input: &str) -> String {
    let s = strip_fences(input);
    let s = normalise_line_endings(&s);
    let s = remove_invisible_chars(&s);
    s.trim().to_string()
}

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[a-zA-Z]*\n(.*)\n```\s*$").unwrap());

fn strip_fences(input: &str) -> String {
    match RE_OUTER_FENCES.captures(input.trim()) {
        Some(caps) => caps[1].to_string(),
        None => input.to_string(),
    }
}

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Findings ─────────────────────────────────────────────────────────────────

static RE_BULLET: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:[-*•+]|\d{1,2}[.)])\s*").unwrap());

/// Re-bullet findings: one `- ` item per non-empty line.
pub fn clean_findings(input: &str) -> String {
    clean_model_text(input)
        .lines()
        .map(|line| RE_BULLET.replace(line, "").trim().to_string())
        .filter(|line| !line.is_empty())
        .map(|line| format!("- {line}"))
        .collect::<Vec<_>>()
        .join("\n")
}

static RE_DESCRIPTION_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*\**description\**\s*:\s*\**\s*(.*)$").unwrap());

static RE_FINDINGS_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*[#*]*\s*(?:key\s+)?findings\s*[*:]*\s*$").unwrap());

/// Split a generator reply into a refined description and findings.
///
/// A line starting with `Description:` carries the refined description; a
/// bare `Findings:` header is dropped; every other line is a finding. Without a
/// description line, `fallback_description` is kept.
pub fn split_analysis(reply: &str, fallback_description: &str) -> Analysis {
    let cleaned = clean_model_text(reply);
    let mut description = None;
    let mut rest = Vec::new();
    for line in cleaned.lines() {
        if description.is_none() {
            if let Some(caps) = RE_DESCRIPTION_LINE.captures(line) {
                let d = caps[1].trim().trim_end_matches('*').trim();
                if !d.is_empty() {
                    description = Some(d.to_string());
                    continue;
                }
            }
        }
        if RE_FINDINGS_HEADER.is_match(line) {
            continue;
        }
        rest.push(line);
    }
    Analysis {
        description: description.unwrap_or_else(|| fallback_description.trim().to_string()),
        findings: clean_findings(&rest.join("\n")),
    }
}

// ── Descriptions ─────────────────────────────────────────────────────────────

/// Caption and OCR text combined into one image description.
pub fn combine_description(caption: &str, ocr_text: &str) -> String {
    let caption = capitalise(caption.trim().trim_end_matches('.'));
    let ocr_text = ocr_text.trim();
    if ocr_text.is_empty() {
        format!("{caption}. No readable text was found in the image.")
    } else {
        format!("{caption}. The image also contains the following text: \"{ocr_text}\".")
    }
}

fn capitalise(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// The first `n` characters of `s` (not bytes).
pub fn truncate_chars(s: &str, n: usize) -> &str {
    match s.char_indices().nth(n) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// `s` cut to `n` characters with `...` appended, or `s` when it fits.
pub fn truncate_with_ellipsis(s: &str, n: usize) -> String {
    let cut = truncate_chars(s, n);
    if cut.len() < s.len() {
        format!("{cut}...")
    } else {
        s.to_string()
    }
}

// ── Entity replies ───────────────────────────────────────────────────────────

/// Parse a JSON array of strings out of a model reply.
///
/// Text around the outermost `[...]` is ignored. `None` when no array parses.
pub fn parse_name_list(reply: &str) -> Option<Vec<String>> {
    let cleaned = clean_model_text(reply);
    let start = cleaned.find('[')?;
    let end = cleaned.rfind(']')?;
    if end < start {
        return None;
    }
    serde_json::from_str::<Vec<String>>(&cleaned[start..=end]).ok()
}

/// Byte spans of every whole-word occurrence of each name in `text`.
pub fn name_spans(text: &str, names: &[String]) -> Vec<EntitySpan> {
    let mut names: Vec<&str> = names
        .iter()
        .map(|n| n.trim())
        .filter(|n| n.chars().count() >= 2)
        .collect();
    names.sort_unstable();
    names.dedup();

    let mut spans = Vec::new();
    for name in names {
        for (start, m) in text.match_indices(name) {
            let end = start + m.len();
            let before = text[..start].chars().next_back();
            let after = text[end..].chars().next();
            let boundary = |c: Option<char>| c.map_or(true, |c| !c.is_alphanumeric());
            if boundary(before) && boundary(after) {
                spans.push(EntitySpan::person(start, end));
            }
        }
    }
    spans.sort_by_key(|s| (s.start, s.end));
    spans
}
