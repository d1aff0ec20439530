//! PII redaction: names by entity span, emails and phone numbers by pattern.
//!
//! ## Order of passes
//!
//! 1. PERSON spans from the entity recognizer are replaced with
//!    [`NAME_TOKEN`], walking spans from the **highest start offset down**.
//!    Replacing right-to-left means every span still to be processed lies
//!    entirely before the text that has already changed, so its offsets stay
//!    valid. Overlapping spans are merged first; otherwise the second of two
//!    overlapping spans would cut into the token written for the first.
//! 2. One email pass over the whole buffer.
//! 3. Phone passes in a fixed priority order. Each pass runs over the output of
//!    the previous one, so digits consumed by an earlier pattern are already a
//!    token and can never be matched again.
//!
//! Pattern passes are pure text rewriting and cannot fail. Only entity
//! recognition can, and then [`redact`] reports it instead of quietly skipping
//! names; the orchestrator decides what to do via
//! [`crate::config::NameRedactionPolicy`].

use crate::collaborators::{EntityRecognizer, EntitySpan};
use crate::error::RedactionError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub const NAME_TOKEN: &str = "[NAME_REMOVED]";
pub const EMAIL_TOKEN: &str = "[EMAIL_REMOVED]";
pub const PHONE_TOKEN: &str = "[PHONE_REMOVED]";

static RE_EMAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}").unwrap());

/// Phone patterns, highest priority first.
static RE_PHONES: Lazy<[Regex; 3]> = Lazy::new(|| {
    [
        // (555) 123-4567, +1 (555) 123-4567
        Regex::new(r"(?:\+\d{1,3}[-.\s]?)?\(\d{3}\)\s?\d{3}[-.\s]?\d{4}\b").unwrap(),
        // 555-123-4567, 555.123.4567, 555 123 4567, 5551234567, +1-555-123-4567
        Regex::new(r"(?:\+\d{1,3}[-.\s]?)?\b\d{3}[-.\s]?\d{3}[-.\s]?\d{4}\b").unwrap(),
        // +44 20 7946 0958, +1-555-123-4567
        Regex::new(r"\+\d{1,3}(?:[-.\s]?\(?\d{1,4}\)?){2,5}\b").unwrap(),
    ]
});

/// Redacted text plus what happened to it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SanitizedText {
    pub text: String,
    /// False when name redaction was skipped under the pattern-only policy.
    pub names_redacted: bool,
    pub counts: RedactionCounts,
}

/// Number of replacements made by each pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RedactionCounts {
    pub names: usize,
    pub emails: usize,
    pub phones: usize,
}

/// Separator placed between parts handed to the recognizer together.
pub const PART_SEPARATOR: &str = "\n\n";

/// Full redaction: PERSON entities first, then emails and phone numbers.
///
/// Empty input returns empty output without calling the recognizer.
///
/// # Errors
/// [`RedactionError::RecognizerUnavailable`] when the recognizer errors.
pub async fn redact(
    raw_text: &str,
    recognizer: &dyn EntityRecognizer,
) -> Result<SanitizedText, RedactionError> {
    let mut out = redact_parts(&[raw_text], recognizer).await?;
    Ok(out.pop().unwrap_or_default())
}

/// [`redact`] for several texts with a single recognizer call.
///
/// The parts are recognized as one text joined by [`PART_SEPARATOR`], and
/// each span is mapped back to the part it lies in. A span running across a
/// separator is clipped to every part it touches. Results come back in the
/// order of `parts`.
pub async fn redact_parts(
    parts: &[&str],
    recognizer: &dyn EntityRecognizer,
) -> Result<Vec<SanitizedText>, RedactionError> {
    if parts.iter().all(|p| p.is_empty()) {
        return Ok(parts
            .iter()
            .map(|_| SanitizedText {
                names_redacted: true,
                ..Default::default()
            })
            .collect());
    }

    let joined = parts.join(PART_SEPARATOR);
    let spans = recognizer
        .recognize(&joined)
        .await
        .map_err(|e| RedactionError::RecognizerUnavailable(e.to_string()))?;

    let mut out = Vec::with_capacity(parts.len());
    let mut offset = 0;
    for part in parts {
        let range = offset..offset + part.len();
        offset = range.end + PART_SEPARATOR.len();
        let local: Vec<EntitySpan> = spans
            .iter()
            .filter_map(|s| {
                let start = s.start.max(range.start);
                let end = s.end.min(range.end);
                (start < end).then(|| {
                    EntitySpan::new(start - range.start, end - range.start, s.label.clone())
                })
            })
            .collect();

        let (text, names) = redact_entities_counted(part, &local);
        let (text, emails, phones) = redact_patterns_counted(&text);
        debug!(
            "Redacted {} names, {} emails, {} phones",
            names, emails, phones
        );
        out.push(SanitizedText {
            text,
            names_redacted: true,
            counts: RedactionCounts {
                names,
                emails,
                phones,
            },
        });
    }
    Ok(out)
}

/// Pattern-only redaction, used when entity recognition is unavailable and
/// the policy allows continuing without it.
pub fn redact_without_names(raw_text: &str) -> SanitizedText {
    let (text, emails, phones) = redact_patterns_counted(raw_text);
    SanitizedText {
        text,
        names_redacted: false,
        counts: RedactionCounts {
            names: 0,
            emails,
            phones,
        },
    }
}

/// Replace every PERSON span with [`NAME_TOKEN`].
pub fn redact_entities(text: &str, spans: &[EntitySpan]) -> String {
    redact_entities_counted(text, spans).0
}

/// Replace emails, then phone numbers.
pub fn redact_patterns(text: &str) -> String {
    redact_patterns_counted(text).0
}

fn redact_entities_counted(text: &str, spans: &[EntitySpan]) -> (String, usize) {
    let ranges = person_ranges(text, spans);
    let mut out = text.to_string();
    for &(start, end) in ranges.iter().rev() {
        out.replace_range(start..end, NAME_TOKEN);
    }
    (out, ranges.len())
}

/// Valid PERSON ranges, sorted ascending, overlapping ones merged.
fn person_ranges(text: &str, spans: &[EntitySpan]) -> Vec<(usize, usize)> {
    let mut ranges: Vec<(usize, usize)> = spans
        .iter()
        .filter(|s| s.is_person())
        .filter(|s| {
            let valid = s.start < s.end
                && s.end <= text.len()
                && text.is_char_boundary(s.start)
                && text.is_char_boundary(s.end);
            if !valid {
                warn!(
                    "Dropping invalid entity span {}..{} (text is {} bytes)",
                    s.start,
                    s.end,
                    text.len()
                );
            }
            valid
        })
        .map(|s| (s.start, s.end))
        .collect();
    ranges.sort_unstable();

    let mut merged: Vec<(usize, usize)> = Vec::with_capacity(ranges.len());
    for (start, end) in ranges {
        match merged.last_mut() {
            // Strict overlap only; touching spans stay separate names.
            Some(last) if start < last.1 => last.1 = last.1.max(end),
            _ => merged.push((start, end)),
        }
    }
    merged
}

fn redact_patterns_counted(text: &str) -> (String, usize, usize) {
    let emails = RE_EMAIL.find_iter(text).count();
    let mut out = RE_EMAIL.replace_all(text, EMAIL_TOKEN).into_owned();

    let mut phones = 0;
    for re in RE_PHONES.iter() {
        let n = re.find_iter(&out).count();
        if n > 0 {
            phones += n;
            out = re.replace_all(&out, PHONE_TOKEN).into_owned();
        }
    }
    (out, emails, phones)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CollaboratorError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedSpans(Vec<EntitySpan>, AtomicUsize);

    #[async_trait]
    impl EntityRecognizer for FixedSpans {
        async fn recognize(&self, _text: &str) -> Result<Vec<EntitySpan>, CollaboratorError> {
            self.1.fetch_add(1, Ordering::SeqCst);
            Ok(self.0.clone())
        }
    }

    struct Broken;

    #[async_trait]
    impl EntityRecognizer for Broken {
        async fn recognize(&self, _text: &str) -> Result<Vec<EntitySpan>, CollaboratorError> {
            Err(CollaboratorError::Unavailable("model not loaded".into()))
        }
    }

    fn spans(v: Vec<EntitySpan>) -> FixedSpans {
        FixedSpans(v, AtomicUsize::new(0))
    }

    #[tokio::test]
    async fn contact_line_end_to_end() {
        let text = "Contact John Smith at john@example.com or 555-123-4567";
        let start = text.find("John Smith").unwrap();
        let ner = spans(vec![EntitySpan::person(start, start + "John Smith".len())]);
        let out = redact(text, &ner).await.unwrap();
        assert_eq!(
            out.text,
            "Contact [NAME_REMOVED] at [EMAIL_REMOVED] or [PHONE_REMOVED]"
        );
        assert_eq!(
            out.counts,
            RedactionCounts {
                names: 1,
                emails: 1,
                phones: 1
            }
        );
        assert!(out.names_redacted);
    }

    #[tokio::test]
    async fn empty_input_skips_recognizer() {
        let ner = spans(vec![]);
        let out = redact("", &ner).await.unwrap();
        assert_eq!(out.text, "");
        assert_eq!(ner.1.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn recognizer_failure_is_surfaced() {
        let err = redact("Call Alice", &Broken).await.unwrap_err();
        assert!(matches!(err, RedactionError::RecognizerUnavailable(_)));
    }

    #[test]
    fn text_without_pii_is_unchanged() {
        let samples = [
            "Quarterly revenue grew 12% in 2023 across 4 regions.",
            "Slide 3 of 10: roadmap for Q4",
            "Order #12345 shipped on 2024-01-15",
            "",
        ];
        for s in samples {
            assert_eq!(redact_patterns(s), s);
            assert_eq!(redact_entities(s, &[]), s);
        }
    }

    #[test]
    fn every_email_is_replaced() {
        let text = "a.b@example.com, ops+alerts@corp.example.org and x_y@mail.co.uk";
        let out = redact_patterns(text);
        assert_eq!(out.matches(EMAIL_TOKEN).count(), 3);
        assert!(!out.contains('@'));
        assert!(!out.contains("example"));
    }

    #[test]
    fn phone_variants() {
        assert_eq!(redact_patterns("(555) 123-4567"), PHONE_TOKEN);
        assert_eq!(redact_patterns("555.123.4567"), PHONE_TOKEN);
        assert_eq!(redact_patterns("555 123 4567"), PHONE_TOKEN);
        assert_eq!(redact_patterns("5551234567"), PHONE_TOKEN);
        assert_eq!(redact_patterns("call +44 20 7946 0958 now"), "call [PHONE_REMOVED] now");
    }

    #[test]
    fn country_code_is_removed_with_the_number() {
        assert_eq!(redact_patterns("+1 (555) 123-4567"), PHONE_TOKEN);
        assert_eq!(redact_patterns("+1-555-123-4567"), PHONE_TOKEN);
        assert_eq!(
            redact_patterns("call +1 555 123 4567 today"),
            "call [PHONE_REMOVED] today"
        );
        assert_eq!(redact_patterns("tel:+1(555)123-4567"), "tel:[PHONE_REMOVED]");
    }

    #[tokio::test]
    async fn parts_share_one_recognizer_call() {
        let description = "Slide text: \"Call John Smith\"";
        let raw = "John Smith, jane@x.io";
        // Offsets into `raw + "\n\n" + description`.
        let in_description = raw.len() + 2 + description.find("John").unwrap();
        let ner = spans(vec![
            EntitySpan::person(0, 10),
            EntitySpan::person(in_description, in_description + 10),
        ]);

        let out = redact_parts(&[raw, description], &ner).await.unwrap();
        assert_eq!(ner.1.load(Ordering::SeqCst), 1);
        assert_eq!(out[0].text, "[NAME_REMOVED], [EMAIL_REMOVED]");
        assert_eq!(out[1].text, "Slide text: \"Call [NAME_REMOVED]\"");
        assert_eq!(out[1].counts.names, 1);
    }

    #[tokio::test]
    async fn span_across_parts_is_clipped_to_each() {
        // "Ann" + "\n\n" + "Lee": one span over both parts.
        let ner = spans(vec![EntitySpan::person(0, 8)]);
        let out = redact_parts(&["Ann", "Lee"], &ner).await.unwrap();
        assert_eq!(out[0].text, NAME_TOKEN);
        assert_eq!(out[1].text, NAME_TOKEN);
    }

    #[tokio::test]
    async fn empty_parts_skip_recognizer() {
        let ner = spans(vec![]);
        let out = redact_parts(&["", ""], &ner).await.unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(ner.1.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn phone_matched_once_by_highest_priority_pattern() {
        let (out, _, phones) = redact_patterns_counted("tel: (555) 123-4567");
        assert_eq!(out, "tel: [PHONE_REMOVED]");
        assert_eq!(phones, 1);
    }

    #[test]
    fn adjacent_spans_are_both_replaced() {
        let text = "AliceBob met";
        let out = redact_entities(text, &[EntitySpan::person(0, 5), EntitySpan::person(5, 8)]);
        assert_eq!(out, "[NAME_REMOVED][NAME_REMOVED] met");
    }

    #[test]
    fn overlapping_spans_are_merged() {
        let text = "Mary Jane Watson said hi";
        let out = redact_entities(
            text,
            &[EntitySpan::person(5, 16), EntitySpan::person(0, 9)],
        );
        assert_eq!(out, "[NAME_REMOVED] said hi");
    }

    #[test]
    fn unsorted_spans_keep_offsets_valid() {
        let text = "Bob and Carol and Ted";
        let out = redact_entities(
            text,
            &[
                EntitySpan::person(18, 21),
                EntitySpan::person(0, 3),
                EntitySpan::person(8, 13),
            ],
        );
        assert_eq!(out, "[NAME_REMOVED] and [NAME_REMOVED] and [NAME_REMOVED]");
    }

    #[test]
    fn non_person_and_invalid_spans_are_ignored() {
        let text = "Zoë works at Acme";
        let out = redact_entities(
            text,
            &[
                EntitySpan::new(13, 17, "ORG"),
                // splits the two-byte 'ë'
                EntitySpan::person(0, 3),
                EntitySpan::person(10, 99),
            ],
        );
        assert_eq!(out, text);
    }

    #[test]
    fn multibyte_names_are_replaced() {
        let text = "Hi Zoë!";
        let out = redact_entities(text, &[EntitySpan::person(3, 3 + "Zoë".len())]);
        assert_eq!(out, "Hi [NAME_REMOVED]!");
    }

    #[test]
    fn pattern_only_marks_names_unredacted() {
        let out = redact_without_names("Jane at jane@x.io");
        assert_eq!(out.text, "Jane at [EMAIL_REMOVED]");
        assert!(!out.names_redacted);
    }
}
