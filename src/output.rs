//! Result types produced by the pipeline.
//!
//! Everything here is plain data with `serde` derives so a whole batch can be
//! dumped as JSON for auditing, or rendered as the four-column table the
//! downstream reviewers read.

use crate::error::FileError;
use crate::pipeline::route::FileKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// A stage of the per-file state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    Routing,
    Extracting,
    Sanitizing,
    Analyzing,
    Assembled,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Routing => "routing",
            Stage::Extracting => "extracting",
            Stage::Sanitizing => "sanitizing",
            Stage::Analyzing => "analyzing",
            Stage::Assembled => "assembled",
        };
        f.write_str(s)
    }
}

/// A field produced by an extraction driver.
///
/// Drivers never leave a field "missing": either they produced text, or they
/// say why they could not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Extracted {
    Text(String),
    Unavailable { reason: String },
}

impl Extracted {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Extracted::Unavailable {
            reason: reason.into(),
        }
    }

    /// The text, or the explanatory reason when unavailable.
    pub fn as_display(&self) -> &str {
        match self {
            Extracted::Text(t) => t,
            Extracted::Unavailable { reason } => reason,
        }
    }

    /// The text, or `""` when unavailable.
    pub fn text_or_empty(&self) -> &str {
        match self {
            Extracted::Text(t) => t,
            Extracted::Unavailable { .. } => "",
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Extracted::Text(_))
    }
}

/// Normalised output of exactly one extraction driver for one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionRecord {
    pub kind: FileKind,
    pub description: Extracted,
    pub raw_text: Extracted,
    /// Set when the driver failed; the fields above then carry the reason.
    pub error: Option<FileError>,
}

impl ExtractionRecord {
    /// A record for a driver that failed outright.
    pub(crate) fn failed(kind: FileKind, label: &str, error: FileError) -> Self {
        let detail = match &error {
            FileError::ExtractionFailure { detail, .. } => detail.clone(),
            other => other.to_string(),
        };
        Self {
            kind,
            description: Extracted::unavailable(format!(
                "ERROR: {label} processing failed. Details: {detail}"
            )),
            raw_text: Extracted::unavailable(""),
            error: Some(error),
        }
    }
}

/// One row of the batch result table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalRecord {
    pub file_name: String,
    pub file_type: String,
    pub description: String,
    pub key_findings: String,
}

/// Terminal state of one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FileOutcome {
    Assembled(FinalRecord),
    Failed { stage: Stage, error: FileError },
}

/// Everything the pipeline knows about one input file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileReport {
    /// Position of the file in the batch input (0-indexed).
    pub index: usize,
    pub path: PathBuf,
    pub outcome: FileOutcome,
    /// Stages visited, in order.
    pub stages: Vec<Stage>,
    /// Non-fatal degradations (summary fallback, pattern-only redaction, …).
    pub warnings: Vec<FileError>,
    pub duration_ms: u64,
}

impl FileReport {
    pub fn record(&self) -> Option<&FinalRecord> {
        match &self.outcome {
            FileOutcome::Assembled(r) => Some(r),
            FileOutcome::Failed { .. } => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, FileOutcome::Failed { .. })
    }
}

/// Aggregate counters for a batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchStats {
    pub total_files: usize,
    pub assembled_files: usize,
    pub failed_files: usize,
    pub degraded_files: usize,
    pub total_duration_ms: u64,
}

/// Result of a batch run, ordered by input position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchOutput {
    pub reports: Vec<FileReport>,
    pub stats: BatchStats,
}

impl BatchOutput {
    /// Successfully assembled records, in input order.
    pub fn records(&self) -> impl Iterator<Item = &FinalRecord> {
        self.reports.iter().filter_map(FileReport::record)
    }

    /// Render the assembled records as a Markdown table with the columns
    /// File Name, File Type, File Description, Key Findings.
    pub fn to_table(&self) -> String {
        let mut out = String::from(
            "| File Name | File Type | File Description | Key Findings |\n\
             | --- | --- | --- | --- |\n",
        );
        for r in self.records() {
            out.push_str(&format!(
                "| {} | {} | {} | {} |\n",
                table_cell(&r.file_name),
                table_cell(&r.file_type),
                table_cell(&r.description),
                table_cell(&r.key_findings),
            ));
        }
        out
    }
}

/// Escape pipes and fold newlines so a value fits in one table cell.
fn table_cell(s: &str) -> String {
    s.trim()
        .replace('|', "\\|")
        .replace("\r\n", "<br>")
        .replace('\n', "<br>")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(index: usize, outcome: FileOutcome) -> FileReport {
        FileReport {
            index,
            path: PathBuf::from(format!("f{index}")),
            outcome,
            stages: vec![Stage::Routing],
            warnings: vec![],
            duration_ms: 0,
        }
    }

    #[test]
    fn extracted_accessors() {
        let t = Extracted::Text("hello".into());
        let u = Extracted::unavailable("no data");
        assert_eq!(t.as_display(), "hello");
        assert_eq!(u.as_display(), "no data");
        assert_eq!(u.text_or_empty(), "");
        assert!(t.is_available());
        assert!(!u.is_available());
    }

    #[test]
    fn table_skips_failed_and_escapes_cells() {
        let ok = FinalRecord {
            file_name: "deck.pptx".into(),
            file_type: "pptx".into(),
            description: "Quarterly | plan".into(),
            key_findings: "- one\n- two".into(),
        };
        let out = BatchOutput {
            reports: vec![
                report(0, FileOutcome::Assembled(ok)),
                report(
                    1,
                    FileOutcome::Failed {
                        stage: Stage::Routing,
                        error: FileError::UnsupportedInput {
                            file: "x.docx".into(),
                            extension: "docx".into(),
                        },
                    },
                ),
            ],
            stats: BatchStats::default(),
        };
        let table = out.to_table();
        assert!(table.starts_with("| File Name | File Type | File Description | Key Findings |"));
        assert!(table.contains("Quarterly \\| plan"));
        assert!(table.contains("- one<br>- two"));
        assert!(!table.contains("x.docx"));
        assert_eq!(table.lines().count(), 3);
    }

    #[test]
    fn stage_display_is_lowercase() {
        assert_eq!(Stage::Sanitizing.to_string(), "sanitizing");
    }
}
