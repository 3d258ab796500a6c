//! Run summaries listing emitted and skipped sections.

use std::fmt;

use serde::Serialize;

use crate::assemble::{SectionOutcome, SkipReason};

/// Result recorded for one section.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SectionStatus {
    /// Userdata was handed to the sink.
    Emitted {
        /// Document size in bytes.
        bytes: usize,
        /// Number of embedded files.
        files: usize,
    },
    /// No userdata was produced.
    Skipped {
        /// Why the section was skipped.
        #[serde(flatten)]
        reason: SkipReason,
    },
}

/// Summary line for one section.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct SectionReport {
    /// Section name.
    pub section: String,
    /// What happened to it.
    #[serde(flatten)]
    pub status: SectionStatus,
}

impl SectionReport {
    /// Builds the report for `section` from its outcome.
    #[must_use]
    pub fn new(section: &str, outcome: &SectionOutcome) -> Self {
        let status = match outcome {
            SectionOutcome::Emitted(document) => SectionStatus::Emitted {
                bytes: document.text().len(),
                files: document.embedded_files(),
            },
            SectionOutcome::Skipped(reason) => SectionStatus::Skipped {
                reason: reason.clone(),
            },
        };
        Self {
            section: section.to_owned(),
            status,
        }
    }
}

/// Outcomes of a run, in section declaration order.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct RunSummary {
    sections: Vec<SectionReport>,
}

impl RunSummary {
    /// Appends a section report.
    pub fn record(&mut self, report: SectionReport) {
        self.sections.push(report);
    }

    /// All reports in declaration order.
    #[must_use]
    pub fn sections(&self) -> &[SectionReport] {
        &self.sections
    }

    /// Names of emitted sections.
    pub fn emitted(&self) -> impl Iterator<Item = &str> {
        self.sections
            .iter()
            .filter(|report| matches!(report.status, SectionStatus::Emitted { .. }))
            .map(|report| report.section.as_str())
    }

    /// Skipped sections with their reasons.
    pub fn skipped(&self) -> impl Iterator<Item = (&str, &SkipReason)> {
        self.sections.iter().filter_map(|report| match &report.status {
            SectionStatus::Skipped { reason } => Some((report.section.as_str(), reason)),
            SectionStatus::Emitted { .. } => None,
        })
    }

    /// Returns `true` when at least one section was skipped.
    #[must_use]
    pub fn has_skips(&self) -> bool {
        self.skipped().next().is_some()
    }

    /// Serialises the summary as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns a [`serde_json::Error`] if serialisation fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let emitted: Vec<&str> = self.emitted().collect();
        if emitted.is_empty() {
            writeln!(f, "No userdata emitted")?;
        } else {
            writeln!(f, "Userdata emitted for:")?;
            for section in emitted {
                writeln!(f, "  {section}")?;
            }
        }

        let skipped: Vec<(&str, &SkipReason)> = self.skipped().collect();
        if !skipped.is_empty() {
            writeln!(f, "Skipped:")?;
            for (section, reason) in skipped {
                writeln!(f, "  {section}: {reason}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assemble::{MAX_DOCUMENT_BYTES, RenderedDocument};

    fn summary() -> RunSummary {
        let document = RenderedDocument::within_budget("web1", String::from("hello web1"), 0)
            .unwrap_or_else(|err| panic!("document: {err}"));
        let mut summary = RunSummary::default();
        summary.record(SectionReport::new(
            "web1",
            &SectionOutcome::Emitted(document),
        ));
        summary.record(SectionReport::new(
            "web3",
            &SectionOutcome::Skipped(SkipReason::OversizedDocument {
                size: MAX_DOCUMENT_BYTES + 1,
                limit: MAX_DOCUMENT_BYTES,
            }),
        ));
        summary
    }

    #[test]
    fn splits_emitted_and_skipped() {
        let summary = summary();
        assert_eq!(summary.emitted().collect::<Vec<_>>(), ["web1"]);
        assert_eq!(
            summary.skipped().map(|(name, _)| name).collect::<Vec<_>>(),
            ["web3"]
        );
        assert!(summary.has_skips());
    }

    #[test]
    fn text_summary_lists_reasons() {
        let rendered = summary().to_string();
        assert!(rendered.contains("Userdata emitted for:\n  web1\n"), "{rendered}");
        assert!(
            rendered.contains("web3: userdata is 16385 bytes; the limit is 16384 bytes"),
            "{rendered}"
        );
    }

    #[test]
    fn json_summary_is_flat_per_section() {
        let json = summary()
            .to_json()
            .unwrap_or_else(|err| panic!("json: {err}"));
        let value: serde_json::Value =
            serde_json::from_str(&json).unwrap_or_else(|err| panic!("parse: {err}"));
        let sections = value
            .get("sections")
            .and_then(serde_json::Value::as_array)
            .unwrap_or_else(|| panic!("sections array"));
        assert_eq!(
            sections.first(),
            Some(&serde_json::json!({
                "section": "web1",
                "status": "emitted",
                "bytes": 10,
                "files": 0
            }))
        );
        assert_eq!(
            sections.get(1),
            Some(&serde_json::json!({
                "section": "web3",
                "status": "skipped",
                "reason": "oversized_document",
                "size": 16385,
                "limit": 16384
            }))
        );
    }
}
