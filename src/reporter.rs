use serde::{Deserialize, Serialize};
use similar::{Algorithm, TextDiff};

use crate::canonical::canonical_text;
use crate::optimization_rule::{ChangeRecord, RuleKey};

/// Unified-diff lines shown before truncation kicks in.
pub const DIFF_DISPLAY_LIMIT: usize = 50;

/// Renders change records and a canonical diff in the configured format.
/// Pure formatting: no side effects, no I/O.
pub struct ChangeReporter {
    output_format: ReportFormat,
}

/// Available output formats for optimization reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportFormat {
    Console,
    Json,
    Yaml,
}

/// The full report view: flat ordered change list plus a bounded diff.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationReport {
    pub changes: Vec<ReportedChange>,
    pub summary: ReportSummary,
    pub diff: Vec<String>,
    pub truncated_diff_lines: usize,
}

/// One change record enriched with the static rule-key description table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportedChange {
    pub rule: RuleKey,
    pub description: String,
    pub before: String,
    pub after: String,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportSummary {
    pub total_changes: usize,
    pub already_optimized: bool,
}

impl ChangeReporter {
    pub fn new() -> Self {
        Self {
            output_format: ReportFormat::Console,
        }
    }

    pub fn with_format(mut self, format: ReportFormat) -> Self {
        self.output_format = format;
        self
    }

    /// Builds the report view from the change sequence and both descriptor
    /// texts. An empty change sequence produces no diff.
    pub fn generate_report(
        &self,
        changes: &[ChangeRecord],
        original_text: &str,
        optimized_text: &str,
    ) -> OptimizationReport {
        let reported = changes
            .iter()
            .map(|change| ReportedChange {
                rule: change.rule,
                description: change.rule.description().to_string(),
                before: change.before.clone(),
                after: change.after.clone(),
                detail: change.rule.detail().to_string(),
            })
            .collect();

        let (diff, truncated_diff_lines) = if changes.is_empty() {
            (Vec::new(), 0)
        } else {
            bounded_unified_diff(original_text, optimized_text)
        };

        OptimizationReport {
            changes: reported,
            summary: ReportSummary {
                total_changes: changes.len(),
                already_optimized: changes.is_empty(),
            },
            diff,
            truncated_diff_lines,
        }
    }

    /// Format the report according to the configured output format.
    pub fn format_report(&self, report: &OptimizationReport) -> Result<String, ReportError> {
        match self.output_format {
            ReportFormat::Console => Ok(self.format_console_report(report)),
            ReportFormat::Json => self.format_json_report(report),
            ReportFormat::Yaml => self.format_yaml_report(report),
        }
    }

    fn format_console_report(&self, report: &OptimizationReport) -> String {
        let mut output = String::new();

        if report.summary.already_optimized {
            output.push_str("✓ VM is already optimized. No changes needed.\n");
            return output;
        }

        output.push_str(&"=".repeat(60));
        output.push_str("\nPROPOSED OPTIMIZATIONS\n");
        output.push_str(&"=".repeat(60));
        output.push('\n');

        for change in &report.changes {
            output.push_str(&format!("\n● {}\n", change.description));
            output.push_str(&format!("  Before: {}\n", change.before));
            output.push_str(&format!("  After:  {}\n", change.after));
            output.push_str(&format!("  → {}\n", change.detail));
        }

        output.push('\n');
        output.push_str(&"-".repeat(60));
        output.push_str("\nXML DIFF (abbreviated)\n");
        output.push_str(&"-".repeat(60));
        output.push('\n');

        for line in &report.diff {
            output.push_str(line);
            output.push('\n');
        }
        if report.truncated_diff_lines > 0 {
            output.push_str(&format!(
                "\n... ({} more lines)\n",
                report.truncated_diff_lines
            ));
        }
        output.push_str(&"-".repeat(60));
        output.push('\n');

        output
    }

    fn format_json_report(&self, report: &OptimizationReport) -> Result<String, ReportError> {
        serde_json::to_string_pretty(report)
            .map_err(|e| ReportError::Serialization(e.to_string()))
    }

    fn format_yaml_report(&self, report: &OptimizationReport) -> Result<String, ReportError> {
        serde_yaml::to_string(report).map_err(|e| ReportError::Serialization(e.to_string()))
    }
}

impl Default for ChangeReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Line-based unified diff between the canonical forms of both texts,
/// truncated to [`DIFF_DISPLAY_LIMIT`] lines.
fn bounded_unified_diff(original_text: &str, optimized_text: &str) -> (Vec<String>, usize) {
    let original = canonical_text(original_text);
    let optimized = canonical_text(optimized_text);

    let diff = TextDiff::configure()
        .algorithm(Algorithm::Myers)
        .diff_lines(original.as_str(), optimized.as_str());

    let unified = diff
        .unified_diff()
        .context_radius(3)
        .header("original", "optimized")
        .to_string();

    let mut lines: Vec<String> = unified.lines().map(str::to_owned).collect();
    let truncated = lines.len().saturating_sub(DIFF_DISPLAY_LIMIT);
    lines.truncate(DIFF_DISPLAY_LIMIT);
    (lines, truncated)
}

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("serialization error: {0}")]
    Serialization(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::canonicalize;
    use crate::document::Document;
    use crate::optimization_engine::OptimizationEngine;

    fn optimize(text: &str) -> (Vec<ChangeRecord>, String) {
        let outcome = OptimizationEngine::new().transform(Document::parse(text).unwrap());
        let optimized = canonicalize(&outcome.document).unwrap();
        (outcome.changes, optimized)
    }

    const LEGACY_DISK: &str = r#"
        <domain>
          <vcpu>2</vcpu>
          <cpu mode="host-passthrough">
            <topology sockets="1" dies="1" clusters="1" cores="2" threads="1"/>
          </cpu>
          <devices>
            <disk device="disk">
              <target dev="hda" bus="ide"/>
            </disk>
          </devices>
        </domain>
    "#;

    #[test]
    fn test_console_report_lists_changes_and_diff() {
        let (changes, optimized) = optimize(LEGACY_DISK);
        let reporter = ChangeReporter::new();
        let report = reporter.generate_report(&changes, LEGACY_DISK, &optimized);
        let rendered = reporter.format_report(&report).unwrap();

        assert!(rendered.contains("PROPOSED OPTIMIZATIONS"));
        assert!(rendered.contains("Disk bus: IDE/SATA → VirtIO"));
        assert!(rendered.contains("Before: ide (hda)"));
        assert!(rendered.contains("After:  virtio (vda)"));
        assert!(rendered.contains("XML DIFF (abbreviated)"));
        assert!(rendered.contains(r#"dev="hda" bus="ide""#));
        assert!(rendered.contains(r#"dev="vda" bus="virtio""#));
    }

    #[test]
    fn test_empty_change_set_reports_already_optimized() {
        let reporter = ChangeReporter::new();
        let text = "<domain/>";
        let report = reporter.generate_report(&[], text, text);

        assert!(report.summary.already_optimized);
        assert!(report.diff.is_empty());

        let rendered = reporter.format_report(&report).unwrap();
        assert!(rendered.contains("already optimized"));
        assert!(!rendered.contains("XML DIFF"));
    }

    #[test]
    fn test_diff_is_truncated_with_marker() {
        // A descriptor with enough disks to overflow the display limit.
        let mut devices = String::new();
        for i in 0..40 {
            devices.push_str(&format!(
                r#"<disk device="disk"><target dev="sd{i}" bus="scsi"/></disk>"#
            ));
        }
        let text = format!(
            r#"<domain><vcpu>1</vcpu><cpu mode="host-passthrough"><topology sockets="1" dies="1" clusters="1" cores="1" threads="1"/></cpu><devices>{devices}</devices></domain>"#
        );

        let (changes, optimized) = optimize(&text);
        assert!(!changes.is_empty());

        let reporter = ChangeReporter::new();
        let report = reporter.generate_report(&changes, &text, &optimized);

        assert_eq!(report.diff.len(), DIFF_DISPLAY_LIMIT);
        assert!(report.truncated_diff_lines > 0);

        let rendered = reporter.format_report(&report).unwrap();
        assert!(rendered.contains(&format!("({} more lines)", report.truncated_diff_lines)));
    }

    #[test]
    fn test_json_report_round_trips() {
        let (changes, optimized) = optimize(LEGACY_DISK);
        let reporter = ChangeReporter::new().with_format(ReportFormat::Json);
        let report = reporter.generate_report(&changes, LEGACY_DISK, &optimized);

        let rendered = reporter.format_report(&report).unwrap();
        let parsed: OptimizationReport = serde_json::from_str(&rendered).unwrap();
        assert_eq!(parsed.summary.total_changes, report.summary.total_changes);
        assert_eq!(parsed.changes[0].rule, RuleKey::DiskBus);
    }

    #[test]
    fn test_yaml_report_renders() {
        let (changes, optimized) = optimize(LEGACY_DISK);
        let reporter = ChangeReporter::new().with_format(ReportFormat::Yaml);
        let report = reporter.generate_report(&changes, LEGACY_DISK, &optimized);

        let rendered = reporter.format_report(&report).unwrap();
        assert!(rendered.contains("total_changes: 1"));
        assert!(rendered.contains("rule: disk_bus"));
    }
}
