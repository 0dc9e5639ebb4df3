//! Turns raw assistant output into structured review results.
//!
//! The engine concatenates per-batch stdout and hands it here; back come the
//! issues, the severity tally, the quality score and the summary fields. A
//! report the ladder cannot structure is not an error: the raw text is kept,
//! the score stays 100 and the verdict becomes `"unparsed"` so operators can
//! inspect it.

pub mod export;
pub mod parser;
pub mod score;

use review_store::models::{ReviewIssue, ReviewSummary};

pub use export::{export_html, export_markdown};
pub use parser::{parse_report, strip_think_spans};
pub use score::{quality_score, summarize, unparsed_summary, IssueCounts};

/// Everything the engine persists about a parsed report.
#[derive(Debug, Clone)]
pub struct ParsedReport {
    pub issues: Vec<ReviewIssue>,
    pub counts: IssueCounts,
    pub quality_score: u8,
    pub summary: ReviewSummary,
}

/// Full pipeline: parse, tally, score, summarize.
pub fn analyze(report: &str) -> ParsedReport {
    let issues = parse_report(report);
    let counts = IssueCounts::tally(&issues);
    let score = quality_score(&counts);
    let summary = if issues.is_empty() && !report.trim().is_empty() {
        unparsed_summary()
    } else {
        summarize(report, &issues)
    };
    ParsedReport {
        issues,
        counts,
        quality_score: score,
        summary,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn analyze_scores_parsed_report() {
        let report = "🔴 [a.rs:1] injection\n🟡 [b.rs:2] shadowed var\n🔵 [c.rs:3] rename\n";
        let parsed = analyze(report);
        assert_eq!(parsed.counts.critical, 1);
        assert_eq!(parsed.counts.warning, 1);
        assert_eq!(parsed.counts.suggestion, 1);
        // 100 - 10 - 3 - 1
        assert_eq!(parsed.quality_score, 86);
        assert_eq!(parsed.summary.verdict, "reviewed");
    }

    #[test]
    fn analyze_marks_unrecognized_format() {
        let parsed = analyze("completely free-form prose with no findings");
        assert!(parsed.issues.is_empty());
        assert_eq!(parsed.quality_score, 100);
        assert_eq!(parsed.summary.verdict, "unparsed");
    }
}
