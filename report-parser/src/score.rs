//! Quality scoring and summary derivation.

use std::sync::LazyLock;

use regex::RegexBuilder;
use review_store::models::{IssueSeverity, ReviewIssue, ReviewSummary, RiskLevel};

/// Issue counts by severity, in scoring order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IssueCounts {
    pub critical: u32,
    pub warning: u32,
    pub suggestion: u32,
    pub info: u32,
}

impl IssueCounts {
    pub fn tally(issues: &[ReviewIssue]) -> Self {
        let mut counts = Self::default();
        for issue in issues {
            match issue.severity {
                IssueSeverity::Critical => counts.critical += 1,
                IssueSeverity::Warning => counts.warning += 1,
                IssueSeverity::Suggestion => counts.suggestion += 1,
                IssueSeverity::Info => counts.info += 1,
            }
        }
        counts
    }

    pub fn total(&self) -> u32 {
        self.critical + self.warning + self.suggestion + self.info
    }
}

/// `clamp(100 − 10·critical − 3·warning − 1·suggestion, 0, 100)`.
/// Info findings do not affect the score.
pub fn quality_score(counts: &IssueCounts) -> u8 {
    let penalty =
        10 * counts.critical as i64 + 3 * counts.warning as i64 + counts.suggestion as i64;
    (100 - penalty).clamp(0, 100) as u8
}

static VERDICT_LINE: LazyLock<regex::Regex> = LazyLock::new(|| {
    RegexBuilder::new(r"^\s*(?:verdict|结论)\s*[:：]\s*(.+)$")
        .case_insensitive(true)
        .multi_line(true)
        .build()
        .expect("verdict regex")
});

static RISK_LINE: LazyLock<regex::Regex> = LazyLock::new(|| {
    RegexBuilder::new(r"^\s*(?:risk|risk level|风险)\s*[:：]\s*(low|medium|high)")
        .case_insensitive(true)
        .multi_line(true)
        .build()
        .expect("risk regex")
});

/// Builds the summary for a finished review.
///
/// Labeled `Verdict:`/`Risk:` lines in the report win when present; absent
/// fields fall back to derivation: verdict `"reviewed"`, risk `high` with any
/// critical, `medium` with any warning, else `low`.
pub fn summarize(report: &str, issues: &[ReviewIssue]) -> ReviewSummary {
    let counts = IssueCounts::tally(issues);

    let verdict = VERDICT_LINE
        .captures(report)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_else(|| "reviewed".to_string());

    let risk_level = RISK_LINE
        .captures(report)
        .and_then(|c| c.get(1))
        .and_then(|m| match m.as_str().to_lowercase().as_str() {
            "low" => Some(RiskLevel::Low),
            "medium" => Some(RiskLevel::Medium),
            "high" => Some(RiskLevel::High),
            _ => None,
        })
        .unwrap_or(derive_risk(&counts));

    let mut key_findings = Vec::new();
    if counts.critical > 0 {
        key_findings.push(format!("{} critical issue(s) require immediate fixes", counts.critical));
    }
    if counts.warning > 0 {
        key_findings.push(format!("{} warning(s) need attention", counts.warning));
    }
    if let Some(category) = dominant_category(issues) {
        key_findings.push(format!("most findings fall under {category}"));
    }
    if key_findings.is_empty() {
        key_findings.push("no significant problems found".to_string());
    }

    let mut recommendations = Vec::new();
    if counts.critical > 0 {
        recommendations.push("fix critical findings before merging".to_string());
    }
    if issues.iter().any(|i| i.category.as_deref() == Some("security")) {
        recommendations.push("run a focused security review of the flagged paths".to_string());
    }
    if counts.suggestion > 3 {
        recommendations.push("consider a refactoring pass for maintainability".to_string());
    }

    ReviewSummary {
        verdict,
        risk_level,
        key_findings,
        recommendations,
    }
}

/// Summary for a report the parser could not structure at all: the raw text
/// is kept for operators, the review still completes.
pub fn unparsed_summary() -> ReviewSummary {
    ReviewSummary {
        verdict: "unparsed".to_string(),
        risk_level: RiskLevel::Low,
        key_findings: vec!["report format was not recognized; see raw report".to_string()],
        recommendations: Vec::new(),
    }
}

fn derive_risk(counts: &IssueCounts) -> RiskLevel {
    if counts.critical > 0 {
        RiskLevel::High
    } else if counts.warning > 0 {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

fn dominant_category(issues: &[ReviewIssue]) -> Option<String> {
    let mut counts: std::collections::HashMap<&str, usize> = std::collections::HashMap::new();
    for issue in issues {
        if let Some(category) = &issue.category {
            *counts.entry(category.as_str()).or_default() += 1;
        }
    }
    counts
        .into_iter()
        .max_by_key(|(_, n)| *n)
        .map(|(category, _)| category.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issue(severity: IssueSeverity) -> ReviewIssue {
        ReviewIssue {
            severity,
            title: "t".into(),
            description: String::new(),
            file_path: None,
            line_number: None,
            code_snippet: None,
            suggestion: None,
            category: None,
        }
    }

    #[test]
    fn score_formula_matches_contract() {
        let counts = IssueCounts {
            critical: 2,
            warning: 3,
            suggestion: 4,
            info: 10,
        };
        // 100 - 20 - 9 - 4 = 67; info has no weight.
        assert_eq!(quality_score(&counts), 67);
    }

    #[test]
    fn score_clamps_to_zero() {
        let counts = IssueCounts {
            critical: 20,
            ..Default::default()
        };
        assert_eq!(quality_score(&counts), 0);
    }

    #[test]
    fn clean_report_scores_hundred() {
        assert_eq!(quality_score(&IssueCounts::default()), 100);
    }

    #[test]
    fn risk_derivation_follows_severity() {
        let summary = summarize("", &[issue(IssueSeverity::Critical)]);
        assert_eq!(summary.risk_level, RiskLevel::High);
        assert_eq!(summary.verdict, "reviewed");

        let summary = summarize("", &[issue(IssueSeverity::Warning)]);
        assert_eq!(summary.risk_level, RiskLevel::Medium);

        let summary = summarize("", &[]);
        assert_eq!(summary.risk_level, RiskLevel::Low);
    }

    #[test]
    fn labeled_fields_win_over_derivation() {
        let report = "Verdict: needs rework\nRisk: high\n";
        let summary = summarize(report, &[]);
        assert_eq!(summary.verdict, "needs rework");
        assert_eq!(summary.risk_level, RiskLevel::High);
    }
}
