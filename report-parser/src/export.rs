//! Markdown and HTML export of a finished review.

use review_store::models::{IssueSeverity, ReviewIssue, ReviewTask};

fn severity_icon(severity: IssueSeverity) -> &'static str {
    match severity {
        IssueSeverity::Critical => "🔴",
        IssueSeverity::Warning => "🟡",
        IssueSeverity::Suggestion => "🔵",
        IssueSeverity::Info => "ℹ️",
    }
}

/// Renders the review as a standalone Markdown document.
pub fn export_markdown(task: &ReviewTask, issues: &[ReviewIssue]) -> String {
    let mut out = String::new();
    out.push_str("# Code Review Report\n\n");
    out.push_str(&format!("**Project**: {}\n", task.project_name));
    out.push_str(&format!("**Strategy**: {}\n", task.strategy.as_str()));
    out.push_str(&format!("**Revision**: `{}`\n", task.revision_ref));
    if let Some(author) = &task.author_name {
        out.push_str(&format!("**Author**: {author}\n"));
    }
    out.push_str(&format!("**Created**: {}\n\n", task.created_at.to_rfc3339()));

    out.push_str("## Summary\n\n");
    out.push_str("| Item | Result |\n|------|--------|\n");
    if let Some(score) = task.quality_score {
        out.push_str(&format!("| Quality score | **{score}/100** |\n"));
    }
    if let Some(summary) = &task.summary {
        out.push_str(&format!("| Verdict | {} |\n", summary.verdict));
        out.push_str(&format!(
            "| Risk level | {} |\n",
            summary.risk_level.as_str().to_uppercase()
        ));
    }
    out.push_str(&format!("| Issues | {} |\n\n", task.issues_count));

    if let Some(summary) = &task.summary {
        if !summary.key_findings.is_empty() {
            out.push_str("### Key findings\n\n");
            for finding in &summary.key_findings {
                out.push_str(&format!("- {finding}\n"));
            }
            out.push('\n');
        }
        if !summary.recommendations.is_empty() {
            out.push_str("### Recommendations\n\n");
            for rec in &summary.recommendations {
                out.push_str(&format!("- {rec}\n"));
            }
            out.push('\n');
        }
    }

    if !issues.is_empty() {
        out.push_str("## Issues\n\n");
        for (n, issue) in issues.iter().enumerate() {
            out.push_str(&format!(
                "### {} {}. {}\n\n",
                severity_icon(issue.severity),
                n + 1,
                issue.title
            ));
            if let Some(path) = &issue.file_path {
                match issue.line_number {
                    Some(line) => out.push_str(&format!("`{path}:{line}`\n\n")),
                    None => out.push_str(&format!("`{path}`\n\n")),
                }
            }
            if !issue.description.is_empty() {
                out.push_str(&issue.description);
                out.push_str("\n\n");
            }
            if let Some(snippet) = &issue.code_snippet {
                out.push_str(&format!("```\n{snippet}\n```\n\n"));
            }
            if let Some(suggestion) = &issue.suggestion {
                out.push_str(&format!("**Suggested fix**: {suggestion}\n\n"));
            }
        }
    }

    if let Some(report) = &task.report {
        out.push_str("## Raw report\n\n");
        out.push_str("<details><summary>assistant output</summary>\n\n");
        out.push_str(report);
        out.push_str("\n\n</details>\n");
    }
    out
}

/// Renders the review as a minimal self-contained HTML page.
pub fn export_html(task: &ReviewTask, issues: &[ReviewIssue]) -> String {
    let mut body = String::new();
    body.push_str(&format!(
        "<h1>Code Review Report</h1>\
         <p><b>Project:</b> {}<br><b>Strategy:</b> {}<br><b>Revision:</b> <code>{}</code></p>",
        escape(&task.project_name),
        task.strategy.as_str(),
        escape(&task.revision_ref),
    ));
    if let Some(score) = task.quality_score {
        body.push_str(&format!("<p><b>Quality score:</b> {score}/100</p>"));
    }
    if let Some(summary) = &task.summary {
        body.push_str(&format!(
            "<p><b>Verdict:</b> {} &middot; <b>Risk:</b> {}</p>",
            escape(&summary.verdict),
            summary.risk_level.as_str()
        ));
    }

    if !issues.is_empty() {
        body.push_str("<h2>Issues</h2><ol>");
        for issue in issues {
            body.push_str(&format!(
                "<li><b>{} {}</b>",
                severity_icon(issue.severity),
                escape(&issue.title)
            ));
            if let Some(path) = &issue.file_path {
                match issue.line_number {
                    Some(line) => body.push_str(&format!(" <code>{}:{line}</code>", escape(path))),
                    None => body.push_str(&format!(" <code>{}</code>", escape(path))),
                }
            }
            if !issue.description.is_empty() {
                body.push_str(&format!("<p>{}</p>", escape(&issue.description)));
            }
            if let Some(suggestion) = &issue.suggestion {
                body.push_str(&format!("<p><i>Suggested fix:</i> {}</p>", escape(suggestion)));
            }
            body.push_str("</li>");
        }
        body.push_str("</ol>");
    }

    format!(
        "<!DOCTYPE html><html><head><meta charset=\"utf-8\">\
         <title>Review {}</title></head><body>{body}</body></html>",
        escape(&task.revision_ref)
    )
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use review_store::models::*;
    use uuid::Uuid;

    fn sample_task() -> ReviewTask {
        ReviewTask {
            task_id: Uuid::new_v4(),
            repo_id: "r1".into(),
            project_name: "demo".into(),
            strategy: ReviewStrategy::Commit,
            revision_ref: "abc123".into(),
            base_ref: None,
            branch: "main".into(),
            author_name: Some("alice".into()),
            author_email: None,
            status: TaskStatus::Completed,
            batch_total: 1,
            batch_current: 1,
            batch_results: vec![],
            issues_count: 1,
            critical_count: 1,
            warning_count: 0,
            suggestion_count: 0,
            quality_score: Some(90),
            files_reviewed: vec!["a.rs".into()],
            report: Some("raw".into()),
            summary: Some(ReviewSummary {
                verdict: "reviewed".into(),
                risk_level: RiskLevel::High,
                key_findings: vec!["one critical".into()],
                recommendations: vec![],
            }),
            error_message: None,
            poll_kind: None,
            marker_prev: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            processing_time_seconds: Some(12.0),
        }
    }

    fn sample_issue() -> ReviewIssue {
        ReviewIssue {
            severity: IssueSeverity::Critical,
            title: "use of <unsafe> block".into(),
            description: "raw pointer deref".into(),
            file_path: Some("a.rs".into()),
            line_number: Some(7),
            code_snippet: None,
            suggestion: Some("wrap in a checked API".into()),
            category: Some("security".into()),
        }
    }

    #[test]
    fn markdown_includes_score_and_issue_location() {
        let md = export_markdown(&sample_task(), &[sample_issue()]);
        assert!(md.contains("**90/100**"));
        assert!(md.contains("`a.rs:7`"));
        assert!(md.contains("Suggested fix"));
    }

    #[test]
    fn html_escapes_issue_titles() {
        let html = export_html(&sample_task(), &[sample_issue()]);
        assert!(html.contains("&lt;unsafe&gt;"));
        assert!(!html.contains("<unsafe>"));
    }
}
