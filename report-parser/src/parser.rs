//! Report text → structured issues.
//!
//! Assistant reports arrive in whatever shape the model chose. Parsing runs
//! through a ladder of strategies and stops at the first that yields issues:
//!
//! 1. explicit sections headed `Issue N:` / `问题 N:`
//! 2. severity-emoji bullet lines (`🔴 [file:line] title`)
//! 3. markdown headings that read like findings
//! 4. numbered lists
//!
//! Reasoning spans (`<think>…</think>`, `[think]…[/think]`) are stripped
//! before any matching. Duplicates (same file, line and title) collapse to
//! the first occurrence.

use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};
use review_store::models::{IssueSeverity, ReviewIssue};

static THINK_SPANS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        RegexBuilder::new(r"<think>[\s\S]*?</think>")
            .case_insensitive(true)
            .build()
            .expect("think regex"),
        RegexBuilder::new(r"\[think\][\s\S]*?\[/think\]")
            .case_insensitive(true)
            .build()
            .expect("think regex"),
    ]
});

static ISSUE_HEADING: LazyLock<Regex> = LazyLock::new(|| {
    RegexBuilder::new(r"^(?:issue|问题)\s*\d+\s*[:：]\s*(.+)$")
        .case_insensitive(true)
        .multi_line(true)
        .build()
        .expect("issue heading regex")
});

static EMOJI_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*(🔴|🟡|🔵|ℹ️)\s*(?:\[([^\]:]+?)(?::(\d+))?\])?\s*(.+)$")
        .expect("emoji line regex")
});

static MD_HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^#{1,4}\s+(.+)$").expect("heading regex"));

static NUMBERED_ITEM_START: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*\d+[.、]\s+").expect("numbered regex")
});

static FILE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([A-Za-z0-9_\./\\-]+\.[A-Za-z]{1,8})(?:[:\s(]+(?:line\s*)?(\d+)\)?)?")
        .expect("file/line regex")
});

static CODE_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```[\w+-]*\n([\s\S]*?)```").expect("code block regex"));

static SUGGESTION_LINE: LazyLock<Regex> = LazyLock::new(|| {
    RegexBuilder::new(r"^\s*(?:suggestion|suggested fix|建议|推荐|改为)\s*[:：]\s*(.+)$")
        .case_insensitive(true)
        .multi_line(true)
        .build()
        .expect("suggestion regex")
});

const CRITICAL_WORDS: &[&str] = &[
    "🔴", "critical", "security", "vulnerability", "dangerous", "严重", "漏洞", "危险",
];
const WARNING_WORDS: &[&str] = &["🟡", "warning", "caution", "警告", "注意"];
const SUGGESTION_WORDS: &[&str] = &[
    "🔵",
    "suggestion",
    "recommend",
    "improvement",
    "consider",
    "建议",
    "优化",
    "改进",
];
const INFO_WORDS: &[&str] = &["ℹ️", "info", "note", "信息", "提示"];

const CATEGORY_WORDS: &[(&str, &[&str])] = &[
    ("security", &["security", "injection", "xss", "csrf", "安全", "注入", "漏洞"]),
    ("logic", &["logic", "bug", "incorrect", "逻辑", "缺陷"]),
    ("performance", &["performance", "slow", "inefficien", "性能", "效率"]),
    ("style", &["style", "naming", "readab", "format", "风格", "命名", "可读性"]),
    ("maintainability", &["maintain", "complex", "duplicat", "coupl", "可维护", "复杂度", "重复"]),
    ("documentation", &["documentation", "comment", "docstring", "文档", "注释"]),
];

const SKIP_HEADINGS: &[&str] = &[
    "code review",
    "review report",
    "summary",
    "overview",
    "conclusion",
    "代码审查",
    "总结",
    "概述",
    "结论",
];

/// Removes reasoning spans before parsing.
pub fn strip_think_spans(text: &str) -> String {
    let mut out = text.to_string();
    for re in THINK_SPANS.iter() {
        out = re.replace_all(&out, "").into_owned();
    }
    out
}

/// Parses the merged report into issues, in appearance order, deduplicated.
pub fn parse_report(raw: &str) -> Vec<ReviewIssue> {
    if raw.trim().is_empty() {
        return Vec::new();
    }
    let text = strip_think_spans(raw);

    let mut issues = parse_issue_sections(&text);
    if issues.is_empty() {
        issues = parse_emoji_lines(&text);
    }
    if issues.is_empty() {
        issues = parse_markdown_headings(&text);
    }
    if issues.is_empty() {
        issues = parse_numbered_list(&text);
    }
    dedup(issues)
}

fn parse_issue_sections(text: &str) -> Vec<ReviewIssue> {
    let headings: Vec<_> = ISSUE_HEADING.captures_iter(text).collect();
    let mut issues = Vec::new();
    for (i, cap) in headings.iter().enumerate() {
        let title = cap.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
        let body_start = cap.get(0).map(|m| m.end()).unwrap_or_default();
        let body_end = headings
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map(|m| m.start())
            .unwrap_or(text.len());
        let body = &text[body_start..body_end];
        issues.push(build_issue(title, body));
    }
    issues
}

fn parse_emoji_lines(text: &str) -> Vec<ReviewIssue> {
    let matches: Vec<_> = EMOJI_LINE.captures_iter(text).collect();
    let mut issues = Vec::new();
    for (i, cap) in matches.iter().enumerate() {
        let emoji = cap.get(1).map(|m| m.as_str()).unwrap_or_default();
        let file = cap.get(2).map(|m| m.as_str().to_string());
        let line = cap.get(3).and_then(|m| m.as_str().parse().ok());
        let title = cap.get(4).map(|m| m.as_str().trim()).unwrap_or_default();

        let body_start = cap.get(0).map(|m| m.end()).unwrap_or_default();
        let body_end = matches
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map(|m| m.start())
            .unwrap_or(text.len());
        let body = text[body_start..body_end].trim();

        let mut issue = build_issue(&format!("{emoji} {title}"), body);
        issue.title = title.to_string();
        if file.is_some() {
            issue.file_path = file;
            issue.line_number = line;
        }
        issues.push(issue);
    }
    issues
}

fn parse_markdown_headings(text: &str) -> Vec<ReviewIssue> {
    let headings: Vec<_> = MD_HEADING.captures_iter(text).collect();
    let mut issues = Vec::new();
    for (i, cap) in headings.iter().enumerate() {
        let title = cap.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
        let lower = title.to_lowercase();
        if SKIP_HEADINGS.iter().any(|skip| lower.contains(skip)) {
            continue;
        }
        let body_start = cap.get(0).map(|m| m.end()).unwrap_or_default();
        let body_end = headings
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map(|m| m.start())
            .unwrap_or(text.len());
        let body = text[body_start..body_end].trim();
        if !looks_like_issue(title, body) {
            continue;
        }
        issues.push(build_issue(title, body));
    }
    issues
}

fn parse_numbered_list(text: &str) -> Vec<ReviewIssue> {
    let mut issues = Vec::new();
    let starts: Vec<_> = NUMBERED_ITEM_START.find_iter(text).collect();
    for (i, m) in starts.iter().enumerate() {
        let content_end = starts.get(i + 1).map(|next| next.start()).unwrap_or(text.len());
        let content = text[m.end()..content_end].trim();
        if content.len() < 10 {
            continue;
        }
        let mut lines = content.lines();
        let title = lines.next().unwrap_or_default().trim();
        let body = lines.collect::<Vec<_>>().join("\n");
        if !looks_like_issue(title, &body) {
            continue;
        }
        issues.push(build_issue(title, &body));
    }
    issues
}

fn build_issue(title: &str, body: &str) -> ReviewIssue {
    let combined = format!("{title}\n{body}");
    let (file_path, line_number) = extract_file_location(&combined);
    ReviewIssue {
        // Unclassified findings count as suggestions.
        severity: detect_severity(&combined).unwrap_or(IssueSeverity::Suggestion),
        title: truncate(title.trim_start_matches(['*', '#', ' ']), 200),
        description: truncate(body.trim(), 4000),
        file_path,
        line_number,
        code_snippet: CODE_BLOCK
            .captures(body)
            .and_then(|c| c.get(1))
            .map(|m| truncate(m.as_str().trim(), 2000)),
        suggestion: SUGGESTION_LINE
            .captures(body)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string()),
        category: detect_category(&combined),
    }
}

/// Severity from label keywords; `None` when nothing matches.
pub fn detect_severity(text: &str) -> Option<IssueSeverity> {
    let lower = text.to_lowercase();
    let hit = |words: &[&str]| words.iter().any(|w| lower.contains(w));
    if hit(CRITICAL_WORDS) {
        Some(IssueSeverity::Critical)
    } else if hit(WARNING_WORDS) {
        Some(IssueSeverity::Warning)
    } else if hit(SUGGESTION_WORDS) {
        Some(IssueSeverity::Suggestion)
    } else if hit(INFO_WORDS) {
        Some(IssueSeverity::Info)
    } else {
        None
    }
}

fn detect_category(text: &str) -> Option<String> {
    let lower = text.to_lowercase();
    for (category, words) in CATEGORY_WORDS {
        if words.iter().any(|w| lower.contains(w)) {
            return Some((*category).to_string());
        }
    }
    None
}

fn looks_like_issue(title: &str, body: &str) -> bool {
    let combined = format!("{title} {body}").to_lowercase();
    const INDICATORS: &[&str] = &[
        "should", "could", "issue", "bug", "error", "warning", "fix", "missing", "leak",
        "unsafe", "建议", "问题", "修复", "改进", "优化", "需要",
    ];
    detect_severity(&combined).is_some() || INDICATORS.iter().any(|w| combined.contains(w))
}

fn extract_file_location(text: &str) -> (Option<String>, Option<u32>) {
    for cap in FILE_LINE.captures_iter(text) {
        let path = cap.get(1).map(|m| m.as_str()).unwrap_or_default();
        // A bare extension or a number-dotted token is not a path.
        if !path.contains('.') || path.ends_with('.') || path.starts_with('.') {
            continue;
        }
        if path.chars().all(|c| c.is_ascii_digit() || c == '.') {
            continue;
        }
        let line = cap.get(2).and_then(|m| m.as_str().parse().ok());
        return (Some(path.to_string()), line);
    }
    (None, None)
}

fn dedup(issues: Vec<ReviewIssue>) -> Vec<ReviewIssue> {
    let mut seen = std::collections::HashSet::new();
    issues
        .into_iter()
        .filter(|issue| {
            seen.insert((
                issue.file_path.clone(),
                issue.line_number,
                issue.title.clone(),
            ))
        })
        .collect()
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut idx = max;
    while !s.is_char_boundary(idx) {
        idx -= 1;
    }
    s[..idx].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_issue_sections_with_metadata() {
        let report = "\
Issue 1: SQL built by string concatenation
File: src/db.rs:88
The query interpolates user input directly, which is a security hole.
Suggestion: use bind parameters
```rust
let q = format!(\"SELECT * FROM t WHERE id = {}\", id);
```

Issue 2: Missing error handling
File: src/main.rs
The call result is ignored.
";
        let issues = parse_report(report);
        assert_eq!(issues.len(), 2);
        assert_eq!(issues[0].severity, IssueSeverity::Critical);
        assert_eq!(issues[0].file_path.as_deref(), Some("src/db.rs"));
        assert_eq!(issues[0].line_number, Some(88));
        assert_eq!(
            issues[0].suggestion.as_deref(),
            Some("use bind parameters")
        );
        assert!(issues[0].code_snippet.as_deref().unwrap().contains("format!"));
        assert_eq!(issues[0].category.as_deref(), Some("security"));
        assert_eq!(issues[1].file_path.as_deref(), Some("src/main.rs"));
        assert_eq!(issues[1].line_number, None);
    }

    #[test]
    fn parses_chinese_issue_headings() {
        let report = "问题 1: 变量命名不规范\n文件 src/lib.rs 中的命名需要改进。\n";
        let issues = parse_report(report);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].title, "变量命名不规范");
        assert_eq!(issues[0].category.as_deref(), Some("style"));
    }

    #[test]
    fn emoji_lines_carry_severity_and_location() {
        let report = "\
🔴 [src/auth.rs:12] token compared with ==
🟡 [src/api.rs] unbounded request body
🔵 prefer iterator adaptors here
";
        let issues = parse_report(report);
        assert_eq!(issues.len(), 3);
        assert_eq!(issues[0].severity, IssueSeverity::Critical);
        assert_eq!(issues[0].file_path.as_deref(), Some("src/auth.rs"));
        assert_eq!(issues[0].line_number, Some(12));
        assert_eq!(issues[1].severity, IssueSeverity::Warning);
        assert_eq!(issues[2].severity, IssueSeverity::Suggestion);
        assert_eq!(issues[2].file_path, None);
    }

    #[test]
    fn think_spans_are_stripped() {
        let report = "<think>🔴 this is not a finding</think>\nIssue 1: real finding\nexplanation\n[THINK]🔴 nor this[/THINK]";
        let issues = parse_report(report);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].title, "real finding");
    }

    #[test]
    fn duplicates_are_collapsed() {
        let report = "\
🔴 [a.rs:1] same problem
🔴 [a.rs:1] same problem
🔴 [a.rs:2] same problem
";
        let issues = parse_report(report);
        assert_eq!(issues.len(), 2);
    }

    #[test]
    fn unclassified_issue_defaults_to_suggestion() {
        let report = "Issue 1: naming could read better\nrename the helper\n";
        let issues = parse_report(report);
        assert_eq!(issues[0].severity, IssueSeverity::Suggestion);
    }

    #[test]
    fn generic_headings_are_skipped() {
        let report = "\
## Code Review Report
all good overall

## Unchecked array index should be bounds-checked
indexing panics on empty input in src/parse.rs
";
        let issues = parse_report(report);
        assert_eq!(issues.len(), 1);
        assert!(issues[0].title.contains("array index"));
    }

    #[test]
    fn unparseable_text_yields_no_issues() {
        assert!(parse_report("").is_empty());
        assert!(parse_report("the weather is nice today").is_empty());
    }
}
