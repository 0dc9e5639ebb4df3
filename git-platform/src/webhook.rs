//! Webhook payload decoding and signature verification.
//!
//! Each platform names its event in a header; the body is decoded into the
//! normalized [`PlatformEvent`]. Anything unrecognized becomes
//! `PlatformEvent::Unknown` so ingestion can log it and move on.
//!
//! Signature schemes differ per platform:
//! - GitLab sends the shared secret verbatim in `X-Gitlab-Token`.
//! - Gitea signs the body with HMAC-SHA256 into `X-Gitea-Signature` (hex).
//! - GitHub does the same into `X-Hub-Signature-256`, prefixed `sha256=`.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use review_store::models::Platform;
use serde_json::Value;
use sha2::Sha256;

use crate::types::PlatformEvent;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the event kind for a platform.
pub fn event_header_name(platform: Platform) -> &'static str {
    match platform {
        Platform::GitLab => "X-Gitlab-Event",
        Platform::Gitea => "X-Gitea-Event",
        Platform::GitHub => "X-GitHub-Event",
    }
}

/// Header carrying the signature (or the raw token, for GitLab).
pub fn signature_header_name(platform: Platform) -> &'static str {
    match platform {
        Platform::GitLab => "X-Gitlab-Token",
        Platform::Gitea => "X-Gitea-Signature",
        Platform::GitHub => "X-Hub-Signature-256",
    }
}

/// Verifies the webhook signature for a repo that has a secret configured.
pub fn verify_signature(
    platform: Platform,
    secret: &str,
    header_value: Option<&str>,
    body: &[u8],
) -> bool {
    let Some(value) = header_value else {
        return false;
    };
    match platform {
        Platform::GitLab => constant_time_eq(value.as_bytes(), secret.as_bytes()),
        Platform::Gitea => verify_hmac_hex(secret, body, value),
        Platform::GitHub => {
            let Some(hex) = value.strip_prefix("sha256=") else {
                return false;
            };
            verify_hmac_hex(secret, body, hex)
        }
    }
}

fn verify_hmac_hex(secret: &str, body: &[u8], hex_signature: &str) -> bool {
    let Some(expected) = decode_hex(hex_signature) else {
        return false;
    };
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn decode_hex(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}

/// Decodes a platform-native event body into the normalized event.
pub fn decode_event(platform: Platform, event_kind: &str, payload: &Value) -> PlatformEvent {
    match platform {
        Platform::GitLab => decode_gitlab(event_kind, payload),
        Platform::Gitea | Platform::GitHub => decode_hub_style(event_kind, payload),
    }
}

fn decode_gitlab(event_kind: &str, payload: &Value) -> PlatformEvent {
    match event_kind {
        "Push Hook" => {
            let commits = payload["commits"].as_array();
            let latest = commits.and_then(|c| c.last());
            let count = payload["total_commits_count"]
                .as_u64()
                .unwrap_or_else(|| commits.map(|c| c.len() as u64).unwrap_or(0))
                as usize;
            PlatformEvent::Push {
                clone_urls: gitlab_urls(payload),
                branch: strip_ref(payload["ref"].as_str().unwrap_or_default()),
                head_commit: latest
                    .and_then(|c| c["id"].as_str())
                    .or_else(|| payload["after"].as_str())
                    .unwrap_or_default()
                    .to_string(),
                commits_count: count,
                author_name: latest
                    .and_then(|c| c["author"]["name"].as_str())
                    .map(str::to_string),
                author_email: latest
                    .and_then(|c| c["author"]["email"].as_str())
                    .map(str::to_string),
                committed_at: latest
                    .and_then(|c| c["timestamp"].as_str())
                    .and_then(parse_instant),
            }
        }
        "Merge Request Hook" => {
            let attrs = &payload["object_attributes"];
            PlatformEvent::MergeRequest {
                clone_urls: gitlab_urls(payload),
                iid: attrs["iid"].as_u64().unwrap_or(0),
                action: attrs["action"]
                    .as_str()
                    .or_else(|| attrs["state"].as_str())
                    .unwrap_or_default()
                    .to_string(),
                source_branch: attrs["source_branch"].as_str().unwrap_or_default().to_string(),
                target_branch: attrs["target_branch"].as_str().unwrap_or_default().to_string(),
                author_name: payload["user"]["name"]
                    .as_str()
                    .or_else(|| payload["user"]["username"].as_str())
                    .map(str::to_string),
                updated_at: attrs["updated_at"].as_str().and_then(parse_instant),
            }
        }
        other => PlatformEvent::Unknown {
            kind: other.to_string(),
        },
    }
}

/// Gitea and GitHub share the push/pull_request payload shape.
fn decode_hub_style(event_kind: &str, payload: &Value) -> PlatformEvent {
    match event_kind {
        "push" => {
            let commits = payload["commits"].as_array();
            let latest = commits.and_then(|c| c.last());
            PlatformEvent::Push {
                clone_urls: repo_urls(&payload["repository"]),
                branch: strip_ref(payload["ref"].as_str().unwrap_or_default()),
                head_commit: latest
                    .and_then(|c| c["id"].as_str())
                    .or_else(|| payload["after"].as_str())
                    .unwrap_or_default()
                    .to_string(),
                commits_count: commits.map(|c| c.len()).unwrap_or(0),
                author_name: latest
                    .and_then(|c| c["author"]["name"].as_str())
                    .or_else(|| payload["pusher"]["full_name"].as_str())
                    .or_else(|| payload["pusher"]["name"].as_str())
                    .map(str::to_string),
                author_email: latest
                    .and_then(|c| c["author"]["email"].as_str())
                    .map(str::to_string),
                committed_at: latest
                    .and_then(|c| c["timestamp"].as_str())
                    .and_then(parse_instant),
            }
        }
        "pull_request" => {
            let pr = &payload["pull_request"];
            PlatformEvent::MergeRequest {
                clone_urls: repo_urls(&payload["repository"]),
                iid: pr["number"].as_u64().unwrap_or(0),
                action: payload["action"].as_str().unwrap_or_default().to_string(),
                source_branch: pr["head"]["ref"].as_str().unwrap_or_default().to_string(),
                target_branch: pr["base"]["ref"].as_str().unwrap_or_default().to_string(),
                author_name: payload["sender"]["full_name"]
                    .as_str()
                    .or_else(|| payload["sender"]["login"].as_str())
                    .map(str::to_string),
                updated_at: pr["updated_at"].as_str().and_then(parse_instant),
            }
        }
        other => PlatformEvent::Unknown {
            kind: other.to_string(),
        },
    }
}

fn gitlab_urls(payload: &Value) -> Vec<String> {
    let project = &payload["project"];
    collect_urls(&[
        project["git_http_url"].as_str(),
        project["http_url"].as_str(),
        project["ssh_url"].as_str(),
        project["git_ssh_url"].as_str(),
        project["web_url"].as_str(),
    ])
}

fn repo_urls(repository: &Value) -> Vec<String> {
    collect_urls(&[
        repository["clone_url"].as_str(),
        repository["html_url"].as_str(),
        repository["ssh_url"].as_str(),
    ])
}

fn collect_urls(candidates: &[Option<&str>]) -> Vec<String> {
    let mut urls = Vec::new();
    for url in candidates.iter().flatten() {
        if !url.is_empty() && !urls.iter().any(|u| u == url) {
            urls.push((*url).to_string());
        }
    }
    urls
}

fn strip_ref(r: &str) -> String {
    r.trim_start_matches("refs/heads/")
        .trim_start_matches("refs/tags/")
        .to_string()
}

fn parse_instant(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn gitlab_push_decodes_branch_and_head() {
        let payload = json!({
            "ref": "refs/heads/main",
            "total_commits_count": 2,
            "project": {"git_http_url": "https://git.example.com/team/app.git"},
            "commits": [
                {"id": "aaa", "author": {"name": "a", "email": "a@x"}, "timestamp": "2025-01-02T03:04:05+00:00"},
                {"id": "bbb", "author": {"name": "b", "email": "b@x"}, "timestamp": "2025-01-02T04:04:05+00:00"}
            ]
        });
        match decode_event(Platform::GitLab, "Push Hook", &payload) {
            PlatformEvent::Push {
                branch,
                head_commit,
                commits_count,
                committed_at,
                ..
            } => {
                assert_eq!(branch, "main");
                assert_eq!(head_commit, "bbb");
                assert_eq!(commits_count, 2);
                assert!(committed_at.is_some());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn gitlab_mr_decodes_action_and_branches() {
        let payload = json!({
            "project": {"ssh_url": "git@git.example.com:team/app.git"},
            "user": {"name": "alice"},
            "object_attributes": {
                "iid": 7, "state": "opened", "action": "open",
                "source_branch": "feature", "target_branch": "main"
            }
        });
        match decode_event(Platform::GitLab, "Merge Request Hook", &payload) {
            PlatformEvent::MergeRequest {
                iid,
                action,
                source_branch,
                target_branch,
                author_name,
                ..
            } => {
                assert_eq!(iid, 7);
                assert_eq!(action, "open");
                assert_eq!(source_branch, "feature");
                assert_eq!(target_branch, "main");
                assert_eq!(author_name.as_deref(), Some("alice"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn github_pull_request_decodes() {
        let payload = json!({
            "action": "synchronize",
            "repository": {"clone_url": "https://github.example.com/team/app.git"},
            "sender": {"login": "bob"},
            "pull_request": {
                "number": 12,
                "head": {"ref": "fix"}, "base": {"ref": "main"},
                "updated_at": "2025-03-01T10:00:00Z"
            }
        });
        match decode_event(Platform::GitHub, "pull_request", &payload) {
            PlatformEvent::MergeRequest { iid, action, .. } => {
                assert_eq!(iid, 12);
                assert_eq!(action, "synchronize");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn unknown_events_stay_observable() {
        let event = decode_event(Platform::Gitea, "issue_comment", &json!({}));
        assert!(matches!(event, PlatformEvent::Unknown { kind } if kind == "issue_comment"));
    }

    #[test]
    fn gitlab_token_comparison() {
        assert!(verify_signature(
            Platform::GitLab,
            "s3cret",
            Some("s3cret"),
            b""
        ));
        assert!(!verify_signature(
            Platform::GitLab,
            "s3cret",
            Some("wrong"),
            b""
        ));
        assert!(!verify_signature(Platform::GitLab, "s3cret", None, b""));
    }

    #[test]
    fn github_hmac_signature_round_trip() {
        let secret = "topsecret";
        let body = br#"{"zen":"Design for failure."}"#;
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        let hex: String = mac
            .finalize()
            .into_bytes()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect();

        let header = format!("sha256={hex}");
        assert!(verify_signature(
            Platform::GitHub,
            secret,
            Some(&header),
            body
        ));
        assert!(!verify_signature(
            Platform::GitHub,
            secret,
            Some("sha256=00"),
            body
        ));
        // Gitea uses the same mac without the prefix.
        assert!(verify_signature(Platform::Gitea, secret, Some(&hex), body));
    }
}
