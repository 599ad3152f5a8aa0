//! Source-hosting collaborator (GitHub REST API).
//!
//! [`RepoHost`] backs phase verification, [`IssueTracker`] backs the
//! milestone and issue setup of the autonomous flow. Both are traits so tests
//! can substitute fakes.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::{ACCEPT, USER_AGENT};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::io::config::OracleConfig;

const JSON_MEDIA_TYPE: &str = "application/vnd.github+json";
const DIFF_MEDIA_TYPE: &str = "application/vnd.github.v3.diff";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GithubError {
    #[error("'{0}' is not a repository URL of the form https://host/owner/repo")]
    BadRepoUrl(String),
    #[error("GitHub request failed: {0}")]
    Transport(String),
    #[error("GitHub API error: {status}")]
    Status { status: u16, body: String },
    #[error("GitHub response could not be decoded: {0}")]
    Decode(String),
    #[error("repository has no commits")]
    NoCommits,
    #[error("GITHUB_TOKEN is required for this operation")]
    MissingToken,
}

/// `owner/name` of a hosted repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl std::fmt::Display for RepoRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// Parse `https://github.com/owner/repo`, tolerating `.git` and a trailing `/`.
pub fn parse_repo_url(url: &str) -> Result<RepoRef, GithubError> {
    let bad = || GithubError::BadRepoUrl(url.to_string());
    let rest = url.trim().strip_prefix("https://").ok_or_else(bad)?;
    let rest = rest.trim_end_matches('/');
    let rest = rest.strip_suffix(".git").unwrap_or(rest);
    let segments: Vec<&str> = rest.split('/').collect();
    match segments.as_slice() {
        [host, owner, name]
            if !host.is_empty() && !owner.is_empty() && !name.is_empty() && !host.contains('@') =>
        {
            Ok(RepoRef {
                owner: (*owner).to_string(),
                name: (*name).to_string(),
            })
        }
        _ => Err(bad()),
    }
}

/// Latest commit on the default branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    pub sha: String,
    pub message: String,
}

/// Read access to commits of a hosted repository.
pub trait RepoHost {
    fn latest_commit(&self, repo: &RepoRef) -> Result<CommitInfo, GithubError>;
    fn commit_diff(&self, repo: &RepoRef, sha: &str) -> Result<String, GithubError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct NewIssue {
    pub title: String,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub milestone: Option<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
}

/// Result of an issue creation attempt. Failures are reported, not raised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueOutcome {
    pub created: bool,
    pub message: String,
    pub number: Option<u64>,
}

/// Write access for planning artifacts.
pub trait IssueTracker {
    fn create_milestone(
        &self,
        repo: &RepoRef,
        title: &str,
        description: &str,
    ) -> Result<u64, GithubError>;
    fn create_issue(&self, repo: &RepoRef, issue: &NewIssue) -> IssueOutcome;
}

pub struct GithubClient {
    http: Client,
    api_base: String,
    token: Option<String>,
}

impl std::fmt::Debug for GithubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GithubClient")
            .field("api_base", &self.api_base)
            .field("authenticated", &self.token.is_some())
            .finish()
    }
}

#[derive(Deserialize)]
struct CommitItem {
    sha: String,
    commit: CommitDetail,
}

#[derive(Deserialize)]
struct CommitDetail {
    message: String,
}

#[derive(Deserialize)]
struct Numbered {
    number: u64,
}

impl GithubClient {
    pub fn new(cfg: &OracleConfig, token: Option<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(cfg.http_timeout_secs))
            .build()
            .context("build http client")?;
        Ok(Self {
            http,
            api_base: cfg.github_api_base.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn repo_url(&self, repo: &RepoRef, tail: &str) -> String {
        format!("{}/repos/{}/{}/{tail}", self.api_base, repo.owner, repo.name)
    }

    fn authorized(&self, builder: RequestBuilder, accept: &str) -> RequestBuilder {
        let builder = builder
            .header(USER_AGENT, concat!("oracle/", env!("CARGO_PKG_VERSION")))
            .header(ACCEPT, accept);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    fn send(&self, builder: RequestBuilder) -> Result<(StatusCode, String), GithubError> {
        let response = builder
            .send()
            .map_err(|err| GithubError::Transport(err.without_url().to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .map_err(|err| GithubError::Transport(err.without_url().to_string()))?;
        Ok((status, body))
    }

    fn post_issue(
        &self,
        repo: &RepoRef,
        issue: &NewIssue,
    ) -> Result<(StatusCode, String), GithubError> {
        let request = self
            .authorized(self.http.post(self.repo_url(repo, "issues")), JSON_MEDIA_TYPE)
            .json(issue);
        self.send(request)
    }
}

impl RepoHost for GithubClient {
    #[instrument(skip_all, fields(repo = %repo))]
    fn latest_commit(&self, repo: &RepoRef) -> Result<CommitInfo, GithubError> {
        let request = self.authorized(
            self.http
                .get(self.repo_url(repo, "commits"))
                .query(&[("per_page", "1")]),
            JSON_MEDIA_TYPE,
        );
        let (status, body) = self.send(request)?;
        if status != StatusCode::OK {
            warn!(status = status.as_u16(), "listing commits failed");
            return Err(GithubError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let commits: Vec<CommitItem> =
            serde_json::from_str(&body).map_err(|err| GithubError::Decode(err.to_string()))?;
        let latest = commits.into_iter().next().ok_or(GithubError::NoCommits)?;
        debug!(sha = %latest.sha, "latest commit");
        Ok(CommitInfo {
            sha: latest.sha,
            message: latest.commit.message,
        })
    }

    #[instrument(skip_all, fields(repo = %repo, sha))]
    fn commit_diff(&self, repo: &RepoRef, sha: &str) -> Result<String, GithubError> {
        let request = self.authorized(
            self.http.get(self.repo_url(repo, &format!("commits/{sha}"))),
            DIFF_MEDIA_TYPE,
        );
        let (status, body) = self.send(request)?;
        if status != StatusCode::OK {
            return Err(GithubError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }
}

impl IssueTracker for GithubClient {
    #[instrument(skip_all, fields(repo = %repo))]
    fn create_milestone(
        &self,
        repo: &RepoRef,
        title: &str,
        description: &str,
    ) -> Result<u64, GithubError> {
        if self.token.is_none() {
            return Err(GithubError::MissingToken);
        }
        let request = self
            .authorized(self.http.post(self.repo_url(repo, "milestones")), JSON_MEDIA_TYPE)
            .json(&serde_json::json!({ "title": title, "description": description }));
        let (status, body) = self.send(request)?;
        if status != StatusCode::CREATED {
            return Err(GithubError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let created: Numbered =
            serde_json::from_str(&body).map_err(|err| GithubError::Decode(err.to_string()))?;
        info!(number = created.number, "milestone created");
        Ok(created.number)
    }

    #[instrument(skip_all, fields(repo = %repo, title = %issue.title))]
    fn create_issue(&self, repo: &RepoRef, issue: &NewIssue) -> IssueOutcome {
        if self.token.is_none() {
            return issue_failed(&issue.title, &GithubError::MissingToken);
        }
        let mut attempt = self.post_issue(repo, issue);
        let labels_rejected = !issue.labels.is_empty()
            && matches!(&attempt, Ok((status, body)) if rejects_labels(*status, body));
        if labels_rejected {
            warn!("labels rejected, retrying without labels");
            let unlabeled = NewIssue {
                labels: Vec::new(),
                ..issue.clone()
            };
            attempt = self.post_issue(repo, &unlabeled);
        }
        match attempt {
            Ok((StatusCode::CREATED, body)) => {
                let number = serde_json::from_str::<Numbered>(&body).ok().map(|n| n.number);
                info!(?number, "issue created");
                IssueOutcome {
                    created: true,
                    message: format!("Created issue '{}'", issue.title),
                    number,
                }
            }
            Ok((status, body)) => issue_failed(
                &issue.title,
                &GithubError::Status {
                    status: status.as_u16(),
                    body,
                },
            ),
            Err(err) => issue_failed(&issue.title, &err),
        }
    }
}

fn rejects_labels(status: StatusCode, body: &str) -> bool {
    matches!(
        status,
        StatusCode::FORBIDDEN | StatusCode::UNPROCESSABLE_ENTITY
    ) && body.to_lowercase().contains("label")
}

fn issue_failed(title: &str, err: &GithubError) -> IssueOutcome {
    warn!(error = %err, "issue creation failed");
    IssueOutcome {
        created: false,
        message: format!("Failed to create issue '{title}': {err}"),
        number: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockHttpServer;

    fn client(base: &str, token: Option<&str>) -> GithubClient {
        let cfg = OracleConfig {
            github_api_base: base.to_string(),
            http_timeout_secs: 5,
            ..OracleConfig::default()
        };
        GithubClient::new(&cfg, token.map(str::to_string)).expect("client")
    }

    fn repo() -> RepoRef {
        RepoRef {
            owner: "acme".to_string(),
            name: "todo".to_string(),
        }
    }

    #[test]
    fn parses_repo_urls() {
        for url in [
            "https://github.com/acme/todo",
            "https://github.com/acme/todo.git",
            "https://github.com/acme/todo/",
        ] {
            assert_eq!(parse_repo_url(url).expect(url), repo());
        }
        for url in [
            "git@github.com:acme/todo.git",
            "https://github.com/acme",
            "https://github.com/acme/todo/tree/main",
            "",
        ] {
            assert!(parse_repo_url(url).is_err(), "{url}");
        }
    }

    #[test]
    fn latest_commit_reads_first_entry() {
        let server = MockHttpServer::start(vec![(
            200,
            r#"[{"sha":"abc123","commit":{"message":"phase-2: api complete"}}]"#.to_string(),
        )]);
        let commit = client(&server.base_url(), None)
            .latest_commit(&repo())
            .expect("commit");
        assert_eq!(commit.sha, "abc123");
        assert_eq!(commit.message, "phase-2: api complete");

        let requests = server.finish();
        assert!(requests[0].starts_with("GET /repos/acme/todo/commits?per_page=1 "));
    }

    #[test]
    fn non_ok_status_is_an_error() {
        let server = MockHttpServer::start(vec![(404, r#"{"message":"Not Found"}"#.to_string())]);
        let err = client(&server.base_url(), None)
            .latest_commit(&repo())
            .unwrap_err();
        assert!(matches!(err, GithubError::Status { status: 404, .. }));
        server.finish();
    }

    #[test]
    fn issue_retries_without_rejected_labels() {
        let server = MockHttpServer::start(vec![
            (
                422,
                r#"{"message":"Validation Failed","errors":[{"field":"labels"}]}"#.to_string(),
            ),
            (201, r#"{"number":7}"#.to_string()),
        ]);
        let issue = NewIssue {
            title: "Phase 1: Core".to_string(),
            body: "models".to_string(),
            milestone: Some(3),
            labels: vec!["ai".to_string()],
        };

        let outcome = client(&server.base_url(), Some("ghp_test")).create_issue(&repo(), &issue);

        assert!(outcome.created, "{}", outcome.message);
        assert_eq!(outcome.number, Some(7));
        let requests = server.finish();
        assert_eq!(requests.len(), 2);
        assert!(requests[0].contains("\"labels\""));
        assert!(!requests[1].contains("\"labels\""));
        assert!(requests[1].contains("\"milestone\":3"));
    }

    #[test]
    fn issue_failure_is_reported_not_raised() {
        let server = MockHttpServer::start(vec![(500, "boom".to_string())]);
        let outcome = client(&server.base_url(), Some("ghp_test")).create_issue(
            &repo(),
            &NewIssue {
                title: "x".to_string(),
                ..NewIssue::default()
            },
        );
        assert!(!outcome.created);
        assert!(outcome.message.contains("500"));
        server.finish();
    }

    #[test]
    fn issue_without_token_fails_fast() {
        let outcome =
            client("http://127.0.0.1:9", None).create_issue(&repo(), &NewIssue::default());
        assert!(!outcome.created);
        assert!(outcome.message.contains("GITHUB_TOKEN"));
    }
}
